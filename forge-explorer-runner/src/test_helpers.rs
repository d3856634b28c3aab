// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fakes shared by unit tests.

use crate::{
    errors::{ResolverUnavailable, RunnerExecutionError},
    forge::{RunOptions, RunResult, RunScope, TestTool},
    positions::PositionService,
};
use forge_explorer_metadata::{
    ContractPositionSummary, ForgeTestResults, TestPositionSummary, TestsPositionsParams,
    TestsPositionsResponse,
};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tokio::sync::Semaphore;

/// A position service that scans source text for `contract X` and `function testY` declarations.
///
/// Ranges cover the declared name, with 1-indexed lines as on the wire.
#[derive(Clone, Debug)]
pub(crate) struct SourceScanService {
    inner: Arc<ScanInner>,
}

#[derive(Debug)]
struct ScanInner {
    available: AtomicBool,
    calls: AtomicUsize,
    held: Mutex<Option<(String, Arc<Semaphore>)>>,
}

impl SourceScanService {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(ScanInner {
                available: AtomicBool::new(true),
                calls: AtomicUsize::new(0),
                held: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Makes requests for content containing `marker` wait for a permit on the returned
    /// semaphore.
    pub(crate) fn hold(&self, marker: &str) -> Arc<Semaphore> {
        let semaphore = Arc::new(Semaphore::new(0));
        *self.inner.held.lock().unwrap() = Some((marker.to_owned(), semaphore.clone()));
        semaphore
    }
}

impl PositionService for SourceScanService {
    async fn get_tests_positions(
        &self,
        params: TestsPositionsParams,
    ) -> Result<TestsPositionsResponse, ResolverUnavailable> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let held = self.inner.held.lock().unwrap().clone();
        if let Some((marker, semaphore)) = held
            && params.file_content.contains(&marker)
        {
            let _permit = semaphore.acquire().await.expect("semaphore is never closed");
        }
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(ResolverUnavailable::Closed);
        }
        Ok(scan_source(&params.file_content))
    }
}

pub(crate) fn scan_source(content: &str) -> TestsPositionsResponse {
    let mut contracts: Vec<ContractPositionSummary> = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let wire_line = index as u32 + 1;
        if let Some((name, range)) = declared_name(line, "contract ", wire_line) {
            contracts.push(ContractPositionSummary {
                name,
                range,
                tests: Vec::new(),
            });
        } else if let Some((name, range)) = declared_name(line, "function ", wire_line) {
            if let Some(contract) = contracts.last_mut()
                && name.starts_with("test")
            {
                contract.tests.push(TestPositionSummary { name, range });
            }
        }
    }
    TestsPositionsResponse { contracts }
}

fn declared_name(line: &str, keyword: &str, wire_line: u32) -> Option<(String, lsp_types::Range)> {
    let start = line.find(keyword)? + keyword.len();
    let name: String = line[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
        .collect();
    if name.is_empty() {
        return None;
    }
    let range = lsp_types::Range::new(
        lsp_types::Position::new(wire_line, start as u32),
        lsp_types::Position::new(wire_line, (start + name.len()) as u32),
    );
    Some((name, range))
}

/// A test tool that replays canned results and records every invocation.
#[derive(Clone, Debug)]
pub(crate) struct FakeTool {
    inner: Arc<FakeToolInner>,
}

#[derive(Debug)]
struct FakeToolInner {
    available: AtomicBool,
    invocations: Mutex<Vec<RunScope>>,
    responses: Mutex<VecDeque<FakeResponse>>,
    default_response: Mutex<FakeResponse>,
}

#[derive(Clone, Debug)]
pub(crate) enum FakeResponse {
    Results(String),
    Fail(&'static str),
}

impl FakeTool {
    /// Creates a tool that answers every invocation with `json`.
    pub(crate) fn returning(json: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(FakeToolInner {
                available: AtomicBool::new(true),
                invocations: Mutex::new(Vec::new()),
                responses: Mutex::new(VecDeque::new()),
                default_response: Mutex::new(FakeResponse::Results(json.into())),
            }),
        }
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Queues a response for the next invocation, ahead of the default.
    pub(crate) fn push_response(&self, response: FakeResponse) {
        self.inner.responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn invocations(&self) -> Vec<RunScope> {
        self.inner.invocations.lock().unwrap().clone()
    }
}

impl TestTool for FakeTool {
    fn program(&self) -> &str {
        "fake-forge"
    }

    async fn check_tool_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    async fn execute(
        &self,
        scope: RunScope,
        _options: RunOptions,
    ) -> Result<RunResult, RunnerExecutionError> {
        self.inner.invocations.lock().unwrap().push(scope.clone());
        // Yield so that concurrent runs interleave the way real subprocess calls would.
        tokio::task::yield_now().await;

        let response = self
            .inner
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.inner.default_response.lock().unwrap().clone());
        match response {
            FakeResponse::Results(json) => {
                Ok(ForgeTestResults::parse(&json).expect("fake results are valid JSON"))
            }
            FakeResponse::Fail(diagnostics) => Err(RunnerExecutionError::Failed {
                command: vec!["fake-forge".to_owned(), "test".to_owned()],
                exit_status: exit_status(1),
                diagnostics: diagnostics.to_owned(),
            }),
        }
    }
}

#[cfg(unix)]
fn exit_status(code: i32) -> std::process::ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    std::process::ExitStatus::from_raw(code << 8)
}

#[cfg(windows)]
fn exit_status(code: i32) -> std::process::ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    std::process::ExitStatus::from_raw(code as u32)
}

// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Executes run requests against the test tree.
//!
//! A run walks the requested nodes depth-first. File nodes are resolved on demand and expand into
//! their contracts; contracts are dispatched to the test tool as a whole unless one of their cases
//! is excluded, in which case the remaining cases are dispatched one by one. Every requested case
//! is reported exactly once.

use crate::{
    errors::{ResultMismatch, RunRejected},
    forge::{RunOptions, TestRunner, TestTool},
    positions::PositionService,
    reporter::{RunCounts, RunEvent, RunOutcome, RunReport, RunState},
    stopwatch::stopwatch,
    tree::{NodeKey, TestNode, TestTree},
};
use camino::Utf8PathBuf;
use forge_explorer_metadata::{NodeKind, OutcomeStatus, RunStatus, SuiteResult, TestResult};
use serde::Deserialize;
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tracing::debug;

/// What to do with a run request that arrives while another run is active.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Wait for the active run to finish.
    #[default]
    Queue,

    /// Fail with [`RunRejected::Busy`].
    Reject,
}

/// A cooperative cancellation flag shared between a run and whoever may cancel it.
///
/// The flag is checked before each node is taken off the work queue. A tool invocation that is
/// already in flight is allowed to finish.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a new, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A request to run a set of nodes.
#[derive(Clone, Debug, Default)]
pub struct RunRequest {
    targets: Vec<NodeKey>,
    exclude: HashSet<NodeKey>,
    debug: bool,
    cancel: CancelToken,
}

impl RunRequest {
    /// Requests a run of every test file in the workspace.
    pub fn all() -> Self {
        Self::default()
    }

    /// Requests a run of `targets`. An empty list is the same as [`RunRequest::all`].
    pub fn new(targets: impl IntoIterator<Item = NodeKey>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Excludes these nodes and their descendants from the run.
    pub fn exclude(mut self, keys: impl IntoIterator<Item = NodeKey>) -> Self {
        self.exclude.extend(keys);
        self
    }

    /// Asks the test tool for decoded logs, which are appended to failure messages.
    pub fn set_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Uses `token` to cancel this run.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the requested nodes.
    pub fn targets(&self) -> &[NodeKey] {
        &self.targets
    }

    /// Returns the excluded nodes.
    pub fn excluded(&self) -> &HashSet<NodeKey> {
        &self.exclude
    }

    /// Returns the token that cancels this run.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn options(&self) -> RunOptions {
        RunOptions { debug: self.debug }
    }
}

/// Coordinates runs over a test tree, one at a time.
#[derive(Debug)]
pub struct RunCoordinator<S, T> {
    tree: Arc<TestTree<S>>,
    runner: TestRunner<T>,
    busy_policy: BusyPolicy,
    active: tokio::sync::Mutex<()>,
}

impl<S: PositionService, T: TestTool> RunCoordinator<S, T> {
    /// Creates a coordinator for `tree` that dispatches through `runner`.
    pub fn new(tree: Arc<TestTree<S>>, runner: TestRunner<T>, busy_policy: BusyPolicy) -> Self {
        Self {
            tree,
            runner,
            busy_policy,
            active: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the tree runs operate on.
    pub fn tree(&self) -> &Arc<TestTree<S>> {
        &self.tree
    }

    /// Returns the runner used for dispatch.
    pub fn runner(&self) -> &TestRunner<T> {
        &self.runner
    }

    /// Returns the busy policy.
    pub fn busy_policy(&self) -> BusyPolicy {
        self.busy_policy
    }

    /// Executes `request`, passing progress events to `callback`.
    ///
    /// Test failures, tool errors and cancellation are all reported through the returned
    /// [`RunReport`]. An error is only returned if the request as a whole could not be started.
    pub async fn run<F>(&self, request: RunRequest, mut callback: F) -> Result<RunReport, RunRejected>
    where
        F: FnMut(RunEvent) + Send,
    {
        let _active = match self.busy_policy {
            BusyPolicy::Queue => {
                callback(RunEvent::StateChanged {
                    state: RunState::Queued,
                });
                self.active.lock().await
            }
            BusyPolicy::Reject => {
                let guard = self.active.try_lock().map_err(|_| RunRejected::Busy)?;
                callback(RunEvent::StateChanged {
                    state: RunState::Queued,
                });
                guard
            }
        };

        if request.cancel.is_cancelled() {
            debug!("run cancelled before it started");
            callback(RunEvent::StateChanged {
                state: RunState::Cancelled,
            });
            let snapshot = stopwatch().snapshot();
            return Ok(RunReport {
                status: RunStatus::Cancelled,
                start_time: snapshot.start_time,
                duration: snapshot.duration,
                counts: RunCounts::default(),
                outcomes: Vec::new(),
            });
        }

        let mut unknown = Vec::new();
        let roots = if request.targets.is_empty() {
            if !self.tree.is_root_resolved() {
                self.tree.discover().await.map_err(RunRejected::Discovery)?;
            }
            self.tree.files()
        } else {
            self.normalize_targets(&request.targets, &mut unknown)
        };

        let stopwatch = stopwatch();
        callback(RunEvent::StateChanged {
            state: RunState::Running,
        });
        debug!(
            "starting run over {} {}",
            roots.len(),
            if roots.len() == 1 { "node" } else { "nodes" }
        );

        let mut context = RunContext {
            request: &request,
            root: self.tree.workspace_root().to_owned(),
            callback: &mut callback,
            visited: HashSet::new(),
            counts: RunCounts::default(),
            outcomes: Vec::new(),
        };
        for key in unknown {
            context.record(RunOutcome {
                name: key.to_string(),
                key,
                kind: None,
                status: OutcomeStatus::Errored,
                duration: Duration::ZERO,
                message: Some("node not found".to_owned()),
            });
        }

        let mut queue: Vec<WorkItem> = roots.into_iter().rev().map(WorkItem::new).collect();
        let status = loop {
            if request.cancel.is_cancelled() {
                debug!("run cancelled with {} queued nodes remaining", queue.len());
                break RunStatus::Cancelled;
            }
            let Some(item) = queue.pop() else {
                break RunStatus::Completed;
            };
            self.dispatch(item, &mut queue, &mut context).await;
        };

        let state = match status {
            RunStatus::Completed => RunState::Completed,
            RunStatus::Cancelled => RunState::Cancelled,
        };
        let RunContext {
            counts, outcomes, ..
        } = context;
        callback(RunEvent::StateChanged { state });

        let snapshot = stopwatch.snapshot();
        Ok(RunReport {
            status,
            start_time: snapshot.start_time,
            duration: snapshot.duration,
            counts,
            outcomes,
        })
    }

    /// Deduplicates targets and drops those covered by a targeted ancestor. Keys that don't name
    /// a node are collected into `unknown`.
    fn normalize_targets(
        &self,
        targets: &[NodeKey],
        unknown: &mut Vec<NodeKey>,
    ) -> Vec<Arc<TestNode>> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for key in targets {
            if !seen.insert(key.clone()) {
                continue;
            }
            match self.tree.get(key) {
                Some(node) => nodes.push(node),
                None => unknown.push(key.clone()),
            }
        }

        let targeted: HashSet<NodeKey> = nodes.iter().map(|node| node.key().clone()).collect();
        nodes.retain(|node| {
            !node
                .parent()
                .is_some_and(|parent| parent.has_ancestor_or_self(&targeted))
        });
        nodes
    }

    async fn dispatch<F>(
        &self,
        item: WorkItem,
        queue: &mut Vec<WorkItem>,
        context: &mut RunContext<'_, F>,
    ) where
        F: FnMut(RunEvent) + Send,
    {
        let WorkItem { node, contract } = item;
        if node.is_removed() {
            context.record_skipped(
                &node,
                contract.as_deref(),
                Some("removed from the workspace during the run"),
            );
            return;
        }
        if context.request.exclude.contains(node.key()) {
            context.record_skipped(&node, contract.as_deref(), None);
            return;
        }

        match node.kind() {
            NodeKind::File => {
                if !node.is_resolved()
                    && let Err(error) = self.tree.resolve_file(&node).await
                {
                    let outcome = context.errored(&node, None, error.to_string(), Duration::ZERO);
                    context.record(outcome);
                    return;
                }
                queue.extend(node.children().iter().rev().cloned().map(WorkItem::new));
            }
            NodeKind::Contract => self.dispatch_contract(&node, queue, context).await,
            NodeKind::Case => match contract.or_else(|| node.parent()) {
                Some(contract) => self.dispatch_case(&contract, &node, context).await,
                None => {
                    let outcome = context.errored(
                        &node,
                        None,
                        "test case has no parent contract".to_owned(),
                        Duration::ZERO,
                    );
                    context.record(outcome);
                }
            },
        }
    }

    async fn dispatch_contract<F>(
        &self,
        contract: &Arc<TestNode>,
        queue: &mut Vec<WorkItem>,
        context: &mut RunContext<'_, F>,
    ) where
        F: FnMut(RunEvent) + Send,
    {
        let parent: &TestNode = contract;
        let cases = contract.children();
        if cases.is_empty() {
            context.record_skipped(contract, None, Some("contract declares no tests"));
            return;
        }
        if cases
            .iter()
            .any(|case| context.request.exclude.contains(case.key()))
        {
            queue.extend(cases.iter().rev().map(|case| WorkItem {
                node: case.clone(),
                contract: Some(contract.clone()),
            }));
            return;
        }

        context.started(contract, None);
        let stopwatch = stopwatch();
        let result = self
            .runner
            .run_contract(contract.label(), context.request.options())
            .await;
        let elapsed = stopwatch.snapshot().duration;

        let result = match result {
            Ok(result) => result,
            Err(error) => {
                let message = error.to_string();
                for case in cases.iter() {
                    let outcome = context.errored(case, Some(parent), message.clone(), elapsed);
                    context.record(outcome);
                }
                let outcome = context.errored(contract, None, message, elapsed);
                context.record(outcome);
                return;
            }
        };

        let Some(suite) = result.suite_for_contract(contract.label()) else {
            let message = ResultMismatch::MissingSuite {
                contract: contract.label().to_owned(),
            }
            .to_string();
            for case in cases.iter() {
                let outcome = context.errored(case, Some(parent), message.clone(), elapsed);
                context.record(outcome);
            }
            let outcome = context.errored(contract, None, message, elapsed);
            context.record(outcome);
            return;
        };

        let mut failed = 0;
        let mut errored = 0;
        for case in cases.iter() {
            let outcome = context.case_outcome(contract, case, Some(suite), elapsed);
            match outcome.status {
                OutcomeStatus::Failed => failed += 1,
                OutcomeStatus::Errored => errored += 1,
                OutcomeStatus::Passed | OutcomeStatus::Skipped => {}
            }
            context.record(outcome);
        }

        let (status, message) = if failed > 0 {
            (
                OutcomeStatus::Failed,
                Some(format!("{failed} of {} tests failed", cases.len())),
            )
        } else if errored > 0 {
            (
                OutcomeStatus::Errored,
                Some(format!("{errored} of {} tests errored", cases.len())),
            )
        } else {
            (OutcomeStatus::Passed, None)
        };
        let outcome = RunOutcome {
            key: contract.key().clone(),
            kind: Some(NodeKind::Contract),
            name: context.name(contract, None),
            status,
            duration: suite.duration.unwrap_or(elapsed),
            message,
        };
        context.record(outcome);
    }

    async fn dispatch_case<F>(
        &self,
        contract: &Arc<TestNode>,
        case: &Arc<TestNode>,
        context: &mut RunContext<'_, F>,
    ) where
        F: FnMut(RunEvent) + Send,
    {
        context.started(case, Some(&**contract));
        let stopwatch = stopwatch();
        let result = self
            .runner
            .run_function(contract.label(), case.label(), context.request.options())
            .await;
        let elapsed = stopwatch.snapshot().duration;

        let outcome = match result {
            Ok(result) => context.case_outcome(
                contract,
                case,
                result.suite_for_contract(contract.label()),
                elapsed,
            ),
            Err(error) => context.errored(case, Some(&**contract), error.to_string(), elapsed),
        };
        context.record(outcome);
    }
}

/// A node waiting to be dispatched. Cases carry their contract so that they can still be
/// dispatched if their file is re-resolved mid-run.
#[derive(Debug)]
struct WorkItem {
    node: Arc<TestNode>,
    contract: Option<Arc<TestNode>>,
}

impl WorkItem {
    fn new(node: Arc<TestNode>) -> Self {
        let contract = match node.kind() {
            NodeKind::Case => node.parent(),
            NodeKind::File | NodeKind::Contract => None,
        };
        Self { node, contract }
    }
}

struct RunContext<'a, F> {
    request: &'a RunRequest,
    root: Utf8PathBuf,
    callback: &'a mut F,
    visited: HashSet<NodeKey>,
    counts: RunCounts,
    outcomes: Vec<RunOutcome>,
}

impl<F: FnMut(RunEvent) + Send> RunContext<'_, F> {
    fn started(&mut self, node: &TestNode, contract: Option<&TestNode>) {
        debug!("dispatching {}", node.key());
        let name = self.name(node, contract);
        (self.callback)(RunEvent::NodeStarted {
            key: node.key().clone(),
            kind: node.kind(),
            name,
        });
    }

    /// Records an outcome, unless one was already recorded for the node.
    fn record(&mut self, outcome: RunOutcome) {
        if !self.visited.insert(outcome.key.clone()) {
            debug!("ignoring repeated outcome for {}", outcome.key);
            return;
        }
        if outcome.is_case() {
            self.counts.record(outcome.status);
        }
        (self.callback)(RunEvent::NodeFinished(outcome.clone()));
        self.outcomes.push(outcome);
    }

    /// Records a skipped node. Cases under a skipped file or contract count as skipped too, but
    /// don't get outcomes of their own.
    fn record_skipped(
        &mut self,
        node: &TestNode,
        contract: Option<&TestNode>,
        message: Option<&str>,
    ) {
        if self.visited.contains(node.key()) {
            return;
        }
        if node.kind() != NodeKind::Case {
            let mut pending: Vec<_> = node.children().iter().cloned().collect();
            while let Some(child) = pending.pop() {
                match child.kind() {
                    NodeKind::Case => {
                        if self.visited.insert(child.key().clone()) {
                            self.counts.skipped += 1;
                        }
                    }
                    NodeKind::File | NodeKind::Contract => {
                        pending.extend(child.children().iter().cloned());
                    }
                }
            }
        }
        let outcome = self.skipped(node, contract, message);
        self.record(outcome);
    }

    fn name(&self, node: &TestNode, contract: Option<&TestNode>) -> String {
        match node.kind() {
            NodeKind::File => node
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(node.path())
                .to_string(),
            NodeKind::Contract => node.label().to_owned(),
            NodeKind::Case => {
                let parent = contract.map(|contract| contract.label().to_owned());
                let parent = parent.or_else(|| node.parent().map(|p| p.label().to_owned()));
                match parent {
                    Some(parent) => format!("{parent}::{}", node.label()),
                    None => node.label().to_owned(),
                }
            }
        }
    }

    fn skipped(
        &self,
        node: &TestNode,
        contract: Option<&TestNode>,
        message: Option<&str>,
    ) -> RunOutcome {
        RunOutcome {
            key: node.key().clone(),
            kind: Some(node.kind()),
            name: self.name(node, contract),
            status: OutcomeStatus::Skipped,
            duration: Duration::ZERO,
            message: message.map(str::to_owned),
        }
    }

    fn errored(
        &self,
        node: &TestNode,
        contract: Option<&TestNode>,
        message: String,
        duration: Duration,
    ) -> RunOutcome {
        RunOutcome {
            key: node.key().clone(),
            kind: Some(node.kind()),
            name: self.name(node, contract),
            status: OutcomeStatus::Errored,
            duration,
            message: Some(message),
        }
    }

    /// Maps a case to its result within `suite`.
    fn case_outcome(
        &self,
        contract: &TestNode,
        case: &TestNode,
        suite: Option<&SuiteResult>,
        elapsed: Duration,
    ) -> RunOutcome {
        let result = match suite {
            Some(suite) => suite.test_for_function(case.label()).ok_or_else(|| {
                ResultMismatch::MissingTest {
                    contract: contract.label().to_owned(),
                    function: case.label().to_owned(),
                }
            }),
            None => Err(ResultMismatch::MissingSuite {
                contract: contract.label().to_owned(),
            }),
        };

        match result {
            Ok(test) => RunOutcome {
                key: case.key().clone(),
                kind: Some(NodeKind::Case),
                name: self.name(case, Some(contract)),
                status: if test.status.is_success() {
                    OutcomeStatus::Passed
                } else {
                    OutcomeStatus::Failed
                },
                duration: test.duration.unwrap_or(elapsed),
                message: test_message(test, self.request.debug),
            },
            Err(mismatch) => self.errored(case, Some(contract), mismatch.to_string(), elapsed),
        }
    }
}

fn test_message(test: &TestResult, debug: bool) -> Option<String> {
    let mut message = match &test.reason {
        Some(reason) if !reason.is_empty() => Some(reason.clone()),
        _ if test.status.is_success() => None,
        _ => Some(format!("forge reported status {:?}", test.status)),
    };
    if debug && !test.decoded_logs.is_empty() {
        let logs = test.decoded_logs.join("\n");
        message = Some(match message {
            Some(message) => format!("{message}\n{logs}"),
            None => logs,
        });
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ExplorerConfig,
        positions::SourcePositionResolver,
        forge::RunScope,
        test_helpers::{FakeResponse, FakeTool, SourceScanService},
    };
    use camino::Utf8Path;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::Mutex;

    const ROOT: &str = "/fake/workspace";

    const FOO_SOURCE: &str = indoc! {"
        pragma solidity ^0.8.13;

        contract FooTest {
            function testAdd() public {}
            function testSub() public {}
        }
    "};

    const FOO_RESULTS: &str = indoc! {r#"
        {
          "test/Foo.t.sol:FooTest": {
            "duration": "3ms",
            "test_results": {
              "testAdd()": { "status": "Success", "reason": null, "decoded_logs": [] },
              "testSub()": { "status": "Failure", "reason": "assertion failed", "decoded_logs": ["sub: 1 != 2"] }
            },
            "warnings": []
          }
        }
    "#};

    type TestCoordinator = RunCoordinator<SourceScanService, FakeTool>;

    async fn coordinator(
        files: &[(&str, &str)],
        tool: FakeTool,
        busy_policy: BusyPolicy,
    ) -> TestCoordinator {
        let config = ExplorerConfig::default_config(ROOT);
        let resolver = SourcePositionResolver::new(SourceScanService::new());
        let tree = Arc::new(TestTree::new(&config, resolver));
        for (path, text) in files {
            tree.document_opened(&Utf8Path::new(ROOT).join(path), (*text).to_owned())
                .await
                .expect("buffered documents resolve");
        }
        RunCoordinator::new(tree, TestRunner::new(tool), busy_policy)
    }

    fn foo_file() -> NodeKey {
        NodeKey::for_file(&Utf8Path::new(ROOT).join("test/Foo.t.sol"))
    }

    fn foo_contract() -> NodeKey {
        foo_file().child("FooTest")
    }

    fn foo_case(function: &str) -> NodeKey {
        foo_file().child(format!("FooTest_{function}"))
    }

    async fn run_collecting(
        coordinator: &TestCoordinator,
        request: RunRequest,
    ) -> (RunReport, Vec<RunEvent>) {
        let mut events = Vec::new();
        let report = coordinator
            .run(request, |event| events.push(event))
            .await
            .expect("run is accepted");
        (report, events)
    }

    fn status_of(report: &RunReport, key: &NodeKey) -> Option<OutcomeStatus> {
        report.outcome(key).map(|outcome| outcome.status)
    }

    #[tokio::test]
    async fn contract_run_maps_results_onto_cases() {
        let tool = FakeTool::returning(FOO_RESULTS);
        let coordinator =
            coordinator(&[("test/Foo.t.sol", FOO_SOURCE)], tool.clone(), BusyPolicy::Queue).await;

        let (report, events) = run_collecting(&coordinator, RunRequest::new([foo_contract()])).await;

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(tool.invocations(), vec![RunScope::Contract("FooTest".to_owned())]);
        assert_eq!(status_of(&report, &foo_case("testAdd")), Some(OutcomeStatus::Passed));
        let sub = report.outcome(&foo_case("testSub")).expect("testSub has an outcome");
        assert_eq!(sub.status, OutcomeStatus::Failed);
        assert_eq!(sub.message.as_deref(), Some("assertion failed"));
        assert_eq!(sub.name, "FooTest::testSub");
        assert_eq!(status_of(&report, &foo_contract()), Some(OutcomeStatus::Failed));
        assert_eq!(
            report.counts,
            RunCounts {
                passed: 1,
                failed: 1,
                errored: 0,
                skipped: 0
            }
        );

        assert_eq!(
            events.first(),
            Some(&RunEvent::StateChanged {
                state: RunState::Queued
            })
        );
        assert_eq!(
            events.last(),
            Some(&RunEvent::StateChanged {
                state: RunState::Completed
            })
        );
        let finished = events
            .iter()
            .filter(|event| matches!(event, RunEvent::NodeFinished(_)))
            .count();
        assert_eq!(finished, report.outcomes.len());
        let terminal = events
            .iter()
            .filter(|event| {
                matches!(event, RunEvent::StateChanged { state } if state.is_terminal())
            })
            .count();
        assert_eq!(terminal, 1, "exactly one terminal state is reported");
    }

    #[tokio::test]
    async fn debug_appends_decoded_logs() {
        let coordinator = coordinator(
            &[("test/Foo.t.sol", FOO_SOURCE)],
            FakeTool::returning(FOO_RESULTS),
            BusyPolicy::Queue,
        )
        .await;

        let request = RunRequest::new([foo_case("testSub")]).set_debug(true);
        let (report, _) = run_collecting(&coordinator, request).await;
        let sub = report.outcome(&foo_case("testSub")).expect("testSub has an outcome");
        assert_eq!(sub.message.as_deref(), Some("assertion failed\nsub: 1 != 2"));
    }

    #[tokio::test]
    async fn case_target_runs_single_function() {
        let tool = FakeTool::returning(FOO_RESULTS);
        let coordinator =
            coordinator(&[("test/Foo.t.sol", FOO_SOURCE)], tool.clone(), BusyPolicy::Queue).await;

        let (report, _) = run_collecting(&coordinator, RunRequest::new([foo_case("testAdd")])).await;

        assert_eq!(
            tool.invocations(),
            vec![RunScope::Function {
                contract: "FooTest".to_owned(),
                function: "testAdd".to_owned(),
            }]
        );
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(status_of(&report, &foo_case("testAdd")), Some(OutcomeStatus::Passed));
    }

    #[tokio::test]
    async fn unavailable_tool_errors_without_invoking() {
        let tool = FakeTool::returning(FOO_RESULTS);
        tool.set_available(false);
        let coordinator =
            coordinator(&[("test/Foo.t.sol", FOO_SOURCE)], tool.clone(), BusyPolicy::Queue).await;

        let (report, _) = run_collecting(&coordinator, RunRequest::new([foo_file()])).await;

        assert_eq!(tool.invocations(), Vec::<RunScope>::new());
        assert_eq!(report.status, RunStatus::Completed);
        for key in [foo_contract(), foo_case("testAdd"), foo_case("testSub")] {
            let outcome = report.outcome(&key).expect("every node has an outcome");
            assert_eq!(outcome.status, OutcomeStatus::Errored);
            assert!(
                outcome
                    .message
                    .as_deref()
                    .is_some_and(|message| message.starts_with("tool not found")),
                "unexpected message: {:?}",
                outcome.message
            );
        }
        assert_eq!(report.counts.errored, 2);
    }

    #[tokio::test]
    async fn missing_results_are_errored() {
        let tool = FakeTool::returning("{}");
        let coordinator =
            coordinator(&[("test/Foo.t.sol", FOO_SOURCE)], tool.clone(), BusyPolicy::Queue).await;

        let (report, _) = run_collecting(&coordinator, RunRequest::new([foo_contract()])).await;
        let add = report.outcome(&foo_case("testAdd")).expect("testAdd has an outcome");
        assert_eq!(add.status, OutcomeStatus::Errored);
        assert_eq!(
            add.message.as_deref(),
            Some("no result returned for suite `FooTest`")
        );
        assert_eq!(status_of(&report, &foo_contract()), Some(OutcomeStatus::Errored));

        tool.push_response(FakeResponse::Results(
            indoc! {r#"
                {
                  "test/Foo.t.sol:FooTest": {
                    "test_results": {
                      "testAdd()": { "status": "Success", "reason": null, "decoded_logs": [] }
                    }
                  }
                }
            "#}
            .to_owned(),
        ));
        let (report, _) = run_collecting(&coordinator, RunRequest::new([foo_contract()])).await;
        assert_eq!(status_of(&report, &foo_case("testAdd")), Some(OutcomeStatus::Passed));
        let sub = report.outcome(&foo_case("testSub")).expect("testSub has an outcome");
        assert_eq!(sub.status, OutcomeStatus::Errored);
        assert_eq!(
            sub.message.as_deref(),
            Some("no result returned for test `FooTest::testSub`")
        );
        assert_eq!(status_of(&report, &foo_contract()), Some(OutcomeStatus::Errored));
    }

    #[tokio::test]
    async fn execution_failure_errors_contract_and_continues() {
        let bar_source = indoc! {"
            contract BarTest {
                function testBar() public {}
            }
        "};
        let bar_results = indoc! {r#"
            {
              "test/Bar.t.sol:BarTest": {
                "test_results": {
                  "testBar()": { "status": "Success", "reason": null, "decoded_logs": [] }
                }
              }
            }
        "#};
        let tool = FakeTool::returning(bar_results);
        let coordinator = coordinator(
            &[("test/Bar.t.sol", bar_source), ("test/Foo.t.sol", FOO_SOURCE)],
            tool.clone(),
            BusyPolicy::Queue,
        )
        .await;
        // Targets are dispatched in request order, so FooTest gets the failure.
        tool.push_response(FakeResponse::Fail("Compiler run failed"));

        let bar_file = NodeKey::for_file(&Utf8Path::new(ROOT).join("test/Bar.t.sol"));
        let (report, _) =
            run_collecting(&coordinator, RunRequest::new([foo_file(), bar_file.clone()])).await;

        assert_eq!(
            tool.invocations(),
            vec![
                RunScope::Contract("FooTest".to_owned()),
                RunScope::Contract("BarTest".to_owned()),
            ]
        );
        for key in [foo_contract(), foo_case("testAdd"), foo_case("testSub")] {
            let outcome = report.outcome(&key).expect("every node has an outcome");
            assert_eq!(outcome.status, OutcomeStatus::Errored);
            assert!(
                outcome
                    .message
                    .as_deref()
                    .is_some_and(|message| message.ends_with("Compiler run failed")),
                "unexpected message: {:?}",
                outcome.message
            );
        }
        assert_eq!(
            status_of(&report, &bar_file.child("BarTest_testBar")),
            Some(OutcomeStatus::Passed)
        );
        assert_eq!(report.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_keys_are_errored() {
        let tool = FakeTool::returning(FOO_RESULTS);
        let coordinator =
            coordinator(&[("test/Foo.t.sol", FOO_SOURCE)], tool.clone(), BusyPolicy::Queue).await;
        let missing = foo_file().child("NopeTest");

        let (report, _) = run_collecting(&coordinator, RunRequest::new([missing.clone()])).await;

        let outcome = report.outcome(&missing).expect("unknown key has an outcome");
        assert_eq!(outcome.status, OutcomeStatus::Errored);
        assert_eq!(outcome.kind, None);
        assert_eq!(outcome.message.as_deref(), Some("node not found"));
        assert_eq!(report.counts.total(), 0);
        assert!(tool.invocations().is_empty());
    }

    #[tokio::test]
    async fn cancel_before_start_processes_nothing() {
        let tool = FakeTool::returning(FOO_RESULTS);
        let coordinator =
            coordinator(&[("test/Foo.t.sol", FOO_SOURCE)], tool.clone(), BusyPolicy::Queue).await;
        let token = CancelToken::new();
        token.cancel();

        let request = RunRequest::new([foo_file()]).with_cancel_token(token);
        let (report, events) = run_collecting(&coordinator, request).await;

        assert_eq!(report.status, RunStatus::Cancelled);
        assert!(report.outcomes.is_empty());
        assert!(tool.invocations().is_empty());
        assert_eq!(
            events.last(),
            Some(&RunEvent::StateChanged {
                state: RunState::Cancelled
            })
        );
    }

    #[tokio::test]
    async fn cancel_before_start_skips_target_lookup() {
        let tool = FakeTool::returning(FOO_RESULTS);
        let coordinator =
            coordinator(&[("test/Foo.t.sol", FOO_SOURCE)], tool.clone(), BusyPolicy::Queue).await;
        let token = CancelToken::new();
        token.cancel();

        let request = RunRequest::new([foo_file().child("NopeTest"), foo_contract()])
            .with_cancel_token(token);
        let (report, events) = run_collecting(&coordinator, request).await;

        assert_eq!(report.status, RunStatus::Cancelled);
        assert!(report.outcomes.is_empty(), "got {:?}", report.outcomes);
        assert_eq!(report.counts, RunCounts::default());
        assert!(tool.invocations().is_empty());
        assert_eq!(
            events,
            vec![
                RunEvent::StateChanged {
                    state: RunState::Queued
                },
                RunEvent::StateChanged {
                    state: RunState::Cancelled
                },
            ]
        );
    }

    #[tokio::test]
    async fn cancel_before_start_skips_discovery() {
        let tool = FakeTool::returning(FOO_RESULTS);
        let config = ExplorerConfig::default_config("/nonexistent/forge-explorer-workspace");
        let tree = Arc::new(TestTree::new(
            &config,
            SourcePositionResolver::new(SourceScanService::new()),
        ));
        let coordinator = RunCoordinator::new(tree, TestRunner::new(tool), BusyPolicy::Queue);
        let token = CancelToken::new();
        token.cancel();

        let report = coordinator
            .run(RunRequest::all().with_cancel_token(token), |_| {})
            .await
            .expect("a cancelled run doesn't scan the missing root");
        assert_eq!(report.status, RunStatus::Cancelled);
        assert!(!coordinator.tree().is_root_resolved());
    }

    #[tokio::test]
    async fn cancel_during_run_stops_after_current_dispatch() {
        let source = indoc! {"
            contract FooTest {
                function testAdd() public {}
            }
            contract BazTest {
                function testBaz() public {}
            }
        "};
        let tool = FakeTool::returning(FOO_RESULTS);
        let coordinator =
            coordinator(&[("test/Foo.t.sol", source)], tool.clone(), BusyPolicy::Queue).await;
        let token = CancelToken::new();
        let request = RunRequest::new([foo_file()]).with_cancel_token(token.clone());

        let report = coordinator
            .run(request, move |event| {
                if matches!(event, RunEvent::NodeFinished(_)) {
                    token.cancel();
                }
            })
            .await
            .expect("run is accepted");

        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(tool.invocations(), vec![RunScope::Contract("FooTest".to_owned())]);
        assert_eq!(report.outcome(&foo_file().child("BazTest")), None);
    }

    #[tokio::test]
    async fn excluded_case_splits_contract() {
        let tool = FakeTool::returning(FOO_RESULTS);
        let coordinator =
            coordinator(&[("test/Foo.t.sol", FOO_SOURCE)], tool.clone(), BusyPolicy::Queue).await;

        let request = RunRequest::new([foo_file()]).exclude([foo_case("testSub")]);
        let (report, _) = run_collecting(&coordinator, request).await;

        assert_eq!(
            tool.invocations(),
            vec![RunScope::Function {
                contract: "FooTest".to_owned(),
                function: "testAdd".to_owned(),
            }]
        );
        assert_eq!(status_of(&report, &foo_case("testAdd")), Some(OutcomeStatus::Passed));
        assert_eq!(status_of(&report, &foo_case("testSub")), Some(OutcomeStatus::Skipped));
        assert_eq!(report.counts.skipped, 1);
    }

    #[tokio::test]
    async fn excluded_file_is_skipped_whole() {
        let tool = FakeTool::returning(FOO_RESULTS);
        let coordinator =
            coordinator(&[("test/Foo.t.sol", FOO_SOURCE)], tool.clone(), BusyPolicy::Queue).await;

        let request = RunRequest::new([foo_file()]).exclude([foo_file()]);
        let (report, _) = run_collecting(&coordinator, request).await;

        assert!(tool.invocations().is_empty());
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(status_of(&report, &foo_file()), Some(OutcomeStatus::Skipped));
        assert_eq!(
            report.counts,
            RunCounts {
                passed: 0,
                failed: 0,
                errored: 0,
                skipped: 2
            }
        );
    }

    #[tokio::test]
    async fn excluded_contract_counts_its_cases_once() {
        let tool = FakeTool::returning(FOO_RESULTS);
        let coordinator =
            coordinator(&[("test/Foo.t.sol", FOO_SOURCE)], tool.clone(), BusyPolicy::Queue).await;

        // The case target is covered by the file target, so it isn't dispatched separately.
        let request = RunRequest::new([foo_file(), foo_case("testAdd")]).exclude([foo_contract()]);
        let (report, _) = run_collecting(&coordinator, request).await;

        assert!(tool.invocations().is_empty());
        assert_eq!(status_of(&report, &foo_contract()), Some(OutcomeStatus::Skipped));
        assert_eq!(report.outcome(&foo_case("testAdd")), None);
        assert_eq!(report.counts.skipped, 2);
        assert_eq!(report.counts.total(), 2);
    }

    #[tokio::test]
    async fn document_opened_mid_run_wins_over_slower_disk_resolution() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let path = dir.path().join("test/Foo.t.sol");
        std::fs::create_dir_all(path.parent().expect("path has a parent")).expect("created dirs");
        std::fs::write(&path, "contract OldTest {\n    function testOld() public {}\n}\n")
            .expect("wrote file");

        let service = SourceScanService::new();
        let config = ExplorerConfig::default_config(dir.path());
        let tree = Arc::new(TestTree::new(
            &config,
            SourcePositionResolver::new(service.clone()),
        ));
        tree.discover().await.expect("discovery succeeded");
        let tool = FakeTool::returning(
            r#"{ "test/Foo.t.sol:NewTest": { "test_results": { "testNew()": { "status": "Success", "reason": null } } } }"#,
        );
        let coordinator =
            RunCoordinator::new(tree.clone(), TestRunner::new(tool.clone()), BusyPolicy::Queue);
        let release = service.hold("OldTest");
        let contract_labels = || -> Vec<String> {
            tree.file(&path)
                .expect("file is tracked")
                .children()
                .iter()
                .map(|contract| contract.label().to_owned())
                .collect()
        };

        // The run reads the file from disk and waits on the position service while the editor
        // opens newer contents.
        let run = coordinator.run(RunRequest::all(), |_| {});
        let edit = async {
            while service.calls() == 0 {
                tokio::task::yield_now().await;
            }
            tree.document_opened(
                &path,
                "contract NewTest {\n    function testNew() public {}\n}\n".to_owned(),
            )
            .await
            .expect("buffer resolves");
            let opened = contract_labels();
            release.add_permits(1);
            opened
        };
        let (report, opened) = tokio::join!(run, edit);
        let report = report.expect("run is accepted");

        assert_eq!(opened, ["NewTest"]);
        assert_eq!(contract_labels(), ["NewTest"]);
        assert_eq!(tool.invocations(), vec![RunScope::Contract("NewTest".to_owned())]);
        assert_eq!(
            status_of(&report, &NodeKey::for_file(&path).child("NewTest_testNew")),
            Some(OutcomeStatus::Passed)
        );
        assert_eq!(report.counts.total(), 1);
    }

    #[tokio::test]
    async fn contract_without_tests_is_skipped() {
        let source = indoc! {"
            contract Helper {
                function setUp() public {}
            }
        "};
        let tool = FakeTool::returning("{}");
        let coordinator =
            coordinator(&[("test/Foo.t.sol", source)], tool.clone(), BusyPolicy::Queue).await;

        let (report, _) = run_collecting(&coordinator, RunRequest::new([foo_file()])).await;

        assert!(tool.invocations().is_empty());
        let helper = report
            .outcome(&foo_file().child("Helper"))
            .expect("contract has an outcome");
        assert_eq!(helper.status, OutcomeStatus::Skipped);
        assert_eq!(helper.message.as_deref(), Some("contract declares no tests"));
    }

    #[tokio::test]
    async fn nested_targets_run_once() {
        let tool = FakeTool::returning(FOO_RESULTS);
        let coordinator =
            coordinator(&[("test/Foo.t.sol", FOO_SOURCE)], tool.clone(), BusyPolicy::Queue).await;

        let request = RunRequest::new([
            foo_case("testAdd"),
            foo_file(),
            foo_contract(),
            foo_file(),
        ]);
        let (report, _) = run_collecting(&coordinator, request).await;

        assert_eq!(tool.invocations(), vec![RunScope::Contract("FooTest".to_owned())]);
        assert_eq!(report.counts.total(), 2);
    }

    #[tokio::test]
    async fn reject_policy_refuses_concurrent_runs() {
        let coordinator = coordinator(
            &[("test/Foo.t.sol", FOO_SOURCE)],
            FakeTool::returning(FOO_RESULTS),
            BusyPolicy::Reject,
        )
        .await;

        let guard = coordinator.active.lock().await;
        let result = coordinator.run(RunRequest::new([foo_file()]), |_| {}).await;
        assert!(matches!(result, Err(RunRejected::Busy)), "got {result:?}");
        drop(guard);

        let report = coordinator
            .run(RunRequest::new([foo_file()]), |_| {})
            .await
            .expect("run is accepted once the active run finishes");
        assert_eq!(report.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn queue_policy_waits_for_active_run() {
        let tool = FakeTool::returning(FOO_RESULTS);
        let coordinator =
            coordinator(&[("test/Foo.t.sol", FOO_SOURCE)], tool.clone(), BusyPolicy::Queue).await;

        let guard = coordinator.active.lock().await;
        let events = Mutex::new(Vec::new());
        let waiting = tokio::time::timeout(
            Duration::from_millis(50),
            coordinator.run(RunRequest::new([foo_file()]), |event| {
                events.lock().unwrap().push(event)
            }),
        )
        .await;
        assert!(waiting.is_err(), "queued run waits for the active run");
        assert_eq!(
            *events.lock().unwrap(),
            vec![RunEvent::StateChanged {
                state: RunState::Queued
            }]
        );
        assert!(tool.invocations().is_empty());
        drop(guard);

        let report = coordinator
            .run(RunRequest::new([foo_file()]), |_| {})
            .await
            .expect("run is accepted");
        assert_eq!(report.status, RunStatus::Completed);
    }

    #[derive(Clone, Debug)]
    struct Shape {
        files: Vec<Vec<usize>>,
        picks: Vec<prop::sample::Index>,
    }

    fn shape() -> impl Strategy<Value = Shape> {
        (
            prop::collection::vec(prop::collection::vec(0usize..4, 0..3), 1..4),
            prop::collection::vec(any::<prop::sample::Index>(), 0..6),
        )
            .prop_map(|(files, picks)| Shape { files, picks })
    }

    fn build_sources(shape: &Shape) -> (Vec<(String, String)>, String) {
        let mut sources = Vec::new();
        let mut suites = serde_json::Map::new();
        for (file_index, contracts) in shape.files.iter().enumerate() {
            let path = format!("test/F{file_index}.t.sol");
            let mut source = String::new();
            for (contract_index, case_count) in contracts.iter().enumerate() {
                let contract = format!("C{file_index}x{contract_index}");
                source.push_str(&format!("contract {contract} {{\n"));
                let mut results = serde_json::Map::new();
                for case_index in 0..*case_count {
                    source.push_str(&format!("    function test{case_index}() public {{}}\n"));
                    results.insert(
                        format!("test{case_index}()"),
                        serde_json::json!({ "status": "Success", "reason": null }),
                    );
                }
                source.push_str("}\n");
                suites.insert(
                    format!("{path}:{contract}"),
                    serde_json::json!({ "test_results": results }),
                );
            }
            sources.push((path, source));
        }
        (sources, serde_json::Value::Object(suites).to_string())
    }

    /// Writes `files` under `dir` and returns a coordinator over the discovered, resolved tree.
    async fn disk_coordinator(
        dir: &Utf8TempDir,
        files: &[(String, String)],
        tool: FakeTool,
    ) -> TestCoordinator {
        for (path, source) in files {
            let path = dir.path().join(path);
            std::fs::create_dir_all(path.parent().expect("path has a parent"))
                .expect("created dirs");
            std::fs::write(&path, source).expect("wrote file");
        }
        let config = ExplorerConfig::default_config(dir.path());
        let resolver = SourcePositionResolver::new(SourceScanService::new());
        let tree = Arc::new(TestTree::new(&config, resolver));
        for file in tree.discover().await.expect("discovery succeeded") {
            tree.resolve_file(&file).await.expect("file resolves");
        }
        RunCoordinator::new(tree, TestRunner::new(tool), BusyPolicy::Queue)
    }

    fn reported_cases(report: &RunReport) -> Vec<NodeKey> {
        report
            .outcomes
            .iter()
            .filter(|outcome| outcome.is_case())
            .map(|outcome| outcome.key.clone())
            .collect()
    }

    proptest! {
        #[test]
        fn every_requested_case_is_reported_once(shape in shape()) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime builds");
            let (sources, results) = build_sources(&shape);
            let dir = Utf8TempDir::new().expect("created temp dir");
            runtime.block_on(async {
                let coordinator =
                    disk_coordinator(&dir, &sources, FakeTool::returning(results)).await;

                let mut all_nodes = Vec::new();
                let mut all_cases = Vec::new();
                for file in coordinator.tree().files() {
                    all_nodes.push(file.clone());
                    for contract in file.children().iter() {
                        all_nodes.push(contract.clone());
                        for case in contract.children().iter() {
                            all_nodes.push(case.clone());
                            all_cases.push(case.clone());
                        }
                    }
                }
                prop_assert_eq!(coordinator.tree().files().len(), shape.files.len());
                let targets: Vec<NodeKey> = shape
                    .picks
                    .iter()
                    .map(|index| index.get(&all_nodes).key().clone())
                    .collect();
                let target_set: HashSet<NodeKey> = targets.iter().cloned().collect();
                let expected: HashSet<NodeKey> = all_cases
                    .iter()
                    .filter(|case| target_set.is_empty() || case.has_ancestor_or_self(&target_set))
                    .map(|case| case.key().clone())
                    .collect();

                let report = coordinator
                    .run(RunRequest::new(targets), |_| {})
                    .await
                    .expect("run is accepted");
                prop_assert_eq!(report.status, RunStatus::Completed);
                let reported = reported_cases(&report);
                let unique: HashSet<NodeKey> = reported.iter().cloned().collect();
                prop_assert_eq!(unique.len(), reported.len(), "a case was reported twice");
                prop_assert_eq!(unique, expected.clone());
                prop_assert_eq!(report.counts.passed, expected.len());

                // Running everything reports every case in the workspace, whatever was picked.
                let report = coordinator
                    .run(RunRequest::all(), |_| {})
                    .await
                    .expect("run is accepted");
                prop_assert_eq!(report.status, RunStatus::Completed);
                let reported = reported_cases(&report);
                let unique: HashSet<NodeKey> = reported.iter().cloned().collect();
                let every_case: HashSet<NodeKey> =
                    all_cases.iter().map(|case| case.key().clone()).collect();
                prop_assert_eq!(unique.len(), reported.len(), "a case was reported twice");
                prop_assert_eq!(report.counts.passed, every_case.len());
                prop_assert_eq!(unique, every_case);
                Ok(())
            })?;
        }
    }

    #[tokio::test]
    async fn run_all_covers_discovered_files() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let tool = FakeTool::returning(FOO_RESULTS);
        let coordinator = disk_coordinator(
            &dir,
            &[("test/Foo.t.sol".to_owned(), FOO_SOURCE.to_owned())],
            tool.clone(),
        )
        .await;

        let report = coordinator
            .run(RunRequest::all(), |_| {})
            .await
            .expect("run is accepted");
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(tool.invocations(), vec![RunScope::Contract("FooTest".to_owned())]);
        assert_eq!(report.counts.total(), 2);
    }
}

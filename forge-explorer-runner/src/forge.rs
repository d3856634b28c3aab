// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running tests through `forge test`.
//!
//! [`TestTool`] is the process-level seam: [`ForgeRunner`] implements it by spawning forge, and
//! tests substitute their own implementations. [`TestRunner`] wraps a tool and provides the three
//! entry points used by the coordinator, each of which checks that the tool is available before
//! running anything.

use crate::{
    config::ExplorerConfig,
    errors::{RunnerExecutionError, RunnerUnavailable, TestToolError},
    helpers::last_nonempty_line,
};
use camino::{Utf8Path, Utf8PathBuf};
use forge_explorer_metadata::ForgeTestResults;
use std::{future::Future, process::Stdio};
use tokio::process::Command;
use tracing::debug;

/// Parsed results of one test tool invocation.
pub type RunResult = ForgeTestResults;

/// The set of tests one invocation covers.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum RunScope {
    /// Every test in the workspace.
    All,

    /// Every test in contracts matching this name.
    Contract(String),

    /// Test functions matching `function` in contracts matching `contract`.
    Function {
        /// The contract name.
        contract: String,

        /// The function name.
        function: String,
    },
}

impl RunScope {
    /// Returns the forge filter arguments for this scope.
    ///
    /// Names are passed through unchanged: forge interprets them as regular expressions, so a
    /// contract named `FooTest` also selects `FooTestExtended`. Results are matched back to nodes
    /// by exact name.
    pub fn filter_args(&self) -> Vec<&str> {
        match self {
            Self::All => Vec::new(),
            Self::Contract(contract) => vec!["--match-contract", contract],
            Self::Function { contract, function } => {
                vec!["--match-contract", contract, "--match-test", function]
            }
        }
    }
}

/// Options that apply to every invocation in a run.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RunOptions {
    /// Ask forge for verbose traces so failing tests carry decoded logs.
    pub debug: bool,
}

/// A test tool that can run a [`RunScope`] and report structured results.
pub trait TestTool: Send + Sync {
    /// The program this tool runs, for diagnostics.
    fn program(&self) -> &str;

    /// Returns true if the tool can be executed.
    fn check_tool_available(&self) -> impl Future<Output = bool> + Send;

    /// Runs the tests in `scope` and returns their results.
    ///
    /// Callers should check [`check_tool_available`](Self::check_tool_available) first.
    fn execute(
        &self,
        scope: RunScope,
        options: RunOptions,
    ) -> impl Future<Output = Result<RunResult, RunnerExecutionError>> + Send;
}

/// Runs tests in a Foundry workspace with `forge test --json`.
#[derive(Clone, Debug)]
pub struct ForgeRunner {
    program: String,
    extra_args: Vec<String>,
    cwd: Utf8PathBuf,
}

impl ForgeRunner {
    /// Creates a new runner that invokes `program` in `cwd`.
    pub fn new(program: impl Into<String>, cwd: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
            cwd: cwd.into(),
        }
    }

    /// Creates a new runner from the `[forge]` section of the config.
    pub fn from_config(config: &ExplorerConfig) -> Self {
        Self::new(&config.forge().program, config.workspace_root())
            .with_extra_args(config.forge().extra_args.clone())
    }

    /// Sets extra arguments passed to every `forge test` invocation.
    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    /// Returns the working directory forge is run in.
    pub fn cwd(&self) -> &Utf8Path {
        &self.cwd
    }

    /// Returns the full command line for an invocation, program first.
    pub fn command_line(&self, scope: &RunScope, options: RunOptions) -> Vec<String> {
        let mut command = vec![self.program.clone(), "test".to_owned(), "--json".to_owned()];
        command.extend(self.extra_args.iter().cloned());
        command.extend(scope.filter_args().into_iter().map(str::to_owned));
        if options.debug {
            command.push("-vvv".to_owned());
        }
        command
    }
}

impl TestTool for ForgeRunner {
    fn program(&self) -> &str {
        &self.program
    }

    async fn check_tool_available(&self) -> bool {
        let output = Command::new(&self.program)
            .arg("--version")
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                debug!(
                    version = last_nonempty_line(&stdout).unwrap_or("(no output)"),
                    "found {}", self.program
                );
                true
            }
            Ok(output) => {
                debug!(
                    "`{} --version` exited with {}",
                    self.program, output.status
                );
                false
            }
            Err(error) => {
                debug!("failed to execute `{} --version`: {error}", self.program);
                false
            }
        }
    }

    async fn execute(
        &self,
        scope: RunScope,
        options: RunOptions,
    ) -> Result<RunResult, RunnerExecutionError> {
        let command = self.command_line(&scope, options);
        debug!(command = %shell_words::join(&command), cwd = %self.cwd, "running forge");

        let output = Command::new(&command[0])
            .args(&command[1..])
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;
        let output = match output {
            Ok(output) => output,
            Err(error) => return Err(RunnerExecutionError::Spawn { command, error }),
        };

        interpret_output(
            command,
            output.status,
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        )
    }
}

/// Maps a finished forge process to results.
///
/// A non-zero exit status with parseable results means tests ran and some failed, which is a
/// successful invocation.
fn interpret_output(
    command: Vec<String>,
    exit_status: std::process::ExitStatus,
    stdout: &str,
    stderr: &str,
) -> Result<RunResult, RunnerExecutionError> {
    match parse_results(stdout) {
        Ok(results) => {
            if !exit_status.success() {
                debug!("forge exited with {exit_status}, but reported results");
            }
            Ok(results)
        }
        Err(error) if exit_status.success() => Err(RunnerExecutionError::Parse { command, error }),
        Err(_) => {
            let diagnostics = if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            };
            Err(RunnerExecutionError::Failed {
                command,
                exit_status,
                diagnostics: diagnostics.to_owned(),
            })
        }
    }
}

fn parse_results(stdout: &str) -> Result<RunResult, serde_json::Error> {
    let trimmed = stdout.trim();
    match ForgeTestResults::parse(trimmed) {
        Ok(results) => Ok(results),
        Err(error) => {
            // Some forge versions print compilation progress before the JSON document.
            let last_json_line = trimmed
                .lines()
                .map(str::trim)
                .rfind(|line| line.starts_with('{'));
            match last_json_line {
                Some(line) => ForgeTestResults::parse(line).map_err(|_| error),
                None => Err(error),
            }
        }
    }
}

/// The entry points for running tests, over a single [`TestTool`].
#[derive(Clone, Debug)]
pub struct TestRunner<T> {
    tool: T,
}

impl<T: TestTool> TestRunner<T> {
    /// Creates a new runner over `tool`.
    pub fn new(tool: T) -> Self {
        Self { tool }
    }

    /// Returns the underlying tool.
    pub fn tool(&self) -> &T {
        &self.tool
    }

    /// Runs every test in the workspace.
    pub async fn run_all(&self, options: RunOptions) -> Result<RunResult, TestToolError> {
        self.run(RunScope::All, options).await
    }

    /// Runs every test in `contract`.
    pub async fn run_contract(
        &self,
        contract: &str,
        options: RunOptions,
    ) -> Result<RunResult, TestToolError> {
        self.run(RunScope::Contract(contract.to_owned()), options)
            .await
    }

    /// Runs the test `function` in `contract`.
    pub async fn run_function(
        &self,
        contract: &str,
        function: &str,
        options: RunOptions,
    ) -> Result<RunResult, TestToolError> {
        let scope = RunScope::Function {
            contract: contract.to_owned(),
            function: function.to_owned(),
        };
        self.run(scope, options).await
    }

    /// Runs `scope`, failing with [`RunnerUnavailable`] if the tool can't be executed.
    pub async fn run(&self, scope: RunScope, options: RunOptions) -> Result<RunResult, TestToolError> {
        if !self.tool.check_tool_available().await {
            return Err(RunnerUnavailable::new(self.tool.program()).into());
        }
        Ok(self.tool.execute(scope, options).await?)
    }
}

// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by forge-explorer.

use crate::tree::NodeKey;
use camino::{Utf8Path, Utf8PathBuf};
use config::ConfigError;
use forge_explorer_metadata::NodeKind;
use std::{io, path::PathBuf, process::ExitStatus, time::Duration};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse forge-explorer config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8Path {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
///
/// Returned by [`ConfigParseError::kind`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// The test file suffix was empty, which would match every file.
    #[error("discovery.test-file-suffix must not be empty")]
    EmptyTestFileSuffix,

    /// The position service command was empty.
    #[error("positions.command must name the program to run")]
    EmptyPositionsCommand,
}

/// The position service could not provide test positions.
///
/// Resolution degrades to "zero tests found" on this error; it is never fatal to a run.
#[derive(Debug, Error)]
pub enum ResolverUnavailable {
    /// The position service process could not be started.
    #[error("failed to start position service `{}`", shell_words::join(.command))]
    Spawn {
        /// The command that was run.
        command: Vec<String>,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The position service closed its connection.
    #[error("position service exited")]
    Closed,

    /// The position service did not answer in time.
    #[error("position service did not respond within {timeout:?}")]
    Timeout {
        /// The configured request timeout.
        timeout: Duration,
    },

    /// The position service answered with a JSON-RPC error.
    #[error("position service returned error {code}: {message}")]
    Server {
        /// The JSON-RPC error code.
        code: i64,

        /// The error message.
        message: String,
    },

    /// The connection to the position service failed in some other way.
    #[error("position service connection error: {message}")]
    Protocol {
        /// A description of what was wrong.
        message: String,
    },

    /// A response from the position service could not be deserialized.
    #[error("position service returned malformed data")]
    Malformed(#[source] serde_json::Error),
}

/// The external test tool is not installed or can't be executed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error(
    "tool not found: `{program}` could not be executed\n\
     (hint: install Foundry and ensure `{program}` is on PATH)"
)]
pub struct RunnerUnavailable {
    program: String,
}

impl RunnerUnavailable {
    pub(crate) fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Returns the program that could not be executed.
    pub fn program(&self) -> &str {
        &self.program
    }
}

/// The external test tool ran, but did not produce usable results.
#[derive(Debug, Error)]
pub enum RunnerExecutionError {
    /// The test process could not be spawned or waited on.
    #[error("failed to execute `{}`", shell_words::join(.command))]
    Spawn {
        /// The command that was run.
        command: Vec<String>,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The test process exited unsuccessfully without printing results.
    #[error(
        "`{}` failed with {exit_status} and produced no test results:\n{diagnostics}",
        shell_words::join(.command)
    )]
    Failed {
        /// The command that was run.
        command: Vec<String>,

        /// The exit status of the process.
        exit_status: ExitStatus,

        /// Standard error of the process, or standard output if standard error was empty.
        diagnostics: String,
    },

    /// The test process exited successfully, but its output could not be parsed.
    #[error("`{}` produced output that could not be parsed", shell_words::join(.command))]
    Parse {
        /// The command that was run.
        command: Vec<String>,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },
}

/// An error returned by a [`TestTool`](crate::forge::TestTool).
#[derive(Debug, Error)]
pub enum TestToolError {
    /// The tool is not available.
    #[error(transparent)]
    Unavailable(#[from] RunnerUnavailable),

    /// The tool ran but its output could not be used.
    #[error(transparent)]
    Execution(#[from] RunnerExecutionError),
}

/// A run result did not contain an entry for a node that was run.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ResultMismatch {
    /// No suite matched the contract name.
    #[error("no result returned for suite `{contract}`")]
    MissingSuite {
        /// The contract label.
        contract: String,
    },

    /// The suite was present, but no test matched the function name.
    #[error("no result returned for test `{contract}::{function}`")]
    MissingTest {
        /// The contract label.
        contract: String,

        /// The function label.
        function: String,
    },
}

/// An error that occurred while resolving a node's children.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No node exists for this key.
    #[error("node `{key}` not found")]
    NodeNotFound {
        /// The key that was looked up.
        key: NodeKey,
    },

    /// The node is not a file, so it has no children to discover.
    #[error("node `{key}` is a {kind} and cannot be resolved")]
    NotResolvable {
        /// The key that was looked up.
        key: NodeKey,

        /// The kind of node.
        kind: NodeKind,
    },

    /// The file's contents could not be read.
    #[error("failed to read `{path}`")]
    ReadFile {
        /// The path that was read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// Workspace discovery failed while resolving the root.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// An error that occurred while scanning the workspace for test files.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The workspace root could not be read.
    #[error("failed to read workspace root `{root}`")]
    ReadRoot {
        /// The workspace root.
        root: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The workspace root is not a directory.
    #[error("workspace root `{root}` is not a directory")]
    RootNotDir {
        /// The workspace root.
        root: Utf8PathBuf,
    },

    /// The background scan was cancelled before it finished, usually because the runtime is
    /// shutting down.
    #[error("scan of workspace root `{root}` was interrupted")]
    Interrupted {
        /// The workspace root.
        root: Utf8PathBuf,
    },
}

/// An error that occurred while starting to watch the workspace for changes.
#[derive(Debug, Error)]
#[error("failed to watch `{root}` for changes")]
pub struct WatchError {
    root: Utf8PathBuf,
    #[source]
    error: notify::Error,
}

impl WatchError {
    pub(crate) fn new(root: impl Into<Utf8PathBuf>, error: notify::Error) -> Self {
        Self {
            root: root.into(),
            error,
        }
    }
}

/// A run request was rejected as a whole.
#[derive(Debug, Error)]
pub enum RunRejected {
    /// Another run is in progress and the busy policy is to reject new runs.
    #[error("another run is already in progress")]
    Busy,

    /// The workspace could not be scanned for tests.
    #[error("failed to discover tests for the run")]
    Discovery(#[source] DiscoveryError),
}

/// An error that occurred while parsing a [`NodeKey`] from a string.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid node key `{input}`: {reason}")]
pub struct NodeKeyParseError {
    input: String,
    reason: &'static str,
}

impl NodeKeyParseError {
    pub(crate) fn new(input: impl Into<String>, reason: &'static str) -> Self {
        Self {
            input: input.into(),
            reason,
        }
    }
}

/// A path used to build a node was not valid UTF-8.
#[derive(Debug, Error)]
#[error("path `{}` is not valid UTF-8", .path.display())]
pub struct NonUtf8PathError {
    path: PathBuf,
}

impl NonUtf8PathError {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// An error occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] io::Error);

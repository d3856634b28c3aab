// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use forge_explorer_metadata::ExplorerExitCode;
use forge_explorer_runner::errors::*;
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders: errors are meant to be printed with
// display_to_stderr, which colorizes them and prints their sources.

/// An error that forge-explorer expects and reports with a documented exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("workspace root is not valid UTF-8")]
    WorkspaceRootInvalidUtf8 {
        #[source]
        err: camino::FromPathBufError,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("failed to create the async runtime")]
    RuntimeCreateError {
        #[source]
        err: std::io::Error,
    },
    #[error("error setting up signal handler")]
    SignalHandlerSetupError {
        #[from]
        err: SignalHandlerSetupError,
    },
    #[error("failed to discover tests")]
    DiscoveryError {
        #[from]
        err: DiscoveryError,
    },
    #[error("invalid test filter")]
    InvalidFilter {
        input: String,
        #[source]
        err: NodeKeyParseError,
    },
    #[error("no tests matched the given filters")]
    NoMatchingTests { filters: Vec<String> },
    #[error("no tests to run")]
    NoTestsRun,
    #[error("run rejected")]
    RunRejected {
        #[from]
        err: RunRejected,
    },
    #[error("watching is unavailable")]
    WatchUnavailable { workspace_root: Utf8PathBuf },
    #[error("run cancelled")]
    RunCancelled,
    #[error("test run failed")]
    TestRunFailed,
    #[error("error writing output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
    #[error("error serializing output")]
    SerializeError {
        #[source]
        err: serde_json::Error,
    },
}

impl ExpectedError {
    pub(crate) fn write_output(err: std::io::Error) -> Self {
        Self::WriteOutputError { err }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::WorkspaceRootInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::RuntimeCreateError { .. }
            | Self::SignalHandlerSetupError { .. }
            | Self::DiscoveryError { .. }
            | Self::InvalidFilter { .. }
            | Self::WatchUnavailable { .. } => ExplorerExitCode::SETUP_ERROR,
            Self::NoMatchingTests { .. } | Self::NoTestsRun => ExplorerExitCode::NO_TESTS_RUN,
            Self::RunRejected { .. } => ExplorerExitCode::RUN_REJECTED,
            Self::RunCancelled => ExplorerExitCode::RUN_CANCELLED,
            Self::TestRunFailed => ExplorerExitCode::TEST_RUN_FAILED,
            Self::WriteOutputError { .. } | Self::SerializeError { .. } => {
                ExplorerExitCode::WRITE_OUTPUT_ERROR
            }
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::CurrentDirFailed { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::WorkspaceRootInvalidUtf8 { err } => {
                error!(
                    "workspace root `{}` is not valid UTF-8",
                    err.as_path().display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::RuntimeCreateError { err } => {
                error!("failed to create the async runtime");
                Some(err as &dyn Error)
            }
            Self::SignalHandlerSetupError { err } => {
                error!("error setting up signal handler");
                Some(err as &dyn Error)
            }
            Self::DiscoveryError { err } => {
                error!("{err}");
                err.source()
            }
            Self::InvalidFilter { input, err } => {
                error!("invalid test filter `{}`", input.style(styles.bold));
                Some(err as &dyn Error)
            }
            Self::NoMatchingTests { filters } => {
                error!(
                    "no tests matched {}",
                    filters
                        .iter()
                        .map(|filter| format!("`{}`", filter.style(styles.bold)))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                None
            }
            Self::NoTestsRun => {
                error!("no tests to run");
                None
            }
            Self::RunRejected { err } => {
                error!("{err}");
                err.source()
            }
            Self::WatchUnavailable { workspace_root } => {
                error!(
                    "could not watch `{}` for changes (see warnings above)",
                    workspace_root.style(styles.bold)
                );
                None
            }
            Self::RunCancelled => {
                error!(
                    "{}",
                    "run cancelled before every test finished".style(styles.warning_text)
                );
                None
            }
            Self::TestRunFailed => {
                error!("test run failed");
                None
            }
            Self::WriteOutputError { err } => {
                error!("error writing output");
                Some(err as &dyn Error)
            }
            Self::SerializeError { err } => {
                error!("error serializing output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

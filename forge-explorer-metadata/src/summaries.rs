// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use lsp_types::Range;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a node in the test tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// A test source file.
    File,

    /// A test contract within a file.
    Contract,

    /// A test function within a contract.
    Case,
}

impl NodeKind {
    /// Returns a lowercase string for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Contract => "contract",
            Self::Case => "case",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The final status of a node within a run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    /// The test (or every test in the contract) passed.
    Passed,

    /// The test (or some test in the contract) failed.
    Failed,

    /// The node could not be run, or no result was returned for it.
    Errored,

    /// The node was excluded from the run, or removed while the run was in progress.
    Skipped,
}

impl OutcomeStatus {
    /// Returns a lowercase string for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The terminal status of a run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// Every queued node was processed.
    Completed,

    /// The run was cancelled before every queued node was processed.
    Cancelled,
}

/// Counts of case outcomes in a run.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunCountsSummary {
    /// Number of passed test cases.
    pub passed: usize,

    /// Number of failed test cases.
    pub failed: usize,

    /// Number of errored test cases.
    pub errored: usize,

    /// Number of skipped test cases.
    pub skipped: usize,
}

/// A machine-readable run report, as printed by `forge-explorer run --message-format json`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunReportSummary {
    /// The terminal status of the run.
    pub status: RunStatus,

    /// The start time of the run, in RFC 3339 format.
    pub start_time: String,

    /// Total wall-clock duration, in milliseconds.
    pub duration_ms: u128,

    /// Outcome counts over test cases.
    pub counts: RunCountsSummary,

    /// Every outcome, in the order they were produced.
    pub outcomes: Vec<OutcomeSummary>,
}

/// The outcome of one node.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    /// The node key, `<file-uri>#<local-id>`.
    pub key: String,

    /// The kind of node, absent if the key did not name a node in the tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,

    /// The node's status.
    pub status: OutcomeStatus,

    /// How long the node took, in milliseconds.
    pub duration_ms: u128,

    /// A failure or error message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A machine-readable view of the test tree, as printed by `forge-explorer list --message-format
/// json`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestTreeSummary {
    /// Every known test file.
    pub files: Vec<TestFileSummary>,
}

/// A test file in a [`TestTreeSummary`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestFileSummary {
    /// The file id (a `file://` URI).
    pub id: String,

    /// The file name.
    pub label: String,

    /// Whether the file's contents have been analyzed.
    pub resolved: bool,

    /// Contracts in the file. Empty if the file is unresolved.
    pub contracts: Vec<TestContractSummary>,
}

/// A test contract in a [`TestTreeSummary`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestContractSummary {
    /// The contract id.
    pub id: String,

    /// The contract name.
    pub label: String,

    /// The 0-indexed range of the contract name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,

    /// Test cases in the contract.
    pub cases: Vec<TestCaseSummary>,
}

/// A test case in a [`TestTreeSummary`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestCaseSummary {
    /// The case id, `<contract>_<function>`.
    pub id: String,

    /// The function name.
    pub label: String,

    /// The 0-indexed range of the function name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

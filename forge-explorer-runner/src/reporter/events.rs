// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events and results produced by a run.

use crate::tree::NodeKey;
use chrono::{DateTime, Local};
use forge_explorer_metadata::{
    NodeKind, OutcomeStatus, OutcomeSummary, RunCountsSummary, RunReportSummary, RunStatus,
};
use std::time::Duration;

/// The lifecycle state of a run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RunState {
    /// The run was accepted and is waiting for the active run, if any, to finish.
    Queued,

    /// The run is processing nodes.
    Running,

    /// Every queued node was processed.
    Completed,

    /// The run stopped early because it was cancelled.
    Cancelled,
}

impl RunState {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// A progress event, passed to the callback given to
/// [`RunCoordinator::run`](crate::coordinator::RunCoordinator::run).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RunEvent {
    /// The run moved to a new state.
    StateChanged {
        /// The new state.
        state: RunState,
    },

    /// The test tool is about to be invoked for a node.
    NodeStarted {
        /// The node's key.
        key: NodeKey,

        /// The node's kind.
        kind: NodeKind,

        /// The node's display name.
        name: String,
    },

    /// A node's outcome is known.
    NodeFinished(RunOutcome),
}

/// The outcome of one node within a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunOutcome {
    /// The node's key.
    pub key: NodeKey,

    /// The node's kind, or `None` if the key didn't name a node.
    pub kind: Option<NodeKind>,

    /// The display name: a workspace-relative path, a contract name, or `Contract::function`.
    pub name: String,

    /// The node's status.
    pub status: OutcomeStatus,

    /// How long the node took, as reported by forge if available.
    pub duration: Duration,

    /// The failure reason or error message, if any.
    pub message: Option<String>,
}

impl RunOutcome {
    /// Returns true if this is the outcome of a test case.
    pub fn is_case(&self) -> bool {
        self.kind == Some(NodeKind::Case)
    }

    /// Returns a machine-readable summary of this outcome.
    pub fn to_summary(&self) -> OutcomeSummary {
        OutcomeSummary {
            key: self.key.to_string(),
            kind: self.kind,
            status: self.status,
            duration_ms: self.duration.as_millis(),
            message: self.message.clone(),
        }
    }
}

/// Outcome counts over test cases.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RunCounts {
    /// Number of passed test cases.
    pub passed: usize,

    /// Number of failed test cases.
    pub failed: usize,

    /// Number of errored test cases.
    pub errored: usize,

    /// Number of skipped test cases, including the cases of skipped files and contracts.
    pub skipped: usize,
}

impl RunCounts {
    pub(crate) fn record(&mut self, status: OutcomeStatus) {
        match status {
            OutcomeStatus::Passed => self.passed += 1,
            OutcomeStatus::Failed => self.failed += 1,
            OutcomeStatus::Errored => self.errored += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
        }
    }

    /// Returns the number of test cases that were run, including those that errored.
    pub fn run_count(&self) -> usize {
        self.passed + self.failed + self.errored
    }

    /// Returns the total number of test cases.
    pub fn total(&self) -> usize {
        self.run_count() + self.skipped
    }

    /// Returns true if any test case failed or errored.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.errored > 0
    }
}

/// The final report of a run.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// The terminal status.
    pub status: RunStatus,

    /// When the run started.
    pub start_time: DateTime<Local>,

    /// Total wall-clock duration.
    pub duration: Duration,

    /// Counts over test case outcomes.
    pub counts: RunCounts,

    /// Every outcome, in the order they were produced.
    pub outcomes: Vec<RunOutcome>,
}

impl RunReport {
    /// Returns the outcome for this key, if one was produced.
    pub fn outcome(&self, key: &NodeKey) -> Option<&RunOutcome> {
        self.outcomes.iter().find(|outcome| &outcome.key == key)
    }

    /// Returns true if any node, including non-case nodes, failed or errored.
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|outcome| {
            matches!(
                outcome.status,
                OutcomeStatus::Failed | OutcomeStatus::Errored
            )
        })
    }

    /// Returns a machine-readable summary of this report.
    pub fn to_summary(&self) -> RunReportSummary {
        RunReportSummary {
            status: self.status,
            start_time: self.start_time.to_rfc3339(),
            duration_ms: self.duration.as_millis(),
            counts: RunCountsSummary {
                passed: self.counts.passed,
                failed: self.counts.failed,
                errored: self.counts.errored,
                skipped: self.counts.skipped,
            },
            outcomes: self.outcomes.iter().map(RunOutcome::to_summary).collect(),
        }
    }
}

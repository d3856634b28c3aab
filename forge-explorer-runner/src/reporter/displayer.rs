// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human-readable output for runs and test trees.

use super::{RunEvent, RunOutcome, RunReport, RunState};
use crate::{
    helpers::{format_duration, plural},
    tree::TestNode,
};
use camino::Utf8Path;
use forge_explorer_metadata::{NodeKind, OutcomeStatus, RunStatus};
use owo_colors::{OwoColorize, Style};
use std::{
    io::{self, Write},
    sync::Arc,
    time::Duration,
};
use swrite::{SWrite, swrite};

/// Writes run progress and summaries for humans.
#[derive(Clone, Debug, Default)]
pub struct RunDisplayer {
    styles: Styles,
}

impl RunDisplayer {
    /// Creates a new displayer without colors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables colored output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Writes a progress event.
    pub fn write_event(&self, event: &RunEvent, writer: &mut dyn Write) -> io::Result<()> {
        match event {
            RunEvent::StateChanged {
                state: RunState::Running,
            } => writeln!(writer, "{:>12} run", "Starting".style(self.styles.pass)),
            RunEvent::StateChanged {
                state: RunState::Cancelled,
            } => writeln!(
                writer,
                "{:>12} run: waiting for the current invocation to finish",
                "Cancelling".style(self.styles.fail)
            ),
            RunEvent::StateChanged { .. } => Ok(()),
            // Start lines would double the output for no information.
            RunEvent::NodeStarted { .. } => Ok(()),
            RunEvent::NodeFinished(outcome) => {
                if is_displayed(outcome) {
                    self.write_outcome(outcome, true, writer)?;
                }
                Ok(())
            }
        }
    }

    /// Writes the final summary of a run, followed by every failed or errored test.
    pub fn write_summary(&self, report: &RunReport, writer: &mut dyn Write) -> io::Result<()> {
        let summary_style = if report.status == RunStatus::Cancelled || report.has_failures() {
            self.styles.fail
        } else if report.counts.total() == 0 {
            self.styles.skip
        } else {
            self.styles.pass
        };
        write!(
            writer,
            "------------\n{:>12} ",
            "Summary".style(summary_style)
        )?;
        self.write_duration(report.duration, writer)?;

        let run_count = report.counts.run_count();
        write!(
            writer,
            "{} {} run: ",
            run_count.style(self.styles.count),
            plural::tests_str(run_count)
        )?;
        writeln!(writer, "{}", self.counts_str(report))?;

        for outcome in &report.outcomes {
            if is_displayed(outcome)
                && matches!(
                    outcome.status,
                    OutcomeStatus::Failed | OutcomeStatus::Errored
                )
            {
                self.write_outcome(outcome, false, writer)?;
            }
        }

        if report.status == RunStatus::Cancelled {
            writeln!(
                writer,
                "{}: run cancelled after {}",
                "warning".style(self.styles.skip),
                format_duration(report.duration)
            )?;
        }
        Ok(())
    }

    fn counts_str(&self, report: &RunReport) -> String {
        let counts = &report.counts;
        let mut out = String::new();
        swrite!(out, "{} passed", counts.passed.style(self.styles.count));
        for (count, label, style) in [
            (counts.failed, "failed", self.styles.fail),
            (counts.errored, "errored", self.styles.fail),
            (counts.skipped, "skipped", self.styles.skip),
        ] {
            if count > 0 {
                swrite!(out, ", {} {label}", count.style(style));
            }
        }
        out
    }

    fn write_outcome(
        &self,
        outcome: &RunOutcome,
        with_message: bool,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        let (status, style) = match outcome.status {
            OutcomeStatus::Passed => ("PASS", self.styles.pass),
            OutcomeStatus::Failed => ("FAIL", self.styles.fail),
            OutcomeStatus::Errored => ("ERROR", self.styles.fail),
            OutcomeStatus::Skipped => ("SKIP", self.styles.skip),
        };
        write!(writer, "{:>12} ", status.style(style))?;
        if outcome.status == OutcomeStatus::Skipped {
            // same spacing [   0.034s]
            write!(writer, "[         ] ")?;
        } else {
            self.write_duration(outcome.duration, writer)?;
        }
        writeln!(writer, "{}", outcome.name.style(self.styles.name))?;

        if with_message && let Some(message) = &outcome.message {
            for line in message.lines() {
                writeln!(writer, "{:>12} {line}", "")?;
            }
        }
        Ok(())
    }

    fn write_duration(&self, duration: Duration, writer: &mut dyn Write) -> io::Result<()> {
        // * > means right-align.
        // * 8 is the number of characters to pad to.
        // * .3 means print three digits after the decimal point.
        write!(writer, "[{:>8.3?}s] ", duration.as_secs_f64())
    }
}

/// Case outcomes are always shown. Contract outcomes repeat what their cases say, except when a
/// contract was skipped as a whole.
fn is_displayed(outcome: &RunOutcome) -> bool {
    match outcome.kind {
        Some(NodeKind::Case) => true,
        Some(NodeKind::Contract) => outcome.status == OutcomeStatus::Skipped,
        Some(NodeKind::File) | None => outcome.status != OutcomeStatus::Passed,
    }
}

/// Writes the test tree for humans.
#[derive(Clone, Debug, Default)]
pub struct TreeDisplayer {
    styles: Styles,
}

impl TreeDisplayer {
    /// Creates a new displayer without colors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables colored output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Writes every file, contract and case. Paths are shown relative to `root`.
    pub fn write_tree(
        &self,
        files: &[Arc<TestNode>],
        root: &Utf8Path,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        for file in files {
            let path = file.path().strip_prefix(root).unwrap_or(file.path());
            write!(writer, "{}:", path.style(self.styles.file))?;
            if !file.is_resolved() {
                write!(writer, " {}", "(not resolved)".style(self.styles.skip))?;
            }
            writeln!(writer)?;

            for contract in file.children().iter() {
                write!(writer, "    {}", contract.label().style(self.styles.contract))?;
                if let Some(range) = contract.range() {
                    write!(writer, " {}", format!("({range})").style(self.styles.range))?;
                }
                writeln!(writer)?;
                for case in contract.children().iter() {
                    writeln!(writer, "        {}", case.label().style(self.styles.name))?;
                }
            }
        }

        let contract_count: usize = files.iter().map(|file| file.children().len()).sum();
        let case_count: usize = files
            .iter()
            .flat_map(|file| file.children().iter().cloned().collect::<Vec<_>>())
            .map(|contract| contract.children().len())
            .sum();
        writeln!(
            writer,
            "{} {}, {} {}, {} {}",
            files.len().style(self.styles.count),
            plural::files_str(files.len()),
            contract_count.style(self.styles.count),
            plural::contracts_str(contract_count),
            case_count.style(self.styles.count),
            plural::tests_str(case_count),
        )
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    skip: Style,
    name: Style,
    file: Style,
    contract: Style,
    range: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.name = Style::new().bold();
        self.file = Style::new().bold();
        self.contract = Style::new().blue().bold();
        self.range = Style::new().dimmed();
    }
}

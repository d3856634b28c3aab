// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::ResolverUnavailable;
use forge_explorer_metadata::{
    ContractPositionSummary, TestPositionSummary, TestsPositionsParams, TestsPositionsResponse,
};
use std::{fmt, future::Future};
use tracing::{debug, warn};

/// A service that reports where the contracts and tests in a Solidity file are.
///
/// Requests are keyed only by file content, so identical content always yields identical
/// positions.
pub trait PositionService: Send + Sync {
    /// Returns the positions of the contracts and tests within `params.file_content`.
    ///
    /// Lines in the returned ranges are 1-indexed.
    fn get_tests_positions(
        &self,
        params: TestsPositionsParams,
    ) -> impl Future<Output = Result<TestsPositionsResponse, ResolverUnavailable>> + Send;
}

/// A 0-indexed position within a source file.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SourcePosition {
    /// The 0-indexed line.
    pub line: u32,

    /// The character offset within the line.
    pub character: u32,
}

impl SourcePosition {
    /// Creates a new position.
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// A 0-indexed range within a source file.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct SourceRange {
    /// The start of the range.
    pub start: SourcePosition,

    /// The end of the range.
    pub end: SourcePosition,
}

impl SourceRange {
    /// Creates a new range.
    pub fn new(start: SourcePosition, end: SourcePosition) -> Self {
        Self { start, end }
    }

    /// Converts a range as sent by the position service, whose lines are 1-indexed.
    ///
    /// Characters are kept as-is. A line of 0 on the wire is out of range and saturates to 0.
    pub fn from_wire(range: &lsp_types::Range) -> Self {
        let convert = |position: lsp_types::Position| {
            SourcePosition::new(position.line.saturating_sub(1), position.character)
        };
        Self {
            start: convert(range.start),
            end: convert(range.end),
        }
    }

    /// Converts this range into an LSP range (0-indexed lines, as LSP clients expect).
    pub fn to_lsp(self) -> lsp_types::Range {
        let convert =
            |position: SourcePosition| lsp_types::Position::new(position.line, position.character);
        lsp_types::Range::new(convert(self.start), convert(self.end))
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Editors display 1-indexed lines and columns.
        write!(
            f,
            "{}:{}-{}:{}",
            self.start.line + 1,
            self.start.character + 1,
            self.end.line + 1,
            self.end.character + 1,
        )
    }
}

/// The position of a contract and its tests.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContractPosition {
    /// The contract name.
    pub name: String,

    /// The range of the contract name.
    pub range: SourceRange,

    /// Tests within the contract, in source order.
    pub tests: Vec<TestPosition>,
}

impl ContractPosition {
    fn from_summary(summary: ContractPositionSummary) -> Self {
        Self {
            name: summary.name,
            range: SourceRange::from_wire(&summary.range),
            tests: summary
                .tests
                .into_iter()
                .map(TestPosition::from_summary)
                .collect(),
        }
    }
}

/// The position of a test function.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestPosition {
    /// The function name.
    pub name: String,

    /// The range of the function name.
    pub range: SourceRange,
}

impl TestPosition {
    fn from_summary(summary: TestPositionSummary) -> Self {
        Self {
            name: summary.name,
            range: SourceRange::from_wire(&summary.range),
        }
    }
}

/// Resolves contract and test positions through a [`PositionService`].
#[derive(Debug)]
pub struct SourcePositionResolver<S> {
    service: S,
}

impl<S: PositionService> SourcePositionResolver<S> {
    /// Creates a new resolver backed by `service`.
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Returns the underlying service.
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Returns the positions of every contract and test in `file_content`.
    ///
    /// If the service fails, a warning is logged and an empty list is returned: the file is then
    /// treated as having no tests.
    pub async fn resolve_positions(&self, file_content: &str) -> Vec<ContractPosition> {
        match self.try_resolve_positions(file_content).await {
            Ok(positions) => positions,
            Err(error) => {
                warn!("failed to resolve test positions ({error}), treating file as having no tests");
                Vec::new()
            }
        }
    }

    /// Returns the positions of every contract and test in `file_content`, or the reason the
    /// service could not provide them.
    pub async fn try_resolve_positions(
        &self,
        file_content: &str,
    ) -> Result<Vec<ContractPosition>, ResolverUnavailable> {
        let response = self
            .service
            .get_tests_positions(TestsPositionsParams {
                file_content: file_content.to_owned(),
            })
            .await?;

        let positions: Vec<_> = response
            .contracts
            .into_iter()
            .map(ContractPosition::from_summary)
            .collect();
        debug!(
            contracts = positions.len(),
            tests = positions.iter().map(|c| c.tests.len()).sum::<usize>(),
            "resolved test positions"
        );
        Ok(positions)
    }
}

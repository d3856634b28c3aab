// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use lsp_types::{Range, request::Request};
use serde::{Deserialize, Serialize};

/// Parameters for the `osmium/getTestsPositions` request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestsPositionsParams {
    /// The full text of the Solidity source file to analyze.
    pub file_content: String,
}

/// Response to the `osmium/getTestsPositions` request.
///
/// Line numbers in every range are 1-indexed. Characters are 0-indexed.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestsPositionsResponse {
    /// Contracts found in the file, in source order.
    pub contracts: Vec<ContractPositionSummary>,
}

/// The location of a contract and the test functions it declares.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContractPositionSummary {
    /// The contract name as written in the source.
    pub name: String,

    /// The range of the contract name.
    pub range: Range,

    /// Test functions declared in this contract.
    #[serde(default)]
    pub tests: Vec<TestPositionSummary>,
}

/// The location of a single test function.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestPositionSummary {
    /// The function name.
    pub name: String,

    /// The range of the function name.
    pub range: Range,
}

/// Marker type for the `osmium/getTestsPositions` custom request.
#[derive(Debug)]
pub enum GetTestsPositions {}

impl Request for GetTestsPositions {
    type Params = TestsPositionsParams;
    type Result = TestsPositionsResponse;
    const METHOD: &'static str = "osmium/getTestsPositions";
}

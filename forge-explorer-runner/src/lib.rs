// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for forge-explorer: discovering Foundry tests, keeping a live tree of them,
//! and running subsets of that tree through `forge test`.
//!
//! The basic flow of operations is:
//!
//! 1. An [`Explorer`](explorer::Explorer) is built from an
//!    [`ExplorerConfig`](config::ExplorerConfig), a [`PositionService`](positions::PositionService)
//!    and a [`TestTool`](forge::TestTool).
//! 2. [`Explorer::discover_root`](explorer::Explorer::discover_root) scans the workspace for test
//!    files and creates one unresolved file node per file in the [`TestTree`](tree::TestTree).
//! 3. Resolving a file node asks the position service where contracts and test functions are, and
//!    replaces the node's children.
//! 4. A [`RunRequest`](coordinator::RunRequest) is handed to the
//!    [`RunCoordinator`](coordinator::RunCoordinator), which invokes the test tool once per
//!    contract or test function and maps the results back onto nodes.

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod explorer;
pub mod forge;
mod helpers;
pub mod positions;
pub mod reporter;
pub mod signal;
mod stopwatch;
pub mod tree;

#[cfg(test)]
mod test_helpers;

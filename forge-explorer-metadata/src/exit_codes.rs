// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `forge-explorer` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum ExplorerExitCode {}

impl ExplorerExitCode {
    /// No errors occurred and forge-explorer exited normally.
    pub const OK: i32 = 0;

    /// No tests were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// A user issue happened while setting up a forge-explorer invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// The run was cancelled before every requested test was processed.
    pub const RUN_CANCELLED: i32 = 97;

    /// The run was rejected as a whole, for example because workspace discovery failed.
    pub const RUN_REJECTED: i32 = 98;

    /// One or more tests failed or errored.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}

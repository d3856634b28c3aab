// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to the formats forge-explorer reads and writes.
//!
//! This crate holds:
//!
//! * the request and response shapes of the test-positions analysis service,
//! * the JSON emitted by `forge test --json`,
//! * the machine-readable summaries produced by `forge-explorer list` and `forge-explorer run`,
//! * documented exit codes for the `forge-explorer` binary.

mod exit_codes;
mod forge_output;
mod positions;
mod summaries;

pub use exit_codes::*;
pub use forge_output::*;
pub use positions::*;
pub use summaries::*;

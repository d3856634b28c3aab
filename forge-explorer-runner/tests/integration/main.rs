// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests that run forge-explorer against real processes and directories.
//!
//! `forge` is replaced by a shell script that replays canned JSON, so these tests only run on
//! Unix.

#![cfg(unix)]

mod explorer;
mod fixtures;
mod forge_runner;

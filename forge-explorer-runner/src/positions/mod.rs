// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Locating contracts and test functions within a source file.
//!
//! The main type here is [`SourcePositionResolver`], which asks a [`PositionService`] where the
//! contracts and tests of a file are and normalizes the answer into 0-indexed
//! [`SourceRange`]s. [`LspPositionService`] is the production service.

mod lsp;
mod resolver;

pub use lsp::*;
pub use resolver::*;

// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The live tree of test files, contracts and test cases.
//!
//! The main type here is [`TestTree`]. File nodes are created by workspace discovery and by
//! [`WorkspaceEvent`]s; their children are built by resolving the file's contents through a
//! [`SourcePositionResolver`](crate::positions::SourcePositionResolver).

mod imp;
mod node;
mod watch;

pub use imp::*;
pub use node::*;
pub use watch::*;

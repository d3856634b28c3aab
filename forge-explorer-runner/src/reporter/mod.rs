// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Report the progress and results of a run, and the contents of the test tree.
//!
//! [`RunEvent`]s are streamed while a run is in progress and a [`RunReport`] is returned at the
//! end. [`RunDisplayer`] and [`TreeDisplayer`] render them for humans; the `to_summary` methods
//! convert them into the machine-readable forms in `forge-explorer-metadata`.

mod displayer;
mod events;

pub use displayer::*;
pub use events::*;

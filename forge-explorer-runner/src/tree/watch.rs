// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::WorkspaceEvent;
use crate::errors::{NonUtf8PathError, WatchError};
use camino::{Utf8Path, Utf8PathBuf};
use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::{ModifyKind, RenameMode},
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Watches a workspace recursively and forwards changes as [`WorkspaceEvent`]s.
///
/// Events are forwarded unfiltered; [`TestTree::apply`](super::TestTree::apply) ignores paths
/// that aren't test files. Watching stops when this is dropped.
#[derive(Debug)]
pub struct WorkspaceWatcher {
    root: Utf8PathBuf,
    _watcher: RecommendedWatcher,
}

impl WorkspaceWatcher {
    /// Starts watching `root`, sending events to `sender`.
    pub fn start(
        root: &Utf8Path,
        sender: mpsc::UnboundedSender<WorkspaceEvent>,
    ) -> Result<Self, WatchError> {
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    for event in map_notify_event(event) {
                        if sender.send(event).is_err() {
                            // The event loop has shut down.
                            return;
                        }
                    }
                }
                Err(error) => warn!("error watching workspace: {error}"),
            }
        })
        .map_err(|error| WatchError::new(root, error))?;

        watcher
            .watch(root.as_std_path(), RecursiveMode::Recursive)
            .map_err(|error| WatchError::new(root, error))?;
        debug!("watching {root} for changes");

        Ok(Self {
            root: root.to_owned(),
            _watcher: watcher,
        })
    }

    /// Returns the watched directory.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

/// Translates a file system notification into workspace events.
pub(crate) fn map_notify_event(event: Event) -> Vec<WorkspaceEvent> {
    let paths: Vec<_> = event
        .paths
        .into_iter()
        .filter_map(|path| match Utf8PathBuf::from_path_buf(path) {
            Ok(path) => Some(path),
            Err(path) => {
                debug!("ignoring change: {}", NonUtf8PathError::new(path));
                None
            }
        })
        .collect();

    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths
            .into_iter()
            .map(WorkspaceEvent::FileCreated)
            .collect(),
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths
            .into_iter()
            .map(WorkspaceEvent::FileDeleted)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match <[_; 2]>::try_from(paths) {
            Ok([from, to]) => vec![
                WorkspaceEvent::FileDeleted(from),
                WorkspaceEvent::FileCreated(to),
            ],
            Err(paths) => {
                debug!("ignoring rename with {} paths", paths.len());
                Vec::new()
            }
        },
        // The backend couldn't tell which side of the rename this is.
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .into_iter()
            .map(|path| {
                if path.exists() {
                    WorkspaceEvent::FileCreated(path)
                } else {
                    WorkspaceEvent::FileDeleted(path)
                }
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => paths
            .into_iter()
            .map(WorkspaceEvent::FileChanged)
            .collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

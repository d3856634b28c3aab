// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The host-facing surface: one object that owns the tree, the coordinator and the workspace
//! event plumbing.

use crate::{
    config::ExplorerConfig,
    coordinator::{RunCoordinator, RunRequest},
    errors::{DiscoveryError, ResolveError, RunRejected},
    forge::{ForgeRunner, TestRunner, TestTool},
    helpers::lock,
    positions::{LspPositionService, PositionService, SourcePositionResolver},
    reporter::{RunEvent, RunReport},
    tree::{NodeKey, TestNode, TestTree, TreeEvent, WorkspaceEvent, WorkspaceWatcher},
};
use std::sync::{Arc, Mutex};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Discovers, resolves and runs Foundry tests in one workspace.
#[derive(Debug)]
pub struct Explorer<S, T> {
    config: ExplorerConfig,
    coordinator: RunCoordinator<S, T>,
    workspace_tx: mpsc::UnboundedSender<WorkspaceEvent>,
    workspace_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkspaceEvent>>>,
    watcher: Mutex<Option<WorkspaceWatcher>>,
}

impl Explorer<LspPositionService, ForgeRunner> {
    /// Creates an explorer that resolves positions with the configured language server and runs
    /// tests with `forge`.
    pub fn from_config(config: ExplorerConfig) -> Self {
        let service = LspPositionService::from_config(&config);
        let tool = ForgeRunner::from_config(&config);
        Self::new(config, service, tool)
    }
}

impl<S: PositionService, T: TestTool> Explorer<S, T> {
    /// Creates an explorer over `service` and `tool`.
    pub fn new(config: ExplorerConfig, service: S, tool: T) -> Self {
        let tree = Arc::new(TestTree::new(&config, SourcePositionResolver::new(service)));
        let coordinator = RunCoordinator::new(tree, TestRunner::new(tool), config.busy_policy());
        let (workspace_tx, workspace_rx) = mpsc::unbounded_channel();
        Self {
            config,
            coordinator,
            workspace_tx,
            workspace_rx: Mutex::new(Some(workspace_rx)),
            watcher: Mutex::new(None),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ExplorerConfig {
        &self.config
    }

    /// Returns the test tree.
    pub fn tree(&self) -> &Arc<TestTree<S>> {
        self.coordinator.tree()
    }

    /// Returns the run coordinator.
    pub fn coordinator(&self) -> &RunCoordinator<S, T> {
        &self.coordinator
    }

    /// Returns a sender for workspace events, such as editor buffer changes.
    ///
    /// Events are applied by the loop started with [`spawn_event_loop`](Self::spawn_event_loop).
    pub fn workspace_sender(&self) -> mpsc::UnboundedSender<WorkspaceEvent> {
        self.workspace_tx.clone()
    }

    /// Subscribes to tree changes.
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.tree().subscribe()
    }

    /// Scans the workspace for test files and returns every file node, unresolved.
    ///
    /// The first successful scan also starts watching the workspace, if enabled. Failing to watch
    /// is logged and otherwise ignored.
    pub async fn discover_root(&self) -> Result<Vec<Arc<TestNode>>, DiscoveryError> {
        let files = self.tree().discover().await?;
        if self.config.discovery().watch {
            let mut watcher = lock(&self.watcher);
            if watcher.is_none() {
                match WorkspaceWatcher::start(self.tree().workspace_root(), self.workspace_sender())
                {
                    Ok(started) => *watcher = Some(started),
                    Err(error) => warn!("{error}; changes will not be picked up automatically"),
                }
            }
        }
        Ok(files)
    }

    /// Returns true if the workspace is being watched for changes.
    pub fn is_watching(&self) -> bool {
        lock(&self.watcher).is_some()
    }

    /// Resolves a node. `None` discovers the workspace; a file key analyzes that file.
    pub async fn resolve_node(&self, key: Option<&NodeKey>) -> Result<(), ResolveError> {
        match key {
            None => {
                self.discover_root().await?;
                Ok(())
            }
            Some(key) => self.tree().resolve(Some(key)).await,
        }
    }

    /// Runs `request`, passing progress events to `callback`.
    pub async fn run<F>(&self, request: RunRequest, callback: F) -> Result<RunReport, RunRejected>
    where
        F: FnMut(RunEvent) + Send,
    {
        if request.targets().is_empty() && !self.tree().is_root_resolved() {
            self.discover_root()
                .await
                .map_err(RunRejected::Discovery)?;
        }
        self.coordinator.run(request, callback).await
    }
}

impl<S, T> Explorer<S, T>
where
    S: PositionService + 'static,
    T: TestTool,
{
    /// Spawns the task that applies workspace events to the tree, in order.
    ///
    /// Returns `None` if the loop was already started. The task ends once every sender, including
    /// the one held by this explorer, is dropped.
    pub fn spawn_event_loop(&self) -> Option<JoinHandle<()>> {
        let mut receiver = lock(&self.workspace_rx).take()?;
        let tree = self.tree().clone();
        Some(tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                debug!("applying {event:?}");
                tree.apply(event).await;
            }
            debug!("workspace event loop exited");
        }))
    }
}

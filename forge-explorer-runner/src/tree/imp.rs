// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{NodeKey, TestNode};
use crate::{
    config::{DiscoveryConfig, ExplorerConfig},
    errors::{DiscoveryError, NonUtf8PathError, ResolveError},
    helpers::{lock, plural},
    positions::{PositionService, SourcePositionResolver},
};
use camino::{Utf8Path, Utf8PathBuf};
use forge_explorer_metadata::{NodeKind, TestTreeSummary};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A change to the tree, broadcast to subscribers.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum TreeEvent {
    /// A file node was added.
    NodeCreated(NodeKey),

    /// A file node and its subtree were removed.
    NodeRemoved(NodeKey),

    /// A file node's children were replaced.
    NodeResolved(NodeKey),
}

/// A change in the workspace or in an open editor, applied to the tree by
/// [`TestTree::apply`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WorkspaceEvent {
    /// A file was created on disk.
    FileCreated(Utf8PathBuf),

    /// A file was changed on disk.
    FileChanged(Utf8PathBuf),

    /// A file or directory was deleted from disk.
    FileDeleted(Utf8PathBuf),

    /// A file was opened in an editor.
    DocumentOpened {
        /// The file's path.
        path: Utf8PathBuf,

        /// The editor's contents.
        text: String,
    },

    /// An open document was edited but not saved.
    DocumentChanged {
        /// The file's path.
        path: Utf8PathBuf,

        /// The editor's contents.
        text: String,
    },

    /// An open document was saved.
    DocumentSaved(Utf8PathBuf),

    /// An open document was closed.
    DocumentClosed(Utf8PathBuf),
}

/// A user-facing way to select nodes: a file path, a contract name, `Contract::function`, or a
/// [`NodeKey`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeQuery {
    /// An exact node key.
    Key(NodeKey),

    /// A test file, relative to the workspace root or absolute.
    File(Utf8PathBuf),

    /// Every contract with this name.
    Contract(String),

    /// Every test with this name in contracts with this name.
    Case {
        /// The contract name.
        contract: String,

        /// The function name.
        function: String,
    },
}

impl FromStr for NodeQuery {
    type Err = crate::errors::NodeKeyParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.starts_with("file://") {
            return input.parse().map(Self::Key);
        }
        if let Some((contract, function)) = input.split_once("::") {
            return Ok(Self::Case {
                contract: contract.to_owned(),
                function: function.to_owned(),
            });
        }
        if input.contains(['/', '\\']) || input.ends_with(".sol") {
            return Ok(Self::File(input.into()));
        }
        Ok(Self::Contract(input.to_owned()))
    }
}

impl fmt::Display for NodeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{key}"),
            Self::File(path) => write!(f, "{path}"),
            Self::Contract(contract) => f.write_str(contract),
            Self::Case { contract, function } => write!(f, "{contract}::{function}"),
        }
    }
}

const EVENT_CAPACITY: usize = 256;

/// The canonical set of test files in a workspace and their resolved contents.
#[derive(Debug)]
pub struct TestTree<S> {
    root: Utf8PathBuf,
    discovery: DiscoveryConfig,
    resolver: SourcePositionResolver<S>,
    files: Mutex<BTreeMap<String, Arc<TestNode>>>,
    buffers: Mutex<HashMap<Utf8PathBuf, String>>,
    root_resolved: AtomicBool,
    events: broadcast::Sender<TreeEvent>,
}

impl<S: PositionService> TestTree<S> {
    /// Creates an empty tree for the workspace in `config`.
    pub fn new(config: &ExplorerConfig, resolver: SourcePositionResolver<S>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            root: config.workspace_root().to_owned(),
            discovery: config.discovery().clone(),
            resolver,
            files: Mutex::new(BTreeMap::new()),
            buffers: Mutex::new(HashMap::new()),
            root_resolved: AtomicBool::new(false),
            events,
        }
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns the discovery settings for this tree.
    pub fn discovery(&self) -> &DiscoveryConfig {
        &self.discovery
    }

    /// Subscribes to tree changes.
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    /// Returns a snapshot of every file node, ordered by file id.
    pub fn files(&self) -> Vec<Arc<TestNode>> {
        lock(&self.files).values().cloned().collect()
    }

    /// Returns the file node for `path`, if one exists.
    pub fn file(&self, path: &Utf8Path) -> Option<Arc<TestNode>> {
        let key = NodeKey::for_file(&self.absolute(path));
        lock(&self.files).get(key.file_id()).cloned()
    }

    /// Returns the node with this key, if one exists.
    pub fn get(&self, key: &NodeKey) -> Option<Arc<TestNode>> {
        let file = lock(&self.files).get(key.file_id()).cloned()?;
        match key.local_id() {
            None => Some(file),
            Some(_) => file.find(key),
        }
    }

    /// Returns true once the workspace has been scanned.
    pub fn is_root_resolved(&self) -> bool {
        self.root_resolved.load(Ordering::Acquire)
    }

    /// Returns the file node for `path`, creating an unresolved one if needed.
    pub fn get_or_create_file(&self, path: &Utf8Path) -> Arc<TestNode> {
        let path = self.absolute(path);
        let key = NodeKey::for_file(&path);
        let mut files = lock(&self.files);
        if let Some(existing) = files.get(key.file_id()) {
            return existing.clone();
        }

        debug!("adding test file {path}");
        let node = TestNode::new_file(path);
        files.insert(key.file_id().to_owned(), node.clone());
        drop(files);
        self.emit(TreeEvent::NodeCreated(key));
        node
    }

    /// Removes the file node for `path` and its subtree, returning it if it existed.
    ///
    /// The removed nodes are tombstoned first, so holders of references see them as removed.
    pub fn remove_file(&self, path: &Utf8Path) -> Option<Arc<TestNode>> {
        let key = NodeKey::for_file(&self.absolute(path));
        let node = lock(&self.files).remove(key.file_id())?;
        self.unlink(&node);
        Some(node)
    }

    fn remove_files_under(&self, dir: &Utf8Path) -> Vec<Arc<TestNode>> {
        let removed: Vec<_> = {
            let mut files = lock(&self.files);
            let keys: Vec<_> = files
                .iter()
                .filter(|(_, node)| node.path().starts_with(dir))
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|key| files.remove(key)).collect()
        };
        for node in &removed {
            self.unlink(node);
        }
        removed
    }

    fn unlink(&self, node: &Arc<TestNode>) {
        debug!("removing test file {}", node.path());
        node.mark_removed();
        lock(&self.buffers).remove(node.path());
        self.emit(TreeEvent::NodeRemoved(node.key().clone()));
    }

    /// Resolves a node: `None` scans the whole workspace, a file key resolves that file's
    /// contents.
    pub async fn resolve(&self, target: Option<&NodeKey>) -> Result<(), ResolveError> {
        let Some(key) = target else {
            self.discover().await?;
            return Ok(());
        };
        let node = self
            .get(key)
            .ok_or_else(|| ResolveError::NodeNotFound { key: key.clone() })?;
        self.resolve_file(&node).await
    }

    /// Scans the workspace for test files, creating a node for each new file and removing nodes
    /// for files that no longer exist. Returns every file node.
    ///
    /// Files are not resolved: their contents are only analyzed when they are expanded, opened
    /// or run.
    ///
    /// This walks the file system on the calling thread. From async code, use
    /// [`TestTree::discover`].
    pub fn resolve_root(&self) -> Result<Vec<Arc<TestNode>>, DiscoveryError> {
        let paths = scan_workspace(&self.root, &self.discovery)?;
        Ok(self.apply_discovered(paths))
    }

    /// Like [`TestTree::resolve_root`], but walks the file system on tokio's blocking pool.
    pub async fn discover(&self) -> Result<Vec<Arc<TestNode>>, DiscoveryError> {
        let root = self.root.clone();
        let discovery = self.discovery.clone();
        let paths = tokio::task::spawn_blocking(move || scan_workspace(&root, &discovery))
            .await
            .map_err(|error| match error.try_into_panic() {
                Ok(panic) => std::panic::resume_unwind(panic),
                Err(_) => DiscoveryError::Interrupted {
                    root: self.root.clone(),
                },
            })??;
        Ok(self.apply_discovered(paths))
    }

    fn apply_discovered(&self, paths: Vec<Utf8PathBuf>) -> Vec<Arc<TestNode>> {
        let found: HashSet<String> = paths
            .iter()
            .map(|path| NodeKey::for_file(path).file_id().to_owned())
            .collect();

        let stale: Vec<_> = self
            .files()
            .into_iter()
            .filter(|node| !found.contains(node.key().file_id()))
            .collect();
        for node in stale {
            self.remove_file(node.path());
        }
        for path in &paths {
            self.get_or_create_file(path);
        }

        self.root_resolved.store(true, Ordering::Release);
        debug!(
            "discovered {} test {} under {}",
            paths.len(),
            plural::files_str(paths.len()),
            self.root
        );
        self.files()
    }

    /// Analyzes a file's contents and replaces its contract children.
    ///
    /// Contents come from the open editor buffer if there is one, and from disk otherwise. If the
    /// position service fails, the file resolves to no contracts.
    ///
    /// Resolutions of the same file may overlap. The one that started last wins: a resolution that
    /// finishes after a later one has been installed is discarded.
    pub async fn resolve_file(&self, node: &Arc<TestNode>) -> Result<(), ResolveError> {
        if node.kind() != NodeKind::File {
            return Err(ResolveError::NotResolvable {
                key: node.key().clone(),
                kind: node.kind(),
            });
        }

        let generation = node.begin_resolution();
        let buffered = lock(&self.buffers).get(node.path()).cloned();
        let content = match buffered {
            Some(content) => content,
            None => tokio::fs::read_to_string(node.path())
                .await
                .map_err(|error| ResolveError::ReadFile {
                    path: node.path().to_owned(),
                    error,
                })?,
        };

        let positions = self.resolver.resolve_positions(&content).await;
        if node.is_removed() {
            debug!("{} was removed while it was being resolved", node.path());
            return Ok(());
        }

        let mut seen = HashSet::new();
        let contracts: Vec<_> = positions
            .iter()
            .filter(|position| {
                let first = seen.insert(position.name.clone());
                if !first {
                    warn!(
                        "ignoring duplicate contract `{}` in {}",
                        position.name,
                        node.path()
                    );
                }
                first
            })
            .map(|position| TestNode::new_contract(node, position))
            .collect();
        let count = contracts.len();
        if !node.install_children(generation, contracts) {
            debug!("discarding outdated resolution of {}", node.path());
            return Ok(());
        }
        debug!(
            "resolved {}: {count} {}",
            node.path(),
            plural::contracts_str(count)
        );
        self.emit(TreeEvent::NodeResolved(node.key().clone()));
        Ok(())
    }

    /// Records an editor buffer for a test file and resolves the file from it.
    pub async fn document_opened(&self, path: &Utf8Path, text: String) -> Result<(), ResolveError> {
        let path = self.absolute(path);
        if !self.is_tracked_path(&path) {
            return Ok(());
        }
        lock(&self.buffers).insert(path.clone(), text);
        let node = self.get_or_create_file(&path);
        self.resolve_file(&node).await
    }

    /// Updates the editor buffer for a test file, without resolving it.
    pub fn document_changed(&self, path: &Utf8Path, text: String) {
        let path = self.absolute(path);
        if self.is_tracked_path(&path) {
            lock(&self.buffers).insert(path, text);
        }
    }

    /// Re-resolves a test file after it was saved.
    pub async fn document_saved(&self, path: &Utf8Path) -> Result<(), ResolveError> {
        let path = self.absolute(path);
        if !self.is_tracked_path(&path) {
            return Ok(());
        }
        let node = self.get_or_create_file(&path);
        self.resolve_file(&node).await
    }

    /// Drops the editor buffer for a file. Later resolutions read the file from disk.
    pub fn document_closed(&self, path: &Utf8Path) {
        lock(&self.buffers).remove(&self.absolute(path));
    }

    /// Applies a workspace event. Failures are logged: a file that can't be read keeps its
    /// previous children.
    pub async fn apply(&self, event: WorkspaceEvent) {
        let result = match event {
            WorkspaceEvent::FileCreated(path) => {
                let path = self.absolute(&path);
                if !self.is_tracked_path(&path) {
                    return;
                }
                match self.file(&path) {
                    // Editors that save by renaming over the file produce creations for files
                    // that are already known.
                    Some(node) if node.is_resolved() => self.resolve_file(&node).await,
                    Some(_) => Ok(()),
                    None => {
                        self.get_or_create_file(&path);
                        Ok(())
                    }
                }
            }
            WorkspaceEvent::FileChanged(path) => {
                let path = self.absolute(&path);
                if !self.is_tracked_path(&path) {
                    return;
                }
                let node = self.get_or_create_file(&path);
                self.resolve_file(&node).await
            }
            WorkspaceEvent::FileDeleted(path) => {
                let path = self.absolute(&path);
                if self.remove_file(&path).is_none() {
                    // Deleting a directory only reports the directory itself.
                    self.remove_files_under(&path);
                }
                Ok(())
            }
            WorkspaceEvent::DocumentOpened { path, text } => {
                self.document_opened(&path, text).await
            }
            WorkspaceEvent::DocumentChanged { path, text } => {
                self.document_changed(&path, text);
                Ok(())
            }
            WorkspaceEvent::DocumentSaved(path) => self.document_saved(&path).await,
            WorkspaceEvent::DocumentClosed(path) => {
                self.document_closed(&path);
                Ok(())
            }
        };

        if let Err(error) = result {
            warn!("failed to update test tree: {error}");
        }
    }

    /// Returns the keys of every node matching `query`.
    ///
    /// Contract and case queries only match resolved files.
    pub fn find_matching(&self, query: &NodeQuery) -> Vec<NodeKey> {
        match query {
            NodeQuery::Key(key) => self
                .get(key)
                .map(|node| vec![node.key().clone()])
                .unwrap_or_default(),
            NodeQuery::File(path) => self
                .file(path)
                .map(|node| vec![node.key().clone()])
                .unwrap_or_default(),
            NodeQuery::Contract(contract) => self
                .contracts_named(contract)
                .map(|node| node.key().clone())
                .collect(),
            NodeQuery::Case { contract, function } => self
                .contracts_named(contract)
                .flat_map(|node| {
                    node.children()
                        .iter()
                        .filter(|case| case.label() == function)
                        .map(|case| case.key().clone())
                        .collect::<Vec<_>>()
                })
                .collect(),
        }
    }

    fn contracts_named<'a>(&self, name: &'a str) -> impl Iterator<Item = Arc<TestNode>> + 'a {
        self.files().into_iter().flat_map(move |file| {
            file.children()
                .iter()
                .filter(|contract| contract.label() == name)
                .cloned()
                .collect::<Vec<_>>()
        })
    }

    /// Returns a machine-readable view of the tree.
    pub fn summary(&self) -> TestTreeSummary {
        TestTreeSummary {
            files: self
                .files()
                .iter()
                .map(|file| file.to_file_summary())
                .collect(),
        }
    }

    /// Returns true if `path` is a test file inside the workspace and outside excluded
    /// directories.
    pub fn is_tracked_path(&self, path: &Utf8Path) -> bool {
        if !self.discovery.is_test_file(path) {
            return false;
        }
        match path.strip_prefix(&self.root) {
            Ok(relative) => !relative
                .parent()
                .is_some_and(|dir| dir.iter().any(|name| self.discovery.is_excluded_dir(name))),
            Err(_) => false,
        }
    }

    fn absolute(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.root.join(path)
        }
    }

    fn emit(&self, event: TreeEvent) {
        // Sending only fails if there are no subscribers.
        let _ = self.events.send(event);
    }
}

fn scan_workspace(
    root: &Utf8Path,
    discovery: &DiscoveryConfig,
) -> Result<Vec<Utf8PathBuf>, DiscoveryError> {
    let metadata = std::fs::metadata(root).map_err(|error| DiscoveryError::ReadRoot {
        root: root.to_owned(),
        error,
    })?;
    if !metadata.is_dir() {
        return Err(DiscoveryError::RootNotDir {
            root: root.to_owned(),
        });
    }

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| discovery.is_excluded_dir(name))
        });

    let mut paths = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!("skipping unreadable path during discovery: {error}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = match Utf8PathBuf::from_path_buf(entry.into_path()) {
            Ok(path) => path,
            Err(path) => {
                warn!("skipping file: {}", NonUtf8PathError::new(path));
                continue;
            }
        };
        if discovery.is_test_file(&path) {
            paths.push(path);
        }
    }
    Ok(paths)
}

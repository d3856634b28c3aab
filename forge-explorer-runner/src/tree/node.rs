// Copyright (c) The forge-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::NodeKeyParseError,
    helpers::lock,
    positions::{ContractPosition, SourceRange},
};
use camino::{Utf8Path, Utf8PathBuf};
use forge_explorer_metadata::{NodeKind, TestCaseSummary, TestContractSummary, TestFileSummary};
use std::{
    collections::HashSet,
    fmt,
    str::FromStr,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tracing::warn;

/// The address of a node in the test tree.
///
/// A key is a file id (the file's `file://` URI) plus, for contracts and cases, an id unique within
/// that file. Keys render as `<file-uri>` or `<file-uri>#<local-id>`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeKey {
    file_id: String,
    local_id: Option<String>,
}

impl NodeKey {
    /// Returns the key of the file node for `path`.
    pub fn for_file(path: &Utf8Path) -> Self {
        Self {
            file_id: file_uri(path),
            local_id: None,
        }
    }

    /// Returns the key of a node with `local_id` in the same file as `self`.
    pub fn child(&self, local_id: impl Into<String>) -> Self {
        Self {
            file_id: self.file_id.clone(),
            local_id: Some(local_id.into()),
        }
    }

    /// Returns the file id.
    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    /// Returns the id within the file, if this is not a file key.
    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    /// Returns the path of the file this node belongs to.
    pub fn file_path(&self) -> Utf8PathBuf {
        let path = &self.file_id["file://".len()..];
        match path.strip_prefix('/') {
            // `file:///C:/...`
            Some(rest) if rest.as_bytes().get(1) == Some(&b':') => rest.into(),
            _ => path.into(),
        }
    }

    /// Returns the key of the file this node belongs to.
    pub fn file_key(&self) -> Self {
        Self {
            file_id: self.file_id.clone(),
            local_id: None,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.local_id {
            Some(local_id) => write!(f, "{}#{}", self.file_id, local_id),
            None => f.write_str(&self.file_id),
        }
    }
}

impl FromStr for NodeKey {
    type Err = NodeKeyParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (file_id, local_id) = match input.rsplit_once('#') {
            Some((file_id, local_id)) => {
                if local_id.is_empty() {
                    return Err(NodeKeyParseError::new(input, "id after `#` is empty"));
                }
                (file_id, Some(local_id.to_owned()))
            }
            None => (input, None),
        };
        if !file_id.starts_with("file://") || file_id.len() == "file://".len() {
            return Err(NodeKeyParseError::new(
                input,
                "expected a file:// URI, optionally followed by `#<id>`",
            ));
        }
        Ok(Self {
            file_id: file_id.to_owned(),
            local_id,
        })
    }
}

/// Returns the `file://` URI for an absolute path.
pub(crate) fn file_uri(path: &Utf8Path) -> String {
    let path = path.as_str().replace('\\', "/");
    if path.starts_with('/') {
        format!("file://{path}")
    } else {
        // Windows paths (`C:/...`) need an extra slash.
        format!("file:///{path}")
    }
}

/// The id of a contract within its file: the contract name with spaces removed.
pub(crate) fn contract_local_id(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).collect()
}

/// The id of a test case within its file: `<contract id>_<function>`.
pub(crate) fn case_local_id(contract_id: &str, function: &str) -> String {
    format!("{contract_id}_{function}")
}

#[derive(Clone, Debug)]
enum ChildState {
    Unresolved,
    Resolved(Arc<[Arc<TestNode>]>),
}

#[derive(Debug)]
struct ChildSlot {
    state: ChildState,
    // The resolution that produced `state`, or 0 if none did.
    generation: u64,
}

impl ChildSlot {
    fn new(state: ChildState) -> Mutex<Self> {
        Mutex::new(Self {
            state,
            generation: 0,
        })
    }
}

/// A node in the test tree: a file, a contract, or a test case.
///
/// Children are held as an immutable snapshot that is replaced wholesale on re-resolution, so a
/// reader iterating over [`children`](Self::children) never observes a partial update. Each
/// resolution is numbered, and a resolution that finishes after a later one has been installed is
/// discarded.
#[derive(Debug)]
pub struct TestNode {
    key: NodeKey,
    kind: NodeKind,
    label: String,
    path: Utf8PathBuf,
    range: Option<SourceRange>,
    parent: Weak<TestNode>,
    children: Mutex<ChildSlot>,
    resolutions: AtomicU64,
    removed: AtomicBool,
}

impl TestNode {
    pub(crate) fn new_file(path: Utf8PathBuf) -> Arc<Self> {
        let label = path.file_name().unwrap_or(path.as_str()).to_owned();
        Arc::new(Self {
            key: NodeKey::for_file(&path),
            kind: NodeKind::File,
            label,
            path,
            range: None,
            parent: Weak::new(),
            children: ChildSlot::new(ChildState::Unresolved),
            resolutions: AtomicU64::new(0),
            removed: AtomicBool::new(false),
        })
    }

    pub(crate) fn new_contract(file: &Arc<TestNode>, position: &ContractPosition) -> Arc<Self> {
        let contract_id = contract_local_id(&position.name);
        let key = file.key.child(&contract_id);

        Arc::new_cyclic(|contract| {
            let mut seen = HashSet::new();
            let cases: Vec<_> = position
                .tests
                .iter()
                .filter(|test| {
                    let first = seen.insert(test.name.clone());
                    if !first {
                        warn!(
                            "ignoring duplicate test `{}` in contract `{}`",
                            test.name, position.name
                        );
                    }
                    first
                })
                .map(|test| {
                    Arc::new(Self {
                        key: file.key.child(case_local_id(&contract_id, &test.name)),
                        kind: NodeKind::Case,
                        label: test.name.clone(),
                        path: file.path.clone(),
                        range: Some(test.range),
                        parent: contract.clone(),
                        children: ChildSlot::new(ChildState::Resolved(Arc::new([]))),
                        resolutions: AtomicU64::new(0),
                        removed: AtomicBool::new(false),
                    })
                })
                .collect();

            Self {
                key,
                kind: NodeKind::Contract,
                label: position.name.clone(),
                path: file.path.clone(),
                range: Some(position.range),
                parent: Arc::downgrade(file),
                children: ChildSlot::new(ChildState::Resolved(cases.into())),
                resolutions: AtomicU64::new(0),
                removed: AtomicBool::new(false),
            }
        })
    }

    /// Returns the key of this node.
    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    /// Returns the kind of this node.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Returns the display name: the file name, contract name or function name.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the path of the file this node is in.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the 0-indexed range of the node's name, if known. File nodes have no range.
    pub fn range(&self) -> Option<SourceRange> {
        self.range
    }

    /// Returns the parent node, if this node has one and it is still alive.
    pub fn parent(&self) -> Option<Arc<TestNode>> {
        self.parent.upgrade()
    }

    /// Returns a snapshot of this node's children. Empty if the node is unresolved.
    pub fn children(&self) -> Arc<[Arc<TestNode>]> {
        match &lock(&self.children).state {
            ChildState::Unresolved => Arc::new([]),
            ChildState::Resolved(children) => children.clone(),
        }
    }

    /// Returns true if this node's children are known, even if there are none.
    pub fn is_resolved(&self) -> bool {
        matches!(lock(&self.children).state, ChildState::Resolved(_))
    }

    /// Returns true if this node was removed from the tree.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Returns true if `key` names this node or one of its ancestors.
    pub fn has_ancestor_or_self(&self, keys: &HashSet<NodeKey>) -> bool {
        if keys.contains(&self.key) {
            return true;
        }
        let mut current = self.parent();
        while let Some(node) = current {
            if keys.contains(&node.key) {
                return true;
            }
            current = node.parent();
        }
        false
    }

    /// Finds the descendant with this key.
    pub fn find(&self, key: &NodeKey) -> Option<Arc<TestNode>> {
        self.children().iter().find_map(|child| {
            if &child.key == key {
                Some(child.clone())
            } else {
                child.find(key)
            }
        })
    }

    /// Numbers a new resolution of this node. Call this before reading the contents the
    /// resolution is based on.
    pub(crate) fn begin_resolution(&self) -> u64 {
        self.resolutions.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Installs the children produced by resolution `generation`.
    ///
    /// Returns false and leaves the children alone if a later resolution was already installed.
    pub(crate) fn install_children(&self, generation: u64, children: Vec<Arc<TestNode>>) -> bool {
        let mut slot = lock(&self.children);
        if generation <= slot.generation {
            return false;
        }
        slot.state = ChildState::Resolved(children.into());
        slot.generation = generation;
        true
    }

    #[cfg(test)]
    fn replace_children(&self, children: Vec<Arc<TestNode>>) -> Arc<[Arc<TestNode>]> {
        let previous = self.children();
        self.install_children(self.begin_resolution(), children);
        previous
    }

    /// Marks this node and its subtree as removed.
    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
        for child in self.children().iter() {
            child.mark_removed();
        }
    }

    pub(crate) fn to_file_summary(&self) -> TestFileSummary {
        TestFileSummary {
            id: self.key.to_string(),
            label: self.label.clone(),
            resolved: self.is_resolved(),
            contracts: self
                .children()
                .iter()
                .map(|contract| TestContractSummary {
                    id: contract.key.to_string(),
                    label: contract.label.clone(),
                    range: contract.range.map(SourceRange::to_lsp),
                    cases: contract
                        .children()
                        .iter()
                        .map(|case| TestCaseSummary {
                            id: case.key.to_string(),
                            label: case.label.clone(),
                            range: case.range.map(SourceRange::to_lsp),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

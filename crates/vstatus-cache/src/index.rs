use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

/// Decides which directories are under version control and may be tracked.
pub trait ManagedPredicate: Send + Sync {
    fn is_managed(&self, directory: &Path) -> bool;
}

impl<F> ManagedPredicate for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn is_managed(&self, directory: &Path) -> bool {
        self(directory)
    }
}

impl std::fmt::Debug for dyn ManagedPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ManagedPredicate")
    }
}

/// Working-copy roots: a path is managed when it is one of them or lies below one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManagedRoots {
    roots: Vec<PathBuf>,
}

impl ManagedRoots {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl ManagedPredicate for ManagedRoots {
    fn is_managed(&self, directory: &Path) -> bool {
        self.roots.iter().any(|root| directory.starts_with(root))
    }
}

#[derive(Debug, Default)]
struct Node {
    members: BTreeSet<PathBuf>,
    /// Managed subdirectories that have content of their own.
    linked: BTreeSet<PathBuf>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.members.is_empty() && self.linked.is_empty()
    }
}

/// Answers "which files below directory X are in category C" from memory.
///
/// Membership is replaced per directory. Every managed ancestor of a
/// directory with content links down to it, so a query can start at any
/// managed ancestor without touching disk.
pub struct CacheIndex {
    name: &'static str,
    managed: Arc<dyn ManagedPredicate>,
    nodes: RwLock<HashMap<PathBuf, Node>>,
}

impl std::fmt::Debug for CacheIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheIndex")
            .field("name", &self.name)
            .field("directories", &self.nodes.read().len())
            .finish_non_exhaustive()
    }
}

impl CacheIndex {
    pub fn new(name: &'static str, managed: Arc<dyn ManagedPredicate>) -> Self {
        Self {
            name,
            managed,
            nodes: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Swaps the member set of `directory`. Unmanaged directories are ignored.
    pub fn replace_for(&self, directory: &Path, members: BTreeSet<PathBuf>) {
        if !self.managed.is_managed(directory) {
            return;
        }

        let mut nodes = self.nodes.write();
        let had_content = has_content(&nodes, directory);
        match nodes.get_mut(directory) {
            Some(node) => node.members = members,
            None if members.is_empty() => {}
            None => {
                nodes.insert(
                    directory.to_path_buf(),
                    Node {
                        members,
                        linked: BTreeSet::new(),
                    },
                );
            }
        }
        prune(&mut nodes, directory);

        if had_content != has_content(&nodes, directory) {
            self.propagate(&mut nodes, directory);
        }
    }

    /// Walks up from `directory`, linking or unlinking it in each managed
    /// ancestor until an ancestor's own state stops changing.
    fn propagate(&self, nodes: &mut HashMap<PathBuf, Node>, directory: &Path) {
        let mut child = directory;
        while let Some(parent) = child.parent() {
            if !self.managed.is_managed(parent) {
                break;
            }

            let parent_had_content = has_content(nodes, parent);
            if has_content(nodes, child) {
                nodes
                    .entry(parent.to_path_buf())
                    .or_default()
                    .linked
                    .insert(child.to_path_buf());
            } else if let Some(node) = nodes.get_mut(parent) {
                node.linked.remove(child);
                prune(nodes, parent);
            }

            if parent_had_content == has_content(nodes, parent) {
                break;
            }
            child = parent;
        }
    }

    /// Members of `directory` plus its linked subdirectories.
    pub fn lookup(&self, directory: &Path) -> BTreeSet<PathBuf> {
        let nodes = self.nodes.read();
        nodes
            .get(directory)
            .map(|node| node.members.union(&node.linked).cloned().collect())
            .unwrap_or_default()
    }

    /// Every member file at or below `directory`.
    pub fn lookup_recursive(&self, directory: &Path) -> BTreeSet<PathBuf> {
        let nodes = self.nodes.read();
        let mut out = BTreeSet::new();
        let mut pending = vec![directory];
        while let Some(dir) = pending.pop() {
            if let Some(node) = nodes.get(dir) {
                out.extend(node.members.iter().cloned());
                pending.extend(node.linked.iter().map(PathBuf::as_path));
            }
        }
        out
    }

    /// Union of members across every tracked directory.
    pub fn lookup_all(&self) -> BTreeSet<PathBuf> {
        let nodes = self.nodes.read();
        nodes
            .values()
            .flat_map(|node| node.members.iter().cloned())
            .collect()
    }

    pub fn contains(&self, directory: &Path) -> bool {
        self.nodes.read().contains_key(directory)
    }

    /// Number of member files.
    pub fn len(&self) -> usize {
        self.nodes.read().values().map(|node| node.members.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.nodes.write().clear();
    }
}

fn has_content(nodes: &HashMap<PathBuf, Node>, directory: &Path) -> bool {
    nodes.get(directory).is_some_and(|node| !node.is_empty())
}

fn prune(nodes: &mut HashMap<PathBuf, Node>, directory: &Path) {
    if nodes.get(directory).is_some_and(Node::is_empty) {
        nodes.remove(directory);
    }
}

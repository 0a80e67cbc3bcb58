//! Metadata trees describing one side of the sync at one instant
//!
//! Every node stores its *full* path in [`Node::name`] - a directory's name
//! ends with `/`, a file's doesn't. That makes paths prefix-composable by
//! concatenation, keys siblings in lexicographic order, and lets a lookup
//! distinguish "same name, different kind" for free.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{ensure, Result};
use rustc_hash::FxHashMap;
use serde_derive::{Deserialize, Serialize};

/// Maps a file id (content hash) to every path in the tree carrying it.
///
/// One index per tree, built alongside it - never a process-global.
pub type FileIndex = FxHashMap<String, BTreeSet<String>>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NodeKind {
    File,
    Directory,
}

/// The contents of a tree node - a directory owns its children.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum NodeContents {
    File,
    Directory { children: BTreeMap<String, Node> },
}

/// A single file or directory and its sync-relevant metadata
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Full path; ends with `/` iff this is a directory.
    pub name: String,
    /// Modification time, seconds since the epoch. Zero if we couldn't stat.
    pub mtime: i64,
    /// Stable content identity - the content hash on both sides.
    /// Empty for directories and for entries whose metadata we couldn't read.
    pub file_id: String,
    /// Content hash when known; directories leave it empty.
    pub hash_value: String,
    #[serde(flatten)]
    pub contents: NodeContents,
}

impl Node {
    pub fn file(name: impl Into<String>, mtime: i64, file_id: impl Into<String>) -> Node {
        let file_id = file_id.into();
        Node {
            name: name.into(),
            mtime,
            hash_value: file_id.clone(),
            file_id,
            contents: NodeContents::File,
        }
    }

    pub fn directory(name: impl Into<String>, mtime: i64) -> Node {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        Node {
            name,
            mtime,
            file_id: String::new(),
            hash_value: String::new(),
            contents: NodeContents::Directory {
                children: BTreeMap::new(),
            },
        }
    }

    pub fn kind(&self) -> NodeKind {
        match &self.contents {
            NodeContents::File => NodeKind::File,
            NodeContents::Directory { .. } => NodeKind::Directory,
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, Node>> {
        match &self.contents {
            NodeContents::File => None,
            NodeContents::Directory { children } => Some(children),
        }
    }

    /// Inserts a child into this directory, keyed by its full name.
    pub fn insert(&mut self, child: Node) -> Result<()> {
        ensure!(
            child.name.starts_with(&self.name),
            "{} doesn't extend its parent {}",
            child.name,
            self.name
        );
        let children = match &mut self.contents {
            NodeContents::Directory { children } => children,
            NodeContents::File => anyhow::bail!("{} is a file, not a directory", self.name),
        };
        ensure!(
            children.insert(child.name.clone(), child).is_none(),
            "Duplicate tree entries"
        );
        Ok(())
    }

    /// Finds the node with the given full path anywhere under this one.
    ///
    /// Because names are kind-tagged by the trailing slash, looking up `d/x`
    /// never returns a directory named `d/x/` (and vice versa).
    pub fn find(&self, path: &str) -> Option<&Node> {
        if self.name == path {
            return Some(self);
        }
        let children = self.children()?;
        if let Some(hit) = children.get(path) {
            return Some(hit);
        }
        // At most one child directory can prefix the target.
        children
            .values()
            .filter(|c| c.kind() == NodeKind::Directory && path.starts_with(&c.name))
            .find_map(|c| c.find(path))
    }
}

/// A metadata tree plus its file-id index, representing one side of the sync.
#[derive(Debug, Clone)]
pub struct MetaTree {
    pub root: Node,
    pub index: FileIndex,
}

impl MetaTree {
    /// Wraps a freshly-built tree, deriving the file-id index from it.
    pub fn new(root: Node) -> MetaTree {
        let mut index = FileIndex::default();
        index_files(&root, &mut index);
        MetaTree { root, index }
    }

    pub fn find(&self, path: &str) -> Option<&Node> {
        self.root.find(path)
    }
}

fn index_files(node: &Node, index: &mut FileIndex) {
    let Some(children) = node.children() else {
        return;
    };
    for child in children.values() {
        match child.kind() {
            NodeKind::File => {
                if !child.file_id.is_empty() {
                    index
                        .entry(child.file_id.clone())
                        .or_default()
                        .insert(child.name.clone());
                }
            }
            NodeKind::Directory => index_files(child, index),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Node {
        let mut root = Node::directory("sync/", 100);
        let mut d = Node::directory("sync/d/", 100);
        d.insert(Node::file("sync/d/inner.txt", 120, "h-inner"))
            .unwrap();
        root.insert(d).unwrap();
        root.insert(Node::file("sync/a.txt", 110, "h-a")).unwrap();
        root
    }

    #[test]
    fn find_descends_by_prefix() {
        let root = sample();
        assert_eq!(root.find("sync/a.txt").unwrap().file_id, "h-a");
        assert_eq!(root.find("sync/d/inner.txt").unwrap().file_id, "h-inner");
        assert_eq!(root.find("sync/d/").unwrap().kind(), NodeKind::Directory);
        assert!(root.find("sync/missing.txt").is_none());
        // A file lookup never matches a directory of the same stem.
        assert!(root.find("sync/d").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut root = sample();
        assert!(root.insert(Node::file("sync/a.txt", 1, "other")).is_err());
    }

    #[test]
    fn children_must_extend_parent() {
        let mut root = sample();
        assert!(root.insert(Node::file("elsewhere/b.txt", 1, "h")).is_err());
    }

    #[test]
    fn index_covers_all_files() {
        let tree = MetaTree::new(sample());
        assert_eq!(tree.index.len(), 2);
        assert!(tree.index["h-inner"].contains("sync/d/inner.txt"));
        // Identical contents at two paths share an index entry.
        let mut root = sample();
        root.insert(Node::file("sync/copy.txt", 130, "h-a")).unwrap();
        let tree = MetaTree::new(root);
        assert_eq!(tree.index["h-a"].len(), 2);
    }
}

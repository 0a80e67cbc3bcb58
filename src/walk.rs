//! Tree building - walk the local filesystem or a bucket listing
//! into a [`MetaTree`].
//!
//! A missing root is fatal for that side of the sync, but trouble with any
//! individual entry just logs a warning and leaves the entry's metadata
//! empty. A tree with holes beats no tree at all; the next cycle retries.

use std::collections::BTreeSet;
use std::fs;

use anyhow::{Context, Result};
use camino::Utf8Path;
use tracing::*;

use crate::backend::ObjectStore;
use crate::file_util;
use crate::hashing;
use crate::tree::{MetaTree, Node};

/// Builds the local tree rooted at the given directory (trailing `/`).
pub fn walk_local(root: &str) -> Result<MetaTree> {
    debug_assert!(root.ends_with('/'));
    let mtime = file_util::mtime(Utf8Path::new(root))
        .with_context(|| format!("Couldn't read the sync root {root}"))?;
    let mut node = Node::directory(root, mtime);
    walk_local_dir(&mut node)?;
    Ok(MetaTree::new(node))
}

fn walk_local_dir(dir: &mut Node) -> Result<()> {
    let path = Utf8Path::new(&dir.name);
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(path).with_context(|| format!("Couldn't list {path}"))? {
        let entry = entry.with_context(|| format!("Couldn't list {path}"))?;
        match entry.file_name().into_string() {
            Ok(n) => {
                names.insert(n);
            }
            Err(n) => warn!("Skipping non-UTF-8 name {:?} in {path}", n),
        }
    }

    for name in names {
        let full = format!("{}{name}", dir.name);
        // symlink_metadata: don't follow links, lest a link to an ancestor
        // walk us in circles.
        let file_type = match fs::symlink_metadata(&full) {
            Ok(m) => m.file_type(),
            Err(e) => {
                warn!("Couldn't stat {full}: {e}");
                continue;
            }
        };
        if file_type.is_dir() {
            let mtime = file_util::mtime(Utf8Path::new(&full)).unwrap_or_else(|e| {
                warn!("{e:#}");
                0
            });
            let mut subdir = Node::directory(format!("{full}/"), mtime);
            if let Err(e) = walk_local_dir(&mut subdir) {
                warn!("Skipping {full}: {e:#}");
                continue;
            }
            dir.insert(subdir)?;
        } else if file_type.is_file() {
            // A file we can't hash still earns a tree entry;
            // empty metadata just means no reconciliation decisions match it.
            let mtime = file_util::mtime(Utf8Path::new(&full)).unwrap_or_else(|e| {
                warn!("{e:#}");
                0
            });
            let file_id = match hashing::hash_file(Utf8Path::new(&full)) {
                Ok(hash) => hash.to_string(),
                Err(e) => {
                    warn!("{e:#}");
                    String::new()
                }
            };
            dir.insert(Node::file(full, mtime, file_id))?;
        } else {
            debug!("Skipping {full}: neither a file nor a directory");
        }
    }
    Ok(())
}

/// Builds the remote tree rooted at the given prefix (trailing `/`).
pub fn walk_store(prefix: &str, store: &dyn ObjectStore) -> Result<MetaTree> {
    debug_assert!(prefix.ends_with('/'));
    let mtime = match store.stat(prefix) {
        Ok(Some(stat)) => stat.mtime,
        Ok(None) => 0,
        Err(e) => {
            warn!("Couldn't stat the remote root {prefix}: {e:#}");
            0
        }
    };
    let mut node = Node::directory(prefix, mtime);
    walk_store_dir(&mut node, store)
        .with_context(|| format!("Couldn't read the remote root {prefix}"))?;
    Ok(MetaTree::new(node))
}

fn walk_store_dir(dir: &mut Node, store: &dyn ObjectStore) -> Result<()> {
    let mut names = store.list(&dir.name)?;
    names.sort();

    for name in names {
        let full = format!("{}{name}", dir.name);
        if name.ends_with('/') {
            let mtime = match store.stat(&full) {
                Ok(Some(stat)) => stat.mtime,
                Ok(None) => 0,
                Err(e) => {
                    warn!("Couldn't stat {full}: {e:#}");
                    0
                }
            };
            let mut subdir = Node::directory(full.clone(), mtime);
            if let Err(e) = walk_store_dir(&mut subdir, store) {
                warn!("Skipping {full}: {e:#}");
                continue;
            }
            dir.insert(subdir)?;
        } else {
            let (mtime, file_id) = match store.stat(&full) {
                Ok(Some(stat)) => (stat.mtime, stat.hash),
                Ok(None) => {
                    // Gone between list and stat; keep an empty placeholder.
                    debug!("{full} vanished during the scan");
                    (0, String::new())
                }
                Err(e) => {
                    warn!("Couldn't stat {full}: {e:#}");
                    (0, String::new())
                }
            };
            dir.insert(Node::file(full, mtime, file_id))?;
        }
    }
    Ok(())
}

//! The reconciliation engine - turns tree differences into actions
//!
//! Each cycle runs two one-directional passes, [`pull`] (cloud to local)
//! first, then [`push`] (local to cloud). A pass walks the current tree of
//! its side against that side's history tree and emits an [`Action`] for
//! every difference, synchronously, before visiting the next node. Neither
//! pass ever mutates a tree.
//!
//! The history comparison is what keeps deletions safe: an entry can only
//! be deleted on the far side if a previous cycle actually saw it, so an
//! empty history (a first run, a lost snapshot) can never wipe anything out.

use anyhow::Result;
use tracing::*;

use crate::tree::{Node, NodeKind};

/// Everything the dispatcher knows how to do.
///
/// The `Rename*` kinds are accepted by the dispatcher but no longer emitted
/// here - renames surface as create + delete, and the file-id shortcut turns
/// the transfer into a copy or a local rename when the content is known.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ActionKind {
    CreateCloudFolder,
    CreateLocalFolder,
    UploadFile,
    DeleteCloudFile,
    DeleteLocalFile,
    DeleteCloudFolder,
    DeleteLocalFolder,
    UpdateCloudFile,
    UpdateLocalFile,
    RenameCloudFile,
    RenameLocalFile,
    DownloadFile,
    RenameCloudFolder,
    RenameLocalFolder,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    /// Source path (or the sole target for deletions).
    pub from: String,
    /// Destination path for transfers, creations, and renames.
    pub to: Option<String>,
    /// Content identity of the file involved, when known.
    /// Lets the dispatcher try its dedup shortcuts.
    pub file_id: Option<String>,
}

/// Where emitted actions go. The dispatcher is the real consumer;
/// a `Vec<Action>` collects emissions for inspection.
pub trait Sink {
    fn emit(&mut self, action: Action) -> Result<()>;
}

impl Sink for Vec<Action> {
    fn emit(&mut self, action: Action) -> Result<()> {
        self.push(action);
        Ok(())
    }
}

/// Maps a path on one side to its twin on the other by swapping prefixes.
fn mirror(name: &str, from_prefix: &str, to_prefix: &str) -> String {
    debug_assert!(name.starts_with(from_prefix));
    format!("{to_prefix}{}", &name[from_prefix.len()..])
}

fn id_hint(node: &Node) -> Option<String> {
    (!node.file_id.is_empty()).then(|| node.file_id.clone())
}

/// True if the far side's tree already holds this content at the mirrored
/// path, making an update a no-op we can skip. Without the far tree
/// (first cycle, tests) we can't tell, so don't skip.
fn already_mirrored(far: Option<&Node>, mirrored: &str, file_id: &str) -> bool {
    far.and_then(|f| f.find(mirrored))
        .is_some_and(|n| n.file_id == file_id)
}

/// True if the far side's tree demonstrably lacks the mirrored path.
///
/// A directory can be in history yet missing over there: its creation
/// collided with an old entry of the other kind, which the deletion sweep
/// only cleared afterwards. Spotting the hole is what gets the creation
/// re-emitted instead of silently recursing forever.
fn far_missing(far: Option<&Node>, mirrored: &str) -> bool {
    far.is_some_and(|f| f.find(mirrored).is_none())
}

/// Guards against a history snapshot rooted somewhere else entirely
/// (say, after a config change). Better to treat everything as new
/// than to mis-mirror paths.
fn usable_history<'a>(current: &Node, history: &'a Node) -> Option<&'a Node> {
    if current.name == history.name {
        Some(history)
    } else {
        warn!(
            "History is rooted at {} but the tree at {}; ignoring it this cycle",
            history.name, current.name
        );
        None
    }
}

/// The cloud-to-local pass: download or create what's new in the bucket,
/// update what changed there, delete locally what disappeared from it.
///
/// `local_last` is the most recently built local tree, if any - consulted
/// only to skip updates the local side has already caught up with.
pub fn pull(
    cloud: &Node,
    cloud_history: &Node,
    local_last: Option<&Node>,
    cloud_prefix: &str,
    local_prefix: &str,
    sink: &mut dyn Sink,
) -> Result<()> {
    pull_level(
        cloud,
        usable_history(cloud, cloud_history),
        local_last,
        cloud_prefix,
        local_prefix,
        sink,
    )
}

fn pull_level(
    cloud: &Node,
    history: Option<&Node>,
    local_last: Option<&Node>,
    cloud_prefix: &str,
    local_prefix: &str,
    sink: &mut dyn Sink,
) -> Result<()> {
    let Some(children) = cloud.children() else {
        return Ok(());
    };
    for child in children.values() {
        let local_name = mirror(&child.name, cloud_prefix, local_prefix);
        let history_node = history.and_then(|h| h.find(&child.name));
        trace!("Pull: considering {}", child.name);
        match child.kind() {
            NodeKind::Directory => match history_node {
                // Seen before and present locally:
                // only its contents can have changed.
                Some(_) if !far_missing(local_last, &local_name) => pull_level(
                    child,
                    history_node,
                    local_last,
                    cloud_prefix,
                    local_prefix,
                    sink,
                )?,
                _ => sink.emit(Action {
                    kind: ActionKind::CreateLocalFolder,
                    from: child.name.clone(),
                    to: Some(local_name),
                    file_id: None,
                })?,
            },
            NodeKind::File => match history_node {
                None => sink.emit(Action {
                    kind: ActionKind::DownloadFile,
                    from: child.name.clone(),
                    to: Some(local_name),
                    file_id: id_hint(child),
                })?,
                // Changed in the bucket since we last looked, and the
                // bucket's copy is newer than what history remembers: the
                // local side loses. Older-or-equal mtimes are left alone;
                // the push pass (or the next cycle) settles those.
                Some(h) if h.mtime < child.mtime && h.file_id != child.file_id => {
                    if already_mirrored(local_last, &local_name, &child.file_id) {
                        trace!("{local_name} already matches {}", child.name);
                    } else {
                        sink.emit(Action {
                            kind: ActionKind::UpdateLocalFile,
                            from: child.name.clone(),
                            to: Some(local_name),
                            file_id: id_hint(child),
                        })?
                    }
                }
                Some(_) => {}
            },
        }
    }

    // Deletion sweep: anything history remembers at this level that the
    // bucket no longer has was deleted remotely, so delete it locally too.
    let Some(history) = history else {
        return Ok(());
    };
    let Some(history_children) = history.children() else {
        return Ok(());
    };
    for gone in history_children.values() {
        if children.contains_key(&gone.name) {
            continue;
        }
        let local_name = mirror(&gone.name, cloud_prefix, local_prefix);
        let kind = match gone.kind() {
            NodeKind::Directory => ActionKind::DeleteLocalFolder,
            NodeKind::File => ActionKind::DeleteLocalFile,
        };
        sink.emit(Action {
            kind,
            from: local_name,
            to: None,
            file_id: None,
        })?;
    }
    Ok(())
}

/// The local-to-cloud pass: upload or create what's new locally,
/// update what changed here, delete from the bucket what disappeared here.
///
/// `cloud_current` is the cloud tree built at the start of this cycle -
/// after a pull materialized a remote change locally, it's what tells this
/// pass not to echo the same contents straight back.
pub fn push(
    local: &Node,
    local_history: &Node,
    cloud_current: Option<&Node>,
    cloud_prefix: &str,
    local_prefix: &str,
    sink: &mut dyn Sink,
) -> Result<()> {
    push_level(
        local,
        usable_history(local, local_history),
        cloud_current,
        cloud_prefix,
        local_prefix,
        sink,
    )
}

fn push_level(
    local: &Node,
    history: Option<&Node>,
    cloud_current: Option<&Node>,
    cloud_prefix: &str,
    local_prefix: &str,
    sink: &mut dyn Sink,
) -> Result<()> {
    let Some(children) = local.children() else {
        return Ok(());
    };
    for child in children.values() {
        let cloud_name = mirror(&child.name, local_prefix, cloud_prefix);
        let history_node = history.and_then(|h| h.find(&child.name));
        trace!("Push: considering {}", child.name);
        match child.kind() {
            NodeKind::Directory => match history_node {
                Some(_) if !far_missing(cloud_current, &cloud_name) => push_level(
                    child,
                    history_node,
                    cloud_current,
                    cloud_prefix,
                    local_prefix,
                    sink,
                )?,
                _ => sink.emit(Action {
                    kind: ActionKind::CreateCloudFolder,
                    from: child.name.clone(),
                    to: Some(cloud_name),
                    file_id: None,
                })?,
            },
            NodeKind::File => match history_node {
                None => sink.emit(Action {
                    kind: ActionKind::UploadFile,
                    from: child.name.clone(),
                    to: Some(cloud_name),
                    file_id: id_hint(child),
                })?,
                Some(h) if h.mtime < child.mtime && h.file_id != child.file_id => {
                    if already_mirrored(cloud_current, &cloud_name, &child.file_id) {
                        trace!("{cloud_name} already matches {}", child.name);
                    } else {
                        sink.emit(Action {
                            kind: ActionKind::UpdateCloudFile,
                            from: child.name.clone(),
                            to: Some(cloud_name),
                            file_id: id_hint(child),
                        })?
                    }
                }
                Some(_) => {}
            },
        }
    }

    let Some(history) = history else {
        return Ok(());
    };
    let Some(history_children) = history.children() else {
        return Ok(());
    };
    for gone in history_children.values() {
        if children.contains_key(&gone.name) {
            continue;
        }
        let cloud_name = mirror(&gone.name, local_prefix, cloud_prefix);
        let kind = match gone.kind() {
            NodeKind::Directory => ActionKind::DeleteCloudFolder,
            NodeKind::File => ActionKind::DeleteCloudFile,
        };
        sink.emit(Action {
            kind,
            from: cloud_name,
            to: None,
            file_id: None,
        })?;
    }
    Ok(())
}

//! Executes the actions the reconciliation engine emits
//!
//! Between the scan that produced an action and the moment it runs, either
//! side may have changed under us, so every handler re-checks its
//! pre-condition and quietly stands down if the world moved on. Nothing a
//! handler hits is allowed to abort the cycle - failures are logged and the
//! next cycle's scan picks the difference up again.

use std::collections::BTreeSet;
use std::fs;

use anyhow::{anyhow, Context, Result};
use camino::Utf8Path;
use tracing::*;

use crate::backend::ObjectStore;
use crate::reconcile::{Action, ActionKind, Sink};
use crate::tree::FileIndex;

pub struct Dispatcher<'a> {
    store: &'a dyn ObjectStore,
    /// file id -> paths in the last-built local tree,
    /// for turning downloads into renames.
    local_index: &'a FileIndex,
    /// file id -> paths in the current cloud tree,
    /// for turning uploads into server-side copies.
    cloud_index: &'a FileIndex,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        local_index: &'a FileIndex,
        cloud_index: &'a FileIndex,
    ) -> Self {
        Self {
            store,
            local_index,
            cloud_index,
        }
    }

    fn execute(&self, action: Action) -> Result<()> {
        let Action {
            kind,
            from,
            to,
            file_id,
        } = action;
        // Transfers, creations, and renames name both ends; deletions don't.
        let to = match kind {
            ActionKind::DeleteCloudFile
            | ActionKind::DeleteLocalFile
            | ActionKind::DeleteCloudFolder
            | ActionKind::DeleteLocalFolder => String::new(),
            _ => to.ok_or_else(|| anyhow!("{kind:?} needs a destination"))?,
        };
        let hint = file_id.as_deref();

        match kind {
            ActionKind::CreateCloudFolder => self.create_cloud_folder(&from, &to),
            ActionKind::CreateLocalFolder => self.create_local_folder(&from, &to),
            ActionKind::UploadFile => self.upload_file(&from, &to, hint),
            ActionKind::DeleteCloudFile => self.delete_cloud_file(&from),
            ActionKind::DeleteLocalFile => self.delete_local_file(&from),
            ActionKind::DeleteCloudFolder => self.delete_cloud_folder(&from),
            ActionKind::DeleteLocalFolder => self.delete_local_folder(&from),
            ActionKind::UpdateCloudFile => self.update_cloud_file(&from, &to, hint),
            ActionKind::UpdateLocalFile => self.update_local_file(&from, &to, hint),
            ActionKind::RenameCloudFile => self.rename_cloud(&from, &to),
            ActionKind::RenameLocalFile => self.rename_local(&from, &to),
            ActionKind::DownloadFile => self.download_file(&from, &to, hint),
            ActionKind::RenameCloudFolder => self.rename_cloud(&from, &to),
            ActionKind::RenameLocalFolder => self.rename_local(&from, &to),
        }
    }

    /// Mirrors the local directory `from` (and everything in it) to the
    /// bucket at `to`, walking the live local listing.
    fn create_cloud_folder(&self, from: &str, to: &str) -> Result<()> {
        if !Utf8Path::new(from).exists() {
            warn!("{from} is already gone; not creating {to}");
            return Ok(());
        }
        if self.store.stat(to)?.is_some() {
            warn!("{to} already exists; leaving it be");
            return Ok(());
        }
        info!("Creating {to} from {from}");
        self.store.create_folder(to)?;
        for name in sorted_dir_names(from)? {
            let src = format!("{from}{name}");
            if name.ends_with('/') {
                self.create_cloud_folder(&src, &format!("{to}{name}"))?;
            } else {
                self.upload_file(&src, &format!("{to}{name}"), None)?;
            }
        }
        Ok(())
    }

    /// Mirrors the bucket directory `from` (and everything in it) to the
    /// local side at `to`, walking the live cloud listing.
    fn create_local_folder(&self, from: &str, to: &str) -> Result<()> {
        if self.store.stat(from)?.is_none() {
            warn!("{from} is already gone; not creating {to}");
            return Ok(());
        }
        if Utf8Path::new(to).exists() {
            warn!("{to} already exists; leaving it be");
            return Ok(());
        }
        info!("Creating {to} from {from}");
        fs::create_dir(to).with_context(|| format!("Couldn't create {to}"))?;
        let mut names = self.store.list(from)?;
        names.sort();
        for name in names {
            let src = format!("{from}{name}");
            if name.ends_with('/') {
                self.create_local_folder(&src, &format!("{to}{name}"))?;
            } else {
                self.download_file(&src, &format!("{to}{name}"), None)?;
            }
        }
        Ok(())
    }

    fn upload_file(&self, from: &str, to: &str, hint: Option<&str>) -> Result<()> {
        if !Utf8Path::new(from).exists() {
            warn!("{from} is already gone; not uploading");
            return Ok(());
        }
        if self.store.stat(to)?.is_some() {
            warn!("{to} already exists; not uploading over it");
            return Ok(());
        }
        if self.try_cloud_copy(to, hint) {
            return Ok(());
        }
        info!("Uploading {from} to {to}");
        self.store.upload(to, Utf8Path::new(from))
    }

    fn download_file(&self, from: &str, to: &str, hint: Option<&str>) -> Result<()> {
        if self.store.stat(from)?.is_none() {
            warn!("{from} is already gone; not downloading");
            return Ok(());
        }
        if Utf8Path::new(to).exists() {
            warn!("{to} already exists; not downloading over it");
            return Ok(());
        }
        if self.try_local_rename(to, hint) {
            return Ok(());
        }
        info!("Downloading {from} to {to}");
        self.store.download(from, Utf8Path::new(to))
    }

    fn update_cloud_file(&self, from: &str, to: &str, hint: Option<&str>) -> Result<()> {
        if self.try_cloud_copy(to, hint) {
            return Ok(());
        }
        info!("Updating {to} from {from}");
        // update() is itself a no-op if the object vanished.
        self.store.update(to, Utf8Path::new(from))
    }

    fn update_local_file(&self, from: &str, to: &str, hint: Option<&str>) -> Result<()> {
        if self.try_local_rename(to, hint) {
            return Ok(());
        }
        info!("Updating {to} from {from}");
        self.store.download(from, Utf8Path::new(to))
    }

    fn delete_cloud_file(&self, path: &str) -> Result<()> {
        if self.store.stat(path)?.is_none() {
            warn!("{path} is already gone; nothing to delete");
            return Ok(());
        }
        info!("Deleting {path}");
        self.store.delete(path)
    }

    fn delete_local_file(&self, path: &str) -> Result<()> {
        // is_file(), not exists(): if a directory took the name over,
        // the file this action targeted is gone and the directory isn't ours
        // to touch.
        if !Utf8Path::new(path).is_file() {
            warn!("{path} is already gone; nothing to delete");
            return Ok(());
        }
        info!("Deleting {path}");
        fs::remove_file(path).with_context(|| format!("Couldn't remove {path}"))
    }

    /// Removes a bucket directory: children first (from the live listing),
    /// then the marker itself.
    fn delete_cloud_folder(&self, path: &str) -> Result<()> {
        if self.store.stat(path)?.is_none() {
            warn!("{path} is already gone; nothing to delete");
            return Ok(());
        }
        info!("Deleting {path}");
        let mut names = self.store.list(path)?;
        names.sort();
        for name in names {
            let child = format!("{path}{name}");
            if name.ends_with('/') {
                self.delete_cloud_folder(&child)?;
            } else {
                self.store.delete(&child)?;
            }
        }
        self.store.delete(path)
    }

    fn delete_local_folder(&self, path: &str) -> Result<()> {
        if !Utf8Path::new(path).is_dir() {
            warn!("{path} is already gone; nothing to delete");
            return Ok(());
        }
        info!("Deleting {path}");
        fs::remove_dir_all(path).with_context(|| format!("Couldn't remove {path}"))
    }

    fn rename_cloud(&self, from: &str, to: &str) -> Result<()> {
        if self.store.stat(from)?.is_none() {
            warn!("{from} is already gone; not renaming");
            return Ok(());
        }
        if self.store.stat(to)?.is_some() {
            warn!("{to} already exists; not renaming over it");
            return Ok(());
        }
        info!("Renaming {from} to {to}");
        self.store.rename(from, to)
    }

    fn rename_local(&self, from: &str, to: &str) -> Result<()> {
        if !Utf8Path::new(from).exists() {
            warn!("{from} is already gone; not renaming");
            return Ok(());
        }
        if Utf8Path::new(to).exists() {
            warn!("{to} already exists; not renaming over it");
            return Ok(());
        }
        info!("Renaming {from} to {to}");
        fs::rename(from, to).with_context(|| format!("Couldn't rename {from} to {to}"))
    }

    /// Identical content already in the bucket? Server-side copy it to `to`
    /// instead of shipping bytes. Returns whether that worked.
    fn try_cloud_copy(&self, to: &str, hint: Option<&str>) -> bool {
        let Some(candidates) = hint.and_then(|id| self.cloud_index.get(id)) else {
            return false;
        };
        for candidate in candidates {
            match self.store.copy(candidate, to) {
                Ok(()) => {
                    info!("Copied {candidate} to {to} instead of uploading");
                    return true;
                }
                Err(e) => debug!("Couldn't copy {candidate} to {to}: {e:#}"),
            }
        }
        false
    }

    /// Identical content already on disk? Rename it into place instead of
    /// downloading. Returns whether that worked.
    fn try_local_rename(&self, to: &str, hint: Option<&str>) -> bool {
        let Some(candidates) = hint.and_then(|id| self.local_index.get(id)) else {
            return false;
        };
        for candidate in candidates {
            match fs::rename(candidate, to) {
                Ok(()) => {
                    info!("Renamed {candidate} to {to} instead of downloading");
                    return true;
                }
                Err(e) => debug!("Couldn't rename {candidate} to {to}: {e}"),
            }
        }
        false
    }
}

impl Sink for Dispatcher<'_> {
    fn emit(&mut self, action: Action) -> Result<()> {
        let kind = action.kind;
        let target = action.from.clone();
        debug!("Dispatching {kind:?} for {target}");
        // Swallow everything: a failed action leaves the trees differing,
        // so the next cycle re-emits it.
        if let Err(e) = self.execute(action) {
            warn!("{kind:?} for {target} failed: {e:#}");
        }
        Ok(())
    }
}

fn sorted_dir_names(path: &str) -> Result<Vec<String>> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(path).with_context(|| format!("Couldn't list {path}"))? {
        let entry = entry.with_context(|| format!("Couldn't list {path}"))?;
        let name = match entry.file_name().into_string() {
            Ok(n) => n,
            Err(n) => {
                warn!("Skipping non-UTF-8 name {:?} in {path}", n);
                continue;
            }
        };
        if entry.file_type()?.is_dir() {
            names.insert(format!("{name}/"));
        } else {
            names.insert(name);
        }
    }
    Ok(names.into_iter().collect())
}

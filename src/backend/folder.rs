//! A second local directory acting as the bucket.
//!
//! Objects are real files under the base directory; the three custom
//! attributes live in a JSON sidecar at the store root. It's both the
//! "filesystem as a bucket" provider and the double the tests sync against.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::sync::Mutex;

use anyhow::{bail, ensure, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::*;

use super::{mint_uuid, now, ObjectStat, ObjectStore};
use crate::file_util;
use crate::hashing;

/// Attribute sidecar, kept out of listings.
const ATTRS_FILE: &str = ".attributes.json";

pub struct FolderStore {
    base: Utf8PathBuf,
    attrs: Mutex<AttrDb>,
}

/// path -> attributes for every object in the store.
///
/// Saved after every mutation; a torn write isn't fatal since stat()
/// self-heals whatever goes missing.
struct AttrDb {
    path: Utf8PathBuf,
    map: BTreeMap<String, ObjectStat>,
}

impl AttrDb {
    fn load(path: Utf8PathBuf) -> Result<Self> {
        let map = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Couldn't parse {path}"))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e).with_context(|| format!("Couldn't read {path}")),
        };
        Ok(Self { path, map })
    }

    fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.map)?;
        fs::write(&self.path, bytes).with_context(|| format!("Couldn't write {}", self.path))
    }
}

impl FolderStore {
    pub fn open(base: &Utf8Path) -> Result<Self> {
        ensure!(base.is_dir(), "The directory {base} doesn't exist");
        let attrs = AttrDb::load(base.join(ATTRS_FILE))?;
        Ok(Self {
            base: base.to_owned(),
            attrs: Mutex::new(attrs),
        })
    }

    /// Where the object with the given key lives on disk.
    fn object_path(&self, key: &str) -> Utf8PathBuf {
        self.base.join(key.trim_end_matches('/'))
    }

    fn put_attrs(&self, key: &str, stat: ObjectStat) -> Result<()> {
        let mut attrs = self.attrs.lock().unwrap();
        attrs.map.insert(key.to_owned(), stat);
        attrs.save()
    }

    fn take_attrs(&self, key: &str) -> Result<Option<ObjectStat>> {
        let mut attrs = self.attrs.lock().unwrap();
        let taken = attrs.map.remove(key);
        attrs.save()?;
        Ok(taken)
    }
}

impl ObjectStore for FolderStore {
    fn list(&self, path: &str) -> Result<Vec<String>> {
        ensure!(path.ends_with('/'), "Can only list directories: {path}");
        let dir = self.object_path(path);
        let mut names = BTreeSet::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("No such prefix {path}"))? {
            let entry = entry.with_context(|| format!("Couldn't list {dir}"))?;
            let name = match entry.file_name().into_string() {
                Ok(n) => n,
                Err(n) => {
                    warn!("Skipping non-UTF-8 name {:?} in {dir}", n);
                    continue;
                }
            };
            if name == ATTRS_FILE {
                continue;
            }
            if entry.file_type()?.is_dir() {
                names.insert(format!("{name}/"));
            } else {
                names.insert(name);
            }
        }
        Ok(names.into_iter().collect())
    }

    fn stat(&self, path: &str) -> Result<Option<ObjectStat>> {
        let disk = self.object_path(path);
        let meta = match fs::metadata(&disk) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Drop any attribute record the object left behind.
                self.take_attrs(path)?;
                return Ok(None);
            }
            Err(e) => return Err(e).with_context(|| format!("Couldn't stat {path}")),
        };
        let is_dir = path.ends_with('/');
        if meta.is_dir() != is_dir {
            // Same stem, other kind - as far as this key is concerned, absent.
            return Ok(None);
        }

        let recorded = self.attrs.lock().unwrap().map.get(path).cloned();
        let mut stat = recorded.unwrap_or(ObjectStat {
            hash: String::new(),
            mtime: 0,
            uuid: String::new(),
        });

        // Self-heal: mint whatever's missing and write it back.
        let mut healed = false;
        if stat.hash.is_empty() {
            stat.hash = if is_dir {
                hashing::ContentHash::hash(b"").to_string()
            } else {
                hashing::hash_remote_file(self, path)?.to_string()
            };
            healed = true;
        }
        if stat.mtime == 0 {
            stat.mtime = now();
            healed = true;
        }
        if stat.uuid.is_empty() {
            stat.uuid = mint_uuid();
            healed = true;
        }
        if healed {
            debug!("Healed attributes of {path}");
            self.set_stat(path, &stat)?;
        }
        Ok(Some(stat))
    }

    fn upload(&self, remote: &str, local: &Utf8Path) -> Result<()> {
        if remote.ends_with('/') {
            return self.create_folder(remote);
        }
        let hash = hashing::hash_file(local)?;
        let disk = self.object_path(remote);
        if let Some(parent) = disk.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Couldn't create {parent}"))?;
        }
        file_util::copy_file(local, &disk)?;
        self.put_attrs(
            remote,
            ObjectStat {
                hash: hash.to_string(),
                mtime: now(),
                uuid: mint_uuid(),
            },
        )
    }

    fn update(&self, remote: &str, local: &Utf8Path) -> Result<()> {
        let Some(existing) = self.stat(remote)? else {
            debug!("Nothing at {remote} to update");
            return Ok(());
        };
        let hash = hashing::hash_file(local)?;
        file_util::copy_file(local, &self.object_path(remote))?;
        self.put_attrs(
            remote,
            ObjectStat {
                hash: hash.to_string(),
                mtime: now(),
                uuid: existing.uuid,
            },
        )
    }

    fn download(&self, remote: &str, local: &Utf8Path) -> Result<()> {
        ensure!(!remote.ends_with('/'), "Can't download a directory: {remote}");
        file_util::copy_file(&self.object_path(remote), local)
            .with_context(|| format!("Couldn't download {remote}"))
    }

    fn delete(&self, path: &str) -> Result<()> {
        let disk = self.object_path(path);
        if path.ends_with('/') {
            fs::remove_dir(&disk).with_context(|| format!("Couldn't remove {path}"))?;
        } else {
            fs::remove_file(&disk).with_context(|| format!("Couldn't remove {path}"))?;
        }
        self.take_attrs(path)?;
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        if old.ends_with('/') {
            ensure!(new.ends_with('/'), "Can't rename directory {old} to file {new}");
            for child in self.list(old)? {
                self.rename(&format!("{old}{child}"), &format!("{new}{child}"))?;
            }
            // Children are out; move the marker itself.
            fs::create_dir_all(self.object_path(new))
                .with_context(|| format!("Couldn't create {new}"))?;
            fs::remove_dir(self.object_path(old))
                .with_context(|| format!("Couldn't remove {old}"))?;
        } else {
            let to = self.object_path(new);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).with_context(|| format!("Couldn't create {parent}"))?;
            }
            fs::rename(self.object_path(old), &to)
                .with_context(|| format!("Couldn't rename {old} to {new}"))?;
        }
        if let Some(mut stat) = self.take_attrs(old)? {
            stat.mtime = now();
            self.put_attrs(new, stat)?;
        }
        Ok(())
    }

    fn copy(&self, src: &str, dst: &str) -> Result<()> {
        ensure!(
            !src.ends_with('/') && !dst.ends_with('/'),
            "Can only copy files: {src} -> {dst}"
        );
        let Some(stat) = self.stat(src)? else {
            bail!("Nothing at {src} to copy");
        };
        let to = self.object_path(dst);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Couldn't create {parent}"))?;
        }
        file_util::copy_file(&self.object_path(src), &to)?;
        self.put_attrs(
            dst,
            ObjectStat {
                hash: stat.hash,
                mtime: now(),
                uuid: stat.uuid,
            },
        )
    }

    fn create_folder(&self, path: &str) -> Result<()> {
        ensure!(path.ends_with('/'), "Directory paths end with a slash: {path}");
        fs::create_dir_all(self.object_path(path))
            .with_context(|| format!("Couldn't create {path}"))?;
        self.put_attrs(
            path,
            ObjectStat {
                hash: hashing::ContentHash::hash(b"").to_string(),
                mtime: now(),
                uuid: mint_uuid(),
            },
        )
    }

    fn set_stat(&self, path: &str, stat: &ObjectStat) -> Result<()> {
        self.put_attrs(path, stat.clone())
    }
}

//! A store that keeps everything as path-addressed buffers.
//!
//! Great for testing

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::Mutex;

use anyhow::{anyhow, bail, ensure, Context, Result};
use camino::Utf8Path;

use super::{mint_uuid, now, ObjectStat, ObjectStore};
use crate::file_util;
use crate::hashing::ContentHash;

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Object contents; directory markers are empty buffers at keys ending `/`.
    objects: BTreeMap<String, Vec<u8>>,
    stats: BTreeMap<String, ObjectStat>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemoryStore {
    fn list(&self, path: &str) -> Result<Vec<String>> {
        ensure!(path.ends_with('/'), "Can only list directories: {path}");
        let inner = self.inner.lock().unwrap();
        let mut names = BTreeSet::new();
        let mut found_any = false;
        for key in inner.objects.keys() {
            let Some(rest) = key.strip_prefix(path) else {
                continue;
            };
            found_any = true;
            if rest.is_empty() {
                // The marker for `path` itself.
                continue;
            }
            match rest.split_once('/') {
                // A direct child file.
                None => {
                    names.insert(rest.to_owned());
                }
                // A child directory (its own marker, or something deeper in it).
                Some((head, _)) => {
                    names.insert(format!("{head}/"));
                }
            }
        }
        if !found_any {
            bail!("No such prefix {path}");
        }
        Ok(names.into_iter().collect())
    }

    fn stat(&self, path: &str) -> Result<Option<ObjectStat>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(bytes) = inner.objects.get(path) else {
            return Ok(None);
        };
        let mut stat = inner.stats.get(path).cloned().unwrap_or(ObjectStat {
            hash: String::new(),
            mtime: 0,
            uuid: String::new(),
        });
        let mut healed = false;
        if stat.hash.is_empty() {
            stat.hash = ContentHash::hash(bytes).to_string();
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
            inner.stats.insert(path.to_owned(), stat.clone());
        }
        Ok(Some(stat))
    }

    fn upload(&self, remote: &str, local: &Utf8Path) -> Result<()> {
        if remote.ends_with('/') {
            return self.create_folder(remote);
        }
        let bytes = fs::read(local).with_context(|| format!("Couldn't read {local}"))?;
        let stat = ObjectStat {
            hash: ContentHash::hash(&bytes).to_string(),
            mtime: now(),
            uuid: mint_uuid(),
        };
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(remote.to_owned(), bytes);
        inner.stats.insert(remote.to_owned(), stat);
        Ok(())
    }

    fn update(&self, remote: &str, local: &Utf8Path) -> Result<()> {
        let Some(existing) = self.stat(remote)? else {
            return Ok(());
        };
        let bytes = fs::read(local).with_context(|| format!("Couldn't read {local}"))?;
        let stat = ObjectStat {
            hash: ContentHash::hash(&bytes).to_string(),
            mtime: now(),
            uuid: existing.uuid,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(remote.to_owned(), bytes);
        inner.stats.insert(remote.to_owned(), stat);
        Ok(())
    }

    fn download(&self, remote: &str, local: &Utf8Path) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let bytes = inner
            .objects
            .get(remote)
            .ok_or_else(|| anyhow!("No object {remote}"))?;
        file_util::safe_copy_to_file(bytes.as_slice(), local)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .objects
            .remove(path)
            .ok_or_else(|| anyhow!("No object {path}"))?;
        inner.stats.remove(path);
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        if old.ends_with('/') {
            ensure!(new.ends_with('/'), "Can't rename directory {old} to file {new}");
            for child in self.list(old)? {
                self.rename(&format!("{old}{child}"), &format!("{new}{child}"))?;
            }
        }
        let mut inner = self.inner.lock().unwrap();
        match inner.objects.remove(old) {
            Some(bytes) => {
                inner.objects.insert(new.to_owned(), bytes);
            }
            // A directory listed into existence by its children has no marker.
            None if old.ends_with('/') => {}
            None => bail!("No object {old}"),
        }
        if let Some(mut stat) = inner.stats.remove(old) {
            stat.mtime = now();
            inner.stats.insert(new.to_owned(), stat);
        }
        Ok(())
    }

    fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let Some(stat) = self.stat(src)? else {
            bail!("Nothing at {src} to copy");
        };
        let mut inner = self.inner.lock().unwrap();
        let bytes = inner
            .objects
            .get(src)
            .ok_or_else(|| anyhow!("No object {src}"))?
            .clone();
        inner.objects.insert(dst.to_owned(), bytes);
        inner.stats.insert(
            dst.to_owned(),
            ObjectStat {
                hash: stat.hash,
                mtime: now(),
                uuid: stat.uuid,
            },
        );
        Ok(())
    }

    fn create_folder(&self, path: &str) -> Result<()> {
        ensure!(path.ends_with('/'), "Directory paths end with a slash: {path}");
        let stat = ObjectStat {
            hash: ContentHash::hash(b"").to_string(),
            mtime: now(),
            uuid: mint_uuid(),
        };
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(path.to_owned(), Vec::new());
        inner.stats.insert(path.to_owned(), stat);
        Ok(())
    }

    fn set_stat(&self, path: &str, stat: &ObjectStat) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.insert(path.to_owned(), stat.clone());
        Ok(())
    }
}

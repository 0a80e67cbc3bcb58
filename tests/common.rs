#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

use bucketsync::backend::folder::FolderStore;
use bucketsync::sync::Synchronizer;

pub const CLOUD_PREFIX: &str = "mirror/";

/// A sync pair in a temp directory: `local/` on one side,
/// a folder store under `bucket/` on the other.
pub struct Sandbox {
    pub tempdir: tempfile::TempDir,
    pub local_root: String,
    pub bucket_dir: Utf8PathBuf,
    pub history: Utf8PathBuf,
    pub store: FolderStore,
}

impl Sandbox {
    pub fn new() -> Result<Sandbox> {
        let tempdir = tempfile::tempdir()?;
        let base = Utf8PathBuf::try_from(tempdir.path().to_owned())?;
        let local = base.join("local");
        fs::create_dir(&local)?;
        let bucket_dir = base.join("bucket");
        fs::create_dir(&bucket_dir)?;
        let store = FolderStore::open(&bucket_dir)?;
        Ok(Sandbox {
            tempdir,
            local_root: format!("{local}/"),
            bucket_dir,
            history: base.join("test.history"),
            store,
        })
    }

    pub fn synchronizer(&self) -> Result<Synchronizer<'_>> {
        Synchronizer::new(&self.store, &self.local_root, CLOUD_PREFIX, &self.history)
    }

    pub fn local_path(&self, rel: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}{rel}", self.local_root))
    }

    pub fn write_local(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.local_path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// A file outside both sync roots, for seeding the store directly.
    pub fn scratch_file(&self, name: &str, contents: &str) -> Result<Utf8PathBuf> {
        let base = Utf8PathBuf::try_from(self.tempdir.path().to_owned())?;
        let path = base.join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Relative path -> contents for every file on the local side.
    pub fn local_files(&self) -> BTreeMap<String, String> {
        files_under(Utf8Path::new(&self.local_root))
    }

    /// Relative path -> contents for every object under the bucket prefix.
    pub fn bucket_files(&self) -> BTreeMap<String, String> {
        files_under(&self.bucket_dir.join(CLOUD_PREFIX.trim_end_matches('/')))
    }
}

fn files_under(root: &Utf8Path) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    if !root.exists() {
        return files;
    }
    for entry in WalkDir::new(root) {
        let entry = entry.expect("couldn't walk dir");
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let contents = fs::read_to_string(entry.path()).expect("couldn't read file");
        files.insert(rel, contents);
    }
    files
}

//! Object stores we can sync against - a local directory acting as a bucket,
//! (eventually) cloud hosts.
//!
//! Every object carries three custom attributes: its content hash,
//! its modification time, and a provider-independent UUID minted on first
//! upload. [`ObjectStore::stat`] self-heals any attribute that's gone
//! missing, so after one full scan every object in the bucket has all three.

use anyhow::{anyhow, Result};
use camino::Utf8Path;
use serde_derive::{Deserialize, Serialize};
use tracing::*;

use crate::config;

pub mod folder;
pub mod memory;

/// The custom attributes attached to every remote object.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ObjectStat {
    /// Content hash, lowercase hex. Directories hash the empty string.
    pub hash: String,
    /// Modification time, transported as decimal seconds since the epoch.
    #[serde(with = "decimal_seconds")]
    pub mtime: i64,
    /// Minted on first upload, preserved across updates.
    pub uuid: String,
}

/// Wall-clock seconds since the epoch, as stamped on uploaded objects.
pub fn now() -> i64 {
    jiff::Timestamp::now().as_second()
}

pub fn mint_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A bucket (or something bucket-shaped) holding one side of the sync.
///
/// All operations block, and paths follow the tree convention:
/// a directory's path ends with `/`, a file's doesn't. A directory exists
/// remotely as an empty marker object whose key has the trailing slash.
pub trait ObjectStore: Send + Sync {
    /// Lists the immediate children of the given directory path.
    /// Child directory names end with `/`. Fails if the prefix doesn't exist.
    fn list(&self, path: &str) -> Result<Vec<String>>;

    /// Returns the object's attributes, or `Ok(None)` if it doesn't exist.
    /// Transport failures are errors - absence never is.
    ///
    /// Missing attributes are computed (or minted), written back to the
    /// object, and returned as part of the completed record.
    fn stat(&self, path: &str) -> Result<Option<ObjectStat>>;

    /// Uploads a new object: fresh hash, mtime of now, and a new UUID.
    fn upload(&self, remote: &str, local: &Utf8Path) -> Result<()>;

    /// Overwrites an existing object's contents: fresh hash, mtime of now,
    /// but the *existing* UUID. Does nothing if the object is absent.
    fn update(&self, remote: &str, local: &Utf8Path) -> Result<()>;

    /// Fetches an object, writing the local file atomically
    /// (temp file, then rename into place).
    fn download(&self, remote: &str, local: &Utf8Path) -> Result<()>;

    /// Removes a single object. For a directory that's just the marker,
    /// not its contents.
    fn delete(&self, path: &str) -> Result<()>;

    /// Renames an object, setting a new mtime. The directory variant
    /// recurses over children first, then moves the marker.
    fn rename(&self, old: &str, new: &str) -> Result<()>;

    /// Server-side copy: keeps the source's hash and UUID, stamps a new mtime.
    fn copy(&self, src: &str, dst: &str) -> Result<()>;

    /// Creates an empty directory marker with a fresh set of attributes.
    fn create_folder(&self, path: &str) -> Result<()>;

    /// Overwrites the three custom attributes.
    fn set_stat(&self, path: &str, stat: &ObjectStat) -> Result<()>;
}

/// Opens the store a provider's configuration points at.
pub fn open(provider: &config::Provider) -> Result<Box<dyn ObjectStore>> {
    match provider.kind {
        config::ProviderKind::Folder => {
            let base = provider
                .store_path
                .as_deref()
                .ok_or_else(|| anyhow!("Folder providers need a store_path"))?;
            info!("Opening folder store at {base}");
            Ok(Box::new(folder::FolderStore::open(base)?))
        } // Cloud-provider SDK adapters slot in here behind the same trait.
    }
}

mod decimal_seconds {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stats_transport_mtime_as_decimal_string() -> Result<()> {
        let stat = ObjectStat {
            hash: "abc123".to_owned(),
            mtime: 1700000000,
            uuid: "some-uuid".to_owned(),
        };
        let json = serde_json::to_string(&stat)?;
        assert!(json.contains("\"1700000000\""));
        let back: ObjectStat = serde_json::from_str(&json)?;
        assert_eq!(stat, back);
        Ok(())
    }
}

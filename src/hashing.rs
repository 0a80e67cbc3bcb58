//! Tools for hashing file contents into a [`ContentHash`]
//!
//! A file's hash doubles as its identity for the reconciliation engine,
//! so both sides of the sync use the same algorithm (SHA-256, lowercase hex).

use std::fmt;
use std::fs::File;
use std::io;
use std::io::prelude::*;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use data_encoding::HEXLOWER;
use sha2::{digest::Output, Digest, Sha256};

use crate::backend::ObjectStore;

type Sha256Digest = Output<Sha256>;

/// The hash used to identify file contents on both sides of the sync.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ContentHash {
    digest: Sha256Digest,
}

impl ContentHash {
    /// Calculates the hash of the given bytes
    pub fn hash(bytes: &[u8]) -> Self {
        Self {
            digest: Sha256::digest(bytes),
        }
    }

    fn from_digest(digest: Sha256Digest) -> Self {
        Self { digest }
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ digest: {} }}", HEXLOWER.encode(&self.digest))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", HEXLOWER.encode(&self.digest))
    }
}

/// Wraps a reader, hashing everything read through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    pub fn finalize(self) -> (ContentHash, R) {
        (ContentHash::from_digest(self.hasher.finalize()), self.inner)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.hasher.update(&buf[..count]);
        Ok(count)
    }
}

/// Hashes the entire contents of the given local file.
pub fn hash_file(path: &Utf8Path) -> Result<ContentHash> {
    let fh = File::open(path).with_context(|| format!("Couldn't open {path}"))?;
    let mut reader = HashingReader::new(fh);
    io::copy(&mut reader, &mut io::sink())
        .with_context(|| format!("Couldn't read {path}"))?;
    Ok(reader.finalize().0)
}

/// Hashes a remote object by downloading it to a temporary file first.
///
/// Stores that don't serve object contents any other way (i.e., all of them)
/// use this when self-healing a missing hash attribute.
pub fn hash_remote_file(store: &dyn ObjectStore, path: &str) -> Result<ContentHash> {
    let temp = tempfile::NamedTempFile::new().context("Couldn't open temporary file")?;
    let temp_path = Utf8PathBuf::try_from(temp.path().to_owned())
        .context("Temporary directory isn't UTF-8")?;
    store
        .download(path, &temp_path)
        .with_context(|| format!("Couldn't fetch {path} to hash it"))?;
    hash_file(&temp_path)
}

#[cfg(test)]
mod test {
    use super::*;

    const DEVELOPERS: &[u8] = b"Developers, developers, developers, developers!".as_slice();

    const EXPECTED: &[u8] =
        &hex_literal::hex!("2cca07b57ec9bb130e3f1f6f1d7e5c3eb468a0fe1c4c4a7a9f0a331f51258069");

    #[test]
    fn smoke() {
        let id = ContentHash::hash(DEVELOPERS);
        assert_eq!(id.digest.as_slice(), EXPECTED);
    }

    #[test]
    fn reader() -> Result<()> {
        let mut r = HashingReader::new(DEVELOPERS);
        io::copy(&mut r, &mut io::sink())?;
        assert_eq!(r.finalize().0.digest.as_slice(), EXPECTED);
        Ok(())
    }

    #[test]
    fn empty_hash_is_stable() {
        assert_eq!(
            ContentHash::hash(b"").to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}

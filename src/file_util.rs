//! Utilities for writing files without leaving partial contents behind.

use std::fs::File;
use std::io;
use std::io::prelude::*;

use anyhow::{Context, Result};
use camino::Utf8Path;
use tracing::*;

/// Writes the reader's contents to `to` without ever exposing a partial
/// file: the bytes land in a temporary file next to the destination, which
/// only replaces it once everything has hit the disk.
pub fn safe_copy_to_file<R: Read>(mut from: R, to: &Utf8Path) -> Result<()> {
    let parent = to.parent().unwrap_or(Utf8Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".bucketsync-")
        .tempfile_in(parent)
        .with_context(|| format!("Couldn't open a temporary file in {parent}"))?;

    io::copy(&mut from, &mut temp).with_context(|| format!("Couldn't write {to}"))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("Couldn't sync {to}"))?;
    temp.persist(to)
        .with_context(|| format!("Couldn't move the finished copy onto {to}"))?;
    trace!("Wrote {to}");
    Ok(())
}

/// Opens `from` and copies it to `to` via [`safe_copy_to_file`].
pub fn copy_file(from: &Utf8Path, to: &Utf8Path) -> Result<()> {
    let fh = File::open(from).with_context(|| format!("Couldn't open {from}"))?;
    safe_copy_to_file(fh, to)
}

/// Modification time of a local file, in whole seconds since the epoch.
pub fn mtime(path: &Utf8Path) -> Result<i64> {
    let meta = std::fs::metadata(path).with_context(|| format!("Couldn't stat {path}"))?;
    let modified = meta
        .modified()
        .with_context(|| format!("No modification time for {path}"))?;
    let secs = modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(secs)
}

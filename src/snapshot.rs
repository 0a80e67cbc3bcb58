//! Read and write history snapshots - the "what we last saw" trees
//! consulted by the next reconciliation cycle.

use std::fs;
use std::io;
use std::io::prelude::*;

use anyhow::{ensure, Context, Result};
use camino::Utf8Path;
use tracing::*;

use crate::tree::Node;

const MAGIC_BYTES: &[u8] = b"BKSYNCH1";

/// Writes the tree to the given path, atomically replacing whatever's there.
pub fn save(tree: &Node, to: &Utf8Path) -> Result<()> {
    let parent = to.parent().unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("Couldn't create {parent}"))?;

    let mut fh = tempfile::Builder::new()
        .prefix("temp-bucketsync-")
        .suffix(".history")
        .tempfile_in(parent)
        .context("Couldn't open temporary snapshot for writing")?;

    fh.write_all(MAGIC_BYTES)?;
    ciborium::into_writer(tree, fh.as_file_mut()).context("Couldn't serialize snapshot")?;
    fh.as_file().sync_all()?;
    fh.persist(to)
        .with_context(|| format!("Couldn't persist snapshot to {to}"))?;
    debug!("Saved snapshot {to}");
    Ok(())
}

/// Loads the tree at the given path, or `Ok(None)` if there isn't one yet.
pub fn load(from: &Utf8Path) -> Result<Option<Node>> {
    let mut fh = match fs::File::open(from) {
        Ok(fh) => fh,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Couldn't open {from}")),
    };
    check_magic(&mut fh).with_context(|| format!("Wrong magic bytes for {from}"))?;
    let tree = ciborium::from_reader(&mut fh)
        .with_context(|| format!("CBOR decoding of {from} failed"))?;
    Ok(Some(tree))
}

fn check_magic<R: Read>(r: &mut R) -> Result<()> {
    let mut magic: [u8; 8] = [0; 8];
    r.read_exact(&mut magic)?;
    ensure!(
        magic == MAGIC_BYTES,
        "Expected magic bytes {}, found {}",
        String::from_utf8_lossy(MAGIC_BYTES),
        String::from_utf8_lossy(&magic)
    );
    Ok(())
}

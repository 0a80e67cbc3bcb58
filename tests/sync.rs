//! End-to-end cycles against a folder store standing in for the bucket.

use std::fs;

use anyhow::Result;

use bucketsync::backend::ObjectStore;

mod common;

use common::*;

#[test]
fn first_sync_converges_and_deletes_nothing() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_local("a.txt", "from local")?;
    sandbox.write_local("sub/deep.txt", "deeper")?;
    // And something that exists only in the bucket.
    let seed = sandbox.scratch_file("seed", "from bucket")?;
    sandbox.store.create_folder("mirror/")?;
    sandbox.store.upload("mirror/b.txt", &seed)?;

    let mut sync = sandbox.synchronizer()?;
    sync.cycle()?;

    // With no history, everything one-sided is new - both files survive
    // and cross over; nothing is deleted.
    let local = sandbox.local_files();
    assert_eq!(local, sandbox.bucket_files());
    assert_eq!(local["a.txt"], "from local");
    assert_eq!(local["b.txt"], "from bucket");
    assert_eq!(local["sub/deep.txt"], "deeper");

    // A quiescent second cycle changes nothing.
    sync.cycle()?;
    assert_eq!(sandbox.local_files(), local);
    assert_eq!(sandbox.bucket_files(), local);
    Ok(())
}

#[test]
fn local_deletion_reaches_the_bucket() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_local("a.txt", "doomed")?;
    sandbox.write_local("keep.txt", "kept")?;
    let mut sync = sandbox.synchronizer()?;
    sync.cycle()?;
    sync.cycle()?; // histories now cover both sides
    assert!(sandbox.bucket_files().contains_key("a.txt"));

    fs::remove_file(sandbox.local_path("a.txt"))?;
    sync.cycle()?;

    let bucket = sandbox.bucket_files();
    assert!(!bucket.contains_key("a.txt"));
    assert_eq!(bucket["keep.txt"], "kept");
    assert_eq!(sandbox.store.stat("mirror/a.txt")?, None);
    Ok(())
}

#[test]
fn remote_deletion_reaches_local() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_local("a.txt", "doomed")?;
    sandbox.write_local("keep.txt", "kept")?;
    let mut sync = sandbox.synchronizer()?;
    sync.cycle()?;
    sync.cycle()?;

    sandbox.store.delete("mirror/a.txt")?;
    sync.cycle()?;

    let local = sandbox.local_files();
    assert!(!local.contains_key("a.txt"));
    assert_eq!(local["keep.txt"], "kept");
    Ok(())
}

#[test]
fn remote_rename_becomes_a_local_rename() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_local("a.txt", "stable contents")?;
    let mut sync = sandbox.synchronizer()?;
    sync.cycle()?;
    sync.cycle()?;

    sandbox.store.rename("mirror/a.txt", "mirror/b.txt")?;
    sync.cycle()?;

    // The dispatcher found the content by id and renamed the local file;
    // the deletion sweep then found a.txt already gone.
    let local = sandbox.local_files();
    assert_eq!(local["b.txt"], "stable contents");
    assert!(!local.contains_key("a.txt"));
    assert_eq!(local, sandbox.bucket_files());
    Ok(())
}

#[test]
fn remote_modification_lands_locally() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_local("a.txt", "original")?;
    let mut sync = sandbox.synchronizer()?;
    sync.cycle()?;
    sync.cycle()?;

    // Only the bucket's copy changes; the local file stays untouched.
    let edited = sandbox.scratch_file("edited", "second version")?;
    sandbox.store.update("mirror/a.txt", &edited)?;
    let mut stat = sandbox.store.stat("mirror/a.txt")?.expect("object exists");
    stat.mtime += 100;
    sandbox.store.set_stat("mirror/a.txt", &stat)?;

    sync.cycle()?;
    assert_eq!(sandbox.local_files()["a.txt"], "second version");
    // The push pass saw the local copy already matching and left the
    // object alone - its attributes are exactly as we set them.
    let after = sandbox.store.stat("mirror/a.txt")?.expect("object exists");
    assert_eq!(after.uuid, stat.uuid);
    assert_eq!(after.mtime, stat.mtime);
    Ok(())
}

#[test]
fn local_rename_becomes_a_server_side_copy() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_local("a.txt", "stable contents")?;
    let mut sync = sandbox.synchronizer()?;
    sync.cycle()?;
    sync.cycle()?;
    let before = sandbox.store.stat("mirror/a.txt")?.expect("object exists");

    fs::rename(sandbox.local_path("a.txt"), sandbox.local_path("b.txt"))?;
    sync.cycle()?;

    let bucket = sandbox.bucket_files();
    assert_eq!(bucket["b.txt"], "stable contents");
    assert!(!bucket.contains_key("a.txt"));
    // A fresh upload would have minted a new UUID; the server-side copy
    // carried the old one over.
    let after = sandbox.store.stat("mirror/b.txt")?.expect("object exists");
    assert_eq!(before.uuid, after.uuid);
    Ok(())
}

#[test]
fn newer_remote_edit_overwrites_a_local_one() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_local("a.txt", "original")?;
    let mut sync = sandbox.synchronizer()?;
    sync.cycle()?;
    sync.cycle()?;

    // The bucket's copy changes...
    let edited = sandbox.scratch_file("edited", "remote edit wins")?;
    sandbox.store.update("mirror/a.txt", &edited)?;
    // ...with an mtime decisively newer than anything history remembers.
    let mut stat = sandbox.store.stat("mirror/a.txt")?.expect("object exists");
    stat.mtime += 100;
    sandbox.store.set_stat("mirror/a.txt", &stat)?;
    // The local side edits the same file, but the bucket's copy is newer.
    sandbox.write_local("a.txt", "local edit loses")?;

    sync.cycle()?;
    assert_eq!(sandbox.local_files()["a.txt"], "remote edit wins");
    assert_eq!(sandbox.bucket_files()["a.txt"], "remote edit wins");

    // And the next cycle doesn't ping-pong the content back and forth.
    sync.cycle()?;
    assert_eq!(sandbox.local_files()["a.txt"], "remote edit wins");
    assert_eq!(sandbox.bucket_files()["a.txt"], "remote edit wins");
    Ok(())
}

#[test]
fn remote_directory_tree_lands_locally() -> Result<()> {
    let sandbox = Sandbox::new()?;
    let seed = sandbox.scratch_file("seed", "nested file")?;
    sandbox.store.create_folder("mirror/")?;
    sandbox.store.create_folder("mirror/d/")?;
    sandbox.store.upload("mirror/d/x.txt", &seed)?;

    let mut sync = sandbox.synchronizer()?;
    sync.cycle()?;

    // One CreateLocalFolder action; the handler walked the live listing
    // for everything inside.
    assert_eq!(sandbox.local_files()["d/x.txt"], "nested file");
    Ok(())
}

#[test]
fn local_directory_deletion_clears_the_bucket() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_local("top.txt", "stays")?;
    sandbox.write_local("sub/a.txt", "goes")?;
    sandbox.write_local("sub/nested/b.txt", "goes too")?;
    let mut sync = sandbox.synchronizer()?;
    sync.cycle()?;
    sync.cycle()?;

    fs::remove_dir_all(sandbox.local_path("sub"))?;
    sync.cycle()?;

    let bucket = sandbox.bucket_files();
    assert_eq!(bucket.len(), 1);
    assert_eq!(bucket["top.txt"], "stays");
    assert_eq!(sandbox.store.stat("mirror/sub/")?, None);
    Ok(())
}

#[test]
fn history_survives_a_restart() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_local("a.txt", "here today")?;
    {
        let mut sync = sandbox.synchronizer()?;
        sync.cycle()?;
        sync.cycle()?;
    }

    fs::remove_file(sandbox.local_path("a.txt"))?;

    // A fresh supervisor loads the snapshots off disk, so the missing file
    // reads as a deletion - not as an empty first run.
    let mut sync = sandbox.synchronizer()?;
    sync.cycle()?;
    assert!(sandbox.bucket_files().is_empty());
    Ok(())
}

#[test]
fn kind_change_swaps_file_for_directory() -> Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.write_local("thing", "file at first")?;
    let mut sync = sandbox.synchronizer()?;
    sync.cycle()?;
    sync.cycle()?;

    // Locally, the file becomes a directory of the same name.
    fs::remove_file(sandbox.local_path("thing"))?;
    fs::create_dir(sandbox.local_path("thing"))?;
    sandbox.write_local("thing/inner.txt", "now a directory")?;

    // First cycle clears the old-kind object (the folder creation collides
    // with it); the second lands the new directory.
    sync.cycle()?;
    sync.cycle()?;

    let bucket = sandbox.bucket_files();
    assert_eq!(bucket["thing/inner.txt"], "now a directory");
    assert_eq!(sandbox.store.stat("mirror/thing")?, None);
    Ok(())
}

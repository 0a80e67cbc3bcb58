use std::fs;

use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;

fn cli() -> Result<Command> {
    Ok(Command::cargo_bin(env!("CARGO_PKG_NAME"))?)
}

#[test]
fn help_names_the_sync_flag() -> Result<()> {
    cli()?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--sync"));
    Ok(())
}

#[test]
fn a_provider_is_required() -> Result<()> {
    cli()?.assert().failure();
    Ok(())
}

#[test]
fn unknown_provider_is_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let conf = dir.path().join("conf.toml");
    fs::write(&conf, "[providers]\n")?;

    cli()?
        .args(["--sync", "nope", "--config"])
        .arg(&conf)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No provider named nope"));
    Ok(())
}

#[test]
fn unreadable_local_root_is_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let bucket = dir.path().join("bucket");
    fs::create_dir(&bucket)?;
    let conf = dir.path().join("conf.toml");
    fs::write(
        &conf,
        format!(
            r#"
            [providers.broken]
            kind = "folder"
            store_path = "{}"
            local_path = "{}/not-actually-there/"
            cloud_path = "mirror/"
            history_path = "{}/broken.history"
            "#,
            bucket.display(),
            dir.path().display(),
            dir.path().display(),
        ),
    )?;

    cli()?
        .args(["--sync", "broken", "--config"])
        .arg(&conf)
        .assert()
        .failure();
    Ok(())
}

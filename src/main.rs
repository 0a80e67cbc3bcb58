use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use tracing::*;
use tracing_subscriber::filter::LevelFilter;

use bucketsync::{backend, config, sync};

/// Keep a local directory and an object-storage bucket in lockstep.
#[derive(Debug, Parser)]
#[clap(version, verbatim_doc_comment)]
struct Args {
    /// Verbosity (-v, -vv, -vvv, etc.)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// The provider to sync with, as named in the configuration file
    #[clap(short = 's', long = "sync", name = "provider")]
    sync: String,

    /// Configuration file (defaults to ~/.config/bucketsync.toml)
    #[clap(short, long)]
    config: Option<Utf8PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    let configuration = config::load(args.config.as_deref())?;
    let provider = configuration
        .providers
        .get(&args.sync)
        .ok_or_else(|| anyhow!("No provider named {} in the configuration", args.sync))?
        .clone()
        .validated()?;

    let store = backend::open(&provider)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Interrupted; finishing the current cycle");
        flag.store(true, Ordering::Relaxed);
    })
    .context("Couldn't install the interrupt handler")?;

    let mut synchronizer = sync::Synchronizer::new(
        &*store,
        &provider.local_path,
        &provider.cloud_path,
        &provider.history_path,
    )?;
    synchronizer.run(&shutdown)
}

/// Set up tracing to spit messages to stderr.
fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

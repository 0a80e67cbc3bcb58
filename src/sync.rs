//! The supervisor loop - one reconciliation cycle after another
//!
//! A cycle is: rebuild the cloud tree, pull, rebuild the local tree, push,
//! then snapshot both trees as the new histories. The supervisor owns all
//! four trees; the engine and dispatcher only ever borrow them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::*;

use crate::backend::ObjectStore;
use crate::dispatch::Dispatcher;
use crate::reconcile;
use crate::snapshot;
use crate::tree::{MetaTree, Node};
use crate::walk;

/// How long to wait between cycles.
const CYCLE_PAUSE: Duration = Duration::from_secs(29);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum State {
    Stopped,
    Running,
    Stopping,
}

pub struct Synchronizer<'a> {
    store: &'a dyn ObjectStore,
    local_path: String,
    cloud_path: String,
    history_path: Utf8PathBuf,

    local: MetaTree,
    cloud: MetaTree,
    local_history: Node,
    cloud_history: Node,
    state: State,
}

impl<'a> Synchronizer<'a> {
    /// Scans both sides and loads the history snapshots.
    ///
    /// This is where the fatal checks live: an unreadable local root or an
    /// unlistable bucket prefix means there's nothing sane to sync.
    pub fn new(
        store: &'a dyn ObjectStore,
        local_path: &str,
        cloud_path: &str,
        history_path: &Utf8Path,
    ) -> Result<Synchronizer<'a>> {
        let local = walk::walk_local(local_path)?;

        // First run against a fresh bucket: put the root marker in place
        // so listing it can't fail.
        if store
            .stat(cloud_path)
            .with_context(|| format!("Couldn't reach the bucket at {cloud_path}"))?
            .is_none()
        {
            info!("Creating the bucket prefix {cloud_path}");
            store.create_folder(cloud_path)?;
        }
        let cloud = walk::walk_store(cloud_path, store)?;

        let local_history = load_history(&history_file(history_path, "local"), local_path);
        let cloud_history = load_history(&history_file(history_path, "cloud"), cloud_path);

        Ok(Synchronizer {
            store,
            local_path: local_path.to_owned(),
            cloud_path: cloud_path.to_owned(),
            history_path: history_path.to_owned(),
            local,
            cloud,
            local_history,
            cloud_history,
            state: State::Stopped,
        })
    }

    /// Cycles until the shutdown flag goes up. The cycle in flight always
    /// finishes first - interruption only lands between cycles.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        self.transition(State::Running);
        info!("Synchronizing {} with {}", self.local_path, self.cloud_path);

        while !shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.cycle() {
                // Next cycle retries; the difference that drove the failed
                // cycle is still there to be found.
                warn!("Sync cycle failed: {e:#}");
            }
            self.snooze(shutdown);
        }

        self.transition(State::Stopping);
        info!("Shutting down");
        self.transition(State::Stopped);
        Ok(())
    }

    fn transition(&mut self, to: State) {
        debug!("{:?} -> {to:?}", self.state);
        self.state = to;
    }

    /// One full reconciliation: pull, then push, then snapshot.
    pub fn cycle(&mut self) -> Result<()> {
        debug!("Building the cloud tree");
        self.cloud = walk::walk_store(&self.cloud_path, self.store)?;

        debug!("Pulling changes from {}", self.cloud_path);
        {
            let mut dispatcher =
                Dispatcher::new(self.store, &self.local.index, &self.cloud.index);
            reconcile::pull(
                &self.cloud.root,
                &self.cloud_history,
                Some(&self.local.root),
                &self.cloud_path,
                &self.local_path,
                &mut dispatcher,
            )?;
        }

        debug!("Building the local tree");
        self.local = walk::walk_local(&self.local_path)?;

        debug!("Pushing changes to {}", self.cloud_path);
        {
            let mut dispatcher =
                Dispatcher::new(self.store, &self.local.index, &self.cloud.index);
            reconcile::push(
                &self.local.root,
                &self.local_history,
                Some(&self.cloud.root),
                &self.cloud_path,
                &self.local_path,
                &mut dispatcher,
            )?;
        }

        // Both passes are done; what we scanned this cycle becomes the
        // baseline for the next one.
        self.cloud_history = self.cloud.root.clone();
        self.local_history = self.local.root.clone();
        self.save_history();
        Ok(())
    }

    /// Persists both histories. Failure isn't fatal - we'd rather re-sync
    /// some entries next run than die here.
    fn save_history(&self) {
        for (tree, side) in [(&self.local_history, "local"), (&self.cloud_history, "cloud")] {
            let path = history_file(&self.history_path, side);
            if let Err(e) = snapshot::save(tree, &path) {
                warn!("Couldn't save {path}: {e:#}");
            }
        }
    }

    /// Sleeps out the pause between cycles, a second at a time so an
    /// interrupt doesn't have to wait long.
    fn snooze(&self, shutdown: &AtomicBool) {
        let mut remaining = CYCLE_PAUSE;
        while !remaining.is_zero() && !shutdown.load(Ordering::Relaxed) {
            let nap = remaining.min(Duration::from_secs(1));
            thread::sleep(nap);
            remaining -= nap;
        }
    }
}

fn history_file(prefix: &Utf8Path, side: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{prefix}.{side}"))
}

/// A missing snapshot is normal (first run); an unreadable one is worth a
/// warning. Either way we start from an empty tree, which can never trigger
/// the deletion sweep.
fn load_history(path: &Utf8Path, prefix: &str) -> Node {
    match snapshot::load(path) {
        Ok(Some(root)) => {
            debug!("Loaded history from {path}");
            root
        }
        Ok(None) => {
            info!("No history at {path}; starting fresh");
            Node::directory(prefix, 0)
        }
        Err(e) => {
            warn!("Couldn't load {path}: {e:#}; starting fresh");
            Node::directory(prefix, 0)
        }
    }
}

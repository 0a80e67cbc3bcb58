//! Keep a local directory and an object-storage bucket in lockstep.
//!
//! Each reconciliation cycle rebuilds a metadata tree per side,
//! compares it against the snapshot persisted at the end of the previous
//! cycle, and turns every difference into an action against the other side.
//! See the [`sync`] module for the supervisor loop that drives this.

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod file_util;
pub mod hashing;
pub mod reconcile;
pub mod snapshot;
pub mod sync;
pub mod tree;
pub mod walk;

//! A test harness for Raft-like replicated state machines.
//!
//! A [`Cluster`] runs `n` peers over a simulated [`labrpc::Network`], mirrors
//! every committed entry each peer reports into a replay ledger, and checks
//! the mirrors against each other as entries arrive. Scenarios are written
//! against the cluster: partition peers, crash and restart them, submit
//! commands with [`Cluster::one`], and assert on leaders and terms.
//!
//! Every check returns a [`Result`]. A failed check is logged and marks the
//! cluster failed, so [`Cluster::end`] reports the first failure even when
//! the scenario carried on.

#[macro_use]
extern crate log;
#[macro_use]
extern crate prost_derive;

mod agreement;
mod applier;
mod checks;
mod cluster;
mod config;
mod entry;
mod error;
mod peer;
mod report;
mod snapshot;
mod storage;

pub use self::agreement::Decided;
pub use self::cluster::Cluster;
pub use self::config::ClusterConfig;
pub use self::entry::Entry;
pub use self::error::{Error, Result};
pub use self::peer::Peer;
pub use self::report::Report;
pub use self::snapshot::SnapshotImage;
pub use self::storage::Storage;

/// Initializes `env_logger` once per process. Safe to call from every test.
pub fn init_logger() {
    use std::sync::Once;
    static LOGGER_INIT: Once = Once::new();
    LOGGER_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

#[cfg(test)]
mod fake;

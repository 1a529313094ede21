//! Durable state for a peer: an opaque protocol-state blob and a snapshot blob.
//!
//! A peer reads both at startup and rewrites them as its state changes. The
//! tester hands every incarnation of a peer its own `copy()` so that a retired
//! instance can never write into what its successor reads.

use std::sync::{Arc, Mutex};

pub trait Persister: Send + 'static {
    fn raft_state(&self) -> Vec<u8>;
    fn save_raft_state(&self, state: Vec<u8>);
    fn save_state_and_snapshot(&self, state: Vec<u8>, snapshot: Vec<u8>);
    fn snapshot(&self) -> Vec<u8>;
}

impl<T: ?Sized + Persister> Persister for Box<T> {
    fn raft_state(&self) -> Vec<u8> {
        (**self).raft_state()
    }
    fn save_raft_state(&self, state: Vec<u8>) {
        (**self).save_raft_state(state)
    }
    fn save_state_and_snapshot(&self, state: Vec<u8>, snapshot: Vec<u8>) {
        (**self).save_state_and_snapshot(state, snapshot)
    }
    fn snapshot(&self) -> Vec<u8> {
        (**self).snapshot()
    }
}

impl<T: ?Sized + Sync + Persister> Persister for Arc<T> {
    fn raft_state(&self) -> Vec<u8> {
        (**self).raft_state()
    }
    fn save_raft_state(&self, state: Vec<u8>) {
        (**self).save_raft_state(state)
    }
    fn save_state_and_snapshot(&self, state: Vec<u8>, snapshot: Vec<u8>) {
        (**self).save_state_and_snapshot(state, snapshot)
    }
    fn snapshot(&self) -> Vec<u8> {
        (**self).snapshot()
    }
}

#[derive(Default)]
struct Blobs {
    raft_state: Vec<u8>,
    snapshot: Vec<u8>,
}

/// An in-memory persister.
#[derive(Default)]
pub struct SimplePersister {
    blobs: Mutex<Blobs>,
}

impl SimplePersister {
    pub fn new() -> SimplePersister {
        SimplePersister::default()
    }

    /// A new persister holding the same bytes, independent from now on.
    pub fn copy(&self) -> SimplePersister {
        let blobs = self.blobs.lock().unwrap();
        SimplePersister {
            blobs: Mutex::new(Blobs {
                raft_state: blobs.raft_state.clone(),
                snapshot: blobs.snapshot.clone(),
            }),
        }
    }

    pub fn raft_state_size(&self) -> usize {
        self.blobs.lock().unwrap().raft_state.len()
    }

    pub fn snapshot_size(&self) -> usize {
        self.blobs.lock().unwrap().snapshot.len()
    }
}

impl Persister for SimplePersister {
    fn raft_state(&self) -> Vec<u8> {
        self.blobs.lock().unwrap().raft_state.clone()
    }

    fn save_raft_state(&self, state: Vec<u8>) {
        self.blobs.lock().unwrap().raft_state = state;
    }

    // both blobs change under one lock so readers never see a torn pair.
    fn save_state_and_snapshot(&self, state: Vec<u8>, snapshot: Vec<u8>) {
        let mut blobs = self.blobs.lock().unwrap();
        blobs.raft_state = state;
        blobs.snapshot = snapshot;
    }

    fn snapshot(&self) -> Vec<u8> {
        self.blobs.lock().unwrap().snapshot.clone()
    }
}

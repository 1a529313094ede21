//! A scripted peer for exercising the cluster without a real protocol.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use futures::channel::mpsc::UnboundedSender;
use labrpc::{codec, ServerBuilder};
use raft::errors::{Error, Result};
use raft::persister::Persister;
use raft::ApplyMsg;

use crate::entry::Entry;
use crate::peer::Peer;

struct FakeState {
    term: u64,
    leader: bool,
    next_index: u64,
    // commit every started entry on this peer's channel at once
    auto_commit: bool,
}

struct Inner {
    me: usize,
    state: Mutex<FakeState>,
    apply_ch: UnboundedSender<ApplyMsg>,
    persister: Mutex<Box<dyn Persister>>,
    snapshots: Mutex<Vec<(u64, Vec<u8>)>>,
    killed: AtomicBool,
}

#[derive(Clone)]
pub struct FakePeer {
    inner: Arc<Inner>,
}

impl FakePeer {
    pub fn me(&self) -> usize {
        self.inner.me
    }

    pub fn set_state(&self, term: u64, leader: bool) {
        let mut state = self.inner.state.lock().unwrap();
        state.term = term;
        state.leader = leader;
    }

    pub fn set_auto_commit(&self, auto_commit: bool) {
        self.inner.state.lock().unwrap().auto_commit = auto_commit;
    }

    pub fn commit(&self, index: u64, entry: &Entry) {
        let data = codec::encode_to_vec(entry);
        let _ = self
            .inner
            .apply_ch
            .unbounded_send(ApplyMsg::Command { data, index });
    }

    pub fn commit_raw(&self, index: u64, data: Vec<u8>) {
        let _ = self
            .inner
            .apply_ch
            .unbounded_send(ApplyMsg::Command { data, index });
    }

    pub fn install(&self, index: u64, data: Vec<u8>) {
        let term = self.inner.state.lock().unwrap().term;
        let _ = self
            .inner
            .apply_ch
            .unbounded_send(ApplyMsg::Snapshot { data, term, index });
    }

    pub fn persist(&self, state: &[u8], snapshot: &[u8]) {
        self.inner
            .persister
            .lock()
            .unwrap()
            .save_state_and_snapshot(state.to_vec(), snapshot.to_vec());
    }

    pub fn raft_state(&self) -> Vec<u8> {
        self.inner.persister.lock().unwrap().raft_state()
    }

    pub fn snapshots(&self) -> Vec<(u64, Vec<u8>)> {
        self.inner.snapshots.lock().unwrap().clone()
    }

    pub fn is_killed(&self) -> bool {
        self.inner.killed.load(Ordering::Acquire)
    }
}

impl Peer for FakePeer {
    fn make(
        _clients: Vec<labrpc::Client>,
        me: usize,
        persister: Box<dyn Persister>,
        apply_ch: UnboundedSender<ApplyMsg>,
    ) -> FakePeer {
        FakePeer {
            inner: Arc::new(Inner {
                me,
                state: Mutex::new(FakeState {
                    term: 0,
                    leader: false,
                    next_index: 1,
                    auto_commit: true,
                }),
                apply_ch,
                persister: Mutex::new(persister),
                snapshots: Mutex::default(),
                killed: AtomicBool::new(false),
            }),
        }
    }

    fn get_state(&self) -> (u64, bool) {
        let state = self.inner.state.lock().unwrap();
        (state.term, state.leader)
    }

    fn start(&self, entry: &Entry) -> Result<(u64, u64)> {
        let (index, term, auto_commit) = {
            let mut state = self.inner.state.lock().unwrap();
            if self.is_killed() || !state.leader {
                return Err(Error::NotLeader);
            }
            let index = state.next_index;
            state.next_index += 1;
            (index, state.term, state.auto_commit)
        };
        if auto_commit {
            self.commit(index, entry);
        }
        Ok((index, term))
    }

    fn kill(&self) {
        self.inner.killed.store(true, Ordering::Release);
        self.inner.apply_ch.close_channel();
    }

    fn snapshot(&self, index: u64, snapshot: &[u8]) {
        self.inner
            .snapshots
            .lock()
            .unwrap()
            .push((index, snapshot.to_vec()));
    }

    fn register(&self, _builder: &mut ServerBuilder) -> labrpc::Result<()> {
        Ok(())
    }
}

/// Polls `cond` for up to two seconds.
pub fn eventually<F: FnMut() -> bool>(mut cond: F) -> bool {
    let t0 = Instant::now();
    while t0.elapsed() < Duration::from_secs(2) {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

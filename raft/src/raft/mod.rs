use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use futures::channel::mpsc::UnboundedSender;
use futures::future;
use rand::Rng;

use labrpc::codec::{self, Message};
use labrpc::RpcFuture;

mod append_entries;
mod raft_log;
mod vote;

use self::raft_log::RaftLog;

use crate::errors::{Error, Result};
use crate::persister::Persister;
use crate::proto::*;

/// As each Raft peer becomes aware that successive log entries are
/// committed, it sends an `ApplyMsg` to the service (or tester) on the same
/// server, via the `apply_ch` passed to `Raft::new`. Messages arrive in log
/// order; the channel is closed once the peer is killed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyMsg {
    Command { data: Vec<u8>, index: u64 },
    Snapshot { data: Vec<u8>, term: u64, index: u64 },
}

/// Timing knobs of a peer.
#[derive(Clone, Debug)]
pub struct RaftConfig {
    /// How often the ticker wakes up to check timers.
    pub tick: Duration,
    /// How often an idle leader sends append_entries.
    pub heartbeat_interval: Duration,
    /// Election timeouts are drawn uniformly from `[min, max)`.
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
}

impl Default for RaftConfig {
    fn default() -> Self {
        RaftConfig {
            tick: Duration::from_millis(10),
            heartbeat_interval: Duration::from_millis(100),
            election_timeout_min: Duration::from_millis(350),
            election_timeout_max: Duration::from_millis(700),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// State of a raft peer.
#[derive(Clone, Debug)]
pub struct State {
    pub term: u64,
    pub role: Role,
}

impl State {
    /// The current term of this peer.
    pub fn term(&self) -> u64 {
        self.term
    }

    /// Whether this peer believes it is the leader.
    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }
}

/// One round of outgoing replication traffic to a single follower.
enum Replication {
    Append(AppendEntriesArgs),
    Snapshot(InstallSnapshotArgs),
}

// A single Raft peer.
pub struct Raft {
    // RPC end points of all peers
    peers: Vec<RaftClient>,
    // Object to hold this peer's persisted state
    persister: Box<dyn Persister>,
    // this peer's index into peers[]
    me: usize,
    apply_ch: UnboundedSender<ApplyMsg>,
    config: RaftConfig,

    // persistent
    term: u64,
    voted_for: Option<usize>,
    log: RaftLog,

    // volatile
    role: Role,
    commit_index: u64,
    last_applied: u64,
    votes: usize,
    election_deadline: Instant,
    heartbeat_due: Instant,

    // leader only
    next_index: Vec<u64>,
    match_index: Vec<u64>,
}

impl Raft {
    /// the service or tester wants to create a Raft server. the ports
    /// of all the Raft servers (including this one) are in peers. this
    /// server's port is peers[me]. all the servers' peers arrays
    /// have the same order. persister is a place for this server to
    /// save its persistent state, and also initially holds the most
    /// recent saved state, if any. apply_ch is a channel on which the
    /// tester or service expects Raft to send ApplyMsg messages.
    /// This method must return quickly.
    pub fn new(
        peers: Vec<RaftClient>,
        me: usize,
        persister: Box<dyn Persister>,
        apply_ch: UnboundedSender<ApplyMsg>,
    ) -> Raft {
        Raft::with_config(peers, me, persister, apply_ch, RaftConfig::default())
    }

    pub fn with_config(
        peers: Vec<RaftClient>,
        me: usize,
        persister: Box<dyn Persister>,
        apply_ch: UnboundedSender<ApplyMsg>,
        config: RaftConfig,
    ) -> Raft {
        let raft_state = persister.raft_state();
        let n = peers.len();
        let now = Instant::now();
        let mut rf = Raft {
            peers,
            persister,
            me,
            apply_ch,
            config,
            term: 0,
            voted_for: None,
            log: RaftLog::default(),
            role: Role::Follower,
            commit_index: 0,
            last_applied: 0,
            votes: 0,
            election_deadline: now,
            heartbeat_due: now,
            next_index: vec![1; n],
            match_index: vec![0; n],
        };

        // initialize from state persisted before a crash
        rf.restore(&raft_state);
        rf.reset_election_timer();
        rf
    }

    fn tag(&self) -> String {
        format!("[{}@{} {:?}]", self.me, self.term, self.role)
    }

    pub fn state(&self) -> State {
        State {
            term: self.term,
            role: self.role,
        }
    }

    fn encode_state(&self) -> Vec<u8> {
        let state = PersistentState {
            term: self.term,
            voted_for: self.voted_for.map(|v| v as u64),
            log_base: self.log.base(),
            log_base_term: self.log.base_term(),
            entries: self.log.entries_from(self.log.base() + 1),
        };
        codec::encode_to_vec(&state)
    }

    /// save Raft's persistent state to stable storage,
    /// where it can later be retrieved after a crash and restart.
    fn persist(&mut self) {
        self.persister.save_raft_state(self.encode_state());
    }

    fn persist_with_snapshot(&mut self, snapshot: Vec<u8>) {
        self.persister
            .save_state_and_snapshot(self.encode_state(), snapshot);
    }

    /// restore previously persisted state.
    fn restore(&mut self, data: &[u8]) {
        if data.is_empty() {
            debug!("{} bootstrap without any state", self.tag());
            return;
        }
        let state: PersistentState = match codec::decode(data) {
            Ok(state) => state,
            Err(e) => {
                error!("{} persisted state is corrupt, starting empty: {}", self.tag(), e);
                return;
            }
        };
        self.term = state.term;
        self.voted_for = state.voted_for.map(|v| v as usize);
        self.log = RaftLog::restore(state.log_base, state.log_base_term, state.entries);
        // the snapshot already reflects everything up to the log base.
        self.commit_index = self.log.base();
        self.last_applied = self.log.base();
        info!(
            "{} restored: base {} last {}",
            self.tag(),
            self.log.base(),
            self.log.last_index()
        );
    }

    fn reset_election_timer(&mut self) {
        let min = self.config.election_timeout_min.as_millis() as u64;
        let max = self.config.election_timeout_max.as_millis() as u64;
        let timeout = rand::thread_rng().gen_range(min..max.max(min + 1));
        self.election_deadline = Instant::now() + Duration::from_millis(timeout);
    }

    fn is_quorum(&self, count: usize) -> bool {
        count * 2 > self.peers.len()
    }

    /// Adopts `term` if it is newer, and falls back to follower.
    fn become_follower(&mut self, term: u64) {
        if term > self.term {
            self.term = term;
            self.voted_for = None;
            self.persist();
        }
        if self.role != Role::Follower {
            debug!("{} steps down", self.tag());
            self.role = Role::Follower;
        }
    }

    fn become_candidate(&mut self) -> RequestVoteArgs {
        self.role = Role::Candidate;
        self.term += 1;
        self.voted_for = Some(self.me);
        self.votes = 1;
        self.persist();
        self.reset_election_timer();
        info!("{} starts election", self.tag());

        RequestVoteArgs {
            term: self.term,
            candidate_id: self.me as u64,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        }
    }

    fn become_leader(&mut self) {
        let last = self.log.last_index();
        self.role = Role::Leader;
        self.next_index = vec![last + 1; self.peers.len()];
        self.match_index = vec![0; self.peers.len()];
        self.match_index[self.me] = last;
        self.heartbeat_due = Instant::now();
        info!("{} becomes leader", self.tag());
    }

    fn start(&mut self, data: Vec<u8>) -> Result<(u64, u64)> {
        if self.role != Role::Leader {
            return Err(Error::NotLeader);
        }
        let index = self.log.append(LogEntry {
            term: self.term,
            data,
        });
        self.match_index[self.me] = index;
        self.persist();
        debug!("{} accepts command at {}", self.tag(), index);
        // replicate on the next tick rather than waiting for a heartbeat.
        self.heartbeat_due = Instant::now();
        self.advance_commit_index();
        Ok((index, self.term))
    }

    /// Commits the highest index of the current term stored on a majority.
    fn advance_commit_index(&mut self) {
        let mut index = self.log.last_index();
        while index > self.commit_index {
            match self.log.term(index) {
                Some(term) if term == self.term => {}
                // earlier terms are never committed by counting replicas.
                _ => break,
            }
            let replicas = self.match_index.iter().filter(|&&m| m >= index).count();
            if self.is_quorum(replicas) {
                self.commit_index = index;
                self.apply();
                break;
            }
            index -= 1;
        }
    }

    /// Delivers every committed but unapplied entry, in order.
    fn apply(&mut self) {
        while self.last_applied < self.commit_index {
            let index = self.last_applied + 1;
            let data = match self.log.entry(index) {
                Some(entry) => entry.data.clone(),
                None => {
                    warn!("{} cannot apply compacted index {}", self.tag(), index);
                    return;
                }
            };
            self.last_applied = index;
            if self
                .apply_ch
                .unbounded_send(ApplyMsg::Command { data, index })
                .is_err()
            {
                debug!("{} apply channel closed", self.tag());
            }
        }
    }

    /// The service has captured everything up to `index` in `snapshot`;
    /// discard that prefix of the log.
    fn snapshot(&mut self, index: u64, snapshot: &[u8]) {
        if index <= self.log.base() || index > self.last_applied {
            debug!(
                "{} ignores snapshot at {} (base {}, applied {})",
                self.tag(),
                index,
                self.log.base(),
                self.last_applied
            );
            return;
        }
        self.log.compact_to(index);
        self.persist_with_snapshot(snapshot.to_vec());
        debug!("{} compacted log through {}", self.tag(), index);
    }

    fn replication_requests(&self) -> Vec<(usize, Replication)> {
        let last = self.log.last_index();
        (0..self.peers.len())
            .filter(|&peer| peer != self.me)
            .map(|peer| {
                let next = self.next_index[peer].min(last + 1);
                let request = if next <= self.log.base() {
                    Replication::Snapshot(InstallSnapshotArgs {
                        term: self.term,
                        leader_id: self.me as u64,
                        last_included_index: self.log.base(),
                        last_included_term: self.log.base_term(),
                        data: self.persister.snapshot(),
                    })
                } else {
                    let prev = next - 1;
                    Replication::Append(AppendEntriesArgs {
                        term: self.term,
                        leader_id: self.me as u64,
                        prev_log_index: prev,
                        prev_log_term: self.log.term(prev).unwrap_or_default(),
                        entries: self.log.entries_from(next),
                        leader_commit: self.commit_index,
                    })
                };
                (peer, request)
            })
            .collect()
    }

    fn shutdown(&mut self) {
        self.apply_ch.close_channel();
        debug!("{} killed", self.tag());
    }
}

/// A running peer: the shared `Raft` state plus the ticker thread that drives
/// its timers. Cloning yields another handle to the same peer.
#[derive(Clone)]
pub struct Node {
    raft: Arc<Mutex<Raft>>,
    peers: Arc<Vec<RaftClient>>,
    me: usize,
    dead: Arc<AtomicBool>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Node {
    /// Create a new raft service.
    pub fn new(raft: Raft) -> Node {
        let peers = Arc::new(raft.peers.clone());
        let me = raft.me;
        let tick = raft.config.tick;
        let node = Node {
            raft: Arc::new(Mutex::new(raft)),
            peers,
            me,
            dead: Arc::new(AtomicBool::new(false)),
            ticker: Arc::new(Mutex::new(None)),
        };

        let ticker = node.clone();
        let handle = thread::Builder::new()
            .name(format!("raft-{}-ticker", me))
            .spawn(move || {
                while !ticker.is_dead() {
                    thread::sleep(tick);
                    ticker.tick();
                }
            });
        match handle {
            Ok(handle) => *node.ticker.lock().unwrap() = Some(handle),
            Err(e) => error!("raft {} failed to spawn its ticker: {}", me, e),
        }
        node
    }

    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    fn tick(&self) {
        let mut rf = self.raft.lock().unwrap();
        let now = Instant::now();
        if rf.role == Role::Leader {
            if now >= rf.heartbeat_due {
                rf.heartbeat_due = now + rf.config.heartbeat_interval;
                let requests = rf.replication_requests();
                drop(rf);
                self.replicate(requests);
            }
        } else if now >= rf.election_deadline {
            let args = rf.become_candidate();
            if rf.is_quorum(rf.votes) {
                rf.become_leader();
                return;
            }
            drop(rf);
            self.request_votes(args);
        }
    }

    fn request_votes(&self, args: RequestVoteArgs) {
        for (peer, client) in self.peers.iter().enumerate() {
            if peer == self.me {
                continue;
            }
            let node = self.clone();
            let client_ = client.clone();
            let args = args.clone();
            client.spawn(async move {
                match client_.request_vote(&args).await {
                    Ok(reply) => node.on_request_vote_reply(args.term, reply),
                    Err(e) => debug!("request_vote to {} failed: {}", peer, e),
                }
            });
        }
    }

    fn on_request_vote_reply(&self, term: u64, reply: RequestVoteReply) {
        if self.is_dead() {
            return;
        }
        let mut rf = self.raft.lock().unwrap();
        if rf.handle_request_vote_reply(term, reply) {
            // announce leadership right away.
            rf.heartbeat_due = Instant::now() + rf.config.heartbeat_interval;
            let requests = rf.replication_requests();
            drop(rf);
            self.replicate(requests);
        }
    }

    fn replicate(&self, requests: Vec<(usize, Replication)>) {
        for (peer, request) in requests {
            let node = self.clone();
            let client = self.peers[peer].clone();
            self.peers[peer].spawn(async move {
                match request {
                    Replication::Append(args) => match client.append_entries(&args).await {
                        Ok(reply) => node.on_append_entries_reply(peer, args, reply),
                        Err(e) => debug!("append_entries to {} failed: {}", peer, e),
                    },
                    Replication::Snapshot(args) => match client.install_snapshot(&args).await {
                        Ok(reply) => node.on_install_snapshot_reply(peer, args, reply),
                        Err(e) => debug!("install_snapshot to {} failed: {}", peer, e),
                    },
                }
            });
        }
    }

    fn on_append_entries_reply(&self, peer: usize, args: AppendEntriesArgs, reply: AppendEntriesReply) {
        if self.is_dead() {
            return;
        }
        self.raft
            .lock()
            .unwrap()
            .handle_append_entries_reply(peer, &args, reply);
    }

    fn on_install_snapshot_reply(
        &self,
        peer: usize,
        args: InstallSnapshotArgs,
        reply: InstallSnapshotReply,
    ) {
        if self.is_dead() {
            return;
        }
        self.raft
            .lock()
            .unwrap()
            .handle_install_snapshot_reply(peer, &args, reply);
    }

    /// the service using Raft (e.g. a k/v server) wants to start
    /// agreement on the next command to be appended to Raft's log. if this
    /// server isn't the leader, returns [`Error::NotLeader`]. otherwise start
    /// the agreement and return immediately. there is no guarantee that this
    /// command will ever be committed to the Raft log, since the leader
    /// may fail or lose an election.
    ///
    /// the first value of the tuple is the index that the command will appear
    /// at if it's ever committed. the second is the current term.
    pub fn start<M>(&self, command: &M) -> Result<(u64, u64)>
    where
        M: Message,
    {
        if self.is_dead() {
            return Err(Error::NotLeader);
        }
        let mut buf = vec![];
        codec::encode(command, &mut buf)?;
        self.raft.lock().unwrap().start(buf)
    }

    pub fn term(&self) -> u64 {
        self.get_state().term()
    }

    pub fn is_leader(&self) -> bool {
        self.get_state().is_leader()
    }

    pub fn get_state(&self) -> State {
        self.raft.lock().unwrap().state()
    }

    /// Log compaction request from the service: `snapshot` covers every
    /// entry through `index`.
    pub fn snapshot(&self, index: u64, snapshot: &[u8]) {
        self.raft.lock().unwrap().snapshot(index, snapshot);
    }

    /// Stops the peer. The apply channel is closed and the ticker thread has
    /// exited by the time this returns; calling it again is a no-op.
    pub fn kill(&self) {
        if self.dead.swap(true, Ordering::AcqRel) {
            return;
        }
        self.raft.lock().unwrap().shutdown();
        let handle = self.ticker.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("raft {} ticker panicked", self.me);
            }
        }
    }

    fn handle<A, R, F>(&self, req: &[u8], f: F) -> labrpc::Result<Vec<u8>>
    where
        A: Message,
        R: Message,
        F: FnOnce(&mut Raft, A) -> R,
    {
        if self.is_dead() {
            return Err(labrpc::Error::Stopped);
        }
        let args = codec::decode(req)?;
        let mut rf = self.raft.lock().unwrap();
        let reply = f(&mut *rf, args);
        Ok(codec::encode_to_vec(&reply))
    }
}

impl labrpc::Service for Node {
    fn dispatch(&self, method: &str, req: &[u8]) -> RpcFuture<labrpc::Result<Vec<u8>>> {
        let reply = match method {
            "request_vote" => self.handle(req, Raft::handle_request_vote),
            "append_entries" => self.handle(req, Raft::handle_append_entries),
            "install_snapshot" => self.handle(req, Raft::handle_install_snapshot),
            other => Err(labrpc::Error::Unimplemented(format!(
                "unknown {} in raft",
                other
            ))),
        };
        Box::pin(future::ready(reply))
    }
}

/// Registers `node` as the `raft` service of a server.
pub fn add_raft_service(node: Node, builder: &mut labrpc::ServerBuilder) -> labrpc::Result<()> {
    builder.add_service("raft", Box::new(node))
}

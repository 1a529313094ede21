use futures::channel::mpsc::UnboundedSender;
use labrpc::ServerBuilder;
use raft::persister::Persister;
use raft::proto::RaftClient;
use raft::{ApplyMsg, Node, Raft};

use crate::entry::Entry;

/// A peer under test, as seen by the cluster.
///
/// Handles are cheap clones of one running instance.
pub trait Peer: Clone + Send + Sync + 'static {
    /// Creates the peer `me`, reachable from the others through `clients`
    /// (one per peer, `clients[me]` included). The peer reads its initial
    /// state from `persister` and reports commits on `apply_ch`.
    fn make(
        clients: Vec<labrpc::Client>,
        me: usize,
        persister: Box<dyn Persister>,
        apply_ch: UnboundedSender<ApplyMsg>,
    ) -> Self;

    /// The current term, and whether the peer believes it is the leader.
    fn get_state(&self) -> (u64, bool);

    /// Starts agreement on `entry`, returning the index it will be committed
    /// at and the current term. Fails if the peer is not the leader.
    fn start(&self, entry: &Entry) -> raft::errors::Result<(u64, u64)>;

    /// Stops the peer. Once this returns the apply channel is closed.
    fn kill(&self);

    /// Lets the peer discard its log through `index`, which `snapshot`
    /// covers.
    fn snapshot(&self, index: u64, snapshot: &[u8]);

    /// Registers the peer's RPC services.
    fn register(&self, builder: &mut ServerBuilder) -> labrpc::Result<()>;
}

impl Peer for Node {
    fn make(
        clients: Vec<labrpc::Client>,
        me: usize,
        persister: Box<dyn Persister>,
        apply_ch: UnboundedSender<ApplyMsg>,
    ) -> Node {
        let peers = clients.into_iter().map(RaftClient::new).collect();
        Node::new(Raft::new(peers, me, persister, apply_ch))
    }

    fn get_state(&self) -> (u64, bool) {
        let state = Node::get_state(self);
        (state.term(), state.is_leader())
    }

    fn start(&self, entry: &Entry) -> raft::errors::Result<(u64, u64)> {
        Node::start(self, entry)
    }

    fn kill(&self) {
        Node::kill(self)
    }

    fn snapshot(&self, index: u64, snapshot: &[u8]) {
        Node::snapshot(self, index, snapshot)
    }

    fn register(&self, builder: &mut ServerBuilder) -> labrpc::Result<()> {
        raft::add_raft_service(self.clone(), builder)
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures::channel::mpsc::unbounded;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use raft::persister::{Persister, SimplePersister};
use raft::Node;

use crate::applier::Applier;
use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::peer::Peer;
use crate::storage::Storage;

/// Length of the random names given to each peer's outgoing ends.
const ENDNAME_LEN: usize = 20;

/// Bookkeeping shared with the appliers, behind one lock.
pub(crate) struct Shared<P> {
    pub peers: Box<[Option<P>]>,
    // whether each server is on the net
    pub connected: Box<[bool]>,
    pub saved: Box<[Option<Arc<SimplePersister>>]>,
    // the port file names each sends to
    pub endnames: Box<[Box<[String]>]>,
    pub storage: Storage,

    // begin()/end() statistics
    pub t0: Instant,
    pub rpcs0: usize,
    pub bytes0: u64,
}

/// `n` peers on a simulated network, with a replay ledger of everything they
/// commit.
///
/// All methods take `&self`; a cluster can be shared between the threads of
/// a scenario.
pub struct Cluster<P: Peer = Node> {
    pub(crate) net: labrpc::Network,
    pub(crate) n: usize,
    pub(crate) config: ClusterConfig,
    pub(crate) shared: Arc<Mutex<Shared<P>>>,
    pub(crate) finished: AtomicBool,
    // first failure of any check
    pub(crate) failure: Mutex<Option<Error>>,
    pub(crate) rng: Mutex<StdRng>,
    // time at which the cluster was built
    pub(crate) start: Instant,
}

impl<P: Peer> Cluster<P> {
    pub fn new(n: usize) -> Result<Cluster<P>> {
        Cluster::new_with(n, ClusterConfig::default())
    }

    /// Builds the network and starts and connects every peer.
    pub fn new_with(n: usize, config: ClusterConfig) -> Result<Cluster<P>> {
        crate::init_logger();

        if n == 0 {
            return Err(Error::Config("a cluster needs at least one peer".to_owned()));
        }
        if config.snapshot && config.snapshot_interval == 0 {
            return Err(Error::Config("snapshot interval must be positive".to_owned()));
        }
        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        info!("cluster of {} with seed {}", n, seed);

        let net = labrpc::Network::new();
        net.set_reliable(!config.unreliable);
        net.set_long_delays(config.long_delays);

        let now = Instant::now();
        let shared = Shared {
            peers: (0..n).map(|_| None).collect(),
            connected: vec![false; n].into_boxed_slice(),
            saved: vec![None; n].into_boxed_slice(),
            endnames: vec![vec![String::new(); n].into_boxed_slice(); n].into_boxed_slice(),
            storage: Storage::new(n),
            t0: now,
            rpcs0: 0,
            bytes0: 0,
        };
        let cluster = Cluster {
            net,
            n,
            config,
            shared: Arc::new(Mutex::new(shared)),
            finished: AtomicBool::new(false),
            failure: Mutex::new(None),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            start: now,
        };

        for i in 0..n {
            cluster.start1(i)?;
        }
        for i in 0..n {
            cluster.connect(i);
        }
        Ok(cluster)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared<P>> {
        self.shared.lock().unwrap()
    }

    /// Records a failed check. The first failure sticks.
    pub(crate) fn fatal(&self, err: Error) -> Error {
        error!("{}", err);
        let mut failure = self.failure.lock().unwrap();
        if failure.is_none() {
            *failure = Some(err.clone());
        }
        err
    }

    /// The first failure seen so far, including apply errors.
    pub fn failure(&self) -> Option<Error> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Some(err);
        }
        self.lock().storage.apply_error().cloned()
    }

    /// Fails with any apply error an applier has recorded.
    pub(crate) fn check_apply_errors(&self) -> Result<()> {
        let err = self.lock().storage.apply_error().cloned();
        match err {
            Some(err) => Err(self.fatal(err)),
            None => Ok(()),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn random_name(&self) -> String {
        let mut rng = self.rng.lock().unwrap();
        (&mut *rng)
            .sample_iter(&Alphanumeric)
            .take(ENDNAME_LEN)
            .map(char::from)
            .collect()
    }

    /// A random `u64` from the cluster's seeded source.
    pub fn random(&self) -> u64 {
        self.rng.lock().unwrap().gen()
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn is_connected(&self, i: usize) -> bool {
        self.lock().connected[i]
    }

    /// A handle to peer `i`, if it is running.
    pub fn peer(&self, i: usize) -> Option<P> {
        self.lock().peers[i].clone()
    }

    /// The last index peer `i`'s applier has taken in since the peer was
    /// (re)started.
    pub fn last_applied(&self, i: usize) -> u64 {
        self.lock().storage.last_applied(i)
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn rpc_count(&self, server: usize) -> usize {
        self.net.count(&format!("{}", server))
    }

    pub fn rpc_total(&self) -> usize {
        self.net.total_count()
    }

    pub fn bytes_total(&self) -> u64 {
        self.net.total_bytes()
    }

    /// Maximum log size across all servers
    pub fn log_size(&self) -> usize {
        self.lock()
            .saved
            .iter()
            .flatten()
            .map(|s| s.raft_state_size())
            .max()
            .unwrap_or(0)
    }

    /// Maximum snapshot size across all servers
    pub fn snapshot_size(&self) -> usize {
        self.lock()
            .saved
            .iter()
            .flatten()
            .map(|s| s.snapshot_size())
            .max()
            .unwrap_or(0)
    }

    pub fn set_unreliable(&self, unreliable: bool) {
        self.net.set_reliable(!unreliable);
    }

    pub fn set_long_reordering(&self, long_reordering: bool) {
        self.net.set_long_reordering(long_reordering);
    }

    /// start or re-start a peer.
    /// if one already exists, "kill" it first.
    /// allocate new outgoing port file names, and a new
    /// state persister, to isolate previous instance of
    /// this server. since we cannot really kill it.
    ///
    /// The peer is left disconnected; `connect` puts it on the net.
    pub fn start1(&self, i: usize) -> Result<()> {
        self.crash1(i);

        // a fresh set of outgoing ClientEnd names.
        // so that old crashed instance's ClientEnds can't send.
        let endnames: Box<[String]> = (0..self.n).map(|_| self.random_name()).collect();

        // a fresh set of ClientEnds.
        let clients = endnames
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let client = self.net.create_client(name.clone());
                self.net.connect(name, &format!("{}", j));
                client
            })
            .collect();

        let persister = {
            let mut s = self.lock();
            s.endnames[i] = endnames;
            s.storage.reset(i);

            let persister = match s.saved[i].take() {
                Some(saved) => {
                    let persister = Arc::new(saved.copy());
                    // the snapshot stands for everything the server
                    // applied before it went down.
                    let snapshot = persister.snapshot();
                    if !snapshot.is_empty() {
                        if let Err(e) = s.storage.ingest_snapshot(i, &snapshot, None) {
                            s.saved[i] = Some(persister);
                            drop(s);
                            return Err(self.fatal(e));
                        }
                    }
                    persister
                }
                None => Arc::new(SimplePersister::new()),
            };
            s.saved[i] = Some(persister.clone());
            persister
        };

        let (tx, apply_ch) = unbounded();
        let peer = P::make(clients, i, Box::new(persister), tx);
        self.lock().peers[i] = Some(peer.clone());

        // listen to messages from the peer indicating newly committed messages.
        let applier = Applier {
            me: i,
            peer: peer.clone(),
            shared: self.shared.clone(),
            snapshot: self.config.snapshot_every(),
        };
        self.net.spawn_poller(applier.run(apply_ch));

        let mut builder = labrpc::ServerBuilder::new(format!("{}", i));
        peer.register(&mut builder)
            .map_err(|e| self.fatal(Error::Rpc(e)))?;
        self.net.add_server(builder.build());
        debug!("started {}", i);
        Ok(())
    }

    /// shut down a peer but save its persistent state.
    pub fn crash1(&self, i: usize) {
        self.disconnect(i);
        // disable client connections to the server.
        self.net.delete_server(&format!("{}", i));

        let mut s = self.lock();

        // a fresh persister, in case old instance
        // continues to update the Persister.
        // but copy old persister's content so that we always
        // pass make() the last persisted state.
        if let Some(saved) = s.saved[i].take() {
            s.saved[i] = Some(Arc::new(saved.copy()));
        }

        if let Some(peer) = s.peers[i].clone() {
            // kill() waits for the peer's threads, which may be waiting
            // on this lock.
            drop(s);
            peer.kill();
            s = self.lock();
            s.peers[i] = None;
            debug!("crashed {}", i);
        }
    }

    /// detach server i from the net.
    pub fn disconnect(&self, i: usize) {
        debug!("disconnect({})", i);
        let mut s = self.lock();
        s.connected[i] = false;

        // outgoing ClientEnds
        for endname in s.endnames[i].iter() {
            self.net.enable(endname, false);
        }

        // incoming ClientEnds
        for names in s.endnames.iter() {
            self.net.enable(&names[i], false);
        }
    }

    /// attach server i to the net.
    pub fn connect(&self, i: usize) {
        debug!("connect({})", i);
        let mut s = self.lock();
        s.connected[i] = true;

        for j in 0..self.n {
            if s.connected[j] {
                // outgoing ClientEnds
                self.net.enable(&s.endnames[i][j], true);
                // incoming ClientEnds
                self.net.enable(&s.endnames[j][i], true);
            }
        }
    }

    /// Stops every peer and tears the network down. Later calls do nothing.
    ///
    /// Fails if the scenario ran past its time limit.
    pub fn cleanup(&self) -> Result<()> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let peers: Vec<P> = {
            let mut s = self.lock();
            s.peers.iter_mut().filter_map(Option::take).collect()
        };
        for peer in peers {
            peer.kill();
        }
        self.net.cleanup();
        self.check_timeout()
    }
}

impl<P: Peer> Drop for Cluster<P> {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!("cleanup: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use crate::fake::{eventually, FakePeer};
    use crate::snapshot::SnapshotImage;

    fn image(values: &[&str]) -> Vec<u8> {
        let mut entries = vec![Entry::default()];
        entries.extend(values.iter().map(|v| Entry::new(*v)));
        SnapshotImage {
            last_included_index: values.len() as u64,
            entries,
        }
        .encode()
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(matches!(
            Cluster::<FakePeer>::new(0),
            Err(Error::Config(_))
        ));
        let config = ClusterConfig::default()
            .with_snapshot(true)
            .with_snapshot_interval(0);
        assert!(matches!(
            Cluster::<FakePeer>::new_with(3, config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_start_and_partition() {
        let cfg = Cluster::<FakePeer>::new(3).unwrap();
        assert_eq!(cfg.n(), 3);
        for i in 0..3 {
            assert!(cfg.is_connected(i));
            assert_eq!(cfg.peer(i).map(|p| p.me()), Some(i));
        }

        cfg.disconnect(1);
        assert!(!cfg.is_connected(1));
        assert!(cfg.is_connected(0));
        cfg.connect(1);
        assert!(cfg.is_connected(1));
    }

    #[test]
    fn test_endnames_are_fresh_on_restart() {
        let cfg = Cluster::<FakePeer>::new(2).unwrap();
        let before = cfg.lock().endnames[0].clone();
        assert!(before.iter().all(|name| name.len() == ENDNAME_LEN));
        cfg.start1(0).unwrap();
        let after = cfg.lock().endnames[0].clone();
        for (old, new) in before.iter().zip(after.iter()) {
            assert_ne!(old, new);
        }
    }

    #[test]
    fn test_crash_and_restart_keep_persisted_state() {
        let cfg = Cluster::<FakePeer>::new(3).unwrap();
        let old = cfg.peer(2).unwrap();
        old.persist(b"raft state", &image(&["a", "b"]));
        assert_eq!(cfg.log_size(), b"raft state".len());

        cfg.crash1(2);
        assert!(old.is_killed());
        assert!(cfg.peer(2).is_none());
        assert!(!cfg.is_connected(2));
        // the retired instance can no longer touch what the next one reads.
        old.persist(b"zombie", b"");

        cfg.start1(2).unwrap();
        let new = cfg.peer(2).unwrap();
        assert!(!new.is_killed());
        assert_eq!(new.raft_state(), b"raft state".to_vec());
        assert_eq!(cfg.snapshot_size(), image(&["a", "b"]).len());

        // the snapshot is replayed into the ledger before the peer runs.
        assert_eq!(cfg.n_committed(2).unwrap(), (1, Some(Entry::new("b"))));
        assert_eq!(cfg.lock().storage.last_applied(2), 2);
    }

    #[test]
    fn test_restart_with_corrupt_snapshot() {
        let cfg = Cluster::<FakePeer>::new(1).unwrap();
        cfg.peer(0).unwrap().persist(b"state", b"junk");
        assert!(matches!(
            cfg.start1(0),
            Err(Error::SnapshotDecode { server: 0, .. })
        ));
        assert!(matches!(
            cfg.failure(),
            Some(Error::SnapshotDecode { .. })
        ));
    }

    #[test]
    fn test_restart_with_snapshot_past_u64() {
        let cfg = Cluster::<FakePeer>::new(1).unwrap();
        let image = SnapshotImage {
            last_included_index: u64::MAX,
            entries: vec![],
        };
        cfg.peer(0).unwrap().persist(b"state", &image.encode());
        assert!(matches!(
            cfg.start1(0),
            Err(Error::SnapshotDecode { server: 0, .. })
        ));
        // the cluster is still usable.
        assert_eq!(cfg.last_applied(0), 0);
        assert!(cfg.n_committed(1).is_ok());
    }

    #[test]
    fn test_restarted_peer_counts_once_replayed() {
        let cfg = Cluster::<FakePeer>::new(3).unwrap();
        for i in 0..3 {
            let peer = cfg.peer(i).unwrap();
            for x in 1..=5u64 {
                peer.commit(x, &Entry::new(x.to_string()));
            }
        }
        assert!(eventually(|| (0..3).all(|i| cfg.last_applied(i) == 5)));

        cfg.crash1(1);
        cfg.start1(1).unwrap();
        cfg.connect(1);
        assert_eq!(cfg.last_applied(1), 0);

        let peer = cfg.peer(1).unwrap();
        for x in 1..=5u64 {
            peer.commit(x, &Entry::new(x.to_string()));
        }
        assert!(eventually(|| cfg.last_applied(1) == 5));
        assert_eq!(cfg.n_committed(5).unwrap(), (3, Some(Entry::new("5"))));
        assert!(cfg.failure().is_none());
    }

    #[test]
    fn test_restarted_peer_replaying_a_different_value() {
        let cfg = Cluster::<FakePeer>::new(2).unwrap();
        for i in 0..2 {
            cfg.peer(i).unwrap().commit(1, &Entry::new("a"));
        }
        assert!(eventually(|| cfg.n_committed(1).unwrap().0 == 2));

        cfg.start1(1).unwrap();
        cfg.peer(1).unwrap().commit(1, &Entry::new("b"));
        assert!(eventually(|| cfg.failure().is_some()));
        assert!(matches!(
            cfg.failure(),
            Some(Error::Divergence { index: 1, server: 1, .. })
        ));
    }

    #[test]
    fn test_seeded_names_are_reproducible() {
        let config = ClusterConfig::default().with_seed(7);
        let a = Cluster::<FakePeer>::new_with(2, config.clone()).unwrap();
        let b = Cluster::<FakePeer>::new_with(2, config).unwrap();
        assert_eq!(a.lock().endnames, b.lock().endnames);
        assert_eq!(a.random(), b.random());
    }

    #[test]
    fn test_cleanup_kills_everyone() {
        let cfg = Cluster::<FakePeer>::new(3).unwrap();
        let peers: Vec<_> = (0..3).map(|i| cfg.peer(i).unwrap()).collect();
        cfg.cleanup().unwrap();
        assert!(peers.iter().all(FakePeer::is_killed));
        assert!(cfg.peer(0).is_none());
        // a second cleanup is a no-op.
        cfg.cleanup().unwrap();
    }
}

use std::thread;
use std::time::{Duration, Instant};

use crate::cluster::Cluster;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::peer::Peer;

/// How long `one` waits on a leader that accepted the command.
const LEADER_WINDOW: Duration = Duration::from_millis(2000);
/// How long `one` keeps trying before giving up.
const AGREEMENT_TIMEOUT: Duration = Duration::from_secs(10);
const COMMIT_POLL: Duration = Duration::from_millis(20);
const NO_LEADER_BACKOFF: Duration = Duration::from_millis(50);
/// Polls made by `wait`, with exponential backoff from 10ms up to 1s.
const WAIT_POLLS: usize = 30;
const WAIT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const WAIT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Outcome of [`Cluster::wait`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decided {
    /// Enough peers committed the index, to this entry.
    Committed(Option<Entry>),
    /// Some peer moved past the submission term before enough peers
    /// committed; the entry may have been replaced.
    Superseded,
}

impl<P: Peer> Cluster<P> {
    // wait for at least n servers to commit.
    // but don't wait forever.
    pub fn wait(&self, index: u64, n: usize, start_term: Option<u64>) -> Result<Decided> {
        let mut to = WAIT_BACKOFF_MIN;
        for _ in 0..WAIT_POLLS {
            let (nd, _) = self.n_committed(index)?;
            if nd >= n {
                break;
            }
            thread::sleep(to);
            if to < WAIT_BACKOFF_MAX {
                to *= 2;
            }
            if self.is_finished() {
                return Err(Error::Shutdown);
            }
            if let Some(start_term) = start_term {
                if self.max_term() > start_term {
                    // someone has moved on
                    // can no longer guarantee that we'll "win"
                    return Ok(Decided::Superseded);
                }
            }
        }
        let (nd, cmd) = self.n_committed(index)?;
        if nd < n {
            return Err(self.fatal(Error::NotEnoughCommitted {
                index,
                committed: nd,
                wanted: n,
            }));
        }
        Ok(Decided::Committed(cmd))
    }

    /// do a complete agreement.
    /// it might choose the wrong leader initially,
    /// and have to re-submit after giving up.
    /// entirely gives up after about 10 seconds.
    /// indirectly checks that the servers agree on the
    /// same value, since n_committed() checks this,
    /// as do the appliers that read from the apply channels.
    /// returns index.
    /// if retry==true, may submit the command multiple
    /// times, in case a leader fails just after start().
    /// if retry==false, calls start() only once, in order
    /// to simplify the early tests.
    pub fn one(&self, cmd: impl Into<Entry>, expected_servers: usize, retry: bool) -> Result<u64> {
        let cmd = cmd.into();
        let t0 = Instant::now();
        let mut starts = 0;
        while t0.elapsed() < AGREEMENT_TIMEOUT && !self.is_finished() {
            // try all the servers, maybe one is the leader.
            let mut index = None;
            for _ in 0..self.n {
                starts = (starts + 1) % self.n;
                let peer = {
                    let s = self.lock();
                    if s.connected[starts] {
                        s.peers[starts].clone()
                    } else {
                        None
                    }
                };
                if let Some(peer) = peer {
                    match peer.start(&cmd) {
                        Ok((index1, _)) => {
                            index = Some(index1);
                            break;
                        }
                        Err(e) => debug!("start cmd {} failed: {}", cmd, e),
                    }
                }
            }

            if let Some(index) = index {
                // somebody claimed to be the leader and to have
                // submitted our command; wait a while for agreement.
                let t1 = Instant::now();
                while t1.elapsed() < LEADER_WINDOW {
                    let (nd, cmd1) = self.n_committed(index)?;
                    if nd > 0 && nd >= expected_servers && cmd1.as_ref() == Some(&cmd) {
                        // committed, and it was the command we submitted.
                        return Ok(index);
                    }
                    if self.is_finished() {
                        return Err(Error::Shutdown);
                    }
                    thread::sleep(COMMIT_POLL);
                }
                if !retry {
                    return Err(self.fatal(Error::NoAgreement(cmd)));
                }
            } else {
                thread::sleep(NO_LEADER_BACKOFF);
            }
        }
        if self.is_finished() {
            return Err(Error::Shutdown);
        }
        Err(self.fatal(Error::NoAgreement(cmd)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakePeer;

    fn cluster(n: usize) -> Cluster<FakePeer> {
        Cluster::new(n).unwrap()
    }

    #[test]
    fn test_one_finds_the_leader() {
        let cfg = cluster(3);
        cfg.peer(2).unwrap().set_state(1, true);
        assert_eq!(cfg.one("x1", 1, false), Ok(1));
        assert_eq!(cfg.one("x2", 1, true), Ok(2));
        assert_eq!(cfg.n_committed(2).unwrap(), (1, Some(Entry::new("x2"))));
    }

    #[test]
    fn test_one_without_quorum() {
        let cfg = cluster(3);
        cfg.peer(0).unwrap().set_state(1, true);
        // only the leader itself ever commits.
        assert_eq!(
            cfg.one("x", 2, false),
            Err(Error::NoAgreement(Entry::new("x")))
        );
        assert!(cfg.failure().is_some());
    }

    #[test]
    fn test_one_skips_disconnected_leader() {
        let cfg = cluster(2);
        let stale = cfg.peer(0).unwrap();
        stale.set_state(1, true);
        cfg.disconnect(0);
        cfg.peer(1).unwrap().set_state(2, true);
        assert_eq!(cfg.one("x", 1, true), Ok(1));
        assert_eq!(cfg.n_committed(1).unwrap(), (1, Some(Entry::new("x"))));
        assert!(cfg.lock().storage.entry(0, 1).is_none());
    }

    #[test]
    fn test_one_after_cleanup() {
        let cfg = cluster(1);
        cfg.cleanup().unwrap();
        assert_eq!(cfg.one("x", 1, true), Err(Error::Shutdown));
    }

    #[test]
    fn test_wait_for_quorum() {
        let cfg = cluster(3);
        for i in 0..3 {
            cfg.peer(i).unwrap().commit(1, &Entry::new("x"));
        }
        assert_eq!(
            cfg.wait(1, 3, Some(0)),
            Ok(Decided::Committed(Some(Entry::new("x"))))
        );
    }

    #[test]
    fn test_wait_gives_up_on_a_newer_term() {
        let cfg = cluster(3);
        let leader = cfg.peer(0).unwrap();
        leader.set_state(1, true);
        leader.set_auto_commit(false);
        let (index, term) = leader.start(&Entry::new("x")).unwrap();

        // a peer has moved on before anything committed.
        cfg.peer(2).unwrap().set_state(term + 1, false);
        assert_eq!(cfg.wait(index, 2, Some(term)), Ok(Decided::Superseded));
    }

    #[test]
    fn test_wait_picks_up_late_commits() {
        let cfg = cluster(2);
        let peers: Vec<_> = (0..2).map(|i| cfg.peer(i).unwrap()).collect();
        let committer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            for peer in &peers {
                peer.commit(1, &Entry::new("late"));
            }
        });
        assert_eq!(
            cfg.wait(1, 2, None),
            Ok(Decided::Committed(Some(Entry::new("late"))))
        );
        committer.join().unwrap();
        assert!(cfg.failure().is_none());
    }
}

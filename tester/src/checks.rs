use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use crate::cluster::Cluster;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::peer::Peer;

/// Polls made by `check_one_leader` before giving up.
const LEADER_POLLS: usize = 10;

impl<P: Peer> Cluster<P> {
    /// The connected peers, with handles taken under the lock and queried
    /// outside it.
    fn connected_peers(&self) -> Vec<(usize, P)> {
        let s = self.lock();
        s.peers
            .iter()
            .enumerate()
            .filter(|(i, _)| s.connected[*i])
            .filter_map(|(i, peer)| peer.clone().map(|peer| (i, peer)))
            .collect()
    }

    // check that there's exactly one leader.
    // try a few times in case re-elections are needed.
    pub fn check_one_leader(&self) -> Result<usize> {
        for _iters in 0..LEADER_POLLS {
            let ms = 450 + (self.random() % 100);
            thread::sleep(Duration::from_millis(ms));
            if self.is_finished() {
                return Err(Error::Shutdown);
            }
            self.check_apply_errors()?;

            let mut leaders = HashMap::new();
            for (i, peer) in self.connected_peers() {
                let (term, is_leader) = peer.get_state();
                if is_leader {
                    leaders.entry(term).or_insert_with(Vec::new).push(i);
                }
            }

            let mut last_term_with_leader = 0;
            for (term, leaders) in &leaders {
                if leaders.len() > 1 {
                    let mut leaders = leaders.clone();
                    leaders.sort_unstable();
                    return Err(self.fatal(Error::MultipleLeaders {
                        term: *term,
                        leaders,
                    }));
                }
                if *term > last_term_with_leader {
                    last_term_with_leader = *term;
                }
            }

            if let Some(leaders) = leaders.get(&last_term_with_leader) {
                return Ok(leaders[0]);
            }
        }

        Err(self.fatal(Error::NoLeader))
    }

    /// check that everyone agrees on the term. `None` when no peer is
    /// connected.
    pub fn check_terms(&self) -> Result<Option<u64>> {
        let mut term = None;
        for (_, peer) in self.connected_peers() {
            let (xterm, _) = peer.get_state();
            match term {
                None => term = Some(xterm),
                Some(term) if term != xterm => {
                    return Err(self.fatal(Error::TermDisagreement {
                        first: term,
                        second: xterm,
                    }));
                }
                Some(_) => {}
            }
        }
        Ok(term)
    }

    /// check that there's no leader
    pub fn check_no_leader(&self) -> Result<()> {
        for (i, peer) in self.connected_peers() {
            let (_, is_leader) = peer.get_state();
            if is_leader {
                return Err(self.fatal(Error::UnexpectedLeader(i)));
            }
        }
        Ok(())
    }

    /// how many servers think a log entry is committed?
    pub fn n_committed(&self, index: u64) -> Result<(usize, Option<Entry>)> {
        self.check_apply_errors()?;
        let res = self.lock().storage.n_committed(index);
        res.map_err(|e| self.fatal(e))
    }

    /// The highest term any running peer is in.
    pub(crate) fn max_term(&self) -> u64 {
        let peers: Vec<P> = self.lock().peers.iter().flatten().cloned().collect();
        peers
            .iter()
            .map(|peer| peer.get_state().0)
            .max()
            .unwrap_or(0)
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
    fn test_one_leader() {
        let cfg = cluster(3);
        cfg.peer(1).unwrap().set_state(1, true);
        assert_eq!(cfg.check_one_leader(), Ok(1));
    }

    #[test]
    fn test_newest_leader_wins() {
        let cfg = cluster(3);
        cfg.peer(0).unwrap().set_state(1, true);
        cfg.peer(2).unwrap().set_state(3, true);
        assert_eq!(cfg.check_one_leader(), Ok(2));
    }

    #[test]
    fn test_two_leaders_in_one_term() {
        let cfg = cluster(3);
        cfg.peer(0).unwrap().set_state(2, true);
        cfg.peer(2).unwrap().set_state(2, true);
        let err = cfg.check_one_leader().unwrap_err();
        assert_eq!(
            err,
            Error::MultipleLeaders {
                term: 2,
                leaders: vec![0, 2]
            }
        );
        assert!(err.is_safety_violation());
        assert_eq!(cfg.failure(), Some(err));
    }

    #[test]
    fn test_disconnected_leaders_are_ignored() {
        let cfg = cluster(3);
        cfg.peer(0).unwrap().set_state(2, true);
        cfg.disconnect(0);
        cfg.check_no_leader().unwrap();
        cfg.peer(1).unwrap().set_state(2, true);
        assert_eq!(cfg.check_one_leader(), Ok(1));

        cfg.connect(0);
        assert_eq!(cfg.check_no_leader(), Err(Error::UnexpectedLeader(0)));
    }

    #[test]
    fn test_no_leader_ever() {
        let cfg = cluster(1);
        assert_eq!(cfg.check_one_leader(), Err(Error::NoLeader));
    }

    #[test]
    fn test_terms() {
        let cfg = cluster(3);
        assert_eq!(cfg.check_terms(), Ok(Some(0)));
        cfg.peer(1).unwrap().set_state(4, false);
        assert_eq!(
            cfg.check_terms(),
            Err(Error::TermDisagreement {
                first: 0,
                second: 4
            })
        );
        cfg.disconnect(0);
        cfg.disconnect(2);
        assert_eq!(cfg.check_terms(), Ok(Some(4)));
        cfg.disconnect(1);
        assert_eq!(cfg.check_terms(), Ok(None));
    }

    #[test]
    fn test_recorded_apply_error_surfaces() {
        let cfg = cluster(2);
        cfg.peer(0).unwrap().set_state(1, true);
        cfg.lock()
            .storage
            .record_error(1, Error::OutOfOrder { server: 1, index: 3 });
        assert_eq!(
            cfg.check_one_leader(),
            Err(Error::OutOfOrder { server: 1, index: 3 })
        );
        assert!(cfg.n_committed(1).is_err());
    }

    #[test]
    fn test_checks_stop_after_cleanup() {
        let cfg = cluster(1);
        cfg.peer(0).unwrap().set_state(1, true);
        cfg.cleanup().unwrap();
        assert_eq!(cfg.check_one_leader(), Err(Error::Shutdown));
    }
}

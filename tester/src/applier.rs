use std::sync::{Arc, Mutex};

use futures::channel::mpsc::UnboundedReceiver;
use futures::stream::StreamExt;
use labrpc::codec;
use raft::ApplyMsg;

use crate::cluster::Shared;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::peer::Peer;
use crate::snapshot::SnapshotImage;

/// Drains one peer's apply channel into the ledger.
pub(crate) struct Applier<P> {
    pub me: usize,
    pub peer: P,
    pub shared: Arc<Mutex<Shared<P>>>,
    /// Snapshot interval; `None` when snapshots are off.
    pub snapshot: Option<u64>,
}

impl<P: Peer> Applier<P> {
    /// Runs until the peer closes its apply channel. Errors are recorded
    /// and draining carries on, so the peer never blocks on a stuck channel.
    pub async fn run(self, mut apply_ch: UnboundedReceiver<ApplyMsg>) {
        while let Some(msg) = apply_ch.next().await {
            if let Err(e) = self.apply(msg) {
                error!("apply error: {}", e);
                self.shared.lock().unwrap().storage.record_error(self.me, e);
            }
        }
        debug!("applier {} exits", self.me);
    }

    fn apply(&self, msg: ApplyMsg) -> Result<()> {
        match msg {
            ApplyMsg::Command { data, index } => {
                let entry: Entry = codec::decode(&data).map_err(|e| Error::BadCommand {
                    server: self.me,
                    index,
                    reason: e.to_string(),
                })?;
                let (res, image) = {
                    let mut s = self.shared.lock().unwrap();
                    let res = s
                        .storage
                        .apply_command(self.me, index, entry, self.snapshot.is_some());
                    let image = match self.snapshot {
                        Some(interval) if res.is_ok() && index % interval == interval - 1 => {
                            Some(s.storage.snapshot_upto(self.me, index))
                        }
                        _ => None,
                    };
                    (res, image)
                };
                if let Some(image) = image {
                    self.peer.snapshot(index, &image);
                }
                res
            }
            ApplyMsg::Snapshot { data, index, .. } if self.snapshot.is_some() => {
                let image = SnapshotImage::decode(self.me, &data)?;
                let mut s = self.shared.lock().unwrap();
                s.storage.install_image(self.me, &image, Some(index))?;
                Ok(())
            }
            ApplyMsg::Snapshot { index, .. } => {
                warn!("applier {} ignores snapshot at {}", self.me, index);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ClusterConfig;
    use crate::entry::Entry;
    use crate::error::Error;
    use crate::fake::{eventually, FakePeer};
    use crate::snapshot::SnapshotImage;
    use crate::Cluster;

    fn e(value: &str) -> Entry {
        Entry::new(value)
    }

    #[test]
    fn test_commits_reach_the_ledger() {
        let cfg = Cluster::<FakePeer>::new(3).unwrap();
        for i in 0..3 {
            let peer = cfg.peer(i).unwrap();
            peer.commit(1, &e("x"));
            peer.commit(2, &e("y"));
        }
        assert!(eventually(|| cfg.n_committed(2).unwrap().0 == 3));
        assert_eq!(cfg.n_committed(1).unwrap(), (3, Some(e("x"))));
        assert!(cfg.failure().is_none());
    }

    #[test]
    fn test_divergence_is_recorded_and_draining_continues() {
        let cfg = Cluster::<FakePeer>::new(2).unwrap();
        cfg.peer(0).unwrap().commit(1, &e("x"));
        assert!(eventually(|| cfg.n_committed(1).unwrap().0 == 1));

        let peer = cfg.peer(1).unwrap();
        peer.commit(1, &e("y"));
        peer.commit(2, &e("z"));
        assert!(eventually(|| cfg.lock().storage.entry(1, 2).is_some()));

        let err = cfg.n_committed(2).unwrap_err();
        assert!(matches!(err, Error::Divergence { index: 1, server: 1, other: 0, .. }));
        assert!(err.is_safety_violation());
        // and it sticks.
        assert_eq!(cfg.failure(), Some(err));
    }

    #[test]
    fn test_out_of_order_apply() {
        let cfg = Cluster::<FakePeer>::new(1).unwrap();
        cfg.peer(0).unwrap().commit(2, &e("x"));
        assert!(eventually(|| cfg.failure().is_some()));
        assert_eq!(
            cfg.failure(),
            Some(Error::OutOfOrder {
                server: 0,
                index: 2
            })
        );
    }

    #[test]
    fn test_undecodable_command() {
        let cfg = Cluster::<FakePeer>::new(1).unwrap();
        cfg.peer(0).unwrap().commit_raw(1, vec![0xff, 0xff]);
        assert!(eventually(|| cfg.failure().is_some()));
        assert!(matches!(
            cfg.failure(),
            Some(Error::BadCommand { server: 0, index: 1, .. })
        ));
    }

    #[test]
    fn test_snapshots_requested_at_interval() {
        let config = ClusterConfig::default()
            .with_snapshot(true)
            .with_snapshot_interval(3);
        let cfg = Cluster::<FakePeer>::new_with(1, config).unwrap();
        let peer = cfg.peer(0).unwrap();
        for (index, value) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            peer.commit(index as u64 + 1, &e(value));
        }
        assert!(eventually(|| peer.snapshots().len() == 2));

        let snapshots = peer.snapshots();
        assert_eq!(snapshots[0].0, 2);
        assert_eq!(snapshots[1].0, 5);
        let image = SnapshotImage::decode(0, &snapshots[0].1).unwrap();
        assert_eq!(image.last_included_index, 2);
        assert_eq!(image.entries[1..], [e("a"), e("b")]);
        assert!(cfg.failure().is_none());
    }

    #[test]
    fn test_snapshot_mode_requires_sequential_applies() {
        let config = ClusterConfig::default().with_snapshot(true);
        let cfg = Cluster::<FakePeer>::new_with(1, config).unwrap();
        let peer = cfg.peer(0).unwrap();
        peer.commit(1, &e("a"));
        peer.commit(1, &e("a"));
        assert!(eventually(|| cfg.failure().is_some()));
        assert_eq!(
            cfg.failure(),
            Some(Error::ApplyGap {
                server: 0,
                expected: 2,
                index: 1
            })
        );
    }

    #[test]
    fn test_installed_snapshot_replaces_ledger() {
        let config = ClusterConfig::default().with_snapshot(true);
        let cfg = Cluster::<FakePeer>::new_with(2, config).unwrap();
        let leader = cfg.peer(0).unwrap();
        for (index, value) in ["a", "b", "c"].iter().enumerate() {
            leader.commit(index as u64 + 1, &e(value));
        }
        assert!(eventually(|| cfg.n_committed(3).unwrap().0 == 1));
        let image = cfg.lock().storage.snapshot_upto(0, 3);

        let follower = cfg.peer(1).unwrap();
        follower.install(3, image);
        follower.commit(4, &e("d"));
        assert!(eventually(|| cfg.n_committed(4).unwrap().0 == 1));
        assert_eq!(cfg.n_committed(2).unwrap(), (2, Some(e("b"))));
        assert_eq!(cfg.lock().storage.last_applied(1), 4);
    }

    #[test]
    fn test_snapshot_past_u64_is_recorded() {
        let config = ClusterConfig::default().with_snapshot(true);
        let cfg = Cluster::<FakePeer>::new_with(1, config).unwrap();
        let peer = cfg.peer(0).unwrap();
        let image = SnapshotImage {
            last_included_index: u64::MAX,
            entries: vec![],
        };
        peer.install(u64::MAX, image.encode());
        assert!(eventually(|| cfg.failure().is_some()));
        assert!(matches!(
            cfg.failure(),
            Some(Error::SnapshotDecode { server: 0, .. })
        ));

        // the channel is still drained.
        peer.commit(1, &e("a"));
        assert!(eventually(|| cfg.lock().storage.last_applied(0) == 1));
    }

    #[test]
    fn test_snapshot_ignored_without_snapshot_mode() {
        let cfg = Cluster::<FakePeer>::new(1).unwrap();
        let peer = cfg.peer(0).unwrap();
        peer.commit(1, &e("a"));
        peer.install(1, b"junk".to_vec());
        peer.commit(2, &e("b"));
        assert!(eventually(|| cfg.last_applied(0) == 2));
        assert_eq!(cfg.n_committed(1).unwrap(), (1, Some(e("a"))));
        assert!(cfg.failure().is_none());
    }

    #[test]
    fn test_snapshot_index_must_match() {
        let config = ClusterConfig::default().with_snapshot(true);
        let cfg = Cluster::<FakePeer>::new_with(1, config).unwrap();
        let peer = cfg.peer(0).unwrap();
        peer.commit(1, &e("a"));
        assert!(eventually(|| cfg.n_committed(1).unwrap().0 == 1));
        let image = cfg.lock().storage.snapshot_upto(0, 1);
        peer.install(5, image);
        assert!(eventually(|| cfg.failure().is_some()));
        assert!(matches!(
            cfg.failure(),
            Some(Error::SnapshotIndexMismatch {
                index: 5,
                last_included: 1,
                ..
            })
        ));
    }
}

use std::collections::HashMap;

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::snapshot::SnapshotImage;

/// The replay ledger: a copy of each server's committed entries, as reported
/// on its apply channel, checked against every other server as they arrive.
pub struct Storage {
    // copy of each server's committed entries
    logs: Vec<HashMap<u64, Entry>>,
    last_applied: Vec<u64>,
    // first apply error of each server
    apply_err: Vec<Option<Error>>,
    max_index: u64,
    max_index0: u64,
}

impl Storage {
    pub fn new(n: usize) -> Storage {
        Storage {
            logs: vec![HashMap::new(); n],
            last_applied: vec![0; n],
            apply_err: vec![None; n],
            max_index: 0,
            max_index0: 0,
        }
    }

    /// Records that server `i` committed `entry` at `index`.
    ///
    /// The entry is stored even when a check fails, so later checks see what
    /// the server claimed.
    pub fn check_logs(&mut self, i: usize, index: u64, entry: Entry) -> Result<()> {
        let mut err = None;
        for (j, log) in self.logs.iter().enumerate() {
            if let Some(old) = log.get(&index) {
                if *old != entry {
                    // some server has already committed a different value for this entry!
                    err = Some(Error::Divergence {
                        index,
                        server: i,
                        value: entry.clone(),
                        other: j,
                        other_value: old.clone(),
                    });
                    break;
                }
            }
        }

        let log = &mut self.logs[i];
        let prev_ok = index <= 1 || log.contains_key(&(index - 1));
        log.insert(index, entry);
        if index > self.max_index {
            self.max_index = index;
        }

        match err {
            Some(err) => Err(err),
            None if !prev_ok => Err(Error::OutOfOrder { server: i, index }),
            None => Ok(()),
        }
    }

    /// Applies one committed command of server `i`. With `strict` set, the
    /// index must also directly follow the last one applied, which holds
    /// whenever snapshots keep the ledger in step with the peer.
    pub fn apply_command(&mut self, i: usize, index: u64, entry: Entry, strict: bool) -> Result<()> {
        let expected = self.last_applied[i].saturating_add(1);
        let res = if strict && index != expected {
            Err(Error::ApplyGap {
                server: i,
                expected,
                index,
            })
        } else {
            self.check_logs(i, index, entry)
        };
        self.last_applied[i] = index;
        res
    }

    /// Replaces server `i`'s ledger with the contents of a snapshot. `index`
    /// is the index the snapshot was delivered at, if it was delivered on
    /// the apply channel rather than read back from a persister.
    pub fn ingest_snapshot(&mut self, i: usize, data: &[u8], index: Option<u64>) -> Result<u64> {
        let image = SnapshotImage::decode(i, data)?;
        self.install_image(i, &image, index)
    }

    /// Like `ingest_snapshot`, for an image that is already decoded.
    pub fn install_image(&mut self, i: usize, image: &SnapshotImage, index: Option<u64>) -> Result<u64> {
        let last_included = image.last_included_index;
        if let Some(index) = index {
            if index != last_included {
                return Err(Error::SnapshotIndexMismatch {
                    server: i,
                    index,
                    last_included,
                });
            }
        }
        self.logs[i] = image
            .committed()
            .map(|(index, entry)| (index, entry.clone()))
            .collect();
        self.last_applied[i] = last_included;
        Ok(last_included)
    }

    /// Encodes server `i`'s ledger up to and including `index`.
    pub fn snapshot_upto(&self, i: usize, index: u64) -> Vec<u8> {
        let log = &self.logs[i];
        let image = SnapshotImage {
            last_included_index: index,
            entries: (0..=index)
                .map(|k| log.get(&k).cloned().unwrap_or_default())
                .collect(),
        };
        image.encode()
    }

    /// how many servers think a log entry is committed?
    pub fn n_committed(&self, index: u64) -> Result<(usize, Option<Entry>)> {
        let mut count = 0;
        let mut cmd: Option<&Entry> = None;
        for log in &self.logs {
            if let Some(cmd1) = log.get(&index) {
                if let Some(cmd) = cmd {
                    if cmd != cmd1 {
                        return Err(Error::ValuesDisagree {
                            index,
                            first: cmd.clone(),
                            second: cmd1.clone(),
                        });
                    }
                }
                count += 1;
                cmd = Some(cmd1);
            }
        }
        Ok((count, cmd.cloned()))
    }

    /// A restarted server replays its log from scratch.
    pub fn reset(&mut self, i: usize) {
        self.last_applied[i] = 0;
    }

    pub fn last_applied(&self, i: usize) -> u64 {
        self.last_applied[i]
    }

    pub fn entry(&self, i: usize, index: u64) -> Option<&Entry> {
        self.logs[i].get(&index)
    }

    /// Keeps the first error reported for server `i`.
    pub fn record_error(&mut self, i: usize, err: Error) {
        if self.apply_err[i].is_none() {
            self.apply_err[i] = Some(err);
        }
    }

    /// The first apply error recorded for any server.
    pub fn apply_error(&self) -> Option<&Error> {
        self.apply_err.iter().flatten().next()
    }

    pub fn max_index(&self) -> u64 {
        self.max_index
    }

    /// Starts counting agreements from the current watermark.
    pub fn mark(&mut self) {
        self.max_index0 = self.max_index;
    }

    /// Agreements since the last `mark`.
    pub fn commands_since_mark(&self) -> u64 {
        self.max_index - self.max_index0
    }
}

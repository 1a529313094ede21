use labrpc::codec;

use crate::entry::Entry;
use crate::error::{Error, Result};

/// The snapshot a cluster hands to its peers for compaction.
///
/// `entries[k]` is the entry committed at index `k`, for every `k` up to
/// and including `last_included_index`. Index 0 holds nothing and is
/// encoded as an empty placeholder.
#[derive(Clone, PartialEq, Message)]
pub struct SnapshotImage {
    #[prost(uint64, tag = "1")]
    pub last_included_index: u64,
    #[prost(message, repeated, tag = "2")]
    pub entries: Vec<Entry>,
}

impl SnapshotImage {
    pub fn encode(&self) -> Vec<u8> {
        codec::encode_to_vec(self)
    }

    /// Decodes an image taken by peer `server`, checking that it covers
    /// exactly `0..=last_included_index`.
    pub fn decode(server: usize, data: &[u8]) -> Result<SnapshotImage> {
        if data.is_empty() {
            return Err(Error::SnapshotDecode {
                server,
                reason: "empty snapshot".to_owned(),
            });
        }
        let image: SnapshotImage = codec::decode(data).map_err(|e| Error::SnapshotDecode {
            server,
            reason: e.to_string(),
        })?;
        if image.last_included_index.checked_add(1) != Some(image.entries.len() as u64) {
            return Err(Error::SnapshotDecode {
                server,
                reason: format!(
                    "{} entries for last included index {}",
                    image.entries.len(),
                    image.last_included_index
                ),
            });
        }
        Ok(image)
    }

    /// The committed entries, paired with their indexes, skipping the
    /// placeholder at index 0.
    pub fn committed(&self) -> impl Iterator<Item = (u64, &Entry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .skip(1)
            .map(|(index, entry)| (index as u64, entry))
    }
}

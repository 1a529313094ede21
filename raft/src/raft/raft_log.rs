use crate::proto::LogEntry;

/// A Raft log whose prefix up to `base` may have been compacted into a
/// snapshot.
///
/// `entries[0]` is a sentinel standing for index `base`; it carries the term
/// of the last compacted entry and no data. Index 0 is the empty prefix.
#[derive(Clone, Debug)]
pub struct RaftLog {
    entries: Vec<LogEntry>,
    base: u64,
}

impl Default for RaftLog {
    fn default() -> Self {
        RaftLog::with_base(0, 0)
    }
}

impl RaftLog {
    pub fn with_base(base: u64, base_term: u64) -> RaftLog {
        RaftLog {
            entries: vec![LogEntry {
                term: base_term,
                data: vec![],
            }],
            base,
        }
    }

    pub fn restore(base: u64, base_term: u64, entries: Vec<LogEntry>) -> RaftLog {
        let mut log = RaftLog::with_base(base, base_term);
        log.entries.extend(entries);
        log
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn base_term(&self) -> u64 {
        self.entries[0].term
    }

    pub fn last_index(&self) -> u64 {
        self.base + self.entries.len() as u64 - 1
    }

    pub fn last_term(&self) -> u64 {
        self.entries[self.entries.len() - 1].term
    }

    fn offset(&self, index: u64) -> Option<usize> {
        if index < self.base || index > self.last_index() {
            None
        } else {
            Some((index - self.base) as usize)
        }
    }

    /// Term of the entry at `index`, including the sentinel at `base`.
    pub fn term(&self, index: u64) -> Option<u64> {
        self.offset(index).map(|i| self.entries[i].term)
    }

    /// The entry at `index`; compacted entries and the sentinel are gone.
    pub fn entry(&self, index: u64) -> Option<&LogEntry> {
        match self.offset(index) {
            Some(0) | None => None,
            Some(i) => Some(&self.entries[i]),
        }
    }

    /// Entries from `index` to the end.
    pub fn entries_from(&self, index: u64) -> Vec<LogEntry> {
        match self.offset(index.max(self.base + 1)) {
            Some(i) => self.entries[i..].to_vec(),
            None => vec![],
        }
    }

    pub fn append(&mut self, entry: LogEntry) -> u64 {
        self.entries.push(entry);
        self.last_index()
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = LogEntry>) {
        self.entries.extend(entries);
    }

    /// Drops `index` and everything after it. The sentinel is never dropped.
    pub fn truncate_from(&mut self, index: u64) {
        if let Some(i) = self.offset(index.max(self.base + 1)) {
            self.entries.truncate(i);
        }
    }

    /// First index of the run of entries sharing the term at `index`.
    pub fn first_index_of_term_at(&self, index: u64) -> u64 {
        let term = self.term(index);
        let mut first = index;
        while first > self.base + 1 && self.term(first - 1) == term {
            first -= 1;
        }
        first
    }

    /// Discards everything up to and including `index`, which must be in the
    /// log. The new sentinel keeps the term of the entry at `index`.
    pub fn compact_to(&mut self, index: u64) {
        if let Some(i) = self.offset(index) {
            let rest = self.entries.split_off(i);
            self.entries = rest;
            self.entries[0].data.clear();
            self.base = index;
        }
    }
}

use std::time::Duration;

use thiserror::Error;

use crate::entry::Entry;

/// A failed check.
///
/// Safety violations mean the peers under test are broken; the rest are
/// liveness failures that are only reported once the retry budget of the
/// check ran out.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid cluster config: {0}")]
    Config(String),

    // safety
    #[error("term {term} has {leaders:?} (>1) leaders")]
    MultipleLeaders { term: u64, leaders: Vec<usize> },
    #[error("commit index={index} server={server} {value} != server={other} {other_value}")]
    Divergence {
        index: u64,
        server: usize,
        value: Entry,
        other: usize,
        other_value: Entry,
    },
    #[error("server {server} apply out of order {index}")]
    OutOfOrder { server: usize, index: u64 },
    #[error("server {server} apply out of order, expected index {expected}, got {index}")]
    ApplyGap {
        server: usize,
        expected: u64,
        index: u64,
    },
    #[error("committed values do not match: index {index}, {first}, {second}")]
    ValuesDisagree {
        index: u64,
        first: Entry,
        second: Entry,
    },
    #[error("server {server} snapshot decode error: {reason}")]
    SnapshotDecode { server: usize, reason: String },
    #[error("server {server} snapshot index {index} doesn't match last included index {last_included}")]
    SnapshotIndexMismatch {
        server: usize,
        index: u64,
        last_included: u64,
    },
    #[error("server {server} committed an undecodable command at {index}: {reason}")]
    BadCommand {
        server: usize,
        index: u64,
        reason: String,
    },
    #[error("servers disagree on term: {first} != {second}")]
    TermDisagreement { first: u64, second: u64 },
    #[error("expected no leader, but {0} claims to be leader")]
    UnexpectedLeader(usize),

    // liveness
    #[error("expected one leader, got none")]
    NoLeader,
    #[error("one({0}) failed to reach agreement")]
    NoAgreement(Entry),
    #[error("only {committed} decided for index {index}; wanted {wanted}")]
    NotEnoughCommitted {
        index: u64,
        committed: usize,
        wanted: usize,
    },
    #[error("test took longer than {0:?}")]
    TimeLimit(Duration),

    #[error("rpc: {0}")]
    Rpc(#[from] labrpc::Error),
    #[error("cluster is shut down")]
    Shutdown,
}

impl Error {
    /// Whether the error proves the peers broke a safety property, as
    /// opposed to merely not making progress in time.
    pub fn is_safety_violation(&self) -> bool {
        matches!(
            self,
            Error::MultipleLeaders { .. }
                | Error::Divergence { .. }
                | Error::OutOfOrder { .. }
                | Error::ApplyGap { .. }
                | Error::ValuesDisagree { .. }
                | Error::SnapshotDecode { .. }
                | Error::SnapshotIndexMismatch { .. }
                | Error::BadCommand { .. }
                | Error::TermDisagreement { .. }
                | Error::UnexpectedLeader(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

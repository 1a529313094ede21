use futures::channel::oneshot::Canceled;
use thiserror::Error;

use crate::codec::{DecodeError, EncodeError};

/// Why an RPC did not produce a reply.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("unimplemented: {0}")]
    Unimplemented(String),
    #[error("encode request: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode reply: {0}")]
    Decode(#[from] DecodeError),
    #[error("reply channel dropped")]
    Recv(#[from] Canceled),
    /// The request or its reply was lost, or the link is disabled.
    #[error("rpc timed out")]
    Timeout,
    /// The destination was removed from the network, or the network is torn down.
    #[error("destination stopped")]
    Stopped,
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

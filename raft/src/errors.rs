use thiserror::Error;

use labrpc::codec::{DecodeError, EncodeError};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("encode: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("rpc: {0}")]
    Rpc(#[from] labrpc::Error),
    #[error("not leader")]
    NotLeader,
}

pub type Result<T> = std::result::Result<T, Error>;

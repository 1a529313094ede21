//! A simulated RPC network for exercising replicated services.
//!
//! Clients are named ends of one-way links to named servers. The network can
//! disable individual links, drop or delay requests and replies, reorder
//! replies, and remove servers outright, while counting every call and byte.

#![allow(clippy::new_without_default)]

pub mod codec;
mod client;
mod error;
mod network;
mod server;

pub use self::client::{Client, Rpc};
pub use self::error::{Error, Result};
pub use self::network::Network;
pub use self::server::{RpcFuture, Server, ServerBuilder, Service};

//! Raft: the contracts a replicated-state-machine tester consumes
//! ([`ApplyMsg`], [`persister::Persister`]) and a reference peer
//! ([`Node`]) that speaks them over a `labrpc` network.

#[macro_use]
extern crate log;
#[macro_use]
extern crate prost_derive;

pub mod errors;
pub mod persister;
pub mod proto;
mod raft;

pub use self::raft::{add_raft_service, ApplyMsg, Node, Raft, RaftConfig, Role, State};

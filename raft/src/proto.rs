//! Raft's RPC and persistence messages, and a typed client for the `raft`
//! service.

use std::future::Future;

use labrpc::RpcFuture;

#[derive(Clone, PartialEq, Message)]
pub struct LogEntry {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(bytes, tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RequestVoteArgs {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(uint64, tag = "2")]
    pub candidate_id: u64,
    #[prost(uint64, tag = "3")]
    pub last_log_index: u64,
    #[prost(uint64, tag = "4")]
    pub last_log_term: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct RequestVoteReply {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(bool, tag = "2")]
    pub vote_granted: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct AppendEntriesArgs {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(uint64, tag = "2")]
    pub leader_id: u64,
    #[prost(uint64, tag = "3")]
    pub prev_log_index: u64,
    #[prost(uint64, tag = "4")]
    pub prev_log_term: u64,
    #[prost(message, repeated, tag = "5")]
    pub entries: Vec<LogEntry>,
    #[prost(uint64, tag = "6")]
    pub leader_commit: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct AppendEntriesReply {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(bool, tag = "2")]
    pub success: bool,
    /// On rejection, where the leader should resume sending from.
    #[prost(uint64, tag = "3")]
    pub conflict_index: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct InstallSnapshotArgs {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(uint64, tag = "2")]
    pub leader_id: u64,
    #[prost(uint64, tag = "3")]
    pub last_included_index: u64,
    #[prost(uint64, tag = "4")]
    pub last_included_term: u64,
    #[prost(bytes, tag = "5")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct InstallSnapshotReply {
    #[prost(uint64, tag = "1")]
    pub term: u64,
}

/// What a peer writes through its persister's protocol-state blob.
#[derive(Clone, PartialEq, Message)]
pub struct PersistentState {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(uint64, optional, tag = "2")]
    pub voted_for: Option<u64>,
    #[prost(uint64, tag = "3")]
    pub log_base: u64,
    #[prost(uint64, tag = "4")]
    pub log_base_term: u64,
    #[prost(message, repeated, tag = "5")]
    pub entries: Vec<LogEntry>,
}

/// The calling end of one peer-to-peer link.
#[derive(Clone)]
pub struct RaftClient {
    client: labrpc::Client,
}

impl RaftClient {
    pub fn new(client: labrpc::Client) -> RaftClient {
        RaftClient { client }
    }

    pub fn request_vote(
        &self,
        args: &RequestVoteArgs,
    ) -> RpcFuture<labrpc::Result<RequestVoteReply>> {
        self.client.call("raft.request_vote", args)
    }

    pub fn append_entries(
        &self,
        args: &AppendEntriesArgs,
    ) -> RpcFuture<labrpc::Result<AppendEntriesReply>> {
        self.client.call("raft.append_entries", args)
    }

    pub fn install_snapshot(
        &self,
        args: &InstallSnapshotArgs,
    ) -> RpcFuture<labrpc::Result<InstallSnapshotReply>> {
        self.client.call("raft.install_snapshot", args)
    }

    pub fn spawn<F>(&self, f: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.client.spawn(f);
    }
}

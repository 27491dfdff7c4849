//! The closed set of messages carried between replicas, and between clients
//! and replicas.

use serde::{Deserialize, Serialize};

use crate::log::Entry;

pub type NodeId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from: NodeId,
    pub to: NodeId,
    pub body: MessageBody,
}

impl Message {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>, body: MessageBody) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageBody {
    AppendEntries {
        term: u64,
        leader_id: NodeId,
        prev_index: u64,
        prev_term: u64,
        entries: Vec<Entry>,
        leader_commit: u64,
    },
    AppendEntriesSucceeded {
        term: u64,
        match_index: u64,
    },
    AppendEntriesFailed {
        term: u64,
    },
    RequestVote {
        term: u64,
        candidate_id: NodeId,
        last_index: u64,
        last_term: u64,
    },
    VoteGranted {
        term: u64,
    },
    VoteDenied {
        term: u64,
    },
    ClientSet {
        cmd: String,
    },
    /// `cmd_id` is the 1-based log index the command was appended at.
    ClientSetSucceeded {
        cmd_id: u64,
    },
}

impl MessageBody {
    /// The `term` field carried by RPC bodies that participate in the
    /// universal pre-check (§4.1). `ClientSet`/`ClientSetSucceeded` carry no
    /// term and are exempt from the pre-check.
    pub fn term(&self) -> Option<u64> {
        match self {
            MessageBody::AppendEntries { term, .. } => Some(*term),
            MessageBody::AppendEntriesSucceeded { term, .. } => Some(*term),
            MessageBody::AppendEntriesFailed { term } => Some(*term),
            MessageBody::RequestVote { term, .. } => Some(*term),
            MessageBody::VoteGranted { term } => Some(*term),
            MessageBody::VoteDenied { term } => Some(*term),
            MessageBody::ClientSet { .. } | MessageBody::ClientSetSucceeded { .. } => None,
        }
    }
}

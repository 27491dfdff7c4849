//! The three-variant role state machine. Each variant carries only the
//! volatile bookkeeping particular to that role; the fields common to every
//! role (term, log, commit index, ...) live on `Replica` itself (see
//! `replica.rs`).
//!
//! This replaces the source's class-swap trick (`self.__class__ = Follower`)
//! with a tagged enum, per the "role change by class-swap" design note.

use std::collections::{HashMap, HashSet};

use crate::message::NodeId;

#[derive(Debug, Clone, Default)]
pub struct FollowerState;

#[derive(Debug, Clone, Default)]
pub struct CandidateState {
    pub votes_received: HashSet<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct LeaderState {
    /// Index of the next log entry to send to each peer.
    pub next_index: HashMap<NodeId, u64>,
    /// Highest log index known to be replicated on each peer.
    pub match_index: HashMap<NodeId, u64>,
    pub last_heartbeat_sent: f64,
    /// log index -> the client (`frm`) whose `ClientSet` produced it, so the
    /// eventual `ClientSetSucceeded` can be routed back once it commits.
    pub pending_clients: HashMap<u64, NodeId>,
}

#[derive(Debug, Clone)]
pub enum Role {
    Follower(FollowerState),
    Candidate(CandidateState),
    Leader(LeaderState),
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Follower(_) => "Follower",
            Role::Candidate(_) => "Candidate",
            Role::Leader(_) => "Leader",
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader(_))
    }

    pub fn is_follower(&self) -> bool {
        matches!(self, Role::Follower(_))
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, Role::Candidate(_))
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Follower(FollowerState)
    }
}

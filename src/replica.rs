//! The deterministic step function: `(role, persistent state, volatile
//! state, inbox, now) -> (role, updated state, outbox)`.
//!
//! `Replica::step` is the only entry point. It never reads a clock and never
//! performs network I/O; the one synchronous I/O it does perform is the
//! call into the injected `Storage` collaborator to durably persist
//! `current_term`/`voted_for`/log mutations before any reply that
//! acknowledges them is placed on the outbox.

use std::collections::{HashMap, HashSet};

use crate::errors::PersistError;
use crate::log::{Entry, InMemoryLog, LogStore};
use crate::message::{Message, MessageBody, NodeId};
use crate::rng::RandomSource;
use crate::role::{CandidateState, FollowerState, LeaderState, Role};
use crate::storage::{PersistentState, Storage};

#[derive(Debug, Clone, Copy)]
pub struct ReplicaConfig {
    pub min_election_timeout: f64,
    pub election_timeout_jitter: f64,
    pub heartbeat_interval: f64,
    pub max_entries_per_batch: usize,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            min_election_timeout: 0.15,
            election_timeout_jitter: 0.15,
            heartbeat_interval: 0.02,
            max_entries_per_batch: 8,
        }
    }
}

/// Everything a single `step` call produced: messages to hand to the
/// transport, and newly-committed entries to hand to the state machine.
#[derive(Debug, Default)]
pub struct StepOutput {
    pub outbox: Vec<Message>,
    pub applied: Vec<(u64, Entry)>,
}

pub struct Replica {
    id: NodeId,
    peers: Vec<NodeId>,
    current_term: u64,
    voted_for: Option<NodeId>,
    log: InMemoryLog,
    commit_index: u64,
    last_applied: u64,
    role: Role,
    election_deadline: f64,
    rng: Box<dyn RandomSource>,
    storage: Box<dyn Storage>,
    config: ReplicaConfig,
}

impl Replica {
    pub fn new(
        id: impl Into<NodeId>,
        peers: Vec<NodeId>,
        now: f64,
        config: ReplicaConfig,
        rng: Box<dyn RandomSource>,
        mut storage: Box<dyn Storage>,
    ) -> Result<Self, PersistError> {
        let persisted = storage.load()?;
        let (current_term, voted_for, log) = match persisted {
            Some(s) => (s.current_term, s.voted_for, InMemoryLog::new(s.log)),
            None => (0, None, InMemoryLog::default()),
        };
        let mut replica = Self {
            id: id.into(),
            peers,
            current_term,
            voted_for,
            log,
            commit_index: 0,
            last_applied: 0,
            role: Role::default(),
            election_deadline: now,
            rng,
            storage,
            config,
        };
        replica.reset_election_deadline(now);
        Ok(replica)
    }

    // --- accessors used by the driver and by tests ---

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn peers(&self) -> &[NodeId] {
        &self.peers
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<&NodeId> {
        self.voted_for.as_ref()
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn log(&self) -> &InMemoryLog {
        &self.log
    }

    pub fn is_leader(&self) -> bool {
        self.role.is_leader()
    }

    pub fn election_deadline(&self) -> f64 {
        self.election_deadline
    }

    // --- the public contract ---

    pub fn step(&mut self, now: f64, inbox: Vec<Message>) -> Result<StepOutput, PersistError> {
        let mut outbox = Vec::new();
        let mut applied = Vec::new();
        self.clock_tick(now, &mut outbox)?;
        for msg in inbox {
            self.handle(msg, now, &mut outbox, &mut applied)?;
        }
        Ok(StepOutput { outbox, applied })
    }

    // --- internals ---

    fn persist(&mut self) -> Result<(), PersistError> {
        let state = PersistentState {
            current_term: self.current_term,
            voted_for: self.voted_for.clone(),
            log: self.log.entries().to_vec(),
        };
        self.storage.save(&state)
    }

    fn reset_election_deadline(&mut self, now: f64) {
        let jitter_ms = self
            .rng
            .jitter_ms((self.config.election_timeout_jitter * 1000.0) as u64);
        self.election_deadline =
            now + self.config.min_election_timeout + (jitter_ms as f64 / 1000.0);
    }

    fn apply_committed(&mut self, applied: &mut Vec<(u64, Entry)>) {
        while self.last_applied < self.commit_index {
            self.last_applied += 1;
            let entry = self.log.entry_at(self.last_applied);
            applied.push((self.last_applied, entry));
        }
    }

    fn clock_tick(&mut self, now: f64, outbox: &mut Vec<Message>) -> Result<(), PersistError> {
        let should_start_election = match &self.role {
            Role::Follower(_) | Role::Candidate(_) => now > self.election_deadline,
            Role::Leader(_) => false,
        };
        if should_start_election {
            self.role = self.start_election(now, outbox)?;
            return Ok(());
        }

        if let Role::Leader(state) = &self.role {
            if now - state.last_heartbeat_sent >= self.config.heartbeat_interval {
                let mut state = state.clone();
                state.last_heartbeat_sent = now;
                self.send_heartbeats(&state, outbox);
                self.role = Role::Leader(state);
            }
        }
        Ok(())
    }

    fn handle(
        &mut self,
        msg: Message,
        now: f64,
        outbox: &mut Vec<Message>,
        applied: &mut Vec<(u64, Entry)>,
    ) -> Result<(), PersistError> {
        let Message { from, body, .. } = msg;

        // Universal pre-check (§4.1): applies to every message carrying a term.
        if let Some(term) = body.term() {
            if term > self.current_term {
                self.current_term = term;
                self.voted_for = None;
                self.persist()?;
                self.role = Role::Follower(FollowerState);
                self.reset_election_deadline(now);
            } else if term < self.current_term {
                let reply = if matches!(body, MessageBody::RequestVote { .. }) {
                    MessageBody::VoteDenied {
                        term: self.current_term,
                    }
                } else {
                    MessageBody::AppendEntriesFailed {
                        term: self.current_term,
                    }
                };
                outbox.push(Message::new(self.id.clone(), from, reply));
                return Ok(());
            }
        }

        let role = std::mem::replace(&mut self.role, Role::Follower(FollowerState));
        self.role = match (role, body) {
            (
                Role::Follower(s),
                MessageBody::AppendEntries {
                    leader_id,
                    prev_index,
                    prev_term,
                    entries,
                    leader_commit,
                    ..
                },
            ) => {
                self.follower_handle_append_entries(
                    now,
                    leader_id,
                    prev_index,
                    prev_term,
                    entries,
                    leader_commit,
                    outbox,
                    applied,
                )?;
                Role::Follower(s)
            }
            (
                Role::Follower(s),
                MessageBody::RequestVote {
                    candidate_id,
                    last_index,
                    last_term,
                    ..
                },
            ) => {
                self.follower_handle_request_vote(
                    now,
                    from,
                    candidate_id,
                    last_index,
                    last_term,
                    outbox,
                )?;
                Role::Follower(s)
            }

            (
                Role::Candidate(_),
                MessageBody::AppendEntries {
                    leader_id,
                    prev_index,
                    prev_term,
                    entries,
                    leader_commit,
                    ..
                },
            ) => {
                // A same-term AppendEntries means a leader already exists for
                // this term: accept its authority and re-process as a Follower.
                self.follower_handle_append_entries(
                    now,
                    leader_id,
                    prev_index,
                    prev_term,
                    entries,
                    leader_commit,
                    outbox,
                    applied,
                )?;
                Role::Follower(FollowerState)
            }
            (Role::Candidate(mut s), MessageBody::VoteGranted { .. }) => {
                s.votes_received.insert(from);
                if s.votes_received.len() * 2 > self.peers.len() + 1 {
                    self.become_leader(now, outbox)?
                } else {
                    Role::Candidate(s)
                }
            }
            (Role::Candidate(s), MessageBody::VoteDenied { .. }) => Role::Candidate(s),

            (Role::Leader(mut s), MessageBody::ClientSet { cmd }) => {
                self.leader_handle_client_set(from, cmd, &mut s, outbox, applied)?;
                Role::Leader(s)
            }
            (
                Role::Leader(mut s),
                MessageBody::AppendEntriesSucceeded { match_index, .. },
            ) => {
                self.leader_handle_append_succeeded(from, match_index, &mut s, outbox, applied);
                Role::Leader(s)
            }
            (Role::Leader(mut s), MessageBody::AppendEntriesFailed { .. }) => {
                self.leader_handle_append_failed(from, &mut s, outbox);
                Role::Leader(s)
            }

            // Unexpected message shape for this role: never fatal, just ignore.
            (role, _) => role,
        };

        Ok(())
    }

    // --- Follower ---

    fn follower_handle_append_entries(
        &mut self,
        now: f64,
        leader_id: NodeId,
        prev_index: u64,
        prev_term: u64,
        entries: Vec<Entry>,
        leader_commit: u64,
        outbox: &mut Vec<Message>,
        applied: &mut Vec<(u64, Entry)>,
    ) -> Result<(), PersistError> {
        self.reset_election_deadline(now);

        if !self.log.check(prev_index, prev_term) {
            outbox.push(Message::new(
                self.id.clone(),
                leader_id,
                MessageBody::AppendEntriesFailed {
                    term: self.current_term,
                },
            ));
            return Ok(());
        }

        let match_index = prev_index + entries.len() as u64;
        self.log
            .append_at(prev_index, prev_term, &entries)
            .expect("check() already confirmed prev_index/prev_term match");
        self.persist()?;
        outbox.push(Message::new(
            self.id.clone(),
            leader_id,
            MessageBody::AppendEntriesSucceeded {
                term: self.current_term,
                match_index,
            },
        ));

        if leader_commit > self.commit_index {
            self.commit_index = leader_commit.min(self.log.last_index());
            self.apply_committed(applied);
        }

        Ok(())
    }

    fn follower_handle_request_vote(
        &mut self,
        now: f64,
        from: NodeId,
        candidate_id: NodeId,
        last_index: u64,
        last_term: u64,
        outbox: &mut Vec<Message>,
    ) -> Result<(), PersistError> {
        let already_voted_elsewhere = self
            .voted_for
            .as_ref()
            .is_some_and(|v| v != &candidate_id);
        let log_up_to_date = last_term > self.log.last_term()
            || (last_term == self.log.last_term() && last_index >= self.log.last_index());

        if !already_voted_elsewhere && log_up_to_date {
            self.voted_for = Some(candidate_id);
            self.persist()?;
            self.reset_election_deadline(now);
            outbox.push(Message::new(
                self.id.clone(),
                from,
                MessageBody::VoteGranted {
                    term: self.current_term,
                },
            ));
        } else {
            outbox.push(Message::new(
                self.id.clone(),
                from,
                MessageBody::VoteDenied {
                    term: self.current_term,
                },
            ));
        }
        Ok(())
    }

    // --- Candidate ---

    fn start_election(
        &mut self,
        now: f64,
        outbox: &mut Vec<Message>,
    ) -> Result<Role, PersistError> {
        self.current_term += 1;
        self.voted_for = Some(self.id.clone());
        self.persist()?;
        self.reset_election_deadline(now);

        let mut votes_received = HashSet::new();
        votes_received.insert(self.id.clone());

        for peer in &self.peers {
            outbox.push(Message::new(
                self.id.clone(),
                peer.clone(),
                MessageBody::RequestVote {
                    term: self.current_term,
                    candidate_id: self.id.clone(),
                    last_index: self.log.last_index(),
                    last_term: self.log.last_term(),
                },
            ));
        }

        // A single-node (or already-satisfied) cluster wins on its own vote;
        // nobody else will ever send a VoteGranted to trigger the check.
        if votes_received.len() * 2 > self.peers.len() + 1 {
            return self.become_leader(now, outbox);
        }

        Ok(Role::Candidate(CandidateState { votes_received }))
    }

    fn become_leader(&mut self, now: f64, outbox: &mut Vec<Message>) -> Result<Role, PersistError> {
        let mut next_index = HashMap::new();
        let mut match_index = HashMap::new();
        for peer in &self.peers {
            next_index.insert(peer.clone(), self.log.last_index() + 1);
            match_index.insert(peer.clone(), 0);
        }
        let state = LeaderState {
            next_index,
            match_index,
            last_heartbeat_sent: now,
            pending_clients: HashMap::new(),
        };
        self.send_heartbeats(&state, outbox);
        Ok(Role::Leader(state))
    }

    // --- Leader ---

    fn build_append_entries(&self, peer: &NodeId, state: &LeaderState) -> MessageBody {
        let next_index = *state
            .next_index
            .get(peer)
            .unwrap_or(&(self.log.last_index() + 1));
        let prev_index = next_index.saturating_sub(1);
        let prev_term = self.log.term_at(prev_index);
        let entries = self.log.entries_from(next_index, self.config.max_entries_per_batch);
        MessageBody::AppendEntries {
            term: self.current_term,
            leader_id: self.id.clone(),
            prev_index,
            prev_term,
            entries,
            leader_commit: self.commit_index,
        }
    }

    fn send_heartbeats(&self, state: &LeaderState, outbox: &mut Vec<Message>) {
        for peer in &self.peers {
            let body = self.build_append_entries(peer, state);
            outbox.push(Message::new(self.id.clone(), peer.clone(), body));
        }
    }

    fn leader_handle_client_set(
        &mut self,
        from: NodeId,
        cmd: String,
        state: &mut LeaderState,
        outbox: &mut Vec<Message>,
        applied: &mut Vec<(u64, Entry)>,
    ) -> Result<(), PersistError> {
        let prev_index = self.log.last_index();
        let prev_term = self.log.last_term();
        let entry = Entry {
            term: self.current_term,
            command: cmd,
        };
        self.log
            .append_at(prev_index, prev_term, std::slice::from_ref(&entry))
            .expect("leader appending at its own last_index cannot mismatch");
        self.persist()?;

        let new_index = prev_index + 1;
        state.pending_clients.insert(new_index, from);

        for peer in &self.peers {
            outbox.push(Message::new(
                self.id.clone(),
                peer.clone(),
                MessageBody::AppendEntries {
                    term: self.current_term,
                    leader_id: self.id.clone(),
                    prev_index,
                    prev_term,
                    entries: vec![entry.clone()],
                    leader_commit: self.commit_index,
                },
            ));
        }

        // A lone leader (or one whose self-vote already was a majority) has
        // nobody to ack this append, so check immediately rather than
        // waiting on an AppendEntriesSucceeded that will never arrive.
        self.commit_and_notify(state, outbox, applied);
        Ok(())
    }

    /// Advances `commit_index` as far as the current `match_index` map
    /// allows and replies to any client whose command just committed.
    fn commit_and_notify(
        &mut self,
        state: &mut LeaderState,
        outbox: &mut Vec<Message>,
        applied: &mut Vec<(u64, Entry)>,
    ) {
        self.advance_commit_index(state);
        self.apply_committed(applied);
        for (index, _) in applied.iter() {
            if let Some(client) = state.pending_clients.remove(index) {
                outbox.push(Message::new(
                    self.id.clone(),
                    client,
                    MessageBody::ClientSetSucceeded { cmd_id: *index },
                ));
            }
        }
    }

    fn leader_handle_append_succeeded(
        &mut self,
        from: NodeId,
        match_index: u64,
        state: &mut LeaderState,
        outbox: &mut Vec<Message>,
        applied: &mut Vec<(u64, Entry)>,
    ) {
        let cur_match = *state.match_index.get(&from).unwrap_or(&0);
        let new_match = cur_match.max(match_index);
        state.match_index.insert(from.clone(), new_match);

        let cur_next = *state.next_index.get(&from).unwrap_or(&1);
        state.next_index.insert(from.clone(), cur_next.max(new_match + 1));

        self.commit_and_notify(state, outbox, applied);

        let last_index = self.log.last_index();
        if new_match < last_index {
            let body = self.build_append_entries(&from, state);
            outbox.push(Message::new(self.id.clone(), from, body));
        }
    }

    /// Find the highest `N > commit_index` backed by a majority (including
    /// self) that is also from the leader's own current term (§4.5).
    fn advance_commit_index(&mut self, state: &LeaderState) {
        let last_index = self.log.last_index();
        let majority = (self.peers.len() + 1) / 2 + 1;

        let mut n = self.commit_index + 1;
        while n <= last_index {
            if self.log.term_at(n) == self.current_term {
                let replicated = 1 + state.match_index.values().filter(|&&m| m >= n).count();
                if replicated >= majority {
                    self.commit_index = n;
                }
            }
            n += 1;
        }
    }

    fn leader_handle_append_failed(
        &mut self,
        from: NodeId,
        state: &mut LeaderState,
        outbox: &mut Vec<Message>,
    ) {
        let cur_next = *state.next_index.get(&from).unwrap_or(&1);
        let new_next = cur_next.saturating_sub(1).max(1);
        state.next_index.insert(from.clone(), new_next);

        let body = self.build_append_entries(&from, state);
        outbox.push(Message::new(self.id.clone(), from, body));
    }
}

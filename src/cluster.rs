//! Static cluster membership and the tunables every replica is built with.
//!
//! Configuration is a small `node-id=host:port` text file, one member per
//! line, mirroring the teacher crate's plain-text `servers.conf` loader in
//! `bin/client.rs` rather than reaching for a config-file crate nothing else
//! in this workspace needs.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::message::NodeId;

pub const MIN_ELECTION_TIMEOUT: f64 = 0.15;
pub const ELECTION_TIMEOUT_JITTER: f64 = 0.15;
pub const HEARTBEAT_INTERVAL: f64 = 0.02;
pub const MAX_ENTRIES_PER_BATCH: usize = 8;

/// Membership in config-file order. `Replica::peers` (and therefore every
/// peer-id-ordered outbox in `replica.rs`) is built from `peers_of`, so the
/// order here is the order the rest of the system treats as "peer-id
/// order" (SPEC_FULL.md §5) — a plain `Vec` keeps that order instead of a
/// `HashMap`'s unspecified iteration order.
#[derive(Debug, Clone, Default)]
pub struct ClusterConfig {
    members: Vec<(NodeId, SocketAddr)>,
}

impl ClusterConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading cluster config {}", path.as_ref().display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut members = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (id, addr) = line
                .split_once('=')
                .with_context(|| format!("malformed cluster config line: {line}"))?;
            let addr: SocketAddr = addr
                .trim()
                .parse()
                .with_context(|| format!("invalid address for {id}: {addr}"))?;
            let id = id.trim().to_string();
            if let Some(existing) = members.iter_mut().find(|(m, _): &&mut (NodeId, SocketAddr)| *m == id) {
                *existing = (id, addr);
            } else {
                members.push((id, addr));
            }
        }
        if members.is_empty() {
            bail!("cluster config has no members");
        }
        Ok(Self { members })
    }

    pub fn addr(&self, id: &str) -> Option<SocketAddr> {
        self.members.iter().find(|(m, _)| m == id).map(|(_, a)| *a)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.members.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Every member's id except `id` itself, in config-file order.
    pub fn peers_of(&self, id: &str) -> Vec<NodeId> {
        self.members
            .iter()
            .filter(|(member, _)| member != id)
            .map(|(member, _)| member.clone())
            .collect()
    }

    pub fn members(&self) -> &[(NodeId, SocketAddr)] {
        &self.members
    }
}

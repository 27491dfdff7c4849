//! The replicated log: an append/overwrite sequence of `(term, command)`
//! entries, 1-indexed, with the Raft log matching property.

use serde::{Deserialize, Serialize};

use crate::errors::LogMismatch;

/// A single committed-or-pending command at a given term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub term: u64,
    pub command: String,
}

/// The operations a Raft core needs from its log. `InMemoryLog` is the only
/// implementation in this crate; the trait exists so the boundary matches
/// what the spec calls out as a collaborator, not because a second
/// implementation is needed today.
pub trait LogStore {
    fn last_index(&self) -> u64;
    fn last_term(&self) -> u64;

    /// Term of the entry at `index`. `0` for the index-0 sentinel. Panics if
    /// `index` is beyond `last_index()` — every caller in this crate derives
    /// `index` from its own bookkeeping, so an out-of-range call is a bug.
    fn term_at(&self, index: u64) -> u64;

    fn entry_at(&self, index: u64) -> Entry;

    /// Up to `max` entries starting at `index` (1-based). Used to build
    /// (optionally batched) `AppendEntries` payloads.
    fn entries_from(&self, index: u64, max: usize) -> Vec<Entry>;

    /// True iff `prev_index == 0`, or an entry exists at `prev_index` whose
    /// term equals `prev_term`.
    fn check(&self, prev_index: u64, prev_term: u64) -> bool;

    /// Append/overwrite entries starting at `prev_index + 1`, per §4.2:
    /// truncate on term conflict, leave matching entries untouched
    /// (idempotent), append anything past the end.
    fn append_at(
        &mut self,
        prev_index: u64,
        prev_term: u64,
        entries: &[Entry],
    ) -> Result<(), LogMismatch>;

    fn entries(&self) -> &[Entry];
}

/// A plain `Vec<Entry>`-backed log. 1-based indices map to `entries[i - 1]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemoryLog {
    entries: Vec<Entry>,
}

impl InMemoryLog {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    fn has_entry_at(&self, index: u64) -> bool {
        index > 0 && index as usize <= self.entries.len()
    }

    fn truncate_to(&mut self, len: usize) {
        self.entries.truncate(len);
    }
}

impl LogStore for InMemoryLog {
    fn last_index(&self) -> u64 {
        self.entries.len() as u64
    }

    fn last_term(&self) -> u64 {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    fn term_at(&self, index: u64) -> u64 {
        if index == 0 {
            return 0;
        }
        assert!(
            self.has_entry_at(index),
            "term_at({index}) out of range (last_index={})",
            self.last_index()
        );
        self.entries[index as usize - 1].term
    }

    fn entry_at(&self, index: u64) -> Entry {
        assert!(
            self.has_entry_at(index),
            "entry_at({index}) out of range (last_index={})",
            self.last_index()
        );
        self.entries[index as usize - 1].clone()
    }

    fn entries_from(&self, index: u64, max: usize) -> Vec<Entry> {
        if index == 0 || index as usize > self.entries.len() {
            return Vec::new();
        }
        let start = index as usize - 1;
        let end = (start + max).min(self.entries.len());
        self.entries[start..end].to_vec()
    }

    fn check(&self, prev_index: u64, prev_term: u64) -> bool {
        if prev_index == 0 {
            return true;
        }
        if !self.has_entry_at(prev_index) {
            return false;
        }
        self.entries[prev_index as usize - 1].term == prev_term
    }

    fn append_at(
        &mut self,
        prev_index: u64,
        prev_term: u64,
        new_entries: &[Entry],
    ) -> Result<(), LogMismatch> {
        if !self.check(prev_index, prev_term) {
            return Err(LogMismatch);
        }

        let mut insert_at = prev_index as usize; // 0-based index of the first new entry
        for entry in new_entries {
            if insert_at < self.entries.len() {
                if self.entries[insert_at].term == entry.term {
                    // Matching entry already present: idempotent, leave it (and
                    // everything after it, for now) in place.
                } else {
                    self.truncate_to(insert_at);
                    self.entries.push(entry.clone());
                }
            } else {
                self.entries.push(entry.clone());
            }
            insert_at += 1;
        }

        Ok(())
    }

    fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

//! The key-value store that consumes `StepOutput::applied` in index order.
//!
//! Commands are plain `SET key value` strings (§4.8); anything else is a
//! malformed command and is logged and dropped rather than treated as a
//! fatal error, per the "drop the offending message and continue" rule in
//! §7.

use std::collections::HashMap;

use log::warn;

use crate::log::Entry;

#[derive(Debug, Default)]
pub struct KvStateMachine {
    data: HashMap<String, String>,
}

impl KvStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_all(&mut self, applied: &[(u64, Entry)]) {
        for (index, entry) in applied {
            self.apply_one(*index, entry);
        }
    }

    fn apply_one(&mut self, index: u64, entry: &Entry) {
        let mut parts = entry.command.splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("SET"), Some(key), Some(value)) => {
                self.data.insert(key.to_string(), value.to_string());
            }
            _ => {
                warn!("dropping malformed command at index {index}: {:?}", entry.command);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.data.get(key)
    }
}

//! Durable persistence for `{current_term, voted_for, log}` — the
//! `PersistentState` collaborator the spec requires every replica to have.
//!
//! `FileStorage` writes a bincode snapshot to a temp file, `fsync`s it, then
//! renames it over the real path. The rename is atomic on the same
//! filesystem, so a crash mid-write leaves the previous durable snapshot
//! intact rather than a torn file — a stricter version of the teacher
//! crate's `persist_state_to_disk`, which overwrites the target file
//! directly.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::PersistError;
use crate::log::Entry;
use crate::message::NodeId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentState {
    pub current_term: u64,
    pub voted_for: Option<NodeId>,
    pub log: Vec<Entry>,
}

pub trait Storage: Send {
    fn load(&self) -> io::Result<Option<PersistentState>>;
    fn save(&mut self, state: &PersistentState) -> Result<(), PersistError>;
}

pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone();
        let mut file_name = tmp.file_name().unwrap_or_default().to_os_string();
        file_name.push(".tmp");
        tmp.set_file_name(file_name);
        tmp
    }
}

impl Storage for FileStorage {
    fn load(&self) -> io::Result<Option<PersistentState>> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let state = bincode::deserialize(&bytes).map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
                })?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&mut self, state: &PersistentState) -> Result<(), PersistError> {
        let bytes = bincode::serialize(state)?;
        let tmp = self.tmp_path();
        {
            let mut file = File::create(&tmp)?;
            io::Write::write_all(&mut file, &bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// An in-memory stand-in for tests that don't exercise restart behavior.
#[derive(Default)]
pub struct NullStorage {
    last: Option<PersistentState>,
}

impl Storage for NullStorage {
    fn load(&self) -> io::Result<Option<PersistentState>> {
        Ok(self.last.clone())
    }

    fn save(&mut self, state: &PersistentState) -> Result<(), PersistError> {
        self.last = Some(state.clone());
        Ok(())
    }
}

/// The path `FileStorage` uses for a given node id, under `dir`.
pub fn state_file_path(dir: impl AsRef<Path>, node_id: &str) -> PathBuf {
    dir.as_ref().join(format!("{node_id}.raftstate"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(term: u64, entries: Vec<Entry>) -> PersistentState {
        PersistentState {
            current_term: term,
            voted_for: Some("S1".to_string()),
            log: entries,
        }
    }

    #[test]
    fn file_storage_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.raftstate");
        let mut storage = FileStorage::new(&path);

        assert_eq!(storage.load().unwrap(), None);

        let s = state(
            3,
            vec![Entry {
                term: 1,
                command: "x=1".to_string(),
            }],
        );
        storage.save(&s).unwrap();

        let loaded = storage.load().unwrap();
        assert_eq!(loaded, Some(s));
    }

    #[test]
    fn file_storage_survives_reopen_with_fresh_handle() {
        // P7: write, drop, reopen -> bit-identical read-back.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.raftstate");
        {
            let mut storage = FileStorage::new(&path);
            storage
                .save(&state(
                    5,
                    vec![
                        Entry { term: 1, command: "a".into() },
                        Entry { term: 2, command: "b".into() },
                    ],
                ))
                .unwrap();
        }

        let reopened = FileStorage::new(&path);
        let loaded = reopened.load().unwrap().unwrap();
        assert_eq!(loaded.current_term, 5);
        assert_eq!(loaded.log.len(), 2);
        assert_eq!(loaded.log[1].command, "b");
    }

    #[test]
    fn null_storage_round_trips_in_memory() {
        let mut storage = NullStorage::default();
        assert_eq!(storage.load().unwrap(), None);
        let s = state(1, vec![]);
        storage.save(&s).unwrap();
        assert_eq!(storage.load().unwrap(), Some(s));
    }
}

use thiserror::Error;

/// Returned by [`crate::log::LogStore::append_at`] when `prev_index`/`prev_term`
/// don't match what's on the log. Never fatal — the caller (the `Follower` role)
/// turns this into an `AppendEntriesFailed` reply.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[error("log entry at prev_index does not match prev_term")]
pub struct LogMismatch;

/// A durability failure on the storage collaborator. Per the error handling
/// design, this is the one error a replica cannot shrug off: `Replica::step`
/// propagates it and the driver shell halts before acknowledging anything
/// that depended on the failed write.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to encode persistent state: {0}")]
    Encode(#[from] bincode::Error),
    #[error("failed to write persistent state to disk: {0}")]
    Io(#[from] std::io::Error),
}

pub mod cluster;
pub mod driver;
pub mod errors;
pub mod log;
pub mod message;
pub mod replica;
pub mod rng;
pub mod role;
pub mod state_machine;
pub mod storage;
pub mod transport;

pub use errors::PersistError;
pub use log::{Entry, InMemoryLog, LogStore};
pub use message::{Message, MessageBody, NodeId};
pub use replica::{Replica, ReplicaConfig, StepOutput};
pub use role::Role;

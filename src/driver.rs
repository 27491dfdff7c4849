//! The external driver shell: repeatedly feeds `(now, inbox)` into a
//! `Replica` and forwards its outbox/applied entries to the transport and
//! state machine collaborators. Mirrors the source's
//! `clock_tick(server, raftnet, now)` adapter function, with `step` already
//! folding the `clock_tick` + per-message `handle` calls the source made
//! separately.
//!
//! This is the only layer allowed to halt the process, and only on a
//! persistence failure (§7).

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::error;

use crate::errors::PersistError;
use crate::replica::Replica;
use crate::state_machine::KvStateMachine;
use crate::transport::Transport;

/// A monotonic clock relative to an arbitrary epoch, handed to the replica
/// as the `now: f64` it never reads for itself.
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// One inbox-drain -> step -> outbox-dispatch cycle.
pub fn tick(
    replica: &mut Replica,
    transport: &dyn Transport,
    state_machine: &mut KvStateMachine,
    now: f64,
) -> Result<(), PersistError> {
    let inbox = transport.poll_inbox();
    let out = replica.step(now, inbox)?;
    state_machine.apply_all(&out.applied);
    for msg in out.outbox {
        transport.dispatch(msg);
    }
    Ok(())
}

/// Runs `tick` forever at `poll_interval`, returning only once a
/// persistence failure halts the replica.
pub async fn run(
    mut replica: Replica,
    transport: Arc<dyn Transport>,
    mut state_machine: KvStateMachine,
    clock: Clock,
    poll_interval: Duration,
) -> Result<(), PersistError> {
    loop {
        let now = clock.now();
        if let Err(e) = tick(&mut replica, transport.as_ref(), &mut state_machine, now) {
            error!("persistence failure on {}: {e}; halting replica", replica.id());
            return Err(e);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

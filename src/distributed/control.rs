//! Control broadcast and broker lifecycle
//!
//! Control signals (pause, resume, save, quit, or anything else the client
//! sends) go to every worker in registry order, one call each. For snapshot
//! signals the returned bands are concatenated in the same order into one
//! world. Quit also moves the broker out of `Running`.
//!
//! ```text
//! Running --quit--> ShuttingDown --drained--> Terminated
//! ```
//!
//! Transitions only move forward.

use crate::distributed::protocol::Signal;
use crate::distributed::registry::{with_deadline, WorkerHandle};
use crate::error::{BrokerError, BrokerResult};
use crate::world::World;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Broker process state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Running,
    ShuttingDown,
    Terminated,
}

/// Shared, observable lifecycle state
///
/// Cloning gives another handle onto the same state.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    tx: Arc<watch::Sender<LifecycleState>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Running);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state() >= LifecycleState::ShuttingDown
    }

    /// Move to `next` if that is a forward transition
    ///
    /// Returns whether the state changed.
    pub fn advance(&self, next: LifecycleState) -> bool {
        self.tx.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Wait until the state is at least `target`
    pub async fn wait_for(&self, target: LifecycleState) {
        let mut rx = self.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|state| *state >= target).await;
    }
}

/// Outcome of a broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Reconstructed world, for snapshot signals
    pub world: Option<World>,
    /// Every worker acknowledged
    pub ack: bool,
}

/// Forward a signal to every worker in order
///
/// A quit signal advances `lifecycle` to `ShuttingDown` once the broadcast is
/// over, whether or not every worker answered.
pub async fn broadcast(
    workers: &[Arc<WorkerHandle>],
    signal: Signal,
    lifecycle: &Lifecycle,
    timeout: Option<Duration>,
) -> BrokerResult<BroadcastOutcome> {
    let result = forward(workers, &signal, timeout).await;

    if signal == Signal::Quit && lifecycle.advance(LifecycleState::ShuttingDown) {
        info!("quit received, broker shutting down");
    }

    result
}

async fn forward(
    workers: &[Arc<WorkerHandle>],
    signal: &Signal,
    timeout: Option<Duration>,
) -> BrokerResult<BroadcastOutcome> {
    let snapshot = signal.wants_snapshot();
    let mut bands = Vec::new();
    let mut ack = true;

    info!(%signal, workers = workers.len(), "broadcasting signal");

    for worker in workers {
        let reply = with_deadline(worker.address(), timeout, worker.signal(signal.clone())).await?;
        debug!(worker = %worker.address(), ack = reply.ack, "signal delivered");
        ack &= reply.ack;

        if snapshot {
            let section = reply.section.ok_or_else(|| BrokerError::Protocol {
                address: worker.address().to_string(),
                detail: format!("no band returned for {}", signal),
            })?;
            bands.push(section);
        }
    }

    Ok(BroadcastOutcome {
        world: snapshot.then(|| World::concat(bands)),
        ack,
    })
}

//! Dispatch/collect executor
//!
//! Fans a run out to every worker at once and fans the results back in.
//!
//! Each partition is sent from its own task. The task delivers its outcome on
//! a dedicated oneshot channel, and the orchestrator drains those channels in
//! partition order. The output row order therefore depends only on partition
//! index, never on which worker finishes first. Nothing is reassembled until
//! every channel has delivered.
//!
//! The first failing call cancels its siblings through a shared
//! [`CancellationToken`]; the run then reports every worker that failed and
//! produces no world.

use crate::distributed::partition::{reassemble, Partition};
use crate::distributed::protocol::{Rows, SubWorldMessage, PROTOCOL_VERSION};
use crate::distributed::registry::{with_deadline, SubRegion, WorkerHandle};
use crate::error::{BrokerError, BrokerResult, WorkerFailure};
use crate::world::World;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs partitions on workers and reassembles the result
#[derive(Debug)]
pub struct Executor {
    next_run_id: AtomicU64,
    dispatch_timeout: Option<Duration>,
}

impl Executor {
    pub fn new(dispatch_timeout: Option<Duration>) -> Self {
        Self {
            next_run_id: AtomicU64::new(1),
            dispatch_timeout,
        }
    }

    /// Step every partition `turns` times and rebuild the world
    ///
    /// `workers[i]` must own `partitions[i]`. Cancelling `cancel` aborts the
    /// run the same way a worker failure does.
    pub async fn run_step(
        &self,
        workers: &[Arc<WorkerHandle>],
        partitions: Vec<Partition>,
        turns: u32,
        cancel: &CancellationToken,
    ) -> BrokerResult<World> {
        if workers.is_empty() {
            return Err(BrokerError::NoWorkers);
        }
        if workers.len() != partitions.len() {
            return Err(BrokerError::InvalidWorld(format!(
                "{} partitions for {} workers",
                partitions.len(),
                workers.len()
            )));
        }

        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let run_token = cancel.child_token();
        let started = Instant::now();

        info!(run_id, workers = workers.len(), turns, "dispatching run");

        let mut receivers = Vec::with_capacity(partitions.len());
        for (partition, handle) in partitions.into_iter().zip(workers.iter().cloned()) {
            let (tx, rx) = oneshot::channel();
            receivers.push((partition.index, handle.address().to_string(), rx));

            let token = run_token.clone();
            let timeout = self.dispatch_timeout;
            tokio::spawn(async move {
                let outcome = dispatch(&handle, partition, run_id, turns, timeout, &token).await;
                if outcome.is_err() {
                    token.cancel();
                }
                // The orchestrator always waits, so a closed receiver cannot happen
                let _ = tx.send(outcome);
            });
        }

        // Barrier: wait for every partition, in partition order
        let mut bands = Vec::with_capacity(receivers.len());
        let mut failures = Vec::new();
        for (index, address, rx) in receivers {
            let outcome = rx.await.unwrap_or_else(|_| {
                Err(BrokerError::Transport {
                    address: address.clone(),
                    detail: "dispatch task ended without a result".to_string(),
                })
            });

            match outcome {
                Ok(rows) => bands.push(rows),
                Err(error) => failures.push(WorkerFailure {
                    partition: index,
                    address,
                    error,
                }),
            }
        }

        if !failures.is_empty() {
            // Report the root causes; cancelled siblings are only noise unless
            // nothing else failed (external cancellation)
            if failures.iter().any(|f| !f.error.is_cancelled()) {
                failures.retain(|f| !f.error.is_cancelled());
            }
            warn!(run_id, failed = failures.len(), "run aborted");
            return Err(BrokerError::RunAborted { failures });
        }

        let world = reassemble(bands);
        info!(
            run_id,
            rows = world.height(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run complete"
        );
        Ok(world)
    }
}

/// Send one partition and validate what comes back
async fn dispatch(
    handle: &WorkerHandle,
    partition: Partition,
    run_id: u64,
    turns: u32,
    timeout: Option<Duration>,
    token: &CancellationToken,
) -> BrokerResult<Rows> {
    let expected = SubRegion {
        height: partition.rows,
        width: partition.width(),
    };
    handle.set_region(expected);

    let request = SubWorldMessage {
        protocol_version: PROTOCOL_VERSION,
        run_id,
        height: partition.height_with_halo(),
        width: expected.width,
        turns,
        bottom_neighbor: partition.bottom_neighbor,
        section: partition.section,
    };

    debug!(
        run_id,
        partition = partition.index,
        worker = %handle.address(),
        rows = expected.height,
        "sending partition"
    );

    let call = with_deadline(handle.address(), timeout, handle.process_sub_world(request));
    let rows = tokio::select! {
        _ = token.cancelled() => {
            return Err(BrokerError::Cancelled {
                address: handle.address().to_string(),
            });
        }
        result = call => result?,
    };

    if rows.len() != expected.height || rows.iter().any(|row| row.len() != expected.width) {
        return Err(BrokerError::Protocol {
            address: handle.address().to_string(),
            detail: format!(
                "expected a {}x{} band, got {} rows",
                expected.height,
                expected.width,
                rows.len()
            ),
        });
    }

    Ok(rows)
}

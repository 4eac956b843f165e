//! Broker error taxonomy
//!
//! Configuration errors and transport errors abort the request they occur in.
//! Turn disagreement is only an error under [`TurnPolicy::Strict`]; otherwise it
//! is logged and the first worker's turn is trusted.
//!
//! [`TurnPolicy::Strict`]: crate::config::TurnPolicy::Strict

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure of a broker operation
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A world was submitted before any worker registered
    #[error("no workers registered")]
    NoWorkers,

    /// More workers than rows: at least one worker would get an empty band
    #[error("{workers} workers registered but the world has only {height} rows")]
    TooManyWorkers { workers: usize, height: usize },

    /// Grid contents do not match the declared dimensions
    #[error("invalid world: {0}")]
    InvalidWorld(String),

    /// Dial, send or receive failure
    #[error("transport failure with worker {address}: {detail}")]
    Transport { address: String, detail: String },

    /// The worker answered with an error reply
    #[error("worker {address} reported: {message}")]
    Worker { address: String, message: String },

    /// The worker answered with something we did not ask for
    #[error("unexpected reply from worker {address}: {detail}")]
    Protocol { address: String, detail: String },

    /// Deadline elapsed before the worker answered
    #[error("worker {address} did not answer within {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    /// Call abandoned because a sibling call failed
    #[error("call to worker {address} cancelled")]
    Cancelled { address: String },

    /// Workers disagree on the current turn
    #[error("turn mismatch: worker {address} is at turn {actual}, turn of record is {expected}")]
    TurnMismatch {
        address: String,
        expected: u64,
        actual: u64,
    },

    /// Quit has been handled; no new runs are started
    #[error("broker is shutting down")]
    ShuttingDown,

    /// One or more workers failed during a run; no world is produced
    #[error("run aborted: {}", FailureList(.failures))]
    RunAborted { failures: Vec<WorkerFailure> },
}

impl BrokerError {
    /// Whether this error stems from bad input rather than a worker
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BrokerError::NoWorkers | BrokerError::TooManyWorkers { .. } | BrokerError::InvalidWorld(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BrokerError::Cancelled { .. })
    }
}

/// A single worker's failure within a run
#[derive(Debug)]
pub struct WorkerFailure {
    /// Partition index the worker owned
    pub partition: usize,
    pub address: String,
    pub error: BrokerError,
}

struct FailureList<'a>(&'a [WorkerFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "partition {} ({}): {}", failure.partition, failure.address, failure.error)?;
        }
        Ok(())
    }
}

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

//! Alive-cell aggregation
//!
//! Asks every worker, in registry order, for its local alive-cell count and
//! turn. The first worker's turn is the turn of record and is passed along to
//! every later worker. Every worker's turn is checked against it; what happens
//! on disagreement depends on the [`TurnPolicy`].

use crate::config::TurnPolicy;
use crate::distributed::protocol::StatusMessage;
use crate::distributed::registry::{with_deadline, WorkerHandle};
use crate::error::{BrokerError, BrokerResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Aggregated alive cells
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliveCount {
    /// Sum of every worker's local count
    pub count: u64,
    /// Turn of record (first worker's turn)
    pub turn: u64,
    /// Workers whose turn disagreed with the turn of record
    pub mismatched: Vec<TurnReport>,
}

/// One worker's disagreeing turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub address: String,
    pub turn: u64,
}

/// Query every worker and sum their alive cells
pub async fn count_alive(
    workers: &[Arc<WorkerHandle>],
    policy: TurnPolicy,
    timeout: Option<Duration>,
) -> BrokerResult<AliveCount> {
    if workers.is_empty() {
        warn!("alive-cell query with no registered workers");
        return Ok(AliveCount {
            count: 0,
            turn: 0,
            mismatched: Vec::new(),
        });
    }

    let mut count = 0u64;
    let mut turn_of_record: Option<u64> = None;
    let mut mismatched = Vec::new();

    for worker in workers {
        let region = worker.region().unwrap_or_default();
        let request = StatusMessage {
            turn: turn_of_record,
            height: region.height,
            width: region.width,
        };

        let report = with_deadline(worker.address(), timeout, worker.status(request)).await?;
        debug!(
            worker = %worker.address(),
            alive = report.alive_cells,
            turn = report.turn,
            "status report"
        );
        count += report.alive_cells;

        match turn_of_record {
            None => turn_of_record = Some(report.turn),
            Some(expected) if expected != report.turn => {
                warn!(
                    worker = %worker.address(),
                    expected,
                    actual = report.turn,
                    "mismatched turns"
                );
                if policy == TurnPolicy::Strict {
                    return Err(BrokerError::TurnMismatch {
                        address: worker.address().to_string(),
                        expected,
                        actual: report.turn,
                    });
                }
                mismatched.push(TurnReport {
                    address: worker.address().to_string(),
                    turn: report.turn,
                });
            }
            Some(_) => {}
        }
    }

    let turn = turn_of_record.unwrap_or(0);
    debug!(count, turn, "alive cells aggregated");

    Ok(AliveCount {
        count,
        turn,
        mismatched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::registry::SubRegion;
    use crate::distributed::testing::MockWorker;

    fn handles(mocks: &[MockWorker]) -> Vec<Arc<WorkerHandle>> {
        mocks
            .iter()
            .map(|m| Arc::new(WorkerHandle::new(m.address())))
            .collect()
    }

    #[tokio::test]
    async fn test_sums_counts() {
        let mocks = vec![
            MockWorker::builder().status(5, 4).spawn().await,
            MockWorker::builder().status(7, 4).spawn().await,
            MockWorker::builder().status(3, 4).spawn().await,
        ];

        let result = count_alive(&handles(&mocks), TurnPolicy::Lenient, None).await.unwrap();
        assert_eq!(result.count, 15);
        assert_eq!(result.turn, 4);
        assert!(result.mismatched.is_empty());
    }

    #[tokio::test]
    async fn test_turn_of_record_passed_on() {
        let mocks = vec![
            MockWorker::builder().status(1, 6).spawn().await,
            MockWorker::builder().status(1, 6).spawn().await,
        ];
        let workers = handles(&mocks);
        workers[1].set_region(SubRegion { height: 4, width: 16 });

        count_alive(&workers, TurnPolicy::Lenient, None).await.unwrap();

        assert_eq!(mocks[0].statuses()[0].turn, None);
        let second = mocks[1].statuses()[0];
        assert_eq!(second.turn, Some(6));
        assert_eq!((second.height, second.width), (4, 16));
    }

    #[tokio::test]
    async fn test_mismatch_is_tolerated_when_lenient() {
        let mocks = vec![
            MockWorker::builder().status(10, 4).spawn().await,
            MockWorker::builder().status(2, 5).spawn().await,
        ];

        let result = count_alive(&handles(&mocks), TurnPolicy::Lenient, None).await.unwrap();
        assert_eq!(result.turn, 4);
        assert_eq!(result.count, 12);
        assert_eq!(
            result.mismatched,
            vec![TurnReport { address: mocks[1].address(), turn: 5 }]
        );
    }

    #[tokio::test]
    async fn test_mismatch_beyond_second_worker_detected() {
        let mocks = vec![
            MockWorker::builder().status(1, 8).spawn().await,
            MockWorker::builder().status(1, 8).spawn().await,
            MockWorker::builder().status(1, 7).spawn().await,
        ];

        let result = count_alive(&handles(&mocks), TurnPolicy::Lenient, None).await.unwrap();
        assert_eq!(result.turn, 8);
        assert_eq!(result.mismatched.len(), 1);
        assert_eq!(result.mismatched[0].address, mocks[2].address());
    }

    #[tokio::test]
    async fn test_mismatch_fails_when_strict() {
        let mocks = vec![
            MockWorker::builder().status(1, 4).spawn().await,
            MockWorker::builder().status(1, 5).spawn().await,
        ];

        let err = count_alive(&handles(&mocks), TurnPolicy::Strict, None).await.unwrap_err();
        assert!(matches!(
            err,
            BrokerError::TurnMismatch { expected: 4, actual: 5, .. }
        ));
    }

    #[tokio::test]
    async fn test_no_workers() {
        let result = count_alive(&[], TurnPolicy::Strict, None).await.unwrap();
        assert_eq!((result.count, result.turn), (0, 0));
    }
}

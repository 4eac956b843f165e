//! Worker registry
//!
//! The registry is the ordered list of worker addresses known to one broker.
//! Registration order is the only ordering contract: it decides which band of
//! the world each worker owns and who its bottom neighbour is.
//!
//! Operations never iterate the live list. They take a [`WorkerRegistry::snapshot`]
//! once and work on that, so a registration that lands mid-run cannot change
//! the worker set underneath it.

use crate::distributed::protocol::{self, Message, Rows, Signal, SignalMessage, SignalReplyMessage, StatusMessage, StatusReportMessage, SubWorldMessage};
use crate::error::{BrokerError, BrokerResult};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Band assigned to a worker by the most recent dispatch (halos excluded)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubRegion {
    pub height: usize,
    pub width: usize,
}

/// Which connection a call travels on
///
/// Step calls can run for a long time, so status and signal calls use a
/// separate connection and are answered while a step is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Dispatch,
    Control,
}

/// A registered worker
///
/// Connections are dialed lazily on first use and reused afterwards. A
/// connection whose call fails (or is abandoned) is dropped and redialed on
/// the next call.
#[derive(Debug)]
pub struct WorkerHandle {
    address: String,
    region: Mutex<Option<SubRegion>>,
    dispatch: tokio::sync::Mutex<Option<TcpStream>>,
    control: tokio::sync::Mutex<Option<TcpStream>>,
}

impl WorkerHandle {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            region: Mutex::new(None),
            dispatch: tokio::sync::Mutex::new(None),
            control: tokio::sync::Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sub-region recorded by the last dispatch, if any
    pub fn region(&self) -> Option<SubRegion> {
        *self.region.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_region(&self, region: SubRegion) {
        *self.region.lock().unwrap_or_else(PoisonError::into_inner) = Some(region);
    }

    /// Send one request on a lane and wait for the reply
    pub async fn call(&self, lane: Lane, msg: &Message) -> BrokerResult<Message> {
        let slot = match lane {
            Lane::Dispatch => &self.dispatch,
            Lane::Control => &self.control,
        };
        let mut slot = slot.lock().await;

        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => {
                debug!(address = %self.address, ?lane, "dialing worker");
                let stream = TcpStream::connect(&self.address).await
                    .map_err(|e| self.transport(format!("dial failed: {}", e)))?;
                stream.set_nodelay(true)
                    .map_err(|e| self.transport(format!("set_nodelay failed: {}", e)))?;
                stream
            }
        };

        let reply = protocol::call(&mut stream, msg).await
            .map_err(|e| self.transport(format!("{:#}", e)))?;

        // Only a connection that completed its exchange goes back to the slot
        *slot = Some(stream);
        Ok(reply)
    }

    /// Step this worker's band
    pub async fn process_sub_world(&self, request: SubWorldMessage) -> BrokerResult<Rows> {
        match self.call(Lane::Dispatch, &Message::ProcessSubWorld(request)).await? {
            Message::SubWorldResult(result) => Ok(result.section),
            other => Err(self.unexpected(other)),
        }
    }

    /// Ask for local alive cells and turn
    pub async fn status(&self, request: StatusMessage) -> BrokerResult<StatusReportMessage> {
        match self.call(Lane::Control, &Message::Status(request)).await? {
            Message::StatusReport(report) => Ok(report),
            other => Err(self.unexpected(other)),
        }
    }

    /// Forward a control signal
    pub async fn signal(&self, signal: Signal) -> BrokerResult<SignalReplyMessage> {
        match self.call(Lane::Control, &Message::Signal(SignalMessage { signal })).await? {
            Message::SignalReply(reply) => Ok(reply),
            other => Err(self.unexpected(other)),
        }
    }

    fn transport(&self, detail: String) -> BrokerError {
        BrokerError::Transport {
            address: self.address.clone(),
            detail,
        }
    }

    fn unexpected(&self, reply: Message) -> BrokerError {
        match reply {
            Message::Error(err) => BrokerError::Worker {
                address: self.address.clone(),
                message: err.message,
            },
            other => BrokerError::Protocol {
                address: self.address.clone(),
                detail: format!("got {}", other.kind()),
            },
        }
    }
}

/// Run a worker call under an optional deadline
pub async fn with_deadline<T, F>(address: &str, timeout: Option<Duration>, call: F) -> BrokerResult<T>
where
    F: Future<Output = BrokerResult<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| BrokerError::Timeout {
            address: address.to_string(),
            timeout: limit,
        })?,
        None => call.await,
    }
}

/// Ordered set of registered workers
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<Vec<Arc<WorkerHandle>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a worker and return its position
    ///
    /// No deduplication: registering the same address twice gives it two bands.
    pub fn register(&self, address: impl Into<String>) -> usize {
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        workers.push(Arc::new(WorkerHandle::new(address)));
        workers.len() - 1
    }

    /// Consistent copy of the current worker list
    pub fn snapshot(&self) -> Vec<Arc<WorkerHandle>> {
        self.workers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.workers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::testing::MockWorker;

    #[test]
    fn test_register_keeps_order_and_duplicates() {
        let registry = WorkerRegistry::new();
        assert!(registry.is_empty());

        assert_eq!(registry.register("a:1"), 0);
        assert_eq!(registry.register("b:2"), 1);
        assert_eq!(registry.register("a:1"), 2);

        let addresses: Vec<_> = registry.snapshot().iter().map(|w| w.address().to_string()).collect();
        assert_eq!(addresses, vec!["a:1", "b:2", "a:1"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_snapshot_is_stable() {
        let registry = WorkerRegistry::new();
        registry.register("a:1");
        let snapshot = registry.snapshot();

        registry.register("b:2");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);

        // Handles are shared, not copied
        snapshot[0].set_region(SubRegion { height: 3, width: 8 });
        assert_eq!(registry.snapshot()[0].region(), Some(SubRegion { height: 3, width: 8 }));
    }

    #[tokio::test]
    async fn test_connection_reused_across_calls() {
        let worker = MockWorker::builder().status(2, 9).spawn().await;
        let handle = WorkerHandle::new(worker.address());

        for _ in 0..3 {
            let report = handle.status(StatusMessage { turn: None, height: 0, width: 0 }).await.unwrap();
            assert_eq!(report.alive_cells, 2);
            assert_eq!(report.turn, 9);
        }

        assert_eq!(worker.connections(), 1);
    }

    #[tokio::test]
    async fn test_dial_failure_is_transport_error() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let handle = WorkerHandle::new(address.clone());
        let err = handle.signal(Signal::Pause).await.unwrap_err();
        match err {
            BrokerError::Transport { address: a, .. } => assert_eq!(a, address),
            other => panic!("expected transport error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_deadline_elapses() {
        let result: BrokerResult<()> = with_deadline(
            "slow:1",
            Some(Duration::from_millis(20)),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        assert!(matches!(result, Err(BrokerError::Timeout { .. })));
    }
}

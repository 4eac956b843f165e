//! Broker service
//!
//! This module implements the broker that clients and workers talk to.
//! The broker:
//! - Accepts worker registrations
//! - Partitions submitted worlds and runs them on the registered workers
//! - Aggregates alive-cell counts across workers
//! - Broadcasts key-press control signals, shutting down on quit
//!
//! Each accepted connection is served on its own task and may carry any
//! number of requests, one at a time.

use crate::config::BrokerConfig;
use crate::distributed::aggregate::{count_alive, AliveCount};
use crate::distributed::control::{broadcast, BroadcastOutcome, Lifecycle, LifecycleState};
use crate::distributed::executor::Executor;
use crate::distributed::partition;
use crate::distributed::protocol::*;
use crate::distributed::registry::WorkerRegistry;
use crate::error::{BrokerError, BrokerResult};
use crate::world::World;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Broker state and operations, independent of the network
#[derive(Debug)]
pub struct Broker {
    config: BrokerConfig,
    registry: WorkerRegistry,
    executor: Executor,
    lifecycle: Lifecycle,
    /// Cancelled when draining gives up on in-flight runs
    cancel: CancellationToken,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        let executor = Executor::new(config.dispatch_timeout());
        Self {
            config,
            registry: WorkerRegistry::new(),
            executor,
            lifecycle: Lifecycle::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Add a worker to the end of the registry
    pub fn register_worker(&self, address: String) -> usize {
        let position = self.registry.register(address.clone());
        info!(worker = %address, position, "registered worker");
        position
    }

    /// Evolve `world` for `turns` turns across every registered worker
    pub async fn process_world(
        &self,
        world: World,
        height: usize,
        width: usize,
        turns: u32,
    ) -> BrokerResult<World> {
        if self.lifecycle.is_shutting_down() {
            return Err(BrokerError::ShuttingDown);
        }

        let workers = self.registry.snapshot();
        partition::validate(&world, height, width, workers.len())?;

        let addresses: Vec<String> = workers.iter().map(|w| w.address().to_string()).collect();
        let partitions = partition::partition(&world, &addresses)?;
        if let Some(last) = partitions.last() {
            if last.rows != height / workers.len() {
                debug!(rows = last.rows, "giving bigger band to last worker");
            }
        }

        self.executor.run_step(&workers, partitions, turns, &self.cancel).await
    }

    /// Total alive cells across workers and the turn they were counted at
    pub async fn alive_cells(&self) -> BrokerResult<AliveCount> {
        let workers = self.registry.snapshot();
        let result = count_alive(&workers, self.config.turn_policy, self.config.control_timeout()).await?;
        info!(count = result.count, turn = result.turn, "alive cells");
        Ok(result)
    }

    /// Forward a control signal to every worker
    pub async fn key_press(&self, signal: Signal) -> BrokerResult<BroadcastOutcome> {
        let workers = self.registry.snapshot();
        broadcast(&workers, signal, &self.lifecycle, self.config.control_timeout()).await
    }

    /// Answer one request
    pub async fn handle(&self, msg: Message) -> Message {
        match msg {
            Message::RegisterWorker(req) => {
                if req.protocol_version != PROTOCOL_VERSION {
                    warn!(worker = %req.address, version = req.protocol_version, "protocol version mismatch");
                    return Message::error(format!(
                        "Protocol version mismatch: broker={}, worker={}",
                        PROTOCOL_VERSION, req.protocol_version
                    ));
                }
                self.register_worker(req.address);
                Message::Ack
            }
            Message::ProcessWorld(req) => {
                let world = World::from_rows(req.world);
                match self.process_world(world, req.height, req.width, req.turns).await {
                    Ok(world) => Message::WorldResult(WorldResultMessage {
                        world: world.into_rows(),
                    }),
                    Err(e) if e.is_configuration() => {
                        warn!(error = %e, "ProcessWorld rejected");
                        Message::error(e.to_string())
                    }
                    Err(e) => {
                        error!(error = %e, "ProcessWorld failed");
                        Message::error(e.to_string())
                    }
                }
            }
            Message::AliveCellsCount => match self.alive_cells().await {
                Ok(result) => Message::AliveCells(AliveCellsMessage {
                    count: result.count,
                    turn: result.turn,
                }),
                Err(e) => {
                    error!(error = %e, "alive-cell query failed");
                    Message::error(e.to_string())
                }
            },
            Message::KeyPress(req) => match self.key_press(req.signal).await {
                Ok(outcome) => Message::KeyPressReply(KeyPressReplyMessage {
                    world: outcome.world.map(World::into_rows),
                    ack: outcome.ack,
                }),
                Err(e) => {
                    error!(error = %e, "key press broadcast failed");
                    Message::error(e.to_string())
                }
            },
            other => Message::error(format!("Broker cannot handle {}", other.kind())),
        }
    }
}

/// Listening broker
pub struct BrokerService {
    broker: Arc<Broker>,
    listener: TcpListener,
}

impl BrokerService {
    /// Bind the listening socket on all interfaces
    pub async fn bind(config: BrokerConfig) -> Result<Self> {
        let addr = format!("0.0.0.0:{}", config.port);
        Self::bind_addr(&addr, config).await
    }

    /// Bind to a specific address (port 0 picks a free port)
    pub async fn bind_addr(addr: &str, config: BrokerConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await
            .with_context(|| format!("Failed to bind broker on {}", addr))?;

        Ok(Self {
            broker: Arc::new(Broker::new(config)),
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("Failed to read local address")
    }

    pub fn broker(&self) -> Arc<Broker> {
        self.broker.clone()
    }

    /// Serve until a quit signal has been handled, then drain and return
    pub async fn run(self) -> Result<()> {
        let broker = self.broker;
        let lifecycle = broker.lifecycle().clone();
        let mut connections = JoinSet::new();

        info!(addr = %self.listener.local_addr()?, "broker listening");

        loop {
            tokio::select! {
                _ = lifecycle.wait_for(LifecycleState::ShuttingDown) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        connections.spawn(serve_connection(broker.clone(), stream, peer));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "connection task failed");
                    }
                }
            }
        }

        drop(self.listener);
        info!(open = connections.len(), "stopped accepting, draining connections");

        let drain = broker.config().drain_timeout();
        let drained = tokio::time::timeout(drain, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(remaining = connections.len(), "drain timed out, aborting connections");
            broker.cancel.cancel();
            connections.shutdown().await;
        }

        lifecycle.advance(LifecycleState::Terminated);
        info!("broker terminated");
        Ok(())
    }
}

/// Serve requests on one connection until the peer leaves or shutdown begins
async fn serve_connection(broker: Arc<Broker>, mut stream: TcpStream, peer: SocketAddr) {
    let lifecycle = broker.lifecycle().clone();

    loop {
        let msg = tokio::select! {
            _ = lifecycle.wait_for(LifecycleState::ShuttingDown) => break,
            msg = read_message_opt(&mut stream) => msg,
        };

        let msg = match msg {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                debug!(%peer, "connection closed");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %format!("{:#}", e), "failed to read request");
                break;
            }
        };

        debug!(%peer, request = msg.kind(), "request");
        let reply = broker.handle(msg).await;

        if let Err(e) = write_message(&mut stream, &reply).await {
            warn!(%peer, error = %format!("{:#}", e), "failed to write reply");
            break;
        }
    }
}

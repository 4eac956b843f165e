//! Node service (reference worker)
//!
//! This module implements a worker node that the broker can drive.
//! The node service:
//! - Listens for connections from the broker and from neighbouring nodes
//! - Optionally registers itself with a broker at startup
//! - Steps its band of the world, swapping boundary rows with its neighbours
//! - Reports alive cells and turn on request
//! - Obeys pause/resume/save/quit signals
//!
//! # Halo exchange
//!
//! Turn 0 uses the halo rows the broker shipped with the band. From turn 1 on,
//! the node publishes its first row for the turn, sends its last row to its
//! bottom neighbour and gets that neighbour's first row back (its new bottom
//! halo). Its new top halo arrives when the node above does the same.
//!
//! A node serving an exchange for turn `t` waits until it has published its
//! own first row for `t` before answering. It cannot get past `t` without the
//! top halo that exchange delivers, so the published row is always the right one.

use crate::config::WorkerNodeConfig;
use crate::distributed::client::BrokerClient;
use crate::distributed::protocol::*;
use crate::life::step_band;
use crate::world::alive_in_rows;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Grace period for open connections after a quit
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Node service
///
/// Runs on each worker host, accepting commands from the broker.
pub struct NodeService {
    listener: TcpListener,
    advertise: String,
    broker: Option<String>,
    node: Arc<Node>,
}

impl NodeService {
    /// Bind the listening socket on all interfaces
    pub async fn bind(config: WorkerNodeConfig) -> Result<Self> {
        let addr = format!("0.0.0.0:{}", config.port);
        Self::bind_addr(&addr, config).await
    }

    /// Bind to a specific address (port 0 picks a free port)
    pub async fn bind_addr(addr: &str, config: WorkerNodeConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await
            .with_context(|| format!("Failed to bind node service on {}", addr))?;
        let port = listener.local_addr()?.port();

        let advertise = match config.advertise {
            Some(advertise) => advertise,
            None => format!("{}:{}", get_node_id()?, port),
        };

        Ok(Self {
            listener,
            advertise,
            broker: config.broker,
            node: Arc::new(Node::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("Failed to read local address")
    }

    /// Address this node registers under
    pub fn advertise(&self) -> &str {
        &self.advertise
    }

    /// Serve until a quit signal arrives
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.listener.local_addr()?, advertise = %self.advertise, "node service listening");

        if let Some(ref broker) = self.broker {
            let mut client = BrokerClient::connect(broker).await?;
            client.register_worker(&self.advertise).await
                .with_context(|| format!("Failed to register with broker {}", broker))?;
            info!(%broker, "registered with broker");
        }

        let node = self.node;
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = node.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        connections.spawn(serve_connection(node.clone(), stream, peer));
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
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            connections.shutdown().await;
        }

        info!("node service stopped");
        Ok(())
    }
}

/// Boundary row published for one turn
#[derive(Debug, Clone)]
struct Boundary {
    run_id: u64,
    turn: u64,
    row: Vec<u8>,
}

/// Band state visible to status and signal calls
#[derive(Debug, Default)]
struct Progress {
    turn: u64,
    band: Rows,
}

/// Shared node state
struct Node {
    progress: Mutex<Progress>,
    paused: watch::Sender<bool>,
    first_rows: watch::Sender<Option<Boundary>>,
    top_halos_tx: mpsc::UnboundedSender<HaloExchangeMessage>,
    top_halos_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<HaloExchangeMessage>>,
    /// Connection to the bottom neighbour, keyed by its address
    neighbour: tokio::sync::Mutex<Option<(String, TcpStream)>>,
    /// One band is stepped at a time
    run_lock: tokio::sync::Mutex<()>,
    /// Run whose band this node holds; a node owns one band per run
    claimed_run: Mutex<Option<u64>>,
    shutdown: CancellationToken,
}

impl Node {
    fn new() -> Self {
        let (paused, _) = watch::channel(false);
        let (first_rows, _) = watch::channel(None);
        let (top_halos_tx, top_halos_rx) = mpsc::unbounded_channel();

        Self {
            progress: Mutex::new(Progress::default()),
            paused,
            first_rows,
            top_halos_tx,
            top_halos_rx: tokio::sync::Mutex::new(top_halos_rx),
            neighbour: tokio::sync::Mutex::new(None),
            run_lock: tokio::sync::Mutex::new(()),
            claimed_run: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    async fn handle(&self, msg: Message) -> Message {
        match msg {
            Message::ProcessSubWorld(req) => match self.process_sub_world(req).await {
                Ok(section) => Message::SubWorldResult(SubWorldResultMessage { section }),
                Err(e) => {
                    error!(error = %format!("{:#}", e), "ProcessSubWorld failed");
                    Message::error(format!("{:#}", e))
                }
            },
            Message::Status(req) => {
                let progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
                trace!(hint = ?req.turn, turn = progress.turn, "status");
                Message::StatusReport(StatusReportMessage {
                    alive_cells: alive_in_rows(&progress.band) as u64,
                    turn: progress.turn,
                })
            }
            Message::Signal(req) => self.signal(req.signal),
            Message::HaloExchange(req) => match self.serve_exchange(req).await {
                Ok(reply) => Message::HaloExchange(reply),
                Err(e) => Message::error(format!("{:#}", e)),
            },
            other => Message::error(format!("Node cannot handle {}", other.kind())),
        }
    }

    fn signal(&self, signal: Signal) -> Message {
        info!(%signal, "signal received");
        let snapshot = signal.wants_snapshot().then(|| {
            self.progress
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .band
                .clone()
        });

        match signal {
            Signal::Pause => {
                self.paused.send_replace(true);
            }
            Signal::Resume => {
                self.paused.send_replace(false);
            }
            Signal::Quit => self.shutdown.cancel(),
            Signal::Save | Signal::Other(_) => {}
        }

        Message::SignalReply(SignalReplyMessage {
            section: snapshot,
            ack: true,
        })
    }

    /// Step a band `turns` times and return it without halos
    async fn process_sub_world(&self, req: SubWorldMessage) -> Result<Rows> {
        if req.protocol_version != PROTOCOL_VERSION {
            anyhow::bail!(
                "Protocol version mismatch: broker={}, node={}",
                req.protocol_version,
                PROTOCOL_VERSION
            );
        }
        if req.height < 3 || req.section.len() != req.height {
            anyhow::bail!(
                "Band must have at least 3 rows including halos (declared {}, got {})",
                req.height,
                req.section.len()
            );
        }
        if req.width == 0 || req.section.iter().any(|row| row.len() != req.width) {
            anyhow::bail!("Band rows must all be {} cells wide", req.width);
        }

        let run_id = req.run_id;
        self.claim(run_id)?;
        let _run = self.run_lock.lock().await;

        let mut section = req.section;
        let mut bottom = section.pop().unwrap_or_default();
        let mut top = section.remove(0);
        let mut band = section;
        self.record(0, &band);

        info!(run_id, rows = band.len(), turns = req.turns, neighbour = %req.bottom_neighbor, "stepping band");

        for turn in 0..u64::from(req.turns) {
            if !self.wait_until_resumed().await {
                break;
            }

            if turn > 0 {
                let last = band[band.len() - 1].clone();
                self.first_rows.send_replace(Some(Boundary {
                    run_id,
                    turn,
                    row: band[0].clone(),
                }));

                let halos = tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    halos = self.exchange_halos(&req.bottom_neighbor, run_id, turn, last) => halos?,
                };
                (top, bottom) = halos;
            }

            band = step_band(&top, &band, &bottom);
            self.record(turn + 1, &band);
        }

        debug!(run_id, "band finished");
        Ok(band)
    }

    /// Take ownership of `run_id`'s band
    ///
    /// Halo state is per node, so a second band of the same run (the node was
    /// registered twice) would be stepped against its own boundary rows.
    fn claim(&self, run_id: u64) -> Result<()> {
        let mut claimed = self.claimed_run.lock().unwrap_or_else(PoisonError::into_inner);
        if *claimed == Some(run_id) {
            anyhow::bail!(
                "Already stepping a band of run {}; each node can own only one band per run",
                run_id
            );
        }
        *claimed = Some(run_id);
        Ok(())
    }

    fn record(&self, turn: u64, band: &Rows) {
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        progress.turn = turn;
        progress.band = band.clone();
    }

    /// Block while paused; false if the node is shutting down
    async fn wait_until_resumed(&self) -> bool {
        let mut paused = self.paused.subscribe();
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            resumed = paused.wait_for(|p| !*p) => resumed.is_ok(),
        }
    }

    /// Swap boundary rows for `turn`; returns (top halo, bottom halo)
    async fn exchange_halos(
        &self,
        neighbour: &str,
        run_id: u64,
        turn: u64,
        last_row: Vec<u8>,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let request = Message::HaloExchange(HaloExchangeMessage {
            run_id,
            turn,
            row: last_row,
        });

        let bottom = match self.call_neighbour(neighbour, &request).await? {
            Message::HaloExchange(reply) if reply.run_id == run_id && reply.turn == turn => reply.row,
            Message::Error(err) => anyhow::bail!("Neighbour {} reported: {}", neighbour, err.message),
            other => anyhow::bail!("Unexpected halo reply from {}: {}", neighbour, other.kind()),
        };

        let top = self.receive_top_halo(run_id, turn).await?;
        trace!(run_id, turn, "halos exchanged");
        Ok((top, bottom))
    }

    async fn call_neighbour(&self, neighbour: &str, msg: &Message) -> Result<Message> {
        let mut slot = self.neighbour.lock().await;

        let mut stream = match slot.take() {
            Some((addr, stream)) if addr == neighbour => stream,
            _ => {
                debug!(%neighbour, "dialing neighbour");
                let stream = TcpStream::connect(neighbour).await
                    .with_context(|| format!("Failed to connect to neighbour {}", neighbour))?;
                stream.set_nodelay(true)?;
                stream
            }
        };

        let reply = call(&mut stream, msg).await?;
        *slot = Some((neighbour.to_string(), stream));
        Ok(reply)
    }

    async fn receive_top_halo(&self, run_id: u64, turn: u64) -> Result<Vec<u8>> {
        let mut rx = self.top_halos_rx.lock().await;
        loop {
            let halo = rx.recv().await.context("Top halo channel closed")?;
            if halo.run_id == run_id && halo.turn == turn {
                return Ok(halo.row);
            }
            trace!(run_id = halo.run_id, turn = halo.turn, "discarding stale halo");
        }
    }

    /// Answer a neighbour's exchange: its last row is our top halo
    async fn serve_exchange(&self, req: HaloExchangeMessage) -> Result<HaloExchangeMessage> {
        let mut published = self.first_rows.subscribe();
        let row = tokio::select! {
            _ = self.shutdown.cancelled() => anyhow::bail!("Node is shutting down"),
            boundary = published.wait_for(|b| {
                matches!(b, Some(b) if b.run_id == req.run_id && b.turn == req.turn)
            }) => {
                let boundary = boundary.context("Boundary channel closed")?;
                match &*boundary {
                    Some(b) => b.row.clone(),
                    None => Vec::new(),
                }
            }
        };

        let reply = HaloExchangeMessage {
            run_id: req.run_id,
            turn: req.turn,
            row,
        };
        self.top_halos_tx.send(req).context("Top halo channel closed")?;
        Ok(reply)
    }
}

async fn serve_connection(node: Arc<Node>, mut stream: TcpStream, peer: SocketAddr) {
    loop {
        let msg = tokio::select! {
            _ = node.shutdown.cancelled() => break,
            msg = read_message_opt(&mut stream) => msg,
        };

        let msg = match msg {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, error = %format!("{:#}", e), "failed to read request");
                break;
            }
        };

        let reply = node.handle(msg).await;
        if let Err(e) = write_message(&mut stream, &reply).await {
            warn!(%peer, error = %format!("{:#}", e), "failed to write reply");
            break;
        }
    }
}

/// Get node identifier (hostname)
fn get_node_id() -> Result<String> {
    if let Ok(hostname) = hostname::get() {
        if let Ok(hostname_str) = hostname.into_string() {
            return Ok(hostname_str);
        }
    }

    // Fall back to loopback
    Ok("127.0.0.1".to_string())
}

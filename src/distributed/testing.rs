//! Scriptable in-process worker for tests
//!
//! Listens on an ephemeral localhost port and speaks the worker side of the
//! protocol. Step calls echo the band back without its halos, so a broker that
//! reassembles correctly returns the world it was given.

use crate::distributed::protocol::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default)]
enum StepBehaviour {
    #[default]
    Echo,
    Fail(String),
    Hang,
}

#[derive(Debug, Default)]
struct Recorded {
    connections: AtomicUsize,
    steps: Mutex<Vec<SubWorldMessage>>,
    statuses: Mutex<Vec<StatusMessage>>,
    signals: Mutex<Vec<Signal>>,
}

#[derive(Debug, Clone, Default)]
struct Script {
    alive: u64,
    turn: u64,
    step_delay: Duration,
    step: StepBehaviour,
    snapshot: Option<Rows>,
}

pub struct MockWorkerBuilder {
    script: Script,
}

impl MockWorkerBuilder {
    /// Values reported to status queries
    pub fn status(mut self, alive: u64, turn: u64) -> Self {
        self.script.alive = alive;
        self.script.turn = turn;
        self
    }

    /// Delay before answering a step call
    pub fn step_delay(mut self, delay: Duration) -> Self {
        self.script.step_delay = delay;
        self
    }

    /// Answer step calls with an error reply
    pub fn fail_steps(mut self, message: &str) -> Self {
        self.script.step = StepBehaviour::Fail(message.to_string());
        self
    }

    /// Never answer step calls
    pub fn hang_steps(mut self) -> Self {
        self.script.step = StepBehaviour::Hang;
        self
    }

    /// Band returned for snapshot signals
    pub fn snapshot(mut self, rows: Rows) -> Self {
        self.script.snapshot = Some(rows);
        self
    }

    pub async fn spawn(self) -> MockWorker {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let recorded = Arc::new(Recorded::default());
        let script = Arc::new(self.script);

        let task = {
            let recorded = recorded.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    recorded.connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, script.clone(), recorded.clone()));
                }
            })
        };

        MockWorker {
            address,
            recorded,
            task,
        }
    }
}

async fn serve(mut stream: TcpStream, script: Arc<Script>, recorded: Arc<Recorded>) {
    while let Ok(Some(msg)) = read_message_opt(&mut stream).await {
        let reply = match msg {
            Message::ProcessSubWorld(request) => {
                recorded.steps.lock().unwrap().push(request.clone());
                tokio::time::sleep(script.step_delay).await;
                match &script.step {
                    StepBehaviour::Echo => {
                        let last = request.section.len() - 1;
                        Message::SubWorldResult(SubWorldResultMessage {
                            section: request.section[1..last].to_vec(),
                        })
                    }
                    StepBehaviour::Fail(message) => Message::error(message.clone()),
                    StepBehaviour::Hang => std::future::pending().await,
                }
            }
            Message::Status(request) => {
                recorded.statuses.lock().unwrap().push(request);
                Message::StatusReport(StatusReportMessage {
                    alive_cells: script.alive,
                    turn: script.turn,
                })
            }
            Message::Signal(request) => {
                let section = if request.signal.wants_snapshot() {
                    script.snapshot.clone()
                } else {
                    None
                };
                recorded.signals.lock().unwrap().push(request.signal);
                Message::SignalReply(SignalReplyMessage { section, ack: true })
            }
            other => Message::error(format!("mock worker cannot handle {}", other.kind())),
        };

        if write_message(&mut stream, &reply).await.is_err() {
            return;
        }
    }
}

pub struct MockWorker {
    address: String,
    recorded: Arc<Recorded>,
    task: JoinHandle<()>,
}

impl MockWorker {
    pub fn builder() -> MockWorkerBuilder {
        MockWorkerBuilder {
            script: Script::default(),
        }
    }

    pub fn address(&self) -> String {
        self.address.clone()
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.recorded.connections.load(Ordering::SeqCst)
    }

    pub fn steps(&self) -> Vec<SubWorldMessage> {
        self.recorded.steps.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<StatusMessage> {
        self.recorded.statuses.lock().unwrap().clone()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.recorded.signals.lock().unwrap().clone()
    }
}

impl Drop for MockWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

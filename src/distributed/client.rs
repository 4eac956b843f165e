//! Broker client
//!
//! Typed caller side of the client-facing broker calls. One client holds one
//! connection and issues requests on it one at a time.

use crate::distributed::protocol::*;
use crate::world::World;
use anyhow::{Context, Result};
use tokio::net::TcpStream;

pub struct BrokerClient {
    stream: TcpStream,
    addr: String,
}

impl BrokerClient {
    /// Connect to a broker
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await
            .with_context(|| format!("Failed to connect to broker at {}", addr))?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            addr: addr.to_string(),
        })
    }

    /// Register a worker address with the broker
    pub async fn register_worker(&mut self, worker_address: &str) -> Result<()> {
        let msg = Message::RegisterWorker(RegisterWorkerMessage {
            protocol_version: PROTOCOL_VERSION,
            address: worker_address.to_string(),
        });

        match self.request(&msg).await? {
            Message::Ack => Ok(()),
            other => self.unexpected(other),
        }
    }

    /// Evolve a world on the broker's workers
    pub async fn process_world(&mut self, world: &World, turns: u32) -> Result<World> {
        let msg = Message::ProcessWorld(ProcessWorldMessage {
            world: world.rows().to_vec(),
            height: world.height(),
            width: world.width(),
            turns,
        });

        match self.request(&msg).await? {
            Message::WorldResult(result) => Ok(World::from_rows(result.world)),
            other => self.unexpected(other),
        }
    }

    /// Total alive cells and the turn they belong to
    pub async fn alive_cells(&mut self) -> Result<AliveCellsMessage> {
        match self.request(&Message::AliveCellsCount).await? {
            Message::AliveCells(count) => Ok(count),
            other => self.unexpected(other),
        }
    }

    /// Send a control signal
    pub async fn key_press(&mut self, signal: Signal) -> Result<KeyPressReplyMessage> {
        match self.request(&Message::KeyPress(KeyPressMessage { signal })).await? {
            Message::KeyPressReply(reply) => Ok(reply),
            other => self.unexpected(other),
        }
    }

    async fn request(&mut self, msg: &Message) -> Result<Message> {
        call(&mut self.stream, msg).await
            .with_context(|| format!("{} request to broker {} failed", msg.kind(), self.addr))
    }

    fn unexpected<T>(&self, reply: Message) -> Result<T> {
        match reply {
            Message::Error(err) => anyhow::bail!("Broker error: {}", err.message),
            other => anyhow::bail!("Unexpected reply from broker: {}", other.kind()),
        }
    }
}

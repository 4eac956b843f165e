//! Broker protocol
//!
//! This module defines the messages exchanged between clients, the broker and
//! worker nodes. The protocol uses MessagePack (rmp-serde) for compact binary
//! serialization with full serde feature support.
//!
//! # Protocol Version
//!
//! Current version: 1
//!
//! # Message Flow
//!
//! ```text
//! Client              Broker                   Worker A           Worker B
//!   |                   |<-- REGISTER_WORKER ------|                  |
//!   |                   |--- ACK ----------------->|                  |
//!   |-- PROCESS_WORLD ->|                          |                  |
//!   |                   |--- PROCESS_SUB_WORLD --->|                  |
//!   |                   |--- PROCESS_SUB_WORLD ---------------------->|
//!   |                   |                          |-- HALO_EXCHANGE->|
//!   |                   |                          |<- HALO_EXCHANGE -|
//!   |                   |<-- SUB_WORLD_RESULT -----|                  |
//!   |                   |<-- SUB_WORLD_RESULT ------------------------|
//!   |<- WORLD_RESULT ---|                          |                  |
//! ```
//!
//! Every request gets exactly one reply on the same connection. A request that
//! fails is answered with `Error` rather than by closing the connection.
//!
//! # Message Framing
//!
//! Each message is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: message length][N bytes: MessagePack-serialized message]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Increment this when making breaking changes to the protocol.
/// Broker and workers must have matching protocol versions.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted message body (256 MiB)
pub const MAX_MESSAGE_LEN: usize = 256 * 1024 * 1024;

/// Grid rows as carried on the wire
pub type Rows = Vec<Vec<u8>>;

/// Protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Register a worker (Worker/Client → Broker)
    RegisterWorker(RegisterWorkerMessage),

    /// Generic acknowledgement
    Ack,

    /// Evolve a world (Client → Broker)
    ProcessWorld(ProcessWorldMessage),

    /// Evolved world (Broker → Client)
    WorldResult(WorldResultMessage),

    /// Query the total alive cells (Client → Broker)
    AliveCellsCount,

    /// Total alive cells and the turn they were measured at (Broker → Client)
    AliveCells(AliveCellsMessage),

    /// Control signal from a key press (Client → Broker)
    KeyPress(KeyPressMessage),

    /// Key press outcome (Broker → Client)
    KeyPressReply(KeyPressReplyMessage),

    /// Step a band of the world (Broker → Worker)
    ProcessSubWorld(SubWorldMessage),

    /// Stepped band, halos removed (Worker → Broker)
    SubWorldResult(SubWorldResultMessage),

    /// Report local alive cells and turn (Broker → Worker)
    Status(StatusMessage),

    /// Local alive cells and turn (Worker → Broker)
    StatusReport(StatusReportMessage),

    /// Forward a control signal (Broker → Worker)
    Signal(SignalMessage),

    /// Signal outcome (Worker → Broker)
    SignalReply(SignalReplyMessage),

    /// Boundary row swap between neighbouring workers (Worker ↔ Worker)
    ///
    /// The request carries the sender's last row; the reply carries the
    /// receiver's first row for the same turn.
    HaloExchange(HaloExchangeMessage),

    /// Request failed
    Error(ErrorMessage),
}

impl Message {
    /// Short name for logs and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Message::RegisterWorker(_) => "RegisterWorker",
            Message::Ack => "Ack",
            Message::ProcessWorld(_) => "ProcessWorld",
            Message::WorldResult(_) => "WorldResult",
            Message::AliveCellsCount => "AliveCellsCount",
            Message::AliveCells(_) => "AliveCells",
            Message::KeyPress(_) => "KeyPress",
            Message::KeyPressReply(_) => "KeyPressReply",
            Message::ProcessSubWorld(_) => "ProcessSubWorld",
            Message::SubWorldResult(_) => "SubWorldResult",
            Message::Status(_) => "Status",
            Message::StatusReport(_) => "StatusReport",
            Message::Signal(_) => "Signal",
            Message::SignalReply(_) => "SignalReply",
            Message::HaloExchange(_) => "HaloExchange",
            Message::Error(_) => "Error",
        }
    }

    /// Build an error reply
    pub fn error(message: impl Into<String>) -> Self {
        Message::Error(ErrorMessage {
            message: message.into(),
        })
    }
}

/// Worker registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterWorkerMessage {
    pub protocol_version: u32,
    /// Address the broker should dial (host:port)
    pub address: String,
}

/// World to evolve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessWorldMessage {
    pub world: Rows,
    pub height: usize,
    pub width: usize,
    pub turns: u32,
}

/// Evolved world
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldResultMessage {
    pub world: Rows,
}

/// Aggregated alive cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliveCellsMessage {
    pub count: u64,
    pub turn: u64,
}

/// Control signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Pause,
    Resume,
    /// Snapshot the current world
    Save,
    /// Snapshot the current world and shut everything down
    Quit,
    /// Forwarded to workers untouched
    Other(String),
}

impl Signal {
    /// Whether the broker must assemble a full-world snapshot for this signal
    pub fn wants_snapshot(&self) -> bool {
        matches!(self, Signal::Save | Signal::Quit)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Pause => write!(f, "pause"),
            Signal::Resume => write!(f, "resume"),
            Signal::Save => write!(f, "save"),
            Signal::Quit => write!(f, "quit"),
            Signal::Other(s) => write!(f, "other({})", s),
        }
    }
}

/// Key press from the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPressMessage {
    pub signal: Signal,
}

/// Key press outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPressReplyMessage {
    /// Reconstructed world, present only for save and quit
    pub world: Option<Rows>,
    pub ack: bool,
}

/// Band to step on a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubWorldMessage {
    pub protocol_version: u32,
    /// Broker-assigned run identifier, shared by all partitions of one run
    pub run_id: u64,
    /// Band rows including one halo row above and one below
    pub section: Rows,
    /// Row count of `section` (halos included)
    pub height: usize,
    pub width: usize,
    pub turns: u32,
    /// Worker owning the row below this band
    pub bottom_neighbor: String,
}

/// Stepped band
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubWorldResultMessage {
    /// Band rows without halos
    pub section: Rows,
}

/// Status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Turn of record, when already known from an earlier worker
    pub turn: Option<u64>,
    /// Sub-region assigned by the last dispatch
    pub height: usize,
    pub width: usize,
}

/// Status report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReportMessage {
    pub alive_cells: u64,
    pub turn: u64,
}

/// Signal forwarded to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub signal: Signal,
}

/// Worker's answer to a signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalReplyMessage {
    /// Current band, for snapshot signals
    pub section: Option<Rows>,
    pub ack: bool,
}

/// Boundary row for one turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaloExchangeMessage {
    pub run_id: u64,
    pub turn: u64,
    pub row: Vec<u8>,
}

/// Error reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// Serialize a message to bytes
///
/// Prepends a 4-byte length field for framing.
///
/// # Message Format
///
/// ```text
/// [4 bytes: message length (little-endian u32)][N bytes: MessagePack message]
/// ```
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>> {
    let msg_bytes = rmp_serde::to_vec(msg)
        .context("Failed to serialize message")?;

    if msg_bytes.len() > MAX_MESSAGE_LEN {
        anyhow::bail!("Message too large: {} bytes (max {})", msg_bytes.len(), MAX_MESSAGE_LEN);
    }

    // Prepend length field
    let msg_len = msg_bytes.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg_bytes.len());
    framed.extend_from_slice(&msg_len.to_le_bytes());
    framed.extend_from_slice(&msg_bytes);

    Ok(framed)
}

/// Deserialize a message from bytes
///
/// Expects a 4-byte length prefix followed by a MessagePack-serialized message.
///
/// # Returns
///
/// Returns (message, bytes_consumed) where bytes_consumed includes the length prefix.
pub fn deserialize_message(buf: &[u8]) -> Result<(Message, usize)> {
    if buf.len() < 4 {
        anyhow::bail!("Buffer too small for message length (need 4 bytes, got {})", buf.len());
    }

    let msg_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if buf.len() < 4 + msg_len {
        anyhow::bail!("Incomplete message (need {} bytes, got {})", 4 + msg_len, buf.len());
    }

    let msg = rmp_serde::from_slice(&buf[4..4 + msg_len])
        .context("Failed to deserialize message")?;

    Ok((msg, 4 + msg_len))
}

/// Read a complete message from a stream
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between messages.
pub async fn read_message_opt<R>(stream: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Failed to read message length"),
    }

    let msg_len = u32::from_le_bytes(len_buf) as usize;

    if msg_len > MAX_MESSAGE_LEN {
        anyhow::bail!("Message too large: {} bytes (max {})", msg_len, MAX_MESSAGE_LEN);
    }

    let mut msg_buf = vec![0u8; msg_len];
    stream.read_exact(&mut msg_buf).await
        .context("Failed to read message body")?;

    let msg = rmp_serde::from_slice(&msg_buf)
        .context("Failed to deserialize message")?;

    Ok(Some(msg))
}

/// Read a complete message from a stream, treating end-of-stream as an error
pub async fn read_message<R>(stream: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    read_message_opt(stream)
        .await?
        .context("Connection closed by peer")
}

/// Write a message to a stream
///
/// Serializes the message with length prefix and flushes it.
pub async fn write_message<W>(stream: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let framed = serialize_message(msg)?;

    stream.write_all(&framed).await
        .context("Failed to write message")?;

    stream.flush().await
        .context("Failed to flush stream")?;

    Ok(())
}

/// Send a request and wait for its reply
pub async fn call<S>(stream: &mut S, msg: &Message) -> Result<Message>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_message(stream, msg).await?;
    read_message(stream).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_deserialize_sub_world() {
        let msg = Message::ProcessSubWorld(SubWorldMessage {
            protocol_version: PROTOCOL_VERSION,
            run_id: 7,
            section: vec![vec![0, 255], vec![255, 0], vec![0, 0]],
            height: 3,
            width: 2,
            turns: 100,
            bottom_neighbor: "10.0.1.11:8040".to_string(),
        });

        let bytes = serialize_message(&msg).unwrap();
        let (deserialized, consumed) = deserialize_message(&bytes).unwrap();

        assert_eq!(consumed, bytes.len());
        assert_eq!(deserialized, msg);
    }

    #[test]
    fn test_serialize_deserialize_key_press() {
        let msg = Message::KeyPress(KeyPressMessage {
            signal: Signal::Other("x".to_string()),
        });

        let bytes = serialize_message(&msg).unwrap();
        let (deserialized, _) = deserialize_message(&bytes).unwrap();

        match deserialized {
            Message::KeyPress(press) => assert_eq!(press.signal, Signal::Other("x".to_string())),
            other => panic!("Wrong message type: {}", other.kind()),
        }
    }

    #[test]
    fn test_message_framing() {
        let msg = Message::Ack;
        let bytes = serialize_message(&msg).unwrap();

        // Check length prefix
        assert!(bytes.len() >= 4);
        let msg_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), 4 + msg_len);
    }

    #[test]
    fn test_incomplete_buffer() {
        let bytes = serialize_message(&Message::AliveCellsCount).unwrap();
        assert!(deserialize_message(&bytes[..2]).is_err());
        assert!(deserialize_message(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_signal_snapshots() {
        assert!(Signal::Save.wants_snapshot());
        assert!(Signal::Quit.wants_snapshot());
        assert!(!Signal::Pause.wants_snapshot());
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        let msg = Message::AliveCells(AliveCellsMessage { count: 15, turn: 4 });
        write_message(&mut a, &msg).await.unwrap();
        assert_eq!(read_message(&mut b).await.unwrap(), msg);

        drop(a);
        assert!(read_message_opt(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&u32::MAX.to_le_bytes()).await.unwrap();

        let err = read_message(&mut b).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }
}

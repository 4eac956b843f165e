//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.

pub mod cli;
pub mod cli_convert;
pub mod toml;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Complete configuration (one section per execution mode)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub worker: WorkerNodeConfig,
}

/// Broker service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Port to listen on for clients and worker registrations
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// Deadline for one worker's `ProcessSubWorld` call (None = wait forever)
    #[serde(default)]
    pub dispatch_timeout_ms: Option<u64>,
    /// Deadline for status and signal calls
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: Option<u64>,
    /// How to treat workers that disagree on the current turn
    #[serde(default)]
    pub turn_policy: TurnPolicy,
    /// How long in-flight connections may finish after shutdown begins
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_broker_port() -> u16 {
    8030
}

fn default_control_timeout_ms() -> Option<u64> {
    Some(10_000)
}

fn default_drain_timeout_ms() -> u64 {
    1_000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            port: default_broker_port(),
            dispatch_timeout_ms: None,
            control_timeout_ms: default_control_timeout_ms(),
            turn_policy: TurnPolicy::default(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl BrokerConfig {
    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_ms.map(Duration::from_millis)
    }

    pub fn control_timeout(&self) -> Option<Duration> {
        self.control_timeout_ms.map(Duration::from_millis)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Turn consistency policy for alive-cell aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnPolicy {
    /// Log mismatches and trust the first worker's turn
    #[default]
    Lenient,
    /// Fail the query on any mismatch
    Strict,
}

impl fmt::Display for TurnPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnPolicy::Lenient => write!(f, "lenient"),
            TurnPolicy::Strict => write!(f, "strict"),
        }
    }
}

/// Reference worker node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerNodeConfig {
    /// Port to listen on for broker calls and halo exchange
    #[serde(default = "default_worker_port")]
    pub port: u16,
    /// Broker to register with at startup (host:port)
    #[serde(default)]
    pub broker: Option<String>,
    /// Address other parties should use to reach this node (host:port)
    ///
    /// Defaults to `<hostname>:<port>`.
    #[serde(default)]
    pub advertise: Option<String>,
}

fn default_worker_port() -> u16 {
    8040
}

impl Default for WorkerNodeConfig {
    fn default() -> Self {
        Self {
            port: default_worker_port(),
            broker: None,
            advertise: None,
        }
    }
}

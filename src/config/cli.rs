//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Broker mode (default) - partition worlds across registered workers
    Broker,
    /// Worker mode - run a reference worker node
    Worker,
}

/// golbroker - distributed Game of Life broker
#[derive(Parser, Debug)]
#[command(name = "golbroker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: broker or worker
    #[arg(long, value_enum, default_value = "broker")]
    pub mode: ExecutionMode,

    /// Port to listen on (default: 8030 for broker, 8040 for worker)
    #[arg(long)]
    pub port: Option<u16>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    // === Broker Options ===
    /// Deadline for each worker step call (e.g., 30s, 500ms); unbounded if omitted
    #[arg(long)]
    pub dispatch_timeout: Option<String>,

    /// Deadline for status and signal calls (e.g., 10s)
    #[arg(long)]
    pub control_timeout: Option<String>,

    /// Fail alive-cell queries when workers disagree on the turn
    #[arg(long)]
    pub strict_turns: bool,

    // === Worker Options ===
    /// Broker address to register with (worker mode only)
    #[arg(long, env = "GOL_BROKER")]
    pub broker: Option<String>,

    /// Address advertised to the broker and neighbours (worker mode only)
    #[arg(long)]
    pub advertise: Option<String>,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mode == ExecutionMode::Broker {
            if self.broker.is_some() || self.advertise.is_some() {
                anyhow::bail!("--broker and --advertise are only valid in worker mode");
            }
        } else if self.dispatch_timeout.is_some() || self.control_timeout.is_some() || self.strict_turns {
            anyhow::bail!("--dispatch-timeout, --control-timeout and --strict-turns are only valid in broker mode");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_broker_mode() {
        let cli = Cli::try_parse_from(["golbroker"]).unwrap();
        assert_eq!(cli.mode, ExecutionMode::Broker);
        assert!(cli.port.is_none());
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_worker_flags_rejected_in_broker_mode() {
        let cli = Cli::try_parse_from(["golbroker", "--advertise", "10.0.0.5:8040"]).unwrap();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_broker_flags_rejected_in_worker_mode() {
        let cli = Cli::try_parse_from(["golbroker", "--mode", "worker", "--strict-turns"]).unwrap();
        assert!(cli.validate().is_err());

        let cli = Cli::try_parse_from([
            "golbroker", "--mode", "worker", "--port", "8041", "--broker", "127.0.0.1:8030",
        ])
        .unwrap();
        assert!(cli.validate().is_ok());
        assert_eq!(cli.port, Some(8041));
    }
}

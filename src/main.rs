//! golbroker CLI entry point

use anyhow::Context;
use golbroker::config::cli::{Cli, ExecutionMode};
use golbroker::config::{toml, validator, Config};
use golbroker::distributed::{BrokerService, NodeService};
use golbroker::Result;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Parse CLI arguments
    let cli = Cli::parse_args();
    cli.validate()?;

    // Load configuration file (if any), then apply CLI overrides
    let config = match cli.config {
        Some(ref path) => toml::parse_toml_file(path)?,
        None => Config::default(),
    };
    let config = toml::merge_cli_with_config(&cli, config)?;
    validator::validate_config(&config)
        .context("Configuration validation failed")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), mode = ?cli.mode, "golbroker starting");

    // Handle different execution modes
    match cli.mode {
        ExecutionMode::Broker => run_broker(config),
        ExecutionMode::Worker => run_worker(config),
    }
}

/// Run the broker until a quit signal shuts it down
fn run_broker(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(async {
        tracing::info!(
            port = config.broker.port,
            turn_policy = %config.broker.turn_policy,
            dispatch_timeout_ms = ?config.broker.dispatch_timeout_ms,
            "starting broker"
        );

        let service = BrokerService::bind(config.broker).await
            .context("Failed to create broker service")?;

        service.run().await
    })
}

/// Run a reference worker node
fn run_worker(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(async {
        let service = NodeService::bind(config.worker).await
            .context("Failed to create node service")?;
        tracing::info!(advertise = service.advertise(), "starting worker node");

        service.run().await
    })
}

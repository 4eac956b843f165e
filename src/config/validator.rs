//! Configuration validation

use super::*;
use anyhow::Result;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_broker(&config.broker)?;
    validate_worker(&config.worker)?;

    Ok(())
}

/// Validate broker configuration
pub fn validate_broker(broker: &BrokerConfig) -> Result<()> {
    if broker.dispatch_timeout_ms == Some(0) {
        anyhow::bail!("dispatch_timeout_ms must be greater than 0 (omit it for no deadline)");
    }

    if broker.control_timeout_ms == Some(0) {
        anyhow::bail!("control_timeout_ms must be greater than 0 (omit it for no deadline)");
    }

    Ok(())
}

/// Validate worker node configuration
pub fn validate_worker(worker: &WorkerNodeConfig) -> Result<()> {
    if let Some(ref broker) = worker.broker {
        validate_address(broker, "broker")?;
    }

    if let Some(ref advertise) = worker.advertise {
        validate_address(advertise, "advertise")?;
    }

    Ok(())
}

/// Check that an address looks like `host:port`
fn validate_address(address: &str, field: &str) -> Result<()> {
    let Some((host, port)) = address.rsplit_once(':') else {
        anyhow::bail!("{} address must be host:port, got '{}'", field, address);
    };

    if host.is_empty() {
        anyhow::bail!("{} address is missing a host: '{}'", field, address);
    }

    if port.parse::<u16>().is_err() {
        anyhow::bail!("{} address has an invalid port: '{}'", field, address);
    }

    Ok(())
}

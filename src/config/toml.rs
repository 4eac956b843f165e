//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use crate::config::cli_convert::parse_duration_ms;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Port applies to whichever mode is running
    if let Some(port) = cli.port {
        match cli.mode {
            cli::ExecutionMode::Broker => config.broker.port = port,
            cli::ExecutionMode::Worker => config.worker.port = port,
        }
    }

    // Broker overrides
    if let Some(ref timeout) = cli.dispatch_timeout {
        config.broker.dispatch_timeout_ms = Some(
            parse_duration_ms(timeout).context("Invalid --dispatch-timeout")?,
        );
    }
    if let Some(ref timeout) = cli.control_timeout {
        config.broker.control_timeout_ms = Some(
            parse_duration_ms(timeout).context("Invalid --control-timeout")?,
        );
    }
    if cli.strict_turns {
        config.broker.turn_policy = TurnPolicy::Strict;
    }

    // Worker overrides
    if let Some(ref broker) = cli.broker {
        config.worker.broker = Some(broker.clone());
    }
    if let Some(ref advertise) = cli.advertise {
        config.worker.advertise = Some(advertise.clone());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse_toml_string("").unwrap();
        assert_eq!(config.broker.port, 8030);
        assert_eq!(config.broker.dispatch_timeout_ms, None);
        assert_eq!(config.broker.control_timeout_ms, Some(10_000));
        assert_eq!(config.broker.turn_policy, TurnPolicy::Lenient);
        assert_eq!(config.worker.port, 8040);
    }

    #[test]
    fn test_parse_sections() {
        let toml = r#"
            [broker]
            port = 9000
            dispatch_timeout_ms = 2500
            turn_policy = "strict"

            [worker]
            broker = "10.0.0.1:9000"
            advertise = "10.0.0.2:8040"
        "#;

        let config = parse_toml_string(toml).unwrap();
        assert_eq!(config.broker.port, 9000);
        assert_eq!(config.broker.dispatch_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.broker.turn_policy, TurnPolicy::Strict);
        assert_eq!(config.worker.broker.as_deref(), Some("10.0.0.1:9000"));
        assert_eq!(config.worker.advertise.as_deref(), Some("10.0.0.2:8040"));
    }

    #[test]
    fn test_parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[broker]\nport = 8123\ndrain_timeout_ms = 50").unwrap();

        let config = parse_toml_file(file.path()).unwrap();
        assert_eq!(config.broker.port, 8123);
        assert_eq!(config.broker.drain_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(parse_toml_file(Path::new("/nonexistent/golbroker.toml")).is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let config = parse_toml_string("[broker]\nport = 9000\n").unwrap();
        let cli = Cli::try_parse_from([
            "golbroker", "--port", "9100", "--dispatch-timeout", "3s", "--strict-turns",
        ])
        .unwrap();

        let merged = merge_cli_with_config(&cli, config).unwrap();
        assert_eq!(merged.broker.port, 9100);
        assert_eq!(merged.broker.dispatch_timeout_ms, Some(3000));
        assert_eq!(merged.broker.turn_policy, TurnPolicy::Strict);
        // Worker section untouched
        assert_eq!(merged.worker.port, 8040);
    }

    #[test]
    fn test_cli_port_targets_worker_section() {
        let cli = Cli::try_parse_from([
            "golbroker", "--mode", "worker", "--port", "8050", "--advertise", "node7:8050",
        ])
        .unwrap();

        let merged = merge_cli_with_config(&cli, Config::default()).unwrap();
        assert_eq!(merged.worker.port, 8050);
        assert_eq!(merged.worker.advertise.as_deref(), Some("node7:8050"));
        assert_eq!(merged.broker.port, 8030);
    }
}

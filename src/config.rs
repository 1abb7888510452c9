//! Configuration for the demo peer.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use framelink::ConnectionConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the demo peer
#[derive(Parser, Debug)]
#[command(name = "framelink")]
#[command(version)]
#[command(about = "Framed packet peer: echo server or line client", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Accept peers on this address and echo their text packets
    #[arg(short = 'l', long, conflicts_with = "connect")]
    pub listen: Option<String>,

    /// Connect to this address and send stdin lines
    #[arg(short = 'C', long)]
    pub connect: Option<String>,

    /// Protocol version announced in handshakes
    #[arg(short = 'p', long)]
    pub protocol_version: Option<i32>,

    /// Idle time before a keep-alive is sent, in milliseconds
    #[arg(long)]
    pub idle_timeout_ms: Option<u64>,

    /// Send keep-alives on idle connections
    #[arg(short = 'k', long)]
    pub keep_alive: bool,

    /// Dispatch all accepted connections from one shared queue
    #[arg(short = 'd', long)]
    pub deferred: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Peer role configuration
#[derive(Debug, Deserialize, Default)]
pub struct PeerConfig {
    pub listen: Option<String>,
    pub connect: Option<String>,
    #[serde(default)]
    pub deferred: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:7400".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// What the peer does once started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Listen(String),
    Connect(String),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub deferred: bool,
    pub connection: ConnectionConfig,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args over file values.
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let mode = match (cli.connect, cli.listen) {
            (Some(addr), _) => Mode::Connect(addr),
            (None, Some(addr)) => Mode::Listen(addr),
            (None, None) => match (toml_config.peer.connect, toml_config.peer.listen) {
                (Some(addr), _) => Mode::Connect(addr),
                (None, listen) => Mode::Listen(listen.unwrap_or_else(default_listen)),
            },
        };

        let mut connection = toml_config.connection;
        if let Some(version) = cli.protocol_version {
            connection.protocol_version = version;
        }
        if let Some(ms) = cli.idle_timeout_ms {
            connection.idle_timeout = Duration::from_millis(ms);
        }
        if cli.keep_alive {
            connection.auto_keep_alive = true;
        }

        Config {
            mode,
            deferred: cli.deferred || toml_config.peer.deferred,
            connection,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("framelink").chain(args.iter().copied()))
    }

    #[test]
    fn test_default_config() {
        let config = Config::merge(cli(&[]), TomlConfig::default());
        assert_eq!(config.mode, Mode::Listen("127.0.0.1:7400".into()));
        assert!(!config.deferred);
        assert_eq!(config.connection.protocol_version, 1);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [peer]
            connect = "10.0.0.1:7400"
            deferred = true

            [connection]
            protocol_version = 5
            idle_timeout_ms = 2500
            auto_keep_alive = true

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.peer.connect.as_deref(), Some("10.0.0.1:7400"));
        assert!(config.peer.deferred);
        assert_eq!(config.connection.protocol_version, 5);
        assert_eq!(config.connection.idle_timeout, Duration::from_millis(2500));
        assert!(config.connection.auto_keep_alive);
        assert_eq!(config.logging.level, "debug");

        let merged = Config::merge(cli(&[]), config);
        assert_eq!(merged.mode, Mode::Connect("10.0.0.1:7400".into()));
        assert_eq!(merged.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [peer]
            connect = "10.0.0.1:7400"

            [connection]
            protocol_version = 5
            "#,
        )
        .unwrap();

        let args = cli(&[
            "--listen",
            "0.0.0.0:9000",
            "--protocol-version",
            "7",
            "--idle-timeout-ms",
            "100",
            "--keep-alive",
            "--log-level",
            "trace",
        ]);
        let config = Config::merge(args, toml_config);
        assert_eq!(config.mode, Mode::Listen("0.0.0.0:9000".into()));
        assert_eq!(config.connection.protocol_version, 7);
        assert_eq!(config.connection.idle_timeout, Duration::from_millis(100));
        assert!(config.connection.auto_keep_alive);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_listen_conflicts_with_connect() {
        let result = CliArgs::try_parse_from([
            "framelink",
            "--listen",
            "127.0.0.1:1",
            "--connect",
            "127.0.0.1:2",
        ]);
        assert!(result.is_err());
    }
}

//! Configuration module for the swarm peer.
//!
//! Supports command-line arguments, `PEER_*` environment variables and a TOML
//! configuration file. Precedence: CLI flag, then environment variable, then
//! config file, then built-in default.

use crate::chunk::AssetIdentity;
use clap::Parser;
use serde::Deserialize;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the swarm peer
#[derive(Parser, Debug, Default)]
#[command(name = "hswarm-peer")]
#[command(version)]
#[command(about = "Swarm peer answering hello and chunk requests over QUIC", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, env = "PEER_HOST")]
    pub host: Option<String>,

    /// UDP port to listen on
    #[arg(short, long, env = "PEER_PORT")]
    pub port: Option<u16>,

    /// PEM certificate chain
    #[arg(long, env = "PEER_CERT")]
    pub cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, env = "PEER_KEY")]
    pub key: Option<PathBuf>,

    /// Fall back to an in-memory self-signed certificate (development only)
    #[arg(long)]
    pub self_signed: bool,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Seconds a peer has to send its control message
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub asset: AssetIdentity,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Sessions served at the same time
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Concurrent bidirectional streams per session
    #[serde(default = "default_max_streams")]
    pub max_streams: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
            max_sessions: default_max_sessions(),
            max_streams: default_max_streams(),
        }
    }
}

/// Credential locations
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    #[serde(default)]
    pub self_signed: bool,
}

/// Per-stream limits
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout_secs(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
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

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4443
}

fn default_max_sessions() -> usize {
    10_000
}

fn default_max_streams() -> u32 {
    100
}

fn default_read_timeout_secs() -> u64 {
    10
}

fn default_max_message_bytes() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub self_signed: bool,
    pub workers: Option<usize>,
    pub max_sessions: usize,
    pub max_streams: u32,
    pub read_timeout: Duration,
    pub max_message_bytes: usize,
    pub asset: AssetIdentity,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args, environment and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = match cli.config {
            Some(ref config_path) => {
                let contents =
                    std::fs::read_to_string(config_path).map_err(|source| ConfigError::FileRead {
                        path: config_path.clone(),
                        source,
                    })?;
                toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                    path: config_path.clone(),
                    source,
                })?
            }
            None => TomlConfig::default(),
        };

        let config = Config::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    /// Merge CLI args (which already carry env fallbacks) over file values.
    pub fn merge(cli: CliArgs, file: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(file.server.host),
            port: cli.port.unwrap_or(file.server.port),
            cert_path: cli.cert.or(file.tls.cert),
            key_path: cli.key.or(file.tls.key),
            self_signed: cli.self_signed || file.tls.self_signed,
            workers: cli.workers.or(file.server.workers),
            max_sessions: file.server.max_sessions,
            max_streams: file.server.max_streams,
            read_timeout: Duration::from_secs(
                cli.read_timeout.unwrap_or(file.stream.read_timeout_secs),
            ),
            max_message_bytes: file.stream.max_message_bytes,
            asset: file.asset,
            log_level: cli.log_level.unwrap_or(file.logging.level),
        }
    }

    /// Reject limits that would make the peer unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_timeout.is_zero() {
            return Err(ConfigError::Invalid("read timeout must be non-zero"));
        }
        if self.max_message_bytes == 0 {
            return Err(ConfigError::Invalid("stream.max_message_bytes must be non-zero"));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("server.max_sessions must be non-zero"));
        }
        if self.max_streams == 0 {
            return Err(ConfigError::Invalid("server.max_streams must be non-zero"));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be non-zero"));
        }
        Ok(())
    }

    /// URL peers use to reach this endpoint
    pub fn endpoint_url(&self) -> String {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            format!("quic://[{}]:{}", self.host, self.port)
        } else {
            format!("quic://{}:{}", self.host, self.port)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 4443);
        assert_eq!(config.cert_path, None);
        assert_eq!(config.key_path, None);
        assert!(!config.self_signed);
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert_eq!(config.max_message_bytes, 65536);
        assert_eq!(config.asset, AssetIdentity::default());
        assert_eq!(config.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 5443
            workers = 4
            max_streams = 16

            [tls]
            cert = "/etc/hswarm/cert.pem"
            key = "/etc/hswarm/key.pem"

            [stream]
            read_timeout_secs = 3

            [asset]
            model_id = "org/model"

            [logging]
            level = "debug"
        "#;

        let file: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(file.server.host, "0.0.0.0");
        assert_eq!(file.server.port, 5443);
        assert_eq!(file.server.workers, Some(4));
        assert_eq!(file.server.max_streams, 16);
        assert_eq!(file.server.max_sessions, 10_000);
        assert_eq!(file.stream.read_timeout_secs, 3);
        assert_eq!(file.stream.max_message_bytes, 65536);
        assert_eq!(file.asset.model_id, "org/model");
        assert_eq!(file.asset.rev, "abc123");
        assert_eq!(file.logging.level, "debug");

        let config = Config::merge(CliArgs::default(), file);
        assert_eq!(config.cert_path, Some(PathBuf::from("/etc/hswarm/cert.pem")));
        assert_eq!(config.read_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: Result<TomlConfig, _> = toml::from_str("[server]\nlisten = \"x\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_asset_keys_rejected() {
        let result: Result<TomlConfig, _> = toml::from_str("[asset]\nmodelid = \"org/model\"\n");
        assert!(result.is_err());

        let file: TomlConfig = toml::from_str("[asset]\nrev = \"def456\"\n").unwrap();
        assert_eq!(file.asset.model_id, AssetIdentity::default().model_id);
        assert_eq!(file.asset.rev, "def456");
    }

    #[test]
    fn test_cli_overrides_file() {
        let cli = CliArgs::try_parse_from([
            "hswarm-peer",
            "--host",
            "10.0.0.1",
            "-p",
            "9000",
            "--self-signed",
            "--log-level",
            "trace",
        ])
        .unwrap();
        let file: TomlConfig = toml::from_str(
            "[server]\nhost = \"0.0.0.0\"\nport = 5443\n[logging]\nlevel = \"warn\"\n",
        )
        .unwrap();

        let config = Config::merge(cli, file);
        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.port, 9000);
        assert!(config.self_signed);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.max_message_bytes = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.read_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_endpoint_url() {
        let config = Config::default();
        assert_eq!(config.endpoint_url(), "quic://127.0.0.1:4443");

        let config = Config {
            host: "::1".to_string(),
            port: 9000,
            ..Config::default()
        };
        assert_eq!(config.endpoint_url(), "quic://[::1]:9000");

        let config = Config {
            host: "peer.local".to_string(),
            ..Config::default()
        };
        assert_eq!(config.endpoint_url(), "quic://peer.local:4443");
    }
}

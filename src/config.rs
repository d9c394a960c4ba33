//! Configuration module for killerrabbit.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the relay
#[derive(Parser, Debug)]
#[command(name = "killerrabbit")]
#[command(author = "killerrabbit authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP relay that can be strangled and killed from a control port", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address the relay accepts clients on (e.g., 0.0.0.0:9090)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Upstream target every client is relayed to (e.g., localhost:55132)
    #[arg(short = 'u', long)]
    pub upstream: Option<String>,

    /// Address of the operator control port (e.g., 0.0.0.0:9089)
    #[arg(long)]
    pub control: Option<String>,

    /// Upstream connect timeout in milliseconds
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub control: ControlSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Relay listener configuration
#[derive(Debug, Deserialize)]
pub struct RelaySection {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Size of a single read from a relayed socket
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Upper bound on a single poll, in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            buffer_size: default_buffer_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

/// Upstream target configuration
#[derive(Debug, Deserialize)]
pub struct UpstreamSection {
    /// `host:port` of the target
    #[serde(default = "default_upstream")]
    pub target: String,
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            target: default_upstream(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Control port configuration
#[derive(Debug, Deserialize)]
pub struct ControlSection {
    #[serde(default = "default_control")]
    pub listen: String,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            listen: default_control(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_backlog() -> i32 {
    200
}

fn default_buffer_size() -> usize {
    4096
}

fn default_poll_timeout_ms() -> u64 {
    5000
}

fn default_upstream() -> String {
    "localhost:55132".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_control() -> String {
    "0.0.0.0:9089".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub upstream: String,
    pub control: String,
    pub backlog: i32,
    pub buffer_size: usize,
    pub poll_timeout: Duration,
    pub connect_timeout: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::empty(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve configuration from already parsed arguments.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be non-zero".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "connect_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_timeout_ms must be non-zero".to_string(),
            ));
        }
        if !self.upstream.contains(':') {
            return Err(ConfigError::Invalid(format!(
                "upstream '{}' is not in host:port form",
                self.upstream
            )));
        }
        Ok(())
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: cli.listen.unwrap_or(toml_config.relay.listen),
            upstream: cli.upstream.unwrap_or(toml_config.upstream.target),
            control: cli.control.unwrap_or(toml_config.control.listen),
            backlog: toml_config.relay.backlog,
            buffer_size: toml_config.relay.buffer_size,
            poll_timeout: Duration::from_millis(toml_config.relay.poll_timeout_ms),
            connect_timeout: Duration::from_millis(
                cli.connect_timeout_ms
                    .unwrap_or(toml_config.upstream.connect_timeout_ms),
            ),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }
}

impl CliArgs {
    fn empty() -> Self {
        Self {
            config: None,
            listen: None,
            upstream: None,
            control: None,
            connect_timeout_ms: None,
            log_level: None,
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen, "0.0.0.0:9090");
        assert_eq!(config.control, "0.0.0.0:9089");
        assert_eq!(config.upstream, "localhost:55132");
        assert_eq!(config.backlog, 200);
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [relay]
            listen = "127.0.0.1:7000"
            buffer_size = 1024

            [upstream]
            target = "10.0.0.5:55132"
            connect_timeout_ms = 250

            [control]
            listen = "127.0.0.1:7001"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.relay.listen, "127.0.0.1:7000");
        assert_eq!(config.relay.buffer_size, 1024);
        assert_eq!(config.relay.backlog, 200);
        assert_eq!(config.upstream.target, "10.0.0.5:55132");
        assert_eq!(config.upstream.connect_timeout_ms, 250);
        assert_eq!(config.control.listen, "127.0.0.1:7001");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_defaults() {
        let cli = CliArgs::try_parse_from([
            "killerrabbit",
            "-l",
            "127.0.0.1:19090",
            "-u",
            "example.net:80",
            "--connect-timeout-ms",
            "100",
            "--log-level",
            "debug",
        ])
        .unwrap();

        let config = Config::from_args(cli).unwrap();
        assert_eq!(config.listen, "127.0.0.1:19090");
        assert_eq!(config.upstream, "example.net:80");
        assert_eq!(config.control, "0.0.0.0:9089");
        assert_eq!(config.connect_timeout, Duration::from_millis(100));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let cli =
            CliArgs::try_parse_from(["killerrabbit", "--connect-timeout-ms", "0"]).unwrap();
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::Invalid(_))
        ));

        let config = Config {
            poll_timeout: Duration::ZERO,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config {
            buffer_size: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_upstream_without_port_rejected() {
        let cli = CliArgs::try_parse_from(["killerrabbit", "-u", "localhost"]).unwrap();
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::Invalid(_))
        ));
    }
}

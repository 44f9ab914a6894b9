//! Configuration module for eval-client.
//!
//! The editor host launches the client with two positional arguments: the
//! port it listens on and the client id it assigned. Everything else comes
//! from an optional TOML file named by the `EVAL_CLIENT_CONFIG` environment
//! variable.

use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::runtime::lifecycle::Identity;

/// Environment variable naming the TOML configuration file.
pub const CONFIG_ENV: &str = "EVAL_CLIENT_CONFIG";

/// Command-line arguments supplied by the editor host
#[derive(Parser, Debug)]
#[command(name = "eval-client")]
#[command(author = "eval-client authors")]
#[command(version = "0.1.0")]
#[command(about = "Evaluation client for the editor host", long_about = None)]
pub struct CliArgs {
    /// Port the editor host is listening on
    pub port: String,

    /// Client id assigned by the editor host (decimal integer)
    pub client_id: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Peer and identity configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Host the editor runs on
    #[serde(default = "default_host")]
    pub host: String,
    /// Client name sent in the handshake
    #[serde(default = "default_name")]
    pub name: String,
    /// Language tag; evaluation command is `editor.eval.<lang>`
    #[serde(default = "default_lang")]
    pub lang: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            name: default_name(),
            lang: default_lang(),
        }
    }
}

/// What the dispatcher does when a read fails or hits end of stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadErrorPolicy {
    /// Log and keep reading.
    #[default]
    Lenient,
    /// Stop on end of stream; treat read errors as fatal.
    Strict,
}

/// Runtime configuration
#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Number of worker threads
    pub workers: Option<usize>,
    #[serde(default)]
    pub read_error_policy: ReadErrorPolicy,
    /// Delay before reading again after a skipped failure, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// TCP keepalive idle time in seconds (0 = disabled)
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Upper bound for one evaluation in seconds (0 = unbounded)
    #[serde(default)]
    pub eval_timeout_secs: u64,
    /// Upper bound for the shutdown drain in seconds (0 = unbounded)
    #[serde(default)]
    pub drain_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: None,
            read_error_policy: ReadErrorPolicy::default(),
            retry_delay_ms: default_retry_delay_ms(),
            keepalive_secs: default_keepalive_secs(),
            eval_timeout_secs: 0,
            drain_timeout_secs: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file, truncated at startup. Logs go to stderr when unset.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_name() -> String {
    "LightTable-Rust".to_string()
}

fn default_lang() -> String {
    "rust".to_string()
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_keepalive_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Zero means "not set".
fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: String,
    /// Raw client id; parsed during the handshake.
    pub client_id: String,
    pub identity: Identity,
    pub workers: Option<usize>,
    pub read_error_policy: ReadErrorPolicy,
    pub retry_delay: Duration,
    pub keepalive: Option<Duration>,
    pub eval_timeout: Option<Duration>,
    pub drain_timeout: Option<Duration>,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from CLI args and the optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => TomlConfig::from_file(Path::new(&path))?,
            None => TomlConfig::default(),
        };

        Ok(Self::from_sources(cli, toml_config))
    }

    /// Merge parsed CLI arguments with file settings.
    pub fn from_sources(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let TomlConfig {
            client,
            runtime,
            logging,
        } = toml_config;

        Config {
            host: client.host,
            port: cli.port,
            client_id: cli.client_id,
            identity: Identity {
                name: client.name,
                lang: client.lang,
            },
            workers: runtime.workers,
            read_error_policy: runtime.read_error_policy,
            retry_delay: Duration::from_millis(runtime.retry_delay_ms),
            keepalive: non_zero_secs(runtime.keepalive_secs),
            eval_timeout: non_zero_secs(runtime.eval_timeout_secs),
            drain_timeout: non_zero_secs(runtime.drain_timeout_secs),
            log_level: logging.level,
            log_file: logging.file,
        }
    }

    /// Peer address in `host:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl TomlConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}

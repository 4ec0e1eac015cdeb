//! Configuration loading and typed config structures.
//!
//! The whole cluster reads one YAML file (`ringlife.yaml` by default, or the
//! path in `RINGLIFE_CONFIG`). Each process only looks at its own section.
//! Every field has a default, so an empty file is a valid single-host
//! configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "RINGLIFE_CONFIG";

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "ringlife.yaml";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is outside its allowed range.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level cluster configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClusterConfig {
    /// Broker process settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Worker process settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Client (controller) settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ClusterConfig {
    /// Load configuration from a YAML file, apply environment overrides, and
    /// validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, and
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load from `RINGLIFE_CONFIG` (or `ringlife.yaml`), falling back to the
    /// defaults when the default file does not exist.
    ///
    /// # Errors
    ///
    /// Same as [`from_file`](Self::from_file); a missing file is only an
    /// error when it was named explicitly.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path)),
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))
            }
            Err(_) => {
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Parse configuration from a YAML string, apply environment overrides,
    /// and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] or [`ConfigError::Invalid`].
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides for addresses and ports.
    ///
    /// - `RINGLIFE_BROKER_ADDR` overrides `worker.broker`
    /// - `RINGLIFE_BROKER_PORT` overrides `broker.port`
    /// - `RINGLIFE_WORKER_PORT` overrides `worker.port`
    /// - `RINGLIFE_WORKER_ADVERTISE` overrides `worker.advertise`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("RINGLIFE_BROKER_ADDR") {
            self.worker.broker = addr;
        }
        if let Some(port) = env_port("RINGLIFE_BROKER_PORT") {
            self.broker.port = port;
        }
        if let Some(port) = env_port("RINGLIFE_WORKER_PORT") {
            self.worker.port = port;
        }
        if let Ok(addr) = std::env::var("RINGLIFE_WORKER_ADVERTISE") {
            self.worker.advertise = Some(addr);
        }
    }

    /// Reject values the cluster cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a pipeline depth below 2 or a
    /// zero round length.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.pipeline_depth < 2 {
            return Err(ConfigError::Invalid(format!(
                "worker.pipeline_depth must be at least 2, got {}",
                self.worker.pipeline_depth
            )));
        }
        if self.broker.round_turns == 0 {
            return Err(ConfigError::Invalid(
                "broker.round_turns must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

fn env_port(name: &str) -> Option<u16> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Broker process configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// Address workers should report turns to (defaults to `127.0.0.1:port`).
    #[serde(default)]
    pub advertise: Option<String>,

    /// Milliseconds to keep serving after a Close, to drain in-flight calls.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,

    /// Turns dispatched per `RunWorld` call. 1 dispatches every turn; more
    /// lets workers pipeline through halo exchange.
    #[serde(default = "default_round_turns")]
    pub round_turns: u64,

    /// Aborted pipelined rounds tolerated before falling back to single-turn
    /// rounds for the rest of the run.
    #[serde(default = "default_max_round_retries")]
    pub max_round_retries: u32,

    /// Longest a turn report is held while the reporter is too far ahead.
    #[serde(default = "default_report_wait_ms")]
    pub report_wait_ms: u64,

    /// In-process workers to host alongside the broker.
    #[serde(default)]
    pub embedded_workers: usize,

    /// Primary broker to register with as a standby.
    #[serde(default)]
    pub standby_of: Option<String>,
}

impl BrokerConfig {
    /// The address this broker is reachable at.
    pub fn advertised(&self) -> String {
        self.advertise
            .clone()
            .unwrap_or_else(|| format!("127.0.0.1:{}", self.port))
    }

    /// Grace period as a [`Duration`].
    pub const fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    /// Report hold limit as a [`Duration`].
    pub const fn report_wait(&self) -> Duration {
        Duration::from_millis(self.report_wait_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_broker_port(),
            advertise: None,
            grace_ms: default_grace_ms(),
            round_turns: default_round_turns(),
            max_round_retries: default_max_round_retries(),
            report_wait_ms: default_report_wait_ms(),
            embedded_workers: 0,
            standby_of: None,
        }
    }
}

/// Worker process configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_worker_port")]
    pub port: u16,

    /// Address the broker and peers dial (defaults to `127.0.0.1:port`).
    #[serde(default)]
    pub advertise: Option<String>,

    /// Broker to subscribe to on startup.
    #[serde(default = "default_broker_addr")]
    pub broker: String,

    /// Maximum turns this worker may run ahead of the slowest band, and the
    /// capacity of each halo semaphore.
    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: u64,

    /// Subscription attempts before giving up.
    #[serde(default = "default_subscribe_attempts")]
    pub subscribe_attempts: u32,

    /// Fixed delay between subscription attempts.
    #[serde(default = "default_backoff_ms")]
    pub subscribe_backoff_ms: u64,

    /// Milliseconds to keep serving after a Close.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

impl WorkerConfig {
    /// The address this worker is reachable at.
    pub fn advertised(&self) -> String {
        self.advertise
            .clone()
            .unwrap_or_else(|| format!("127.0.0.1:{}", self.port))
    }

    /// Subscription backoff as a [`Duration`].
    pub const fn subscribe_backoff(&self) -> Duration {
        Duration::from_millis(self.subscribe_backoff_ms)
    }

    /// Grace period as a [`Duration`].
    pub const fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_worker_port(),
            advertise: None,
            broker: default_broker_addr(),
            pipeline_depth: default_pipeline_depth(),
            subscribe_attempts: default_subscribe_attempts(),
            subscribe_backoff_ms: default_backoff_ms(),
            grace_ms: default_grace_ms(),
        }
    }
}

/// Client (controller) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Broker addresses, primary first.
    #[serde(default = "default_client_brokers")]
    pub brokers: Vec<String>,

    /// Connection attempts per failover before aborting.
    #[serde(default = "default_failover_attempts")]
    pub failover_attempts: u32,

    /// Fixed delay between failover attempts.
    #[serde(default = "default_failover_backoff_ms")]
    pub failover_backoff_ms: u64,

    /// How often a running client refreshes its backup snapshot.
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,

    /// Minimum gap between two backup refreshes, however they are triggered.
    #[serde(default = "default_checkpoint_min_gap_ms")]
    pub checkpoint_min_gap_ms: u64,
}

impl ClientConfig {
    /// Failover backoff as a [`Duration`].
    pub const fn failover_backoff(&self) -> Duration {
        Duration::from_millis(self.failover_backoff_ms)
    }

    /// Checkpoint interval as a [`Duration`].
    pub const fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    /// Minimum checkpoint gap as a [`Duration`].
    pub const fn checkpoint_min_gap(&self) -> Duration {
        Duration::from_millis(self.checkpoint_min_gap_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            brokers: default_client_brokers(),
            failover_attempts: default_failover_attempts(),
            failover_backoff_ms: default_failover_backoff_ms(),
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            checkpoint_min_gap_ms: default_checkpoint_min_gap_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_broker_port() -> u16 {
    8030
}

const fn default_worker_port() -> u16 {
    8040
}

fn default_broker_addr() -> String {
    "127.0.0.1:8030".to_owned()
}

fn default_client_brokers() -> Vec<String> {
    vec![default_broker_addr()]
}

const fn default_grace_ms() -> u64 {
    500
}

const fn default_round_turns() -> u64 {
    1
}

const fn default_max_round_retries() -> u32 {
    3
}

const fn default_report_wait_ms() -> u64 {
    1000
}

const fn default_pipeline_depth() -> u64 {
    3
}

const fn default_subscribe_attempts() -> u32 {
    10
}

const fn default_backoff_ms() -> u64 {
    500
}

const fn default_failover_attempts() -> u32 {
    5
}

const fn default_failover_backoff_ms() -> u64 {
    2000
}

const fn default_checkpoint_interval_ms() -> u64 {
    2000
}

const fn default_checkpoint_min_gap_ms() -> u64 {
    2
}

fn default_log_filter() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let config = ClusterConfig::parse("").unwrap();
        assert_eq!(config.broker.port, 8030);
        assert_eq!(config.broker.round_turns, 1);
        assert_eq!(config.worker.pipeline_depth, 3);
        assert_eq!(config.broker.grace(), Duration::from_millis(500));
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = r"
broker:
  round_turns: 8
  embedded_workers: 4
client:
  brokers: ['10.0.0.1:8030', '10.0.0.2:8030']
";
        let config = ClusterConfig::parse(yaml).unwrap();
        assert_eq!(config.broker.round_turns, 8);
        assert_eq!(config.broker.embedded_workers, 4);
        assert_eq!(config.broker.max_round_retries, 3);
        assert_eq!(config.client.brokers.len(), 2);
        assert_eq!(config.client.failover_attempts, 5);
    }

    #[test]
    fn shallow_pipeline_is_rejected() {
        let err = ClusterConfig::parse("worker:\n  pipeline_depth: 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_round_is_rejected() {
        let err = ClusterConfig::parse("broker:\n  round_turns: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_yaml_is_a_yaml_error() {
        let err = ClusterConfig::parse("broker: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }

    #[test]
    fn advertised_address_defaults_to_loopback() {
        let worker = WorkerConfig {
            port: 9001,
            ..WorkerConfig::default()
        };
        assert_eq!(worker.advertised(), "127.0.0.1:9001");
        let worker = WorkerConfig {
            advertise: Some("10.1.2.3:9001".to_owned()),
            ..WorkerConfig::default()
        };
        assert_eq!(worker.advertised(), "10.1.2.3:9001");
    }
}

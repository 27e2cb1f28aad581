//! Daemon configuration.
//!
//! Values are resolved in three layers, later ones winning:
//!
//! 1. A YAML file (optional)
//! 2. `SQSD_*` environment variables
//! 3. Command-line flags (applied by the CLI)
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SQSD_WORKER_URL` | `worker.url` |
//! | `SQSD_MAX_WORKERS` | `worker.max_workers` |
//! | `SQSD_REQUEST_TIMEOUT_SECS` | `worker.request_timeout_secs` |
//! | `SQSD_QUEUE_BACKEND` | `queue.backend` (`sqs`, `redis`, `memory`) |
//! | `SQSD_QUEUE_URL` | `queue.url` |
//! | `SQSD_QUEUE_REGION` | `queue.region` |
//! | `SQSD_QUEUE_ENDPOINT_URL` | `queue.endpoint_url` |
//! | `SQSD_QUEUE_NAME` | `queue.queue_name` |
//! | `SQSD_MAX_MESSAGES` | `queue.max_messages` |
//! | `SQSD_WAIT_TIME_SECONDS` | `queue.wait_time_seconds` |
//! | `SQSD_VISIBILITY_TIMEOUT_SECS` | `queue.visibility_timeout_secs` |
//! | `SQSD_IDLE_INTERVAL_MS` | `queue.idle_interval_ms` |
//! | `SQSD_STAT_ENABLED` | `stat.enabled` |
//! | `SQSD_STAT_BIND` | `stat.bind` |
//! | `SQSD_SHUTDOWN_TIMEOUT_SECS` | `shutdown_timeout_secs` |
//! | `SQSD_LOG_LEVEL` | `log_level` |
//! | `SQSD_LOG_FORMAT` | `log_format` (`plain`, `json`) |

use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// SQS limits one receive to ten messages.
pub const MAX_BATCH_SIZE: usize = 10;
/// SQS limits long polling to twenty seconds.
pub const MAX_WAIT_TIME_SECONDS: u32 = 20;

/// Queue backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Sqs,
    Redis,
    Memory,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqs" => Ok(QueueBackend::Sqs),
            "redis" => Ok(QueueBackend::Redis),
            "memory" => Ok(QueueBackend::Memory),
            other => Err(format!("unknown queue backend '{}'", other)),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plain" | "text" => Ok(LogFormat::Plain),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Downstream worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Endpoint every message is POSTed to.
    pub url: String,
    /// Maximum number of concurrent jobs.
    pub max_workers: usize,
    /// Per-request timeout; unset waits for the worker indefinitely.
    pub request_timeout_secs: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/".to_string(),
            max_workers: 10,
            request_timeout_secs: None,
        }
    }
}

impl WorkerConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Queue backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// SQS queue URL or Redis connection URL.
    pub url: Option<String>,
    /// AWS region; falls back to the default provider chain.
    pub region: Option<String>,
    /// Override for SQS-compatible services.
    pub endpoint_url: Option<String>,
    /// Key prefix for the Redis backend.
    pub queue_name: String,
    pub max_messages: usize,
    pub wait_time_seconds: u32,
    /// Visibility timeout for the Redis and memory backends. SQS uses the
    /// queue's own setting.
    pub visibility_timeout_secs: u64,
    /// Back-off while paused, full, or after a receive error.
    pub idle_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Sqs,
            url: None,
            region: None,
            endpoint_url: None,
            queue_name: "sqsd".to_string(),
            max_messages: MAX_BATCH_SIZE,
            wait_time_seconds: MAX_WAIT_TIME_SECONDS,
            visibility_timeout_secs: 30,
            idle_interval_ms: 1000,
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

/// Stat/control server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for StatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([127, 0, 0, 1], 4080)),
        }
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub stat: StatConfig,
    /// Upper bound on the graceful drain after a shutdown signal.
    pub shutdown_timeout_secs: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            queue: QueueConfig::default(),
            stat: StatConfig::default(),
            shutdown_timeout_secs: 60,
            log_level: "info".to_string(),
            log_format: LogFormat::Plain,
        }
    }
}

impl DaemonConfig {
    /// Parses a YAML document. Missing fields take their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Loads the file (or defaults when `path` is `None`) and applies
    /// `SQSD_*` environment overrides. Does not validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the variable that failed
    /// to parse.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Worker settings
        if let Some(val) = lookup("SQSD_WORKER_URL") {
            self.worker.url = val;
        }

        if let Some(val) = lookup("SQSD_MAX_WORKERS") {
            self.worker.max_workers = parse_env_value(&val, "SQSD_MAX_WORKERS")?;
        }

        if let Some(val) = lookup("SQSD_REQUEST_TIMEOUT_SECS") {
            self.worker.request_timeout_secs =
                Some(parse_env_value(&val, "SQSD_REQUEST_TIMEOUT_SECS")?);
        }

        // Queue settings
        if let Some(val) = lookup("SQSD_QUEUE_BACKEND") {
            self.queue.backend = parse_env_value(&val, "SQSD_QUEUE_BACKEND")?;
        }

        if let Some(val) = lookup("SQSD_QUEUE_URL") {
            self.queue.url = Some(val);
        }

        if let Some(val) = lookup("SQSD_QUEUE_REGION") {
            self.queue.region = Some(val);
        }

        if let Some(val) = lookup("SQSD_QUEUE_ENDPOINT_URL") {
            self.queue.endpoint_url = Some(val);
        }

        if let Some(val) = lookup("SQSD_QUEUE_NAME") {
            self.queue.queue_name = val;
        }

        if let Some(val) = lookup("SQSD_MAX_MESSAGES") {
            self.queue.max_messages = parse_env_value(&val, "SQSD_MAX_MESSAGES")?;
        }

        if let Some(val) = lookup("SQSD_WAIT_TIME_SECONDS") {
            self.queue.wait_time_seconds = parse_env_value(&val, "SQSD_WAIT_TIME_SECONDS")?;
        }

        if let Some(val) = lookup("SQSD_VISIBILITY_TIMEOUT_SECS") {
            self.queue.visibility_timeout_secs =
                parse_env_value(&val, "SQSD_VISIBILITY_TIMEOUT_SECS")?;
        }

        if let Some(val) = lookup("SQSD_IDLE_INTERVAL_MS") {
            self.queue.idle_interval_ms = parse_env_value(&val, "SQSD_IDLE_INTERVAL_MS")?;
        }

        // Stat server settings
        if let Some(val) = lookup("SQSD_STAT_ENABLED") {
            self.stat.enabled = parse_env_bool(&val, "SQSD_STAT_ENABLED")?;
        }

        if let Some(val) = lookup("SQSD_STAT_BIND") {
            self.stat.bind = parse_env_value(&val, "SQSD_STAT_BIND")?;
        }

        // Process settings
        if let Some(val) = lookup("SQSD_SHUTDOWN_TIMEOUT_SECS") {
            self.shutdown_timeout_secs = parse_env_value(&val, "SQSD_SHUTDOWN_TIMEOUT_SECS")?;
        }

        if let Some(val) = lookup("SQSD_LOG_LEVEL") {
            self.log_level = val;
        }

        if let Some(val) = lookup("SQSD_LOG_FORMAT") {
            self.log_format = parse_env_value(&val, "SQSD_LOG_FORMAT")?;
        }

        Ok(())
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Worker validation
        if self.worker.url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "worker.url cannot be empty".to_string(),
            ));
        }

        if !self.worker.url.starts_with("http://") && !self.worker.url.starts_with("https://") {
            return Err(ConfigError::ValidationFailed(format!(
                "worker.url must be an http(s) URL, got '{}'",
                self.worker.url
            )));
        }

        if self.worker.max_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "worker.max_workers must be greater than 0".to_string(),
            ));
        }

        if self.worker.request_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "worker.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        // Queue validation
        if !(1..=MAX_BATCH_SIZE).contains(&self.queue.max_messages) {
            return Err(ConfigError::ValidationFailed(format!(
                "queue.max_messages must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }

        if self.queue.wait_time_seconds > MAX_WAIT_TIME_SECONDS {
            return Err(ConfigError::ValidationFailed(format!(
                "queue.wait_time_seconds must be at most {}",
                MAX_WAIT_TIME_SECONDS
            )));
        }

        if self.queue.idle_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "queue.idle_interval_ms must be greater than 0".to_string(),
            ));
        }

        let has_url = self.queue.url.as_deref().is_some_and(|url| !url.is_empty());
        match self.queue.backend {
            QueueBackend::Sqs if !has_url => {
                return Err(ConfigError::ValidationFailed(
                    "queue.url (the SQS queue URL) is required for the sqs backend".to_string(),
                ));
            }
            QueueBackend::Redis if !has_url => {
                return Err(ConfigError::ValidationFailed(
                    "queue.url (the Redis URL) is required for the redis backend".to_string(),
                ));
            }
            QueueBackend::Redis if self.queue.queue_name.is_empty() => {
                return Err(ConfigError::ValidationFailed(
                    "queue.queue_name cannot be empty for the redis backend".to_string(),
                ));
            }
            _ => {}
        }

        if self.queue.visibility_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "queue.visibility_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Renders the resolved configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Parse an environment variable value into the target type.
fn parse_env_value<T>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T: FromStr,
{
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn valid_memory_config() -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.queue.backend = QueueBackend::Memory;
        config
    }

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();

        assert_eq!(config.worker.max_workers, 10);
        assert_eq!(config.queue.backend, QueueBackend::Sqs);
        assert_eq!(config.queue.max_messages, 10);
        assert_eq!(config.queue.wait_time_seconds, 20);
        assert_eq!(config.queue.idle_interval(), Duration::from_secs(1));
        assert_eq!(config.stat.bind.port(), 4080);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(60));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Plain);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = DaemonConfig::from_yaml(
            r#"
worker:
  url: http://127.0.0.1:9000/jobs
  max_workers: 3
queue:
  backend: redis
  url: redis://localhost:6379
"#,
        )
        .expect("parse");

        assert_eq!(config.worker.url, "http://127.0.0.1:9000/jobs");
        assert_eq!(config.worker.max_workers, 3);
        assert_eq!(config.queue.backend, QueueBackend::Redis);
        assert_eq!(config.queue.queue_name, "sqsd");
        assert_eq!(config.queue.max_messages, 10);
        assert!(config.stat.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "queue:\n  backend: memory\nstat:\n  bind: 0.0.0.0:9999\nlog_format: json"
        )
        .expect("write");

        let config = DaemonConfig::from_file(file.path()).expect("load");

        assert_eq!(config.queue.backend, QueueBackend::Memory);
        assert_eq!(config.stat.bind, "0.0.0.0:9999".parse::<SocketAddr>().unwrap());
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = DaemonConfig::from_file(Path::new("/nonexistent/sqsd.yaml"));

        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = DaemonConfig::default();

        config
            .apply_env_from(env(&[
                ("SQSD_WORKER_URL", "https://worker.internal/run"),
                ("SQSD_MAX_WORKERS", "32"),
                ("SQSD_QUEUE_BACKEND", "Redis"),
                ("SQSD_QUEUE_URL", "redis://cache:6379"),
                ("SQSD_STAT_ENABLED", "off"),
                ("SQSD_STAT_BIND", "0.0.0.0:5000"),
                ("SQSD_REQUEST_TIMEOUT_SECS", "15"),
                ("SQSD_LOG_FORMAT", "json"),
            ]))
            .expect("apply");

        assert_eq!(config.worker.url, "https://worker.internal/run");
        assert_eq!(config.worker.max_workers, 32);
        assert_eq!(config.worker.request_timeout(), Some(Duration::from_secs(15)));
        assert_eq!(config.queue.backend, QueueBackend::Redis);
        assert_eq!(config.queue.url.as_deref(), Some("redis://cache:6379"));
        assert!(!config.stat.enabled);
        assert_eq!(config.stat.bind.port(), 5000);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_env_parse_error_names_variable() {
        let mut config = DaemonConfig::default();

        let err = config
            .apply_env_from(env(&[("SQSD_MAX_WORKERS", "many")]))
            .unwrap_err();

        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "SQSD_MAX_WORKERS"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("true", "K").unwrap());
        assert!(parse_env_bool("YES", "K").unwrap());
        assert!(!parse_env_bool("0", "K").unwrap());
        assert!(parse_env_bool("maybe", "K").is_err());
    }

    #[test]
    fn test_validate_worker_settings() {
        let mut config = valid_memory_config();
        assert!(config.validate().is_ok());

        config.worker.url = String::new();
        assert!(config.validate().is_err());

        config.worker.url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        config.worker.url = "http://localhost:8080".to_string();
        config.worker.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_queue_limits() {
        let mut config = valid_memory_config();

        config.queue.max_messages = 0;
        assert!(config.validate().is_err());

        config.queue.max_messages = 11;
        assert!(config.validate().is_err());

        config.queue.max_messages = 10;
        config.queue.wait_time_seconds = 21;
        assert!(config.validate().is_err());

        config.queue.wait_time_seconds = 0;
        assert!(config.validate().is_ok());

        config.queue.idle_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_backend_urls() {
        let mut config = DaemonConfig::default();
        assert!(config.validate().is_err());

        config.queue.url = Some("https://sqs.us-east-1.amazonaws.com/123/jobs".to_string());
        assert!(config.validate().is_ok());

        config.queue.backend = QueueBackend::Redis;
        config.queue.url = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_roundtrip_of_resolved_config() {
        let config = valid_memory_config();

        let yaml = config.to_yaml().expect("render");
        let parsed = DaemonConfig::from_yaml(&yaml).expect("parse");

        assert_eq!(parsed, config);
    }
}

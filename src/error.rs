//! Error types for sqsd operations.
//!
//! Defines the error types shared across subsystems:
//! - Queue backend access (receive / delete)
//! - Configuration loading and validation
//! - Downstream worker invocation
//! - The stat/control HTTP server
//! - Daemon startup and shutdown
//!
//! Admission rejections are not errors: the tracker reports them as `false`
//! and the message is simply left unacknowledged.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to the queue backend.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Queue connection failed: {0}")]
    ConnectionFailed(String),

    #[error("SQS request failed: {0}")]
    Sqs(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Receipt '{0}' is unknown or its visibility timeout already expired")]
    ReceiptNotFound(String),
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Transport-level failures of a downstream worker call.
///
/// A non-200 response is not a `DispatchError`; it is reported as a plain
/// failed outcome.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Request cancelled by shutdown")]
    Cancelled,
}

/// Errors raised by the stat/control server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind stat server to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Stat server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Errors that end the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue backend error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Worker client setup failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("Daemon task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_error_display() {
        let err = ResourceError::ReceiptNotFound("r-1".to_string());
        assert!(err.to_string().contains("r-1"));

        let err = ResourceError::Sqs("throttled".to_string());
        assert!(err.to_string().contains("throttled"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            key: "SQSD_MAX_WORKERS".to_string(),
            message: "not a number".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid value for SQSD_MAX_WORKERS: not a number"
        );
    }

    #[test]
    fn test_dispatch_error_display() {
        assert_eq!(
            DispatchError::Cancelled.to_string(),
            "Request cancelled by shutdown"
        );
    }

    #[test]
    fn test_server_error_bind_display() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:4080".parse().expect("valid addr"),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("127.0.0.1:4080"));
    }

    #[test]
    fn test_daemon_error_display() {
        let err = DaemonError::ShutdownTimeout(Duration::from_secs(60));
        assert_eq!(err.to_string(), "Shutdown timed out after 60s");

        let err: DaemonError = ConfigError::ValidationFailed("bad".to_string()).into();
        assert!(err.to_string().starts_with("Invalid configuration"));
    }
}

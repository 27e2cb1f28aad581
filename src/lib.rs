//! sqsd: worker-tier queue daemon.
//!
//! Long-polls a queue backend, dispatches each message as an HTTP POST to a
//! worker under a concurrency limit, and deletes the message only when the
//! worker answers `200`. Failed messages are retried by the backend's own
//! visibility timeout.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod metrics;
pub mod resource;
pub mod scheduler;
pub mod stat;

// Re-export commonly used types
pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use error::{ConfigError, DaemonError, DispatchError, ResourceError, ServerError};

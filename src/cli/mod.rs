//! Command-line interface for sqsd.
//!
//! Provides `run` for the daemon itself and `check-config` for validating a
//! configuration before deploying it.

mod commands;

pub use commands::{
    parse_cli, resolve_config, run_with_cli, shutdown_signal, Cli, Commands, RunArgs,
};

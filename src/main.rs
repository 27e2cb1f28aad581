//! sqsd entry point.
//!
//! Resolves configuration, initializes logging and delegates to the CLI
//! module for command handling.

use sqsd::config::LogFormat;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = sqsd::cli::parse_cli();
    let config = sqsd::cli::resolve_config(&cli)?;

    // Priority: RUST_LOG env var > --log-level CLI arg > config log_level
    // (the CLI arg is already folded into the config)
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let filter = EnvFilter::try_new(&log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let (plain, json) = match config.log_format {
        LogFormat::Plain => (Some(fmt::layer()), None),
        LogFormat::Json => (None, Some(fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(plain)
        .with(json)
        .with(filter)
        .init();

    sqsd::cli::run_with_cli(cli, config).await
}

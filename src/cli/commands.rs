//! CLI command definitions for sqsd.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::daemon::Daemon;
use crate::metrics::init_metrics;

/// Worker-tier queue daemon.
#[derive(Parser, Debug)]
#[command(name = "sqsd")]
#[command(about = "Poll a queue and dispatch each message to an HTTP worker")]
#[command(version)]
#[command(
    long_about = "sqsd long-polls a queue (SQS, Redis, or in-memory) and POSTs every message to a worker URL under a concurrency limit.\n\nMessages are deleted only when the worker answers 200; anything else is redelivered by the queue's visibility timeout.\n\nExample usage:\n  sqsd run --config sqsd.yaml --worker-url http://localhost:8080/run"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// YAML configuration file.
    #[arg(short, long, global = true, env = "SQSD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon until Ctrl-C or SIGTERM.
    Run(RunArgs),

    /// Validate the configuration and print it as resolved.
    #[command(name = "check-config")]
    CheckConfig,
}

/// Flags for `sqsd run`. Each one overrides the file and environment.
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Worker endpoint every message is POSTed to.
    #[arg(long)]
    pub worker_url: Option<String>,

    /// Maximum number of concurrent jobs.
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Address for the stat/control server.
    #[arg(long)]
    pub stat_bind: Option<SocketAddr>,
}

impl RunArgs {
    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(url) = &self.worker_url {
            config.worker.url = url.clone();
        }
        if let Some(max_workers) = self.max_workers {
            config.worker.max_workers = max_workers;
        }
        if let Some(bind) = self.stat_bind {
            config.stat.bind = bind;
        }
    }
}

/// Parses CLI arguments from the process.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Resolves the configuration: file, then `SQSD_*` environment, then flags.
/// The result is not validated.
pub fn resolve_config(cli: &Cli) -> anyhow::Result<DaemonConfig> {
    let mut config = DaemonConfig::load(cli.config.as_deref()).with_context(|| match &cli.config
    {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })?;

    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Commands::Run(args) = &cli.command {
        args.apply(&mut config);
    }

    Ok(config)
}

/// Runs the parsed command with an already resolved configuration.
pub async fn run_with_cli(cli: Cli, config: DaemonConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(_) => run_daemon(config).await,
        Commands::CheckConfig => check_config(&config),
    }
}

async fn run_daemon(config: DaemonConfig) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Failed to initialize metrics, continuing without them");
    }

    let daemon = Daemon::from_config(config)
        .await
        .context("Failed to start sqsd")?;
    if let Some(addr) = daemon.stat_addr() {
        info!(%addr, "Stat server bound");
    }

    daemon
        .run(shutdown_signal())
        .await
        .context("sqsd did not shut down cleanly")?;
    Ok(())
}

fn check_config(config: &DaemonConfig) -> anyhow::Result<()> {
    config.validate().context("Configuration is invalid")?;
    let yaml = config.to_yaml().context("Failed to render configuration")?;
    print!("{}", yaml);
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM");
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

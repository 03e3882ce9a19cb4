//! Foreman agent binary
//!
//! Loads configuration, wires up logging and hands control to the agent
//! until ctrl-c.

mod agent;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use foreman_core::config::Config;

use crate::agent::Agent;

#[derive(Debug, Parser)]
#[command(name = "foreman-agent", version, about = "Remote task-execution agent")]
struct Cli {
    /// Path to the agent configuration file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    init_logging(&config)?;

    let mut agent = Agent::new(config);
    agent
        .start()
        .await
        .context("agent registration failed, check platform URL and network")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    agent.stop().await;

    Ok(())
}

/// Console plus file logging per the config's logging section. The config
/// level applies unless RUST_LOG overrides it.
fn init_logging(config: &Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.logging.path)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.logging.path.join(&config.logging.filename))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .init();

    Ok(())
}

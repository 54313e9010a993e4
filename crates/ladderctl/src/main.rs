//! Ladder Control - operator CLI for the XP ladder store
//!
//! Every subcommand runs one pass of the same components the daemon
//! schedules, against the configured store (or an empty in-memory one).

mod cli;
mod commands;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use ladder_common::{Config, KvStore, MemoryKv, RestKv, SystemClock};
use ladderd::Engine;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            output::display_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}

/// `Ok(false)` means the command ran but did not get what it asked for.
async fn run(cli: Cli) -> Result<bool> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let store: Arc<dyn KvStore> = if cli.memory {
        output::note("Using an empty in-memory store; nothing is persisted");
        Arc::new(MemoryKv::new())
    } else {
        Arc::new(RestKv::new(&config.kv).context("Failed to build store client")?)
    };

    let engine = Engine::build(config, store, Arc::new(SystemClock))
        .await
        .context("Failed to load ladder")?;

    match cli.command {
        Commands::Status { json } => commands::status(&engine, json).await?,
        Commands::Ladder => commands::ladder(&engine)?,
        Commands::Reconcile => commands::reconcile(&engine).await?,
        Commands::Heal => commands::heal(&engine).await?,
        Commands::Gate { key, ttl } => return commands::gate(&engine, &key, ttl).await,
        Commands::Notify => commands::notify(&engine).await?,
    }
    Ok(true)
}

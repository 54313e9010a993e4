//! Ladder Daemon - keeps the XP total, ladder credits and notifications in sync
//!
//! Boot failures (config, store client, ladder) exit non-zero. Once running,
//! errors are logged per tick and the next tick retries.

use anyhow::{Context, Result};
use clap::Parser;
use ladder_common::{Config, KvStore, RestKv, SystemClock};
use ladderd::Engine;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ladderd")]
#[command(about = "XP progression and ladder synchronization daemon", version)]
struct Cli {
    /// Config file (defaults to $LADDER_CONFIG, then /etc/ladder/config.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config is read before logging so its log_level can act as fallback filter
    let config = Config::load(cli.config.as_deref());
    let fallback = config
        .as_ref()
        .ok()
        .and_then(|c| c.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();

    info!("Ladder Daemon v{} starting", env!("CARGO_PKG_VERSION"));
    let config = config.context("[BOOT] Failed to load configuration")?;

    let store: Arc<dyn KvStore> =
        Arc::new(RestKv::new(&config.kv).context("[BOOT] Failed to build store client")?);
    let engine = Engine::build(config, store, Arc::new(SystemClock))
        .await
        .context("[BOOT] Failed to initialize engine")?;

    let scheduler = engine.start();
    info!("Ladder Daemon ready");

    wait_for_signal().await?;
    info!("Shutting down gracefully");
    scheduler.shutdown().await;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

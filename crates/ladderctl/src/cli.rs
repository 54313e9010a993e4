//! CLI - Command-line argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Ladder control CLI
#[derive(Parser)]
#[command(name = "ladderctl")]
#[command(about = "Inspect and maintain the XP ladder store", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (overrides $LADDER_CONFIG and the system paths)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Run against an empty in-memory store instead of the configured one
    #[arg(long, global = true)]
    pub memory: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show total XP, ladder position, watermark and per-level credits
    Status {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Print the ladder with cumulative spans
    Ladder,

    /// Run one reconcile pass
    Reconcile,

    /// Run one self-heal pass
    Heal,

    /// Try to take a gate lease (exit status 1 when it is held)
    Gate {
        key: String,

        /// Lease TTL in seconds (defaults to gate.default_ttl_secs)
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Run one notifier tick
    Notify,
}

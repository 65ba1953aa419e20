use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ChainClaw — self-hosted DeFi operations agent: transaction safety
/// pipeline plus background trading engines (DCA, limit orders, whale
/// watching, signals, snipes).
#[derive(Parser)]
#[command(name = "chainclaw", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the agent daemon: all engines plus the execution pipeline
    Run {
        /// Data directory (overrides CHAINCLAW_DATA_DIR)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Create the data directory and database schema, then exit
    Init {
        /// Data directory (overrides CHAINCLAW_DATA_DIR)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Print per-table row counts from the store
    Status {
        /// Data directory (overrides CHAINCLAW_DATA_DIR)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

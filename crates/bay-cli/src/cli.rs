use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "bay", about = "Sandbox orchestration service for AI agents")]
pub struct Cli {
    /// Base URL of a running instance, for remote subcommands.
    #[arg(long, global = true, default_value = "http://127.0.0.1:7100")]
    pub remote: String,

    /// Bearer token for remote subcommands. Falls back to $BAY_TOKEN.
    #[arg(long, global = true, env = "BAY_TOKEN")]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the API server and the GC tasks.
    Serve {
        /// Settings file (YAML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show sandbox counts by status on a running instance.
    Status,
    /// List the profile catalog of a running instance.
    Profiles,
    /// Trigger one GC pass on a running instance.
    Gc,
}

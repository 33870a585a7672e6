mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => commands::serve(config).await,
        Command::Status => commands::status(cli.remote, cli.token).await,
        Command::Profiles => commands::profiles(cli.remote, cli.token).await,
        Command::Gc => commands::gc(cli.remote, cli.token).await,
    }
}

//! `oxide-watch`: polls repositories and turns new commits into buildsets.

use clap::Parser;
use std::path::PathBuf;

mod commands;
mod config;
mod daemon;
mod handlers;
mod logging;

use commands::{Commands, StateCommands};
use config::DaemonConfig;

#[derive(Parser)]
#[command(name = "oxide-watch")]
#[command(author, version, about = "Repository poller and change scheduler", long_about = None)]
struct Cli {
    /// Path to the daemon configuration
    #[arg(short, long, default_value = "oxide-watch.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = DaemonConfig::from_file(&cli.config)?;
    logging::init_tracing(config.log_format);

    match cli.command {
        Commands::Run => handlers::run(&config).await?,
        Commands::Poll => handlers::poll(&config).await?,
        Commands::Migrate => handlers::migrate(&config).await?,
        Commands::Validate => handlers::validate(&config)?,
        Commands::State { command } => match command {
            StateCommands::Get { scheduler, key } => {
                handlers::state_get(&config, &scheduler, &key).await?
            }
            StateCommands::Set {
                scheduler,
                key,
                value,
            } => handlers::state_set(&config, &scheduler, &key, &value).await?,
        },
    }

    Ok(())
}

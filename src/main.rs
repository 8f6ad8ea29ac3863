use tracing::{error, info};

use matchroom::logging::init_logging;
use matchroom::{Config, Result};

mod app_config;
mod commands;

use app_config::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    use clap::Parser;

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) if !matches!(cli.command, Commands::CheckConfig { .. }) => Config::load(path)?,
        _ => {
            let mut config = Config::default();
            config.override_from_env()?;
            config
        }
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_logging(&config.logging)?;

    info!(command = cli.command.name(), "matchroom {}", env!("CARGO_PKG_VERSION"));

    let outcome = match cli.command {
        Commands::Demo {
            game,
            seed,
            max_actions,
        } => commands::demo_command(config, game.into(), seed, max_actions).await,
        Commands::CheckConfig { path } => commands::check_config_command(&path),
    };

    if let Err(e) = &outcome {
        error!(error = %e, "Command failed");
    }
    outcome
}

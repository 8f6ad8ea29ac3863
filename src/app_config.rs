//! Command-line interface definition
//!
//! Argument parsing for the `matchroom` binary. The service itself is a
//! library; the binary exists to validate config files and to run a local
//! match end to end.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use matchroom::GameKind;

#[derive(Parser)]
#[command(name = "matchroom")]
#[command(about = "Two-player turn-based game sessions", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// TOML config file; built-in defaults are used when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Play a scripted match between two local clients
    Demo {
        #[arg(long, value_enum, default_value_t = GameArg::Board)]
        game: GameArg,

        /// Shuffle seed for card games
        #[arg(long, default_value = "7")]
        seed: u64,

        /// Give up after this many submitted actions
        #[arg(long, default_value = "400")]
        max_actions: usize,
    },

    /// Parse and validate a config file, then print the effective values
    CheckConfig { path: PathBuf },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Demo { .. } => "demo",
            Commands::CheckConfig { .. } => "check-config",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GameArg {
    Board,
    GoFish,
}

impl From<GameArg> for GameKind {
    fn from(arg: GameArg) -> Self {
        match arg {
            GameArg::Board => GameKind::Board,
            GameArg::GoFish => GameKind::GoFish,
        }
    }
}

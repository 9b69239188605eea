mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tl_core::config::Config;

/// tasklink CLI -- inspect how task events reconcile into a task view.
#[derive(Parser)]
#[command(name = "tl", version, about)]
struct Cli {
    /// Config file (defaults to ~/.tasklink/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines file of inbound events against a fresh task view.
    Replay {
        /// File with one inbound event per line.
        file: PathBuf,
        /// Id of the task being observed.
        #[arg(short, long)]
        task: String,
        /// Print the final view as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration.
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    tl_telemetry::logging::init("tl", &config.general.log_level, config.general.log_json);

    match cli.command {
        Commands::Replay { file, task, json } => {
            commands::replay::run(&config, &file, &task, json)?;
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

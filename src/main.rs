//! `loglife` command-line host.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "loglife")]
#[command(about = "Rotate append-only log files without restarting the writer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the configured targets and rotate until Ctrl-C
    Run {
        /// Configuration file
        #[arg(short, long, default_value = "loglife.toml")]
        config: PathBuf,
        /// Tick interval, overriding the config (e.g. "10sec", "1min")
        #[arg(short, long)]
        interval: Option<String>,
        /// Emit logs as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Copy a file aside and truncate it in place
    Rotate {
        /// File to rotate
        path: PathBuf,
        /// Extension of the copy (defaults to the file's own)
        #[arg(long)]
        ext: Option<String>,
    },
    /// Validate a configuration file
    Check {
        /// Configuration file
        #[arg(default_value = "loglife.toml")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            interval,
            json,
        } => commands::run::execute(&config, interval.as_deref(), json).await,
        Commands::Rotate { path, ext } => {
            commands::init_stdout_logging();
            commands::rotate::execute(&path, ext.as_deref()).await
        },
        Commands::Check { file } => commands::check::execute(&file),
    }
}

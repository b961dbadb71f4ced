//! offsync CLI
//!
//! Maintenance tools for an offsync queue directory.
//!
//! # Commands
//!
//! - `inspect` - Display queue and conflict statistics
//! - `conflicts` - List conflicts awaiting resolution
//! - `retry` - Return terminal-failed records to the queue
//! - `clear` - Drop every queued record

mod commands;

use clap::{Parser, Subcommand};
use offsync_engine::SyncConfig;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// offsync command-line queue tools.
#[derive(Parser)]
#[command(name = "offsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the queue directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Sync configuration file (JSON)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display queue and conflict statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List conflicts awaiting resolution
    Conflicts {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Return terminal-failed records to the queue
    Retry,

    /// Drop every queued record
    Clear {
        /// Dry run - show what would be removed
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    let config: SyncConfig = serde_json::from_slice(&std::fs::read(path)?)?;
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Queue path required for inspect")?;
            commands::inspect::run(&path, &config, &format)?;
        }
        Commands::Conflicts { format } => {
            let path = cli.path.ok_or("Queue path required for conflicts")?;
            commands::conflicts::run(&path, &format)?;
        }
        Commands::Retry => {
            let path = cli.path.ok_or("Queue path required for retry")?;
            commands::retry::run(&path, &config)?;
        }
        Commands::Clear { dry_run } => {
            let path = cli.path.ok_or("Queue path required for clear")?;
            commands::clear::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("offsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

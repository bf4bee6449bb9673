//! SealStore CLI
//!
//! Command-line tools for SealStore stores.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics
//! - `verify` - Verify log integrity and, with a key, every payload
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SealStore command-line tools.
#[derive(Parser)]
#[command(name = "sealstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Verify store integrity
    Verify {
        /// File holding the raw 32-byte key; enables payload checks
        #[arg(short, long)]
        key_file: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, format)?;
        }
        Commands::Verify { key_file } => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path, key_file.as_deref())?;
        }
        Commands::Version => {
            println!("SealStore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("SealStore Core v{}", sealstore_core::VERSION);
        }
    }

    Ok(())
}

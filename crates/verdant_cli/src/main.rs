//! Verdant CLI
//!
//! Command-line tools for inspecting a verdant store on disk.
//!
//! # Commands
//!
//! - `inspect` - Display record counts, the outbound queue and the sync checkpoint
//! - `pending` - List queued outbound changes
//! - `records` - List the records of one collection
//! - `verify` - Scan the journal for damage without modifying it
//! - `compact` - Rewrite the journal as a single snapshot

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Verdant store tools.
#[derive(Parser)]
#[command(name = "verdant")]
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

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics and the sync checkpoint
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List queued outbound changes
    Pending {
        /// Only show changes for this collection
        #[arg(short, long)]
        collection: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List the records of a collection
    Records {
        /// Collection name
        collection: String,

        /// Include tombstones
        #[arg(short, long)]
        deleted: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify journal integrity
    Verify,

    /// Rewrite the journal as a single snapshot
    Compact,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Pending { collection, format } => {
            let path = cli.path.ok_or("Store path required for pending")?;
            commands::pending::run(&path, collection.as_deref(), &format)?;
        }
        Commands::Records {
            collection,
            deleted,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for records")?;
            commands::records::run(&path, &collection, deleted, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path)?;
        }
        Commands::Version => {
            println!("verdant CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

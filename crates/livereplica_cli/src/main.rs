//! livereplica CLI
//!
//! Command-line tools for livereplica.
//!
//! # Commands
//!
//! - `replay` - Run a recorded snapshot and change feed through a session
//!   and print the resulting replica
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::replay::{OutputFormat, ReplayOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// livereplica command-line tools.
#[derive(Parser)]
#[command(name = "livereplica")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded snapshot and change feed
    Replay {
        /// JSON array of documents served as the snapshot
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Change-stream documents, one JSON object per line
        #[arg(short, long)]
        feed: PathBuf,

        /// Collection name
        #[arg(short, long, default_value = "events")]
        collection: String,

        /// Sort key field
        #[arg(long, default_value = livereplica_sync::DEFAULT_SORT_KEY)]
        sort_key: String,

        /// Document id field
        #[arg(long, default_value = "_id")]
        id_field: String,

        /// Maximum number of snapshot documents
        #[arg(short, long, default_value_t = livereplica_sync::DEFAULT_LIMIT)]
        limit: usize,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so replica output on stdout stays clean
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
        Commands::Replay {
            snapshot,
            feed,
            collection,
            sort_key,
            id_field,
            limit,
            format,
            output,
        } => {
            commands::replay::run(ReplayOptions {
                snapshot,
                feed,
                collection,
                sort_key,
                id_field,
                limit,
                format,
                output,
            })?;
        }
        Commands::Version => {
            println!("livereplica CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("livereplica core v{}", livereplica_core::VERSION);
        }
    }

    Ok(())
}

//! Rowsync CLI
//!
//! Command-line tools for sync session directories.
//!
//! # Commands
//!
//! - `show` - Summarize the change-set of a session directory
//! - `status` - Print a session's merge status
//! - `merge` - Replay a session's change-set against a schema
//! - `clean` - Remove finished session directories

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Rowsync command-line session tools.
#[derive(Parser)]
#[command(name = "rowsync")]
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
    /// Summarize the change-set of a session directory
    Show {
        /// Path to the session directory
        dir: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print a session's merge status
    Status {
        /// Path to the session directory
        dir: PathBuf,
    },

    /// Replay a session's change-set against a schema, writing the
    /// result artifacts back into the directory
    Merge {
        /// Path to the session directory
        dir: PathBuf,

        /// Path to the schema description (JSON)
        #[arg(short, long)]
        schema: PathBuf,

        /// Path to seed data, a JSON object mapping table names to row
        /// arrays; shadow tables may be seeded by their `_sync_info`
        /// names
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Session timestamp to merge under; defaults to the directory
        /// name's timestamp prefix
        #[arg(short, long)]
        timestamp: Option<i64>,
    },

    /// Remove finished session directories under a sessions root
    Clean {
        /// Path to the sessions root directory
        root: PathBuf,

        /// Also remove sessions that never finished
        #[arg(short, long)]
        all: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Show { dir, format } => commands::show::run(&dir, &format)?,
        Commands::Status { dir } => commands::status::run(&dir)?,
        Commands::Merge {
            dir,
            schema,
            data,
            timestamp,
        } => commands::merge::run(&dir, &schema, data.as_deref(), timestamp)?,
        Commands::Clean { root, all } => commands::clean::run(&root, all)?,
        Commands::Version => {
            println!("rowsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

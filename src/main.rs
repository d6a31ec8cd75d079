//! # osdb CLI
//!
//! Command-line front end for the subtitle corpus importer.
//!
//! ```bash
//! osdb --config ./config/osdb.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `osdb init` | Connect (creating the database on first use) and bootstrap the schema |
//! | `osdb import` | Import every `*.xml` / `*.xml.gz` file under the source directory |

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use osdb::{config, ingest, storage};

/// Subtitle corpus importer.
///
/// All commands read a TOML configuration file naming the database and the
/// import source; see `config/osdb.example.toml`.
#[derive(Parser)]
#[command(
    name = "osdb",
    about = "Imports aligned-subtitle XML corpora into a relational store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/osdb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and schema.
    ///
    /// Connects to the configured database, creating it over the
    /// administrative connection when absent, and creates any missing
    /// tables. Safe to run multiple times.
    Init,

    /// Import subtitle files from the configured source directory.
    ///
    /// Runs the schema bootstrap first, so a separate `init` is optional.
    Import {
        /// Show the matched file count without touching the database.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of files to import.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let mut storage = storage::open_storage(&cfg.database)?;
            storage::prepare(storage.as_mut(), &cfg.database, &cfg.import.lang).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { dry_run, limit } => {
            ingest::run_import(&cfg, dry_run, limit).await?;
        }
    }

    Ok(())
}

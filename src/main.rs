//! # Company Loader CLI (`coload`)
//!
//! ## Usage
//!
//! ```bash
//! coload --config ./config/coload.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `coload init` | Create the SQLite database and schema |
//! | `coload import <source>` | Load a company extract (file or directory) |
//! | `coload reindex` | Rebuild the search mirror |
//! | `coload stats` | Show database statistics |
//! | `coload search "<query>"` | Probe the search mirror |
//!
//! ## Examples
//!
//! ```bash
//! # Full load with JSON progress for a log collector
//! coload import ./data/BasicCompanyData.csv --progress json
//!
//! # Resume an interrupted load from a known offset
//! coload import ./data/BasicCompanyData.csv --resume 2400000
//!
//! # Resume from the offset stored with the last committed batch
//! coload import ./data --continue
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use company_loader::config::{self, SyncStrategy};
use company_loader::ingest::{self, ImportOptions, ResumeFrom};
use company_loader::progress::ProgressMode;
use company_loader::{migrate, mirror, stats};

/// Company Loader CLI: bulk import of the company registry extract into
/// a searchable SQLite database.
#[derive(Parser)]
#[command(
    name = "coload",
    about = "Company Loader: bulk import of the company registry extract into SQLite",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/coload.toml`. When the file does not exist the
    /// built-in defaults are used, with the database at
    /// `./database/companies.db`.
    #[arg(long, global = true, default_value = "./config/coload.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the database file, the companies table and its indexes, the
    /// checkpoints table and the search mirror. Safe to run repeatedly.
    Init,

    /// Import a company extract.
    ///
    /// Streams the file in one pass, committing every `--batch-size` rows.
    /// Ctrl-C stops after the current record, commits what is buffered and
    /// prints the offset to resume from.
    Import {
        /// Data file, or a directory whose first matching file is used.
        source: PathBuf,

        /// Skip this many records before importing.
        #[arg(long, default_value_t = 0, conflicts_with = "continue_run")]
        resume: u64,

        /// Resume from the offset stored with the last committed batch.
        #[arg(long = "continue")]
        continue_run: bool,

        /// Rows per transaction (overrides `import.batch_size`).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Search mirror strategy: `rebuild` or `incremental`.
        #[arg(long)]
        strategy: Option<SyncStrategy>,

        /// Expected number of records, used for the ETA.
        #[arg(long)]
        expected_total: Option<u64>,

        /// Progress output: `off`, `human` or `json` (stderr).
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Rebuild the search mirror from the companies table.
    Reindex,

    /// Show database statistics.
    Stats,

    /// Probe the search mirror.
    Search {
        /// Search terms; each is prefix-matched.
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import {
            source,
            resume,
            continue_run,
            batch_size,
            strategy,
            expected_total,
            progress,
        } => {
            let opts = ImportOptions {
                source,
                resume: if continue_run {
                    ResumeFrom::Checkpoint
                } else {
                    ResumeFrom::Offset(resume)
                },
                batch_size,
                strategy,
                expected_total,
                progress: progress.unwrap_or_else(ProgressMode::default_for_tty),
            };
            let outcome = ingest::run_import(&cfg, &opts).await?;
            ingest::print_summary(&outcome);
        }
        Commands::Reindex => {
            mirror::run_reindex(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Search { query, limit } => {
            mirror::run_search(&cfg, &query, limit).await?;
        }
    }

    Ok(())
}

//! # clausemap CLI
//!
//! Maps compliance documents in a folder tree to the clauses of a standard
//! and tracks their revisions across scans.
//!
//! ## Usage
//!
//! ```bash
//! clausemap --config ./config/clausemap.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `clausemap init` | Create the SQLite database and schema |
//! | `clausemap catalog load <file>` | Load a clause catalog from TOML |
//! | `clausemap catalog sample <name>` | Load a bundled catalog (`iso45001`, `isnetworld`) |
//! | `clausemap catalog show <standard>` | Print a standard's clause tree |
//! | `clausemap standards` | List loaded standards |
//! | `clausemap scan <folder> --standard <s>` | Scan a folder and record matches |
//! | `clausemap match <file> --standard <s>` | Score one file, nothing recorded |
//! | `clausemap rescan` | Rescan every monitored folder |
//! | `clausemap score <standard>` | Weighted compliance score |
//! | `clausemap unmatched` | Active documents with low match confidence |
//! | `clausemap revisions <id>` | Revision history of a document |
//! | `clausemap reassign <id> <clause>` | Move a document to another clause |
//! | `clausemap supersede <id>` | Mark a document superseded |
//! | `clausemap history` | Recent scans |
//! | `clausemap folders` | Monitored folders |
//! | `clausemap stats` | Database overview |
//!
//! Logging goes to stderr and is filtered by `CLAUSEMAP_LOG`
//! (e.g. `CLAUSEMAP_LOG=clausemap=debug`). Default is `info`.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use clausemap::progress::ProgressMode;
use clausemap::{catalog, compliance, config, documents, migrate, scan_cmd, stats};

const DEFAULT_CONFIG: &str = "./config/clausemap.toml";

/// clausemap: match compliance documents to standard clauses.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without it, `./config/clausemap.toml` is used when present and
/// built-in defaults otherwise.
#[derive(Parser)]
#[command(
    name = "clausemap",
    about = "Match compliance documents to standard clauses and track their revisions",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Scan progress on stderr: auto, human, json, or off.
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables. Safe to run
    /// repeatedly.
    Init,

    /// Load and inspect clause catalogs.
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// List loaded standards.
    Standards,

    /// Scan a folder and reconcile matches into the document store.
    Scan {
        /// Folder to scan (walked recursively).
        folder: PathBuf,

        /// Standard id or exact name.
        #[arg(long)]
        standard: String,

        /// Show matches without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Score a single file against a standard and show every sub-score.
    Match {
        file: PathBuf,

        /// Standard id or exact name.
        #[arg(long)]
        standard: String,

        #[arg(long)]
        json: bool,
    },

    /// Rescan every active monitored folder, one at a time.
    Rescan,

    /// Print the weighted compliance score of a standard.
    Score {
        /// Standard id or exact name.
        standard: String,

        #[arg(long)]
        json: bool,
    },

    /// List active documents with low match confidence.
    Unmatched {
        /// Confidence bound (exclusive).
        #[arg(long, default_value_t = 0.5)]
        below: f64,

        #[arg(long, default_value_t = 100)]
        limit: i64,
    },

    /// Show a document's revision history, newest first.
    Revisions { document_id: i64 },

    /// Move a document to another clause.
    Reassign {
        document_id: i64,
        clause_id: i64,

        /// Why the automatic match was wrong.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Mark a document superseded. Documents are never deleted.
    Supersede { document_id: i64 },

    /// Show recent scans.
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// List monitored folders.
    Folders,

    /// Show database statistics.
    Stats,
}

#[derive(Subcommand)]
enum CatalogAction {
    /// Load a catalog TOML file.
    Load { path: PathBuf },
    /// Load a bundled catalog: iso45001 or isnetworld.
    Sample { name: String },
    /// Print the clause tree of a standard.
    Show { standard: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CLAUSEMAP_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&PathBuf>) -> Result<config::Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if default.exists() {
                config::load_config(&default)
            } else {
                Ok(config::Config::minimal())
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let Some(progress) = ProgressMode::parse(&cli.progress) else {
        bail!(
            "Unknown progress mode '{}'. Use auto, human, json, or off.",
            cli.progress
        );
    };
    let cfg = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Catalog { action } => match action {
            CatalogAction::Load { path } => catalog::run_catalog_load(&cfg, &path).await?,
            CatalogAction::Sample { name } => catalog::run_catalog_sample(&cfg, &name).await?,
            CatalogAction::Show { standard } => catalog::run_catalog_show(&cfg, &standard).await?,
        },
        Commands::Standards => catalog::run_standards(&cfg).await?,
        Commands::Scan {
            folder,
            standard,
            dry_run,
            json,
        } => {
            scan_cmd::run_scan(&cfg, &folder, &standard, dry_run, json, progress).await?;
        }
        Commands::Match {
            file,
            standard,
            json,
        } => {
            scan_cmd::run_match(&cfg, &file, &standard, json).await?;
        }
        Commands::Rescan => scan_cmd::run_rescan(&cfg, progress).await?,
        Commands::Score { standard, json } => {
            compliance::run_score(&cfg, &standard, json).await?;
        }
        Commands::Unmatched { below, limit } => {
            documents::run_unmatched(&cfg, below, limit).await?;
        }
        Commands::Revisions { document_id } => {
            documents::run_revisions(&cfg, document_id).await?;
        }
        Commands::Reassign {
            document_id,
            clause_id,
            reason,
        } => {
            documents::run_reassign(&cfg, document_id, clause_id, reason.as_deref()).await?;
        }
        Commands::Supersede { document_id } => {
            documents::run_supersede(&cfg, document_id).await?;
        }
        Commands::History { limit } => stats::run_history(&cfg, limit).await?,
        Commands::Folders => stats::run_folders(&cfg).await?,
        Commands::Stats => stats::run_stats(&cfg).await?,
    }

    Ok(())
}

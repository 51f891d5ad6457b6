//! # Claim Harness CLI (`clm`)
//!
//! The `clm` binary drives claim extraction over a local SQLite store.
//!
//! ## Usage
//!
//! ```bash
//! clm --config ./config/clm.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `clm init` | Create the SQLite database and run schema migrations |
//! | `clm doc add <entry-id>` | Add or update the document for an entry |
//! | `clm redact` | Score text for sensitive content and print the model-safe form |
//! | `clm extract` | Run one claim extraction and print its result payload |
//! | `clm facts` | Extract rule-based key facts from a document, notes, or tasks |
//! | `clm claims` | List the active claims of an entry |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! clm init --config ./config/clm.toml
//!
//! # Add a journal entry
//! clm doc add 2026-03-01 --type journal --file ./journal/2026-03-01.md
//!
//! # Extract with the external model, replacing earlier claims
//! clm extract --entry-id 2026-03-01 --replace-existing
//!
//! # Offline extraction, without writing anything
//! clm extract --entry-id 2026-03-01 --extractor rules --dry-run
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use claim_harness::commands::{self, FactInput};
use claim_harness::config;
use claim_harness::extract::{ExtractRequest, Extractor};
use claim_harness::migrate;

/// Claim Harness CLI: a local-first claim extraction and normalization
/// engine for personal notes.
///
/// All commands except `redact` read a TOML configuration file given by
/// `--config`. See `config/clm.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "clm",
    about = "Claim Harness: me-centric claim extraction for personal notes",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/clm.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Manage source documents.
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },

    /// Score text for sensitive content.
    ///
    /// Prints the risk level, redaction state, and the text that would be
    /// sent to the model. Needs no configuration or database.
    Redact {
        /// Text to score.
        #[arg(long)]
        text: Option<String>,

        /// Read the text from a file instead.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Run one claim extraction attempt.
    ///
    /// Always prints a JSON result payload. Failures are reported as
    /// `queued` with a retry time; high-risk text is reported as `blocked`.
    Extract {
        /// Entry whose document to extract.
        #[arg(long)]
        entry_id: Option<String>,

        /// Document id; takes precedence over `--entry-id`.
        #[arg(long)]
        document_id: Option<String>,

        #[arg(long, value_enum, default_value = "llm")]
        extractor: Extractor,

        /// Supersede the entry's active claims.
        #[arg(long)]
        replace_existing: bool,

        /// Compute counts without writing.
        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        extraction_id: Option<String>,

        #[arg(long)]
        job_id: Option<String>,

        #[arg(long)]
        job_item_id: Option<String>,

        #[arg(long, default_value_t = 1)]
        attempt_count: u32,
    },

    /// Extract rule-based key facts.
    ///
    /// Reads one stored document, or JSON arrays of note or task records.
    Facts {
        #[arg(long, conflicts_with_all = ["notes", "tasks"])]
        entry_id: Option<String>,

        /// JSON file holding an array of note records.
        #[arg(long, conflicts_with = "tasks")]
        notes: Option<PathBuf>,

        /// JSON file holding an array of task records.
        #[arg(long)]
        tasks: Option<PathBuf>,

        /// Soft-delete each source's active facts first.
        #[arg(long)]
        replace_existing: bool,
    },

    /// List the active claims of an entry, one JSON object per line.
    Claims {
        #[arg(long)]
        entry_id: String,
    },
}

#[derive(Subcommand)]
enum DocAction {
    /// Add or update the document for an entry.
    ///
    /// Unchanged text leaves the stored document untouched.
    Add {
        entry_id: String,

        /// Declared document type (journal, memo, ...).
        #[arg(long = "type", default_value = "memo")]
        declared_type: String,

        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        file: Option<PathBuf>,

        /// RFC 3339 occurrence time.
        #[arg(long)]
        occurred_at: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Redact { text, file } = &cli.command {
        let text = commands::read_text(text.clone(), file.as_deref())?;
        return commands::run_redact(&text);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Doc { action } => match action {
            DocAction::Add {
                entry_id,
                declared_type,
                text,
                file,
                occurred_at,
            } => {
                let text = commands::read_text(text, file.as_deref())?;
                commands::run_doc_add(&cfg, &entry_id, &declared_type, &text, occurred_at.as_deref())
                    .await?;
            }
        },
        Commands::Redact { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
        Commands::Extract {
            entry_id,
            document_id,
            extractor,
            replace_existing,
            dry_run,
            extraction_id,
            job_id,
            job_item_id,
            attempt_count,
        } => {
            let req = ExtractRequest {
                entry_id,
                document_id,
                extraction_id,
                job_id,
                job_item_id,
                attempt_count,
                replace_existing,
                dry_run,
                extractor,
            };
            commands::run_extract(&cfg, &req).await?;
        }
        Commands::Facts {
            entry_id,
            notes,
            tasks,
            replace_existing,
        } => {
            let input = match (entry_id, notes, tasks) {
                (Some(entry_id), _, _) => FactInput::Entry(entry_id),
                (None, Some(path), _) => FactInput::Notes(path),
                (None, None, Some(path)) => FactInput::Tasks(path),
                (None, None, None) => {
                    anyhow::bail!("One of --entry-id, --notes, or --tasks is required")
                }
            };
            commands::run_facts(&cfg, input, replace_existing).await?;
        }
        Commands::Claims { entry_id } => {
            commands::run_claims(&cfg, &entry_id).await?;
        }
    }

    Ok(())
}

//! # Chunk Locator CLI (`chunkloc`)
//!
//! ## Usage
//!
//! ```bash
//! chunkloc --config ./config/chunkloc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chunkloc init` | Create the SQLite database and run schema migrations |
//! | `chunkloc locate` | Position a document's candidate chunks and store them |
//! | `chunkloc show <document_id>` | Print stored chunks with tiers and warnings |
//! | `chunkloc validate <chunk_id>` | Mark a chunk's position as reviewed |
//! | `chunkloc correct <chunk_id>` | Move a chunk to a new span |
//! | `chunkloc forget <document_id>` | Delete a document, its cache row, and its chunks |
//! | `chunkloc serve` | Start the HTTP review API |
//!
//! ## Examples
//!
//! ```bash
//! chunkloc init
//! chunkloc locate --document-id book-1 --reference book-1.ref.json --candidates book-1.chunks.json
//! chunkloc show book-1
//! chunkloc correct 6f1c... --start 120 --end 388 --reason "include the heading"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use chunk_locator::{config, locate_cmd, migrate, review, server};

/// Chunk Locator: recovers reference-text positions for rewritten chunks.
#[derive(Parser)]
#[command(name = "chunkloc", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chunkloc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Locate candidate chunks in a reference text and store the results.
    ///
    /// Re-running for the same document replaces its chunks. The structural
    /// extraction is replayed from cache when the reference text is unchanged.
    Locate {
        /// Document identifier.
        #[arg(long)]
        document_id: String,

        /// Reference JSON: `{ "text", "mode", "structural_chunks" }`.
        #[arg(long)]
        reference: PathBuf,

        /// Candidate JSON: list of `{ "index", "content" }` or strings.
        #[arg(long)]
        candidates: PathBuf,

        /// Document title.
        #[arg(long)]
        title: Option<String>,
    },

    /// Print a document's stored chunks.
    Show {
        document_id: String,
    },

    /// Mark a chunk's position as reviewed and accepted.
    Validate {
        chunk_id: String,
    },

    /// Move a chunk to a new byte span.
    ///
    /// Rejected when the span is empty, out of bounds, or overlaps the
    /// chunk's neighbors.
    Correct {
        chunk_id: String,

        #[arg(long)]
        start: usize,

        #[arg(long)]
        end: usize,

        #[arg(long)]
        reason: String,
    },

    /// Delete a document together with its cached extraction and chunks.
    Forget {
        document_id: String,
    },

    /// Start the HTTP review API on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Locate {
            document_id,
            reference,
            candidates,
            title,
        } => {
            locate_cmd::run_locate(&cfg, &document_id, &reference, &candidates, title).await?;
        }
        Commands::Show { document_id } => {
            review::run_show(&cfg, &document_id).await?;
        }
        Commands::Validate { chunk_id } => {
            review::run_validate(&cfg, &chunk_id).await?;
        }
        Commands::Correct {
            chunk_id,
            start,
            end,
            reason,
        } => {
            review::run_correct(&cfg, &chunk_id, start, end, &reason).await?;
        }
        Commands::Forget { document_id } => {
            review::run_forget(&cfg, &document_id).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

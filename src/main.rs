//! # Docsense CLI (`dsn`)
//!
//! The `dsn` binary drives the document intelligence pipeline: database
//! initialization, document ingestion, grounded question answering, and
//! chat/document bookkeeping.
//!
//! ## Usage
//!
//! ```bash
//! dsn --config ./config/docsense.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dsn init` | Create the SQLite database and run schema migrations |
//! | `dsn ingest <file>` | Extract, analyze, chunk, embed, and store a document |
//! | `dsn query "<question>"` | Answer a question over your documents |
//! | `dsn documents` | List your ingested documents |
//! | `dsn sessions` | List recent chat sessions |
//! | `dsn history` | Show recent chat messages |
//! | `dsn stats` | Per-user counters and document breakdown |
//! | `dsn delete <id>` | Delete a document and its index entries |
//! | `dsn serve` | Start the HTTP API server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docsense::compose::Persona;
use docsense::embedding::create_embedder;
use docsense::generation::create_generator;
use docsense::index::SqliteIndex;
use docsense::store::{MetadataStore, SqliteStore};
use docsense::{config, db, migrate, pipeline, server, stats};

/// Docsense — retrieval-augmented document intelligence with
/// spreadsheet analytics.
#[derive(Parser)]
#[command(
    name = "dsn",
    about = "Docsense — retrieval-augmented document intelligence with spreadsheet analytics",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsense.toml")]
    config: PathBuf,

    /// User email owning the documents and sessions.
    #[arg(long, global = true, default_value = "demo@example.com")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest a document: extract, analyze, chunk, embed, store.
    Ingest {
        /// Path to the file to ingest.
        file: PathBuf,

        /// Declared content type; inferred from the extension when omitted.
        #[arg(long, default_value = "")]
        content_type: String,
    },

    /// Ask a question over your ingested documents.
    Query {
        /// The question to answer.
        question: String,

        /// Response persona: plain, analytical, creative, or executive.
        #[arg(long, default_value = "plain")]
        persona: String,

        /// Continue an existing chat session.
        #[arg(long)]
        session: Option<i64>,
    },

    /// List your ingested documents.
    Documents,

    /// List recent chat sessions.
    Sessions {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },

    /// Show recent chat messages, newest first.
    History {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Per-user counters and document breakdown.
    Stats,

    /// Delete a document and its index entries.
    Delete {
        /// Document id (see `dsn documents`).
        id: i64,
    },

    /// Start the HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("database initialized at {}", config.db.path.display());
        }

        Commands::Ingest { file, content_type } => {
            let content = std::fs::read(&file)?;
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();

            let pool = db::connect(&config).await?;
            let store = SqliteStore::new(pool.clone());
            let index = SqliteIndex::new(pool.clone());
            let embedder = create_embedder(&config.embedding)?;

            let report = pipeline::ingest(
                &store,
                &index,
                embedder.as_ref(),
                &config,
                &cli.user,
                &filename,
                &content_type,
                &content,
            )
            .await?;

            println!("ingested '{}'", filename);
            println!("  document id: {}", report.document_id);
            println!("  file type:   {}", report.file_type);
            println!("  chunks:      {}", report.chunk_count);
            if let Some(tier) = &report.analysis {
                println!("  analysis:    {}", tier);
            }
            pool.close().await;
        }

        Commands::Query {
            question,
            persona,
            session,
        } => {
            let persona: Persona = persona.parse()?;

            let pool = db::connect(&config).await?;
            let store = SqliteStore::new(pool.clone());
            let index = SqliteIndex::new(pool.clone());
            let embedder = create_embedder(&config.embedding)?;
            let generator = create_generator(&config.generation)?;

            let outcome = pipeline::answer(
                &store,
                &index,
                embedder.as_ref(),
                generator.as_ref(),
                &config,
                &cli.user,
                &question,
                persona,
                session,
            )
            .await?;

            println!("{}", outcome.answer);
            println!();
            if !outcome.sources.is_empty() {
                println!("sources:");
                for source in &outcome.sources {
                    println!(
                        "  [{:.2}] {} (chunk {})",
                        source.similarity, source.source, source.chunk_index
                    );
                }
            }
            println!("confidence: {:.2}", outcome.confidence);
            println!("session: {}", outcome.session_id);
            pool.close().await;
        }

        Commands::Documents => {
            let pool = db::connect(&config).await?;
            let store = SqliteStore::new(pool.clone());
            let user_id = store.get_or_create_user(&cli.user, None).await?;
            let documents = store.list_documents(user_id).await?;

            if documents.is_empty() {
                println!("No documents.");
            } else {
                for doc in &documents {
                    println!(
                        "{}. {} [{}] {} chunks, uploaded {}",
                        doc.id, doc.filename, doc.file_type, doc.chunk_count, doc.uploaded_at
                    );
                }
            }
            pool.close().await;
        }

        Commands::Sessions { limit } => {
            let pool = db::connect(&config).await?;
            let store = SqliteStore::new(pool.clone());
            let user_id = store.get_or_create_user(&cli.user, None).await?;
            let sessions = store.recent_sessions(user_id, limit).await?;

            if sessions.is_empty() {
                println!("No sessions.");
            } else {
                for session in &sessions {
                    println!(
                        "{}. {} ({} messages, last {})",
                        session.id, session.name, session.message_count, session.last_message_at
                    );
                }
            }
            pool.close().await;
        }

        Commands::History { limit } => {
            let pool = db::connect(&config).await?;
            let store = SqliteStore::new(pool.clone());
            let user_id = store.get_or_create_user(&cli.user, None).await?;
            let messages = store.chat_history(user_id, limit).await?;

            if messages.is_empty() {
                println!("No messages.");
            } else {
                for message in &messages {
                    let confidence = message
                        .confidence
                        .map(|c| format!(" [{:.2}]", c))
                        .unwrap_or_default();
                    println!(
                        "[{}] {}{}: {}",
                        message.created_at, message.role, confidence, message.content
                    );
                }
            }
            pool.close().await;
        }

        Commands::Stats => {
            stats::run_stats(&config, &cli.user).await?;
        }

        Commands::Delete { id } => {
            let pool = db::connect(&config).await?;
            let store = SqliteStore::new(pool.clone());
            let index = SqliteIndex::new(pool.clone());
            let removed = pipeline::delete_document(&store, &index, id).await?;
            println!("deleted document {} ({} index entries)", id, removed);
            pool.close().await;
        }

        Commands::Serve => {
            server::run_server(&config).await?;
        }
    }

    Ok(())
}

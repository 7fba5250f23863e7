//! # Mailstash CLI (`mstash`)
//!
//! The `mstash` binary is the primary interface for Mailstash. It provides
//! commands for database initialization, mailbox ingestion, semantic
//! search, grounded question answering, embedding backfill, and job
//! inspection.
//!
//! ```bash
//! mstash --config ./config/mailstash.toml <command>
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use mailstash::config::{load_config, Config};
use mailstash::embedding::{EmbedClient, OpenAiEmbedding};
use mailstash::ingest::{run_embed_pending, run_ingest, IngestDeps};
use mailstash::models::DocumentKind;
use mailstash::providers::{GenerationProvider, OpenAiGeneration, PlainTextExtractor};
use mailstash::retrieval::{retrieve, RetrievedDoc};
use mailstash::{answer, blob_fs, db, migrate, source_json};

/// Mailstash — a local-first email indexing and semantic retrieval engine.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mailstash.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "mstash",
    about = "Mailstash — a local-first email indexing and semantic retrieval engine",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mailstash.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest messages and attachments from the configured mailbox source.
    Ingest {
        /// Source identifier recorded on the ingestion job.
        source_id: String,
        /// Maximum messages to fetch this run.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Semantic search over indexed emails and attachments.
    Search {
        query: String,
        /// Restrict results to one document kind.
        #[arg(long, value_parser = ["email", "attachment"])]
        kind: Option<String>,
    },

    /// Ask a question and get an answer grounded in your mailbox.
    Ask { question: String },

    /// Embedding maintenance.
    Embed {
        #[command(subcommand)]
        command: EmbedCommands,
    },

    /// List recent ingestion jobs.
    Jobs,
}

#[derive(Subcommand)]
enum EmbedCommands {
    /// Backfill embeddings for documents that have text but no vectors.
    Pending {
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Ingest { source_id, limit } => run_ingest_cmd(&config, &source_id, limit).await,
        Commands::Search { query, kind } => run_search_cmd(&config, &query, kind.as_deref()).await,
        Commands::Ask { question } => run_ask_cmd(&config, &question).await,
        Commands::Embed { command } => match command {
            EmbedCommands::Pending { limit } => run_embed_pending_cmd(&config, limit).await,
        },
        Commands::Jobs => run_jobs_cmd(&config).await,
    }
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("initialized {}", config.db.path.display());
    Ok(())
}

fn build_embed_client(config: &Config) -> Result<Option<EmbedClient>> {
    match config.embedding.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => {
            let provider = Arc::new(OpenAiEmbedding::new(&config.embedding)?);
            Ok(Some(EmbedClient::new(provider, &config.embedding)))
        }
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

fn build_generator(config: &Config) -> Result<Option<Box<dyn GenerationProvider>>> {
    match config.generation.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Box::new(OpenAiGeneration::new(&config.generation)?))),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

async fn run_ingest_cmd(config: &Config, source_id: &str, limit: Option<usize>) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    let deps = IngestDeps {
        source: Arc::new(source_json::JsonMailSource::new(config.source.root.clone())),
        extractor: Arc::new(PlainTextExtractor),
        blobs: Arc::new(blob_fs::FsBlobStore::new(config.blob.root.clone())),
        embedder: build_embed_client(config)?,
    };

    let limit = limit.unwrap_or(config.ingestion.fetch_limit);
    let outcome = run_ingest(&pool, config, &deps, source_id, limit).await?;

    println!("ingest {}", source_id);
    println!("  job: {}", outcome.job.id);
    println!("  status: {}", outcome.job.status.as_str());
    println!("  processed: {}", outcome.job.processed_count);
    if let Some(message) = &outcome.job.error_message {
        println!("  error: {}", message);
    }

    // The job is already terminal; wait for the background embedding pass
    // so the CLI exits with the index up to date.
    if let Some(handle) = outcome.embedding {
        match handle.await {
            Ok(stats) => println!(
                "  embeddings: {} indexed, {} skipped, {} failed",
                stats.indexed, stats.skipped, stats.failed
            ),
            Err(e) => eprintln!("Warning: embedding task failed: {}", e),
        }
    }

    pool.close().await;
    Ok(())
}

async fn run_search_cmd(config: &Config, query: &str, kind: Option<&str>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let embedder = build_embed_client(config)?;
    let result = retrieve(&pool, &config.retrieval, embedder.as_ref(), query).await?;

    let kind_filter = kind.and_then(DocumentKind::parse);
    let show_emails = kind_filter != Some(DocumentKind::Attachment);
    let show_attachments = kind_filter != Some(DocumentKind::Email);

    let mut shown = 0;
    if show_emails {
        shown += print_results("email", &result.emails);
    }
    if show_attachments {
        shown += print_results("attachment", &result.attachments);
    }
    if shown == 0 {
        println!("No results.");
    }

    pool.close().await;
    Ok(())
}

fn print_results(label: &str, results: &[RetrievedDoc]) -> usize {
    for (i, result) in results.iter().enumerate() {
        let date = chrono::DateTime::from_timestamp(result.doc.timestamp, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.similarity,
            label,
            result.doc.title
        );
        println!("    date: {}", date);
        if let Some(sender) = &result.doc.sender {
            println!("    from: {}", sender);
        }
        if let Some(snippet) = result.chunks.first() {
            println!("    excerpt: \"{}\"", snippet.replace('\n', " "));
        }
        println!("    id: {}", result.doc.id);
        println!();
    }
    results.len()
}

async fn run_ask_cmd(config: &Config, question: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let embedder = build_embed_client(config)?;
    let result = retrieve(&pool, &config.retrieval, embedder.as_ref(), question).await?;

    let response = match build_generator(config)? {
        Some(generator) => answer::compose_answer(generator.as_ref(), question, &result).await,
        None => answer::fallback_answer(&result),
    };

    println!("{}", response);
    pool.close().await;
    Ok(())
}

async fn run_embed_pending_cmd(config: &Config, limit: Option<usize>) -> Result<()> {
    let Some(client) = build_embed_client(config)? else {
        anyhow::bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    };

    let pool = db::connect(config).await?;
    let stats = run_embed_pending(&pool, config, &client, limit).await?;

    println!("embed pending");
    println!("  indexed: {}", stats.indexed);
    println!("  skipped: {}", stats.skipped);
    println!("  failed: {}", stats.failed);

    pool.close().await;
    Ok(())
}

async fn run_jobs_cmd(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let jobs = mailstash::ingest::list_jobs(&pool, 20).await?;

    if jobs.is_empty() {
        println!("No ingestion jobs.");
    }
    for job in jobs {
        let started = chrono::DateTime::from_timestamp(job.started_at, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "{}  {}  {}  processed={}{}",
            job.id,
            started,
            job.status.as_str(),
            job.processed_count,
            job.error_message
                .map(|m| format!("  error={m}"))
                .unwrap_or_default()
        );
    }

    pool.close().await;
    Ok(())
}

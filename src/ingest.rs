//! Ingestion pipeline orchestration.
//!
//! Drives one ingestion run: job bookkeeping → source fetch → bounded
//! fan-out over messages and their attachments → document upserts →
//! background embedding dispatch.
//!
//! Concurrency bulkheads: messages per job (default 10) and attachment
//! downloads per message (default 5), each a tokio semaphore. Item-level
//! failures are logged and skipped; only the initial source fetch can fail
//! the job as a whole. The job row always receives exactly one terminal
//! update.
//!
//! Embedding generation is dispatched after the job reaches its terminal
//! state, as a spawned task whose handle is returned to the caller — the
//! job never waits on it, but its aggregate outcome is logged and tests
//! can await it.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::{chunk_text, chunk_with_hard_cap};
use crate::config::{ChunkingConfig, Config};
use crate::embedding::{EmbedClient, EmbedError};
use crate::index;
use crate::models::{
    Document, DocumentKind, EmbeddedChunk, IngestionJob, JobStatus, RawAttachment, RawMessage,
};
use crate::providers::{BlobStore, MailSource, TextExtractor};

/// Constructed, explicitly-passed collaborators for one ingestion run.
#[derive(Clone)]
pub struct IngestDeps {
    pub source: Arc<dyn MailSource>,
    pub extractor: Arc<dyn TextExtractor>,
    pub blobs: Arc<dyn BlobStore>,
    pub embedder: Option<EmbedClient>,
}

/// Aggregate outcome of a background embedding pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbedStats {
    pub indexed: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Result of one ingestion run. The job row already carries its terminal
/// status; `embedding` is the still-running background indexing task, if
/// one was dispatched.
pub struct IngestOutcome {
    pub job: IngestionJob,
    pub embedding: Option<tokio::task::JoinHandle<EmbedStats>>,
}

pub async fn run_ingest(
    pool: &SqlitePool,
    config: &Config,
    deps: &IngestDeps,
    source_id: &str,
    limit: usize,
) -> Result<IngestOutcome> {
    let job_id = Uuid::new_v4().to_string();
    // The job row exists before any network I/O so partial failures are
    // observable.
    create_job(pool, &job_id, source_id).await?;

    let messages = match deps.source.fetch_messages(source_id, limit).await {
        Ok(messages) => messages,
        Err(e) => {
            warn!(source_id, error = %e, "source fetch failed, aborting job");
            let job = finish_job(pool, &job_id, JobStatus::Error, 0, Some(&e.to_string())).await?;
            return Ok(IngestOutcome {
                job,
                embedding: None,
            });
        }
    };

    info!(source_id, count = messages.len(), "fetched messages");

    let gate = Arc::new(Semaphore::new(config.ingestion.message_concurrency));
    let mut tasks: JoinSet<(bool, Vec<String>)> = JoinSet::new();

    for message in messages {
        let gate = gate.clone();
        let pool = pool.clone();
        let deps = deps.clone();
        let ingestion = config.ingestion.clone();
        tasks.spawn(async move {
            let _permit = match gate.acquire().await {
                Ok(permit) => permit,
                Err(_) => return (false, Vec::new()),
            };
            let message_id = message.id.clone();
            match process_message(&pool, &deps, &ingestion, message).await {
                Ok(pending) => (true, pending),
                Err(e) => {
                    warn!(%message_id, error = %e, "message skipped");
                    (false, Vec::new())
                }
            }
        });
    }

    let mut processed: i64 = 0;
    let mut pending_docs: Vec<String> = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((ok, pending)) => {
                if ok {
                    processed += 1;
                }
                pending_docs.extend(pending);
            }
            Err(e) => warn!(error = %e, "message task panicked"),
        }
    }

    let job = finish_job(pool, &job_id, JobStatus::Completed, processed, None).await?;
    info!(job_id = %job.id, processed, "ingestion job completed");

    let embedding = match (&deps.embedder, pending_docs.is_empty()) {
        (Some(client), false) => Some(spawn_embedding_pass(
            pool.clone(),
            config.chunking.clone(),
            client.clone(),
            pending_docs,
        )),
        _ => None,
    };

    Ok(IngestOutcome { job, embedding })
}

/// Normalize, store, and fan out over one message. Returns the ids of
/// stored documents that have text to embed.
async fn process_message(
    pool: &SqlitePool,
    deps: &IngestDeps,
    ingestion: &crate::config::IngestionConfig,
    message: RawMessage,
) -> Result<Vec<String>> {
    let now = chrono::Utc::now().timestamp();
    let (doc, to, cc) = normalize_message(&message, now);

    index::upsert_document(pool, &doc).await?;
    index::replace_recipients(pool, &doc.id, &to, &cc).await?;

    let mut pending = Vec::new();
    if doc.body.as_deref().is_some_and(|b| !b.trim().is_empty()) {
        pending.push(doc.id.clone());
    }

    // Attachment bulkhead, smaller than the message one.
    let gate = Arc::new(Semaphore::new(ingestion.attachment_concurrency));
    let mut tasks: JoinSet<Option<String>> = JoinSet::new();

    for attachment in message.attachments {
        let gate = gate.clone();
        let pool = pool.clone();
        let deps = deps.clone();
        let message_id = message.id.clone();
        let timestamp = doc.timestamp;
        let blob_attempts = ingestion.blob_attempts;
        tasks.spawn(async move {
            let _permit = gate.acquire().await.ok()?;
            let attachment_id = attachment.id.clone();
            match process_attachment(
                &pool,
                &deps,
                &message_id,
                timestamp,
                blob_attempts,
                attachment,
            )
            .await
            {
                Ok(pending_id) => pending_id,
                Err(e) => {
                    warn!(%message_id, %attachment_id, error = %e, "attachment skipped");
                    None
                }
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(doc_id)) => pending.push(doc_id),
            Ok(None) => {}
            Err(e) => warn!(message_id = %message.id, error = %e, "attachment task panicked"),
        }
    }

    Ok(pending)
}

/// Download, persist, and index one attachment. Returns the attachment's
/// document id when it has extractable text.
async fn process_attachment(
    pool: &SqlitePool,
    deps: &IngestDeps,
    message_id: &str,
    timestamp: i64,
    blob_attempts: u32,
    attachment: RawAttachment,
) -> Result<Option<String>> {
    let bytes = deps
        .source
        .fetch_attachment_bytes(message_id, &attachment.id)
        .await
        .with_context(|| format!("download failed for attachment {}", attachment.id))?;

    let display_name = attachment
        .filename
        .clone()
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| "attachment.bin".to_string());
    let safe_name = sanitize_filename(&display_name);
    let blob_path = format!("{message_id}/{}_{safe_name}", attachment.id);

    // Blob persistence is best-effort: a failed upload is logged but does
    // not block indexing the attachment's text.
    if let Err(e) = upload_with_retry(
        deps.blobs.as_ref(),
        &blob_path,
        &bytes,
        &attachment.content_type,
        blob_attempts,
    )
    .await
    {
        warn!(attachment_id = %attachment.id, error = %e, "blob upload failed");
    }

    let extraction = deps.extractor.extract(&bytes, &attachment.content_type);
    if !extraction.success {
        if let Some(reason) = &extraction.error {
            info!(attachment_id = %attachment.id, %reason, "no text extracted");
        }
    }
    let body = extraction
        .success
        .then(|| extraction.text.trim().to_string())
        .filter(|t| !t.is_empty());
    let has_text = body.is_some();

    // Providers sometimes omit the declared size; fall back to the bytes
    // actually downloaded.
    let size = if attachment.size > 0 {
        attachment.size
    } else {
        bytes.len() as i64
    };

    let now = chrono::Utc::now().timestamp();
    let doc = Document {
        id: attachment.id.clone(),
        kind: DocumentKind::Attachment,
        parent_id: Some(message_id.to_string()),
        title: display_name,
        sender: None,
        content_type: attachment.content_type.clone(),
        body,
        size,
        timestamp,
        created_at: now,
        updated_at: now,
    };
    index::upsert_document(pool, &doc).await?;

    Ok(has_text.then(|| attachment.id))
}

/// Retry transient blob-store failures with a short exponential backoff
/// (1s, 2s, 4s by default).
async fn upload_with_retry(
    blobs: &dyn BlobStore,
    path: &str,
    bytes: &[u8],
    content_type: &str,
    attempts: u32,
) -> Result<()> {
    let attempts = attempts.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(6))).await;
        }
        match blobs.upload(path, bytes, content_type).await {
            Ok(()) => return Ok(()),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("blob upload failed")))
}

/// Normalize a raw message into a document row plus recipient lists.
/// Missing fields get explicit defaults — nulls never reach storage.
pub fn normalize_message(message: &RawMessage, now: i64) -> (Document, Vec<String>, Vec<String>) {
    let title = message
        .subject
        .clone()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "(no subject)".to_string());
    let sender = message
        .from
        .clone()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    let body = message
        .body
        .clone()
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty());

    let size = body.as_deref().map(|b| b.len() as i64).unwrap_or(0);
    let doc = Document {
        id: message.id.clone(),
        kind: DocumentKind::Email,
        parent_id: None,
        title,
        sender: Some(sender),
        content_type: "message/rfc822".to_string(),
        body,
        size,
        timestamp: parse_timestamp(message.date.as_deref(), now),
        created_at: now,
        updated_at: now,
    };

    (doc, message.to.clone(), message.cc.clone())
}

/// Parse a provider date string, trying RFC 3339 then RFC 2822; malformed
/// or missing dates fall back to `now`.
pub fn parse_timestamp(date: Option<&str>, now: i64) -> i64 {
    let Some(date) = date else { return now };
    let date = date.trim();

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(date) {
        return dt.timestamp();
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(date) {
        return dt.timestamp();
    }
    now
}

/// Reduce a display filename to a storage-safe path segment: non-ASCII
/// stripped, unsafe characters mapped to underscores, separator runs
/// collapsed and trimmed, length capped, generic fallback if nothing
/// survives.
pub fn sanitize_filename(name: &str) -> String {
    const MAX_LEN: usize = 120;

    let mut out = String::with_capacity(name.len().min(MAX_LEN));
    let mut last_was_sep = false;

    for c in name.chars() {
        if !c.is_ascii() {
            continue;
        }
        let mapped = if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            Some(c)
        } else {
            None
        };
        match mapped {
            Some(c) => {
                out.push(c);
                last_was_sep = false;
            }
            None => {
                if !last_was_sep && !out.is_empty() {
                    out.push('_');
                }
                last_was_sep = true;
            }
        }
    }

    let trimmed: String = out
        .trim_matches(|c| c == '_' || c == '.' || c == '-')
        .chars()
        .take(MAX_LEN)
        .collect();

    if trimmed.is_empty() {
        "attachment.bin".to_string()
    } else {
        trimmed
    }
}

// ============ Background embedding ============

fn spawn_embedding_pass(
    pool: SqlitePool,
    chunking: ChunkingConfig,
    client: EmbedClient,
    doc_ids: Vec<String>,
) -> tokio::task::JoinHandle<EmbedStats> {
    tokio::spawn(async move {
        let mut stats = EmbedStats::default();
        for doc_id in &doc_ids {
            match index_document(&pool, &chunking, &client, doc_id).await {
                Ok(IndexResult::Indexed(chunks)) => {
                    stats.indexed += 1;
                    info!(%doc_id, chunks, "document indexed");
                }
                Ok(IndexResult::Skipped) => stats.skipped += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(%doc_id, error = %e, "embedding generation failed");
                }
            }
        }
        info!(
            indexed = stats.indexed,
            skipped = stats.skipped,
            failed = stats.failed,
            "embedding pass finished"
        );
        stats
    })
}

#[derive(Debug)]
pub enum IndexResult {
    Indexed(usize),
    Skipped,
}

/// Chunk, embed, and write one document's vectors. Skips documents that
/// are already indexed (idempotent re-ingestion) or have no text. Writes
/// are all-or-nothing per document relative to the guard.
pub async fn index_document(
    pool: &SqlitePool,
    chunking: &ChunkingConfig,
    client: &EmbedClient,
    doc_id: &str,
) -> Result<IndexResult> {
    if index::has_embeddings(pool, doc_id).await? {
        return Ok(IndexResult::Skipped);
    }

    let Some(doc) = index::get_document(pool, doc_id).await? else {
        anyhow::bail!("document {doc_id} disappeared before indexing");
    };
    let Some(body) = doc.body.as_deref().filter(|b| !b.trim().is_empty()) else {
        return Ok(IndexResult::Skipped);
    };

    let mut chunks = chunk_with_hard_cap(
        body,
        chunking.max_tokens,
        chunking.overlap_tokens,
        chunking.hard_cap_tokens,
    );
    if chunks.is_empty() {
        return Ok(IndexResult::Skipped);
    }

    let vectors = match client.embed_batch(&chunks).await {
        Ok(vectors) => vectors,
        Err(EmbedError::ChunkTooLarge(reason)) => {
            // One re-chunk at half size; a second failure propagates so we
            // never loop on oversized input.
            info!(doc_id, %reason, "re-chunking at half size");
            let smaller = chunking.max_tokens / 2;
            chunks = chunks
                .iter()
                .flat_map(|c| chunk_text(c, smaller.max(1), chunking.overlap_tokens / 2))
                .collect();
            client.embed_batch(&chunks).await?
        }
        Err(e) => return Err(e.into()),
    };

    let rows: Vec<EmbeddedChunk> = chunks
        .into_iter()
        .zip(vectors)
        .enumerate()
        .map(|(i, (text, vector))| EmbeddedChunk {
            chunk_index: i as i64,
            text,
            vector,
        })
        .collect();

    index::upsert_chunks(pool, doc_id, &rows).await?;
    Ok(IndexResult::Indexed(rows.len()))
}

/// Backfill embeddings for stored documents that have text but no chunk
/// rows yet.
pub async fn run_embed_pending(
    pool: &SqlitePool,
    config: &Config,
    client: &EmbedClient,
    limit: Option<usize>,
) -> Result<EmbedStats> {
    let pending = index::documents_missing_embeddings(pool, limit).await?;
    let mut stats = EmbedStats::default();

    for doc in &pending {
        match index_document(pool, &config.chunking, client, &doc.id).await {
            Ok(IndexResult::Indexed(_)) => stats.indexed += 1,
            Ok(IndexResult::Skipped) => stats.skipped += 1,
            Err(e) => {
                stats.failed += 1;
                warn!(doc_id = %doc.id, error = %e, "embedding backfill failed");
            }
        }
    }

    Ok(stats)
}

// ============ Job bookkeeping ============

async fn create_job(pool: &SqlitePool, job_id: &str, source_id: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO ingestion_jobs (id, source_id, status, processed_count, started_at)
        VALUES (?, ?, 'running', 0, ?)
        "#,
    )
    .bind(job_id)
    .bind(source_id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// The single terminal update a job ever receives.
async fn finish_job(
    pool: &SqlitePool,
    job_id: &str,
    status: JobStatus,
    processed: i64,
    error_message: Option<&str>,
) -> Result<IngestionJob> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        UPDATE ingestion_jobs
        SET status = ?, processed_count = ?, completed_at = ?, error_message = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(processed)
    .bind(now)
    .bind(error_message)
    .bind(job_id)
    .execute(pool)
    .await?;

    get_job(pool, job_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("job {job_id} missing after terminal update"))
}

pub async fn get_job(pool: &SqlitePool, job_id: &str) -> Result<Option<IngestionJob>> {
    let row = sqlx::query(
        r#"
        SELECT id, source_id, status, processed_count, started_at, completed_at, error_message
        FROM ingestion_jobs
        WHERE id = ?
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().and_then(row_to_job))
}

pub async fn list_jobs(pool: &SqlitePool, limit: i64) -> Result<Vec<IngestionJob>> {
    let rows = sqlx::query(
        r#"
        SELECT id, source_id, status, processed_count, started_at, completed_at, error_message
        FROM ingestion_jobs
        ORDER BY started_at DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().filter_map(row_to_job).collect())
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Option<IngestionJob> {
    let status: String = row.get("status");
    Some(IngestionJob {
        id: row.get("id"),
        source_id: row.get("source_id"),
        status: JobStatus::parse(&status)?,
        processed_count: row.get("processed_count"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error_message: row.get("error_message"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_safe_names() {
        assert_eq!(sanitize_filename("report-Q3.pdf"), "report-Q3.pdf");
    }

    #[test]
    fn test_sanitize_strips_non_ascii_and_unsafe() {
        assert_eq!(sanitize_filename("rés?umé *final*.docx"), "rs_um_final_.docx");
        assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
    }

    #[test]
    fn test_sanitize_collapses_and_trims_separators() {
        assert_eq!(sanitize_filename("  weird   name!!.txt  "), "weird_name_.txt");
        assert_eq!(sanitize_filename("___x___"), "x");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "a".repeat(500);
        assert_eq!(sanitize_filename(&long).len(), 120);
    }

    #[test]
    fn test_sanitize_falls_back_when_empty() {
        assert_eq!(sanitize_filename(""), "attachment.bin");
        assert_eq!(sanitize_filename("日本語のファイル"), "attachment.bin");
        assert_eq!(sanitize_filename("???"), "attachment.bin");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let now = 1_700_000_000;
        assert_eq!(
            parse_timestamp(Some("2023-11-14T22:13:20Z"), now),
            1_700_000_000
        );
        assert_eq!(
            parse_timestamp(Some("Tue, 14 Nov 2023 22:13:20 +0000"), now),
            1_700_000_000
        );
        assert_eq!(parse_timestamp(Some("not a date"), now), now);
        assert_eq!(parse_timestamp(None, now), now);
    }

    #[test]
    fn test_normalize_defaults() {
        let raw = RawMessage {
            id: "m1".to_string(),
            subject: Some("   ".to_string()),
            from: None,
            to: vec!["a@x.com".to_string()],
            cc: vec![],
            date: None,
            body: Some("".to_string()),
            attachments: vec![],
        };
        let (doc, to, cc) = normalize_message(&raw, 42);
        assert_eq!(doc.title, "(no subject)");
        assert_eq!(doc.sender.as_deref(), Some("unknown"));
        assert!(doc.body.is_none());
        assert_eq!(doc.size, 0);
        assert_eq!(doc.timestamp, 42);
        assert_eq!(to, vec!["a@x.com".to_string()]);
        assert!(cc.is_empty());
    }

    // ── oversized-input handling ────────────────────────────────────

    use crate::chunk::CHARS_PER_TOKEN;
    use crate::config::{ChunkingConfig, EmbeddingConfig};
    use crate::{db, migrate};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Rejects the first call (or every call) as oversized input, then
    /// succeeds with a unit vector.
    struct OversizedProvider {
        calls: AtomicUsize,
        keep_failing: bool,
    }

    impl OversizedProvider {
        fn new(keep_failing: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                keep_failing,
            }
        }
    }

    #[async_trait]
    impl crate::embedding::EmbeddingProvider for OversizedProvider {
        fn model_name(&self) -> &str {
            "oversized"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.keep_failing || call == 0 {
                return Err(EmbedError::ChunkTooLarge("8192 tokens max".to_string()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    fn small_chunking() -> ChunkingConfig {
        ChunkingConfig {
            max_tokens: 10,
            overlap_tokens: 0,
            hard_cap_tokens: 100,
        }
    }

    fn fast_embedding() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "oversized".to_string(),
            model: Some("oversized".to_string()),
            dims: Some(3),
            concurrency: 4,
            group_pause_ms: 0,
            max_retries: 2,
            initial_delay_ms: 1,
            timeout_secs: 5,
        }
    }

    async fn pool_with_doc(body: &str) -> (tempfile::TempDir, SqlitePool) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::connect_path(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();

        let doc = Document {
            id: "m1".to_string(),
            kind: DocumentKind::Email,
            parent_id: None,
            title: "subject".to_string(),
            sender: Some("alice@example.com".to_string()),
            content_type: "message/rfc822".to_string(),
            body: Some(body.to_string()),
            size: body.len() as i64,
            timestamp: 100,
            created_at: 100,
            updated_at: 100,
        };
        index::upsert_document(&pool, &doc).await.unwrap();
        (tmp, pool)
    }

    const LONG_BODY: &str =
        "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";

    #[tokio::test]
    async fn test_oversized_input_rechunked_at_half_size() {
        let (_tmp, pool) = pool_with_doc(LONG_BODY).await;
        let provider = Arc::new(OversizedProvider::new(false));
        let client = EmbedClient::new(provider.clone(), &fast_embedding());

        let result = index_document(&pool, &small_chunking(), &client, "m1")
            .await
            .unwrap();
        assert!(matches!(result, IndexResult::Indexed(n) if n >= 2));
        assert!(index::has_embeddings(&pool, "m1").await.unwrap());

        // Every stored chunk respects the halved window.
        let texts: Vec<String> = sqlx::query_scalar(
            "SELECT chunk_text FROM document_chunks WHERE document_id = 'm1' ORDER BY chunk_index",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert!(texts.len() >= 2);
        for text in &texts {
            assert!(text.chars().count() <= 5 * CHARS_PER_TOKEN, "got: {text:?}");
        }
    }

    #[tokio::test]
    async fn test_persistent_oversize_leaves_document_unindexed() {
        let (_tmp, pool) = pool_with_doc(LONG_BODY).await;
        let provider = Arc::new(OversizedProvider::new(true));
        let client = EmbedClient::new(provider, &fast_embedding());

        let err = index_document(&pool, &small_chunking(), &client, "m1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("chunk too large"));

        // The second failure propagated before any write happened.
        assert!(!index::has_embeddings(&pool, "m1").await.unwrap());
    }
}

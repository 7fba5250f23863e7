//! End-to-end pipeline tests: ingestion fan-out, partial-failure
//! semantics, idempotent re-ingestion, retrieval ranking, and the
//! grounded-answer fallback — all against a temporary SQLite database
//! with in-memory collaborator fakes.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mailstash::config::{
    BlobConfig, ChunkingConfig, Config, DbConfig, EmbeddingConfig, GenerationConfig,
    IngestionConfig, RetrievalConfig, SourceConfig,
};
use mailstash::embedding::{EmbedClient, EmbedError, EmbeddingProvider};
use mailstash::ingest::{run_ingest, IngestDeps};
use mailstash::models::{DocumentKind, JobStatus, RawAttachment, RawMessage};
use mailstash::providers::{BlobStore, GenerationProvider, MailSource, PlainTextExtractor};
use mailstash::retrieval::{retrieve, SYNTHETIC_RECENCY_SCORE};
use mailstash::{answer, db, index, migrate};

// ─── Fakes ──────────────────────────────────────────────────────────

/// In-memory mail source; attachment payloads keyed by (message, attachment).
struct FakeSource {
    messages: Vec<RawMessage>,
    payloads: HashMap<(String, String), Vec<u8>>,
}

#[async_trait]
impl MailSource for FakeSource {
    async fn fetch_messages(&self, _source_id: &str, limit: usize) -> Result<Vec<RawMessage>> {
        let mut messages = self.messages.clone();
        messages.truncate(limit);
        Ok(messages)
    }

    async fn fetch_attachment_bytes(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>> {
        self.payloads
            .get(&(message_id.to_string(), attachment_id.to_string()))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("download failed: connection reset"))
    }
}

struct FailingSource;

#[async_trait]
impl MailSource for FailingSource {
    async fn fetch_messages(&self, _source_id: &str, _limit: usize) -> Result<Vec<RawMessage>> {
        anyhow::bail!("grant expired")
    }
    async fn fetch_attachment_bytes(&self, _m: &str, _a: &str) -> Result<Vec<u8>> {
        anyhow::bail!("grant expired")
    }
}

/// Records uploaded paths; optionally rejects every upload.
struct FakeBlobs {
    uploads: Mutex<Vec<String>>,
    fail: bool,
}

impl FakeBlobs {
    fn recording() -> Self {
        Self {
            uploads: Mutex::new(Vec::new()),
            fail: false,
        }
    }
    fn failing() -> Self {
        Self {
            uploads: Mutex::new(Vec::new()),
            fail: true,
        }
    }
}

#[async_trait]
impl BlobStore for FakeBlobs {
    async fn upload(&self, path: &str, _bytes: &[u8], _content_type: &str) -> Result<()> {
        if self.fail {
            anyhow::bail!("503 service unavailable");
        }
        self.uploads.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

/// Deterministic embedding provider: one dimension per vocabulary term
/// plus a small bias so no vector is ever zero.
struct VocabEmbedding;

const VOCAB: &[&str] = &[
    "rust", "compiler", "invoice", "travel", "deploy", "offsite", "budget", "kernel",
];

#[async_trait]
impl EmbeddingProvider for VocabEmbedding {
    fn model_name(&self) -> &str {
        "vocab-test"
    }
    fn dims(&self) -> usize {
        VOCAB.len() + 1
    }
    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_ascii_lowercase();
                let mut v: Vec<f32> = VOCAB
                    .iter()
                    .map(|term| lower.matches(term).count() as f32)
                    .collect();
                v.push(0.01);
                v
            })
            .collect())
    }
}

struct FailingGenerator;

#[async_trait]
impl GenerationProvider for FailingGenerator {
    async fn generate(&self, _system: &str, _user: &str) -> Result<String> {
        anyhow::bail!("model overloaded")
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

fn test_config(root: &std::path::Path) -> Config {
    Config {
        db: DbConfig {
            path: root.join("mailstash.sqlite"),
        },
        source: SourceConfig {
            root: root.join("mailbox"),
        },
        blob: BlobConfig {
            root: root.join("blobs"),
        },
        chunking: ChunkingConfig::default(),
        embedding: EmbeddingConfig {
            provider: "fake".to_string(),
            model: Some("vocab-test".to_string()),
            dims: Some(VOCAB.len() + 1),
            concurrency: 4,
            group_pause_ms: 0,
            max_retries: 2,
            initial_delay_ms: 1,
            timeout_secs: 5,
        },
        ingestion: IngestionConfig::default(),
        retrieval: RetrievalConfig::default(),
        generation: GenerationConfig::default(),
    }
}

fn mailbox() -> FakeSource {
    let messages = vec![
        RawMessage {
            id: "m1".to_string(),
            subject: Some("Rust meetup".to_string()),
            from: Some("carol@example.com".to_string()),
            to: vec!["me@example.com".to_string()],
            cc: vec![],
            date: Some("2024-01-01T10:00:00Z".to_string()),
            body: Some("We will talk about the rust compiler and rust tooling.".to_string()),
            attachments: vec![],
        },
        RawMessage {
            id: "m2".to_string(),
            subject: Some("Invoice".to_string()),
            from: Some("billing@example.com".to_string()),
            to: vec!["me@example.com".to_string()],
            cc: vec!["boss@example.com".to_string()],
            date: Some("2024-02-01T10:00:00Z".to_string()),
            body: Some("Your travel invoice is attached.".to_string()),
            attachments: vec![
                RawAttachment {
                    id: "a_ok".to_string(),
                    filename: Some("notes.txt".to_string()),
                    content_type: "text/plain".to_string(),
                    size: 32,
                },
                RawAttachment {
                    id: "a_fail".to_string(),
                    filename: Some("broken.txt".to_string()),
                    content_type: "text/plain".to_string(),
                    size: 32,
                },
            ],
        },
        RawMessage {
            id: "m3".to_string(),
            subject: None,
            from: None,
            to: vec![],
            cc: vec![],
            date: Some("2024-03-01T10:00:00Z".to_string()),
            body: None,
            attachments: vec![RawAttachment {
                id: "a_img".to_string(),
                filename: Some("photo.png".to_string()),
                content_type: "image/png".to_string(),
                size: 16,
            }],
        },
    ];

    let mut payloads = HashMap::new();
    payloads.insert(
        ("m2".to_string(), "a_ok".to_string()),
        b"travel invoice details for the budget review".to_vec(),
    );
    payloads.insert(
        ("m3".to_string(), "a_img".to_string()),
        vec![0x89, 0x50, 0x4e, 0x47],
    );
    // m2/a_fail has no payload: its download fails.
    FakeSource { messages, payloads }
}

fn deps_with(source: Arc<dyn MailSource>, blobs: Arc<FakeBlobs>, config: &Config) -> IngestDeps {
    IngestDeps {
        source,
        extractor: Arc::new(PlainTextExtractor),
        blobs,
        embedder: Some(EmbedClient::new(Arc::new(VocabEmbedding), &config.embedding)),
    }
}

async fn chunk_count(pool: &sqlx::SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks")
        .fetch_one(pool)
        .await
        .unwrap()
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ingest_with_failing_attachment_completes() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let blobs = Arc::new(FakeBlobs::recording());
    let deps = deps_with(Arc::new(mailbox()), blobs.clone(), &config);

    let outcome = run_ingest(&pool, &config, &deps, "inbox", 100).await.unwrap();

    // One failing attachment does not dent the message count or the job.
    assert_eq!(outcome.job.status, JobStatus::Completed);
    assert_eq!(outcome.job.processed_count, 3);
    assert!(outcome.job.error_message.is_none());
    assert!(outcome.job.completed_at.is_some());

    // The failing attachment is absent; the others are stored.
    assert!(index::get_document(&pool, "a_fail").await.unwrap().is_none());
    let att = index::get_document(&pool, "a_ok").await.unwrap().unwrap();
    // Provider-declared size is persisted on the document row.
    assert_eq!(att.size, 32);

    // Unsupported content type: stored, but with no text.
    let img = index::get_document(&pool, "a_img").await.unwrap().unwrap();
    assert_eq!(img.kind, DocumentKind::Attachment);
    assert!(img.body.is_none());
    assert_eq!(img.parent_id.as_deref(), Some("m3"));

    // Blob uploads used sanitized attachment paths.
    let uploads = blobs.uploads.lock().unwrap().clone();
    assert!(uploads.contains(&"m2/a_ok_notes.txt".to_string()));
    assert!(uploads.contains(&"m3/a_img_photo.png".to_string()));

    // Defaults were applied during normalization.
    let m3 = index::get_document(&pool, "m3").await.unwrap().unwrap();
    assert_eq!(m3.title, "(no subject)");
    assert_eq!(m3.sender.as_deref(), Some("unknown"));
    assert_eq!(m3.size, 0);

    // The background pass embedded every document with text: m1, m2, a_ok.
    let stats = outcome.embedding.unwrap().await.unwrap();
    assert_eq!(stats.indexed, 3);
    assert_eq!(stats.failed, 0);
    assert!(index::has_embeddings(&pool, "m1").await.unwrap());
    assert!(index::has_embeddings(&pool, "a_ok").await.unwrap());
    assert!(!index::has_embeddings(&pool, "m3").await.unwrap());
}

#[tokio::test]
async fn test_reingestion_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let deps = deps_with(Arc::new(mailbox()), Arc::new(FakeBlobs::recording()), &config);

    let first = run_ingest(&pool, &config, &deps, "inbox", 100).await.unwrap();
    first.embedding.unwrap().await.unwrap();
    let docs_after_first: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await
        .unwrap();
    let chunks_after_first = chunk_count(&pool).await;

    let second = run_ingest(&pool, &config, &deps, "inbox", 100).await.unwrap();
    let stats = second.embedding.unwrap().await.unwrap();

    // Every already-indexed document hits the has_embeddings guard.
    assert_eq!(stats.indexed, 0);
    assert_eq!(stats.skipped, 3);

    let docs_after_second: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(docs_after_first, docs_after_second);
    assert_eq!(chunks_after_first, chunk_count(&pool).await);
}

#[tokio::test]
async fn test_fetch_failure_marks_job_error() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let deps = deps_with(Arc::new(FailingSource), Arc::new(FakeBlobs::recording()), &config);

    let outcome = run_ingest(&pool, &config, &deps, "inbox", 100).await.unwrap();
    assert_eq!(outcome.job.status, JobStatus::Error);
    assert_eq!(outcome.job.processed_count, 0);
    assert!(outcome.job.error_message.unwrap().contains("grant expired"));
    assert!(outcome.embedding.is_none());

    let docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(docs, 0);
}

#[tokio::test]
async fn test_blob_failure_does_not_block_indexing() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    // Single attempt keeps the test fast; retries are covered at the unit level.
    config.ingestion.blob_attempts = 1;
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let deps = deps_with(Arc::new(mailbox()), Arc::new(FakeBlobs::failing()), &config);

    let outcome = run_ingest(&pool, &config, &deps, "inbox", 100).await.unwrap();
    assert_eq!(outcome.job.status, JobStatus::Completed);
    assert_eq!(outcome.job.processed_count, 3);

    // The attachment's text was still extracted and stored.
    let att = index::get_document(&pool, "a_ok").await.unwrap().unwrap();
    assert!(att.body.unwrap().contains("travel invoice"));
}

#[tokio::test]
async fn test_retrieval_ranks_semantic_matches() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let deps = deps_with(Arc::new(mailbox()), Arc::new(FakeBlobs::recording()), &config);
    let outcome = run_ingest(&pool, &config, &deps, "inbox", 100).await.unwrap();
    outcome.embedding.unwrap().await.unwrap();

    let embedder = deps.embedder.clone().unwrap();
    let result = retrieve(&pool, &config.retrieval, Some(&embedder), "rust compiler news")
        .await
        .unwrap();

    assert_eq!(result.emails[0].doc.id, "m1");
    assert!(result.emails[0].similarity > 0.5);
    assert!(result.context.contains("Rust meetup"));

    // The invoice attachment matches invoice-flavored queries instead.
    let result = retrieve(&pool, &config.retrieval, Some(&embedder), "travel invoice")
        .await
        .unwrap();
    assert!(result.attachments.iter().any(|r| r.doc.id == "a_ok"));
}

#[tokio::test]
async fn test_recency_override_on_keyword_and_empty_results() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let deps = deps_with(Arc::new(mailbox()), Arc::new(FakeBlobs::recording()), &config);
    let outcome = run_ingest(&pool, &config, &deps, "inbox", 100).await.unwrap();
    outcome.embedding.unwrap().await.unwrap();
    let embedder = deps.embedder.clone().unwrap();

    // Keyword: bypasses similarity entirely, newest email first.
    let result = retrieve(&pool, &config.retrieval, Some(&embedder), "latest email")
        .await
        .unwrap();
    assert_eq!(result.emails[0].doc.id, "m3");
    assert_eq!(result.emails[0].similarity, SYNTHETIC_RECENCY_SCORE);

    // Zero semantic matches: also falls back to recency, never empty.
    let result = retrieve(
        &pool,
        &config.retrieval,
        Some(&embedder),
        "quantum chromodynamics seminar",
    )
    .await
    .unwrap();
    assert!(!result.emails.is_empty());
    assert_eq!(result.emails[0].doc.id, "m3");
    assert_eq!(result.emails[0].similarity, SYNTHETIC_RECENCY_SCORE);
}

#[tokio::test]
async fn test_ask_falls_back_when_generation_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let deps = deps_with(Arc::new(mailbox()), Arc::new(FakeBlobs::recording()), &config);
    let outcome = run_ingest(&pool, &config, &deps, "inbox", 100).await.unwrap();
    outcome.embedding.unwrap().await.unwrap();
    let embedder = deps.embedder.clone().unwrap();

    let result = retrieve(&pool, &config.retrieval, Some(&embedder), "rust compiler")
        .await
        .unwrap();
    let answer = answer::compose_answer(&FailingGenerator, "rust compiler", &result).await;

    // Deterministic fallback that still reports the match counts.
    assert!(answer.contains("could not generate"));
    assert!(answer.contains(&format!("{} email(s)", result.emails.len())));
    assert!(!result.emails.is_empty());
}

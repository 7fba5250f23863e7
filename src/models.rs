//! Core data models used throughout Mailstash.
//!
//! These types represent the raw provider records, normalized documents,
//! chunks, and jobs that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// The two document kinds the index is parameterized over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Email,
    Attachment,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Email => "email",
            DocumentKind::Attachment => "attachment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(DocumentKind::Email),
            "attachment" => Some(DocumentKind::Attachment),
            _ => None,
        }
    }
}

/// Raw message record as returned by a mail source, before normalization.
///
/// Every field except `id` is optional; normalization during ingestion
/// supplies explicit defaults (see `ingest::normalize_message`).
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<RawAttachment>,
}

/// Raw attachment descriptor attached to a [`RawMessage`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawAttachment {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub size: i64,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

/// Normalized document stored in SQLite. Identity is the provider-assigned
/// id, so re-ingesting the same message or attachment upserts in place.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub kind: DocumentKind,
    /// Owning email id for attachments; `None` for emails.
    pub parent_id: Option<String>,
    /// Subject for emails, display filename for attachments.
    pub title: String,
    pub sender: Option<String>,
    pub content_type: String,
    pub body: Option<String>,
    /// Payload size in bytes: the provider-declared size for attachments
    /// (actual byte count when the provider omits it), body length for
    /// emails.
    pub size: i64,
    /// Message/attachment timestamp (unix seconds).
    pub timestamp: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A chunk of a document paired with its embedding vector, ready to be
/// written to the index. Chunks for one document are written together.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk_index: i64,
    pub text: String,
    pub vector: Vec<f32>,
}

/// A single chunk match returned by the vector index.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub similarity: f64,
}

/// Terminal-or-running state of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }
}

/// One row per ingestion run. Created in `running` state before any network
/// I/O and updated exactly once with a terminal status.
#[derive(Debug, Clone)]
pub struct IngestionJob {
    pub id: String,
    pub source_id: String,
    pub status: JobStatus,
    pub processed_count: i64,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub error_message: Option<String>,
}

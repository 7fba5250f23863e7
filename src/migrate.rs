use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Every statement is idempotent, so running migrations
/// repeatedly is safe.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Documents: emails and attachments share one table, discriminated by kind.
    // Identity is the provider-assigned id, so re-ingestion upserts in place.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL CHECK (kind IN ('email', 'attachment')),
            parent_id TEXT,
            title TEXT NOT NULL,
            sender TEXT,
            content_type TEXT NOT NULL DEFAULT 'text/plain',
            body TEXT,
            size INTEGER NOT NULL DEFAULT 0,
            timestamp INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Recipient rows are replaced wholesale on every upsert of their email.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recipients (
            document_id TEXT NOT NULL,
            address TEXT NOT NULL,
            field TEXT NOT NULL CHECK (field IN ('to', 'cc')),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunk rows carry their embedding as a little-endian f32 BLOB. Rows are
    // only written once the whole document embedded successfully, so a
    // document has either zero chunk rows or a complete, gapless set.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_jobs (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'error')),
            processed_count INTEGER NOT NULL DEFAULT 0,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON document_chunks(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_kind ON documents(kind)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_timestamp ON documents(timestamp DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_recipients_document ON recipients(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_started_at ON ingestion_jobs(started_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}

//! Durable document and vector index.
//!
//! Owns the `documents`, `recipients`, and `document_chunks` tables and
//! answers top-K cosine-similarity queries per document kind. Embeddings
//! are stored as little-endian f32 BLOBs and scanned exactly in Rust; at
//! this scale the exact scan preserves the same ordering contract an ANN
//! index would provide.
//!
//! All writes are keyed upserts — by document id, or by
//! `(document_id, chunk_index)` — so concurrent retries of the same logical
//! write are safe without external locking.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{ChunkHit, Document, DocumentKind, EmbeddedChunk};

/// Idempotent write of a normalized document. Re-ingesting the same id
/// overwrites mutable fields and never duplicates the row.
pub async fn upsert_document(pool: &SqlitePool, doc: &Document) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO documents (id, kind, parent_id, title, sender, content_type, body, size, timestamp, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            parent_id = excluded.parent_id,
            title = excluded.title,
            sender = excluded.sender,
            content_type = excluded.content_type,
            body = excluded.body,
            size = excluded.size,
            timestamp = excluded.timestamp,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&doc.id)
    .bind(doc.kind.as_str())
    .bind(&doc.parent_id)
    .bind(&doc.title)
    .bind(&doc.sender)
    .bind(&doc.content_type)
    .bind(&doc.body)
    .bind(doc.size)
    .bind(doc.timestamp)
    .bind(doc.created_at)
    .bind(doc.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Replace an email's recipient rows wholesale.
pub async fn replace_recipients(
    pool: &SqlitePool,
    document_id: &str,
    to: &[String],
    cc: &[String],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM recipients WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for (field, addresses) in [("to", to), ("cc", cc)] {
        for address in addresses {
            sqlx::query("INSERT INTO recipients (document_id, address, field) VALUES (?, ?, ?)")
                .bind(document_id)
                .bind(address)
                .bind(field)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

/// Transactionally replace a document's chunk rows. Either the whole set
/// lands or nothing does, so a document is never left partially indexed.
pub async fn upsert_chunks(
    pool: &SqlitePool,
    document_id: &str,
    chunks: &[EmbeddedChunk],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for chunk in chunks {
        sqlx::query(
            r#"
            INSERT INTO document_chunks (id, document_id, chunk_index, chunk_text, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id, chunk_index) DO UPDATE SET
                chunk_text = excluded.chunk_text,
                embedding = excluded.embedding,
                created_at = excluded.created_at
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(vec_to_blob(&chunk.vector))
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Whole-document guard used before re-indexing: true once any chunk row
/// exists, and chunk rows are only ever written as a complete set.
pub async fn has_embeddings(pool: &SqlitePool, document_id: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM document_chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Top-K chunks of one kind by descending cosine similarity, restricted to
/// `similarity > threshold`.
pub async fn search(
    pool: &SqlitePool,
    kind: DocumentKind,
    query_vec: &[f32],
    threshold: f64,
    top_k: i64,
) -> Result<Vec<ChunkHit>> {
    let rows = sqlx::query(
        r#"
        SELECT c.document_id, c.chunk_index, c.chunk_text, c.embedding
        FROM document_chunks c
        JOIN documents d ON d.id = c.document_id
        WHERE d.kind = ?
        "#,
    )
    .bind(kind.as_str())
    .fetch_all(pool)
    .await?;

    let mut hits: Vec<ChunkHit> = rows
        .iter()
        .filter_map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
            if similarity > threshold {
                Some(ChunkHit {
                    document_id: row.get("document_id"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("chunk_text"),
                    similarity,
                })
            } else {
                None
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(top_k.max(0) as usize);

    Ok(hits)
}

/// The N most recent documents of one kind, newest first. Backs the
/// recency override in retrieval.
pub async fn recent_documents(
    pool: &SqlitePool,
    kind: DocumentKind,
    n: usize,
) -> Result<Vec<Document>> {
    let rows = sqlx::query(
        r#"
        SELECT id, kind, parent_id, title, sender, content_type, body, size, timestamp, created_at, updated_at
        FROM documents
        WHERE kind = ?
        ORDER BY timestamp DESC, id ASC
        LIMIT ?
        "#,
    )
    .bind(kind.as_str())
    .bind(n as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().filter_map(row_to_document).collect())
}

/// Fetch one document by id.
pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<Document>> {
    let row = sqlx::query(
        r#"
        SELECT id, kind, parent_id, title, sender, content_type, body, size, timestamp, created_at, updated_at
        FROM documents
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().and_then(row_to_document))
}

/// Documents that have non-empty text but no chunk rows yet. Backs the
/// `embed pending` backfill command.
pub async fn documents_missing_embeddings(
    pool: &SqlitePool,
    limit: Option<usize>,
) -> Result<Vec<Document>> {
    let limit_val = limit.unwrap_or(usize::MAX).min(i64::MAX as usize) as i64;

    let rows = sqlx::query(
        r#"
        SELECT d.id, d.kind, d.parent_id, d.title, d.sender, d.content_type, d.body, d.size, d.timestamp, d.created_at, d.updated_at
        FROM documents d
        WHERE d.body IS NOT NULL
          AND length(trim(d.body)) > 0
          AND NOT EXISTS (SELECT 1 FROM document_chunks c WHERE c.document_id = d.id)
        ORDER BY d.timestamp DESC
        LIMIT ?
        "#,
    )
    .bind(limit_val)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().filter_map(row_to_document).collect())
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Option<Document> {
    let kind: String = row.get("kind");
    Some(Document {
        id: row.get("id"),
        kind: DocumentKind::parse(&kind)?,
        parent_id: row.get("parent_id"),
        title: row.get("title"),
        sender: row.get("sender"),
        content_type: row.get("content_type"),
        body: row.get("body"),
        size: row.get("size"),
        timestamp: row.get("timestamp"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

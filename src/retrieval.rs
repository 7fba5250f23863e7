//! Retrieval engine: query embedding → vector search over both document
//! kinds → ranking → bounded context assembly.
//!
//! Ranking is recall-then-recency rather than pure similarity: documents
//! are ordered by their best-matching chunk, but when two documents score
//! within a small epsilon of each other the more recent one wins. Queries
//! about the newest items ("latest email", "most recent invoice") — and
//! queries with no semantic matches at all — bypass similarity ranking
//! entirely and surface the most recent documents with a synthetic score.

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::warn;

use crate::config::RetrievalConfig;
use crate::embedding::EmbedClient;
use crate::index;
use crate::models::{ChunkHit, Document, DocumentKind};

/// Keywords that trigger the recency override.
const RECENCY_KEYWORDS: &[&str] = &["last", "recent", "latest", "newest"];

/// Similarity assigned to recency-override results so downstream ranking
/// treats them as top matches.
pub const SYNTHETIC_RECENCY_SCORE: f64 = 0.95;

/// One ranked document with its best-matching chunks.
#[derive(Debug, Clone)]
pub struct RetrievedDoc {
    pub doc: Document,
    pub similarity: f64,
    pub chunks: Vec<String>,
}

/// Output of one retrieval pass: ranked matches per kind plus the bounded
/// context block handed to the answer composer.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub emails: Vec<RetrievedDoc>,
    pub attachments: Vec<RetrievedDoc>,
    pub context: String,
}

pub async fn retrieve(
    pool: &SqlitePool,
    config: &RetrievalConfig,
    embedder: Option<&EmbedClient>,
    query: &str,
) -> Result<RetrievalResult> {
    let semantic = match embedder {
        Some(client) if !is_recency_query(query) => {
            match client.embed(query).await {
                Ok(query_vec) => Some(search_both_kinds(pool, config, &query_vec).await?),
                Err(e) => {
                    // Degraded read path: fall back to recency rather than
                    // surfacing an error to the user.
                    warn!(error = %e, "query embedding failed, falling back to recency");
                    None
                }
            }
        }
        _ => None,
    };

    let (emails, attachments) = match semantic {
        Some((email_hits, att_hits)) if !email_hits.is_empty() || !att_hits.is_empty() => {
            let emails = rank_kind(pool, config, email_hits, config.email_display).await?;
            let attachments =
                rank_kind(pool, config, att_hits, config.attachment_display).await?;
            (emails, attachments)
        }
        // Recency override: explicit keyword, no embedder, or zero matches.
        _ => {
            let emails = recent_as_results(pool, config, DocumentKind::Email).await?;
            let attachments = recent_as_results(pool, config, DocumentKind::Attachment).await?;
            (emails, attachments)
        }
    };

    let context = build_context(&emails, &attachments, config);
    Ok(RetrievalResult {
        emails,
        attachments,
        context,
    })
}

/// Does the query ask for the newest items rather than a topic?
pub fn is_recency_query(query: &str) -> bool {
    let lower = query.to_ascii_lowercase();
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| RECENCY_KEYWORDS.contains(&token))
}

async fn search_both_kinds(
    pool: &SqlitePool,
    config: &RetrievalConfig,
    query_vec: &[f32],
) -> Result<(Vec<ChunkHit>, Vec<ChunkHit>)> {
    // Over-fetch by the multiplier to leave room for grouping and display
    // truncation.
    let candidate_k = config.top_k.saturating_mul(config.k_multiplier);
    let emails = index::search(
        pool,
        DocumentKind::Email,
        query_vec,
        config.threshold,
        candidate_k,
    )
    .await?;
    let attachments = index::search(
        pool,
        DocumentKind::Attachment,
        query_vec,
        config.threshold,
        candidate_k,
    )
    .await?;
    Ok((emails, attachments))
}

/// Group chunk hits by parent document, keep each document's best chunks,
/// rank recall-then-recency, and truncate to the display count.
async fn rank_kind(
    pool: &SqlitePool,
    config: &RetrievalConfig,
    hits: Vec<ChunkHit>,
    display: usize,
) -> Result<Vec<RetrievedDoc>> {
    let mut grouped: HashMap<String, Vec<ChunkHit>> = HashMap::new();
    for hit in hits {
        grouped.entry(hit.document_id.clone()).or_default().push(hit);
    }

    let mut results = Vec::with_capacity(grouped.len());
    for (document_id, mut doc_hits) in grouped {
        let Some(doc) = index::get_document(pool, &document_id).await? else {
            continue;
        };

        doc_hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let similarity = doc_hits.first().map(|h| h.similarity).unwrap_or(0.0);
        let chunks = doc_hits
            .iter()
            .take(config.max_chunks_per_doc)
            .map(|h| truncate_chars(&h.text, config.chunk_char_budget))
            .collect();

        results.push(RetrievedDoc {
            doc,
            similarity,
            chunks,
        });
    }

    order_documents(&mut results, config.recency_epsilon);
    results.truncate(display);
    Ok(results)
}

/// Order by best-chunk similarity, breaking near-ties (difference under
/// `epsilon`) in favor of the more recent document.
///
/// Epsilon-closeness is not transitive, so it cannot be expressed as a
/// comparator — `sort_by` requires a total order. Instead: a total sort by
/// similarity first, then a promotion pass in which a newer document climbs
/// past each adjacent older one scoring within `epsilon` of it.
pub fn order_documents(results: &mut [RetrievedDoc], epsilon: f64) {
    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.doc.timestamp.cmp(&a.doc.timestamp))
            .then_with(|| a.doc.id.cmp(&b.doc.id))
    });

    for i in 1..results.len() {
        let mut j = i;
        while j > 0
            && (results[j - 1].similarity - results[j].similarity).abs() < epsilon
            && results[j].doc.timestamp > results[j - 1].doc.timestamp
        {
            results.swap(j - 1, j);
            j -= 1;
        }
    }
}

async fn recent_as_results(
    pool: &SqlitePool,
    config: &RetrievalConfig,
    kind: DocumentKind,
) -> Result<Vec<RetrievedDoc>> {
    let display = match kind {
        DocumentKind::Email => config.email_display,
        DocumentKind::Attachment => config.attachment_display,
    };

    let docs = index::recent_documents(pool, kind, display).await?;
    Ok(docs
        .into_iter()
        .map(|doc| {
            let chunks = doc
                .body
                .as_deref()
                .map(|b| vec![truncate_chars(b.trim(), config.chunk_char_budget)])
                .unwrap_or_default();
            RetrievedDoc {
                doc,
                similarity: SYNTHETIC_RECENCY_SCORE,
                chunks,
            }
        })
        .collect())
}

/// Assemble the bounded context block for the generation prompt.
fn build_context(
    emails: &[RetrievedDoc],
    attachments: &[RetrievedDoc],
    config: &RetrievalConfig,
) -> String {
    if emails.is_empty() && attachments.is_empty() {
        return "No matching documents were found.".to_string();
    }

    let mut out = String::new();
    for (label, results) in [("Email", emails), ("Attachment", attachments)] {
        for (i, result) in results.iter().enumerate() {
            let date = chrono::DateTime::from_timestamp(result.doc.timestamp, 0)
                .map(|dt| dt.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            let sender = result.doc.sender.as_deref().unwrap_or("unknown");

            out.push_str(&format!(
                "[{} {}] \"{}\" — {} — {} (relevance {:.2})\n",
                label,
                i + 1,
                result.doc.title,
                sender,
                date,
                result.similarity
            ));
            for chunk in &result.chunks {
                out.push_str(&truncate_chars(chunk, config.chunk_char_budget));
                out.push('\n');
            }
            out.push('\n');
        }
    }

    out.trim_end().to_string()
}

fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(budget.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

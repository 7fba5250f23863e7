//! Embedding provider abstraction and the retrying, concurrency-limited
//! client that wraps it.
//!
//! The [`EmbeddingProvider`] trait is the only seam the rest of the crate
//! sees; concrete implementations are:
//! - **[`OpenAiEmbedding`]** — calls the OpenAI `/v1/embeddings` endpoint.
//! - test fakes (in the test suites) that script error sequences.
//!
//! [`EmbedClient`] adds the policy layer on top of a provider:
//! - at most `concurrency` in-flight provider calls (tokio semaphore), with
//!   batches processed in sequential groups of that size and a fixed pause
//!   between groups;
//! - rate-limit-aware retry with exponential backoff, preferring an explicit
//!   provider `retry_after`, then a "try again in N" hint parsed from the
//!   error payload, then `initial_delay_ms * 2^attempt`, clamped to
//!   `[100ms, 60s]`;
//! - oversized-input errors ([`EmbedError::ChunkTooLarge`]) are never
//!   retried, so callers can re-chunk instead of looping.
//!
//! Also provides the vector utilities shared with the index:
//! [`cosine_similarity`], [`vec_to_blob`], [`blob_to_vec`].

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::EmbeddingConfig;

/// Lower clamp on any computed backoff delay.
pub const MIN_BACKOFF: Duration = Duration::from_millis(100);
/// Upper clamp on any computed backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Error taxonomy for embedding calls. Only `RateLimited` is retryable.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding provider rate limited: {message}")]
    RateLimited {
        /// Provider-supplied delay, e.g. from a Retry-After header.
        retry_after: Option<Duration>,
        message: String,
    },

    /// Input exceeded the provider's context window. Never retried; the
    /// caller should re-chunk with a smaller unit size.
    #[error("chunk too large for embedding model: {0}")]
    ChunkTooLarge(String),

    #[error("embedding provider error: {0}")]
    Provider(String),
}

/// A backend that turns text into fixed-dimensionality vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch in one provider call, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Retrying, concurrency-limited wrapper around an [`EmbeddingProvider`].
///
/// Stateless across calls apart from the shared concurrency gate; cloning
/// is cheap and clones share the gate.
#[derive(Clone)]
pub struct EmbedClient {
    provider: Arc<dyn EmbeddingProvider>,
    gate: Arc<Semaphore>,
    concurrency: usize,
    group_pause: Duration,
    max_retries: u32,
    initial_delay: Duration,
}

impl EmbedClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            provider,
            gate: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            group_pause: Duration::from_millis(config.group_pause_ms),
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
        }
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed a single text with the full retry policy.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.embed_one_with_retry(text).await
    }

    /// Embed a batch, order-preserving. Texts beyond the concurrency cap
    /// are processed in sequential groups of `concurrency`, with a fixed
    /// pause between groups to avoid sustained rate-limit pressure.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut out = Vec::with_capacity(texts.len());

        for (group_index, group) in texts.chunks(self.concurrency).enumerate() {
            if group_index > 0 && !self.group_pause.is_zero() {
                tokio::time::sleep(self.group_pause).await;
            }

            let calls = group.iter().map(|text| self.embed_one_with_retry(text));
            out.extend(try_join_all(calls).await?);
        }

        Ok(out)
    }

    async fn embed_one_with_retry(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| EmbedError::Provider("embedding gate closed".to_string()))?;

        let input = [text.to_string()];
        let mut attempt: u32 = 0;

        loop {
            match self.provider.embed_batch(&input).await {
                Ok(mut vectors) => {
                    return vectors
                        .pop()
                        .ok_or_else(|| EmbedError::Provider("empty embedding response".to_string()));
                }
                Err(EmbedError::RateLimited {
                    retry_after,
                    message,
                }) => {
                    if attempt >= self.max_retries {
                        return Err(EmbedError::RateLimited {
                            retry_after,
                            message,
                        });
                    }
                    let delay = backoff_delay(retry_after, &message, attempt, self.initial_delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                // Oversized input and all other errors propagate untouched.
                Err(other) => return Err(other),
            }
        }
    }
}

/// Compute the delay before a rate-limited retry.
///
/// Preference order: explicit `retry_after`, a parsed "try again in N" hint
/// from the error payload, then `initial * 2^attempt`. The result is always
/// clamped to `[MIN_BACKOFF, MAX_BACKOFF]`.
pub fn backoff_delay(
    retry_after: Option<Duration>,
    message: &str,
    attempt: u32,
    initial: Duration,
) -> Duration {
    let raw = retry_after
        .or_else(|| parse_retry_hint(message))
        .unwrap_or_else(|| initial.saturating_mul(1u32 << attempt.min(16)));
    raw.clamp(MIN_BACKOFF, MAX_BACKOFF)
}

/// Best-effort parse of "try again in 2s" / "retry after 2000ms" style
/// hints that rate-limit payloads commonly carry.
fn parse_retry_hint(message: &str) -> Option<Duration> {
    let lower = message.to_ascii_lowercase();
    let after = ["try again in", "retry after"]
        .iter()
        .find_map(|marker| lower.find(marker).map(|i| i + marker.len()))?;

    let rest = lower[after..].trim_start();
    let digits_end = rest
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    let value: f64 = rest[..digits_end].parse().ok()?;

    let unit = rest[digits_end..].trim_start();
    let millis = if unit.starts_with("ms") || unit.starts_with("millisecond") {
        value
    } else if unit.starts_with('s') {
        value * 1000.0
    } else {
        return None;
    };

    if !millis.is_finite() || millis < 0.0 {
        return None;
    }
    Some(Duration::from_millis(millis as u64))
}

// ============ OpenAI provider ============

/// Embedding provider backed by the OpenAI embeddings API.
///
/// Maps HTTP 429 to [`EmbedError::RateLimited`] (honoring Retry-After),
/// context-length errors to [`EmbedError::ChunkTooLarge`], and everything
/// else to [`EmbedError::Provider`]. Retry policy lives in [`EmbedClient`],
/// not here.
pub struct OpenAiEmbedding {
    model: String,
    dims: usize,
    client: reqwest::Client,
    api_key: String,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedding {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            client,
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = EmbeddingsRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Provider(format!("embedding request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let message = response.text().await.unwrap_or_default();
            return Err(EmbedError::RateLimited {
                retry_after,
                message,
            });
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let lower = message.to_ascii_lowercase();
            if lower.contains("maximum context length") || lower.contains("context_length_exceeded")
            {
                return Err(EmbedError::ChunkTooLarge(message));
            }
            return Err(EmbedError::Provider(format!(
                "embedding API returned {status}: {message}"
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Provider(format!("invalid embedding response: {e}")))?;

        // Sort by index so output order matches input order.
        let mut data = parsed.data;
        data.sort_by_key(|item| item.index);
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB of little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Returns `0.0` for empty vectors or
/// vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

//! Collaborator traits for the ingestion and answer pipelines.
//!
//! Everything the core depends on — the mail source, text extractor, blob
//! store, and generation provider — is a constructed, explicitly-passed
//! trait object, so the pipeline runs unchanged against fakes in tests.
//! The embedding seam lives in [`crate::embedding`].

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::models::RawMessage;

/// Supplies raw messages and attachment bytes for a grant/session id.
#[async_trait]
pub trait MailSource: Send + Sync {
    async fn fetch_messages(&self, source_id: &str, limit: usize) -> Result<Vec<RawMessage>>;
    async fn fetch_attachment_bytes(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>>;
}

/// Outcome of a text-extraction attempt. Unsupported content types simply
/// yield no text rather than an error.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    pub success: bool,
    pub error: Option<String>,
}

impl Extraction {
    pub fn unsupported(content_type: &str) -> Self {
        Self {
            text: String::new(),
            success: false,
            error: Some(format!("unsupported content type: {content_type}")),
        }
    }
}

/// Turns raw attachment bytes into text. Treated as a black box.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], content_type: &str) -> Extraction;
}

/// Persists raw attachment bytes at a path. Failures are logged by the
/// caller, never fatal to indexing.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()>;
}

/// Produces free-text answers from a prompt pair. Failures yield a
/// deterministic fallback in [`crate::answer`]; generation is never retried.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, system: &str, user: &str) -> Result<String>;
}

// ============ Plain-text extractor ============

/// Passes through textual content types and reports everything else as
/// unsupported. Extraction quality for rich formats is out of scope.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], content_type: &str) -> Extraction {
        let textual = content_type.starts_with("text/")
            || content_type == "application/json"
            || content_type == "message/rfc822";

        if !textual {
            return Extraction::unsupported(content_type);
        }

        match std::str::from_utf8(bytes) {
            Ok(text) => Extraction {
                text: text.to_string(),
                success: true,
                error: None,
            },
            Err(e) => Extraction {
                text: String::new(),
                success: false,
                error: Some(format!("invalid utf-8 payload: {e}")),
            },
        }
    }
}

// ============ OpenAI generation provider ============

/// Generation provider backed by the OpenAI chat completions API.
pub struct OpenAiGeneration {
    model: String,
    client: reqwest::Client,
    api_key: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl OpenAiGeneration {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            client,
            api_key,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAiGeneration {
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("generation API returned {status}: {text}");
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("generation response contained no choices"))
    }
}

//! Mailbox-export mail source.
//!
//! Reads a local export directory in place of a live mail provider:
//!
//! ```text
//! <root>/
//!   messages.json                      # array of RawMessage records
//!   attachments/<message_id>/<attachment_id>   # raw payload files
//! ```
//!
//! The `source_id` passed to [`MailSource::fetch_messages`] is recorded on
//! the ingestion job; a single export directory is one source.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use crate::models::RawMessage;
use crate::providers::MailSource;

pub struct JsonMailSource {
    root: PathBuf,
}

impl JsonMailSource {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl MailSource for JsonMailSource {
    async fn fetch_messages(&self, _source_id: &str, limit: usize) -> Result<Vec<RawMessage>> {
        let path = self.root.join("messages.json");
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read mailbox export: {}", path.display()))?;

        let mut messages: Vec<RawMessage> =
            serde_json::from_str(&content).with_context(|| "Failed to parse messages.json")?;
        messages.truncate(limit);
        Ok(messages)
    }

    async fn fetch_attachment_bytes(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>> {
        let path = self
            .root
            .join("attachments")
            .join(message_id)
            .join(attachment_id);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read attachment payload: {}", path.display()))
    }
}

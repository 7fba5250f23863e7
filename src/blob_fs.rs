//! Filesystem blob store.
//!
//! Persists raw attachment payloads under a configured root directory.
//! Paths are produced by the orchestrator's filename sanitizer, so they are
//! already storage-safe relative paths.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use crate::providers::BlobStore;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create blob directory: {}", parent.display()))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("Failed to write blob: {}", target.display()))
    }
}

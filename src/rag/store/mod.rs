mod fs;
mod manifest;
mod memory;

pub use fs::FsBlobStore;
pub use manifest::{ClauseManifest, MANIFEST_FORMAT_VERSION};
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use std::sync::Arc;

use super::extractor::ExtractedClauseRecord;
use super::types::DocumentId;
use crate::error::{RagError, Result};

/// Flat key/value blob storage. Keys are `/`-separated relative paths.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Document, index and record storage for contracts on top of a [`BlobStore`].
#[derive(Clone)]
pub struct ContractStore {
    blobs: Arc<dyn BlobStore>,
}

impl ContractStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    pub fn text_key(id: &DocumentId) -> String {
        format!("texts/{}.txt", id)
    }

    pub fn index_key(id: &DocumentId, revision: &str) -> String {
        format!("indexes/{}/{}.idx", id, revision)
    }

    pub fn records_key(id: &DocumentId, revision: &str) -> String {
        format!("records/{}/{}.json", id, revision)
    }

    pub fn manifest_key(id: &DocumentId) -> String {
        format!("manifests/{}.json", id)
    }

    pub async fn get_text(&self, id: &DocumentId) -> Result<String> {
        let bytes = self
            .blobs
            .get(&Self::text_key(id))
            .await?
            .ok_or_else(|| RagError::SourceNotFound(id.to_string()))?;
        String::from_utf8(bytes)
            .map_err(|_| RagError::Storage(format!("document {} is not valid UTF-8", id)))
    }

    pub async fn put_text(&self, id: &DocumentId, text: &str) -> Result<()> {
        self.blobs.put(&Self::text_key(id), text.as_bytes()).await
    }

    pub async fn has_text(&self, id: &DocumentId) -> Result<bool> {
        self.blobs.exists(&Self::text_key(id)).await
    }

    pub async fn get_index_blob(&self, id: &DocumentId, revision: &str) -> Result<Vec<u8>> {
        let key = Self::index_key(id, revision);
        self.blobs
            .get(&key)
            .await?
            .ok_or_else(|| RagError::IndexCorrupt(format!("manifest references missing {}", key)))
    }

    pub async fn put_index_blob(
        &self,
        id: &DocumentId,
        revision: &str,
        bytes: &[u8],
    ) -> Result<String> {
        let key = Self::index_key(id, revision);
        self.blobs.put(&key, bytes).await?;
        Ok(key)
    }

    pub async fn get_records_blob(&self, id: &DocumentId, revision: &str) -> Result<Vec<u8>> {
        let key = Self::records_key(id, revision);
        self.blobs
            .get(&key)
            .await?
            .ok_or_else(|| RagError::IndexCorrupt(format!("manifest references missing {}", key)))
    }

    pub async fn put_records_blob(
        &self,
        id: &DocumentId,
        revision: &str,
        records: &[ExtractedClauseRecord],
    ) -> Result<(String, Vec<u8>)> {
        let key = Self::records_key(id, revision);
        let bytes = serde_json::to_vec_pretty(records)?;
        self.blobs.put(&key, &bytes).await?;
        Ok((key, bytes))
    }

    /// Current manifest, or `None` when the document was never processed.
    pub async fn manifest(&self, id: &DocumentId) -> Result<Option<ClauseManifest>> {
        match self.blobs.get(&Self::manifest_key(id)).await? {
            Some(bytes) => {
                let manifest: ClauseManifest = serde_json::from_slice(&bytes)
                    .map_err(|e| RagError::IndexCorrupt(format!("manifest for {}: {}", id, e)))?;
                Ok(Some(manifest))
            }
            None => Ok(None),
        }
    }

    /// Single write that makes a revision visible.
    pub async fn commit_manifest(&self, manifest: &ClauseManifest) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(manifest)?;
        self.blobs
            .put(&Self::manifest_key(&manifest.document_id), &bytes)
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.delete(key).await
    }
}

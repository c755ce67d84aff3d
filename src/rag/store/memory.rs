use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::BlobStore;
use crate::error::{RagError, Result};

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .blobs
            .read()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

fn poisoned(e: impl std::fmt::Display) -> RagError {
    RagError::Storage(e.to_string())
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.read().map_err(poisoned)?;
        Ok(blobs.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.write().map_err(poisoned)?;
        blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let blobs = self.blobs.read().map_err(poisoned)?;
        Ok(blobs.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut blobs = self.blobs.write().map_err(poisoned)?;
        blobs.remove(key);
        Ok(())
    }
}

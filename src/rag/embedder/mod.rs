mod cache;
mod ollama;

pub use cache::CachedEmbedder;
pub use ollama::OllamaEmbedder;
pub(crate) use ollama::OllamaTagsResponse;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::error::Result;

/// Embedding backend. Implementations must be deterministic for a fixed model.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
    fn model_name(&self) -> &str;
    async fn health_check(&self) -> Result<()>;
}

pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let ollama: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(config)?);
    if config.cache_capacity == 0 {
        return Ok(ollama);
    }
    Ok(Arc::new(CachedEmbedder::new(ollama, config.cache_capacity)))
}

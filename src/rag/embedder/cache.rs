use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::Embedder;
use crate::error::{RagError, Result};
use crate::rag::types::sha256_hex;

#[derive(Default)]
struct CacheState {
    vectors: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

/// Bounded FIFO cache in front of another embedder, keyed by the SHA-256 of the input.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.vectors.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        let state = self.state.lock().ok()?;
        state.vectors.get(key).cloned()
    }

    fn store(&self, key: String, vector: &[f32]) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.vectors.contains_key(&key) {
            return;
        }
        while state.vectors.len() >= self.capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.vectors.remove(&oldest);
                }
                None => break,
            }
        }
        state.order.push_back(key.clone());
        state.vectors.insert(key, vector.to_vec());
    }
}

fn short_batch(expected: usize, received: usize) -> RagError {
    RagError::unavailable(
        "embedding",
        format!("expected {} embeddings, received {}", expected, received),
    )
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = sha256_hex(text.as_bytes());
        if let Some(vector) = self.lookup(&key) {
            return Ok(vector);
        }
        let vector = self.inner.embed(text).await?;
        self.store(key, &vector);
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<String> = texts.iter().map(|t| sha256_hex(t.as_bytes())).collect();
        let mut vectors: Vec<Option<Vec<f32>>> = keys.iter().map(|k| self.lookup(k)).collect();

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| vectors[i].is_none()).collect();
        if !missing.is_empty() {
            let inputs: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed_batch(&inputs).await?;
            if fresh.len() != missing.len() {
                return Err(short_batch(missing.len(), fresh.len()));
            }
            for (&i, vector) in missing.iter().zip(fresh) {
                self.store(keys[i].clone(), &vector);
                vectors[i] = Some(vector);
            }
        }

        vectors
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| short_batch(texts.len(), 0))
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn health_check(&self) -> Result<()> {
        self.inner.health_check().await
    }
}

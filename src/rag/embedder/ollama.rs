use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

const BACKEND: &str = "embedding";

pub struct OllamaEmbedder {
    endpoint: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
    timeout_secs: u64,
    client: Client,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    truncate: bool,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
pub(crate) struct OllamaTagsResponse {
    pub models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
pub(crate) struct OllamaModel {
    pub name: String,
}

impl OllamaTagsResponse {
    pub fn has_model(&self, model: &str) -> bool {
        self.models
            .iter()
            .any(|m| m.name == model || m.name == format!("{}:latest", model))
    }
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
            timeout_secs: config.timeout_secs,
            client,
        })
    }

    async fn embed_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
            truncate: true,
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::from_transport(BACKEND, &self.endpoint, self.timeout_secs, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 404 || body.contains("not found") {
                return Err(RagError::unavailable(
                    BACKEND,
                    format!(
                        "model '{}' not found. Pull it with: ollama pull {}",
                        self.model, self.model
                    ),
                ));
            }

            return Err(RagError::unavailable(
                BACKEND,
                format!("Ollama error ({}): {}", status, body),
            ));
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RagError::from_transport(BACKEND, &self.endpoint, self.timeout_secs, e))?;

        if embed_response.embeddings.len() != texts.len() {
            return Err(RagError::unavailable(
                BACKEND,
                format!(
                    "expected {} embeddings, received {}",
                    texts.len(),
                    embed_response.embeddings.len()
                ),
            ));
        }
        if let Some(bad) = embed_response
            .embeddings
            .iter()
            .find(|v| v.len() != self.dimensions)
        {
            return Err(RagError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.len(),
            });
        }

        Ok(embed_response.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_request(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| RagError::unavailable(BACKEND, "no embedding returned"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(model = %self.model, batch = batch.len(), "embedding batch");
            vectors.extend(self.embed_request(batch).await?);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.endpoint))
            .send()
            .await
            .map_err(|e| RagError::from_transport(BACKEND, &self.endpoint, self.timeout_secs, e))?;

        if !response.status().is_success() {
            return Err(RagError::unavailable(BACKEND, "Ollama health check failed"));
        }

        let tags: OllamaTagsResponse = response
            .json()
            .await
            .map_err(|e| RagError::from_transport(BACKEND, &self.endpoint, self.timeout_secs, e))?;

        if !tags.has_model(&self.model) {
            return Err(RagError::unavailable(
                BACKEND,
                format!(
                    "model '{}' not installed. Pull it with: ollama pull {}",
                    self.model, self.model
                ),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let config = EmbeddingConfig {
            endpoint: "http://ollama:11434/".to_string(),
            ..EmbeddingConfig::default()
        };
        let embedder = OllamaEmbedder::new(&config).unwrap();
        assert_eq!(embedder.endpoint, "http://ollama:11434");
        assert_eq!(embedder.model_name(), "all-minilm");
        assert_eq!(embedder.dimensions(), 384);
    }

    #[test]
    fn test_tags_model_matching() {
        let tags: OllamaTagsResponse = serde_json::from_str(
            r#"{"models":[{"name":"all-minilm:latest"},{"name":"llama3:8b"}]}"#,
        )
        .unwrap();

        assert!(tags.has_model("all-minilm"));
        assert!(tags.has_model("llama3:8b"));
        assert!(!tags.has_model("llama3"));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_request() {
        let config = EmbeddingConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            ..EmbeddingConfig::default()
        };
        let embedder = OllamaEmbedder::new(&config).unwrap();
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
    }

    fn embedder_at(addr: std::net::SocketAddr) -> OllamaEmbedder {
        let config = EmbeddingConfig {
            endpoint: format!("http://{}", addr),
            timeout_secs: 1,
            ..EmbeddingConfig::default()
        };
        OllamaEmbedder::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_silent_server_is_backend_timeout() {
        // Accepted by the kernel backlog, never answered.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let embedder = embedder_at(listener.local_addr().unwrap());

        let err = embedder.embed("late").await.unwrap_err();
        assert!(matches!(
            err,
            RagError::BackendTimeout {
                backend: "embedding",
                seconds: 1
            }
        ));
        assert_eq!(err.status_code(), 504);
        drop(listener);
    }

    #[tokio::test]
    async fn test_refused_connection_is_model_unavailable() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let embedder = embedder_at(addr);

        let err = embedder.embed("nobody home").await.unwrap_err();
        assert!(matches!(err, RagError::ModelUnavailable { .. }));
        assert_eq!(err.status_code(), 503);
    }
}

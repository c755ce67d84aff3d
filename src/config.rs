use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};

pub const CONFIG_FILE: &str = "clauselens.toml";
const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClauseLensConfig {
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = dirs::data_local_dir()
            .map(|dir| dir.join("clauselens"))
            .unwrap_or_else(|| PathBuf::from(".clauselens"));
        Self { root }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
    /// Number of query embeddings kept in memory; 0 disables the cache.
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_OLLAMA_ENDPOINT.to_string(),
            model: "all-minilm".to_string(),
            dimensions: 384,
            batch_size: 32,
            timeout_secs: 60,
            cache_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub answer_model: String,
    pub extraction_model: String,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_OLLAMA_ENDPOINT.to_string(),
            answer_model: "llama3:8b".to_string(),
            extraction_model: "llama3.2:3b-instruct-q4_0".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_tokens: 512 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub extraction_concurrency: usize,
    pub max_in_flight: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            extraction_concurrency: 4,
            max_in_flight: 8,
        }
    }
}

impl ClauseLensConfig {
    /// Load configuration from `path`, or from `./clauselens.toml` when no path
    /// is given and that file exists. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(CONFIG_FILE).exists() => Self::from_file(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            RagError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RagError::Config(e.to_string()))
    }

    fn apply_env(&mut self) {
        if let Ok(host) = env::var("OLLAMA_HOST") {
            if !host.trim().is_empty() {
                let endpoint = endpoint_from_host(&host);
                self.embedding.endpoint = endpoint.clone();
                self.generation.endpoint = endpoint;
            }
        }
        if let Ok(root) = env::var("CLAUSELENS_STORAGE") {
            if !root.trim().is_empty() {
                self.storage.root = PathBuf::from(root);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimensions == 0 {
            return Err(RagError::Config("embedding.dimensions must be > 0".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(RagError::Config("embedding.batch_size must be > 0".into()));
        }
        if self.chunking.max_tokens == 0 {
            return Err(RagError::Config("chunking.max_tokens must be > 0".into()));
        }
        if self.retrieval.extraction_concurrency == 0 || self.retrieval.max_in_flight == 0 {
            return Err(RagError::Config(
                "retrieval concurrency limits must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// `OLLAMA_HOST` is often given as `host:port`; default the scheme to http.
fn endpoint_from_host(host: &str) -> String {
    let host = host.trim();
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClauseLensConfig::default();
        assert_eq!(config.chunking.max_tokens, 512);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.embedding.dimensions, 384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ClauseLensConfig::from_toml(
            r#"
[embedding]
model = "nomic-embed-text"
dimensions = 768

[retrieval]
top_k = 5
"#,
        )
        .unwrap();

        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.embedding.dimensions, 768);
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.generation.answer_model, "llama3:8b");
    }

    #[test]
    fn test_invalid_toml() {
        let err = ClauseLensConfig::from_toml("[retrieval]\ntop_k = \"three\"").unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn test_ollama_host_without_scheme() {
        assert_eq!(endpoint_from_host("0.0.0.0:11434"), "http://0.0.0.0:11434");
        assert_eq!(endpoint_from_host(" ollama:11434 "), "http://ollama:11434");
        assert_eq!(
            endpoint_from_host("https://ollama.internal"),
            "https://ollama.internal"
        );
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = ClauseLensConfig::default();
        config.chunking.max_tokens = 0;
        assert!(config.validate().is_err());
    }
}

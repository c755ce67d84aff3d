mod ollama;

pub use ollama::OllamaGenerator;

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// A single chat-style generation call: one system instruction, one user message.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub format: ResponseFormat,
}

impl GenerationRequest {
    pub fn text(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            format: ResponseFormat::Text,
        }
    }

    pub fn json(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            format: ResponseFormat::Json,
            ..Self::text(system, user)
        }
    }
}

/// Generation backend. Output is returned verbatim.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
    fn model_name(&self) -> &str;
    async fn health_check(&self) -> Result<()>;
}

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{GenerationRequest, Generator, ResponseFormat};
use crate::config::GenerationConfig;
use crate::error::{RagError, Result};
use crate::rag::embedder::OllamaTagsResponse;

const BACKEND: &str = "generation";

pub struct OllamaGenerator {
    endpoint: String,
    model: String,
    timeout_secs: u64,
    client: Client,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig, model: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout_secs: config.timeout_secs,
            client,
        })
    }

    fn chat_request<'a>(&'a self, request: &'a GenerationRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            stream: false,
            format: match request.format {
                ResponseFormat::Json => Some("json"),
                ResponseFormat::Text => None,
            },
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        debug!(model = %self.model, format = ?request.format, "generation request");

        let response = self
            .client
            .post(format!("{}/api/chat", self.endpoint))
            .json(&self.chat_request(request))
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

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagError::from_transport(BACKEND, &self.endpoint, self.timeout_secs, e))?;
        Ok(chat.message.content)
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

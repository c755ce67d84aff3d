use thiserror::Error;

/// Errors surfaced by the retrieval pipeline and its collaborators.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("no extracted text found for document {0}")]
    SourceNotFound(String),

    #[error("no index found for document {0}; process the document first")]
    IndexNotFound(String),

    #[error("{backend} backend unavailable: {message}")]
    ModelUnavailable {
        backend: &'static str,
        message: String,
    },

    #[error("{backend} backend did not respond within {seconds}s")]
    BackendTimeout { backend: &'static str, seconds: u64 },

    #[error("extraction output is not a valid clause record: {0}")]
    ExtractionMalformed(String),

    #[error("index data is corrupt: {0}")]
    IndexCorrupt(String),

    #[error(
        "index was built with embedding model {indexed} but {configured} is configured; reprocess the document"
    )]
    EmbeddingModelMismatch { indexed: String, configured: String },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("pipeline is shutting down")]
    ShuttingDown,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;

impl RagError {
    pub(crate) fn unavailable(backend: &'static str, message: impl Into<String>) -> Self {
        RagError::ModelUnavailable {
            backend,
            message: message.into(),
        }
    }

    /// Classify a transport failure talking to a model backend.
    pub(crate) fn from_transport(
        backend: &'static str,
        endpoint: &str,
        timeout_secs: u64,
        err: reqwest::Error,
    ) -> Self {
        if err.is_timeout() {
            RagError::BackendTimeout {
                backend,
                seconds: timeout_secs,
            }
        } else if err.is_connect() {
            RagError::unavailable(
                backend,
                format!(
                    "cannot connect to Ollama at {}. Is Ollama running? Start it with `ollama serve`",
                    endpoint
                ),
            )
        } else {
            RagError::unavailable(backend, format!("request failed: {}", err))
        }
    }

    /// HTTP-equivalent status for callers that front the pipeline with a web layer.
    pub fn status_code(&self) -> u16 {
        match self {
            RagError::SourceNotFound(_) | RagError::IndexNotFound(_) => 404,
            RagError::ModelUnavailable { .. } | RagError::ShuttingDown => 503,
            RagError::BackendTimeout { .. } => 504,
            RagError::EmbeddingModelMismatch { .. } => 409,
            _ => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == 404
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Content-derived identity of a contract document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    const FINGERPRINT_LEN: usize = 32;

    /// Fingerprint raw document bytes. Identical bytes always map to the same id.
    pub fn fingerprint(bytes: &[u8]) -> Self {
        let digest = sha256_hex(bytes);
        Self(digest[..Self::FINGERPRINT_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
    pub position: usize,
    pub text: String,
}

/// A single nearest-neighbour result. `distance` is squared L2.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub position: usize,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DocumentState {
    Unprocessed,
    /// Indexed documents are queryable.
    Indexed {
        revision: String,
        clauses: usize,
        embedding_model: String,
        processed_at: DateTime<Utc>,
    },
}

impl DocumentState {
    pub fn is_queryable(&self) -> bool {
        matches!(self, DocumentState::Indexed { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub status: String,
    pub clauses_processed: usize,
    pub revision: String,
    pub repaired_records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub sources: Vec<SearchHit>,
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_stable() {
        let a = DocumentId::fingerprint(b"contract body");
        let b = DocumentId::fingerprint(b"contract body");
        let c = DocumentId::fingerprint(b"other body");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_value(DocumentState::Unprocessed).unwrap();
        assert_eq!(json["state"], "unprocessed");
        assert!(!DocumentState::Unprocessed.is_queryable());
    }
}

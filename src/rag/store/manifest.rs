use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::rag::types::{sha256_hex, DocumentId, DocumentState};

pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Commit record for one processing run. The index and records blobs it names
/// are written first; writing the manifest publishes them together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseManifest {
    pub format_version: u32,
    pub document_id: DocumentId,
    pub revision: String,
    pub embedding_model: String,
    pub dimensions: usize,
    pub clauses: usize,
    pub index_key: String,
    pub index_sha256: String,
    pub records_key: String,
    pub records_sha256: String,
    pub created_at: DateTime<Utc>,
}

impl ClauseManifest {
    pub fn state(&self) -> DocumentState {
        DocumentState::Indexed {
            revision: self.revision.clone(),
            clauses: self.clauses,
            embedding_model: self.embedding_model.clone(),
            processed_at: self.created_at,
        }
    }

    pub fn verify_index(&self, bytes: &[u8]) -> Result<()> {
        verify(&self.index_key, &self.index_sha256, bytes)
    }

    pub fn verify_records(&self, bytes: &[u8]) -> Result<()> {
        verify(&self.records_key, &self.records_sha256, bytes)
    }

    pub fn check_version(&self) -> Result<()> {
        if self.format_version != MANIFEST_FORMAT_VERSION {
            return Err(RagError::IndexCorrupt(format!(
                "unsupported manifest version {} for {}",
                self.format_version, self.document_id
            )));
        }
        Ok(())
    }
}

fn verify(key: &str, expected: &str, bytes: &[u8]) -> Result<()> {
    let actual = sha256_hex(bytes);
    if actual != expected {
        return Err(RagError::IndexCorrupt(format!(
            "{} hash mismatch (expected {}, got {})",
            key, expected, actual
        )));
    }
    Ok(())
}

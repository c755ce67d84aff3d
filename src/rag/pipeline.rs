//! Indexing and retrieval-augmented querying for a single contract at a time.
//!
//! Processing runs chunking, embedding, index build and clause extraction, then
//! publishes the result through a [`ClauseManifest`]: the index and records
//! blobs are written under a fresh revision and the manifest write commits
//! them. Readers only ever follow the manifest, so they never see a mixed set.

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::chunker::Chunker;
use super::embedder::{create_embedder, Embedder};
use super::extractor::{ClauseExtractor, ExtractedClauseRecord};
use super::generator::{GenerationRequest, Generator, OllamaGenerator};
use super::index::FlatIndex;
use super::store::{ClauseManifest, ContractStore, FsBlobStore, MANIFEST_FORMAT_VERSION};
use super::types::{
    sha256_hex, Clause, DocumentId, DocumentState, ProcessOutcome, QueryAnswer, SearchHit,
};
use crate::config::{ClauseLensConfig, RetrievalConfig};
use crate::error::{RagError, Result};

pub const ANSWER_SYSTEM_PROMPT: &str = "Answer based only on the following contract clauses:";

/// Model backends shared by every pipeline operation. Built once, then only read.
#[derive(Clone)]
pub struct Backends {
    pub embedder: Arc<dyn Embedder>,
    pub answerer: Arc<dyn Generator>,
    pub extractor: Arc<dyn Generator>,
}

pub struct BackendHealth {
    pub role: &'static str,
    pub model: String,
    pub result: Result<()>,
}

impl Backends {
    pub fn from_config(config: &ClauseLensConfig) -> Result<Self> {
        let generation = &config.generation;
        Ok(Self {
            embedder: create_embedder(&config.embedding)?,
            answerer: Arc::new(OllamaGenerator::new(generation, &generation.answer_model)?),
            extractor: Arc::new(OllamaGenerator::new(
                generation,
                &generation.extraction_model,
            )?),
        })
    }

    /// Probe every backend. All three are checked even when one fails.
    pub async fn health_check(&self) -> Vec<BackendHealth> {
        vec![
            BackendHealth {
                role: "embedding",
                model: self.embedder.model_name().to_string(),
                result: self.embedder.health_check().await,
            },
            BackendHealth {
                role: "answer",
                model: self.answerer.model_name().to_string(),
                result: self.answerer.health_check().await,
            },
            BackendHealth {
                role: "extraction",
                model: self.extractor.model_name().to_string(),
                result: self.extractor.health_check().await,
            },
        ]
    }
}

struct Committed {
    index: FlatIndex,
    records: Vec<ExtractedClauseRecord>,
}

pub struct RetrievalPipeline {
    store: ContractStore,
    backends: RwLock<Option<Backends>>,
    chunker: Chunker,
    top_k: usize,
    extraction_concurrency: usize,
    admission: Arc<Semaphore>,
    max_in_flight: u32,
    locks: Mutex<HashMap<DocumentId, Arc<AsyncMutex<()>>>>,
}

impl RetrievalPipeline {
    pub fn new(
        store: ContractStore,
        backends: Backends,
        chunker: Chunker,
        retrieval: &RetrievalConfig,
    ) -> Self {
        let max_in_flight = u32::try_from(retrieval.max_in_flight.max(1)).unwrap_or(u32::MAX);
        Self {
            store,
            backends: RwLock::new(Some(backends)),
            chunker,
            top_k: retrieval.top_k,
            extraction_concurrency: retrieval.extraction_concurrency.max(1),
            admission: Arc::new(Semaphore::new(max_in_flight as usize)),
            max_in_flight,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Filesystem storage plus Ollama backends, as described by `config`.
    pub fn from_config(config: &ClauseLensConfig) -> Result<Self> {
        let store = ContractStore::new(Arc::new(FsBlobStore::new(&config.storage.root)));
        let backends = Backends::from_config(config)?;
        let chunker = Chunker::from_tokens(config.chunking.max_tokens);
        Ok(Self::new(store, backends, chunker, &config.retrieval))
    }

    /// Shared handles to the model backends; `ShuttingDown` once released.
    pub fn backends(&self) -> Result<Backends> {
        self.backends
            .read()
            .map_err(|e| RagError::Storage(e.to_string()))?
            .clone()
            .ok_or(RagError::ShuttingDown)
    }

    pub fn store(&self) -> &ContractStore {
        &self.store
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Store already-extracted document text under its content fingerprint.
    pub async fn ingest_text(&self, text: &str) -> Result<DocumentId> {
        let _permit = self.admit().await?;
        let id = DocumentId::fingerprint(text.as_bytes());
        self.store.put_text(&id, text).await?;
        info!(document = %id, bytes = text.len(), "document ingested");
        Ok(id)
    }

    /// Chunk, embed, index and annotate a document, replacing any previous revision.
    pub async fn process(&self, id: &DocumentId) -> Result<ProcessOutcome> {
        let _permit = self.admit().await?;

        let lock = self.document_lock(id)?;
        let guard = lock.lock().await;
        let outcome = self.process_locked(id).await;
        drop(guard);
        self.release_lock(id, &lock);

        outcome
    }

    async fn process_locked(&self, id: &DocumentId) -> Result<ProcessOutcome> {
        let text = self.store.get_text(id).await?;
        info!(document = %id, bytes = text.len(), "processing document");

        let previous = match self.store.manifest(id).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(document = %id, error = %e, "previous manifest unreadable; replacing it");
                None
            }
        };

        let backends = self.backends()?;
        let clauses = self.chunker.chunk(&text);

        let embedder = &backends.embedder;
        let embeddings = if clauses.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<String> = clauses.iter().map(|c| c.text.clone()).collect();
            embedder.embed_batch(&texts).await?
        };
        if embeddings.len() != clauses.len() {
            return Err(RagError::unavailable(
                "embedding",
                format!(
                    "expected {} embeddings, received {}",
                    clauses.len(),
                    embeddings.len()
                ),
            ));
        }
        let index = FlatIndex::build(embedder.model_name(), embedder.dimensions(), embeddings)?;
        debug!(
            document = %id,
            rows = index.len(),
            dimensions = index.dimensions(),
            "index built"
        );

        let extractor = ClauseExtractor::new(backends.extractor.clone());
        let records = self.extract_all(&extractor, &clauses).await?;
        let repaired_records = records.iter().filter(|r| r.was_repaired()).count();

        let revision = Uuid::new_v4().to_string();
        let manifest = self.commit(id, &revision, &index, &records).await?;
        info!(
            document = %id,
            revision = %manifest.revision,
            clauses = manifest.clauses,
            repaired = repaired_records,
            "manifest committed"
        );

        if let Some(previous) = previous {
            self.discard_revision(&previous).await;
        }

        Ok(ProcessOutcome {
            status: "success".to_string(),
            clauses_processed: clauses.len(),
            revision,
            repaired_records,
        })
    }

    async fn extract_all(
        &self,
        extractor: &ClauseExtractor,
        clauses: &[Clause],
    ) -> Result<Vec<ExtractedClauseRecord>> {
        stream::iter(clauses.iter().map(|clause| extractor.extract_record(clause)))
            .buffered(self.extraction_concurrency)
            .try_collect()
            .await
    }

    async fn commit(
        &self,
        id: &DocumentId,
        revision: &str,
        index: &FlatIndex,
        records: &[ExtractedClauseRecord],
    ) -> Result<ClauseManifest> {
        let index_bytes = index.serialize();
        let index_key = self.store.put_index_blob(id, revision, &index_bytes).await?;

        let (records_key, records_bytes) =
            match self.store.put_records_blob(id, revision, records).await {
                Ok(written) => written,
                Err(e) => {
                    self.discard_keys(&[index_key]).await;
                    return Err(e);
                }
            };

        let manifest = ClauseManifest {
            format_version: MANIFEST_FORMAT_VERSION,
            document_id: id.clone(),
            revision: revision.to_string(),
            embedding_model: index.model().to_string(),
            dimensions: index.dimensions(),
            clauses: index.len(),
            index_sha256: sha256_hex(&index_bytes),
            index_key,
            records_sha256: sha256_hex(&records_bytes),
            records_key,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.commit_manifest(&manifest).await {
            self.discard_keys(&[manifest.index_key, manifest.records_key])
                .await;
            return Err(e);
        }
        Ok(manifest)
    }

    async fn discard_revision(&self, manifest: &ClauseManifest) {
        debug!(
            document = %manifest.document_id,
            revision = %manifest.revision,
            "discarding superseded revision"
        );
        self.discard_keys(&[manifest.index_key.clone(), manifest.records_key.clone()])
            .await;
    }

    async fn discard_keys(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.store.delete(key).await {
                warn!(key = %key, error = %e, "failed to delete blob");
            }
        }
    }

    /// Answer `question` from the document's top clauses using the configured `k`.
    pub async fn query(&self, id: &DocumentId, question: &str) -> Result<QueryAnswer> {
        self.query_with(id, question, self.top_k).await
    }

    pub async fn query_with(
        &self,
        id: &DocumentId,
        question: &str,
        k: usize,
    ) -> Result<QueryAnswer> {
        let _permit = self.admit().await?;
        let backends = self.backends()?;
        let committed = self.load_committed(id).await?;
        ensure_model(backends.embedder.as_ref(), &committed.index)?;

        let query = backends.embedder.embed(question).await?;
        let hits = committed.index.search(&query, k)?;
        let context = build_context(&committed.records, &hits)?;

        let request = GenerationRequest::text(
            ANSWER_SYSTEM_PROMPT,
            format!("{}\n\nQuestion: {}", context, question),
        );
        let answer = backends.answerer.generate(&request).await?;

        let positions: Vec<usize> = hits.iter().map(|h| h.position).collect();
        info!(document = %id, k, positions = ?positions, "query answered");

        Ok(QueryAnswer {
            answer,
            sources: hits,
        })
    }

    pub async fn status(&self, id: &DocumentId) -> Result<DocumentState> {
        if let Some(manifest) = self.store.manifest(id).await? {
            return Ok(manifest.state());
        }
        if self.store.has_text(id).await? {
            Ok(DocumentState::Unprocessed)
        } else {
            Err(RagError::SourceNotFound(id.to_string()))
        }
    }

    pub async fn records(&self, id: &DocumentId) -> Result<Vec<ExtractedClauseRecord>> {
        let _permit = self.admit().await?;
        Ok(self.load_committed(id).await?.records)
    }

    /// Wait for in-flight operations to finish, refuse new ones and release
    /// the pipeline's handles to the model backends.
    pub async fn shutdown(&self) {
        if let Ok(permits) = self.admission.acquire_many(self.max_in_flight).await {
            self.admission.close();
            drop(permits);
        }
        let released = match self.backends.write() {
            Ok(mut backends) => backends.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(released);
        debug!("pipeline shut down");
    }

    async fn admit(&self) -> Result<OwnedSemaphorePermit> {
        self.admission
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RagError::ShuttingDown)
    }

    fn document_lock(&self, id: &DocumentId) -> Result<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| RagError::Storage(e.to_string()))?;
        Ok(locks.entry(id.clone()).or_default().clone())
    }

    fn release_lock(&self, id: &DocumentId, lock: &Arc<AsyncMutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        // Only the map and this caller still hold it.
        if Arc::strong_count(lock) == 2 {
            locks.remove(id);
        }
    }

    async fn load_committed(&self, id: &DocumentId) -> Result<Committed> {
        let mut retried = false;
        loop {
            let manifest = self
                .store
                .manifest(id)
                .await?
                .ok_or_else(|| RagError::IndexNotFound(id.to_string()))?;

            match self.load_revision(manifest).await {
                Ok(committed) => return Ok(committed),
                Err(e) => {
                    // A concurrent reprocess may have superseded and collected this revision.
                    let current = self.store.manifest(id).await.ok().flatten();
                    let superseded = current.is_some_and(|m| m.revision != e.1);
                    if superseded && !retried {
                        retried = true;
                        continue;
                    }
                    return Err(e.0);
                }
            }
        }
    }

    async fn load_revision(
        &self,
        manifest: ClauseManifest,
    ) -> std::result::Result<Committed, (RagError, String)> {
        let revision = manifest.revision.clone();
        let with_revision = |e: RagError| (e, revision.clone());

        manifest.check_version().map_err(with_revision)?;
        let id = &manifest.document_id;

        let index_bytes = self
            .store
            .get_index_blob(id, &manifest.revision)
            .await
            .map_err(with_revision)?;
        manifest.verify_index(&index_bytes).map_err(with_revision)?;
        let index = FlatIndex::deserialize(&index_bytes).map_err(with_revision)?;

        let records_bytes = self
            .store
            .get_records_blob(id, &manifest.revision)
            .await
            .map_err(with_revision)?;
        manifest.verify_records(&records_bytes).map_err(with_revision)?;
        let records: Vec<ExtractedClauseRecord> = serde_json::from_slice(&records_bytes)
            .map_err(|e| with_revision(RagError::IndexCorrupt(format!("records: {}", e))))?;

        if index.len() != records.len() || index.len() != manifest.clauses {
            return Err(with_revision(RagError::IndexCorrupt(format!(
                "revision {} has {} vectors for {} clauses",
                manifest.revision,
                index.len(),
                records.len()
            ))));
        }

        Ok(Committed { index, records })
    }
}

fn ensure_model(embedder: &dyn Embedder, index: &FlatIndex) -> Result<()> {
    if index.model() != embedder.model_name() || index.dimensions() != embedder.dimensions() {
        return Err(RagError::EmbeddingModelMismatch {
            indexed: format!("{} ({}d)", index.model(), index.dimensions()),
            configured: format!("{} ({}d)", embedder.model_name(), embedder.dimensions()),
        });
    }
    Ok(())
}

/// Join retrieved clause texts in rank order, one per line.
pub fn build_context(records: &[ExtractedClauseRecord], hits: &[SearchHit]) -> Result<String> {
    let texts = hits
        .iter()
        .map(|hit| {
            records
                .get(hit.position)
                .map(|r| r.clause.as_str())
                .ok_or_else(|| {
                    RagError::IndexCorrupt(format!("no clause at position {}", hit.position))
                })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(texts.join("\n"))
}

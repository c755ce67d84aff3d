use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use clauselens::config::RetrievalConfig;
use clauselens::rag::pipeline::ANSWER_SYSTEM_PROMPT;
use clauselens::rag::{
    Backends, BlobStore, Chunker, ContractStore, DocumentId, DocumentState, Embedder,
    GenerationRequest, Generator, MemoryBlobStore, RetrievalPipeline,
};
use clauselens::{RagError, Result};

const CONTRACT: &str = "1. Payment. Pay within 30 days.\n2. Confidentiality. Keep secrets.";

const RECORD: &str = r#"{
    "clause_type": "Payment Terms",
    "parties_involved": ["Client"],
    "summary": "Pay within 30 days.",
    "biased_toward": "Neutral",
    "risks": [],
    "obligations": ["Pay within 30 days"],
    "duration": "30 days",
    "is_termination_clause": false,
    "is_confidentiality_clause": false
}"#;

/// Bag-of-keywords embedder: one dimension per keyword plus a constant bias.
struct KeywordEmbedder {
    model: &'static str,
}

const KEYWORDS: [&str; 5] = ["payment", "pay", "days", "confidential", "secret"];

impl KeywordEmbedder {
    fn vector(text: &str) -> Vec<f32> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();

        let mut vector: Vec<f32> = KEYWORDS
            .iter()
            .map(|k| words.iter().filter(|w| w.contains(k)).count() as f32)
            .collect();
        vector.push(1.0);

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        vector.iter().map(|v| v / norm).collect()
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        KEYWORDS.len() + 1
    }

    fn model_name(&self) -> &str {
        self.model
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Returns a fixed reply and remembers every request it received.
struct RecordingGenerator {
    reply: String,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl RecordingGenerator {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.reply.clone())
    }

    fn model_name(&self) -> &str {
        "recording"
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Embeds like `KeywordEmbedder` but returns one vector fewer than asked for.
struct ShortEmbedder;

#[async_trait]
impl Embedder for ShortEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(KeywordEmbedder::vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let keep = texts.len().saturating_sub(1);
        Ok(texts[..keep].iter().map(|t| KeywordEmbedder::vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        KEYWORDS.len() + 1
    }

    fn model_name(&self) -> &str {
        "keywords"
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::ModelUnavailable {
            backend: "embedding",
            message: "connection refused".into(),
        })
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::ModelUnavailable {
            backend: "embedding",
            message: "connection refused".into(),
        })
    }

    fn dimensions(&self) -> usize {
        KEYWORDS.len() + 1
    }

    fn model_name(&self) -> &str {
        "keywords"
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

struct StalledGenerator;

#[async_trait]
impl Generator for StalledGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        Err(RagError::BackendTimeout {
            backend: "generation",
            seconds: 120,
        })
    }

    fn model_name(&self) -> &str {
        "stalled"
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

struct Harness {
    blobs: Arc<MemoryBlobStore>,
    answerer: Arc<RecordingGenerator>,
    extractor: Arc<RecordingGenerator>,
    pipeline: RetrievalPipeline,
}

fn harness_with(blobs: Arc<MemoryBlobStore>, model: &'static str, extraction: &str) -> Harness {
    let answerer = RecordingGenerator::new("Within 30 days.");
    let extractor = RecordingGenerator::new(extraction);
    let backends = Backends {
        embedder: Arc::new(KeywordEmbedder { model }),
        answerer: answerer.clone(),
        extractor: extractor.clone(),
    };
    let pipeline = pipeline_over(blobs.clone(), backends);

    Harness {
        blobs,
        answerer,
        extractor,
        pipeline,
    }
}

fn pipeline_over(blobs: Arc<MemoryBlobStore>, backends: Backends) -> RetrievalPipeline {
    RetrievalPipeline::new(
        ContractStore::new(blobs),
        backends,
        Chunker::from_tokens(512),
        &RetrievalConfig::default(),
    )
}

fn harness() -> Harness {
    harness_with(Arc::new(MemoryBlobStore::new()), "keywords", RECORD)
}

fn keys_with_prefix(blobs: &MemoryBlobStore, prefix: &str) -> Vec<String> {
    blobs
        .keys()
        .into_iter()
        .filter(|k| k.starts_with(prefix))
        .collect()
}

#[tokio::test]
async fn test_end_to_end_payment_question() {
    let h = harness();

    let id = h.pipeline.ingest_text(CONTRACT).await.unwrap();
    assert_eq!(id, DocumentId::fingerprint(CONTRACT.as_bytes()));

    let outcome = h.pipeline.process(&id).await.unwrap();
    assert_eq!(outcome.status, "success");
    assert_eq!(outcome.clauses_processed, 2);
    assert_eq!(outcome.repaired_records, 0);

    let records = h.pipeline.records(&id).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].clause, "1. Payment. Pay within 30 days.");
    assert_eq!(records[1].clause, "2. Confidentiality. Keep secrets.");
    assert_eq!(h.extractor.requests().len(), 2);

    let answer = h
        .pipeline
        .query_with(&id, "When must payment occur?", 1)
        .await
        .unwrap();
    assert_eq!(answer.answer, "Within 30 days.");
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].position, 0);

    let requests = h.answerer.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].system, ANSWER_SYSTEM_PROMPT);
    assert_eq!(
        requests[0].user,
        "1. Payment. Pay within 30 days.\n\nQuestion: When must payment occur?"
    );
}

#[tokio::test]
async fn test_default_k_keeps_rank_order() {
    let h = harness();
    let id = h.pipeline.ingest_text(CONTRACT).await.unwrap();
    h.pipeline.process(&id).await.unwrap();

    let answer = h.pipeline.query(&id, "Keep what secret?").await.unwrap();

    // Default k is larger than the document, so every clause comes back.
    let positions: Vec<usize> = answer.sources.iter().map(|s| s.position).collect();
    assert_eq!(positions, vec![1, 0]);
    assert!(answer.sources[0].distance <= answer.sources[1].distance);
    assert!(h.answerer.requests()[0]
        .user
        .starts_with("2. Confidentiality. Keep secrets.\n1. Payment."));
}

#[tokio::test]
async fn test_query_before_process_is_index_not_found() {
    let h = harness();
    let id = h.pipeline.ingest_text(CONTRACT).await.unwrap();

    let err = h.pipeline.query(&id, "anything").await.unwrap_err();
    assert!(matches!(err, RagError::IndexNotFound(_)));
    assert_eq!(err.status_code(), 404);
    assert!(h.answerer.requests().is_empty());

    let err = h
        .pipeline
        .query(&DocumentId::from("never-seen"), "anything")
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::IndexNotFound(_)));
}

#[tokio::test]
async fn test_process_without_text_is_source_not_found() {
    let h = harness();

    let err = h
        .pipeline
        .process(&DocumentId::from("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::SourceNotFound(_)));
    assert!(h.blobs.keys().is_empty());
}

#[tokio::test]
async fn test_status_transitions() {
    let h = harness();

    let err = h
        .pipeline
        .status(&DocumentId::from("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::SourceNotFound(_)));

    let id = h.pipeline.ingest_text(CONTRACT).await.unwrap();
    assert_eq!(
        h.pipeline.status(&id).await.unwrap(),
        DocumentState::Unprocessed
    );

    let outcome = h.pipeline.process(&id).await.unwrap();
    match h.pipeline.status(&id).await.unwrap() {
        DocumentState::Indexed {
            revision,
            clauses,
            embedding_model,
            ..
        } => {
            assert_eq!(revision, outcome.revision);
            assert_eq!(clauses, 2);
            assert_eq!(embedding_model, "keywords");
        }
        other => panic!("unexpected state {:?}", other),
    }
}

#[tokio::test]
async fn test_reprocess_replaces_previous_revision() {
    let h = harness();
    let id = h.pipeline.ingest_text(CONTRACT).await.unwrap();

    let first = h.pipeline.process(&id).await.unwrap();
    let second = h.pipeline.process(&id).await.unwrap();
    assert_ne!(first.revision, second.revision);

    let indexes = keys_with_prefix(&h.blobs, "indexes/");
    let records = keys_with_prefix(&h.blobs, "records/");
    assert_eq!(indexes.len(), 1);
    assert_eq!(records.len(), 1);
    assert!(indexes[0].contains(&second.revision));
    assert!(records[0].contains(&second.revision));

    assert_eq!(h.pipeline.records(&id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_concurrent_process_of_same_document() {
    let h = harness();
    let id = h.pipeline.ingest_text(CONTRACT).await.unwrap();

    let (a, b) = tokio::join!(h.pipeline.process(&id), h.pipeline.process(&id));
    let (a, b) = (a.unwrap(), b.unwrap());

    let current = match h.pipeline.status(&id).await.unwrap() {
        DocumentState::Indexed { revision, .. } => revision,
        other => panic!("unexpected state {:?}", other),
    };
    assert!(current == a.revision || current == b.revision);
    assert_eq!(keys_with_prefix(&h.blobs, "indexes/").len(), 1);
    assert_eq!(h.pipeline.query(&id, "payment").await.unwrap().sources.len(), 2);
}

#[tokio::test]
async fn test_malformed_extraction_is_repaired_not_fatal() {
    let h = harness_with(
        Arc::new(MemoryBlobStore::new()),
        "keywords",
        "I cannot produce JSON for this clause.",
    );
    let id = h.pipeline.ingest_text(CONTRACT).await.unwrap();

    let outcome = h.pipeline.process(&id).await.unwrap();
    assert_eq!(outcome.clauses_processed, 2);
    assert_eq!(outcome.repaired_records, 2);

    let records = h.pipeline.records(&id).await.unwrap();
    assert!(records.iter().all(|r| r.repaired_fields.len() == 9));
    assert_eq!(records[0].annotation.duration, None);
    assert!(!records[0].annotation.is_termination_clause);
}

#[tokio::test]
async fn test_embedding_model_change_is_rejected() {
    let blobs = Arc::new(MemoryBlobStore::new());
    let original = harness_with(blobs.clone(), "keywords", RECORD);
    let id = original.pipeline.ingest_text(CONTRACT).await.unwrap();
    original.pipeline.process(&id).await.unwrap();

    let upgraded = harness_with(blobs, "keywords-v2", RECORD);
    let err = upgraded.pipeline.query(&id, "payment").await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingModelMismatch { .. }));
    assert_eq!(err.status_code(), 409);

    upgraded.pipeline.process(&id).await.unwrap();
    assert!(upgraded.pipeline.query(&id, "payment").await.is_ok());
}

#[tokio::test]
async fn test_tampered_index_is_corrupt() {
    let h = harness();
    let id = h.pipeline.ingest_text(CONTRACT).await.unwrap();
    h.pipeline.process(&id).await.unwrap();

    let key = keys_with_prefix(&h.blobs, "indexes/").remove(0);
    let mut bytes = h.blobs.get(&key).await.unwrap().unwrap();
    let last = bytes.len() - 40;
    bytes[last] ^= 0xff;
    h.blobs.put(&key, &bytes).await.unwrap();

    let err = h.pipeline.query(&id, "payment").await.unwrap_err();
    assert!(matches!(err, RagError::IndexCorrupt(_)));
}

#[tokio::test]
async fn test_empty_document_processes_to_empty_index() {
    let h = harness();
    let id = h.pipeline.ingest_text("   \n\n  ").await.unwrap();

    let outcome = h.pipeline.process(&id).await.unwrap();
    assert_eq!(outcome.clauses_processed, 0);
    assert!(h.pipeline.records(&id).await.unwrap().is_empty());

    let answer = h.pipeline.query(&id, "anything?").await.unwrap();
    assert!(answer.sources.is_empty());
    assert!(h.extractor.requests().is_empty());
}

/// Process once successfully, then reprocess with `backends` and expect `check` to
/// match the failure. The first revision must stay committed and queryable.
async fn assert_failed_reprocess_keeps_revision(
    backends: impl FnOnce(&Harness) -> Backends,
    check: impl FnOnce(&RagError) -> bool,
) {
    let h = harness();
    let id = h.pipeline.ingest_text(CONTRACT).await.unwrap();
    let first = h.pipeline.process(&id).await.unwrap();
    let keys_before = h.blobs.keys();

    let failing = pipeline_over(h.blobs.clone(), backends(&h));
    let err = failing.process(&id).await.unwrap_err();
    assert!(check(&err), "unexpected error {:?}", err);

    assert_eq!(h.blobs.keys(), keys_before);
    match h.pipeline.status(&id).await.unwrap() {
        DocumentState::Indexed { revision, .. } => assert_eq!(revision, first.revision),
        other => panic!("unexpected state {:?}", other),
    }
    let answer = h.pipeline.query_with(&id, "payment", 1).await.unwrap();
    assert_eq!(answer.sources[0].position, 0);
}

#[tokio::test]
async fn test_short_embedding_batch_aborts_process() {
    assert_failed_reprocess_keeps_revision(
        |h| Backends {
            embedder: Arc::new(ShortEmbedder),
            answerer: h.answerer.clone(),
            extractor: h.extractor.clone(),
        },
        |e| matches!(e, RagError::ModelUnavailable { .. }),
    )
    .await;
}

#[tokio::test]
async fn test_embedding_outage_aborts_process() {
    assert_failed_reprocess_keeps_revision(
        |h| Backends {
            embedder: Arc::new(DownEmbedder),
            answerer: h.answerer.clone(),
            extractor: h.extractor.clone(),
        },
        |e| e.status_code() == 503,
    )
    .await;
}

#[tokio::test]
async fn test_extraction_timeout_aborts_process() {
    assert_failed_reprocess_keeps_revision(
        |h| Backends {
            embedder: Arc::new(KeywordEmbedder { model: "keywords" }),
            answerer: h.answerer.clone(),
            extractor: Arc::new(StalledGenerator),
        },
        |e| matches!(e, RagError::BackendTimeout { .. }) && e.status_code() == 504,
    )
    .await;
}

#[tokio::test]
async fn test_first_process_failure_writes_nothing() {
    let blobs = Arc::new(MemoryBlobStore::new());
    let pipeline = pipeline_over(
        blobs.clone(),
        Backends {
            embedder: Arc::new(ShortEmbedder),
            answerer: RecordingGenerator::new("unused"),
            extractor: RecordingGenerator::new(RECORD),
        },
    );
    let id = pipeline.ingest_text(CONTRACT).await.unwrap();

    assert!(pipeline.process(&id).await.is_err());
    assert_eq!(blobs.keys(), vec![ContractStore::text_key(&id)]);
    assert_eq!(pipeline.status(&id).await.unwrap(), DocumentState::Unprocessed);
}

#[tokio::test]
async fn test_shutdown_refuses_new_work_and_releases_backends() {
    let h = harness();
    assert_eq!(Arc::strong_count(&h.answerer), 2);

    h.pipeline.shutdown().await;

    let err = h.pipeline.ingest_text(CONTRACT).await.unwrap_err();
    assert!(matches!(err, RagError::ShuttingDown));
    assert!(matches!(h.pipeline.backends(), Err(RagError::ShuttingDown)));
    assert_eq!(Arc::strong_count(&h.answerer), 1);
    assert_eq!(Arc::strong_count(&h.extractor), 1);
}

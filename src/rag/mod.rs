pub mod chunker;
pub mod embedder;
pub mod extractor;
pub mod generator;
pub mod index;
pub mod pipeline;
pub mod store;
pub mod types;

pub use chunker::{count_tokens, Chunker, ClauseSegmenter, SegmentationPass, Segmenter};
pub use embedder::{create_embedder, CachedEmbedder, Embedder, OllamaEmbedder};
pub use extractor::{Bias, ClauseAnnotation, ClauseExtractor, ExtractedClauseRecord};
pub use generator::{GenerationRequest, Generator, OllamaGenerator, ResponseFormat};
pub use index::FlatIndex;
pub use pipeline::{BackendHealth, Backends, RetrievalPipeline};
pub use store::{BlobStore, ClauseManifest, ContractStore, FsBlobStore, MemoryBlobStore};
pub use types::{
    Clause, DocumentId, DocumentState, ProcessOutcome, QueryAnswer, SearchHit,
};

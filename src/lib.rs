pub mod cli;
pub mod config;
pub mod error;
pub mod rag;

pub use config::ClauseLensConfig;
pub use error::{RagError, Result};
pub use rag::{DocumentId, RetrievalPipeline};

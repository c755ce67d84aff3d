use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "clauselens",
    version,
    about = "Index contracts clause by clause and answer questions grounded in them"
)]
pub struct Args {
    /// Configuration file (defaults to ./clauselens.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Storage root for documents, indexes and records
    #[arg(long, global = true)]
    pub storage: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store an extracted contract text file and print its document id
    Ingest {
        /// Plain-text contract file
        file: PathBuf,
    },

    /// Segment, embed, index and annotate a document
    Process {
        /// Document id printed by `ingest`
        id: String,
    },

    /// Ask a question answered only from the document's clauses
    Query {
        id: String,
        question: String,

        /// Number of clauses to retrieve (defaults to retrieval.top_k)
        #[arg(short = 'k', long = "top-k")]
        k: Option<usize>,

        /// Print the answer and sources as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show whether a document has been processed
    Status {
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Show the extracted clause records of a processed document
    Records {
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Check that the embedding and generation backends are reachable
    Check,
}

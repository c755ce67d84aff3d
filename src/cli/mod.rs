mod args;
mod check;
mod document;
mod output;
mod query;

pub use args::{Args, Command};
pub use check::run_check;
pub use document::{run_ingest, run_process, run_records, run_status};
pub use query::run_query;

use anyhow::Result;

use crate::config::ClauseLensConfig;
use crate::rag::RetrievalPipeline;

/// Resolve configuration, build the pipeline once and dispatch the subcommand.
pub async fn run(args: Args) -> Result<()> {
    let mut config = ClauseLensConfig::load(args.config.as_deref())?;
    if let Some(storage) = args.storage {
        config.storage.root = storage;
    }

    let pipeline = RetrievalPipeline::from_config(&config)?;

    let result = match args.command {
        Command::Ingest { file } => run_ingest(&pipeline, &file).await,
        Command::Process { id } => run_process(&pipeline, &id).await,
        Command::Query {
            id,
            question,
            k,
            json,
        } => run_query(&pipeline, &id, &question, k, json).await,
        Command::Status { id, json } => run_status(&pipeline, &id, json).await,
        Command::Records { id, json } => run_records(&pipeline, &id, json).await,
        Command::Check => run_check(&pipeline).await,
    };

    pipeline.shutdown().await;
    result
}

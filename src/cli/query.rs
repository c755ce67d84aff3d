use anyhow::Result;
use console::style;

use super::output::{spinner, ANSWER};
use crate::rag::{DocumentId, RetrievalPipeline};

pub async fn run_query(
    pipeline: &RetrievalPipeline,
    id: &str,
    question: &str,
    k: Option<usize>,
    json: bool,
) -> Result<()> {
    let id = DocumentId::from(id);
    let k = k.unwrap_or_else(|| pipeline.top_k());

    let pb = spinner(format!("Asking {}...", id));
    let answer = pipeline.query_with(&id, question, k).await;
    pb.finish_and_clear();
    let answer = answer?;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("\n{}{}\n", ANSWER, style(question).yellow().bold());
    println!("{}", answer.answer);

    if !answer.sources.is_empty() {
        println!("\n{}", style("Sources:").dim());
        for (rank, hit) in answer.sources.iter().enumerate() {
            println!(
                "  {}. clause {} {}",
                style(rank + 1).dim(),
                style(hit.position).green(),
                style(format!("(distance {:.4})", hit.distance)).dim()
            );
        }
    }
    Ok(())
}

use anyhow::{Context, Result};
use console::style;
use std::fs;
use std::path::Path;

use super::output::{preview, spinner, CLAUSE, INFO, SUCCESS};
use crate::rag::{DocumentId, DocumentState, RetrievalPipeline};

pub async fn run_ingest(pipeline: &RetrievalPipeline, file: &Path) -> Result<()> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let id = pipeline.ingest_text(&text).await?;

    println!("{}", id);
    eprintln!(
        "{}Ingested {} ({} bytes). Next: clauselens process {}",
        SUCCESS,
        style(file.display()).green(),
        text.len(),
        id
    );
    Ok(())
}

pub async fn run_process(pipeline: &RetrievalPipeline, id: &str) -> Result<()> {
    let id = DocumentId::from(id);

    let pb = spinner(format!("Processing {}...", id));
    let outcome = pipeline.process(&id).await;
    pb.finish_and_clear();
    let outcome = outcome?;

    println!("\n{}Processing complete!\n", SUCCESS);
    println!("  Document:          {}", style(&id).cyan());
    println!("  Clauses processed: {}", style(outcome.clauses_processed).green());
    println!("  Revision:          {}", style(&outcome.revision).dim());
    if outcome.repaired_records > 0 {
        println!(
            "  Repaired records:  {} (malformed extraction output, defaults applied)",
            style(outcome.repaired_records).yellow()
        );
    }
    Ok(())
}

pub async fn run_status(pipeline: &RetrievalPipeline, id: &str, json: bool) -> Result<()> {
    let id = DocumentId::from(id);
    let state = pipeline.status(&id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("\n{}Document {}\n", INFO, style(&id).cyan());
    match state {
        DocumentState::Unprocessed => {
            println!("  State:           {}", style("unprocessed").yellow());
            println!("Run `clauselens process {}` to index it.", id);
        }
        DocumentState::Indexed {
            revision,
            clauses,
            embedding_model,
            processed_at,
        } => {
            println!("  State:           {}", style("indexed").green());
            println!("  Clauses:         {}", style(clauses).cyan());
            println!("  Embedding model: {}", embedding_model);
            println!("  Revision:        {}", style(revision).dim());
            println!(
                "  Processed at:    {}",
                style(processed_at.format("%Y-%m-%d %H:%M:%S")).dim()
            );
        }
    }
    Ok(())
}

pub async fn run_records(pipeline: &RetrievalPipeline, id: &str, json: bool) -> Result<()> {
    let id = DocumentId::from(id);
    let records = pipeline.records(&id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No clauses recorded for {}", style(&id).italic());
        return Ok(());
    }

    for record in &records {
        let annotation = &record.annotation;
        println!(
            "{}{}. {} {}",
            CLAUSE,
            style(record.position).dim(),
            style(&annotation.clause_type).green().bold(),
            style(format!("[{:?}]", annotation.biased_toward)).dim()
        );
        println!("   {}", style(preview(&record.clause, 160)).dim());
        if !annotation.summary.is_empty() {
            println!("   Summary: {}", annotation.summary);
        }
        if !annotation.parties_involved.is_empty() {
            println!("   Parties: {}", annotation.parties_involved.join(", "));
        }
        for obligation in &annotation.obligations {
            println!("   - {}", obligation);
        }
        for risk in &annotation.risks {
            println!("   ! {}", style(risk).yellow());
        }
        if let Some(duration) = &annotation.duration {
            println!("   Duration: {}", duration);
        }
        let mut flags = Vec::new();
        if annotation.is_termination_clause {
            flags.push("termination");
        }
        if annotation.is_confidentiality_clause {
            flags.push("confidentiality");
        }
        if !flags.is_empty() {
            println!("   Flags: {}", style(flags.join(", ")).cyan());
        }
        if record.was_repaired() {
            println!(
                "   {}",
                style(format!("defaults applied: {}", record.repaired_fields.join(", "))).red()
            );
        }
        println!();
    }
    Ok(())
}

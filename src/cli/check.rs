use anyhow::Result;
use console::style;

use super::output::{print_failed, print_ok, INFO};
use crate::rag::RetrievalPipeline;

pub async fn run_check(pipeline: &RetrievalPipeline) -> Result<()> {
    println!("{}Checking backends...\n", INFO);

    let report = pipeline.backends()?.health_check().await;
    let mut failed = 0;
    for health in &report {
        let label = format!("{:<10} {}", health.role, style(&health.model).cyan());
        match &health.result {
            Ok(()) => print_ok(&label),
            Err(e) => {
                failed += 1;
                print_failed(&format!("{}: {}", label, style(e).red()));
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} backends unavailable", failed, report.len());
    }
    Ok(())
}

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use clauselens::cli::{self, Args};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    cli::run(args).await
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "clauselens=debug"
    } else {
        "clauselens=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

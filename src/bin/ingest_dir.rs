use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use rustyknowledge::{
    config,
    docs_loader::{LoadScope, load_directory},
    logging,
    service::KnowledgeService,
};

#[derive(Parser)]
#[command(
    name = "ingest-dir",
    about = "Load every supported document below a directory into the knowledge store"
)]
struct Cli {
    /// Directory to load; defaults to KNOWLEDGE_PATH.
    #[arg(long)]
    path: Option<PathBuf>,
    /// World scope attached to every document.
    #[arg(long)]
    world_id: Option<String>,
    /// Room scope attached to every document.
    #[arg(long)]
    room_id: Option<String>,
    /// Entity scope attached to every document.
    #[arg(long)]
    entity_id: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config().context("failed to load configuration")?;
    logging::init_tracing();

    let root = cli
        .path
        .or_else(|| config.knowledge_path.clone().map(PathBuf::from))
        .ok_or_else(|| anyhow!("pass --path or set KNOWLEDGE_PATH"))?;

    let service = KnowledgeService::from_config(&config)
        .await
        .context("failed to initialize knowledge service")?;
    let scope = LoadScope {
        world_id: cli.world_id,
        room_id: cli.room_id,
        entity_id: cli.entity_id,
    };

    let summary = load_directory(&service, &root, &scope)
        .await
        .with_context(|| format!("failed to load {}", root.display()))?;

    println!(
        "ingested {} document(s) ({} fragment(s)), {} already stored, {} skipped, {} failed",
        summary.ingested,
        summary.fragments,
        summary.deduplicated,
        summary.skipped.len(),
        summary.failed.len()
    );
    for (path, reason) in &summary.failed {
        println!("  failed: {} ({reason})", path.display());
    }
    Ok(())
}

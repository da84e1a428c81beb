//! PIS pipeline - main entry point

use anyhow::Context;
use clap::Parser;
use pis_common::logging::{init_logging, LogConfig};
use pis_pipeline::commands::Pipeline;
use pis_pipeline::store::PgGraphStore;
use pis_pipeline::{Cli, Commands, PipelineConfig, StageReport};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env().unwrap_or_default();
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Warning: logging disabled: {:#}", e);
    }

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> anyhow::Result<()> {
    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?
        .with_limit_execution(cli.limit);

    let store = PgGraphStore::connect(&config)
        .await
        .context("Failed to connect to the database")?;

    if let Commands::Migrate = cli.command {
        store.migrate().await.context("Failed to run migrations")?;
        info!("Migrations applied");
        return Ok(());
    }

    let constants = config
        .load_constants()
        .context("Failed to load constants")?;

    let pipeline = Pipeline::new(config, constants, Arc::new(store))?;

    let reports: Vec<StageReport> = match &cli.command {
        Commands::Accessions { csv } => vec![pipeline.accessions(csv.clone()).await?],
        Commands::Uniprot => vec![pipeline.uniprot().await?],
        Commands::Pdb => vec![pipeline.pdb().await?],
        Commands::EmbedSequences => vec![pipeline.embed_sequences().await?],
        Commands::Embed3di => vec![pipeline.embed_3di().await?],
        Commands::Run => pipeline.run_all().await?,
        Commands::Migrate => Vec::new(),
    };

    for report in &reports {
        println!("{}", serde_json::to_string_pretty(report)?);
    }

    Ok(())
}

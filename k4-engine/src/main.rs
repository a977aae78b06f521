//! k4-engine - run one configured stage sequence over a ciphertext
//!
//! Startup order:
//! 1. Locate the run config (argument → K4_CONFIG → ./k4.toml → platform dir)
//! 2. Initialize logging from its [logging] section
//! 3. Load static language resources (fatal if missing or malformed)
//! 4. Run the pipeline and write artifacts

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use k4_common::config::{resolve_config_path, CONFIG_ENV_VAR};
use k4_common::LanguageResources;
use k4_engine::config::load_settings;
use k4_engine::{run_and_record, ArtifactStore};
use tracing::info;

/// Command-line arguments for k4-engine
#[derive(Parser, Debug)]
#[command(name = "k4-engine")]
#[command(about = "Multi-stage cipher hypothesis search")]
#[command(version)]
struct Args {
    /// Run configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the worker thread count (0 = one per CPU)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Override the artifact root folder
    #[arg(long)]
    artifact_root: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR)?;
    let mut settings = load_settings(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    k4_common::logging::init(&settings.logging)?;

    info!("Starting k4-engine");
    info!(
        "Version: {} (git {}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );
    info!("Config: {}", config_path.display());

    if let Some(workers) = args.workers {
        settings.pipeline.workers = workers;
    }
    let artifact_root = args.artifact_root.unwrap_or(settings.artifact_root);

    let resources = Arc::new(
        LanguageResources::load(&settings.resources).context("Failed to load language resources")?,
    );
    let store = ArtifactStore::new(artifact_root);

    let (outcome, paths) = run_and_record(&settings.ciphertext, settings.pipeline, resources, &store)?;

    for stage in &outcome.stages {
        info!(
            stage = %stage.stage_name,
            attempts = stage.metadata.attempts,
            kept = stage.metadata.kept,
            pruned = stage.metadata.pruned,
            rejected = stage.metadata.rejected,
            truncated = stage.metadata.truncated,
            elapsed_ms = stage.metadata.elapsed_ms,
            "Stage summary"
        );
    }
    match outcome.best() {
        Some(best) => info!(
            fused_score = best.fused_score,
            text = %best.candidate.text,
            "Best candidate"
        ),
        None => info!("Search exhausted: no candidates survived"),
    }
    info!("Run {}: artifacts in {}", outcome.run_id.short(), paths.run_dir.display());

    Ok(())
}

//! Run configuration for the k4-engine binary
//!
//! One TOML file describes a complete run:
//!
//! ```toml
//! ciphertext = "OBKRUOXOGHULBSOLIFBB..."   # or ciphertext_file = "k4.txt"
//!
//! [logging]
//! level = "info"
//!
//! [resources]
//! quadgrams = "tables/quadgrams.txt"
//! wordlist = "tables/words.txt"
//!
//! [artifacts]
//! root = "runs"
//!
//! [pipeline]
//! top_k = 10
//!
//! [[pipeline.stages]]
//! kind = { type = "transposition", min_period = 4, max_period = 7 }
//! ```
//!
//! Relative paths resolve against the config file's directory.

use crate::error::{EngineError, EngineResult};
use crate::pipeline::PipelineConfig;
use k4_common::config::{
    load_toml, resolve_artifact_root, ArtifactSettings, LoggingConfig, ResourcePaths,
    ARTIFACT_ROOT_ENV_VAR,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Raw TOML layout
#[derive(Debug, Deserialize)]
pub struct EngineToml {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub resources: ResourcePaths,

    #[serde(default)]
    pub artifacts: ArtifactSettings,

    pub pipeline: PipelineConfig,

    /// Inline ciphertext
    #[serde(default)]
    pub ciphertext: Option<String>,

    /// File holding the ciphertext
    #[serde(default)]
    pub ciphertext_file: Option<PathBuf>,
}

/// Fully resolved settings for one run
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub logging: LoggingConfig,
    pub resources: ResourcePaths,
    pub artifact_root: PathBuf,
    pub pipeline: PipelineConfig,
    pub ciphertext: String,
}

fn relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        base.join(path)
    } else {
        path.to_path_buf()
    }
}

/// Load and resolve a run configuration file
///
/// Parse failures, including unknown stage types, surface as configuration
/// errors. Stage parameters are validated later, against the ciphertext.
pub fn load_settings(path: &Path) -> EngineResult<EngineSettings> {
    let raw: EngineToml = load_toml(path)
        .map_err(|e| EngineError::Configuration(format!("{}: {}", path.display(), e)))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let ciphertext = match (raw.ciphertext, raw.ciphertext_file) {
        (Some(text), None) => text,
        (None, Some(file)) => {
            let file = relative(base, &file);
            std::fs::read_to_string(&file).map_err(|e| {
                EngineError::Configuration(format!(
                    "Read ciphertext {} failed: {}",
                    file.display(),
                    e
                ))
            })?
        }
        (Some(_), Some(_)) => {
            return Err(EngineError::Configuration(
                "Set either ciphertext or ciphertext_file, not both".to_string(),
            ))
        }
        (None, None) => {
            return Err(EngineError::Configuration(
                "No ciphertext configured (set ciphertext or ciphertext_file)".to_string(),
            ))
        }
    };

    let configured_root = raw.artifacts.root.as_ref().map(|p| relative(base, p));
    let artifact_root = resolve_artifact_root(configured_root.as_deref(), ARTIFACT_ROOT_ENV_VAR);

    let mut logging = raw.logging;
    logging.file = logging.file.map(|f| relative(base, &f));

    debug!(
        config = %path.display(),
        stages = raw.pipeline.stages.len(),
        artifact_root = %artifact_root.display(),
        "Loaded run configuration"
    );

    Ok(EngineSettings {
        logging,
        resources: raw.resources.relative_to(base),
        artifact_root,
        pipeline: raw.pipeline,
        ciphertext,
    })
}

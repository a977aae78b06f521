// Artifact Store
//
// Concept: Persist one finished run under a content-derived identifier
// Synchronization: Accepts PipelineOutcome, outputs files under <root>/<run id>/
//
// Layout:
//   candidates.jsonl  one fused candidate per line, best first
//   best.json         best candidate with full lineage
//   attempts.jsonl    every trial in (stage, trial) order, tagged with run id
//   manifest.json     run metadata (timestamps, versions, stage summaries)
//
// candidates.jsonl and attempts.jsonl are byte-identical for identical inputs.
// Only manifest.json carries wall-clock data.

pub mod attempt_log;

pub use attempt_log::AttemptLog;

use crate::error::{EngineError, EngineResult};
use crate::fusion::FusedCandidate;
use crate::pipeline::{PipelineConfig, PipelineOutcome, StateTransition};
use crate::scoring::CacheStats;
use crate::types::{Attempt, Lineage, StageMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CANDIDATES_FILE: &str = "candidates.jsonl";
pub const BEST_FILE: &str = "best.json";
pub const ATTEMPTS_FILE: &str = "attempts.jsonl";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Hex characters used for the run directory name
const SHORT_ID_LEN: usize = 16;

/// Content-derived run identifier (SHA-256 hex)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Hash of the normalized ciphertext and the resolved configuration
    ///
    /// The worker count is left out: it changes scheduling, never results.
    pub fn derive(ciphertext: &str, config: &PipelineConfig) -> EngineResult<Self> {
        let mut resolved = config.clone();
        resolved.workers = 0;

        let mut hasher = Sha256::new();
        hasher.update(ciphertext.as_bytes());
        hasher.update(b"\n");
        hasher.update(serde_json::to_vec(&resolved)?);
        Ok(RunId(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory-sized prefix
    pub fn short(&self) -> &str {
        &self.0[..SHORT_ID_LEN.min(self.0.len())]
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Files written for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub run_dir: PathBuf,
    pub candidates: PathBuf,
    pub best: PathBuf,
    pub attempts: PathBuf,
    pub manifest: PathBuf,
    /// False when the run directory already existed and was left untouched
    pub created: bool,
}

impl ArtifactPaths {
    fn under(run_dir: PathBuf, created: bool) -> Self {
        Self {
            candidates: run_dir.join(CANDIDATES_FILE),
            best: run_dir.join(BEST_FILE),
            attempts: run_dir.join(ATTEMPTS_FILE),
            manifest: run_dir.join(MANIFEST_FILE),
            run_dir,
            created,
        }
    }
}

#[derive(Serialize)]
struct AttemptRecord<'a> {
    run_id: &'a str,
    #[serde(flatten)]
    attempt: &'a Attempt,
}

#[derive(Serialize)]
struct BestRecord<'a> {
    run_id: &'a str,
    ciphertext: &'a str,
    candidate: Option<&'a FusedCandidate>,
    lineage: Lineage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage_index: usize,
    pub stage_name: String,
    pub kept: usize,
    pub metadata: StageMetadata,
}

/// Run metadata; the only artifact with non-deterministic content
#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub engine_version: String,
    pub git_hash: String,
    pub build_timestamp: String,
    pub ciphertext: String,
    pub config: PipelineConfig,
    pub stages: Vec<StageSummary>,
    pub final_candidates: usize,
    pub attempts: usize,
    pub cache: CacheStats,
    pub transitions: Vec<StateTransition>,
}

impl Manifest {
    fn from_outcome(outcome: &PipelineOutcome) -> Self {
        Self {
            run_id: outcome.run_id.clone(),
            created_at: Utc::now(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
            build_timestamp: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown").to_string(),
            ciphertext: outcome.ciphertext.clone(),
            config: outcome.config.clone(),
            stages: outcome
                .stages
                .iter()
                .map(|s| StageSummary {
                    stage_index: s.stage_index,
                    stage_name: s.stage_name.clone(),
                    kept: s.ranked.len(),
                    metadata: s.metadata.clone(),
                })
                .collect(),
            final_candidates: outcome.fusion.ranked.len(),
            attempts: outcome.attempts.len(),
            cache: outcome.cache_stats,
            transitions: outcome.transitions.clone(),
        }
    }
}

/// Write-once store of run directories
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.short())
    }

    /// Persist a finished run
    ///
    /// Files are written into a hidden staging directory and renamed into
    /// place, so a run directory is either complete or absent. An existing
    /// directory for the same run id is never overwritten.
    pub fn write(&self, outcome: &PipelineOutcome) -> EngineResult<ArtifactPaths> {
        let run_dir = self.run_dir(&outcome.run_id);
        if run_dir.exists() {
            info!(
                run_id = %outcome.run_id.short(),
                path = %run_dir.display(),
                "Artifacts already recorded for this run, leaving them untouched"
            );
            return Ok(ArtifactPaths::under(run_dir, false));
        }

        fs::create_dir_all(&self.root).map_err(|e| {
            EngineError::Artifact(format!("Create {} failed: {}", self.root.display(), e))
        })?;

        let staging = self.root.join(format!(".{}.partial", outcome.run_id.short()));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir(&staging)?;

        if let Err(e) = write_files(&staging, outcome) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        fs::rename(&staging, &run_dir).map_err(|e| {
            EngineError::Artifact(format!("Finalize {} failed: {}", run_dir.display(), e))
        })?;

        info!(
            run_id = %outcome.run_id.short(),
            path = %run_dir.display(),
            candidates = outcome.fusion.ranked.len(),
            attempts = outcome.attempts.len(),
            "Artifacts written"
        );
        Ok(ArtifactPaths::under(run_dir, true))
    }
}

fn write_files(dir: &Path, outcome: &PipelineOutcome) -> EngineResult<()> {
    let run_id = outcome.run_id.as_str();

    write_lines(&dir.join(CANDIDATES_FILE), outcome.fusion.ranked.iter())?;

    let attempts = outcome
        .attempts
        .iter()
        .map(|attempt| AttemptRecord { run_id, attempt });
    write_lines(&dir.join(ATTEMPTS_FILE), attempts)?;

    let best = outcome.best();
    let record = BestRecord {
        run_id,
        ciphertext: &outcome.ciphertext,
        candidate: best,
        lineage: best.map(|b| outcome.lineage(b)).unwrap_or_default(),
    };
    write_json(&dir.join(BEST_FILE), &record)?;

    write_json(&dir.join(MANIFEST_FILE), &Manifest::from_outcome(outcome))?;
    debug!(dir = %dir.display(), "Staged artifact files");
    Ok(())
}

fn write_lines<T: Serialize>(path: &Path, rows: impl Iterator<Item = T>) -> EngineResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut writer, &row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> EngineResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{MaskingStage, StageKind, StageSpec};

    fn config() -> PipelineConfig {
        PipelineConfig::new(vec![StageSpec::new(StageKind::Masking(MaskingStage::default()))])
    }

    #[test]
    fn test_run_id_is_content_derived() {
        let a = RunId::derive("ABC", &config()).unwrap();
        let b = RunId::derive("ABC", &config()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 16);

        assert_ne!(a, RunId::derive("ABD", &config()).unwrap());

        let mut seeded = config();
        seeded.seed = 7;
        assert_ne!(a, RunId::derive("ABC", &seeded).unwrap());
    }

    #[test]
    fn test_worker_count_does_not_change_run_id() {
        let mut threaded = config();
        threaded.workers = 8;
        assert_eq!(
            RunId::derive("ABC", &config()).unwrap(),
            RunId::derive("ABC", &threaded).unwrap()
        );
    }
}

//! k4-engine library interface
//!
//! Composite hypothesis pipeline for classical cipher cryptanalysis:
//! configured cipher stages search over candidate plaintexts, every trial is
//! logged, and the final candidates are fused into one ranking.
//!
//! The single entry point for external orchestration is [`run_and_record`]
//! (or [`run_pipeline`] when artifacts are not wanted).

pub mod artifacts;
pub mod config;
pub mod error;
pub mod fusion;
pub mod pipeline;
pub mod scoring;
pub mod stages;
pub mod types;

pub use crate::artifacts::{ArtifactPaths, ArtifactStore, RunId};
pub use crate::error::{EngineError, EngineResult};
pub use crate::pipeline::{Pipeline, PipelineConfig, PipelineOutcome, PipelineState};

use k4_common::LanguageResources;
use std::sync::Arc;

/// Kryptos K4 ciphertext (97 letters)
pub const K4_CIPHERTEXT: &str =
    "OBKRUOXOGHULBSOLIFBBWFLRVQQPRNGKSSOTWTQSJQSSEKZZWATJKLUDIAWINFBNYPVTTMZFPKWGDKZXTJCDIGKUHUAUEKCAR";

/// Run a configured stage sequence over `ciphertext`
pub fn run_pipeline(
    ciphertext: &str,
    config: PipelineConfig,
    resources: Arc<LanguageResources>,
) -> EngineResult<PipelineOutcome> {
    Pipeline::new(config, resources).run(ciphertext)
}

/// Run and persist the result
///
/// Nothing is written when the run fails, including configuration errors.
pub fn run_and_record(
    ciphertext: &str,
    config: PipelineConfig,
    resources: Arc<LanguageResources>,
    store: &ArtifactStore,
) -> EngineResult<(PipelineOutcome, ArtifactPaths)> {
    let outcome = run_pipeline(ciphertext, config, resources)?;
    let paths = store.write(&outcome)?;
    Ok((outcome, paths))
}

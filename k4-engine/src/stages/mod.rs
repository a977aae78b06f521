//! Cipher stages
//!
//! Every stage takes ranked input candidates, explores its hypothesis space
//! under a [`Budget`], and returns a [`StageResult`]. The set of stage types is
//! closed: configuration selects one through [`StageKind`], and an unknown type
//! name fails at configuration load.

pub mod berlin_clock;
pub mod executor;
pub mod hill;
pub mod masking;
pub mod modular;
pub mod routes;
pub mod transposition;

pub use berlin_clock::BerlinClockStage;
pub use executor::{BudgetTracker, TrialReport};
pub use hill::HillStage;
pub use masking::MaskingStage;
pub use transposition::TranspositionStage;

use crate::artifacts::AttemptLog;
use crate::error::EngineResult;
use crate::scoring::{Crib, LinguisticScorer, ScoreCache};
use crate::types::{Candidate, StageResult};
use serde::{Deserialize, Serialize};

/// Per-stage search limits
///
/// Unset limits are unbounded. Exceeding a limit truncates the stage; it is
/// not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    #[serde(default)]
    pub max_attempts: Option<usize>,
    #[serde(default)]
    pub max_millis: Option<u64>,
}

impl Budget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn attempts(max: usize) -> Self {
        Self {
            max_attempts: Some(max),
            max_millis: None,
        }
    }
}

/// Facts stages need to validate their parameters before a run starts
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Normalized ciphertext length
    pub text_len: usize,
    pub cribs: &'a [Crib],
}

/// Shared, read-only services for one stage execution
pub struct StageContext<'a> {
    pub stage_index: usize,
    pub stage_name: &'a str,
    pub cache: &'a ScoreCache,
    pub cribs: &'a [Crib],
    pub pool: &'a rayon::ThreadPool,
    pub log: &'a AttemptLog,
    /// Run seed for sampled searches
    pub seed: u64,
    /// Maximum ranked candidates kept by the stage
    pub candidate_limit: usize,
}

impl StageContext<'_> {
    pub fn scorer(&self) -> &LinguisticScorer {
        self.cache.scorer()
    }
}

/// One cipher-family search
pub trait CipherStage: Send + Sync {
    /// Stage type name used in configuration and default stage names
    fn kind(&self) -> &'static str;

    /// Reject impossible parameters before any attempt runs
    fn validate(&self, ctx: &ValidationContext<'_>) -> EngineResult<()>;

    /// Explore the hypothesis space for every input candidate
    fn search(&self, inputs: &[Candidate], ctx: &StageContext<'_>, budget: &Budget) -> StageResult;
}

/// Configured stage type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageKind {
    Hill(HillStage),
    Transposition(TranspositionStage),
    BerlinClock(BerlinClockStage),
    Masking(MaskingStage),
}

impl StageKind {
    pub fn stage(&self) -> &dyn CipherStage {
        match self {
            StageKind::Hill(s) => s,
            StageKind::Transposition(s) => s,
            StageKind::BerlinClock(s) => s,
            StageKind::Masking(s) => s,
        }
    }
}

/// One entry of the configured stage sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Display name recorded in transform traces (defaults to the stage type)
    #[serde(default)]
    pub name: Option<String>,
    pub kind: StageKind,
    #[serde(default)]
    pub budget: Budget,
    /// Ranked candidates kept by this stage (defaults to the pipeline's top_k)
    #[serde(default)]
    pub candidate_limit: Option<usize>,
}

impl StageSpec {
    pub fn new(kind: StageKind) -> Self {
        Self {
            name: None,
            kind,
            budget: Budget::default(),
            candidate_limit: None,
        }
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.stage().kind().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_spec_from_toml() {
        let toml_str = r#"
            name = "nulls"
            candidate_limit = 5

            [budget]
            max_attempts = 100

            [kind]
            type = "masking"
            null_letters = ["X"]
        "#;
        let spec: StageSpec = toml::from_str(toml_str).unwrap();
        assert_eq!(spec.display_name(), "nulls");
        assert_eq!(spec.budget.max_attempts, Some(100));
        assert!(matches!(spec.kind, StageKind::Masking(_)));
    }

    #[test]
    fn test_unknown_stage_type_rejected() {
        let toml_str = r#"
            [kind]
            type = "enigma"
        "#;
        let result: Result<StageSpec, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn test_default_display_name_is_kind() {
        let spec = StageSpec::new(StageKind::Masking(MaskingStage::default()));
        assert_eq!(spec.display_name(), "masking");
    }
}

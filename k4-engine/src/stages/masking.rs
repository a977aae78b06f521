//! Null-removal (masking) stage
//!
//! Hypothesizes that some ciphertext letters are nulls and removes them before
//! later stages run. Hypotheses: leave the text alone, drop every n-th letter
//! at each phase, drop all occurrences of a letter, or drop one position.

use super::executor::{self, BudgetTracker};
use super::{Budget, CipherStage, StageContext, ValidationContext};
use crate::error::{EngineError, EngineResult};
use crate::types::{AttemptParams, Candidate, MaskHypothesis, StageResult};
use serde::{Deserialize, Serialize};

/// Inclusive range of every-n-th periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    pub min: usize,
    pub max: usize,
}

/// Masking stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskingStage {
    /// Keep the unmasked text as a hypothesis
    #[serde(default = "default_identity")]
    pub include_identity: bool,

    /// Every-n-th removal periods, each tried at all phases
    #[serde(default)]
    pub every_nth: Option<PeriodRange>,

    /// Letters hypothesized to be nulls
    #[serde(default)]
    pub null_letters: Vec<char>,

    /// Try removing each single position
    #[serde(default)]
    pub single_positions: bool,
}

fn default_identity() -> bool {
    true
}

impl Default for MaskingStage {
    fn default() -> Self {
        Self {
            include_identity: default_identity(),
            every_nth: None,
            null_letters: Vec::new(),
            single_positions: false,
        }
    }
}

impl MaskHypothesis {
    /// Apply the mask to normalized text
    pub fn apply(&self, text: &str) -> String {
        match *self {
            MaskHypothesis::Identity => text.to_string(),
            MaskHypothesis::EveryNth { period, phase } => text
                .chars()
                .enumerate()
                .filter(|(i, _)| period == 0 || i % period != phase)
                .map(|(_, c)| c)
                .collect(),
            MaskHypothesis::Letter { letter } => {
                let letter = letter.to_ascii_uppercase();
                text.chars().filter(|&c| c != letter).collect()
            }
            MaskHypothesis::Position { position } => text
                .chars()
                .enumerate()
                .filter(|&(i, _)| i != position)
                .map(|(_, c)| c)
                .collect(),
        }
    }
}

impl MaskingStage {
    /// Hypotheses for a text of `len` letters, in enumeration order
    pub fn hypotheses(&self, len: usize) -> Vec<MaskHypothesis> {
        let mut out = Vec::new();
        if self.include_identity {
            out.push(MaskHypothesis::Identity);
        }
        if let Some(range) = self.every_nth {
            for period in range.min..=range.max {
                for phase in 0..period {
                    out.push(MaskHypothesis::EveryNth { period, phase });
                }
            }
        }
        for &letter in &self.null_letters {
            out.push(MaskHypothesis::Letter {
                letter: letter.to_ascii_uppercase(),
            });
        }
        if self.single_positions {
            out.extend((0..len).map(|position| MaskHypothesis::Position { position }));
        }
        out
    }
}

impl CipherStage for MaskingStage {
    fn kind(&self) -> &'static str {
        "masking"
    }

    fn validate(&self, _ctx: &ValidationContext<'_>) -> EngineResult<()> {
        if let Some(range) = self.every_nth {
            if range.min < 2 {
                return Err(EngineError::Configuration(format!(
                    "Masking every_nth period must be at least 2, got {}",
                    range.min
                )));
            }
            if range.min > range.max {
                return Err(EngineError::Configuration(format!(
                    "Inverted masking period range {}..={}",
                    range.min, range.max
                )));
            }
        }
        if let Some(bad) = self.null_letters.iter().find(|c| !c.is_ascii_alphabetic()) {
            return Err(EngineError::Configuration(format!(
                "Masking null letter '{}' is not A-Z",
                bad
            )));
        }
        Ok(())
    }

    fn search(&self, inputs: &[Candidate], ctx: &StageContext<'_>, budget: &Budget) -> StageResult {
        let tracker = BudgetTracker::start(budget);
        let trials: Vec<(usize, MaskHypothesis)> = inputs
            .iter()
            .enumerate()
            .flat_map(|(input_index, input)| {
                self.hypotheses(input.text.len())
                    .into_iter()
                    .map(move |h| (input_index, h))
            })
            .collect();

        let kept = executor::run_trials(ctx, &tracker, trials, |trial, (input_index, hypothesis)| {
            let text = hypothesis.apply(&inputs[input_index].text);
            let params = AttemptParams::Masking { hypothesis };
            executor::evaluate(ctx, input_index, &inputs[input_index], trial, params, text, None)
        });
        executor::finish_stage(ctx, inputs.len(), kept, &tracker)
    }
}

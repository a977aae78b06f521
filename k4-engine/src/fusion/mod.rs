// Fusion Engine
//
// Concept: Combine per-metric evidence from final candidates into one ranking
// Synchronization: Accepts Vec<Candidate> from the last stage, outputs FusionOutcome
//
// Algorithm:
// 1. Collect one column of raw values per weighted metric
// 2. Rescale each column to [0, 1] over the pool (constant column -> 0.5,
//    lower-is-better metrics inverted)
// 3. Choose weights: fixed from config, or adaptive by pool entropy band
// 4. Fused score = weighted sum in Metric order; rank with the shared
//    deterministic tie-break

pub mod weights;

pub use weights::adaptive_weights;

use crate::error::{EngineError, EngineResult};
use crate::types::{rank_order, Candidate, Metric, Polarity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use weights::{MetricColumns, CONSTANT_EPSILON};

/// Weight selection policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    #[default]
    Fixed,
    Adaptive,
}

/// Fusion configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default)]
    pub mode: FusionMode,

    /// Base per-metric weights
    #[serde(default = "default_fusion_weights")]
    pub weights: BTreeMap<Metric, f64>,
}

fn default_fusion_weights() -> BTreeMap<Metric, f64> {
    BTreeMap::from([
        (Metric::Trigram, 0.5),
        (Metric::Quadgram, 1.0),
        (Metric::ChiSquare, 0.5),
        (Metric::CribBonus, 1.0),
        (Metric::PositionalCribBonus, 1.0),
        (Metric::IndexOfCoincidence, 0.25),
        (Metric::WordlistHitRate, 1.0),
        (Metric::LineageMean, 0.25),
    ])
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            mode: FusionMode::default(),
            weights: default_fusion_weights(),
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> EngineResult<()> {
        for (metric, weight) in &self.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(EngineError::Configuration(format!(
                    "Fusion weight for {} must be a non-negative number, got {}",
                    metric, weight
                )));
            }
        }
        Ok(())
    }
}

/// Candidate with its fused score and normalized evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedCandidate {
    /// 1-based final rank
    pub rank: usize,
    pub fused_score: f64,
    pub normalized: BTreeMap<Metric, f64>,
    /// Position in the last stage's ranked list
    pub stage_rank: usize,
    pub candidate: Candidate,
}

/// Fusion output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionOutcome {
    pub mode: FusionMode,
    /// Weights actually applied
    pub weights: BTreeMap<Metric, f64>,
    pub ranked: Vec<FusedCandidate>,
}

/// Raw value of `metric` for fusion purposes
fn raw_value(candidate: &Candidate, metric: Metric) -> f64 {
    match metric {
        Metric::LineageMean => candidate.lineage_mean(),
        other => candidate.metric(other),
    }
}

/// Rescale a column to [0, 1], oriented so that 1 is most English-like
pub fn normalize_column(values: &[f64], polarity: Polarity) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    values
        .iter()
        .map(|&v| {
            if span.is_nan() || span <= CONSTANT_EPSILON {
                return 0.5;
            }
            let scaled = (v - min) / span;
            match polarity {
                Polarity::HigherIsBetter => scaled,
                Polarity::LowerIsBetter => 1.0 - scaled,
            }
        })
        .collect()
}

/// Combines metric evidence into the final ranking
#[derive(Debug, Clone, Default)]
pub struct FusionEngine {
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    /// Rank candidates, keeping at most `limit`
    ///
    /// The result does not depend on the order of `candidates` beyond their
    /// `stage_rank` bookkeeping.
    pub fn fuse(&self, candidates: Vec<Candidate>, limit: usize) -> FusionOutcome {
        let mut metrics: Vec<Metric> = self.config.weights.keys().copied().collect();
        if self.config.mode == FusionMode::Adaptive && !metrics.contains(&Metric::LetterEntropy) {
            metrics.push(Metric::LetterEntropy);
        }

        let columns: MetricColumns = metrics
            .iter()
            .map(|&m| (m, candidates.iter().map(|c| raw_value(c, m)).collect()))
            .collect();

        let weights = match self.config.mode {
            FusionMode::Fixed => self.config.weights.clone(),
            FusionMode::Adaptive => adaptive_weights(&columns, &self.config.weights),
        };

        let normalized: BTreeMap<Metric, Vec<f64>> = columns
            .iter()
            .filter(|(m, _)| weights.contains_key(m))
            .map(|(&m, values)| (m, normalize_column(values, m.polarity())))
            .collect();

        let mut fused: Vec<FusedCandidate> = candidates
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| {
                let evidence: BTreeMap<Metric, f64> =
                    normalized.iter().map(|(&m, col)| (m, col[i])).collect();
                let fused_score = evidence
                    .iter()
                    .map(|(m, v)| weights.get(m).copied().unwrap_or(0.0) * v)
                    .sum();
                FusedCandidate {
                    rank: 0,
                    fused_score,
                    normalized: evidence,
                    stage_rank: i,
                    candidate,
                }
            })
            .collect();

        fused.sort_by(|a, b| rank_order(a.fused_score, &a.candidate, b.fused_score, &b.candidate));
        fused.truncate(limit);
        for (i, f) in fused.iter_mut().enumerate() {
            f.rank = i + 1;
        }

        debug!(
            mode = ?self.config.mode,
            candidates = fused.len(),
            best = fused.first().map(|f| f.fused_score),
            "Fusion complete"
        );

        FusionOutcome {
            mode: self.config.mode,
            weights,
            ranked: fused,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttemptParams, MaskHypothesis, TransformStep};

    fn candidate(text: &str, quad: f64, crib: f64) -> Candidate {
        Candidate {
            text: text.into(),
            score: quad,
            score_breakdown: BTreeMap::from([
                (Metric::Quadgram, quad),
                (Metric::CribBonus, crib),
                (Metric::LetterEntropy, 4.0),
            ]),
            transform_trace: vec![TransformStep {
                stage: "masking".into(),
                params: AttemptParams::Masking {
                    hypothesis: MaskHypothesis::Identity,
                },
            }],
            lineage_scores: vec![quad],
            parent: None,
        }
    }

    fn engine(weights: &[(Metric, f64)]) -> FusionEngine {
        FusionEngine::new(FusionConfig {
            mode: FusionMode::Fixed,
            weights: weights.iter().copied().collect(),
        })
    }

    #[test]
    fn test_normalize_column() {
        assert_eq!(normalize_column(&[1.0, 3.0, 2.0], Polarity::HigherIsBetter), vec![0.0, 1.0, 0.5]);
        assert_eq!(normalize_column(&[1.0, 3.0], Polarity::LowerIsBetter), vec![1.0, 0.0]);
        // Constant column: no information
        assert_eq!(normalize_column(&[2.0, 2.0], Polarity::HigherIsBetter), vec![0.5, 0.5]);
    }

    #[test]
    fn test_fixed_fusion_ranks_by_weighted_evidence() {
        let pool = vec![candidate("AAA", -5.0, 0.0), candidate("BBB", -3.0, 0.0)];
        let outcome = engine(&[(Metric::Quadgram, 1.0)]).fuse(pool, 10);
        assert_eq!(outcome.ranked[0].candidate.text, "BBB");
        assert_eq!(outcome.ranked[0].rank, 1);
        assert_eq!(outcome.ranked[0].stage_rank, 1);
        assert_eq!(outcome.ranked[0].fused_score, 1.0);
    }

    #[test]
    fn test_raising_weight_never_demotes_stronger_candidate() {
        // A has the higher crib value, B the higher quadgram value
        let pool = vec![candidate("AAA", -5.0, 2.0), candidate("BBB", -3.0, 0.0)];
        let mut previous_gap = f64::NEG_INFINITY;
        for crib_weight in [0.0, 0.5, 1.0, 2.0, 4.0] {
            let outcome = engine(&[(Metric::Quadgram, 1.0), (Metric::CribBonus, crib_weight)])
                .fuse(pool.clone(), 10);
            let score = |t: &str| {
                outcome
                    .ranked
                    .iter()
                    .find(|f| f.candidate.text == t)
                    .map(|f| f.fused_score)
                    .unwrap()
            };
            let gap = score("AAA") - score("BBB");
            assert!(gap >= previous_gap);
            previous_gap = gap;
        }
        // With enough crib weight A overtakes B
        let outcome = engine(&[(Metric::Quadgram, 1.0), (Metric::CribBonus, 4.0)]).fuse(pool, 10);
        assert_eq!(outcome.ranked[0].candidate.text, "AAA");
    }

    #[test]
    fn test_ranking_independent_of_input_order() {
        let pool = vec![
            candidate("AAA", -4.0, 1.0),
            candidate("BBB", -4.0, 0.0),
            candidate("CCC", -3.5, 0.0),
        ];
        let mut reversed = pool.clone();
        reversed.reverse();
        let e = engine(&[(Metric::Quadgram, 1.0)]);
        let forward: Vec<String> = e.fuse(pool, 10).ranked.into_iter().map(|f| f.candidate.text).collect();
        let backward: Vec<String> = e.fuse(reversed, 10).ranked.into_iter().map(|f| f.candidate.text).collect();
        assert_eq!(forward, backward);
        // Equal fused score: higher crib reward first
        assert_eq!(forward, vec!["CCC", "AAA", "BBB"]);
    }

    #[test]
    fn test_limit_and_empty_pool() {
        let pool = vec![candidate("AAA", -4.0, 0.0), candidate("BBB", -3.0, 0.0)];
        assert_eq!(engine(&[(Metric::Quadgram, 1.0)]).fuse(pool, 1).ranked.len(), 1);
        assert!(engine(&[(Metric::Quadgram, 1.0)]).fuse(Vec::new(), 5).ranked.is_empty());
    }

    #[test]
    fn test_adaptive_mode_zeroes_constant_metric() {
        let pool = vec![candidate("AAA", -5.0, 1.0), candidate("BBB", -3.0, 1.0)];
        let outcome = FusionEngine::new(FusionConfig {
            mode: FusionMode::Adaptive,
            weights: BTreeMap::from([(Metric::Quadgram, 1.0), (Metric::CribBonus, 1.0)]),
        })
        .fuse(pool, 10);
        assert_eq!(outcome.weights[&Metric::CribBonus], 0.0);
        assert_eq!(outcome.ranked[0].candidate.text, "BBB");
    }

    #[test]
    fn test_negative_weight_rejected() {
        let config = FusionConfig {
            mode: FusionMode::Fixed,
            weights: BTreeMap::from([(Metric::Quadgram, -1.0)]),
        };
        assert!(config.validate().is_err());
    }
}

//! Adaptive fusion weight selection
//!
//! Weights depend only on the candidate pool's metric columns, never on run
//! order, so the selection is a pure function and testable in isolation.

use crate::types::Metric;
use std::collections::BTreeMap;

/// Spread below which a metric column is treated as constant
pub const CONSTANT_EPSILON: f64 = 1e-12;

/// Letter entropy (bits) at or above which a pool looks like random text
pub const NEAR_RANDOM_ENTROPY: f64 = 4.3;

/// Letter entropy below which a pool looks degenerate (heavy repetition)
pub const LOW_ENTROPY: f64 = 3.7;

/// Entropy band of a candidate pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntropyBand {
    NearRandom,
    Language,
    Degenerate,
}

impl EntropyBand {
    pub fn classify(median_entropy: f64) -> Self {
        if median_entropy >= NEAR_RANDOM_ENTROPY {
            EntropyBand::NearRandom
        } else if median_entropy >= LOW_ENTROPY {
            EntropyBand::Language
        } else {
            EntropyBand::Degenerate
        }
    }
}

/// Raw metric values per candidate, column-major
pub type MetricColumns = BTreeMap<Metric, Vec<f64>>;

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

fn spread(values: &[f64]) -> f64 {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if values.is_empty() {
        0.0
    } else {
        max - min
    }
}

/// Reweight `base` for a candidate pool
///
/// - Constant columns carry no ranking information and get weight 0
/// - Near-random pools lean on cribs over n-gram evidence
/// - Language-like pools lean on n-grams and dictionary hits
/// - Degenerate pools distrust IoC (inflated by repetition)
pub fn adaptive_weights(columns: &MetricColumns, base: &BTreeMap<Metric, f64>) -> BTreeMap<Metric, f64> {
    let band = columns
        .get(&Metric::LetterEntropy)
        .and_then(|v| median(v))
        .map(EntropyBand::classify)
        .unwrap_or(EntropyBand::Language);

    base.iter()
        .map(|(&metric, &weight)| {
            let constant = columns
                .get(&metric)
                .map(|v| spread(v) < CONSTANT_EPSILON)
                .unwrap_or(true);
            if constant {
                return (metric, 0.0);
            }
            let factor = match (band, metric) {
                (EntropyBand::NearRandom, Metric::CribBonus | Metric::PositionalCribBonus) => 2.0,
                (EntropyBand::NearRandom, Metric::WordlistHitRate) => 0.5,
                (EntropyBand::Language, Metric::Quadgram | Metric::WordlistHitRate) => 1.5,
                (EntropyBand::Degenerate, Metric::IndexOfCoincidence | Metric::PeriodicIoc) => 0.0,
                (EntropyBand::Degenerate, Metric::ChiSquare) => 1.5,
                _ => 1.0,
            };
            (metric, weight * factor)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BTreeMap<Metric, f64> {
        BTreeMap::from([
            (Metric::Quadgram, 1.0),
            (Metric::CribBonus, 1.0),
            (Metric::WordlistHitRate, 1.0),
            (Metric::IndexOfCoincidence, 1.0),
        ])
    }

    fn columns(entropy: [f64; 3]) -> MetricColumns {
        BTreeMap::from([
            (Metric::LetterEntropy, entropy.to_vec()),
            (Metric::Quadgram, vec![-5.0, -4.0, -3.0]),
            (Metric::CribBonus, vec![0.0, 1.0, 2.0]),
            (Metric::WordlistHitRate, vec![0.1, 0.2, 0.3]),
            (Metric::IndexOfCoincidence, vec![0.04, 0.05, 0.06]),
        ])
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_entropy_bands() {
        assert_eq!(EntropyBand::classify(4.6), EntropyBand::NearRandom);
        assert_eq!(EntropyBand::classify(4.1), EntropyBand::Language);
        assert_eq!(EntropyBand::classify(3.0), EntropyBand::Degenerate);
    }

    #[test]
    fn test_near_random_pool_favours_cribs() {
        let weights = adaptive_weights(&columns([4.5, 4.6, 4.7]), &base());
        assert_eq!(weights[&Metric::CribBonus], 2.0);
        assert_eq!(weights[&Metric::WordlistHitRate], 0.5);
        assert_eq!(weights[&Metric::Quadgram], 1.0);
    }

    #[test]
    fn test_language_pool_favours_ngrams() {
        let weights = adaptive_weights(&columns([4.0, 4.1, 4.2]), &base());
        assert_eq!(weights[&Metric::Quadgram], 1.5);
        assert_eq!(weights[&Metric::CribBonus], 1.0);
    }

    #[test]
    fn test_degenerate_pool_drops_ioc() {
        let weights = adaptive_weights(&columns([2.0, 2.5, 3.0]), &base());
        assert_eq!(weights[&Metric::IndexOfCoincidence], 0.0);
    }

    #[test]
    fn test_constant_column_gets_zero_weight() {
        let mut cols = columns([4.0, 4.1, 4.2]);
        cols.insert(Metric::CribBonus, vec![1.0, 1.0, 1.0]);
        let weights = adaptive_weights(&cols, &base());
        assert_eq!(weights[&Metric::CribBonus], 0.0);
    }

    #[test]
    fn test_pure_function() {
        let cols = columns([4.0, 4.1, 4.2]);
        assert_eq!(adaptive_weights(&cols, &base()), adaptive_weights(&cols, &base()));
    }
}

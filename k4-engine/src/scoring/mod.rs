// Linguistic Scoring Model
//
// Concept: Map a candidate plaintext to named metrics and one combined score
// Synchronization: Accepts normalized text, outputs ScoreBreakdown
//
// Algorithm:
// 1. Normalize text to A-Z letter indices
// 2. Compute every metric the loaded resources allow
// 3. Combine weighted metrics in fixed Metric order (penalties subtract)
//
// The scorer is a pure function of (text, resources, config, cribs). It holds
// no mutable state, so one instance is shared by every worker thread.

pub mod cache;
pub mod metrics;

pub use cache::{CacheStats, ScoreCache};

use crate::error::{EngineError, EngineResult};
use crate::types::{Metric, Polarity, ScoreBreakdown};
use k4_common::text::{normalize, to_indices};
use k4_common::LanguageResources;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Known plaintext fragment and where it is expected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crib {
    pub text: String,
    /// Expected 0-based offset in the plaintext
    pub offset: usize,
    /// Allowed misalignment in letters either side of `offset`
    #[serde(default)]
    pub tolerance: usize,
}

impl Crib {
    pub fn new(text: &str, offset: usize) -> Self {
        Self {
            text: normalize(text),
            offset,
            tolerance: 0,
        }
    }

    pub fn with_tolerance(mut self, tolerance: usize) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Normalized letters of the crib
    pub fn letters(&self) -> Vec<u8> {
        to_indices(&self.text)
    }

    pub fn len(&self) -> usize {
        normalize(&self.text).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Candidate start positions within a text of `text_len`, closest shift first
    pub fn starts(&self, text_len: usize) -> Vec<(usize, i64)> {
        let len = self.len();
        let mut starts = Vec::new();
        for distance in 0..=self.tolerance as i64 {
            for delta in if distance == 0 { vec![0] } else { vec![-distance, distance] } {
                let start = self.offset as i64 + delta;
                if start >= 0 && start as usize + len <= text_len {
                    starts.push((start as usize, delta));
                }
            }
        }
        starts
    }

    /// Check the crib fits inside a text of `text_len`
    pub fn validate(&self, text_len: usize) -> EngineResult<()> {
        if self.is_empty() {
            return Err(EngineError::Configuration(format!(
                "Crib '{}' has no letters",
                self.text
            )));
        }
        if self.offset + self.len() > text_len {
            return Err(EngineError::Configuration(format!(
                "Crib '{}' at offset {} exceeds ciphertext length {}",
                self.text, self.offset, text_len
            )));
        }
        Ok(())
    }
}

/// Scorer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Per-metric weights for the combined score (absent = 0)
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<Metric, f64>,

    /// Reward per crib found anywhere
    #[serde(default = "default_crib_reward")]
    pub crib_reward: f64,

    /// Reward per crib found at its offset (decays linearly within tolerance)
    #[serde(default = "default_positional_reward")]
    pub positional_crib_reward: f64,

    /// Shortest dictionary word counted toward hit rate
    #[serde(default = "default_min_word_len")]
    pub min_word_len: usize,

    /// Longest dictionary word tried at each position
    #[serde(default = "default_max_word_len")]
    pub max_word_len: usize,

    /// Largest period examined by the periodic IoC metric
    #[serde(default = "default_max_ioc_period")]
    pub max_ioc_period: usize,
}

fn default_weights() -> BTreeMap<Metric, f64> {
    BTreeMap::from([
        (Metric::Bigram, 0.25),
        (Metric::Trigram, 0.5),
        (Metric::Quadgram, 1.0),
        (Metric::ChiSquare, 1.0),
        (Metric::CribBonus, 1.0),
        (Metric::PositionalCribBonus, 1.0),
        (Metric::WordlistHitRate, 2.0),
    ])
}

fn default_crib_reward() -> f64 {
    1.0
}

fn default_positional_reward() -> f64 {
    2.0
}

fn default_min_word_len() -> usize {
    3
}

fn default_max_word_len() -> usize {
    12
}

fn default_max_ioc_period() -> usize {
    12
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: default_weights(),
            crib_reward: default_crib_reward(),
            positional_crib_reward: default_positional_reward(),
            min_word_len: default_min_word_len(),
            max_word_len: default_max_word_len(),
            max_ioc_period: default_max_ioc_period(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> EngineResult<()> {
        for (metric, weight) in &self.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(EngineError::Configuration(format!(
                    "Scoring weight for {} must be a non-negative number, got {}",
                    metric, weight
                )));
            }
        }
        if *self.weights.get(&Metric::LineageMean).unwrap_or(&0.0) != 0.0 {
            return Err(EngineError::Configuration(
                "lineage_mean is a fusion-only metric and cannot weight the scorer".to_string(),
            ));
        }
        if self.min_word_len == 0 || self.min_word_len > self.max_word_len {
            return Err(EngineError::Configuration(format!(
                "Invalid word length range {}..={}",
                self.min_word_len, self.max_word_len
            )));
        }
        if !self.crib_reward.is_finite() || !self.positional_crib_reward.is_finite() {
            return Err(EngineError::Configuration(
                "Crib rewards must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pure linguistic scorer
#[derive(Debug, Clone)]
pub struct LinguisticScorer {
    resources: Arc<LanguageResources>,
    config: ScoringConfig,
    cribs: Vec<(Vec<u8>, Crib)>,
}

impl LinguisticScorer {
    pub fn new(resources: Arc<LanguageResources>, config: ScoringConfig, cribs: &[Crib]) -> Self {
        let cribs = cribs.iter().map(|c| (c.letters(), c.clone())).collect();
        Self {
            resources,
            config,
            cribs,
        }
    }

    pub fn resources(&self) -> &LanguageResources {
        &self.resources
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score arbitrary text (normalized first)
    pub fn score(&self, text: &str) -> ScoreBreakdown {
        let text = normalize(text);
        self.score_normalized(&text)
    }

    /// Score text already restricted to A-Z
    pub fn score_normalized(&self, text: &str) -> ScoreBreakdown {
        let letters = to_indices(text);
        let resources = &self.resources;
        let mut values = BTreeMap::new();

        for order in 1..=k4_common::resources::MAX_NGRAM_ORDER {
            if let (Some(table), Some(metric)) = (resources.ngram(order), Metric::for_ngram_order(order)) {
                let value = table.mean_log_prob(&letters).unwrap_or_else(|| table.floor());
                values.insert(metric, value);
            }
        }

        values.insert(
            Metric::ChiSquare,
            metrics::chi_square(&letters, resources.letter_frequencies()),
        );

        let (anywhere, positional) = self.crib_rewards(&letters);
        values.insert(Metric::CribBonus, anywhere);
        values.insert(Metric::PositionalCribBonus, positional);

        values.insert(Metric::IndexOfCoincidence, metrics::index_of_coincidence(&letters));
        values.insert(
            Metric::PeriodicIoc,
            metrics::periodic_ioc(&letters, self.config.max_ioc_period),
        );
        values.insert(Metric::VowelRatio, metrics::vowel_ratio(&letters));
        values.insert(Metric::LetterCoverage, metrics::letter_coverage(&letters));
        values.insert(Metric::LetterEntropy, metrics::letter_entropy(&letters));
        values.insert(Metric::TrigramEntropy, metrics::trigram_entropy(&letters));
        values.insert(
            Metric::RepeatingBigramFraction,
            metrics::repeating_bigram_fraction(&letters),
        );
        values.insert(Metric::BigramGapVariance, metrics::bigram_gap_variance(&letters));

        let hit_rate = resources
            .wordlist()
            .map(|w| {
                metrics::wordlist_hit_rate(text, w, self.config.min_word_len, self.config.max_word_len)
            })
            .unwrap_or(0.0);
        values.insert(Metric::WordlistHitRate, hit_rate);

        let combined = self.combine(&values);
        ScoreBreakdown {
            metrics: values,
            combined,
        }
    }

    /// Weighted sum in Metric order; lower-is-better metrics subtract
    pub fn combine(&self, values: &BTreeMap<Metric, f64>) -> f64 {
        values
            .iter()
            .map(|(metric, value)| {
                let weight = self.config.weights.get(metric).copied().unwrap_or(0.0);
                match metric.polarity() {
                    Polarity::HigherIsBetter => weight * value,
                    Polarity::LowerIsBetter => -weight * value,
                }
            })
            .sum()
    }

    /// Cheap prefix estimate used for pruning
    ///
    /// Mean log probability under the highest-order table; texts shorter than
    /// the order score the table floor.
    pub fn partial_score(&self, letters: &[u8]) -> f64 {
        let table = self.resources.highest_order();
        table.mean_log_prob(letters).unwrap_or_else(|| table.floor())
    }

    fn crib_rewards(&self, letters: &[u8]) -> (f64, f64) {
        let mut anywhere = 0.0;
        let mut positional = 0.0;
        for (crib, spec) in &self.cribs {
            if crib.is_empty() || crib.len() > letters.len() {
                continue;
            }
            let mut found = false;
            let mut best_positional = 0.0f64;
            for (pos, window) in letters.windows(crib.len()).enumerate() {
                if window != crib.as_slice() {
                    continue;
                }
                found = true;
                let distance = pos.abs_diff(spec.offset);
                if distance <= spec.tolerance {
                    let decay = 1.0 - distance as f64 / (spec.tolerance + 1) as f64;
                    best_positional = best_positional.max(self.config.positional_crib_reward * decay);
                }
            }
            if found {
                anywhere += self.config.crib_reward;
            }
            positional += best_positional;
        }
        (anywhere, positional)
    }
}

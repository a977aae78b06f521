//! Shared data contracts between stages, fusion, and the artifact store
//!
//! Candidates and attempts are created once and never mutated afterwards; the
//! pipeline hands out owned copies between stages.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Named linguistic metric
///
/// The enum order is the fixed evaluation order for combined and fused
/// scores, so ties and floating-point sums are reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Mean log10 unigram probability
    Unigram,
    /// Mean log10 bigram probability
    Bigram,
    /// Mean log10 trigram probability
    Trigram,
    /// Mean log10 quadgram probability
    Quadgram,
    /// Letter-frequency deviation from English (penalty)
    ChiSquare,
    /// Reward for each crib found anywhere in the text
    CribBonus,
    /// Reward for cribs found at (or near) their expected offset
    PositionalCribBonus,
    IndexOfCoincidence,
    /// Best mean column IoC over small periods
    PeriodicIoc,
    VowelRatio,
    /// Fraction of the alphabet present
    LetterCoverage,
    /// Shannon entropy of the letter distribution (bits)
    LetterEntropy,
    /// Shannon entropy of the trigram distribution (bits)
    TrigramEntropy,
    /// Fraction of bigram occurrences whose bigram repeats
    RepeatingBigramFraction,
    /// Variance of gaps between repeated bigram occurrences
    BigramGapVariance,
    /// Fraction of letters covered by dictionary words
    WordlistHitRate,
    /// Mean of a candidate's per-stage scores (fusion only)
    LineageMean,
}

/// Whether larger or smaller metric values indicate English-like text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    HigherIsBetter,
    LowerIsBetter,
}

impl Metric {
    /// Metrics produced by the linguistic scorer
    pub const SCORED: [Metric; 16] = [
        Metric::Unigram,
        Metric::Bigram,
        Metric::Trigram,
        Metric::Quadgram,
        Metric::ChiSquare,
        Metric::CribBonus,
        Metric::PositionalCribBonus,
        Metric::IndexOfCoincidence,
        Metric::PeriodicIoc,
        Metric::VowelRatio,
        Metric::LetterCoverage,
        Metric::LetterEntropy,
        Metric::TrigramEntropy,
        Metric::RepeatingBigramFraction,
        Metric::BigramGapVariance,
        Metric::WordlistHitRate,
    ];

    pub fn polarity(self) -> Polarity {
        match self {
            Metric::ChiSquare
            | Metric::LetterCoverage
            | Metric::LetterEntropy
            | Metric::TrigramEntropy
            | Metric::BigramGapVariance => Polarity::LowerIsBetter,
            _ => Polarity::HigherIsBetter,
        }
    }

    /// N-gram order for the n-gram metrics
    pub fn ngram_order(self) -> Option<usize> {
        match self {
            Metric::Unigram => Some(1),
            Metric::Bigram => Some(2),
            Metric::Trigram => Some(3),
            Metric::Quadgram => Some(4),
            _ => None,
        }
    }

    pub fn for_ngram_order(order: usize) -> Option<Metric> {
        match order {
            1 => Some(Metric::Unigram),
            2 => Some(Metric::Bigram),
            3 => Some(Metric::Trigram),
            4 => Some(Metric::Quadgram),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        f.write_str(&name)
    }
}

/// Scorer output: per-metric values plus their weighted combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub metrics: BTreeMap<Metric, f64>,
    pub combined: f64,
}

impl ScoreBreakdown {
    /// Metric value, 0.0 when the metric was not computed
    pub fn get(&self, metric: Metric) -> f64 {
        self.metrics.get(&metric).copied().unwrap_or(0.0)
    }
}

/// Hill key derivation method
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum KeySource {
    /// Consecutive aligned crib blocks
    SlidingWindow { positions: Vec<usize> },
    /// Arbitrary combination of aligned crib blocks
    CribBlocks { positions: Vec<usize> },
    /// 3x3 key assembled from a solved 2x2 diagonal sub-block
    Embedded {
        corner: usize,
        diagonal: u8,
        positions: Vec<usize>,
    },
    /// 3x3 key whose rows were solved one by one, each over two ciphertext columns
    RowBlocks {
        windows: Vec<[usize; 2]>,
        positions: Vec<usize>,
    },
    /// 3x3 key inverted from encryption rows solved over two plaintext columns
    ColumnBlocks {
        windows: Vec<[usize; 2]>,
        positions: Vec<usize>,
    },
    /// 3x3 key joining overlapping 2x2 windows solved along the diagonal
    Concatenated { positions: Vec<usize> },
}

impl KeySource {
    /// Text positions of the crib blocks the key was derived from
    pub fn positions(&self) -> &[usize] {
        match self {
            KeySource::SlidingWindow { positions }
            | KeySource::CribBlocks { positions }
            | KeySource::Embedded { positions, .. }
            | KeySource::RowBlocks { positions, .. }
            | KeySource::ColumnBlocks { positions, .. }
            | KeySource::Concatenated { positions } => positions,
        }
    }
}

/// Reading route through a transposition grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Left to right, top to bottom
    Rows,
    /// Alternating row direction
    Boustrophedon,
    /// Clockwise inward from the top-left corner
    Spiral,
    /// Counter-clockwise inward from the top-left corner
    PerimeterIn,
    /// Reverse of `PerimeterIn`
    PerimeterOut,
}

/// Wall-clock time on the Berlin Clock (Mengenlehreuhr)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl ClockTime {
    pub const SECONDS_PER_DAY: u32 = 24 * 3600;

    pub fn from_seconds(total: u32) -> Self {
        let total = total % Self::SECONDS_PER_DAY;
        Self {
            hours: (total / 3600) as u8,
            minutes: ((total / 60) % 60) as u8,
            seconds: (total % 60) as u8,
        }
    }

    pub fn as_seconds(&self) -> u32 {
        self.hours as u32 * 3600 + self.minutes as u32 * 60 + self.seconds as u32
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

impl TryFrom<String> for ClockTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parts: Vec<&str> = value.trim().split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(format!("Invalid clock time '{}' (expected HH:MM[:SS])", value));
        }
        let field = |s: &str, max: u8| -> Result<u8, String> {
            let v: u8 = s
                .parse()
                .map_err(|_| format!("Invalid clock time '{}'", value))?;
            if v > max {
                return Err(format!("Clock time '{}' out of range", value));
            }
            Ok(v)
        };
        Ok(Self {
            hours: field(parts[0], 23)?,
            minutes: field(parts[1], 59)?,
            seconds: match parts.get(2) {
                Some(s) => field(s, 59)?,
                None => 0,
            },
        })
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

/// Keystream combination direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftDirection {
    Add,
    Subtract,
}

/// Clock state to keystream mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeystreamEncoding {
    /// Lit lamp count per row (seconds lamp as 0/1)
    LampCounts,
    /// Value each row represents (5-hour row counts 5 per lamp)
    RowValues,
    /// All 24 lamps as 0/1 in display order
    LampBits,
}

/// Null-removal hypothesis
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "mask", rename_all = "snake_case")]
pub enum MaskHypothesis {
    Identity,
    /// Drop every `period`-th letter starting at `phase`
    EveryNth { period: usize, phase: usize },
    /// Drop every occurrence of one letter
    Letter { letter: char },
    /// Drop the single letter at `position`
    Position { position: usize },
}

/// Parameters of one stage trial
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptParams {
    Hill {
        size: usize,
        /// Decryption matrix rows; empty when derivation failed
        key: Vec<Vec<u8>>,
        source: KeySource,
    },
    Transposition {
        period: usize,
        order: Vec<usize>,
        route: Route,
        /// Sampled-search restart index
        restart: Option<usize>,
    },
    /// Partial column order rejected during crib-constrained search
    TranspositionPrefix {
        period: usize,
        prefix: Vec<usize>,
        route: Route,
    },
    BerlinClock {
        time: ClockTime,
        direction: ShiftDirection,
        encoding: KeystreamEncoding,
    },
    Masking {
        #[serde(flatten)]
        hypothesis: MaskHypothesis,
    },
}

/// One applied transformation in a candidate's history
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransformStep {
    pub stage: String,
    pub params: AttemptParams,
}

/// Position of a candidate in an earlier stage's ranked list
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateRef {
    pub stage_index: usize,
    pub rank: usize,
}

/// A scored plaintext hypothesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub text: String,
    pub score: f64,
    pub score_breakdown: BTreeMap<Metric, f64>,
    pub transform_trace: Vec<TransformStep>,
    /// Combined score after each applied stage
    pub lineage_scores: Vec<f64>,
    /// Input this candidate was derived from (None for stage-0 outputs)
    pub parent: Option<CandidateRef>,
}

impl Candidate {
    /// The untransformed ciphertext as the stage-0 input
    pub fn seed(text: String, breakdown: &ScoreBreakdown) -> Self {
        Self {
            text,
            score: breakdown.combined,
            score_breakdown: breakdown.metrics.clone(),
            transform_trace: Vec::new(),
            lineage_scores: Vec::new(),
            parent: None,
        }
    }

    /// Derive a child produced by applying `step` to `self`
    pub fn derive(
        &self,
        text: String,
        breakdown: &ScoreBreakdown,
        step: TransformStep,
        parent: Option<CandidateRef>,
    ) -> Self {
        let mut transform_trace = self.transform_trace.clone();
        transform_trace.push(step);
        let mut lineage_scores = self.lineage_scores.clone();
        lineage_scores.push(breakdown.combined);
        Self {
            text,
            score: breakdown.combined,
            score_breakdown: breakdown.metrics.clone(),
            transform_trace,
            lineage_scores,
            parent,
        }
    }

    pub fn metric(&self, metric: Metric) -> f64 {
        self.score_breakdown.get(&metric).copied().unwrap_or(0.0)
    }

    /// Raw crib reward (ranking tie-break); positional reward is not included
    pub fn crib_bonus(&self) -> f64 {
        self.metric(Metric::CribBonus)
    }

    /// Mean of per-stage scores, falling back to the current score
    pub fn lineage_mean(&self) -> f64 {
        if self.lineage_scores.is_empty() {
            self.score
        } else {
            self.lineage_scores.iter().sum::<f64>() / self.lineage_scores.len() as f64
        }
    }
}

/// Deterministic ranking order
///
/// Higher score first; ties broken by higher raw crib bonus, then the
/// lexicographically smaller transform trace, then the text itself.
pub fn rank_order(a_score: f64, a: &Candidate, b_score: f64, b: &Candidate) -> Ordering {
    b_score
        .total_cmp(&a_score)
        .then_with(|| b.crib_bonus().total_cmp(&a.crib_bonus()))
        .then_with(|| a.transform_trace.cmp(&b.transform_trace))
        .then_with(|| a.text.cmp(&b.text))
}

/// Trial outcome recorded in the attempt log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Fully scored and eligible for ranking
    Kept,
    /// Discarded on its prefix score before full decryption
    Pruned,
    /// Could not be evaluated
    Rejected,
}

/// Why a trial was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NonInvertibleMatrix,
    CribMismatch,
    EmptyOutput,
}

/// One recorded trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub stage_index: usize,
    pub stage_name: String,
    /// Index of the input candidate in the previous stage's ranked list
    pub input_index: usize,
    /// Trial number within the stage (log ordering key)
    pub trial: usize,
    pub params: AttemptParams,
    pub partial_score: Option<f64>,
    pub score: Option<f64>,
    pub outcome: AttemptOutcome,
    pub reason: Option<RejectReason>,
}

impl Attempt {
    /// Full score when kept, otherwise the prefix score
    pub fn partial_or_final_score(&self) -> Option<f64> {
        self.score.or(self.partial_score)
    }
}

/// Per-stage bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageMetadata {
    pub inputs: usize,
    pub attempts: usize,
    pub kept: usize,
    pub pruned: usize,
    pub rejected: usize,
    /// Candidates dropped because an identical text ranked higher
    pub duplicates: usize,
    /// True when the budget stopped the search early
    pub truncated: bool,
    pub elapsed_ms: u64,
}

/// Output of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_index: usize,
    pub stage_name: String,
    /// Best candidates, highest first
    pub ranked: Vec<Candidate>,
    pub attempts: Vec<Attempt>,
    pub metadata: StageMetadata,
}

/// One hop of a candidate's derivation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageLink {
    pub stage_index: usize,
    pub stage_name: String,
    pub rank: usize,
    pub step: TransformStep,
    pub score: f64,
}

/// Chain of stage results leading to a candidate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lineage {
    pub links: Vec<LineageLink>,
}

impl Lineage {
    /// Transform sequence reconstructed from the chain
    pub fn transform_trace(&self) -> Vec<TransformStep> {
        self.links.iter().map(|l| l.step.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(text: &str, crib: f64, trace: Vec<TransformStep>) -> Candidate {
        let mut metrics = BTreeMap::new();
        metrics.insert(Metric::CribBonus, crib);
        Candidate {
            text: text.into(),
            score: 0.0,
            score_breakdown: metrics,
            transform_trace: trace,
            lineage_scores: vec![],
            parent: None,
        }
    }

    fn masking(period: usize) -> TransformStep {
        TransformStep {
            stage: "masking".into(),
            params: AttemptParams::Masking {
                hypothesis: MaskHypothesis::EveryNth { period, phase: 0 },
            },
        }
    }

    #[test]
    fn test_clock_time_parse_and_display() {
        let t = ClockTime::try_from("7:05".to_string()).unwrap();
        assert_eq!(t.to_string(), "07:05:00");
        assert_eq!(ClockTime::from_seconds(t.as_seconds()), t);
        assert!(ClockTime::try_from("24:00:00".to_string()).is_err());
        assert!(ClockTime::try_from("noon".to_string()).is_err());
    }

    #[test]
    fn test_rank_order_tie_breaks() {
        let a = candidate("AAA", 1.0, vec![masking(3)]);
        let b = candidate("BBB", 0.0, vec![masking(2)]);
        // Same score: crib reward decides
        assert_eq!(rank_order(1.0, &a, 1.0, &b), Ordering::Less);

        let c = candidate("CCC", 0.0, vec![masking(3)]);
        // Same score and crib reward: smaller trace first
        assert_eq!(rank_order(1.0, &b, 1.0, &c), Ordering::Less);

        // Score dominates everything
        assert_eq!(rank_order(2.0, &c, 1.0, &a), Ordering::Less);
    }

    #[test]
    fn test_positional_reward_does_not_break_ties() {
        let mut near = candidate("BBB", 0.0, vec![masking(3)]);
        near.score_breakdown.insert(Metric::PositionalCribBonus, 5.0);
        let far = candidate("CCC", 0.0, vec![masking(2)]);
        // Equal raw crib bonus: the smaller trace wins despite the positional reward
        assert_eq!(rank_order(1.0, &far, 1.0, &near), Ordering::Less);

        let raw = candidate("AAA", 1.0, vec![masking(3)]);
        assert_eq!(rank_order(1.0, &raw, 1.0, &near), Ordering::Less);
    }

    #[test]
    fn test_lineage_mean_falls_back_to_score() {
        let mut c = candidate("X", 0.0, vec![]);
        c.score = -3.0;
        assert_eq!(c.lineage_mean(), -3.0);
        c.lineage_scores = vec![-4.0, -2.0];
        assert_eq!(c.lineage_mean(), -3.0);
    }

    #[test]
    fn test_metric_serializes_snake_case() {
        assert_eq!(Metric::WordlistHitRate.to_string(), "wordlist_hit_rate");
        assert_eq!(Metric::for_ngram_order(4), Some(Metric::Quadgram));
        assert_eq!(Metric::Quadgram.ngram_order(), Some(4));
    }
}

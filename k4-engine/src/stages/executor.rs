//! Budgeted trial execution
//!
//! Two-phase pattern, repeated per chunk: a fixed-size chunk of trials is
//! enumerated sequentially in a fixed order and capped to the remaining attempt
//! budget, then evaluated in parallel on the run's worker pool. Each worker
//! appends its own attempt record to the shared log. Only the best distinct
//! candidates survive between chunks, so lazy trial sources are never
//! materialized whole. The wall-clock deadline is checked before every trial,
//! so at most one in-flight trial per worker completes after it passes.

use super::{Budget, StageContext};
use crate::types::{
    rank_order, Attempt, AttemptOutcome, AttemptParams, Candidate, CandidateRef, RejectReason,
    StageMetadata, StageResult, TransformStep,
};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Live budget accounting for one stage
#[derive(Debug)]
pub struct BudgetTracker {
    max_attempts: Option<usize>,
    deadline: Option<Instant>,
    started: Instant,
    issued: AtomicUsize,
    executed: AtomicUsize,
    truncated: AtomicBool,
}

impl BudgetTracker {
    pub fn start(budget: &Budget) -> Self {
        let started = Instant::now();
        Self {
            max_attempts: budget.max_attempts,
            deadline: budget
                .max_millis
                .map(|ms| started + Duration::from_millis(ms)),
            started,
            issued: AtomicUsize::new(0),
            executed: AtomicUsize::new(0),
            truncated: AtomicBool::new(false),
        }
    }

    /// Attempts still allowed by the count budget
    pub fn remaining(&self) -> usize {
        match self.max_attempts {
            Some(max) => max.saturating_sub(self.issued.load(Ordering::SeqCst)),
            None => usize::MAX,
        }
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// True once either limit is reached
    pub fn exhausted(&self) -> bool {
        self.remaining() == 0 || self.expired()
    }

    /// Claim one trial id for sequential work, or `None` when out of budget
    pub fn try_acquire(&self) -> Option<usize> {
        if self.exhausted() {
            self.mark_truncated();
            return None;
        }
        self.executed.fetch_add(1, Ordering::SeqCst);
        Some(self.issued.fetch_add(1, Ordering::SeqCst))
    }

    /// Reserve a contiguous block of trial ids, returning the first
    fn reserve(&self, count: usize) -> usize {
        self.issued.fetch_add(count, Ordering::SeqCst)
    }

    pub fn mark_truncated(&self) {
        self.truncated.store(true, Ordering::SeqCst);
    }

    pub fn truncated(&self) -> bool {
        self.truncated.load(Ordering::SeqCst)
    }

    /// Trials actually evaluated
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Result of evaluating one trial
#[derive(Debug, Clone)]
pub struct TrialReport {
    pub input_index: usize,
    pub trial: usize,
    pub params: AttemptParams,
    pub partial_score: Option<f64>,
    pub outcome: AttemptOutcome,
    pub reason: Option<RejectReason>,
    pub candidate: Option<Candidate>,
}

impl TrialReport {
    pub fn pruned(input_index: usize, trial: usize, params: AttemptParams, partial: f64) -> Self {
        Self {
            input_index,
            trial,
            params,
            partial_score: Some(partial),
            outcome: AttemptOutcome::Pruned,
            reason: None,
            candidate: None,
        }
    }

    pub fn rejected(
        input_index: usize,
        trial: usize,
        params: AttemptParams,
        reason: RejectReason,
    ) -> Self {
        Self {
            input_index,
            trial,
            params,
            partial_score: None,
            outcome: AttemptOutcome::Rejected,
            reason: Some(reason),
            candidate: None,
        }
    }

    pub fn to_attempt(&self, ctx: &StageContext<'_>) -> Attempt {
        Attempt {
            stage_index: ctx.stage_index,
            stage_name: ctx.stage_name.to_string(),
            input_index: self.input_index,
            trial: self.trial,
            params: self.params.clone(),
            partial_score: self.partial_score,
            score: self.candidate.as_ref().map(|c| c.score),
            outcome: self.outcome,
            reason: self.reason,
        }
    }
}

/// Score `text` and wrap it as a kept trial derived from `input`
///
/// Empty outputs are rejected rather than scored.
pub fn evaluate(
    ctx: &StageContext<'_>,
    input_index: usize,
    input: &Candidate,
    trial: usize,
    params: AttemptParams,
    text: String,
    partial_score: Option<f64>,
) -> TrialReport {
    if text.is_empty() {
        return TrialReport::rejected(input_index, trial, params, RejectReason::EmptyOutput);
    }
    let breakdown = ctx.cache.get_or_compute(&text);
    let parent = ctx.stage_index.checked_sub(1).map(|stage_index| CandidateRef {
        stage_index,
        rank: input_index,
    });
    let step = TransformStep {
        stage: ctx.stage_name.to_string(),
        params: params.clone(),
    };
    let candidate = input.derive(text, &breakdown, step, parent);
    TrialReport {
        input_index,
        trial,
        params,
        partial_score,
        outcome: AttemptOutcome::Kept,
        reason: None,
        candidate: Some(candidate),
    }
}

/// Record a sequentially produced report (constraint-pruned search nodes)
pub fn record(ctx: &StageContext<'_>, report: &TrialReport) {
    ctx.log.append(report.to_attempt(ctx));
}

/// Trials enumerated and evaluated per parallel batch
pub const TRIAL_CHUNK: usize = 4096;

/// Best distinct candidates seen so far, capped at the stage's candidate limit
#[derive(Debug, Default)]
pub struct KeptCandidates {
    limit: usize,
    ranked: Vec<Candidate>,
    duplicates: usize,
}

impl KeptCandidates {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ranked: Vec::new(),
            duplicates: 0,
        }
    }

    /// Merge a batch; each text keeps only its best-ranked derivation
    ///
    /// A derivation whose twin was already cut by the limit is not counted
    /// as a duplicate.
    pub fn merge<I: IntoIterator<Item = Candidate>>(&mut self, batch: I) {
        self.ranked.extend(batch);
        self.ranked.sort_by(|a, b| rank_order(a.score, a, b.score, b));

        let mut seen = HashSet::new();
        let before = self.ranked.len();
        self.ranked.retain(|c| seen.insert(c.text.clone()));
        self.duplicates += before - self.ranked.len();
        self.ranked.truncate(self.limit);
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn into_ranked(self) -> Vec<Candidate> {
        self.ranked
    }
}

/// Evaluate trials on the worker pool within budget
///
/// Trials beyond the remaining count budget are never started; the stage is
/// then marked truncated. Trial ids are contiguous in enumeration order.
pub fn run_trials<T, I, F>(
    ctx: &StageContext<'_>,
    budget: &BudgetTracker,
    trials: I,
    run: F,
) -> KeptCandidates
where
    T: Send,
    I: IntoIterator<Item = T>,
    F: Fn(usize, T) -> TrialReport + Sync + Send,
{
    run_chunked(ctx, budget, trials, TRIAL_CHUNK, run)
}

fn run_chunked<T, I, F>(
    ctx: &StageContext<'_>,
    budget: &BudgetTracker,
    trials: I,
    chunk: usize,
    run: F,
) -> KeptCandidates
where
    T: Send,
    I: IntoIterator<Item = T>,
    F: Fn(usize, T) -> TrialReport + Sync + Send,
{
    let mut kept = KeptCandidates::new(ctx.candidate_limit);
    let mut iter = trials.into_iter();
    let chunk = chunk.max(1);

    loop {
        let take = chunk.min(budget.remaining());
        if take == 0 || budget.expired() {
            if iter.next().is_some() {
                debug!(stage = ctx.stage_name, "Trial list truncated by budget");
                budget.mark_truncated();
            }
            break;
        }
        let admitted: Vec<T> = iter.by_ref().take(take).collect();
        if admitted.is_empty() {
            break;
        }

        let base = budget.reserve(admitted.len());
        let numbered: Vec<(usize, T)> = admitted
            .into_iter()
            .enumerate()
            .map(|(i, t)| (base + i, t))
            .collect();

        let batch: Vec<Candidate> = ctx.pool.install(|| {
            numbered
                .into_par_iter()
                .filter_map(|(trial, t)| {
                    if budget.expired() {
                        budget.mark_truncated();
                        return None;
                    }
                    budget.executed.fetch_add(1, Ordering::SeqCst);
                    let report = run(trial, t);
                    ctx.log.append(report.to_attempt(ctx));
                    report.candidate
                })
                .collect()
        });
        kept.merge(batch);
    }
    kept
}

/// Assemble the stage result from the kept candidates
pub fn finish_stage(
    ctx: &StageContext<'_>,
    inputs: usize,
    kept: KeptCandidates,
    budget: &BudgetTracker,
) -> StageResult {
    let duplicates = kept.duplicates();
    let candidates = kept.into_ranked();

    let attempts = ctx.log.stage_attempts(ctx.stage_index);
    let count = |outcome: AttemptOutcome| attempts.iter().filter(|a| a.outcome == outcome).count();
    let metadata = StageMetadata {
        inputs,
        attempts: attempts.len(),
        kept: count(AttemptOutcome::Kept),
        pruned: count(AttemptOutcome::Pruned),
        rejected: count(AttemptOutcome::Rejected),
        duplicates,
        truncated: budget.truncated(),
        elapsed_ms: budget.elapsed_ms(),
    };

    info!(
        stage = ctx.stage_name,
        stage_index = ctx.stage_index,
        attempts = metadata.attempts,
        kept = metadata.kept,
        pruned = metadata.pruned,
        rejected = metadata.rejected,
        truncated = metadata.truncated,
        best = candidates.first().map(|c| c.score),
        "Stage complete"
    );
    if metadata.truncated {
        warn!(stage = ctx.stage_name, "Stage budget exhausted; result truncated");
    }
    if candidates.is_empty() {
        warn!(stage = ctx.stage_name, "Stage produced no candidates");
    }

    StageResult {
        stage_index: ctx.stage_index,
        stage_name: ctx.stage_name.to_string(),
        ranked: candidates,
        attempts,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::AttemptLog;
    use crate::scoring::{LinguisticScorer, ScoreCache, ScoringConfig};
    use crate::types::MaskHypothesis;
    use k4_common::{LanguageResources, NgramTable};
    use std::sync::Arc;

    const TEXT: &str = "THEOTHERRWHEREEANDTHEN";

    fn cache() -> ScoreCache {
        let table = NgramTable::from_counts(2, [("TH", 10u64), ("HE", 8), ("ER", 5)]).unwrap();
        let resources = Arc::new(LanguageResources::new(vec![table], None).unwrap());
        let scorer = Arc::new(LinguisticScorer::new(resources, ScoringConfig::default(), &[]));
        ScoreCache::new(scorer, 64)
    }

    /// Drop one letter per trial, so neighbouring positions in a double letter collide
    fn run_positions(chunk: usize, budget: Budget, limit: usize) -> (KeptCandidates, Vec<usize>, bool) {
        let cache = cache();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap();
        let log = AttemptLog::new();
        let ctx = StageContext {
            stage_index: 0,
            stage_name: "masking",
            cache: &cache,
            cribs: &[],
            pool: &pool,
            log: &log,
            seed: 0,
            candidate_limit: limit,
        };
        let input = Candidate::seed(TEXT.to_string(), &cache.get_or_compute(TEXT));
        let tracker = BudgetTracker::start(&budget);

        let kept = run_chunked(&ctx, &tracker, 0..TEXT.len(), chunk, |trial, position| {
            let hypothesis = MaskHypothesis::Position { position };
            let text = hypothesis.apply(TEXT);
            evaluate(&ctx, 0, &input, trial, AttemptParams::Masking { hypothesis }, text, None)
        });
        let trials = log.stage_attempts(0).iter().map(|a| a.trial).collect();
        (kept, trials, tracker.truncated())
    }

    #[test]
    fn test_chunked_trials_match_single_batch() {
        let (small, small_trials, _) = run_positions(3, Budget::unlimited(), 5);
        let (whole, whole_trials, _) = run_positions(TRIAL_CHUNK, Budget::unlimited(), 5);

        assert_eq!(small_trials, (0..TEXT.len()).collect::<Vec<_>>());
        assert_eq!(small_trials, whole_trials);
        assert_eq!(small.len(), 5);
        let texts = |k: KeptCandidates| k.into_ranked().into_iter().map(|c| c.text).collect::<Vec<_>>();
        assert_eq!(texts(small), texts(whole));
    }

    #[test]
    fn test_chunked_trials_stop_at_budget() {
        let (kept, trials, truncated) = run_positions(3, Budget::attempts(7), 50);
        assert_eq!(trials, (0..7).collect::<Vec<_>>());
        assert!(truncated);
        assert!(kept.len() <= 7);

        // Exactly enough budget is not a truncation
        let (_, trials, truncated) = run_positions(4, Budget::attempts(TEXT.len()), 50);
        assert_eq!(trials.len(), TEXT.len());
        assert!(!truncated);
    }

    #[test]
    fn test_kept_candidates_dedupe_and_cap() {
        let cache = cache();
        let candidate = |text: &str| Candidate::seed(text.to_string(), &cache.get_or_compute(text));
        let mut kept = KeptCandidates::new(2);
        kept.merge([candidate("THETHE"), candidate("XQZXQZ")]);
        kept.merge([candidate("THETHE"), candidate("THERE")]);

        assert_eq!(kept.duplicates(), 1);
        let texts: Vec<String> = kept.into_ranked().into_iter().map(|c| c.text).collect();
        assert_eq!(texts.len(), 2);
        assert!(!texts.contains(&"XQZXQZ".to_string()));
    }
}

// Pipeline Orchestrator
//
// Concept: Run a configured sequence of cipher stages over one ciphertext
// Synchronization: Accepts ciphertext + PipelineConfig, outputs PipelineOutcome
//
// Workflow:
// 1. Validate the whole configuration before any attempt runs
// 2. Derive the content-hash run id
// 3. Seed stage 0 with the untransformed ciphertext
// 4. Carry each stage's top-K candidates into the next stage
// 5. Fuse the last stage's candidates into the final ranking

pub mod state;

pub use state::{PipelineState, StateTransition};

use crate::artifacts::{AttemptLog, RunId};
use crate::error::{EngineError, EngineResult};
use crate::fusion::{FusedCandidate, FusionConfig, FusionEngine, FusionOutcome};
use crate::scoring::{CacheStats, Crib, LinguisticScorer, ScoreCache, ScoringConfig};
use crate::stages::{StageContext, StageSpec, ValidationContext};
use crate::types::{Attempt, Candidate, Lineage, LineageLink, StageResult};
use chrono::Utc;
use k4_common::text::normalize;
use k4_common::LanguageResources;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Largest accepted worker count
pub const MAX_WORKERS: usize = 1024;

/// Complete run configuration
///
/// Serialized canonically (fields in declaration order, maps sorted) into
/// the run id, so two runs with equal configs share an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub stages: Vec<StageSpec>,

    /// Candidates carried from one stage into the next
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Candidates kept in the final ranking
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,

    #[serde(default)]
    pub cribs: Vec<Crib>,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub fusion: FusionConfig,

    /// Seed for sampled searches
    #[serde(default)]
    pub seed: u64,

    /// Worker threads (0 = one per CPU, at most [`MAX_WORKERS`])
    #[serde(default)]
    pub workers: usize,

    /// Score cache capacity in entries
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_top_k() -> usize {
    10
}

fn default_final_limit() -> usize {
    25
}

fn default_cache_capacity() -> usize {
    100_000
}

impl PipelineConfig {
    pub fn new(stages: Vec<StageSpec>) -> Self {
        Self {
            stages,
            top_k: default_top_k(),
            final_limit: default_final_limit(),
            cribs: Vec::new(),
            scoring: ScoringConfig::default(),
            fusion: FusionConfig::default(),
            seed: 0,
            workers: 0,
            cache_capacity: default_cache_capacity(),
        }
    }

    /// Reject the configuration before anything runs
    pub fn validate(&self, text_len: usize) -> EngineResult<()> {
        if text_len == 0 {
            return Err(EngineError::Configuration(
                "Ciphertext contains no letters".to_string(),
            ));
        }
        if self.stages.is_empty() {
            return Err(EngineError::Configuration(
                "Pipeline has no stages".to_string(),
            ));
        }
        if self.top_k == 0 || self.final_limit == 0 {
            return Err(EngineError::Configuration(
                "top_k and final_limit must be at least 1".to_string(),
            ));
        }
        if self.workers > MAX_WORKERS {
            return Err(EngineError::Configuration(format!(
                "workers must be at most {} (0 = one per CPU), got {}",
                MAX_WORKERS, self.workers
            )));
        }
        if self.cache_capacity == 0 {
            return Err(EngineError::Configuration(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        for crib in &self.cribs {
            crib.validate(text_len)?;
        }
        self.scoring.validate()?;
        self.fusion.validate()?;

        let ctx = ValidationContext {
            text_len,
            cribs: &self.cribs,
        };
        for (index, spec) in self.stages.iter().enumerate() {
            let named = |msg: String| {
                EngineError::Configuration(format!(
                    "Stage {} '{}': {}",
                    index,
                    spec.display_name(),
                    msg
                ))
            };
            if spec.candidate_limit == Some(0) {
                return Err(named("candidate_limit must be at least 1".to_string()));
            }
            spec.kind.stage().validate(&ctx).map_err(|e| match e {
                EngineError::Configuration(msg) => named(msg),
                other => other,
            })?;
        }
        Ok(())
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub run_id: RunId,
    /// Normalized ciphertext
    pub ciphertext: String,
    pub config: PipelineConfig,
    pub stages: Vec<StageResult>,
    pub fusion: FusionOutcome,
    /// Every attempt in canonical order
    pub attempts: Vec<Attempt>,
    pub cache_stats: CacheStats,
    pub transitions: Vec<StateTransition>,
}

impl PipelineOutcome {
    pub fn best(&self) -> Option<&FusedCandidate> {
        self.fusion.ranked.first()
    }

    /// Stage-by-stage derivation of a final candidate
    pub fn lineage(&self, fused: &FusedCandidate) -> Lineage {
        let mut links = Vec::new();
        let Some(last) = self.stages.last() else {
            return Lineage::default();
        };

        let mut current: Option<(usize, usize, &Candidate)> =
            Some((last.stage_index, fused.stage_rank, &fused.candidate));
        while let Some((stage_index, rank, candidate)) = current {
            if let Some(step) = candidate.transform_trace.last() {
                links.push(LineageLink {
                    stage_index,
                    stage_name: self.stages[stage_index].stage_name.clone(),
                    rank,
                    step: step.clone(),
                    score: candidate.score,
                });
            }
            current = candidate.parent.and_then(|p| {
                self.stages
                    .get(p.stage_index)
                    .and_then(|s| s.ranked.get(p.rank))
                    .map(|c| (p.stage_index, p.rank, c))
            });
        }
        links.reverse();
        Lineage { links }
    }
}

/// Stage sequence orchestrator
pub struct Pipeline {
    config: PipelineConfig,
    resources: Arc<LanguageResources>,
    state: PipelineState,
    transitions: Vec<StateTransition>,
    log: Option<Arc<AttemptLog>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, resources: Arc<LanguageResources>) -> Self {
        Self {
            config,
            resources,
            state: PipelineState::Idle,
            transitions: Vec::new(),
            log: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Attempts recorded by the current run so far
    pub fn attempts_logged(&self) -> usize {
        self.log.as_ref().map(|l| l.len()).unwrap_or(0)
    }

    fn transition_to(&mut self, new_state: PipelineState) -> EngineResult<()> {
        if !self.state.can_transition_to(&new_state) {
            return Err(EngineError::Internal(format!(
                "Invalid pipeline transition {:?} -> {:?}",
                self.state, new_state
            )));
        }
        self.transitions.push(StateTransition {
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        });
        self.state = new_state;
        Ok(())
    }

    fn fail(&mut self, err: &EngineError) {
        error!(code = err.code(), "Pipeline failed: {}", err);
        if let Err(e) = self.transition_to(PipelineState::Failed) {
            warn!(state = ?self.state, "Failure not recorded as a state change: {}", e);
        }
    }

    /// Run every stage over `ciphertext` and fuse the result
    pub fn run(&mut self, ciphertext: &str) -> EngineResult<PipelineOutcome> {
        if self.state != PipelineState::Idle {
            return Err(EngineError::Internal(format!(
                "Pipeline already used (state {:?})",
                self.state
            )));
        }
        match self.execute(ciphertext) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn execute(&mut self, ciphertext: &str) -> EngineResult<PipelineOutcome> {
        let text = normalize(ciphertext);
        let config = self.config.clone();
        config.validate(text.len())?;

        let run_id = RunId::derive(&text, &config)?;
        info!(
            run_id = %run_id.short(),
            letters = text.len(),
            stages = config.stages.len(),
            "Pipeline starting"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("k4-worker-{}", i))
            .build()
            .map_err(|e| EngineError::Internal(format!("Worker pool: {}", e)))?;

        let scorer = Arc::new(LinguisticScorer::new(
            Arc::clone(&self.resources),
            config.scoring.clone(),
            &config.cribs,
        ));
        let cache = ScoreCache::new(scorer, config.cache_capacity);
        let log = Arc::new(AttemptLog::new());
        self.log = Some(Arc::clone(&log));

        let seed = Candidate::seed(text.clone(), &cache.get_or_compute(&text));
        let mut inputs = vec![seed];
        let mut results: Vec<StageResult> = Vec::with_capacity(config.stages.len());

        for (stage_index, spec) in config.stages.iter().enumerate() {
            self.transition_to(PipelineState::Running { stage_index })?;
            let stage_name = spec.display_name();
            let ctx = StageContext {
                stage_index,
                stage_name: &stage_name,
                cache: &cache,
                cribs: &config.cribs,
                pool: &pool,
                log: &log,
                seed: config.seed,
                candidate_limit: spec.candidate_limit.unwrap_or(config.top_k),
            };
            let result = spec.kind.stage().search(&inputs, &ctx, &spec.budget);
            inputs = result.ranked.iter().take(config.top_k).cloned().collect();
            results.push(result);
        }

        let final_pool = results.last().map(|r| r.ranked.clone()).unwrap_or_default();
        let fusion = FusionEngine::new(config.fusion.clone()).fuse(final_pool, config.final_limit);
        self.transition_to(PipelineState::Fused)?;

        let cache_stats = cache.stats();
        info!(
            run_id = %run_id.short(),
            attempts = log.len(),
            final_candidates = fusion.ranked.len(),
            cache_hits = cache_stats.hits,
            cache_computations = cache_stats.computations,
            best = fusion.ranked.first().map(|f| f.candidate.text.as_str()),
            "Pipeline complete"
        );

        self.transition_to(PipelineState::Done)?;
        Ok(PipelineOutcome {
            run_id,
            ciphertext: text,
            config,
            stages: results,
            fusion,
            attempts: log.snapshot(),
            cache_stats,
            transitions: self.transitions.clone(),
        })
    }
}

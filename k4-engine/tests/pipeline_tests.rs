//! End-to-end pipeline tests
//!
//! Each test encrypts a corpus passage with a known key, runs a configured
//! stage sequence over the ciphertext and checks what comes back: the
//! recovered plaintext, the attempt log and the budget accounting.

mod helpers;

use helpers::{corpus_resources, passage, single_stage};
use k4_common::text::{from_indices, to_indices};
use k4_engine::scoring::{Crib, LinguisticScorer, ScoringConfig};
use k4_engine::stages::berlin_clock::{apply_keystream, LampState};
use k4_engine::stages::modular::ModMatrix;
use k4_engine::stages::routes::Grid;
use k4_engine::stages::transposition::TranspositionMode;
use k4_engine::stages::{BerlinClockStage, Budget, HillStage, StageKind, StageSpec, TranspositionStage};
use k4_engine::types::{
    AttemptOutcome, AttemptParams, ClockTime, KeySource, KeystreamEncoding, Metric, RejectReason,
    Route, ShiftDirection,
};
use k4_engine::{run_pipeline, Pipeline, PipelineConfig, PipelineState};

const TRANSPOSITION_ORDER: [usize; 5] = [2, 0, 4, 1, 3];

fn transposed_passage() -> (String, String) {
    let plain = passage("A simple transposition writes", 320);
    let grid = Grid::new(plain.len(), TRANSPOSITION_ORDER.len());
    let cipher = from_indices(&grid.encrypt(&to_indices(&plain), &TRANSPOSITION_ORDER, Route::Rows));
    (plain, cipher)
}

fn hill_passage() -> (String, String) {
    let plain = passage("The surveyor walked east", 60);
    let key = ModMatrix::from_rows(&[vec![3, 3], vec![2, 5]]).unwrap();
    let cipher = from_indices(&key.apply_text(&to_indices(&plain)));
    (plain, cipher)
}

fn transposition(min_period: usize, max_period: usize, mode: TranspositionMode) -> TranspositionStage {
    TranspositionStage {
        min_period,
        max_period,
        mode,
        ..Default::default()
    }
}

// ============================================================================
// Hill stage
// ============================================================================

/// A 20-letter crib is enough to solve a 2x2 key and decrypt the whole text
#[test]
fn test_hill_2x2_recovers_plaintext_from_crib() {
    // Given: a passage encrypted with [[3,3],[2,5]] and a crib at offset 20
    let res = corpus_resources();
    let (plain, cipher) = hill_passage();
    let crib = Crib::new(&plain[20..40], 20);
    let stage = HillStage {
        sizes: vec![2],
        ..Default::default()
    };
    let config = single_stage(StageKind::Hill(stage), vec![crib]);

    // When: the pipeline runs
    let outcome = run_pipeline(&cipher, config, res.resources.clone()).unwrap();

    // Then: the best candidate is the plaintext, derived with the inverse key
    let best = outcome.best().expect("at least one candidate");
    assert_eq!(best.candidate.text, plain);
    match &best.candidate.transform_trace[0].params {
        AttemptParams::Hill { size, key, .. } => {
            assert_eq!(*size, 2);
            assert_eq!(key, &vec![vec![15, 17], vec![20, 9]]);
        }
        other => panic!("unexpected params {:?}", other),
    }
    assert_eq!(best.candidate.metric(Metric::PositionalCribBonus), 2.0);
}

/// Pruning never discards a key whose prefix clears the threshold
#[test]
fn test_hill_pruning_respects_threshold() {
    let res = corpus_resources();
    let (plain, cipher) = hill_passage();

    // Misaligned placements (tolerance 1) produce many wrong keys to prune
    let crib = Crib::new(&plain[20..40], 20).with_tolerance(1);
    let scorer = LinguisticScorer::new(res.resources.clone(), ScoringConfig::default(), &[]);
    let threshold = scorer.partial_score(&to_indices(&plain[..24])) - 0.25;

    let stage = HillStage {
        sizes: vec![2],
        prune_threshold: Some(threshold),
        ..Default::default()
    };
    let config = single_stage(StageKind::Hill(stage), vec![crib]);
    let outcome = run_pipeline(&cipher, config, res.resources.clone()).unwrap();

    assert_eq!(outcome.best().unwrap().candidate.text, plain);
    assert!(outcome.stages[0].metadata.pruned > 0);

    for attempt in &outcome.attempts {
        match attempt.outcome {
            AttemptOutcome::Pruned => assert!(attempt.partial_score.unwrap() < threshold),
            AttemptOutcome::Kept => assert!(attempt.partial_score.unwrap() >= threshold),
            AttemptOutcome::Rejected => {
                assert_eq!(attempt.reason, Some(RejectReason::NonInvertibleMatrix))
            }
        }
    }
}

/// Pruning everything is an empty result, not an error
#[test]
fn test_hill_all_pruned_is_empty_result() {
    let res = corpus_resources();
    let (plain, cipher) = hill_passage();
    let stage = HillStage {
        sizes: vec![2],
        // Log probabilities are negative, so nothing reaches 0
        prune_threshold: Some(0.0),
        ..Default::default()
    };
    let config = single_stage(StageKind::Hill(stage), vec![Crib::new(&plain[20..40], 20)]);

    let mut pipeline = Pipeline::new(config, res.resources.clone());
    let outcome = pipeline.run(&cipher).unwrap();

    assert_eq!(pipeline.state(), PipelineState::Done);
    assert!(outcome.best().is_none());
    assert_eq!(outcome.stages[0].metadata.kept, 0);
    assert!(outcome.stages[0].metadata.pruned > 0);
    assert!(!outcome.attempts.is_empty());
}

/// A 30-letter crib gives enough aligned 3-blocks to solve a full 3x3 key
#[test]
fn test_hill_3x3_recovers_plaintext_from_crib() {
    let res = corpus_resources();
    let plain = passage("The surveyor walked east", 90);
    let key = ModMatrix::from_rows(&[vec![6, 24, 1], vec![13, 16, 10], vec![20, 17, 15]]).unwrap();
    let cipher = from_indices(&key.apply_text(&to_indices(&plain)));

    let stage = HillStage {
        sizes: vec![3],
        ..Default::default()
    };
    let config = single_stage(StageKind::Hill(stage), vec![Crib::new(&plain[30..60], 30)]);
    let outcome = run_pipeline(&cipher, config, res.resources.clone()).unwrap();

    let best = outcome.best().expect("at least one candidate");
    assert_eq!(best.candidate.text, plain);
    match &best.candidate.transform_trace[0].params {
        AttemptParams::Hill { size, key, .. } => {
            assert_eq!(*size, 3);
            assert_eq!(key, &vec![vec![8, 5, 10], vec![21, 8, 21], vec![21, 12, 8]]);
        }
        other => panic!("unexpected params {:?}", other),
    }
}

/// Two aligned 3-blocks cannot solve a 3x3 key directly, but a key with a
/// zero in every row is rebuilt row by row
#[test]
fn test_hill_3x3_row_blocks_from_short_crib() {
    let res = corpus_resources();
    let plain = passage("The surveyor walked east", 90);
    // Inverse of the decryption key [[21,0,12],[12,11,0],[0,12,5]]
    let key = ModMatrix::from_rows(&[vec![25, 4, 18], vec![20, 17, 4], vec![4, 6, 1]]).unwrap();
    let cipher = from_indices(&key.apply_text(&to_indices(&plain)));

    let stage = HillStage {
        sizes: vec![3],
        ..Default::default()
    };
    let config = single_stage(StageKind::Hill(stage), vec![Crib::new(&plain[30..36], 30)]);
    let outcome = run_pipeline(&cipher, config, res.resources.clone()).unwrap();

    let best = outcome.best().expect("at least one candidate");
    assert_eq!(best.candidate.text, plain);
    match &best.candidate.transform_trace[0].params {
        AttemptParams::Hill { key, source, .. } => {
            assert_eq!(key, &vec![vec![21, 0, 12], vec![12, 11, 0], vec![0, 12, 5]]);
            assert!(matches!(source, KeySource::RowBlocks { positions, .. } if positions == &vec![30, 33]));
        }
        other => panic!("unexpected params {:?}", other),
    }

    // No trial came from a direct three-block solve
    let direct = outcome.attempts.iter().any(|a| {
        matches!(
            &a.params,
            AttemptParams::Hill {
                source: KeySource::SlidingWindow { .. } | KeySource::CribBlocks { .. },
                size: 3,
                ..
            }
        )
    });
    assert!(!direct);
}

// ============================================================================
// Transposition stage
// ============================================================================

/// Exhaustive search over periods 4..=6 finds a period-5 transposition
#[test]
fn test_exhaustive_transposition_recovers_period_5() {
    let res = corpus_resources();
    let (plain, cipher) = transposed_passage();
    let mut config = single_stage(
        StageKind::Transposition(transposition(4, 6, TranspositionMode::Exhaustive)),
        Vec::new(),
    );
    config.final_limit = 10;

    let outcome = run_pipeline(&cipher, config, res.resources.clone()).unwrap();

    // 4! + 5! + 6! orders, nothing truncated
    let metadata = &outcome.stages[0].metadata;
    assert_eq!(metadata.attempts, 24 + 120 + 720);
    assert!(!metadata.truncated);

    assert!(outcome.fusion.ranked.len() <= 10);
    let found = outcome
        .fusion
        .ranked
        .iter()
        .find(|f| f.candidate.text == plain)
        .expect("plaintext in top 10");
    assert!(found.candidate.metric(Metric::WordlistHitRate) > 0.5);
    match &found.candidate.transform_trace[0].params {
        AttemptParams::Transposition { period, order, .. } => {
            assert_eq!(*period, 5);
            assert_eq!(order, &TRANSPOSITION_ORDER.to_vec());
        }
        other => panic!("unexpected params {:?}", other),
    }
}

/// Crib-constrained search explores fewer orders and keeps only consistent ones
#[test]
fn test_adaptive_transposition_uses_crib_constraints() {
    let res = corpus_resources();
    let (plain, cipher) = transposed_passage();
    let crib_text = plain[100..120].to_string();
    let config = single_stage(
        StageKind::Transposition(transposition(4, 6, TranspositionMode::Adaptive)),
        vec![Crib::new(&crib_text, 100)],
    );

    let outcome = run_pipeline(&cipher, config, res.resources.clone()).unwrap();

    assert_eq!(outcome.best().unwrap().candidate.text, plain);

    let stage = &outcome.stages[0];
    assert!(stage.metadata.kept < 24 + 120 + 720);
    assert!(stage
        .attempts
        .iter()
        .any(|a| a.reason == Some(RejectReason::CribMismatch)));
    for candidate in &stage.ranked {
        assert_eq!(&candidate.text[100..120], crib_text);
    }
}

// ============================================================================
// Budgets
// ============================================================================

/// An attempt budget caps the log and marks the stage truncated
#[test]
fn test_attempt_budget_truncates_stage() {
    let res = corpus_resources();
    let (_, cipher) = transposed_passage();
    let stage = StageSpec::new(StageKind::Transposition(transposition(
        4,
        6,
        TranspositionMode::Exhaustive,
    )))
    .with_budget(Budget::attempts(50));
    let mut config = PipelineConfig::new(vec![stage]);
    config.workers = 4;

    let outcome = run_pipeline(&cipher, config, res.resources.clone()).unwrap();

    assert_eq!(outcome.attempts.len(), 50);
    assert_eq!(outcome.stages[0].metadata.attempts, 50);
    assert!(outcome.stages[0].metadata.truncated);

    // Trial ids are the first 50 in enumeration order
    let trials: Vec<usize> = outcome.attempts.iter().map(|a| a.trial).collect();
    assert_eq!(trials, (0..50).collect::<Vec<_>>());
}

/// An expired time budget stops the stage before any trial
#[test]
fn test_time_budget_truncates_stage() {
    let res = corpus_resources();
    let (_, cipher) = transposed_passage();
    let stage = StageSpec::new(StageKind::Transposition(transposition(
        4,
        6,
        TranspositionMode::Exhaustive,
    )))
    .with_budget(Budget {
        max_attempts: None,
        max_millis: Some(0),
    });
    let outcome = run_pipeline(&cipher, PipelineConfig::new(vec![stage]), res.resources.clone()).unwrap();

    assert!(outcome.stages[0].metadata.truncated);
    assert!(outcome.stages[0].ranked.is_empty());
}

// ============================================================================
// Multi-stage composition
// ============================================================================

/// Berlin Clock shift over a transposition: each stage peels one layer
#[test]
fn test_clock_then_transposition_with_lineage() {
    // Given: plaintext transposed, then shifted by the 10:17 lamp keystream
    let res = corpus_resources();
    let (plain, transposed) = transposed_passage();
    let time = ClockTime::try_from("10:17".to_string()).unwrap();
    let keystream = LampState::at(time).keystream(KeystreamEncoding::LampCounts);
    let cipher = from_indices(&apply_keystream(
        &to_indices(&transposed),
        &keystream,
        ShiftDirection::Add,
    ));

    let clock = BerlinClockStage {
        start: ClockTime::try_from("10:00".to_string()).unwrap(),
        end: ClockTime::try_from("10:30".to_string()).unwrap(),
        ..Default::default()
    };
    let mut config = PipelineConfig::new(vec![
        StageSpec::new(StageKind::BerlinClock(clock)),
        StageSpec::new(StageKind::Transposition(transposition(
            5,
            5,
            TranspositionMode::Exhaustive,
        ))),
    ]);
    config.workers = 4;

    // When: both stages run
    let outcome = run_pipeline(&cipher, config, res.resources.clone()).unwrap();

    // Then: the plaintext wins and its lineage names both stages in order
    let best = outcome.best().unwrap();
    assert_eq!(best.candidate.text, plain);
    assert_eq!(best.candidate.lineage_scores.len(), 2);

    let lineage = outcome.lineage(best);
    let names: Vec<&str> = lineage.links.iter().map(|l| l.stage_name.as_str()).collect();
    assert_eq!(names, vec!["berlin_clock", "transposition"]);
    match &lineage.links[0].step.params {
        AttemptParams::BerlinClock { time: t, direction, .. } => {
            assert_eq!(*t, time);
            assert_eq!(*direction, ShiftDirection::Subtract);
        }
        other => panic!("unexpected params {:?}", other),
    }
    assert_eq!(lineage.links[0].stage_index, 0);
    assert_eq!(lineage.links[1].stage_index, 1);
    assert_eq!(lineage.transform_trace(), best.candidate.transform_trace);

    // Stage 1 saw at most top_k inputs
    assert!(outcome.stages[1].metadata.inputs <= 10);
}

//! Append-only attempt log
//!
//! Workers append concurrently in completion order. Readers always get the
//! canonical order `(stage_index, trial)`, so the persisted log is identical
//! across runs regardless of scheduling.

use crate::types::Attempt;
use std::sync::Mutex;

/// Run-wide attempt log
#[derive(Debug, Default)]
pub struct AttemptLog {
    records: Mutex<Vec<Attempt>>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record; records are never modified or removed
    pub fn append(&self, attempt: Attempt) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push(attempt);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records in canonical order
    pub fn snapshot(&self) -> Vec<Attempt> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner()).clone();
        records.sort_by_key(|a| (a.stage_index, a.trial));
        records
    }

    /// Records of one stage in trial order
    pub fn stage_attempts(&self, stage_index: usize) -> Vec<Attempt> {
        let mut records: Vec<Attempt> = self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|a| a.stage_index == stage_index)
            .cloned()
            .collect();
        records.sort_by_key(|a| a.trial);
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttemptOutcome, AttemptParams, MaskHypothesis};
    use std::thread;

    fn attempt(stage_index: usize, trial: usize) -> Attempt {
        Attempt {
            stage_index,
            stage_name: "masking".into(),
            input_index: 0,
            trial,
            params: AttemptParams::Masking {
                hypothesis: MaskHypothesis::Identity,
            },
            partial_score: None,
            score: Some(-1.0),
            outcome: AttemptOutcome::Kept,
            reason: None,
        }
    }

    #[test]
    fn test_concurrent_appends_are_all_kept_and_ordered() {
        let log = AttemptLog::new();
        thread::scope(|s| {
            for worker in 0..4 {
                let log = &log;
                s.spawn(move || {
                    for i in 0..25 {
                        log.append(attempt(1 - worker % 2, worker * 25 + i));
                    }
                });
            }
        });

        assert_eq!(log.len(), 100);
        let snapshot = log.snapshot();
        assert!(snapshot
            .windows(2)
            .all(|w| (w[0].stage_index, w[0].trial) < (w[1].stage_index, w[1].trial)));
        assert_eq!(log.stage_attempts(0).len(), 50);
    }
}

//! Bounded, concurrency-safe memo of scorer results
//!
//! Keys are canonical (normalized) texts. A lookup that misses installs an
//! empty slot under the lock and then computes outside it, so concurrent
//! requests for the same text wait on the one in-flight computation instead of
//! scoring it again. Least-recently-used slots are evicted past capacity.
//!
//! The cache is an optimization only: cold and warm lookups return identical
//! breakdowns because the scorer is pure.

use super::LinguisticScorer;
use crate::types::ScoreBreakdown;
use k4_common::text::normalize;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

/// Cache counters (snapshot)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Scorer invocations actually performed
    pub computations: u64,
    pub evictions: u64,
}

struct Slot {
    cell: Arc<OnceLock<ScoreBreakdown>>,
    tick: u64,
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<String, Slot>,
    /// tick -> key, oldest first
    recency: BTreeMap<u64, String>,
    tick: u64,
}

/// Bounded LRU score cache with single-flight computation
pub struct ScoreCache {
    scorer: Arc<LinguisticScorer>,
    capacity: usize,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    evictions: AtomicU64,
}

impl ScoreCache {
    pub fn new(scorer: Arc<LinguisticScorer>, capacity: usize) -> Self {
        Self {
            scorer,
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn scorer(&self) -> &LinguisticScorer {
        &self.scorer
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Score `text`, computing at most once per canonical key while resident
    pub fn get_or_compute(&self, text: &str) -> ScoreBreakdown {
        let key = normalize(text);
        let cell = self.slot_for(&key);
        let value = cell.get_or_init(|| {
            self.computations.fetch_add(1, Ordering::Relaxed);
            self.scorer.score_normalized(&key)
        });
        value.clone()
    }

    /// Find or install the slot for `key`, updating recency
    fn slot_for(&self, key: &str) -> Arc<OnceLock<ScoreBreakdown>> {
        // A poisoned lock only means another worker panicked mid-update; the
        // map itself is still consistent, so keep serving from it.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tick += 1;
        let tick = state.tick;

        if let Some(slot) = state.slots.get_mut(key) {
            let previous = slot.tick;
            slot.tick = tick;
            let cell = Arc::clone(&slot.cell);
            state.recency.remove(&previous);
            state.recency.insert(tick, key.to_string());
            self.hits.fetch_add(1, Ordering::Relaxed);
            return cell;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        // In-flight slots stay resident so their waiters share one computation;
        // with nothing finished to evict the cache briefly runs over capacity.
        while state.slots.len() >= self.capacity {
            let victim = state
                .recency
                .iter()
                .find(|(_, k)| state.slots.get(*k).is_some_and(|s| s.cell.get().is_some()))
                .map(|(&t, k)| (t, k.clone()));
            let Some((oldest_tick, oldest)) = victim else {
                break;
            };
            state.recency.remove(&oldest_tick);
            state.slots.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        let cell = Arc::new(OnceLock::new());
        state.slots.insert(
            key.to_string(),
            Slot {
                cell: Arc::clone(&cell),
                tick,
            },
        );
        state.recency.insert(tick, key.to_string());
        cell
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.slots.len())
            .unwrap_or_else(|e| e.into_inner().slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, text: &str) -> bool {
        let key = normalize(text);
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.slots.contains_key(&key)
    }

    pub fn stats(&self) -> CacheStats {
        let stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        };
        debug!(?stats, "Score cache stats");
        stats
    }
}

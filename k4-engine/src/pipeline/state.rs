//! Pipeline state machine
//!
//! IDLE → RUNNING(0) → … → RUNNING(n-1) → FUSED → DONE, with FAILED reachable
//! only from IDLE. Everything that can fail is checked before the first stage
//! starts; once running, exhausted budgets and empty stages are ordinary
//! results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    /// Configured, not started
    Idle,
    /// Executing one stage
    Running { stage_index: usize },
    /// All stages done, final ranking produced
    Fused,
    /// Results handed back to the caller
    Done,
    /// Rejected before any stage ran
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    /// Allowed transitions
    pub fn can_transition_to(&self, next: &PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Idle, Running { stage_index: 0 }) => true,
            (Running { stage_index: a }, Running { stage_index: b }) => *b == a + 1,
            (Running { .. }, Fused) => true,
            (Fused, Done) => true,
            (Idle, Failed) => true,
            _ => false,
        }
    }
}

/// Recorded state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub old_state: PipelineState,
    pub new_state: PipelineState,
    pub transitioned_at: DateTime<Utc>,
}

//! Per-run mutable state

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::registry::Intent;

/// One step execution: which step ran and the intent it produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "step-id")]
    pub step_id: String,
    pub intent: Intent,
}

/// Cursor, budget counter, handoff bag, and history for one execution
///
/// Owned exclusively by a single runner; created at task start and
/// discarded at the terminal state.
#[derive(Debug, Default)]
pub struct RunState {
    /// Step the next iteration executes
    pub current_step_id: String,

    /// Iterations consumed so far
    pub iteration_count: u32,

    /// Accumulated handoff data; later keys overwrite earlier ones
    pub handoff: Map<String, Value>,

    /// Ordered step/intent log
    pub history: Vec<HistoryEntry>,
}

impl RunState {
    pub fn new(entry_step: impl Into<String>) -> Self {
        Self {
            current_step_id: entry_step.into(),
            iteration_count: 0,
            handoff: Map::new(),
            history: Vec::new(),
        }
    }

    /// Append one executed step and its interpreted intent
    pub fn record(&mut self, step_id: &str, intent: Intent) {
        self.history.push(HistoryEntry {
            step_id: step_id.to_string(),
            intent,
        });
    }

    /// Merge gate handoff output into the accumulated bag
    pub fn absorb_handoff(&mut self, handoff: Map<String, Value>) {
        for (key, value) in handoff {
            self.handoff.insert(key, value);
        }
    }

    /// Step ids in execution order
    pub fn step_trail(&self) -> Vec<String> {
        self.history.iter().map(|entry| entry.step_id.clone()).collect()
    }
}

//! Event types for flow activity streaming
//!
//! Every observable moment of a run is an event: lifecycle, model
//! invocations, gate decisions, routing, completion validation, retries,
//! and requested external actions. Consumers subscribe through the bus;
//! the engine never waits on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Core event enum, the vocabulary of flow activity
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    /// A run has started at its entry step
    RunStarted {
        run_id: String,
        agent_id: String,
        entry_step: String,
    },
    /// An iteration has started on a step
    IterationStarted {
        run_id: String,
        iteration: u32,
        step_id: String,
    },
    /// The model was invoked for a step
    StepInvoked {
        run_id: String,
        iteration: u32,
        step_id: String,
        /// First 200 chars of the composed prompt
        prompt_summary: String,
    },
    /// The gate interpreted an intent from the structured result
    IntentInterpreted {
        run_id: String,
        iteration: u32,
        step_id: String,
        intent: String,
        used_fallback: bool,
    },
    /// Routing resolved the next step (`None` is a terminal)
    StepRouted {
        run_id: String,
        iteration: u32,
        from_step: String,
        to_step: Option<String>,
    },
    /// Completion validation has started on a closure step
    ValidationStarted {
        run_id: String,
        iteration: u32,
        step_id: String,
    },
    /// Completion validation finished
    ValidationCompleted {
        run_id: String,
        iteration: u32,
        step_id: String,
        valid: bool,
        failed_condition: Option<String>,
    },
    /// Retry guidance was issued after a failed validation
    RetryIssued {
        run_id: String,
        iteration: u32,
        step_id: String,
        pattern: Option<String>,
        guidance_summary: String,
    },
    /// The runner requested an external action (close, escalate)
    ActionRequested {
        run_id: String,
        step_id: String,
        action: String,
    },
    /// The run reached a terminal state
    RunCompleted {
        run_id: String,
        outcome: String,
        iterations: u32,
    },
    /// An error occurred
    Error {
        run_id: String,
        context: String,
        message: String,
    },
    /// A warning occurred
    Warning {
        run_id: String,
        context: String,
        message: String,
    },
}

impl FlowEvent {
    /// Get the run ID for this event
    pub fn run_id(&self) -> &str {
        match self {
            FlowEvent::RunStarted { run_id, .. }
            | FlowEvent::IterationStarted { run_id, .. }
            | FlowEvent::StepInvoked { run_id, .. }
            | FlowEvent::IntentInterpreted { run_id, .. }
            | FlowEvent::StepRouted { run_id, .. }
            | FlowEvent::ValidationStarted { run_id, .. }
            | FlowEvent::ValidationCompleted { run_id, .. }
            | FlowEvent::RetryIssued { run_id, .. }
            | FlowEvent::ActionRequested { run_id, .. }
            | FlowEvent::RunCompleted { run_id, .. }
            | FlowEvent::Error { run_id, .. }
            | FlowEvent::Warning { run_id, .. } => run_id,
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            FlowEvent::RunStarted { .. } => "RunStarted",
            FlowEvent::IterationStarted { .. } => "IterationStarted",
            FlowEvent::StepInvoked { .. } => "StepInvoked",
            FlowEvent::IntentInterpreted { .. } => "IntentInterpreted",
            FlowEvent::StepRouted { .. } => "StepRouted",
            FlowEvent::ValidationStarted { .. } => "ValidationStarted",
            FlowEvent::ValidationCompleted { .. } => "ValidationCompleted",
            FlowEvent::RetryIssued { .. } => "RetryIssued",
            FlowEvent::ActionRequested { .. } => "ActionRequested",
            FlowEvent::RunCompleted { .. } => "RunCompleted",
            FlowEvent::Error { .. } => "Error",
            FlowEvent::Warning { .. } => "Warning",
        }
    }
}

/// A timestamped event log entry for persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    pub event: FlowEvent,
}

impl EventLogEntry {
    /// Create a new log entry with the current timestamp
    pub fn new(event: FlowEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

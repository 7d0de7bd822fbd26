//! Event bus, the pub/sub channel for flow activity
//!
//! Built on tokio broadcast: the runner emits, any number of consumers
//! subscribe. Emission is fire-and-forget; a run never blocks on, or
//! fails because of, its observers.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::FlowEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Central event bus for one engine instance
pub struct EventBus {
    tx: broadcast::Sender<FlowEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped, and a
    /// full channel drops its oldest events.
    pub fn emit(&self, event: FlowEvent) {
        debug!(event_type = event.event_type(), run_id = event.run_id(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter handle bound to one run
    pub fn emitter_for(&self, run_id: impl Into<String>) -> EventEmitter {
        let run_id = run_id.into();
        debug!(%run_id, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: self.tx.clone(),
            run_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}

/// Cheap-to-clone handle that emits events with a pre-set run ID
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<FlowEvent>,
    run_id: String,
}

impl EventEmitter {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Emit a raw event
    pub fn emit(&self, event: FlowEvent) {
        debug!(event_type = event.event_type(), "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    pub fn run_started(&self, agent_id: &str, entry_step: &str) {
        self.emit(FlowEvent::RunStarted {
            run_id: self.run_id.clone(),
            agent_id: agent_id.to_string(),
            entry_step: entry_step.to_string(),
        });
    }

    pub fn iteration_started(&self, iteration: u32, step_id: &str) {
        self.emit(FlowEvent::IterationStarted {
            run_id: self.run_id.clone(),
            iteration,
            step_id: step_id.to_string(),
        });
    }

    pub fn step_invoked(&self, iteration: u32, step_id: &str, prompt_summary: &str) {
        self.emit(FlowEvent::StepInvoked {
            run_id: self.run_id.clone(),
            iteration,
            step_id: step_id.to_string(),
            prompt_summary: prompt_summary.to_string(),
        });
    }

    pub fn intent_interpreted(&self, iteration: u32, step_id: &str, intent: &str, used_fallback: bool) {
        self.emit(FlowEvent::IntentInterpreted {
            run_id: self.run_id.clone(),
            iteration,
            step_id: step_id.to_string(),
            intent: intent.to_string(),
            used_fallback,
        });
    }

    pub fn step_routed(&self, iteration: u32, from_step: &str, to_step: Option<&str>) {
        self.emit(FlowEvent::StepRouted {
            run_id: self.run_id.clone(),
            iteration,
            from_step: from_step.to_string(),
            to_step: to_step.map(str::to_string),
        });
    }

    pub fn validation_started(&self, iteration: u32, step_id: &str) {
        self.emit(FlowEvent::ValidationStarted {
            run_id: self.run_id.clone(),
            iteration,
            step_id: step_id.to_string(),
        });
    }

    pub fn validation_completed(
        &self,
        iteration: u32,
        step_id: &str,
        valid: bool,
        failed_condition: Option<&str>,
    ) {
        self.emit(FlowEvent::ValidationCompleted {
            run_id: self.run_id.clone(),
            iteration,
            step_id: step_id.to_string(),
            valid,
            failed_condition: failed_condition.map(str::to_string),
        });
    }

    pub fn retry_issued(
        &self,
        iteration: u32,
        step_id: &str,
        pattern: Option<&str>,
        guidance_summary: &str,
    ) {
        self.emit(FlowEvent::RetryIssued {
            run_id: self.run_id.clone(),
            iteration,
            step_id: step_id.to_string(),
            pattern: pattern.map(str::to_string),
            guidance_summary: guidance_summary.to_string(),
        });
    }

    pub fn action_requested(&self, step_id: &str, action: &str) {
        self.emit(FlowEvent::ActionRequested {
            run_id: self.run_id.clone(),
            step_id: step_id.to_string(),
            action: action.to_string(),
        });
    }

    pub fn run_completed(&self, outcome: &str, iterations: u32) {
        self.emit(FlowEvent::RunCompleted {
            run_id: self.run_id.clone(),
            outcome: outcome.to_string(),
            iterations,
        });
    }

    pub fn error(&self, context: &str, message: &str) {
        self.emit(FlowEvent::Error {
            run_id: self.run_id.clone(),
            context: context.to_string(),
            message: message.to_string(),
        });
    }

    pub fn warning(&self, context: &str, message: &str) {
        self.emit(FlowEvent::Warning {
            run_id: self.run_id.clone(),
            context: context.to_string(),
            message: message.to_string(),
        });
    }
}

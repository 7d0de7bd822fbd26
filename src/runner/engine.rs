//! FlowRunner - drives one execution through the dual loop
//!
//! Flow phase: resolve the current step's prompt, invoke the model,
//! interpret the structured result through the gate, route the intent.
//! Completion phase: once a closing intent arrives, run the step's
//! completion conditions; a failed check produces retry guidance and
//! re-enters the flow phase instead of finishing. The phases alternate
//! until a terminal state or the iteration budget runs out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::completion::{CompletionValidator, ExtractorRegistry};
use crate::config::RunnerConfig;
use crate::error::FlowError;
use crate::events::{EventBus, EventEmitter};
use crate::gate::{self, GateOutcome};
use crate::invoke::{ModelInvoker, StepInvocation};
use crate::prompts::{PromptLocator, PromptResolver};
use crate::registry::{Intent, StepDefinition, StepRegistry};
use crate::retry::RetryHandler;
use crate::router::{self, Route};
use crate::runner::dispatch::{ActionDispatcher, ActionRequest, NoopDispatcher};
use crate::runner::report::{RunOutcome, RunReport, RunUsage, generate_run_id};
use crate::runner::state::RunState;

/// Edition of the base prompt resolved for every step
const BASE_EDITION: &str = "base";

/// Event summaries carry at most this many characters
const SUMMARY_CHARS: usize = 200;

/// Drives one task execution end to end
pub struct FlowRunner {
    /// Run ID
    run_id: String,

    /// Immutable step registry shared across the run
    registry: Arc<StepRegistry>,

    /// Prompt source
    resolver: Arc<dyn PromptResolver>,

    /// Model invocation seam
    invoker: Arc<dyn ModelInvoker>,

    /// External action sink
    dispatcher: Arc<dyn ActionDispatcher>,

    /// Completion condition runner
    validator: CompletionValidator,

    /// Guidance builder for failed completion checks
    retry: RetryHandler,

    /// Bus this run publishes events on
    bus: Arc<EventBus>,

    /// Emitter bound to this run's id
    emitter: EventEmitter,

    config: RunnerConfig,

    /// Mutable per-run state
    state: RunState,

    /// Usage totals folded in after each invocation
    usage: RunUsage,

    /// Guidance carried into the next invocation after a failed check
    continuation: Option<String>,
}

impl FlowRunner {
    /// Create a runner positioned at the registry's entry step
    pub fn new(
        registry: Arc<StepRegistry>,
        resolver: Arc<dyn PromptResolver>,
        invoker: Arc<dyn ModelInvoker>,
        config: RunnerConfig,
    ) -> Result<Self, FlowError> {
        let run_id = generate_run_id();
        debug!(%run_id, agent_id = registry.agent_id(), "FlowRunner::new: called");

        let entry = registry.entry_for(config.mode.as_deref())?.to_string();
        let bus = Arc::new(EventBus::with_default_capacity());
        let emitter = bus.emitter_for(&run_id);
        let validator = CompletionValidator::new(
            Arc::new(ExtractorRegistry::builtin()),
            config.workdir.clone(),
            Duration::from_millis(config.condition_timeout_ms),
        );

        Ok(Self {
            run_id,
            registry,
            resolver: Arc::clone(&resolver),
            invoker,
            dispatcher: Arc::new(NoopDispatcher),
            validator,
            retry: RetryHandler::new(resolver),
            bus,
            emitter,
            config,
            state: RunState::new(entry),
            usage: RunUsage::default(),
            continuation: None,
        })
    }

    /// Replace the default noop dispatcher
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        debug!(run_id = %self.run_id, "with_dispatcher: called");
        self.dispatcher = dispatcher;
        self
    }

    /// Publish events on a shared bus instead of the internal one
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        debug!(run_id = %self.run_id, "with_event_bus: called");
        self.emitter = bus.emitter_for(&self.run_id);
        self.bus = bus;
        self
    }

    /// Use a custom extractor registry for completion failures
    pub fn with_extractors(mut self, extractors: Arc<ExtractorRegistry>) -> Self {
        debug!(run_id = %self.run_id, "with_extractors: called");
        self.validator = CompletionValidator::new(
            extractors,
            self.config.workdir.clone(),
            Duration::from_millis(self.config.condition_timeout_ms),
        );
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Bus this run publishes to; subscribe before calling [`Self::run`]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Iterations consumed so far
    pub fn iteration(&self) -> u32 {
        self.state.iteration_count
    }

    /// Drive the run to a terminal state and report it
    ///
    /// Fatal flow errors are captured into the report, never panicked.
    pub async fn run(&mut self) -> RunReport {
        let started_at = Utc::now();
        info!(
            "Starting run {} (agent: {}, entry: {}, max_iterations: {})",
            self.run_id,
            self.registry.agent_id(),
            self.state.current_step_id,
            self.config.max_iterations
        );
        self.emitter.run_started(self.registry.agent_id(), &self.state.current_step_id);

        let verdict = self.drive().await;

        let (outcome, error_code, reason) = match verdict {
            Ok(()) => (RunOutcome::Success, None, None),
            Err(e) => {
                let outcome = match e {
                    FlowError::MaxIterations { .. } => RunOutcome::MaxIterations,
                    _ => RunOutcome::Fatal,
                };
                if outcome == RunOutcome::Fatal {
                    warn!("Run {} failed: {}", self.run_id, e);
                    self.emitter.error("run", &e.to_string());
                }
                (outcome, Some(e.code().to_string()), Some(e.to_string()))
            }
        };

        self.emitter.run_completed(outcome.as_str(), self.state.iteration_count);
        info!(
            "Run {} finished: {} after {} iterations",
            self.run_id, outcome, self.state.iteration_count
        );

        RunReport {
            run_id: self.run_id.clone(),
            outcome,
            iterations: self.state.iteration_count,
            history: self.state.history.clone(),
            error_code,
            reason,
            usage: self.usage,
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Iterate until success, a fatal error, or budget exhaustion
    async fn drive(&mut self) -> Result<(), FlowError> {
        let registry = Arc::clone(&self.registry);

        while self.state.iteration_count < self.config.max_iterations {
            self.state.iteration_count += 1;
            let iteration = self.state.iteration_count;
            let step_id = self.state.current_step_id.clone();

            info!(
                "Run {} iteration {}/{}: step '{}'",
                self.run_id, iteration, self.config.max_iterations, step_id
            );
            self.emitter.iteration_started(iteration, &step_id);

            let step = registry.require_step(&step_id)?;
            let result = self.invoke_step(step, &registry, iteration).await?;

            let outcome = gate::interpret(step, &result)?;
            debug!(
                run_id = %self.run_id,
                intent = %outcome.intent,
                used_fallback = outcome.used_fallback,
                "drive: intent interpreted"
            );
            self.emitter
                .intent_interpreted(iteration, &step_id, outcome.intent.as_str(), outcome.used_fallback);
            self.state.record(&step_id, outcome.intent);
            if !outcome.handoff.is_empty() {
                self.state.absorb_handoff(outcome.handoff.clone());
            }

            let next = if outcome.intent == Intent::Closing {
                match self.completion_phase(step, &registry, iteration).await? {
                    Some(next) => next,
                    None => return Ok(()),
                }
            } else {
                if outcome.intent == Intent::Escalate {
                    self.request_escalate(&step_id).await;
                }

                match router::resolve(step, &outcome, &self.state.handoff, &registry)? {
                    Route::Step(next) => {
                        self.emitter.step_routed(iteration, &step_id, Some(&next));
                        next
                    }
                    Route::Terminal => {
                        self.emitter.step_routed(iteration, &step_id, None);
                        if step.has_completion_conditions() {
                            // A terminal transition on a step that still owes
                            // completion checks: the verdict decides
                            debug!(run_id = %self.run_id, "drive: terminal route with pending conditions");
                            match self.completion_phase(step, &registry, iteration).await? {
                                Some(next) => next,
                                None => return Ok(()),
                            }
                        } else {
                            info!("Run {} reached a terminal transition at step '{}'", self.run_id, step_id);
                            return Ok(());
                        }
                    }
                }
            };

            debug!(run_id = %self.run_id, from = %step_id, to = %next, "drive: advancing");
            self.state.current_step_id = next;

            if self.config.iteration_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.iteration_delay_ms)).await;
            }
        }

        Err(FlowError::MaxIterations {
            limit: self.config.max_iterations,
        })
    }

    /// Resolve the base prompt and obtain one structured result
    async fn invoke_step(
        &mut self,
        step: &StepDefinition,
        registry: &StepRegistry,
        iteration: u32,
    ) -> Result<Value, FlowError> {
        let locator = PromptLocator::new("steps", &step.prompt_category, &step.prompt_target, BASE_EDITION);
        debug!(run_id = %self.run_id, %locator, "invoke_step: resolving prompt");
        let prompt = self
            .resolver
            .resolve(&locator)
            .await
            .map_err(|e| FlowError::Invocation(format!("prompt resolution failed for '{locator}': {e}")))?;

        let contract = match step.gate.as_ref().and_then(|gate| gate.intent_schema_ref.as_deref()) {
            Some(reference) => Some(registry.resolve_contract(reference)?.clone()),
            None => None,
        };

        let invocation = StepInvocation {
            step_id: step.step_id.clone(),
            prompt,
            continuation: self.continuation.take(),
            tools: step.tools.clone(),
            contract,
        };
        self.emitter
            .step_invoked(iteration, &step.step_id, &summarize(&invocation.prompt));

        let output = self
            .invoker
            .invoke(&invocation)
            .await
            .map_err(|e| FlowError::Invocation(e.to_string()))?;
        self.usage.add(&output.usage);

        Ok(output.result)
    }

    /// Run the step's completion conditions
    ///
    /// `None` means the run succeeded. `Some(step)` carries the retry
    /// target after a failed check, with guidance staged as the next
    /// continuation.
    async fn completion_phase(
        &mut self,
        step: &StepDefinition,
        registry: &StepRegistry,
        iteration: u32,
    ) -> Result<Option<String>, FlowError> {
        let step_id = step.step_id.as_str();
        debug!(
            run_id = %self.run_id,
            %step_id,
            conditions = step.completion_conditions.len(),
            "completion_phase: called"
        );
        self.emitter.validation_started(iteration, step_id);

        let verdict = self
            .validator
            .validate(&step.completion_conditions, registry.validators())
            .await;
        self.emitter
            .validation_completed(iteration, step_id, verdict.valid, verdict.failed_condition.as_deref());

        if verdict.valid {
            info!(
                "Run {} validated completion at step '{}' after {} iterations",
                self.run_id, step_id, iteration
            );
            self.request_close(step_id).await;
            return Ok(None);
        }

        let guidance = self.retry.build_guidance(step, &verdict, registry.patterns()).await;
        self.emitter.retry_issued(
            iteration,
            step_id,
            verdict.failure_pattern.as_deref(),
            &summarize(&guidance),
        );

        let next = self.retry_route(step, registry)?;
        self.emitter.step_routed(iteration, step_id, Some(&next));
        debug!(run_id = %self.run_id, %next, "completion_phase: rerouting after failed check");
        self.continuation = Some(guidance);
        Ok(Some(next))
    }

    /// Pick the step a failed completion check routes back to
    fn retry_route(&self, step: &StepDefinition, registry: &StepRegistry) -> Result<String, FlowError> {
        if let Some(retry_step) = &self.config.retry_step {
            if !registry.contains(retry_step) {
                return Err(FlowError::Routing {
                    step_id: step.step_id.clone(),
                    intent: Intent::Repeat.as_str().to_string(),
                    reason: format!("configured retry step '{retry_step}' is not in the registry"),
                });
            }
            return Ok(retry_step.clone());
        }

        let repeat = GateOutcome {
            intent: Intent::Repeat,
            target: None,
            handoff: Map::new(),
            used_fallback: false,
        };
        match router::resolve(step, &repeat, &self.state.handoff, registry)? {
            Route::Step(next) => Ok(next),
            Route::Terminal => Err(FlowError::Routing {
                step_id: step.step_id.clone(),
                intent: Intent::Repeat.as_str().to_string(),
                reason: "repeat transition resolved to a terminal state".to_string(),
            }),
        }
    }

    /// Ask the dispatcher to close out the external work item
    async fn request_close(&self, step_id: &str) {
        let mut payload = Map::new();
        payload.insert("iterations".to_string(), Value::from(self.state.iteration_count));
        payload.insert("steps".to_string(), Value::from(self.state.step_trail()));

        let request = ActionRequest {
            action: "close".to_string(),
            run_id: self.run_id.clone(),
            step_id: step_id.to_string(),
            payload,
        };
        self.emitter.action_requested(step_id, "close");
        if let Err(e) = self.dispatcher.close(&request).await {
            warn!("Close action failed: {}", e);
            self.emitter.warning("dispatch", &format!("close action failed: {e}"));
        }
    }

    /// Ask the dispatcher to escalate to a human operator
    async fn request_escalate(&self, step_id: &str) {
        let mut payload = Map::new();
        payload.insert("iterations".to_string(), Value::from(self.state.iteration_count));
        payload.insert("handoff".to_string(), Value::Object(self.state.handoff.clone()));

        let request = ActionRequest {
            action: "escalate".to_string(),
            run_id: self.run_id.clone(),
            step_id: step_id.to_string(),
            payload,
        };
        self.emitter.action_requested(step_id, "escalate");
        if let Err(e) = self.dispatcher.escalate(&request).await {
            warn!("Escalate action failed: {}", e);
            self.emitter.warning("dispatch", &format!("escalate action failed: {e}"));
        }
    }
}

/// First [`SUMMARY_CHARS`] characters, for event payloads
fn summarize(text: &str) -> String {
    text.chars().take(SUMMARY_CHARS).collect()
}

//! Workflow routing
//!
//! Maps an interpreted intent to the next step through the current step's
//! transition table. Direct rules may carry a fallback for unresolvable
//! targets; conditional rules branch on a handoff value with "default" as
//! the catch-all. A null target is a deliberate terminal, never an error.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::FlowError;
use crate::gate::GateOutcome;
use crate::registry::{Intent, StepDefinition, StepRegistry, TransitionRule};

/// Where the flow goes after one routed intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Advance to this step
    Step(String),

    /// Deliberate end of the flow
    Terminal,
}

/// Resolve the next step for an interpreted intent
///
/// `handoff` is the accumulated bag, already merged with the current
/// outcome's captures. Every resolved non-null id is checked against the
/// registry before it is returned.
pub fn resolve(
    step: &StepDefinition,
    outcome: &GateOutcome,
    handoff: &Map<String, Value>,
    registry: &StepRegistry,
) -> Result<Route, FlowError> {
    let intent = outcome.intent;
    debug!(step_id = %step.step_id, %intent, "resolve: called");

    let Some(rule) = step.transition(intent) else {
        return Err(routing_error(step, intent, "no transition rule declared"));
    };

    match rule {
        TransitionRule::Direct { target, fallback } => {
            // A gate-extracted jump target wins over the rule's own
            let primary = outcome.target.clone().or_else(|| target.clone());
            match primary {
                Some(id) if registry.contains(&id) => Ok(Route::Step(id)),
                Some(id) => match fallback {
                    Some(fb) if registry.contains(fb) => {
                        warn!(
                            step_id = %step.step_id,
                            target = %id,
                            fallback = %fb,
                            "Target not in the registry, routing to the fallback"
                        );
                        Ok(Route::Step(fb.clone()))
                    }
                    _ => Err(routing_error(
                        step,
                        intent,
                        &format!("target '{id}' is not in the registry"),
                    )),
                },
                None if intent == Intent::Jump => match fallback {
                    Some(fb) if registry.contains(fb) => Ok(Route::Step(fb.clone())),
                    _ => Err(routing_error(step, intent, "jump carries no target")),
                },
                None if intent == Intent::Repeat => {
                    Err(routing_error(step, intent, "repeat cannot target a terminal"))
                }
                None => Ok(Route::Terminal),
            }
        }
        TransitionRule::Conditional {
            condition_key,
            targets_by_value,
        } => {
            let rendered = handoff.get(condition_key.as_str()).map(render_condition_value);
            let branch = rendered
                .as_deref()
                .and_then(|value| targets_by_value.get(value))
                .or_else(|| targets_by_value.get("default"));

            let Some(branch) = branch else {
                let reason = match &rendered {
                    Some(value) => {
                        format!("no branch for '{condition_key}' value '{value}' and no default")
                    }
                    None => format!("handoff has no '{condition_key}' and no default branch"),
                };
                return Err(routing_error(step, intent, &reason));
            };

            match branch {
                Some(id) if registry.contains(id) => Ok(Route::Step(id.clone())),
                Some(id) => Err(routing_error(
                    step,
                    intent,
                    &format!("branch target '{id}' is not in the registry"),
                )),
                None if intent == Intent::Repeat => {
                    Err(routing_error(step, intent, "repeat cannot target a terminal"))
                }
                None => Ok(Route::Terminal),
            }
        }
    }
}

fn render_condition_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn routing_error(step: &StepDefinition, intent: Intent, reason: &str) -> FlowError {
    FlowError::Routing {
        step_id: step.step_id.clone(),
        intent: intent.to_string(),
        reason: reason.to_string(),
    }
}

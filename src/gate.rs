//! Gate interpretation
//!
//! A step's structured output only becomes a routing decision after it
//! clears the step's gate: the intent value is read from a dotted path,
//! checked against the allowed set, and (per intent) the jump target and
//! handoff fields are captured alongside. An uninterpretable value either
//! fails fast or substitutes the configured fallback, an explicit
//! per-step policy.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::FlowError;
use crate::registry::{Intent, StepDefinition, TargetMode};

/// Interpreted gate output for one iteration
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub intent: Intent,

    /// Jump target taken from the output (explicit target mode only)
    pub target: Option<String>,

    /// Fields captured for the handoff bag
    pub handoff: Map<String, Value>,

    /// True when the fallback intent was substituted
    pub used_fallback: bool,
}

/// Read the value at a dotted path inside a structured result
pub fn value_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = value;
    for segment in path.split('.') {
        node = node.get(segment)?;
    }
    Some(node)
}

/// Interpret a structured result against the step's gate
///
/// The fail-fast branch raises [`FlowError::GateInterpretation`] carrying
/// the step id and the offending extracted value; the fallback branch
/// substitutes the configured intent, marks the outcome, and only warns.
pub fn interpret(step: &StepDefinition, result: &Value) -> Result<GateOutcome, FlowError> {
    let Some(gate) = &step.gate else {
        // A step without a gate has no contract to read an intent from
        return Err(FlowError::GateInterpretation {
            step_id: step.step_id.clone(),
            found: "no gate declared".to_string(),
        });
    };

    let field = gate.intent_field.as_deref().unwrap_or_default();
    let raw = value_at_path(result, field);
    let routable = raw
        .and_then(Value::as_str)
        .and_then(Intent::parse)
        .filter(|intent| gate.allowed_intents.contains(intent));

    let (intent, used_fallback) = match routable {
        Some(intent) => (intent, false),
        None => {
            let found = match raw {
                None => "missing".to_string(),
                Some(value) => value.to_string(),
            };
            if gate.fail_fast {
                debug!(step_id = %step.step_id, %found, "interpret: unroutable intent, failing fast");
                return Err(FlowError::GateInterpretation {
                    step_id: step.step_id.clone(),
                    found,
                });
            }
            let Some(fallback) = gate.fallback_intent else {
                // The loader requires a fallback when fail-fast is off
                return Err(FlowError::GateInterpretation {
                    step_id: step.step_id.clone(),
                    found,
                });
            };
            warn!(
                step_id = %step.step_id,
                %found,
                fallback = %fallback,
                "Uninterpretable intent, substituting the configured fallback"
            );
            (fallback, true)
        }
    };

    let mut target = None;
    if intent == Intent::Jump && gate.target_mode == TargetMode::Explicit {
        if let Some(target_field) = gate.target_field.as_deref() {
            target = value_at_path(result, target_field)
                .and_then(Value::as_str)
                .map(str::to_string);
            if target.is_none() {
                warn!(step_id = %step.step_id, %target_field, "Jump intent without a target in the result");
            }
        }
    }

    let mut handoff = Map::new();
    if intent == Intent::Handoff {
        for field in &gate.handoff_fields {
            match value_at_path(result, field) {
                Some(value) => {
                    handoff.insert(field.clone(), value.clone());
                }
                None => warn!(step_id = %step.step_id, %field, "Handoff field missing from the result, skipping"),
            }
        }
    }

    debug!(step_id = %step.step_id, intent = %intent, used_fallback, "interpret: complete");
    Ok(GateOutcome {
        intent,
        target,
        handoff,
        used_fallback,
    })
}

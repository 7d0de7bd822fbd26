//! Output-contract resolution
//!
//! Gates reference their output contract through an internal pointer
//! (`#/contracts/...`) into the registry document itself. This module
//! resolves those references and cross-checks the contract's declared
//! intent enum against the gate's allowed intents.

use serde_json::Value;
use tracing::debug;

use crate::error::FlowError;
use crate::registry::types::GateSpec;

/// Resolve an internal schema reference against the document root
///
/// Only the internal pointer form is accepted; references into external
/// files cannot be trusted at routing time.
pub fn resolve_reference<'a>(root: &'a Value, reference: &str) -> Result<&'a Value, FlowError> {
    debug!(%reference, "resolve_reference: called");

    let Some(pointer) = reference.strip_prefix('#') else {
        return Err(FlowError::SchemaResolution {
            reference: reference.to_string(),
            reason: "external file references are not supported, use an internal '#/...' pointer".to_string(),
        });
    };

    if !pointer.starts_with('/') {
        return Err(FlowError::SchemaResolution {
            reference: reference.to_string(),
            reason: "pointer must start with '#/'".to_string(),
        });
    }

    root.pointer(pointer).ok_or_else(|| FlowError::SchemaResolution {
        reference: reference.to_string(),
        reason: "nothing at that pointer in the registry document".to_string(),
    })
}

/// Read the intent enum a contract declares at the gate's intent field
///
/// Walks the contract's `properties` along the dotted path and returns the
/// `enum` values found at the leaf, or `None` when the contract does not
/// declare one there.
pub fn intent_enum_at(contract: &Value, intent_field: &str) -> Option<Vec<String>> {
    let mut node = contract;
    for segment in intent_field.split('.') {
        node = node.get("properties")?.get(segment)?;
    }

    let values = node.get("enum")?.as_array()?;
    Some(
        values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

/// Cross-check a gate's allowed intents against its resolved contract
///
/// The two must be equal as sets. Both directions of the difference are
/// reported so a mismatch names every offending value at once.
pub fn check_intent_enum(step_id: &str, gate: &GateSpec, contract: &Value) -> Vec<String> {
    let Some(intent_field) = gate.intent_field.as_deref() else {
        return Vec::new();
    };

    let Some(declared) = intent_enum_at(contract, intent_field) else {
        return vec![format!(
            "step '{step_id}': contract declares no intent enum at '{intent_field}'"
        )];
    };

    let allowed: Vec<String> = gate.allowed_intents.iter().map(|i| i.to_string()).collect();

    let mut missing: Vec<&str> = allowed
        .iter()
        .filter(|a| !declared.contains(a))
        .map(String::as_str)
        .collect();
    let mut extra: Vec<&str> = declared
        .iter()
        .filter(|d| !allowed.contains(d))
        .map(String::as_str)
        .collect();
    missing.sort_unstable();
    extra.sort_unstable();

    if missing.is_empty() && extra.is_empty() {
        return Vec::new();
    }

    vec![format!(
        "step '{step_id}': contract intent enum differs from allowed-intents: missing in contract [{}], extra in contract [{}]",
        missing.join(", "),
        extra.join(", ")
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::types::{Intent, TargetMode};
    use serde_json::json;

    fn gate(allowed: &[Intent], field: &str) -> GateSpec {
        GateSpec {
            allowed_intents: allowed.to_vec(),
            intent_schema_ref: Some("#/contracts/report".to_string()),
            intent_field: Some(field.to_string()),
            target_field: None,
            handoff_fields: Vec::new(),
            target_mode: TargetMode::Explicit,
            fail_fast: true,
            fallback_intent: None,
        }
    }

    #[test]
    fn test_resolve_internal_pointer() {
        let root = json!({"contracts": {"report": {"type": "object"}}});

        let resolved = resolve_reference(&root, "#/contracts/report").unwrap();
        assert_eq!(resolved["type"], "object");
    }

    #[test]
    fn test_resolve_rejects_external_reference() {
        let root = json!({});

        let err = resolve_reference(&root, "schemas/report.json#/report").unwrap_err();
        assert_eq!(err.code(), "schema-resolution");
        assert!(err.to_string().contains("internal"));
    }

    #[test]
    fn test_resolve_missing_pointer() {
        let root = json!({"contracts": {}});

        let err = resolve_reference(&root, "#/contracts/report").unwrap_err();
        assert_eq!(err.code(), "schema-resolution");
    }

    #[test]
    fn test_intent_enum_walks_dotted_path() {
        let contract = json!({
            "type": "object",
            "properties": {
                "next_action": {
                    "type": "object",
                    "properties": {
                        "action": {"enum": ["next", "escalate"]}
                    }
                }
            }
        });

        let values = intent_enum_at(&contract, "next_action.action").unwrap();
        assert_eq!(values, vec!["next".to_string(), "escalate".to_string()]);
        assert!(intent_enum_at(&contract, "next_action.missing").is_none());
    }

    #[test]
    fn test_matching_enum_is_clean() {
        let contract = json!({
            "properties": {"action": {"enum": ["next", "repeat"]}}
        });
        let gate = gate(&[Intent::Next, Intent::Repeat], "action");

        assert!(check_intent_enum("work", &gate, &contract).is_empty());
    }

    #[test]
    fn test_mismatch_names_both_directions() {
        let contract = json!({
            "properties": {"action": {"enum": ["next", "abort"]}}
        });
        let gate = gate(&[Intent::Next, Intent::Escalate], "action");

        let violations = check_intent_enum("verify", &gate, &contract);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("missing in contract [escalate]"));
        assert!(violations[0].contains("extra in contract [abort]"));
    }

    #[test]
    fn test_contract_without_enum_is_a_violation() {
        let contract = json!({"properties": {"action": {"type": "string"}}});
        let gate = gate(&[Intent::Next], "action");

        let violations = check_intent_enum("work", &gate, &contract);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("no intent enum"));
    }
}

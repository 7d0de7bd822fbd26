//! Flow error taxonomy

use thiserror::Error;

/// Errors that abort a flow run
///
/// Validation failures are deliberately not represented here: a failed
/// completion condition is a recoverable verdict consumed by the retry
/// path, never an error.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Invalid step registry:\n{}", .violations.join("\n"))]
    Configuration { violations: Vec<String> },

    #[error("Cannot resolve schema reference '{reference}': {reason}")]
    SchemaResolution { reference: String, reason: String },

    #[error("Step '{step_id}': cannot determine intent, found {found}")]
    GateInterpretation { step_id: String, found: String },

    #[error("Step '{step_id}': cannot route intent '{intent}': {reason}")]
    Routing {
        step_id: String,
        intent: String,
        reason: String,
    },

    #[error("Iteration budget of {limit} exhausted before a terminal state")]
    MaxIterations { limit: u32 },

    #[error("Model invocation failed: {0}")]
    Invocation(String),
}

impl FlowError {
    /// Single configuration violation
    pub fn configuration(violation: impl Into<String>) -> Self {
        FlowError::Configuration {
            violations: vec![violation.into()],
        }
    }

    /// Machine-readable taxonomy code
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::Configuration { .. } => "configuration",
            FlowError::SchemaResolution { .. } => "schema-resolution",
            FlowError::GateInterpretation { .. } => "gate",
            FlowError::Routing { .. } => "routing",
            FlowError::MaxIterations { .. } => "max-iterations",
            FlowError::Invocation(_) => "invocation",
        }
    }

    /// Check if this error indicates a bug retrying cannot fix
    ///
    /// Budget exhaustion is terminal but not fatal: it is its own outcome
    /// category, not a configuration defect.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FlowError::MaxIterations { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert_eq!(FlowError::configuration("x").code(), "configuration");
        assert_eq!(
            FlowError::SchemaResolution {
                reference: "#/contracts/x".to_string(),
                reason: "not found".to_string(),
            }
            .code(),
            "schema-resolution"
        );
        assert_eq!(
            FlowError::GateInterpretation {
                step_id: "verify".to_string(),
                found: "missing".to_string(),
            }
            .code(),
            "gate"
        );
        assert_eq!(
            FlowError::Routing {
                step_id: "verify".to_string(),
                intent: "next".to_string(),
                reason: "no transition rule declared".to_string(),
            }
            .code(),
            "routing"
        );
        assert_eq!(FlowError::MaxIterations { limit: 25 }.code(), "max-iterations");
        assert_eq!(FlowError::Invocation("boom".to_string()).code(), "invocation");
    }

    #[test]
    fn test_fatality() {
        // Configuration-class errors abort the run
        assert!(FlowError::configuration("bad").is_fatal());
        assert!(FlowError::Invocation("boom".to_string()).is_fatal());

        // Budget exhaustion is terminal but its own category
        assert!(!FlowError::MaxIterations { limit: 3 }.is_fatal());
    }

    #[test]
    fn test_configuration_display_lists_violations() {
        let err = FlowError::Configuration {
            violations: vec!["step 'a': bad gate".to_string(), "step 'b': bad entry".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("step 'a': bad gate"));
        assert!(text.contains("step 'b': bad entry"));
    }
}

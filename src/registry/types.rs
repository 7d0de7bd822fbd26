//! Step registry data model
//!
//! Shared enums and step/validator/pattern shapes used across the engine.
//! Registry documents deserialize into these via the loader; after load they
//! are read-only.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Routing intent extracted from a step's structured output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Next,
    Repeat,
    Jump,
    Handoff,
    Escalate,
    Closing,
}

impl Intent {
    /// Parse an intent name as it appears in documents and step output
    pub fn parse(s: &str) -> Option<Intent> {
        match s {
            "next" => Some(Intent::Next),
            "repeat" => Some(Intent::Repeat),
            "jump" => Some(Intent::Jump),
            "handoff" => Some(Intent::Handoff),
            "escalate" => Some(Intent::Escalate),
            "closing" => Some(Intent::Closing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Next => "next",
            Intent::Repeat => "repeat",
            Intent::Jump => "jump",
            Intent::Handoff => "handoff",
            Intent::Escalate => "escalate",
            Intent::Closing => "closing",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step classification, which bounds the intents a step may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Work,
    Verification,
    Closure,
}

impl StepKind {
    pub fn parse(s: &str) -> Option<StepKind> {
        match s {
            "work" => Some(StepKind::Work),
            "verification" => Some(StepKind::Verification),
            "closure" => Some(StepKind::Closure),
            _ => None,
        }
    }

    /// The fixed intent set steps of this kind may declare
    pub fn allowed_intents(&self) -> &'static [Intent] {
        match self {
            StepKind::Work => &[Intent::Next, Intent::Repeat, Intent::Jump, Intent::Handoff],
            StepKind::Verification => &[Intent::Next, Intent::Repeat, Intent::Jump, Intent::Escalate],
            StepKind::Closure => &[Intent::Closing, Intent::Repeat],
        }
    }

    pub fn permits(&self, intent: Intent) -> bool {
        self.allowed_intents().contains(&intent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Work => "work",
            StepKind::Verification => "verification",
            StepKind::Closure => "closure",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How jump targets are determined
///
/// Explicit mode reads the target from the step output's `target-field`;
/// declared mode routes jumps through the transition table alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetMode {
    #[default]
    Explicit,
    Declared,
}

/// Schema-bound contract a step's output must satisfy to yield an intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSpec {
    /// Intents this step may emit, constrained by its kind
    #[serde(rename = "allowed-intents", default)]
    pub allowed_intents: Vec<Intent>,

    /// Internal pointer (`#/...`) to the step's output contract
    #[serde(rename = "intent-schema-ref", default)]
    pub intent_schema_ref: Option<String>,

    /// Dotted path to the intent value inside the structured result
    #[serde(rename = "intent-field", default)]
    pub intent_field: Option<String>,

    /// Dotted path to the jump target (explicit target mode)
    #[serde(rename = "target-field", default)]
    pub target_field: Option<String>,

    /// Fields copied into the handoff bag on a handoff intent
    #[serde(rename = "handoff-fields", default)]
    pub handoff_fields: Vec<String>,

    #[serde(rename = "target-mode", default)]
    pub target_mode: TargetMode,

    /// Raise on an uninterpretable intent instead of substituting a fallback
    #[serde(rename = "fail-fast", default = "default_fail_fast")]
    pub fail_fast: bool,

    #[serde(rename = "fallback-intent", default)]
    pub fallback_intent: Option<Intent>,
}

fn default_fail_fast() -> bool {
    true
}

/// Where a resolved intent routes next
///
/// Untagged on purpose: conditional rules are recognized by their
/// `condition-key`, direct rules by an explicit `target` (possibly null,
/// meaning terminal).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionRule {
    Conditional {
        #[serde(rename = "condition-key")]
        condition_key: String,
        /// Handoff value → step id, with "default" as the catch-all key
        #[serde(rename = "targets-by-value")]
        targets_by_value: BTreeMap<String, Option<String>>,
    },
    Direct {
        target: Option<String>,
        /// Consulted only when the chosen target cannot be resolved
        #[serde(default)]
        fallback: Option<String>,
    },
}

/// One ordered check a closure step must pass before finalizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionCondition {
    pub name: String,

    /// Name of the validator definition to run
    pub validator: String,

    /// Inline parameters specializing the validator (e.g. `command`, `paths`)
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
}

/// Validator behavior discriminator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ValidatorKind {
    Command {
        command: String,
    },
    File {
        paths: Vec<String>,
    },
    /// Runs its command when one is configured, otherwise passes trivially
    Custom {
        #[serde(default)]
        command: Option<String>,
    },
}

/// Named validator as written in the registry document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorDef {
    #[serde(flatten)]
    pub kind: ValidatorKind,

    /// Success rule text: "empty", "exitCode:N", "contains:S", "matches:R"
    #[serde(default = "default_success_rule")]
    pub success: String,

    /// Failure-pattern label used to select retry guidance
    #[serde(rename = "failure-pattern", default)]
    pub failure_pattern: Option<String>,

    /// Parameter name → extractor name, applied to output on failure
    #[serde(default)]
    pub extractors: BTreeMap<String, String>,
}

fn default_success_rule() -> String {
    "exitCode:0".to_string()
}

/// Locates the retry template for one failure pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionPattern {
    pub edition: String,

    #[serde(default)]
    pub adaptation: Option<String>,

    /// Parameter names the template expects; missing ones only warn
    #[serde(rename = "expected-params", default)]
    pub expected_params: Vec<String>,
}

/// Failure-pattern name → retry template locator, loaded once per registry
#[derive(Debug, Clone, Default)]
pub struct PatternBook {
    patterns: std::collections::HashMap<String, CompletionPattern>,
}

impl PatternBook {
    pub fn new(patterns: std::collections::HashMap<String, CompletionPattern>) -> Self {
        Self { patterns }
    }

    pub fn get(&self, name: &str) -> Option<&CompletionPattern> {
        self.patterns.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.patterns.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.patterns.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// One step of the flow, fully resolved
///
/// Built by the loader; `transitions` keys are parsed intents and the
/// prompt hints are filled from their defaults (agent id / step id).
#[derive(Debug, Clone)]
pub struct StepDefinition {
    pub step_id: String,
    pub kind: StepKind,
    pub gate: Option<GateSpec>,
    pub transitions: std::collections::HashMap<Intent, TransitionRule>,
    pub completion_conditions: Vec<CompletionCondition>,
    /// Tool/permission names handed to the invoker verbatim
    pub tools: Vec<String>,
    /// Locator subcategory for this step's prompts
    pub prompt_category: String,
    /// Locator target for this step's prompts
    pub prompt_target: String,
}

impl StepDefinition {
    pub fn transition(&self, intent: Intent) -> Option<&TransitionRule> {
        self.transitions.get(&intent)
    }

    pub fn has_completion_conditions(&self) -> bool {
        !self.completion_conditions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_parse() {
        assert_eq!(Intent::parse("next"), Some(Intent::Next));
        assert_eq!(Intent::parse("closing"), Some(Intent::Closing));
        assert_eq!(Intent::parse("sideways"), None);
        assert_eq!(Intent::Escalate.as_str(), "escalate");
    }

    #[test]
    fn test_step_kind_intent_sets() {
        assert!(StepKind::Work.permits(Intent::Handoff));
        assert!(!StepKind::Work.permits(Intent::Escalate));
        assert!(StepKind::Verification.permits(Intent::Escalate));
        assert!(!StepKind::Verification.permits(Intent::Closing));
        assert!(StepKind::Closure.permits(Intent::Closing));
        assert!(StepKind::Closure.permits(Intent::Repeat));
        assert_eq!(StepKind::Closure.allowed_intents().len(), 2);
    }

    #[test]
    fn test_gate_defaults() {
        let yaml = r##"
allowed-intents: [next, repeat]
intent-schema-ref: "#/contracts/work-report"
intent-field: "next_action.action"
"##;
        let gate: GateSpec = serde_yaml::from_str(yaml).unwrap();

        assert!(gate.fail_fast);
        assert_eq!(gate.target_mode, TargetMode::Explicit);
        assert!(gate.fallback_intent.is_none());
        assert!(gate.handoff_fields.is_empty());
    }

    #[test]
    fn test_transition_rule_direct() {
        let rule: TransitionRule = serde_yaml::from_str("target: verify").unwrap();
        match rule {
            TransitionRule::Direct { target, fallback } => {
                assert_eq!(target.as_deref(), Some("verify"));
                assert!(fallback.is_none());
            }
            _ => panic!("expected direct rule"),
        }

        // Null target means terminal
        let rule: TransitionRule = serde_yaml::from_str("target: null").unwrap();
        match rule {
            TransitionRule::Direct { target, .. } => assert!(target.is_none()),
            _ => panic!("expected direct rule"),
        }
    }

    #[test]
    fn test_transition_rule_conditional() {
        let yaml = r#"
condition-key: severity
targets-by-value:
  high: escalate-step
  default: close
"#;
        let rule: TransitionRule = serde_yaml::from_str(yaml).unwrap();
        match rule {
            TransitionRule::Conditional {
                condition_key,
                targets_by_value,
            } => {
                assert_eq!(condition_key, "severity");
                assert_eq!(targets_by_value["high"].as_deref(), Some("escalate-step"));
                assert!(targets_by_value.contains_key("default"));
            }
            _ => panic!("expected conditional rule"),
        }
    }

    #[test]
    fn test_validator_kinds() {
        let yaml = r#"
type: command
command: "git status --porcelain"
success: empty
failure-pattern: dirty-worktree
extractors:
  files: vcs-status
"#;
        let def: ValidatorDef = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(def.kind, ValidatorKind::Command { .. }));
        assert_eq!(def.success, "empty");
        assert_eq!(def.failure_pattern.as_deref(), Some("dirty-worktree"));
        assert_eq!(def.extractors["files"], "vcs-status");

        let def: ValidatorDef = serde_yaml::from_str("type: file\npaths: [Cargo.toml]").unwrap();
        assert!(matches!(def.kind, ValidatorKind::File { .. }));
        // Omitted success rule defaults to a zero exit code
        assert_eq!(def.success, "exitCode:0");

        let def: ValidatorDef = serde_yaml::from_str("type: custom").unwrap();
        assert!(matches!(def.kind, ValidatorKind::Custom { command: None }));
    }

    #[test]
    fn test_completion_pattern() {
        let yaml = r#"
edition: retry
adaptation: dirty-worktree
expected-params: [files]
"#;
        let pattern: CompletionPattern = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(pattern.edition, "retry");
        assert_eq!(pattern.adaptation.as_deref(), Some("dirty-worktree"));
        assert_eq!(pattern.expected_params, vec!["files".to_string()]);
    }
}

//! Registry document loading and validation
//!
//! Parses a registry document (YAML or JSON) and validates it in one pass:
//! structural fields first, then per-step checks fanned out on blocking
//! tasks with every violation collected into a single fatal
//! [`FlowError::Configuration`]. A registry that loads is immutable and
//! safe to share for the life of the process.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::completion::{ExtractorRegistry, ResolvedValidator, SuccessRule, ValidatorRegistry};
use crate::error::FlowError;
use crate::registry::contract;
use crate::registry::types::{
    CompletionCondition, CompletionPattern, Intent, PatternBook, StepDefinition, StepKind,
    TargetMode, TransitionRule, ValidatorDef,
};

/// Raw registry document, shape-checked by serde before validation
#[derive(Debug, Deserialize)]
struct RegistryDoc {
    #[serde(rename = "agent-id")]
    agent_id: Option<String>,

    version: Option<u32>,

    #[serde(rename = "entry-step")]
    entry_step: Option<String>,

    /// Invocation mode → entry step id
    #[serde(rename = "entry-step-mapping", default)]
    entry_step_mapping: BTreeMap<String, String>,

    steps: Option<BTreeMap<String, StepDoc>>,

    #[serde(default)]
    validators: BTreeMap<String, ValidatorDef>,

    #[serde(default)]
    patterns: BTreeMap<String, CompletionPattern>,
}

#[derive(Debug, Deserialize)]
struct StepDoc {
    kind: Option<String>,

    #[serde(default)]
    gate: Option<crate::registry::types::GateSpec>,

    /// Keys are raw intent names so misspellings become named violations
    #[serde(default)]
    transitions: BTreeMap<String, TransitionRule>,

    #[serde(rename = "completion-conditions", default)]
    completion_conditions: Vec<CompletionCondition>,

    #[serde(default)]
    tools: Vec<String>,

    #[serde(rename = "prompt-category")]
    prompt_category: Option<String>,

    #[serde(rename = "prompt-target")]
    prompt_target: Option<String>,
}

/// Loader knobs beyond the document itself
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Promote transition-coverage warnings to load errors
    pub strict_transitions: bool,

    /// Extractor registry that validator definitions are checked against
    pub extractors: Arc<ExtractorRegistry>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            strict_transitions: false,
            extractors: Arc::new(ExtractorRegistry::builtin()),
        }
    }
}

/// Loads and validates step registries
#[derive(Debug, Default)]
pub struct RegistryLoader {
    options: LoaderOptions,
}

impl RegistryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: LoaderOptions) -> Self {
        Self { options }
    }

    pub async fn load_file(&self, path: &Path) -> Result<StepRegistry, FlowError> {
        debug!("load_file: called with path={}", path.display());
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            FlowError::configuration(format!("cannot read registry file {}: {e}", path.display()))
        })?;
        self.load_str(&text).await
    }

    /// Load from document text; YAML and JSON both parse here
    pub async fn load_str(&self, text: &str) -> Result<StepRegistry, FlowError> {
        let root: Value = serde_yaml::from_str(text)
            .map_err(|e| FlowError::configuration(format!("registry document is not valid YAML: {e}")))?;
        self.load_value(root).await
    }

    pub async fn load_value(&self, root: Value) -> Result<StepRegistry, FlowError> {
        debug!("load_value: called");
        let doc: RegistryDoc = serde_json::from_value(root.clone()).map_err(|e| {
            FlowError::configuration(format!("registry document has an invalid shape: {e}"))
        })?;

        // Structural fields gate everything else
        let mut violations = Vec::new();
        if doc.agent_id.is_none() {
            violations.push("registry: missing required field 'agent-id'".to_string());
        }
        if doc.version.is_none() {
            violations.push("registry: missing required field 'version'".to_string());
        }
        match &doc.steps {
            None => violations.push("registry: missing required field 'steps'".to_string()),
            Some(steps) if steps.is_empty() => {
                violations.push("registry: 'steps' must declare at least one step".to_string());
            }
            Some(_) => {}
        }
        if doc.entry_step.is_none() && doc.entry_step_mapping.is_empty() {
            violations.push("registry: 'entry-step' or 'entry-step-mapping' is required".to_string());
        }
        if !violations.is_empty() {
            return Err(FlowError::Configuration { violations });
        }

        let agent_id = doc.agent_id.unwrap_or_default();
        let version = doc.version.unwrap_or_default();
        let step_docs = doc.steps.unwrap_or_default();
        let step_ids: Arc<BTreeSet<String>> = Arc::new(step_docs.keys().cloned().collect());
        debug!("load_value: validating {} steps for '{agent_id}'", step_docs.len());

        // Validators resolve first so step conditions can be checked against them
        let mut warnings = Vec::new();
        let mut validators = ValidatorRegistry::empty();
        for (name, def) in &doc.validators {
            match resolve_validator(name, def, &doc.patterns, &self.options.extractors) {
                Ok(resolved) => validators.register(resolved),
                Err(mut list) => violations.append(&mut list),
            }
        }
        let validator_names: Arc<BTreeSet<String>> = Arc::new(doc.validators.keys().cloned().collect());

        // Per-step checks are independent of each other; fan them out and
        // collect every violation before deciding
        let root = Arc::new(root);
        let mut handles = Vec::new();
        for (step_id, step_doc) in step_docs {
            let root = Arc::clone(&root);
            let step_ids = Arc::clone(&step_ids);
            let validator_names = Arc::clone(&validator_names);
            let agent_id = agent_id.clone();
            let strict = self.options.strict_transitions;
            handles.push(tokio::task::spawn_blocking(move || {
                check_step(&step_id, step_doc, &root, &step_ids, &validator_names, &agent_id, strict)
            }));
        }

        let mut steps = HashMap::new();
        for handle in join_all(handles).await {
            let mut check = handle
                .map_err(|e| FlowError::configuration(format!("step validation task failed: {e}")))?;
            violations.append(&mut check.violations);
            warnings.append(&mut check.warnings);
            if let Some(step) = check.step {
                steps.insert(step.step_id.clone(), step);
            }
        }

        // Entry configuration must point at real steps
        if let Some(entry) = &doc.entry_step {
            if !step_ids.contains(entry) {
                violations.push(format!("registry: entry step '{entry}' is not defined"));
            }
        }
        for (mode, target) in &doc.entry_step_mapping {
            if !step_ids.contains(target) {
                violations.push(format!(
                    "registry: entry mapping '{mode}' targets unknown step '{target}'"
                ));
            }
        }

        if !violations.is_empty() {
            debug!("load_value: rejected with {} violations", violations.len());
            return Err(FlowError::Configuration { violations });
        }

        for warning in &warnings {
            warn!("{warning}");
        }
        debug!("load_value: loaded registry '{agent_id}' with {} steps", steps.len());

        Ok(StepRegistry {
            agent_id,
            version,
            steps,
            entry_step: doc.entry_step,
            entry_step_mapping: doc.entry_step_mapping,
            validators,
            patterns: PatternBook::new(doc.patterns.into_iter().collect()),
            doc_root: root,
            warnings,
        })
    }
}

struct StepCheck {
    violations: Vec<String>,
    warnings: Vec<String>,
    step: Option<StepDefinition>,
}

fn check_step(
    step_id: &str,
    doc: StepDoc,
    root: &Value,
    step_ids: &BTreeSet<String>,
    validator_names: &BTreeSet<String>,
    agent_id: &str,
    strict: bool,
) -> StepCheck {
    debug!("check_step: called for '{step_id}'");
    let mut violations = Vec::new();
    let mut warnings = Vec::new();

    let kind = match doc.kind.as_deref() {
        None => {
            violations.push(format!("step '{step_id}': missing required field 'kind'"));
            None
        }
        Some(raw) => match StepKind::parse(raw) {
            Some(kind) => Some(kind),
            None => {
                violations.push(format!("step '{step_id}': unknown kind '{raw}'"));
                None
            }
        },
    };

    if let Some(gate) = &doc.gate {
        if gate.allowed_intents.is_empty() {
            violations.push(format!("step '{step_id}': gate declares no allowed-intents"));
        }
        if let Some(kind) = kind {
            for intent in &gate.allowed_intents {
                if !kind.permits(*intent) {
                    violations.push(format!(
                        "step '{step_id}': intent '{intent}' is not permitted for kind '{kind}'"
                    ));
                }
            }
        }
        if let Some(fallback) = gate.fallback_intent {
            if !gate.allowed_intents.contains(&fallback) {
                violations.push(format!(
                    "step '{step_id}': fallback intent '{fallback}' is not in allowed-intents"
                ));
            }
        }
        if !gate.fail_fast && gate.fallback_intent.is_none() {
            violations.push(format!(
                "step '{step_id}': 'fail-fast: false' requires a 'fallback-intent'"
            ));
        }
        if gate.target_mode == TargetMode::Explicit
            && gate.allowed_intents.contains(&Intent::Jump)
            && gate.target_field.is_none()
        {
            violations.push(format!(
                "step '{step_id}': explicit target mode requires 'target-field' when 'jump' is allowed"
            ));
        }

        if gate.intent_field.is_none() {
            violations.push(format!(
                "step '{step_id}': gate missing required field 'intent-field'"
            ));
        }
        match gate.intent_schema_ref.as_deref() {
            None => violations.push(format!(
                "step '{step_id}': gate missing required field 'intent-schema-ref'"
            )),
            Some(reference) => match contract::resolve_reference(root, reference) {
                Err(err) => violations.push(format!("step '{step_id}': {err}")),
                Ok(schema) => violations.extend(contract::check_intent_enum(step_id, gate, schema)),
            },
        }

        // A gated step that never routes is a configuration hole
        if doc.transitions.is_empty() {
            violations.push(format!(
                "step '{step_id}': a step with a gate must declare transitions"
            ));
        }
    } else if doc.kind.is_some() {
        warnings.push(format!(
            "step '{step_id}': no gate declared, step output cannot be interpreted"
        ));
    }

    let mut transitions = HashMap::new();
    for (raw_intent, rule) in &doc.transitions {
        let Some(intent) = Intent::parse(raw_intent) else {
            violations.push(format!(
                "step '{step_id}': unknown intent '{raw_intent}' in transitions"
            ));
            continue;
        };
        if let Some(gate) = &doc.gate {
            if !gate.allowed_intents.is_empty() && !gate.allowed_intents.contains(&intent) {
                warnings.push(format!(
                    "step '{step_id}': transition declared for intent '{intent}' not allowed by the gate"
                ));
            }
        }
        match rule {
            TransitionRule::Direct { target, fallback } => {
                if let Some(target) = target {
                    if !step_ids.contains(target) {
                        violations.push(format!(
                            "step '{step_id}': transition for '{intent}' targets unknown step '{target}'"
                        ));
                    }
                }
                if let Some(fallback) = fallback {
                    if !step_ids.contains(fallback) {
                        violations.push(format!(
                            "step '{step_id}': transition for '{intent}' falls back to unknown step '{fallback}'"
                        ));
                    }
                }
            }
            TransitionRule::Conditional {
                condition_key,
                targets_by_value,
            } => {
                if condition_key.is_empty() {
                    violations.push(format!(
                        "step '{step_id}': conditional transition for '{intent}' has an empty condition-key"
                    ));
                }
                if targets_by_value.is_empty() {
                    violations.push(format!(
                        "step '{step_id}': conditional transition for '{intent}' declares no targets"
                    ));
                }
                for (value, target) in targets_by_value {
                    if let Some(target) = target {
                        if !step_ids.contains(target) {
                            violations.push(format!(
                                "step '{step_id}': transition for '{intent}' branch '{value}' targets unknown step '{target}'"
                            ));
                        }
                    }
                }
            }
        }
        transitions.insert(intent, rule.clone());
    }

    // Coverage: every allowed intent should have a route, except explicit
    // jumps which carry their target in the step output
    if let Some(gate) = &doc.gate {
        for intent in &gate.allowed_intents {
            if transitions.contains_key(intent) {
                continue;
            }
            if *intent == Intent::Jump && gate.target_mode == TargetMode::Explicit {
                continue;
            }
            let message = format!("step '{step_id}': allowed intent '{intent}' has no transition rule");
            if strict {
                violations.push(message);
            } else {
                warnings.push(message);
            }
        }
    }

    for condition in &doc.completion_conditions {
        if !validator_names.contains(&condition.validator) {
            violations.push(format!(
                "step '{step_id}': condition '{}' references unknown validator '{}'",
                condition.name, condition.validator
            ));
        }
    }
    if kind == Some(StepKind::Closure) && doc.completion_conditions.is_empty() {
        warnings.push(format!(
            "step '{step_id}': closure step declares no completion-conditions"
        ));
    }

    let step = kind.map(|kind| StepDefinition {
        step_id: step_id.to_string(),
        kind,
        gate: doc.gate,
        transitions,
        completion_conditions: doc.completion_conditions,
        tools: doc.tools,
        prompt_category: doc.prompt_category.unwrap_or_else(|| agent_id.to_string()),
        prompt_target: doc.prompt_target.unwrap_or_else(|| step_id.to_string()),
    });

    StepCheck {
        violations,
        warnings,
        step,
    }
}

fn resolve_validator(
    name: &str,
    def: &ValidatorDef,
    patterns: &BTreeMap<String, CompletionPattern>,
    extractors: &ExtractorRegistry,
) -> Result<ResolvedValidator, Vec<String>> {
    use crate::registry::types::ValidatorKind;

    let mut violations = Vec::new();

    match &def.kind {
        ValidatorKind::Command { command } if command.trim().is_empty() => {
            violations.push(format!("validator '{name}': empty command"));
        }
        ValidatorKind::File { paths } if paths.is_empty() => {
            violations.push(format!("validator '{name}': 'file' validator lists no paths"));
        }
        _ => {}
    }

    let rule = match SuccessRule::parse(&def.success) {
        Ok(rule) => Some(rule),
        Err(reason) => {
            violations.push(format!(
                "validator '{name}': invalid success rule '{}': {reason}",
                def.success
            ));
            None
        }
    };

    if let Some(pattern) = &def.failure_pattern {
        if !patterns.contains_key(pattern) {
            violations.push(format!("validator '{name}': unknown failure pattern '{pattern}'"));
        }
    }

    let mut named = Vec::new();
    for (param, extractor) in &def.extractors {
        if extractors.contains(extractor) {
            named.push((param.clone(), extractor.clone()));
        } else {
            violations.push(format!(
                "validator '{name}': unknown extractor '{extractor}' for param '{param}'"
            ));
        }
    }

    match (violations.is_empty(), rule) {
        (true, Some(rule)) => Ok(ResolvedValidator {
            name: name.to_string(),
            kind: def.kind.clone(),
            rule,
            failure_pattern: def.failure_pattern.clone(),
            extractors: named,
        }),
        _ => Err(violations),
    }
}

/// Immutable, validated step registry
///
/// Everything the engine reads at runtime hangs off this: the steps, entry
/// resolution, resolved validators, the pattern book, and the raw document
/// for contract lookups.
#[derive(Debug)]
pub struct StepRegistry {
    agent_id: String,
    version: u32,
    steps: HashMap<String, StepDefinition>,
    entry_step: Option<String>,
    entry_step_mapping: BTreeMap<String, String>,
    validators: ValidatorRegistry,
    patterns: PatternBook,
    doc_root: Arc<Value>,
    warnings: Vec<String>,
}

impl StepRegistry {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.get(id)
    }

    pub fn require_step(&self, id: &str) -> Result<&StepDefinition, FlowError> {
        self.steps
            .get(id)
            .ok_or_else(|| FlowError::configuration(format!("unknown step '{id}'")))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.steps.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Resolve the entry step for an invocation mode
    ///
    /// Precedence: mapping for the mode, then `entry-step`, then the
    /// mapping's "default" key.
    pub fn entry_for(&self, mode: Option<&str>) -> Result<&str, FlowError> {
        if let Some(mode) = mode {
            if let Some(id) = self.entry_step_mapping.get(mode) {
                return Ok(id);
            }
        }
        if let Some(id) = &self.entry_step {
            return Ok(id);
        }
        if let Some(id) = self.entry_step_mapping.get("default") {
            return Ok(id);
        }
        Err(FlowError::configuration(match mode {
            Some(mode) => format!("no entry step for mode '{mode}'"),
            None => "no entry step configured".to_string(),
        }))
    }

    pub fn validators(&self) -> &ValidatorRegistry {
        &self.validators
    }

    pub fn patterns(&self) -> &PatternBook {
        &self.patterns
    }

    /// Resolve an internal `#/...` reference against the loaded document
    pub fn resolve_contract(&self, reference: &str) -> Result<&Value, FlowError> {
        contract::resolve_reference(&self.doc_root, reference)
    }

    /// Non-fatal findings from load time (coverage gaps and the like)
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

//! Completion validation
//!
//! A closure step finalizes only after its ordered conditions pass. The
//! validator runs them strictly sequentially and stops at the first
//! failure: failures get reported and fixed one at a time, and later
//! conditions' commands are never spawned once the verdict is known.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::completion::exec::{CommandOutput, run_shell};
use crate::completion::extractors::ExtractorRegistry;
use crate::completion::rules::SuccessRule;
use crate::registry::{CompletionCondition, ValidatorKind};

/// Detail lists are capped to this many entries
pub const MAX_DETAIL_LINES: usize = 10;

/// A named validator with its success rule parsed at registry load
#[derive(Debug, Clone)]
pub struct ResolvedValidator {
    pub name: String,
    pub kind: ValidatorKind,
    pub rule: SuccessRule,
    pub failure_pattern: Option<String>,
    /// Parameter name → extractor name, applied on failure
    pub extractors: Vec<(String, String)>,
}

/// Named validators from one registry document
///
/// Constructed once at load and passed by reference; nothing here is
/// process-global.
#[derive(Debug, Default)]
pub struct ValidatorRegistry {
    validators: HashMap<String, ResolvedValidator>,
}

impl ValidatorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn register(&mut self, validator: ResolvedValidator) {
        debug!(name = %validator.name, "ValidatorRegistry::register: called");
        self.validators.insert(validator.name.clone(), validator);
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedValidator> {
        self.validators.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    /// Registered names, sorted for stable diagnostics
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

/// Verdict of one validation pass
///
/// Always a value, never an error: a failed verdict drives the retry loop.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub valid: bool,

    /// Condition that failed, when one did
    pub failed_condition: Option<String>,

    /// Failure-pattern label from the failing validator
    pub failure_pattern: Option<String>,

    /// Extracted parameters for retry guidance
    pub params: Map<String, Value>,

    /// Primary human-readable reason
    pub error: Option<String>,

    pub errors: Vec<String>,

    /// Supporting output lines, capped with a "+N more" suffix
    pub details: Vec<String>,
}

impl CompletionOutcome {
    pub fn passed() -> Self {
        Self {
            valid: true,
            failed_condition: None,
            failure_pattern: None,
            params: Map::new(),
            error: None,
            errors: Vec::new(),
            details: Vec::new(),
        }
    }

    /// Cap a detail list to [`MAX_DETAIL_LINES`] entries plus a summary line
    pub fn cap_details(mut details: Vec<String>) -> Vec<String> {
        if details.len() > MAX_DETAIL_LINES {
            let extra = details.len() - MAX_DETAIL_LINES;
            details.truncate(MAX_DETAIL_LINES);
            details.push(format!("+{extra} more"));
        }
        details
    }
}

/// Runs a closure step's completion conditions
pub struct CompletionValidator {
    extractors: Arc<ExtractorRegistry>,
    workdir: PathBuf,
    timeout: Duration,
}

impl CompletionValidator {
    pub fn new(extractors: Arc<ExtractorRegistry>, workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            extractors,
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Evaluate conditions in order, stopping at the first failure
    ///
    /// An empty list is trivially valid.
    pub async fn validate(
        &self,
        conditions: &[CompletionCondition],
        validators: &ValidatorRegistry,
    ) -> CompletionOutcome {
        debug!(count = conditions.len(), "CompletionValidator::validate: called");

        for condition in conditions {
            if let Some(failure) = self.check_condition(condition, validators).await {
                warn!(
                    condition = %condition.name,
                    pattern = failure.failure_pattern.as_deref().unwrap_or("none"),
                    "Completion condition failed"
                );
                return failure;
            }
            debug!(condition = %condition.name, "validate: condition passed");
        }

        CompletionOutcome::passed()
    }

    /// Run one condition; `Some` is a failure verdict
    async fn check_condition(
        &self,
        condition: &CompletionCondition,
        validators: &ValidatorRegistry,
    ) -> Option<CompletionOutcome> {
        let Some(validator) = validators.get(&condition.validator) else {
            // The loader rejects unknown validator names, this guards
            // registries assembled programmatically
            return Some(self.failure(
                condition,
                None,
                &CommandOutput::default(),
                format!("condition '{}': unknown validator '{}'", condition.name, condition.validator),
            ));
        };

        match &validator.kind {
            ValidatorKind::Command { command } => {
                let command = inline_command(condition).unwrap_or(command.as_str());
                self.check_command(condition, validator, command).await
            }
            ValidatorKind::File { paths } => self.check_files(condition, validator, paths),
            ValidatorKind::Custom { command } => match inline_command(condition).or(command.as_deref()) {
                Some(command) => self.check_command(condition, validator, command).await,
                None => {
                    warn!(
                        condition = %condition.name,
                        "Custom validator has no command configured, passing trivially"
                    );
                    None
                }
            },
        }
    }

    async fn check_command(
        &self,
        condition: &CompletionCondition,
        validator: &ResolvedValidator,
        command: &str,
    ) -> Option<CompletionOutcome> {
        debug!(condition = %condition.name, %command, "check_command: running");

        let output = match run_shell(command, &self.workdir, self.timeout).await {
            Ok(output) => output,
            Err(e) => {
                // Spawn failures and timeouts fail the condition outright,
                // success rules never see the missing output
                let output = CommandOutput {
                    exit_code: -1,
                    stderr: e.to_string(),
                    ..CommandOutput::default()
                };
                return Some(self.failure(
                    condition,
                    Some(validator),
                    &output,
                    format!("condition '{}': command did not complete: {e}", condition.name),
                ));
            }
        };

        if validator.rule.check(&output) {
            return None;
        }

        let reason = format!(
            "condition '{}' failed: expected {} (exit code {})",
            condition.name,
            validator.rule.expectation(),
            output.exit_code,
        );
        Some(self.failure(condition, Some(validator), &output, reason))
    }

    fn check_files(
        &self,
        condition: &CompletionCondition,
        validator: &ResolvedValidator,
        paths: &[String],
    ) -> Option<CompletionOutcome> {
        let paths = inline_paths(condition).unwrap_or_else(|| paths.to_vec());
        let missing: Vec<String> = paths
            .iter()
            .filter(|p| !self.workdir.join(p.as_str()).exists())
            .cloned()
            .collect();

        debug!(condition = %condition.name, missing = missing.len(), "check_files: checked");
        if missing.is_empty() {
            return None;
        }

        let output = CommandOutput {
            exit_code: 1,
            stdout: missing.join("\n"),
            ..CommandOutput::default()
        };
        let reason = format!(
            "condition '{}' failed: {} required file{} missing",
            condition.name,
            missing.len(),
            if missing.len() == 1 { "" } else { "s" },
        );

        let mut outcome = self.failure(condition, Some(validator), &output, reason);
        outcome.params.insert("missing".to_string(), Value::from(missing));
        Some(outcome)
    }

    /// Build a failure verdict: pattern, extracted params, capped details
    fn failure(
        &self,
        condition: &CompletionCondition,
        validator: Option<&ResolvedValidator>,
        output: &CommandOutput,
        reason: String,
    ) -> CompletionOutcome {
        let mut params = Map::new();
        let mut failure_pattern = None;

        if let Some(validator) = validator {
            failure_pattern = validator.failure_pattern.clone();
            for (param, extractor) in &validator.extractors {
                match self.extractors.get(extractor) {
                    Some(extractor) => {
                        params.insert(param.clone(), extractor.extract(output));
                    }
                    None => warn!(%param, %extractor, "No such extractor registered, skipping parameter"),
                }
            }
        }

        let mut errors = vec![reason.clone()];
        let stderr_head = output.stderr.lines().find(|l| !l.trim().is_empty());
        if let Some(line) = stderr_head {
            errors.push(format!("stderr: {}", line.trim()));
        }

        let details: Vec<String> = output
            .combined()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();

        CompletionOutcome {
            valid: false,
            failed_condition: Some(condition.name.clone()),
            failure_pattern,
            params,
            error: Some(reason),
            errors,
            details: CompletionOutcome::cap_details(details),
        }
    }
}

/// Inline `command` parameter, overriding the validator definition
fn inline_command(condition: &CompletionCondition) -> Option<&str> {
    condition.params.get("command").and_then(Value::as_str)
}

/// Inline `paths` parameter, replacing the validator definition's list
fn inline_paths(condition: &CompletionCondition) -> Option<Vec<String>> {
    let values = condition.params.get("paths")?.as_array()?;
    Some(
        values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

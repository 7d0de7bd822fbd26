//! Retry guidance
//!
//! Turns a failed completion verdict into continuation text for the next
//! iteration. Resolution chain: the failure pattern's template (edition +
//! adaptation), then the generic "failed" edition at the same locator,
//! then a synthesized message. Guidance is always produced; a missing
//! template is never an error.

mod template;

pub use template::GuidanceTemplates;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::completion::CompletionOutcome;
use crate::prompts::{PromptLocator, PromptResolver};
use crate::registry::{CompletionPattern, PatternBook, StepDefinition};

/// Category under which all step guidance templates live
const GUIDANCE_CATEGORY: &str = "steps";

/// Edition tried when a pattern has no template of its own
const GENERIC_EDITION: &str = "failed";

pub struct RetryHandler {
    resolver: Arc<dyn PromptResolver>,
    templates: GuidanceTemplates,
}

impl RetryHandler {
    pub fn new(resolver: Arc<dyn PromptResolver>) -> Self {
        Self {
            resolver,
            templates: GuidanceTemplates::new(),
        }
    }

    /// Build continuation guidance for a failed verdict
    ///
    /// Infallible: template misses and render failures degrade to the
    /// synthesized form.
    pub async fn build_guidance(
        &self,
        step: &StepDefinition,
        outcome: &CompletionOutcome,
        patterns: &PatternBook,
    ) -> String {
        let pattern_name = outcome.failure_pattern.as_deref();
        let pattern = pattern_name.and_then(|name| {
            let found = patterns.get(name);
            if found.is_none() {
                warn!(pattern = %name, "Failure pattern is not in the pattern book");
            }
            found
        });

        if let Some(pattern) = pattern {
            for expected in &pattern.expected_params {
                if !outcome.params.contains_key(expected) {
                    warn!(
                        pattern = %pattern.edition,
                        param = %expected,
                        "Expected parameter missing from the verdict"
                    );
                }
            }
        }

        if let Some(text) = self.resolve_template(step, pattern).await {
            match self.templates.render(&text, &outcome.params) {
                Ok(rendered) => return rendered,
                Err(e) => warn!("Guidance template failed to render, synthesizing instead: {e}"),
            }
        }

        template::synthesize(pattern_name, outcome.error.as_deref(), &outcome.params)
    }

    async fn resolve_template(
        &self,
        step: &StepDefinition,
        pattern: Option<&CompletionPattern>,
    ) -> Option<String> {
        if let Some(pattern) = pattern {
            let mut locator = PromptLocator::new(
                GUIDANCE_CATEGORY,
                &step.prompt_category,
                &step.prompt_target,
                &pattern.edition,
            );
            if let Some(adaptation) = &pattern.adaptation {
                locator = locator.with_adaptation(adaptation);
            }
            match self.resolver.resolve(&locator).await {
                Ok(text) => {
                    debug!(%locator, "resolve_template: using pattern template");
                    return Some(text);
                }
                Err(e) => debug!(%locator, "resolve_template: pattern template miss: {e}"),
            }
        }

        let locator = PromptLocator::new(
            GUIDANCE_CATEGORY,
            &step.prompt_category,
            &step.prompt_target,
            GENERIC_EDITION,
        );
        match self.resolver.resolve(&locator).await {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(%locator, "resolve_template: no generic template: {e}");
                None
            }
        }
    }
}

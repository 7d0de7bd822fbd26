//! Guidance template rendering
//!
//! Resolved retry templates are handlebars with escaping disabled: the
//! output is continuation text for a model, not HTML. When no template
//! resolves at all, a minimal message is synthesized from the verdict.

use handlebars::{Handlebars, no_escape};
use serde_json::{Map, Value};

/// Bullet cap applied to array parameters in synthesized guidance
const MAX_BULLETS: usize = 10;

/// Handlebars engine configured for guidance rendering
pub struct GuidanceTemplates {
    hbs: Handlebars<'static>,
}

impl GuidanceTemplates {
    pub fn new() -> Self {
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(no_escape);
        Self { hbs }
    }

    /// Render template text against the extracted parameters
    pub fn render(&self, template: &str, params: &Map<String, Value>) -> eyre::Result<String> {
        self.hbs
            .render_template(template, params)
            .map_err(|e| eyre::eyre!("cannot render guidance template: {e}"))
    }
}

impl Default for GuidanceTemplates {
    fn default() -> Self {
        Self::new()
    }
}

/// Build guidance without a template: pattern name, raw error, bulleted
/// parameters
pub fn synthesize(pattern: Option<&str>, error: Option<&str>, params: &Map<String, Value>) -> String {
    let mut lines = vec!["Completion validation failed.".to_string()];

    if let Some(pattern) = pattern {
        lines.push(format!("Failure pattern: {pattern}"));
    }
    if let Some(error) = error {
        if !error.is_empty() {
            lines.push(format!("Error: {error}"));
        }
    }

    if !params.is_empty() {
        lines.push(String::new());
        lines.push("Extracted details:".to_string());
        for (name, value) in params {
            match value {
                Value::Array(items) => {
                    lines.push(format!("{name}:"));
                    for item in items.iter().take(MAX_BULLETS) {
                        lines.push(format!("- {}", render_item(item)));
                    }
                    if items.len() > MAX_BULLETS {
                        lines.push(format!("- +{} more", items.len() - MAX_BULLETS));
                    }
                }
                other => lines.push(format!("{name}: {}", render_item(other))),
            }
        }
    }

    lines.push(String::new());
    lines.push("Address the issues above, then signal completion again.".to_string());
    lines.join("\n")
}

fn render_item(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

//! Success-rule mini-language
//!
//! A validator states what "passed" means as a small rule string:
//! `"empty"` (stdout empty after trim), `"exitCode:N"`, `"contains:S"`,
//! `"matches:<regex>"`. Rules are parsed once at registry load so a bad
//! rule is a configuration violation, never a runtime surprise. Text rules
//! read stdout; exit codes come from the process status.

use regex::Regex;
use tracing::debug;

use crate::completion::exec::CommandOutput;

/// Parsed success rule
#[derive(Debug, Clone)]
pub enum SuccessRule {
    Empty,
    ExitCode(i32),
    Contains(String),
    Matches(Regex),
}

impl SuccessRule {
    /// Parse rule text
    pub fn parse(text: &str) -> Result<SuccessRule, String> {
        debug!(%text, "SuccessRule::parse: called");

        if text == "empty" {
            return Ok(SuccessRule::Empty);
        }
        if let Some(code) = text.strip_prefix("exitCode:") {
            return code
                .trim()
                .parse::<i32>()
                .map(SuccessRule::ExitCode)
                .map_err(|_| format!("invalid exit code in success rule '{text}'"));
        }
        if let Some(needle) = text.strip_prefix("contains:") {
            return Ok(SuccessRule::Contains(needle.to_string()));
        }
        if let Some(pattern) = text.strip_prefix("matches:") {
            return Regex::new(pattern)
                .map(SuccessRule::Matches)
                .map_err(|e| format!("invalid regex in success rule '{text}': {e}"));
        }

        Err(format!("unknown success rule '{text}'"))
    }

    /// Evaluate the rule against captured command output
    pub fn check(&self, output: &CommandOutput) -> bool {
        match self {
            SuccessRule::Empty => output.stdout.trim().is_empty(),
            SuccessRule::ExitCode(code) => output.exit_code == *code,
            SuccessRule::Contains(needle) => output.stdout.contains(needle),
            SuccessRule::Matches(regex) => regex.is_match(&output.stdout),
        }
    }

    /// What the rule expected, for failure messages
    pub fn expectation(&self) -> String {
        match self {
            SuccessRule::Empty => "empty stdout".to_string(),
            SuccessRule::ExitCode(code) => format!("exit code {code}"),
            SuccessRule::Contains(needle) => format!("stdout containing '{needle}'"),
            SuccessRule::Matches(regex) => format!("stdout matching /{}/", regex.as_str()),
        }
    }
}

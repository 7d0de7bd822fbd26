//! Failure parameter extraction
//!
//! When a completion condition fails, its validator names extractors that
//! turn raw command output into structured parameters for retry guidance.
//! Built-ins cover the usual failure surfaces: version-control status
//! porcelain, test-runner transcripts, type-checker and linter error
//! streams, and unified diffs.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};
use tracing::debug;

use crate::completion::exec::CommandOutput;

static FAILED_TEST_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^test (\S+) \.\.\. FAILED$").expect("valid pattern"));
static ERROR_BLOCK_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^error(\[\w+\])?: (.+)$").expect("valid pattern"));
static LINT_BLOCK_HEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(warning|error)(\[[^\]]+\])?: (.+)$").expect("valid pattern"));
static BLOCK_LOCATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*-->\s*([^:]+):(\d+)").expect("valid pattern"));
static SINGLE_LINE_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^\s:]+):(\d+)(?::\d+)?:? ?error:? (.+)$").expect("valid pattern"));
static SINGLE_LINE_FINDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^\s:]+):(\d+)(?::\d+)?:\s*(warning|error):?\s*(.+)$").expect("valid pattern"));

/// Turns a failed condition's output into one structured parameter value
pub trait ParamExtractor: Send + Sync {
    /// Name the registry and validator definitions use
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn extract(&self, output: &CommandOutput) -> Value;
}

/// Parses version-control porcelain status lines
///
/// Produces `{changed, staged, unstaged, untracked}` path lists; `changed`
/// is every path that appeared at all.
pub struct VcsStatusExtractor;

impl ParamExtractor for VcsStatusExtractor {
    fn name(&self) -> &'static str {
        "vcs-status"
    }

    fn description(&self) -> &'static str {
        "Parse porcelain status output into changed/staged/unstaged/untracked file lists"
    }

    fn extract(&self, output: &CommandOutput) -> Value {
        let mut changed = Vec::new();
        let mut staged = Vec::new();
        let mut unstaged = Vec::new();
        let mut untracked = Vec::new();

        for line in output.stdout.lines() {
            let mut chars = line.chars();
            let index_state = chars.next().unwrap_or(' ');
            let tree_state = chars.next().unwrap_or(' ');
            let Some(path) = line.get(3..).map(str::trim).filter(|p| !p.is_empty()) else {
                continue;
            };
            let path = path.to_string();

            changed.push(path.clone());
            if index_state == '?' {
                untracked.push(path);
                continue;
            }
            if index_state != ' ' {
                staged.push(path.clone());
            }
            if tree_state != ' ' {
                unstaged.push(path);
            }
        }

        debug!(changed = changed.len(), "VcsStatusExtractor: parsed status");
        json!({
            "changed": changed,
            "staged": staged,
            "unstaged": unstaged,
            "untracked": untracked,
        })
    }
}

/// Parses a test-runner transcript into failed test names plus an excerpt
pub struct TestFailureExtractor;

impl TestFailureExtractor {
    const EXCERPT_LINES: usize = 15;
}

impl ParamExtractor for TestFailureExtractor {
    fn name(&self) -> &'static str {
        "test-failures"
    }

    fn description(&self) -> &'static str {
        "Parse a test transcript into failed test names and an error excerpt"
    }

    fn extract(&self, output: &CommandOutput) -> Value {
        let text = output.combined();

        let mut failed: Vec<String> = FAILED_TEST_LINE
            .captures_iter(&text)
            .map(|c| c[1].to_string())
            .collect();
        failed.dedup();

        let mut excerpt: Vec<&str> = text
            .lines()
            .filter(|l| l.contains("FAILED") || l.contains("panicked at") || l.contains("assertion"))
            .take(Self::EXCERPT_LINES)
            .collect();
        if excerpt.is_empty() {
            // No recognizable failure lines, keep the transcript tail
            let lines: Vec<&str> = text.lines().collect();
            let tail = lines.len().saturating_sub(10);
            excerpt = lines[tail..].to_vec();
        }

        debug!(failed = failed.len(), "TestFailureExtractor: parsed transcript");
        json!({
            "failed": failed,
            "count": failed.len(),
            "excerpt": excerpt.join("\n"),
        })
    }
}

/// Parses a type-checker's error stream into file/line/message records
///
/// Understands rustc-style blocks (`error[...]: msg` followed by a
/// `--> file:line:col` locator) and single-line `file:line: error: msg`
/// streams.
pub struct TypecheckExtractor;

impl ParamExtractor for TypecheckExtractor {
    fn name(&self) -> &'static str {
        "typecheck-errors"
    }

    fn description(&self) -> &'static str {
        "Parse type-checker errors into file/line/message records"
    }

    fn extract(&self, output: &CommandOutput) -> Value {
        let text = output.combined();
        let lines: Vec<&str> = text.lines().collect();
        let mut errors = Vec::new();

        for (i, line) in lines.iter().enumerate() {
            if let Some(caps) = ERROR_BLOCK_HEAD.captures(line) {
                let message = caps[2].to_string();
                // Compiler summary line, not a diagnostic
                if message.starts_with("aborting due to") {
                    continue;
                }
                let mut file = String::new();
                let mut line_no = 0u64;
                // Locator usually sits on the next line
                for candidate in lines.iter().skip(i + 1).take(3) {
                    if let Some(loc) = BLOCK_LOCATOR.captures(candidate) {
                        file = loc[1].to_string();
                        line_no = loc[2].parse().unwrap_or(0);
                        break;
                    }
                }
                errors.push(json!({"file": file, "line": line_no, "message": message}));
            } else if let Some(caps) = SINGLE_LINE_ERROR.captures(line) {
                errors.push(json!({
                    "file": caps[1].to_string(),
                    "line": caps[2].parse::<u64>().unwrap_or(0),
                    "message": caps[3].to_string(),
                }));
            }
        }

        debug!(errors = errors.len(), "TypecheckExtractor: parsed stream");
        Value::Array(errors)
    }
}

/// Parses linter output into file/line/severity/message records
pub struct LintExtractor;

impl ParamExtractor for LintExtractor {
    fn name(&self) -> &'static str {
        "lint-errors"
    }

    fn description(&self) -> &'static str {
        "Parse linter warnings and errors into file/line/message records"
    }

    fn extract(&self, output: &CommandOutput) -> Value {
        let text = output.combined();
        let lines: Vec<&str> = text.lines().collect();
        let mut findings = Vec::new();

        for (i, line) in lines.iter().enumerate() {
            if let Some(caps) = SINGLE_LINE_FINDING.captures(line) {
                findings.push(json!({
                    "file": caps[1].to_string(),
                    "line": caps[2].parse::<u64>().unwrap_or(0),
                    "severity": caps[3].to_string(),
                    "message": caps[4].to_string(),
                }));
            } else if let Some(caps) = LINT_BLOCK_HEAD.captures(line) {
                let severity = caps[1].to_string();
                let message = caps[3].to_string();
                if message.starts_with("aborting due to") {
                    continue;
                }
                let mut file = String::new();
                let mut line_no = 0u64;
                for candidate in lines.iter().skip(i + 1).take(3) {
                    if let Some(loc) = BLOCK_LOCATOR.captures(candidate) {
                        file = loc[1].to_string();
                        line_no = loc[2].parse().unwrap_or(0);
                        break;
                    }
                }
                findings.push(json!({
                    "file": file,
                    "line": line_no,
                    "severity": severity,
                    "message": message,
                }));
            }
        }

        debug!(findings = findings.len(), "LintExtractor: parsed output");
        Value::Array(findings)
    }
}

/// Summarizes a unified diff: touched files plus added/removed line counts
pub struct DiffSummaryExtractor;

impl ParamExtractor for DiffSummaryExtractor {
    fn name(&self) -> &'static str {
        "diff-summary"
    }

    fn description(&self) -> &'static str {
        "Summarize a unified diff into touched files and line counts"
    }

    fn extract(&self, output: &CommandOutput) -> Value {
        let mut files = Vec::new();
        let mut added = 0u64;
        let mut removed = 0u64;

        for line in output.stdout.lines() {
            if let Some(path) = line.strip_prefix("+++ ") {
                let path = path.trim().trim_start_matches("b/");
                if path != "/dev/null" {
                    files.push(path.to_string());
                }
            } else if line.starts_with("+++") || line.starts_with("---") {
                continue;
            } else if line.starts_with('+') {
                added += 1;
            } else if line.starts_with('-') {
                removed += 1;
            }
        }

        let summary = if files.len() == 1 {
            format!("1 file differs (+{added}/-{removed})")
        } else {
            format!("{} files differ (+{added}/-{removed})", files.len())
        };

        debug!(files = files.len(), added, removed, "DiffSummaryExtractor: parsed diff");
        json!({
            "files": files,
            "added": added,
            "removed": removed,
            "summary": summary,
        })
    }
}

/// Named extractors, built once at startup and shared by reference
pub struct ExtractorRegistry {
    extractors: HashMap<String, Box<dyn ParamExtractor>>,
}

impl ExtractorRegistry {
    /// Registry with the built-in extractors
    pub fn builtin() -> Self {
        debug!("ExtractorRegistry::builtin: called");
        let mut registry = Self::empty();
        registry.register(Box::new(VcsStatusExtractor));
        registry.register(Box::new(TestFailureExtractor));
        registry.register(Box::new(TypecheckExtractor));
        registry.register(Box::new(LintExtractor));
        registry.register(Box::new(DiffSummaryExtractor));
        registry
    }

    /// Empty registry (for testing and fully custom setups)
    pub fn empty() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    pub fn register(&mut self, extractor: Box<dyn ParamExtractor>) {
        debug!(name = %extractor.name(), "ExtractorRegistry::register: called");
        self.extractors.insert(extractor.name().to_string(), extractor);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ParamExtractor> {
        self.extractors.get(name).map(|e| e.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.extractors.contains_key(name)
    }

    /// Registered names, sorted for stable diagnostics
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.extractors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("extractors", &self.names())
            .finish()
    }
}

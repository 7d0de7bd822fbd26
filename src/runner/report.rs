//! Final run report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::invoke::StepUsage;
use crate::runner::state::HistoryEntry;

/// Terminal outcome of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    Success,
    MaxIterations,
    Fatal,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::MaxIterations => "max-iterations",
            RunOutcome::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Usage totals across every model invocation in a run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunUsage {
    #[serde(rename = "cost-usd")]
    pub cost_usd: f64,

    pub turns: u32,

    #[serde(rename = "duration-ms")]
    pub duration_ms: u64,

    pub invocations: u32,
}

impl RunUsage {
    /// Fold one invocation's usage into the totals
    pub fn add(&mut self, usage: &StepUsage) {
        self.cost_usd += usage.cost_usd;
        self.turns += usage.turns;
        self.duration_ms += usage.duration_ms;
        self.invocations += 1;
    }
}

/// Everything a caller learns about a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(rename = "run-id")]
    pub run_id: String,

    pub outcome: RunOutcome,

    pub iterations: u32,

    /// Steps executed, in order, with their interpreted intents
    pub history: Vec<HistoryEntry>,

    /// Error taxonomy code when the run did not succeed
    #[serde(rename = "error-code", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    /// Human-readable failure explanation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub usage: RunUsage,

    #[serde(rename = "started-at")]
    pub started_at: DateTime<Utc>,

    #[serde(rename = "ended-at")]
    pub ended_at: DateTime<Utc>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Success
    }
}

/// Generate a time-ordered unique run id
pub fn generate_run_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

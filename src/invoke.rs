//! ModelInvoker trait definition
//!
//! The engine treats the model as an opaque async call: one fully composed
//! request in, one contract-parsed structured result plus usage out. No
//! conversation state lives here; every iteration composes its request
//! from scratch plus the previous iteration's continuation content.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One composed request for a step iteration
#[derive(Debug, Clone)]
pub struct StepInvocation {
    pub step_id: String,

    /// Base prompt text resolved for the step
    pub prompt: String,

    /// Carry-over content from the previous iteration (retry guidance)
    pub continuation: Option<String>,

    /// Tool/permission names from the step definition, passed verbatim
    pub tools: Vec<String>,

    /// Output contract the result must satisfy, when the gate declares one
    pub contract: Option<Value>,
}

/// Usage reported for one model call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StepUsage {
    #[serde(rename = "cost-usd")]
    pub cost_usd: f64,

    pub turns: u32,

    #[serde(rename = "duration-ms")]
    pub duration_ms: u64,
}

/// Structured result plus usage from one model call
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Contract-parsed structured result
    pub result: Value,

    pub usage: StepUsage,
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("model call failed: {0}")]
    Failed(String),

    #[error("model call timed out after {0}ms")]
    Timeout(u64),

    #[error("model returned malformed output: {0}")]
    Malformed(String),
}

/// Opaque model seam the runner drives
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, invocation: &StepInvocation) -> Result<StepOutput, InvokeError>;
}

//! External action requests
//!
//! The runner decides when an external mutation should happen (closing the
//! work item after validated success, escalating to an operator) and with
//! what payload; carrying it out is entirely the dispatcher's business.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

/// Payload for one externally-executed action
#[derive(Debug, Clone, Serialize)]
pub struct ActionRequest {
    /// Action name, `close` or `escalate`
    pub action: String,

    #[serde(rename = "run-id")]
    pub run_id: String,

    /// Step that triggered the request
    #[serde(rename = "step-id")]
    pub step_id: String,

    pub payload: Map<String, Value>,
}

/// Receives action requests from the runner
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// Close out the external work item after validated success
    async fn close(&self, request: &ActionRequest) -> eyre::Result<()>;

    /// Hand the work item to a human operator
    async fn escalate(&self, request: &ActionRequest) -> eyre::Result<()>;
}

/// Dispatcher that acknowledges every request without side effects
#[derive(Debug, Default)]
pub struct NoopDispatcher;

#[async_trait]
impl ActionDispatcher for NoopDispatcher {
    async fn close(&self, request: &ActionRequest) -> eyre::Result<()> {
        debug!(step_id = %request.step_id, "NoopDispatcher::close: acknowledged");
        Ok(())
    }

    async fn escalate(&self, request: &ActionRequest) -> eyre::Result<()> {
        debug!(step_id = %request.step_id, "NoopDispatcher::escalate: acknowledged");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use mock::RecordingDispatcher;

    fn request(action: &str, step_id: &str) -> ActionRequest {
        ActionRequest {
            action: action.to_string(),
            run_id: "run-1".to_string(),
            step_id: step_id.to_string(),
            payload: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_noop_accepts_everything() {
        let dispatcher = NoopDispatcher;
        assert!(dispatcher.close(&request("close", "close")).await.is_ok());
        assert!(dispatcher.escalate(&request("escalate", "verify")).await.is_ok());
    }

    #[tokio::test]
    async fn test_recording_dispatcher_captures_requests() {
        let dispatcher = RecordingDispatcher::new();
        dispatcher.escalate(&request("escalate", "verify")).await.unwrap();
        dispatcher.close(&request("close", "close")).await.unwrap();

        assert_eq!(dispatcher.actions(), vec!["escalate", "close"]);
        assert_eq!(dispatcher.requests()[1].step_id, "close");
    }
}

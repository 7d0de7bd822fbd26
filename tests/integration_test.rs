//! Integration tests for Stepflow
//!
//! These tests drive full flow runs through the public API: registry and
//! prompts loaded from disk, a scripted model behind the invoker seam, and
//! a recording dispatcher capturing requested actions.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use stepflow::{
    ActionDispatcher, ActionRequest, FlowEvent, FlowRunner, FsPromptResolver, Intent, InvokeError,
    ModelInvoker, RegistryLoader, RunOutcome, RunReport, RunnerConfig, StepInvocation, StepOutput,
    StepRegistry, StepUsage, create_event_bus,
};
use tempfile::TempDir;

// =============================================================================
// Test Doubles
// =============================================================================

/// Returns scripted structured results in order and records every request.
struct ScriptedInvoker {
    results: Mutex<VecDeque<Value>>,
    requests: Mutex<Vec<StepInvocation>>,
}

impl ScriptedInvoker {
    fn new(results: Vec<Value>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<StepInvocation> {
        self.requests.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(&self, invocation: &StepInvocation) -> Result<StepOutput, InvokeError> {
        self.requests.lock().expect("lock poisoned").push(invocation.clone());
        let result = self
            .results
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .ok_or_else(|| InvokeError::Failed("script exhausted".to_string()))?;
        Ok(StepOutput {
            result,
            usage: StepUsage {
                cost_usd: 0.02,
                turns: 1,
                duration_ms: 10,
            },
        })
    }
}

/// Records close/escalate requests instead of performing them.
#[derive(Default)]
struct RecordingDispatcher {
    requests: Mutex<Vec<ActionRequest>>,
}

impl RecordingDispatcher {
    fn requests(&self) -> Vec<ActionRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }

    fn actions(&self) -> Vec<String> {
        self.requests().iter().map(|request| request.action.clone()).collect()
    }
}

#[async_trait]
impl ActionDispatcher for RecordingDispatcher {
    async fn close(&self, request: &ActionRequest) -> eyre::Result<()> {
        self.requests.lock().expect("lock poisoned").push(request.clone());
        Ok(())
    }

    async fn escalate(&self, request: &ActionRequest) -> eyre::Result<()> {
        self.requests.lock().expect("lock poisoned").push(request.clone());
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

const PREPARE_PROMPT: &str = "Prepare the release branch and draft the changelog.";
const RETRY_GUIDANCE: &str = "Release notes are missing. Write RELEASE_NOTES.md before finishing.";

fn registry_yaml(notes_command: &str) -> String {
    format!(
        r##"
agent-id: release-flow
version: 1
entry-step-mapping:
  default: prepare
  hotfix: check
contracts:
  work-report:
    type: object
    properties:
      next_action:
        type: object
        properties:
          action:
            enum: [next]
  check-report:
    type: object
    properties:
      next_action:
        type: object
        properties:
          action:
            enum: [next, escalate]
  finish-report:
    type: object
    properties:
      verdict:
        type: object
        properties:
          action:
            enum: [closing, repeat]
steps:
  prepare:
    kind: work
    gate:
      allowed-intents: [next]
      intent-schema-ref: "#/contracts/work-report"
      intent-field: "next_action.action"
    transitions:
      next: {{ target: check }}
  check:
    kind: verification
    gate:
      allowed-intents: [next, escalate]
      intent-schema-ref: "#/contracts/check-report"
      intent-field: "next_action.action"
    transitions:
      next: {{ target: finish }}
      escalate: {{ target: prepare }}
  finish:
    kind: closure
    gate:
      allowed-intents: [closing, repeat]
      intent-schema-ref: "#/contracts/finish-report"
      intent-field: "verdict.action"
    transitions:
      closing: {{ target: null }}
      repeat: {{ target: check }}
    completion-conditions:
      - name: notes-present
        validator: notes-present
validators:
  notes-present:
    type: command
    command: "{notes_command}"
    success: "exitCode:0"
    failure-pattern: missing-notes
patterns:
  missing-notes:
    edition: retry
    expected-params: []
"##
    )
}

/// Writes the registry document to disk and loads it back through the loader.
async fn load_registry(dir: &Path, notes_command: &str) -> Arc<StepRegistry> {
    let path = dir.join("release-flow.yml");
    std::fs::write(&path, registry_yaml(notes_command)).expect("Failed to write registry file");
    Arc::new(
        RegistryLoader::new()
            .load_file(&path)
            .await
            .expect("Failed to load registry"),
    )
}

/// Lays out a prompt tree on disk and points a filesystem resolver at it.
fn write_prompt_tree(dir: &Path) -> Arc<FsPromptResolver> {
    let base = dir.join("prompts/steps/release-flow");
    for (step, text) in [
        ("prepare", PREPARE_PROMPT),
        ("check", "Verify the release candidate builds and passes checks."),
        ("finish", "Tag the release and publish the artifacts."),
    ] {
        let step_dir = base.join(step);
        std::fs::create_dir_all(&step_dir).expect("Failed to create prompt dir");
        std::fs::write(step_dir.join("base.md"), text).expect("Failed to write prompt");
    }
    std::fs::write(base.join("finish").join("retry.md"), RETRY_GUIDANCE)
        .expect("Failed to write retry prompt");
    Arc::new(FsPromptResolver::new(dir.join("prompts")))
}

fn runner_config(workdir: &Path) -> RunnerConfig {
    RunnerConfig {
        max_iterations: 10,
        workdir: workdir.to_path_buf(),
        ..RunnerConfig::default()
    }
}

fn next_result() -> Value {
    json!({"next_action": {"action": "next"}})
}

fn escalate_result() -> Value {
    json!({"next_action": {"action": "escalate"}})
}

fn closing_result() -> Value {
    json!({"verdict": {"action": "closing"}})
}

fn trail(report: &RunReport) -> Vec<&str> {
    report.history.iter().map(|entry| entry.step_id.as_str()).collect()
}

// =============================================================================
// End-to-End Flow Tests
// =============================================================================

#[tokio::test]
async fn test_flow_runs_to_completion() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(temp_dir.path().join("RELEASE_NOTES.md"), "v1.0\n").expect("Failed to write notes");

    let registry = load_registry(temp_dir.path(), "test -f RELEASE_NOTES.md").await;
    let resolver = write_prompt_tree(temp_dir.path());
    let invoker = Arc::new(ScriptedInvoker::new(vec![
        next_result(),
        next_result(),
        closing_result(),
    ]));
    let dispatcher = Arc::new(RecordingDispatcher::default());

    let mut runner = FlowRunner::new(
        registry,
        resolver,
        Arc::clone(&invoker) as Arc<dyn ModelInvoker>,
        runner_config(temp_dir.path()),
    )
    .expect("Failed to build runner")
    .with_dispatcher(Arc::clone(&dispatcher) as Arc<dyn ActionDispatcher>);

    let report = runner.run().await;

    assert!(report.succeeded(), "Run should succeed: {:?}", report.reason);
    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(report.iterations, 3);
    assert_eq!(trail(&report), vec!["prepare", "check", "finish"]);
    assert_eq!(report.history[0].intent, Intent::Next);
    assert!(!report.run_id.is_empty(), "Report should carry a run id");

    // Base prompts came off disk, contracts off the registry document
    let requests = invoker.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].prompt, PREPARE_PROMPT);
    assert!(requests[0].contract.is_some(), "Gated step should carry its contract");
    assert!(requests[0].continuation.is_none());

    // One close request with the run summary payload
    let actions = dispatcher.requests();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action, "close");
    assert_eq!(actions[0].step_id, "finish");
    assert_eq!(actions[0].payload["iterations"], json!(3));

    assert_eq!(report.usage.invocations, 3);
    assert_eq!(report.usage.turns, 3);
    assert!((report.usage.cost_usd - 0.06).abs() < 1e-9);
}

#[tokio::test]
async fn test_entry_mapping_selects_mode_step() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(temp_dir.path().join("RELEASE_NOTES.md"), "hotfix\n").expect("Failed to write notes");

    let registry = load_registry(temp_dir.path(), "test -f RELEASE_NOTES.md").await;
    let resolver = write_prompt_tree(temp_dir.path());
    let invoker = Arc::new(ScriptedInvoker::new(vec![next_result(), closing_result()]));

    let mut config = runner_config(temp_dir.path());
    config.mode = Some("hotfix".to_string());

    let mut runner =
        FlowRunner::new(registry, resolver, invoker, config).expect("Failed to build runner");
    let report = runner.run().await;

    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(report.iterations, 2);
    assert_eq!(trail(&report), vec!["check", "finish"]);
}

#[tokio::test]
async fn test_failed_completion_check_retries_with_guidance() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    // First check fails and plants the marker, so the rerun passes
    let registry = load_registry(
        temp_dir.path(),
        "test -f RELEASE_NOTES.md || (touch RELEASE_NOTES.md; exit 1)",
    )
    .await;
    let resolver = write_prompt_tree(temp_dir.path());
    let invoker = Arc::new(ScriptedInvoker::new(vec![
        next_result(),
        next_result(),
        closing_result(),
        next_result(),
        closing_result(),
    ]));

    let mut runner = FlowRunner::new(
        registry,
        resolver,
        Arc::clone(&invoker) as Arc<dyn ModelInvoker>,
        runner_config(temp_dir.path()),
    )
    .expect("Failed to build runner");

    let report = runner.run().await;

    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(report.iterations, 5);
    assert_eq!(trail(&report), vec!["prepare", "check", "finish", "check", "finish"]);

    // The rerouted step received the retry template as continuation text,
    // consumed after a single use
    let requests = invoker.requests();
    assert_eq!(requests.len(), 5);
    assert_eq!(requests[3].step_id, "check");
    assert_eq!(requests[3].continuation.as_deref(), Some(RETRY_GUIDANCE));
    assert!(requests[4].continuation.is_none());
}

#[tokio::test]
async fn test_run_stops_at_iteration_ceiling() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let registry = load_registry(temp_dir.path(), "test -f RELEASE_NOTES.md").await;
    let resolver = write_prompt_tree(temp_dir.path());
    // check keeps escalating back to prepare, never reaching finish
    let invoker = Arc::new(ScriptedInvoker::new(vec![
        next_result(),
        escalate_result(),
        next_result(),
        escalate_result(),
    ]));
    let dispatcher = Arc::new(RecordingDispatcher::default());

    let mut config = runner_config(temp_dir.path());
    config.max_iterations = 4;

    let mut runner = FlowRunner::new(registry, resolver, invoker, config)
        .expect("Failed to build runner")
        .with_dispatcher(Arc::clone(&dispatcher) as Arc<dyn ActionDispatcher>);

    let report = runner.run().await;

    assert_eq!(report.outcome, RunOutcome::MaxIterations);
    assert!(!report.succeeded());
    assert_eq!(report.iterations, 4);
    assert_eq!(report.error_code.as_deref(), Some("max-iterations"));
    assert!(
        report.reason.as_deref().unwrap_or_default().contains("budget"),
        "Reason should name the exhausted budget: {:?}",
        report.reason
    );
    assert_eq!(dispatcher.actions(), vec!["escalate", "escalate"]);
}

// =============================================================================
// Event Streaming Tests
// =============================================================================

#[tokio::test]
async fn test_events_stream_to_shared_subscriber() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(temp_dir.path().join("RELEASE_NOTES.md"), "v1.0\n").expect("Failed to write notes");

    let registry = load_registry(temp_dir.path(), "test -f RELEASE_NOTES.md").await;
    let resolver = write_prompt_tree(temp_dir.path());
    let invoker = Arc::new(ScriptedInvoker::new(vec![
        next_result(),
        next_result(),
        closing_result(),
    ]));

    let bus = create_event_bus();
    let mut rx = bus.subscribe();

    let mut runner = FlowRunner::new(registry, resolver, invoker, runner_config(temp_dir.path()))
        .expect("Failed to build runner")
        .with_event_bus(Arc::clone(&bus));

    let report = runner.run().await;
    assert_eq!(report.outcome, RunOutcome::Success);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert!(
        matches!(events.first(), Some(FlowEvent::RunStarted { agent_id, entry_step, .. })
            if agent_id == "release-flow" && entry_step == "prepare"),
        "First event should announce the run"
    );
    assert!(
        matches!(events.last(), Some(FlowEvent::RunCompleted { outcome, iterations, .. })
            if outcome == "success" && *iterations == 3),
        "Last event should report the outcome"
    );
    assert!(
        events.iter().all(|event| event.run_id() == report.run_id),
        "Every event should carry the run id"
    );

    let invoked = events
        .iter()
        .filter(|event| matches!(event, FlowEvent::StepInvoked { .. }))
        .count();
    assert_eq!(invoked, 3, "One StepInvoked per iteration");
}

// =============================================================================
// Registry and Config Validation Tests
// =============================================================================

#[tokio::test]
async fn test_unknown_transition_target_is_rejected() {
    let yaml = r#"
agent-id: broken-flow
version: 1
entry-step: start
steps:
  start:
    kind: work
    transitions:
      next: { target: ghost }
"#;

    let err = RegistryLoader::new()
        .load_str(yaml)
        .await
        .expect_err("Loader should reject the unknown target");

    assert_eq!(err.code(), "configuration");
    assert!(err.to_string().contains("ghost"), "Error should name the missing step: {err}");
}

#[test]
fn test_runner_config_parses_kebab_keys() {
    let config = RunnerConfig::from_yaml_str(
        "max-iterations: 7\nretry-step: check\ncondition-timeout-ms: 1500\n",
    )
    .expect("Failed to parse config");

    assert_eq!(config.max_iterations, 7);
    assert_eq!(config.retry_step.as_deref(), Some("check"));
    assert_eq!(config.condition_timeout_ms, 1500);
    assert_eq!(config.iteration_delay_ms, 0, "Unset fields should use defaults");
}

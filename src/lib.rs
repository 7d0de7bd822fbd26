//! Stepflow - Schema-Gated Step-Flow Orchestration
//!
//! Stepflow drives a multi-step agent task through a typed state machine.
//! Each step's structured output passes a gate that extracts a routing
//! intent, a router resolves the next step, and a closing claim is only
//! believed after its completion conditions pass concrete checks.
//!
//! # Core Concepts
//!
//! - **Typed intents**: step kinds bound which intents a step may emit
//! - **Gated output**: intents come from contract-checked result fields,
//!   validated against the registry at load time
//! - **Concrete completion**: closing is judged by exit codes, command
//!   output, and file existence, not by the model's say-so
//! - **Bounded retry**: failed checks become pattern-driven guidance fed
//!   into the next iteration, inside one iteration budget
//!
//! # Modules
//!
//! - [`registry`] - Step registry loading and load-time validation
//! - [`gate`] - Intent extraction from structured step results
//! - [`router`] - Transition resolution for interpreted intents
//! - [`completion`] - Completion conditions, success rules, extractors
//! - [`retry`] - Retry guidance from failure patterns and templates
//! - [`runner`] - The dual-loop execution engine
//! - [`events`] - Event bus for live observability
//! - [`prompts`] - Prompt resolver seam and shipped resolvers
//! - [`invoke`] - Model invocation seam
//! - [`config`] - Runner configuration types and loading

pub mod completion;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod invoke;
pub mod prompts;
pub mod registry;
pub mod retry;
pub mod router;
pub mod runner;

// Re-export commonly used types
pub use completion::{
    CompletionOutcome, CompletionValidator, ExtractorRegistry, ResolvedValidator, SuccessRule, ValidatorRegistry,
};
pub use config::RunnerConfig;
pub use error::FlowError;
pub use events::{EventBus, EventEmitter, EventLogEntry, FlowEvent, create_event_bus};
pub use gate::GateOutcome;
pub use invoke::{InvokeError, ModelInvoker, StepInvocation, StepOutput, StepUsage};
pub use prompts::{FsPromptResolver, PromptLocator, PromptResolver, ResolveError, StaticPromptResolver};
pub use registry::{
    CompletionCondition, CompletionPattern, GateSpec, Intent, LoaderOptions, PatternBook, RegistryLoader,
    StepDefinition, StepKind, StepRegistry, TargetMode, TransitionRule, ValidatorDef, ValidatorKind,
};
pub use retry::RetryHandler;
pub use router::Route;
pub use runner::{
    ActionDispatcher, ActionRequest, FlowRunner, HistoryEntry, NoopDispatcher, RunOutcome, RunReport, RunState,
    RunUsage, generate_run_id,
};

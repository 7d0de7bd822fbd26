//! Dual-loop runner
//!
//! Composes the registry, gate, router, completion validator, and retry
//! handler into one execution. The flow phase advances steps from model
//! output; the completion phase decides whether a closing claim holds.
//! Collaborators (prompt resolver, model invoker, action dispatcher) stay
//! behind async traits so the engine never touches the outside world
//! directly.

mod dispatch;
mod engine;
mod report;
mod state;

pub use dispatch::{ActionDispatcher, ActionRequest, NoopDispatcher};
pub use engine::FlowRunner;
pub use report::{RunOutcome, RunReport, RunUsage, generate_run_id};
pub use state::{HistoryEntry, RunState};

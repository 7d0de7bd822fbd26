//! Step registry: the validated flow definition
//!
//! A registry document declares the steps, their gates and transitions,
//! named validators, and failure patterns for one agent flow. The loader
//! validates the whole document up front and returns an immutable
//! [`StepRegistry`]; nothing here mutates after load.

mod contract;
mod loader;
mod types;

pub use loader::{LoaderOptions, RegistryLoader, StepRegistry};
pub use types::{
    CompletionCondition, CompletionPattern, GateSpec, Intent, PatternBook, StepDefinition,
    StepKind, TargetMode, TransitionRule, ValidatorDef, ValidatorKind,
};

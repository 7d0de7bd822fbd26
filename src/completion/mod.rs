//! Completion validation for closure steps
//!
//! A closure step claims the task is done; this module decides whether to
//! believe it. Ordered conditions run strictly sequentially through shell
//! commands and file checks, judged by a small success-rule language, and
//! a failure hands structured parameters to the retry path.

mod exec;
mod extractors;
mod rules;
mod validator;

pub use exec::{CommandOutput, run_shell};
pub use extractors::{
    DiffSummaryExtractor, ExtractorRegistry, LintExtractor, ParamExtractor, TestFailureExtractor, TypecheckExtractor,
    VcsStatusExtractor,
};
pub use rules::SuccessRule;
pub use validator::{CompletionOutcome, CompletionValidator, MAX_DETAIL_LINES, ResolvedValidator, ValidatorRegistry};

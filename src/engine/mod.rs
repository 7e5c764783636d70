/// Session state and the current-context binding for consequences
pub mod context;
/// The evaluation driver loop
#[allow(clippy::module_inception)]
pub(crate) mod engine;
/// Fact handles and runtime type matching
pub mod fact;
/// Working memory: the multi-type fact store
pub mod fact_space;
/// Session observability hooks
pub mod listener;
/// Per-pass activation planning
pub(crate) mod plan;
/// Aggregated session output
pub mod results;
/// Compiled rules and their builders
pub mod rule;
/// Rule sets and the evaluation API
pub mod rule_set;
/// The fact-type discriminator index
pub mod rule_tree;

// Re-export main components for easy access
pub use context::{current, try_current, EvaluationContext, SessionConfig};
pub use fact::{Fact, TypeKey, TypeMatch};
pub use fact_space::{FactId, FactSpace, Selector, TypeSlot};
pub use listener::{EvaluationListener, LogListener, NoopListener};
pub use results::{EvaluationResults, RuleEvent};
pub use rule::{
    fact_param, Activation, EventTemplate, ForeachRuleBuilder, ParamExtractor, Rule, RuleBuilder,
};
pub use rule_set::{RuleSet, RuleSetStats};
pub use rule_tree::RuleTree;

//! # Rulewright
//!
//! A typed forward-chaining production rule engine: offer facts, let the
//! engine discover every rule/tuple binding whose conditions hold, fire
//! consequences in salience order, mutate working memory mid-session with
//! automatic re-evaluation, and collect events, scores, and statistics.
//!
//! ## Features
//!
//! - **Typed facts**: heterogeneous client values with stable identities
//!   and modification-aware selectors
//! - **Polymorphic rule index**: an arity-aware discriminator tree with
//!   wildcard parameters and namespace filtering
//! - **Deterministic ordering**: salience, then rule name, then fact
//!   insertion order
//! - **Mutex groups & fire-once**: at most one rule of a cohort fires per
//!   planning cycle; fired tuples can be pinned for the session
//! - **Forward chaining**: consequences insert, modify, and retract facts;
//!   the engine re-plans until quiescence
//! - **Scoring & events**: affirmations/vetos with threshold decisions,
//!   deduplicated rule events with violation accounting
//!
//! ## Quick Start
//!
//! ```rust
//! use rulewright::{EventCategory, Fact, Rule, RuleSet};
//!
//! #[derive(Debug)]
//! struct Person {
//!     name: String,
//!     age: i64,
//! }
//!
//! fn main() -> rulewright::Result<()> {
//!     let mut rules = RuleSet::new("demo");
//!     rules.add_rule(
//!         Rule::unary::<Person>("demo.checks", "age-check")
//!             .when(|p: &Person| p.age < 18)
//!             .then(|p: &Person| {
//!                 rulewright::context::current().emit_event(
//!                     EventCategory::Violation,
//!                     "age",
//!                     &format!("{} is under age", p.name),
//!                 );
//!             })
//!             .build(),
//!     )?;
//!
//!     let ctx = rules.evaluation_context();
//!     ctx.add_fact(&Fact::new(Person {
//!         name: "Alice".to_string(),
//!         age: 25,
//!     }))?;
//!
//!     let results = rules.evaluate(&ctx)?;
//!     assert_eq!(results.total_fired(), 0);
//!     assert!(results.violations().is_empty());
//!     Ok(())
//! }
//! ```
//!
//! ## Core Components
//!
//! - [`RuleSet`]: owns compiled rules and the discriminator tree
//! - [`Rule`]: typed builders compiling down to one erased rule shape
//! - [`EvaluationContext`]: per-session facts, lookups, limits, and results
//! - [`FactSpace`]: working memory with identities and selectors
//! - [`EvaluationResults`]: events, counters, score, and timing
//! - [`EvaluationListener`]: synchronous session observability

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Selector and signature packing codecs
pub mod codec;
/// The fact space, rule tree, planner, and evaluation loop
pub mod engine;
/// Error types and result handling
pub mod errors;
/// Value, event category, and lookup key types
pub mod types;

// Re-export core types for easy access
pub use errors::{EngineError, Result};
pub use types::{EventCategory, LookupKey, Value};

pub use engine::context;
pub use engine::{
    fact_param, Activation, EvaluationContext, EvaluationListener, EvaluationResults,
    EventTemplate, Fact, FactId, FactSpace, ForeachRuleBuilder, LogListener, NoopListener,
    ParamExtractor, Rule, RuleBuilder, RuleEvent, RuleSet, RuleSetStats, RuleTree, Selector,
    SessionConfig, TypeKey, TypeMatch, TypeSlot,
};

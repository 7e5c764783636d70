use crate::engine::results::RuleEvent;
use thiserror::Error;

/// Error types that can occur while building rule sets or running sessions
#[derive(Error, Debug)]
pub enum EngineError {
    /// No rule was evaluated during a session that required at least one
    #[error("no rules were evaluated for the offered facts")]
    NoRulesEvaluated,

    /// One or more violation events were emitted during a session that
    /// requested strict validation
    #[error("{} rule violation(s) were raised", .violations.len())]
    ViolationsExist {
        /// The violation events collected before the session ended
        violations: Vec<RuleEvent>,
    },

    /// The session exceeded its evaluation or wall-clock budget
    #[error("evaluation exhausted after {evaluated} evaluations in {elapsed_ms}ms")]
    EvaluationExhausted {
        /// Number of activations evaluated before the budget ran out
        evaluated: u64,
        /// Wall-clock milliseconds spent before the budget ran out
        elapsed_ms: i64,
    },

    /// A selector did not resolve to a live fact
    #[error("invalid selector: {selector}")]
    InvalidSelector {
        /// The selector that failed to resolve
        selector: u16,
    },

    /// A lookup table exists but has no entry for the requested key
    #[error("lookup table '{table}' has no entry for key {key}")]
    LookupMissing {
        /// The table that was consulted
        table: String,
        /// Rendering of the key that missed
        key: String,
    },

    /// No lookup table is registered under the requested name
    #[error("lookup table '{table}' is not registered on this context")]
    LookupTableMissing {
        /// The table name that was requested
        table: String,
    },

    /// The rule tree has been sealed by a query and no longer accepts rules
    #[error("rule tree is sealed; rules cannot be added after the first query")]
    RuleTreeSealed,

    /// A rule was registered under a type tuple of a different length than
    /// its declared arity
    #[error("rule '{rule}' declares arity {declared} but was registered with {supplied} parameter types")]
    ArityMismatch {
        /// Name of the offending rule
        rule: String,
        /// Arity the rule declares
        declared: usize,
        /// Number of parameter types supplied at registration
        supplied: usize,
    },

    /// A rule tuple must bind between one and four fact types
    #[error("a rule tuple must bind between 1 and 4 fact types, got {arity}")]
    InvalidArity {
        /// The out-of-range arity
        arity: usize,
    },

    /// A rule with the same name already exists in the rule set
    #[error("rule '{name}' already exists in this rule set")]
    DuplicateRule {
        /// The duplicated rule name
        name: String,
    },

    /// Facts were offered to a context after its session had started
    #[error("facts cannot be added after evaluation has started")]
    SessionStarted,

    /// A context was asked to run a second session
    #[error("evaluation context has already run its session; create a new context")]
    ContextExhausted,

    /// The session allocated more selectors than the packing can represent
    #[error("selector space exhausted; too many modifications in one session")]
    SelectorSpaceExhausted,

    /// A fact handle was offered to an operation but is not present in the
    /// fact space
    #[error("fact is not present in the fact space")]
    UnknownFact,
}

/// Convenient Result type alias for rule engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

use std::fmt;

use crate::engine::fact::Fact;
use crate::engine::results::RuleEvent;
use crate::engine::rule::Rule;

/// Observer of one evaluation session.
///
/// All callbacks are synchronous, run on the session thread, and must not
/// mutate the fact space. Every method defaults to a no-op.
pub trait EvaluationListener {
    /// The session is about to start.
    fn begin_evaluation(&self) {}

    /// A fact tuple is about to be evaluated.
    fn begin_tuple_evaluation(&self, _facts: &[Fact]) {}

    /// A rule's consequence is about to run.
    fn firing_rule(&self, _rule: &Rule) {}

    /// A rule's consequence returned; `modified` reports whether the fire
    /// mutated the fact space.
    fn fired_rule(&self, _rule: &Rule, _modified: bool) {}

    /// Evaluation of a fact tuple finished.
    fn end_tuple_evaluation(&self, _facts: &[Fact]) {}

    /// The session finished.
    fn end_evaluation(&self) {}

    /// An event was emitted.
    fn event_created(&self, _event: &RuleEvent) {}

    /// Engine diagnostics.
    fn debug(&self, _message: fmt::Arguments<'_>) {}

    /// Engine warnings.
    fn warning(&self, _message: fmt::Arguments<'_>) {}
}

/// The default listener; ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl EvaluationListener for NoopListener {}

/// A listener that forwards every callback to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl EvaluationListener for LogListener {
    fn begin_evaluation(&self) {
        log::debug!("evaluation started");
    }

    fn begin_tuple_evaluation(&self, facts: &[Fact]) {
        log::trace!("evaluating tuple of {} fact(s)", facts.len());
    }

    fn firing_rule(&self, rule: &Rule) {
        log::debug!("firing rule {}", rule.qualified_name());
    }

    fn fired_rule(&self, rule: &Rule, modified: bool) {
        log::debug!(
            "fired rule {} (modified: {})",
            rule.qualified_name(),
            modified
        );
    }

    fn end_tuple_evaluation(&self, facts: &[Fact]) {
        log::trace!("finished tuple of {} fact(s)", facts.len());
    }

    fn end_evaluation(&self) {
        log::debug!("evaluation finished");
    }

    fn event_created(&self, event: &RuleEvent) {
        log::info!("{}", event);
    }

    fn debug(&self, message: fmt::Arguments<'_>) {
        log::debug!("{}", message);
    }

    fn warning(&self, message: fmt::Arguments<'_>) {
        log::warn!("{}", message);
    }
}

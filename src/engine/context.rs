use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use crate::engine::fact::Fact;
use crate::engine::fact_space::{FactSpace, Selector};
use crate::engine::listener::{EvaluationListener, NoopListener};
use crate::engine::results::{EvaluationResults, RuleEvent};
use crate::errors::{EngineError, Result};
use crate::types::{concise_type_name, EventCategory, LookupKey, Value};

/// Limits and policy switches for one evaluation session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Budget on condition evaluations before the session is exhausted
    pub max_evaluations: u64,
    /// Wall-clock budget before the session is exhausted
    pub max_duration: Duration,
    /// Violation budget; the session short-circuits cleanly when reached
    pub max_violations: Option<u64>,
    /// Raise [`EngineError::ViolationsExist`] when violations were emitted
    pub throw_on_violations: bool,
    /// Raise [`EngineError::NoRulesEvaluated`] when nothing was evaluated
    pub throw_on_no_rules: bool,
    /// Swallow session-control errors and report through results only
    pub suppress_exceptions: bool,
    /// Restrict the session to rules whose namespace starts with any listed
    /// prefix; empty admits every rule
    pub namespace_filter: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_evaluations: 500_000,
            max_duration: Duration::from_millis(10_000),
            max_violations: None,
            throw_on_violations: false,
            throw_on_no_rules: false,
            suppress_exceptions: false,
            namespace_filter: Vec::new(),
        }
    }
}

struct LookupTable {
    entries: HashMap<LookupKey, Rc<dyn Any>>,
}

struct ContextInner {
    facts: RefCell<FactSpace>,
    results: RefCell<EvaluationResults>,
    lookups: RefCell<HashMap<String, LookupTable>>,
    listener: RefCell<Rc<dyn EvaluationListener>>,
    config: RefCell<SessionConfig>,
    started: Cell<bool>,
    in_fire: Cell<bool>,
    current_rule: RefCell<Option<String>>,
}

/// Per-session state: one fact space, one results object, lookup tables,
/// the listener binding, and the session limits.
///
/// A context runs exactly one session and is deliberately single-threaded;
/// clone the handle freely within the session. During a fire the engine
/// binds the context into a thread-local slot so consequences can reach it
/// through [`current`] without taking it as an argument.
#[derive(Clone)]
pub struct EvaluationContext {
    inner: Rc<ContextInner>,
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationContext {
    /// Create a fresh context with default limits and a no-op listener.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ContextInner {
                facts: RefCell::new(FactSpace::new()),
                results: RefCell::new(EvaluationResults::new()),
                lookups: RefCell::new(HashMap::new()),
                listener: RefCell::new(Rc::new(NoopListener)),
                config: RefCell::new(SessionConfig::default()),
                started: Cell::new(false),
                in_fire: Cell::new(false),
                current_rule: RefCell::new(None),
            }),
        }
    }

    /// Offer a fact to the session's working memory.
    ///
    /// Allowed before the session starts, and during a fire through the
    /// bound context; anywhere else it is a guarded failure.
    pub fn add_fact(&self, fact: &Fact) -> Result<()> {
        if self.inner.started.get() && !self.inner.in_fire.get() {
            return Err(EngineError::SessionStarted);
        }
        self.inner.facts.borrow_mut().add(fact)?;
        Ok(())
    }

    /// Offer several facts, preserving order; duplicates are ignored.
    pub fn add_facts<I>(&self, facts: I) -> Result<()>
    where
        I: IntoIterator<Item = Fact>,
    {
        for fact in facts {
            self.add_fact(&fact)?;
        }
        Ok(())
    }

    /// Alias of [`add_facts`](Self::add_facts) for iterator sources.
    pub fn add_all_facts<I>(&self, facts: I) -> Result<()>
    where
        I: IntoIterator<Item = Fact>,
    {
        self.add_facts(facts)
    }

    /// Insert a fact from inside a consequence.
    pub fn insert_fact(&self, fact: &Fact) -> Result<()> {
        self.add_fact(fact)
    }

    /// Invalidate a fact's selector, marking it modified.
    pub fn modify_fact(&self, fact: &Fact) -> Result<Selector> {
        self.inner.facts.borrow_mut().modify_fact(fact)
    }

    /// Invalidate a selector, marking its fact modified.
    pub fn modify_selector(&self, selector: Selector) -> Result<Selector> {
        self.inner.facts.borrow_mut().modify(selector)
    }

    /// Remove a fact from working memory.
    pub fn retract_fact(&self, fact: &Fact) -> Result<()> {
        self.inner.facts.borrow_mut().retract_fact(fact)
    }

    /// Remove the fact addressed by a selector from working memory.
    pub fn retract_selector(&self, selector: Selector) -> Result<()> {
        self.inner.facts.borrow_mut().retract(selector)
    }

    /// Register a lookup table from items and a key extractor.
    pub fn add_lookup<T, I, F>(&self, name: &str, items: I, key: F)
    where
        T: Any,
        I: IntoIterator<Item = T>,
        F: Fn(&T) -> LookupKey,
    {
        let entries = items
            .into_iter()
            .map(|item| {
                let k = key(&item);
                (k, Rc::new(item) as Rc<dyn Any>)
            })
            .collect();
        self.inner
            .lookups
            .borrow_mut()
            .insert(name.to_string(), LookupTable { entries });
    }

    /// Register a lookup table from an existing map.
    pub fn add_lookup_map<T: Any>(&self, name: &str, map: HashMap<LookupKey, T>) {
        let entries = map
            .into_iter()
            .map(|(k, item)| (k, Rc::new(item) as Rc<dyn Any>))
            .collect();
        self.inner
            .lookups
            .borrow_mut()
            .insert(name.to_string(), LookupTable { entries });
    }

    /// Look up an item by key in the table named after `T`'s concise type
    /// name.
    pub fn lookup<T: Any>(&self, key: impl Into<LookupKey>) -> Result<Rc<T>> {
        self.lookup_in(concise_type_name::<T>(), key)
    }

    /// Look up an item by key in a named table.
    pub fn lookup_in<T: Any>(&self, table: &str, key: impl Into<LookupKey>) -> Result<Rc<T>> {
        let key = key.into();
        let lookups = self.inner.lookups.borrow();
        let entry = lookups
            .get(table)
            .ok_or_else(|| EngineError::LookupTableMissing {
                table: table.to_string(),
            })?
            .entries
            .get(&key)
            .cloned()
            .ok_or_else(|| EngineError::LookupMissing {
                table: table.to_string(),
                key: key.to_string(),
            })?;
        entry
            .downcast::<T>()
            .map_err(|_| EngineError::LookupMissing {
                table: table.to_string(),
                key: key.to_string(),
            })
    }

    /// Emit an event attributed to the currently firing rule.
    pub fn emit_event(&self, category: EventCategory, group: &str, message: &str) {
        let rule_name = self
            .inner
            .current_rule
            .borrow()
            .clone()
            .unwrap_or_default();
        let event = RuleEvent {
            category,
            rule_name,
            group: group.to_string(),
            message: message.to_string(),
        };
        self.listener().event_created(&event);
        self.inner.results.borrow_mut().push_event(event);
    }

    /// Add to the session's affirmation total.
    pub fn affirm(&self, weight: f64) {
        self.inner.results.borrow_mut().add_affirmation(weight);
    }

    /// Add to the session's veto total.
    pub fn veto(&self, weight: f64) {
        self.inner.results.borrow_mut().add_veto(weight);
    }

    /// Store a scratch value shared across rules of this session.
    pub fn set_value(&self, key: &str, value: Value) {
        self.inner.results.borrow_mut().set_value(key, value);
    }

    /// Read a scratch value.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.inner.results.borrow().get_value(key).cloned()
    }

    /// Replace the session listener.
    pub fn set_listener(&self, listener: Rc<dyn EvaluationListener>) {
        *self.inner.listener.borrow_mut() = listener;
    }

    /// Swallow session-control errors; results still record everything.
    pub fn suppress_exceptions(&self) {
        self.inner.config.borrow_mut().suppress_exceptions = true;
    }

    /// Raise [`EngineError::ViolationsExist`] when the session ends with
    /// violations.
    pub fn throw_on_violations(&self, enabled: bool) {
        self.inner.config.borrow_mut().throw_on_violations = enabled;
    }

    /// Raise [`EngineError::NoRulesEvaluated`] when the session evaluated
    /// nothing.
    pub fn throw_on_no_rules(&self, enabled: bool) {
        self.inner.config.borrow_mut().throw_on_no_rules = enabled;
    }

    /// Set the evaluation budget.
    pub fn set_max_evaluations(&self, max: u64) {
        self.inner.config.borrow_mut().max_evaluations = max;
    }

    /// Set the wall-clock budget.
    pub fn set_max_duration(&self, max: Duration) {
        self.inner.config.borrow_mut().max_duration = max;
    }

    /// Set the violation budget.
    pub fn set_max_violations(&self, max: Option<u64>) {
        self.inner.config.borrow_mut().max_violations = max;
    }

    /// Restrict the session to rules under the given namespace prefixes.
    pub fn set_namespace_filter(&self, prefixes: Vec<String>) {
        self.inner.config.borrow_mut().namespace_filter = prefixes;
    }

    /// Snapshot of the session results so far.
    pub fn results(&self) -> EvaluationResults {
        self.inner.results.borrow().clone()
    }

    /// Number of live facts in the session's working memory.
    pub fn fact_count(&self) -> usize {
        self.inner.facts.borrow().fact_count()
    }

    pub(crate) fn listener(&self) -> Rc<dyn EvaluationListener> {
        self.inner.listener.borrow().clone()
    }

    pub(crate) fn config(&self) -> SessionConfig {
        self.inner.config.borrow().clone()
    }

    pub(crate) fn with_space<R>(&self, f: impl FnOnce(&FactSpace) -> R) -> R {
        f(&self.inner.facts.borrow())
    }

    pub(crate) fn with_results_mut<R>(&self, f: impl FnOnce(&mut EvaluationResults) -> R) -> R {
        f(&mut self.inner.results.borrow_mut())
    }

    pub(crate) fn mark_started(&self) -> Result<()> {
        if self.inner.started.get() {
            return Err(EngineError::ContextExhausted);
        }
        self.inner.started.set(true);
        Ok(())
    }

    pub(crate) fn space_version(&self) -> u64 {
        self.inner.facts.borrow().version()
    }

    pub(crate) fn violation_count(&self) -> u64 {
        self.inner.results.borrow().violation_count()
    }
}

impl std::fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("facts", &self.inner.facts.borrow().fact_count())
            .field("started", &self.inner.started.get())
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<Vec<EvaluationContext>> = RefCell::new(Vec::new());
}

/// RAII binding of a context (and the firing rule) into the thread-local
/// slot for the duration of one fire step.
///
/// The binding is a stack, so a consequence that starts a nested session
/// cannot leak its context into the outer one, and the pop on drop runs on
/// every exit path including unwinding out of user code.
pub(crate) struct SessionGuard {
    ctx: EvaluationContext,
}

impl SessionGuard {
    pub(crate) fn bind(ctx: &EvaluationContext, rule_name: &str) -> Self {
        *ctx.inner.current_rule.borrow_mut() = Some(rule_name.to_string());
        ctx.inner.in_fire.set(true);
        CURRENT.with(|stack| stack.borrow_mut().push(ctx.clone()));
        Self { ctx: ctx.clone() }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
        self.ctx.inner.in_fire.set(false);
        *self.ctx.inner.current_rule.borrow_mut() = None;
    }
}

/// The context bound to the currently executing fire step.
///
/// This is the sanctioned channel through which consequences insert,
/// modify, and retract facts, emit events, and adjust the score.
///
/// # Panics
///
/// Panics when no fire step is executing on this thread.
pub fn current() -> EvaluationContext {
    try_current().expect("no evaluation session is bound to this thread")
}

/// The context bound to the currently executing fire step, if any.
pub fn try_current() -> Option<EvaluationContext> {
    CURRENT.with(|stack| stack.borrow().last().cloned())
}

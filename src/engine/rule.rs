use std::any::Any;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};

use crate::engine::fact::{Fact, TypeMatch};
use crate::types::{EventCategory, Value};

/// Boxed condition predicate over a bound fact tuple
pub type Predicate = Box<dyn Fn(&[Fact]) -> bool + Send + Sync>;

/// Boxed consequence over a bound fact tuple
pub type Consequence = Box<dyn Fn(&[Fact]) + Send + Sync>;

/// Boxed extractor selecting the fact a fire must mark modified
pub type FactExtractor = Box<dyn Fn(&[Fact]) -> Option<Fact> + Send + Sync>;

/// Boxed cascade action producing facts to insert instead of a consequence
pub type CascadeAction = Box<dyn Fn(&[Fact]) -> Vec<Fact> + Send + Sync>;

/// Boxed extractor producing one positional event template parameter
pub type ParamExtractor = Box<dyn Fn(&[Fact]) -> Option<Value> + Send + Sync>;

/// Owned child value produced by a foreach extraction
pub type ChildValue = Box<dyn Any>;

/// A message template rendered against the bound facts when a rule fires.
///
/// Positional markers `{0}`, `{1}`, … are replaced with the rendered results
/// of the registered parameter extractors; an extractor returning `None`
/// renders as the literal string `null`. Rendering is locale-independent.
pub struct EventTemplate {
    category: EventCategory,
    group: String,
    template: String,
    params: Vec<ParamExtractor>,
}

impl EventTemplate {
    /// Create a template with no parameters.
    pub fn new(category: EventCategory, group: &str, template: &str) -> Self {
        Self {
            category,
            group: group.to_string(),
            template: template.to_string(),
            params: Vec::new(),
        }
    }

    /// Append a positional parameter extractor.
    pub fn with_param<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&[Fact]) -> Option<Value> + Send + Sync + 'static,
    {
        self.params.push(Box::new(extractor));
        self
    }

    /// The event category this template produces.
    pub fn category(&self) -> EventCategory {
        self.category
    }

    /// The event group this template produces.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Render the message against a bound fact tuple.
    pub fn render(&self, facts: &[Fact]) -> String {
        let mut message = self.template.clone();
        for (position, extractor) in self.params.iter().enumerate() {
            let rendered = match extractor(facts) {
                Some(value) => value.render(),
                None => "null".to_string(),
            };
            message = message.replace(&format!("{{{}}}", position), &rendered);
        }
        message
    }
}

/// Build a typed positional parameter extractor for an [`EventTemplate`].
///
/// Reads the fact at `position` as a `T` and applies `f`; a missing or
/// differently typed fact yields `None`, which renders as `null`.
pub fn fact_param<T, V, F>(position: usize, f: F) -> ParamExtractor
where
    T: Any,
    V: Into<Value>,
    F: Fn(&T) -> V + Send + Sync + 'static,
{
    Box::new(move |facts: &[Fact]| facts.get(position)?.with(|value: &T| f(value).into()))
}

struct ForeachBody {
    extract: Box<dyn Fn(&Fact) -> Vec<ChildValue> + Send + Sync>,
    conditions: Vec<Box<dyn Fn(&dyn Any) -> bool + Send + Sync>>,
    consequence: Option<Box<dyn Fn(&dyn Any, &Fact) + Send + Sync>>,
}

impl ForeachBody {
    /// Children kept for firing: each child at most once, and only when
    /// every per-child condition holds.
    fn matching_children(&self, parent: &Fact) -> Vec<ChildValue> {
        (self.extract)(parent)
            .into_iter()
            .filter(|child| {
                self.conditions
                    .iter()
                    .all(|condition| condition(child.as_ref()))
            })
            .collect()
    }
}

/// A rule/fact-tuple binding whose conditions held and which is eligible to
/// fire.
pub struct Activation {
    pub(crate) children: Vec<ChildValue>,
}

impl Activation {
    fn empty() -> Self {
        Self {
            children: Vec::new(),
        }
    }
}

/// The compiled form of a user rule, erased over arity.
///
/// Conditions and consequences are boxed capabilities over the bound fact
/// tuple; the engine never inspects them. Use the typed constructors
/// ([`Rule::unary`] through [`Rule::quaternary`], [`Rule::foreach`]) to
/// author rules, or [`Rule::with_params`] for wildcard parameter tuples.
pub struct Rule {
    namespace: String,
    name: String,
    param_types: Vec<TypeMatch>,
    salience: i32,
    mutex: Option<String>,
    date_effective: Option<DateTime<Utc>>,
    date_expires: Option<DateTime<Utc>>,
    fires_once: bool,
    negated: bool,
    conditions: Vec<Predicate>,
    consequence: Option<Consequence>,
    modify_extractor: Option<FactExtractor>,
    cascade: Option<CascadeAction>,
    foreach: Option<ForeachBody>,
    events: Vec<EventTemplate>,
}

impl Rule {
    /// Start a rule over one fact of type `T`.
    pub fn unary<T: Any>(namespace: &str, name: &str) -> RuleBuilder<(T,)> {
        RuleBuilder::new(namespace, name, vec![TypeMatch::of::<T>()])
    }

    /// Start a rule over a pair of facts.
    pub fn binary<A: Any, B: Any>(namespace: &str, name: &str) -> RuleBuilder<(A, B)> {
        RuleBuilder::new(namespace, name, vec![TypeMatch::of::<A>(), TypeMatch::of::<B>()])
    }

    /// Start a rule over three facts.
    pub fn ternary<A: Any, B: Any, C: Any>(namespace: &str, name: &str) -> RuleBuilder<(A, B, C)> {
        RuleBuilder::new(
            namespace,
            name,
            vec![TypeMatch::of::<A>(), TypeMatch::of::<B>(), TypeMatch::of::<C>()],
        )
    }

    /// Start a rule over four facts.
    pub fn quaternary<A: Any, B: Any, C: Any, D: Any>(
        namespace: &str,
        name: &str,
    ) -> RuleBuilder<(A, B, C, D)> {
        RuleBuilder::new(
            namespace,
            name,
            vec![
                TypeMatch::of::<A>(),
                TypeMatch::of::<B>(),
                TypeMatch::of::<C>(),
                TypeMatch::of::<D>(),
            ],
        )
    }

    /// Start a rule over an explicit parameter tuple, including
    /// [`TypeMatch::Any`] wildcard positions.
    ///
    /// Conditions and consequences for wildcard tuples are added through the
    /// raw `[Fact]`-level builder methods.
    pub fn with_params(namespace: &str, name: &str, params: Vec<TypeMatch>) -> RuleBuilder<()> {
        RuleBuilder::new(namespace, name, params)
    }

    /// Start a foreach rule: an arity-1 rule whose body iterates children
    /// extracted from the parent fact.
    ///
    /// Children never enter the fact space and do not participate in tuple
    /// matching.
    pub fn foreach<T, C, I, F>(namespace: &str, name: &str, extract: F) -> ForeachRuleBuilder<T, C>
    where
        T: Any,
        C: Any,
        I: IntoIterator<Item = C>,
        F: Fn(&T) -> I + Send + Sync + 'static,
    {
        ForeachRuleBuilder {
            builder: RuleBuilder::new(namespace, name, vec![TypeMatch::of::<T>()]),
            extract: Box::new(move |parent: &Fact| {
                parent
                    .with(|value: &T| {
                        extract(value)
                            .into_iter()
                            .map(|child| Box::new(child) as ChildValue)
                            .collect()
                    })
                    .unwrap_or_default()
            }),
            conditions: Vec::new(),
            consequence: None,
            _marker: PhantomData,
        }
    }

    /// The rule's namespace, used for session filtering.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The rule's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The namespace-qualified rule name used in diagnostics.
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.namespace, self.name)
    }

    /// Number of facts this rule binds.
    pub fn arity(&self) -> usize {
        self.param_types.len()
    }

    /// The declared parameter types, in binding order.
    pub fn param_types(&self) -> &[TypeMatch] {
        &self.param_types
    }

    /// Firing priority; lower fires earlier.
    pub fn salience(&self) -> i32 {
        self.salience
    }

    /// The mutex group this rule belongs to, if any.
    pub fn mutex(&self) -> Option<&str> {
        self.mutex.as_deref()
    }

    /// Whether each matched tuple may fire this rule at most once per
    /// session.
    pub fn fires_once(&self) -> bool {
        self.fires_once
    }

    /// Whether the rule fires when its conditions do not all hold.
    pub fn negated(&self) -> bool {
        self.negated
    }

    /// Whether the rule is inside its effective window at `timestamp`.
    pub fn is_active_at(&self, timestamp: DateTime<Utc>) -> bool {
        if let Some(effective) = self.date_effective {
            if timestamp < effective {
                return false;
            }
        }
        if let Some(expires) = self.date_expires {
            if timestamp >= expires {
                return false;
            }
        }
        true
    }

    /// Evaluate the rule against an offered tuple.
    ///
    /// Cascade rules always activate; foreach rules activate when at least
    /// one child survives the per-child conditions; plain rules activate
    /// when the conjunction of conditions holds (inverted for `negated`).
    pub fn evaluate(&self, facts: &[Fact]) -> Option<Activation> {
        if self.cascade.is_some() {
            return Some(Activation::empty());
        }
        if let Some(body) = &self.foreach {
            let children = body.matching_children(&facts[0]);
            if children.is_empty() {
                return None;
            }
            return Some(Activation { children });
        }
        let holds = self.conditions.iter().all(|condition| condition(facts));
        if holds != self.negated {
            Some(Activation::empty())
        } else {
            None
        }
    }

    /// Run the consequence for an activation.
    pub(crate) fn fire(&self, facts: &[Fact], activation: &Activation) {
        if let Some(body) = &self.foreach {
            if let Some(consequence) = &body.consequence {
                for child in &activation.children {
                    consequence(child.as_ref(), &facts[0]);
                }
            }
            return;
        }
        if let Some(consequence) = &self.consequence {
            consequence(facts);
        }
    }

    pub(crate) fn cascade_action(&self) -> Option<&CascadeAction> {
        self.cascade.as_ref()
    }

    pub(crate) fn modify_extractor(&self) -> Option<&FactExtractor> {
        self.modify_extractor.as_ref()
    }

    pub(crate) fn event_templates(&self) -> &[EventTemplate] {
        &self.events
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("arity", &self.arity())
            .field("salience", &self.salience)
            .field("mutex", &self.mutex)
            .field("fires_once", &self.fires_once)
            .field("negated", &self.negated)
            .field("conditions", &self.conditions.len())
            .finish()
    }
}

/// Builder for compiled rules; `Args` is the typed fact tuple.
pub struct RuleBuilder<Args> {
    rule: Rule,
    _args: PhantomData<fn(Args)>,
}

impl<Args> RuleBuilder<Args> {
    fn new(namespace: &str, name: &str, params: Vec<TypeMatch>) -> Self {
        Self {
            rule: Rule {
                namespace: namespace.to_string(),
                name: name.to_string(),
                param_types: params,
                salience: 0,
                mutex: None,
                date_effective: None,
                date_expires: None,
                fires_once: false,
                negated: false,
                conditions: Vec::new(),
                consequence: None,
                modify_extractor: None,
                cascade: None,
                foreach: None,
                events: Vec::new(),
            },
            _args: PhantomData,
        }
    }

    /// Set the firing priority; lower fires earlier.
    pub fn with_salience(mut self, salience: i32) -> Self {
        self.rule.salience = salience;
        self
    }

    /// Place the rule in a mutex group; at most one rule of a group fires
    /// per planning cycle.
    pub fn with_mutex(mut self, group: &str) -> Self {
        self.rule.mutex = Some(group.to_string());
        self
    }

    /// The rule is inactive before this instant.
    pub fn with_date_effective(mut self, effective: DateTime<Utc>) -> Self {
        self.rule.date_effective = Some(effective);
        self
    }

    /// The rule is inactive from this instant on.
    pub fn with_date_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.rule.date_expires = Some(expires);
        self
    }

    /// Each matched tuple fires this rule at most once per session.
    pub fn fires_once(mut self) -> Self {
        self.rule.fires_once = true;
        self
    }

    /// Invert activation: the rule fires when its conditions do not all
    /// hold.
    pub fn otherwise(mut self) -> Self {
        self.rule.negated = true;
        self
    }

    /// Emit a templated event every time the rule fires.
    pub fn emits(mut self, template: EventTemplate) -> Self {
        self.rule.events.push(template);
        self
    }

    /// Add a condition over the erased fact tuple.
    pub fn when_raw<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&[Fact]) -> bool + Send + Sync + 'static,
    {
        self.rule.conditions.push(Box::new(predicate));
        self
    }

    /// Set the consequence over the erased fact tuple.
    pub fn then_raw<F>(mut self, action: F) -> Self
    where
        F: Fn(&[Fact]) + Send + Sync + 'static,
    {
        self.rule.consequence = Some(Box::new(action));
        self
    }

    /// After firing, treat the fact at `position` as modified, forcing
    /// re-evaluation.
    pub fn modifies_position(mut self, position: usize) -> Self {
        self.rule.modify_extractor = Some(Box::new(move |facts: &[Fact]| {
            facts.get(position).cloned()
        }));
        self
    }

    /// After firing, treat the extracted fact as modified.
    pub fn modifies_with<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&[Fact]) -> Option<Fact> + Send + Sync + 'static,
    {
        self.rule.modify_extractor = Some(Box::new(extractor));
        self
    }

    /// Replace the consequence with a cascade: the rule activates
    /// unconditionally and its fire inserts the returned facts.
    pub fn cascades_raw<F, I>(mut self, action: F) -> Self
    where
        F: Fn(&[Fact]) -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Fact>,
    {
        self.rule.cascade = Some(Box::new(move |facts: &[Fact]| {
            action(facts).into_iter().collect()
        }));
        self
    }

    /// Finish the rule.
    pub fn build(self) -> Rule {
        self.rule
    }
}

macro_rules! rule_builder_impls {
    ($( [$(($T:ident, $var:ident, $idx:tt)),+] ),+ $(,)?) => { $(
        impl<$($T: Any),+> RuleBuilder<($($T,)+)> {
            /// Add a typed condition over the bound facts.
            ///
            /// A tuple whose facts do not downcast fails the condition.
            pub fn when<F>(self, predicate: F) -> Self
            where
                F: Fn($(&$T),+) -> bool + Send + Sync + 'static,
            {
                self.when_raw(move |facts: &[Fact]| {
                    $(
                        let $var = match facts[$idx].downcast_ref::<$T>() {
                            Some(value) => value,
                            None => return false,
                        };
                    )+
                    predicate($(&*$var),+)
                })
            }

            /// Set a typed consequence over the bound facts.
            pub fn then<F>(self, action: F) -> Self
            where
                F: Fn($(&$T),+) + Send + Sync + 'static,
            {
                self.then_raw(move |facts: &[Fact]| {
                    $(
                        let $var = match facts[$idx].downcast_ref::<$T>() {
                            Some(value) => value,
                            None => return,
                        };
                    )+
                    action($(&*$var),+)
                })
            }

            /// Replace the consequence with a typed cascade action.
            pub fn cascades<F, I>(self, action: F) -> Self
            where
                F: Fn($(&$T),+) -> I + Send + Sync + 'static,
                I: IntoIterator<Item = Fact>,
            {
                self.cascades_raw(move |facts: &[Fact]| {
                    $(
                        let $var = match facts[$idx].downcast_ref::<$T>() {
                            Some(value) => value,
                            None => return Vec::new(),
                        };
                    )+
                    action($(&*$var),+).into_iter().collect::<Vec<Fact>>()
                })
            }
        }
    )+ };
}

rule_builder_impls! {
    [(T1, a, 0)],
    [(T1, a, 0), (T2, b, 1)],
    [(T1, a, 0), (T2, b, 1), (T3, c, 2)],
    [(T1, a, 0), (T2, b, 1), (T3, c, 2), (T4, d, 3)],
}

impl<T1: Any> RuleBuilder<(T1,)> {
    /// Set a consequence with mutable access to the bound fact.
    pub fn then_mut<F>(self, action: F) -> Self
    where
        F: Fn(&mut T1) + Send + Sync + 'static,
    {
        self.then_raw(move |facts: &[Fact]| {
            if let Some(mut value) = facts[0].downcast_mut::<T1>() {
                action(&mut *value);
            }
        })
    }
}

/// Builder for foreach rules over a parent of type `T` with children of
/// type `C`.
pub struct ForeachRuleBuilder<T, C> {
    builder: RuleBuilder<(T,)>,
    extract: Box<dyn Fn(&Fact) -> Vec<ChildValue> + Send + Sync>,
    conditions: Vec<Box<dyn Fn(&dyn Any) -> bool + Send + Sync>>,
    consequence: Option<Box<dyn Fn(&dyn Any, &Fact) + Send + Sync>>,
    _marker: PhantomData<fn(T, C)>,
}

impl<T: Any, C: Any> ForeachRuleBuilder<T, C> {
    /// Add a per-child condition; a child is kept only when every per-child
    /// condition holds, and each kept child appears at most once.
    pub fn where_each<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.conditions.push(Box::new(move |child: &dyn Any| {
            child.downcast_ref::<C>().map(|c| predicate(c)).unwrap_or(false)
        }));
        self
    }

    /// Set the per-child consequence, run once per kept child.
    pub fn then_each<F>(mut self, action: F) -> Self
    where
        F: Fn(&C, &T) + Send + Sync + 'static,
    {
        self.consequence = Some(Box::new(move |child: &dyn Any, parent: &Fact| {
            if let Some(c) = child.downcast_ref::<C>() {
                if let Some(p) = parent.downcast_ref::<T>() {
                    action(c, &*p);
                }
            }
        }));
        self
    }

    /// Set the firing priority; lower fires earlier.
    pub fn with_salience(mut self, salience: i32) -> Self {
        self.builder = self.builder.with_salience(salience);
        self
    }

    /// Place the rule in a mutex group.
    pub fn with_mutex(mut self, group: &str) -> Self {
        self.builder = self.builder.with_mutex(group);
        self
    }

    /// The rule is inactive before this instant.
    pub fn with_date_effective(mut self, effective: DateTime<Utc>) -> Self {
        self.builder = self.builder.with_date_effective(effective);
        self
    }

    /// The rule is inactive from this instant on.
    pub fn with_date_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.builder = self.builder.with_date_expires(expires);
        self
    }

    /// Each matched tuple fires this rule at most once per session.
    pub fn fires_once(mut self) -> Self {
        self.builder = self.builder.fires_once();
        self
    }

    /// Emit a templated event every time the rule fires.
    pub fn emits(mut self, template: EventTemplate) -> Self {
        self.builder = self.builder.emits(template);
        self
    }

    /// Finish the rule.
    pub fn build(self) -> Rule {
        let mut rule = self.builder.build();
        rule.foreach = Some(ForeachBody {
            extract: self.extract,
            conditions: self.conditions,
            consequence: self.consequence,
        });
        rule
    }
}

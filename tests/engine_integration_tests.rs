use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use rulewright::context;
use rulewright::{
    fact_param, EngineError, EvaluationListener, EventCategory, EventTemplate, Fact, Rule,
    RuleSet, TypeMatch,
};

#[derive(Debug)]
struct Person {
    name: String,
    age: i64,
    status: String,
}

impl Person {
    fn new(name: &str, age: i64) -> Self {
        Self {
            name: name.to_string(),
            age,
            status: "new".to_string(),
        }
    }
}

#[derive(Debug)]
struct Order {
    items: Vec<Item>,
}

#[derive(Debug, Clone)]
struct Item {
    product: String,
    quantity: i64,
}

#[test]
fn adult_check_fires_without_events() {
    let mut rules = RuleSet::new("adult");
    rules
        .add_rule(
            Rule::unary::<Person>("checks", "age-check")
                .when(|p: &Person| p.age >= 18)
                .then(|_: &Person| {})
                .build(),
        )
        .unwrap();

    let ctx = rules.evaluation_context();
    ctx.add_fact(&Fact::new(Person::new("Alice", 25))).unwrap();
    let results = rules.evaluate(&ctx).unwrap();

    assert_eq!(results.total_fired(), 1);
    assert!(results.events().is_empty());
    assert_eq!(results.fire_count("age-check"), 1);
}

#[test]
fn salience_orders_firing_lowest_first() {
    fn build(first_salience: i32, second_salience: i32) -> (RuleSet, Arc<Mutex<Vec<String>>>) {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut rules = RuleSet::new("salience");
        for (name, salience) in [("A", first_salience), ("B", second_salience)] {
            let log = Arc::clone(&order);
            let name = name.to_string();
            rules
                .add_rule(
                    Rule::unary::<Person>("checks", &name)
                        .with_salience(salience)
                        .then_raw(move |_| log.lock().unwrap().push(name.clone()))
                        .build(),
                )
                .unwrap();
        }
        (rules, order)
    }

    let (rules, order) = build(100, 900);
    let ctx = rules.evaluation_context();
    ctx.add_fact(&Fact::new(Person::new("Alice", 25))).unwrap();
    rules.evaluate(&ctx).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["A", "B"]);

    let (rules, order) = build(900, 100);
    let ctx = rules.evaluation_context();
    ctx.add_fact(&Fact::new(Person::new("Alice", 25))).unwrap();
    rules.evaluate(&ctx).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["B", "A"]);
}

#[test]
fn mutex_group_admits_only_lowest_salience_winner() {
    let mut rules = RuleSet::new("mutex");
    rules
        .add_rule(
            Rule::unary::<Person>("checks", "A")
                .with_salience(100)
                .with_mutex("g")
                .then(|_: &Person| {})
                .build(),
        )
        .unwrap();
    rules
        .add_rule(
            Rule::unary::<Person>("checks", "B")
                .with_salience(200)
                .with_mutex("g")
                .then(|_: &Person| {})
                .build(),
        )
        .unwrap();

    let ctx = rules.evaluation_context();
    ctx.add_fact(&Fact::new(Person::new("Alice", 25))).unwrap();
    let results = rules.evaluate(&ctx).unwrap();

    assert_eq!(results.fire_count("A"), 1);
    assert_eq!(results.fire_count("B"), 0);
    assert_eq!(results.total_fired(), 1);
    assert_eq!(
        results.mutex_winners().get("g").map(String::as_str),
        Some("A")
    );
}

#[test]
fn forward_chaining_reevaluates_after_modification() {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&recorded);

    let mut rules = RuleSet::new("chain");
    rules
        .add_rule(
            Rule::unary::<Person>("flow", "promote")
                .with_salience(100)
                .when(|p: &Person| p.status == "new")
                .then_mut(|p: &mut Person| p.status = "processed".to_string())
                .modifies_position(0)
                .build(),
        )
        .unwrap();
    rules
        .add_rule(
            Rule::unary::<Person>("flow", "record")
                .with_salience(200)
                .when(|p: &Person| p.status == "processed")
                .then(move |p: &Person| log.lock().unwrap().push(p.name.clone()))
                .build(),
        )
        .unwrap();

    let person = Fact::new(Person::new("Carol", 30));
    let ctx = rules.evaluation_context();
    ctx.add_fact(&person).unwrap();
    let results = rules.evaluate(&ctx).unwrap();

    assert_eq!(results.fire_count("promote"), 1);
    assert_eq!(results.fire_count("record"), 1);
    assert_eq!(*recorded.lock().unwrap(), vec!["Carol"]);
    assert_eq!(
        person.with(|p: &Person| p.status.clone()),
        Some("processed".to_string())
    );
}

#[test]
fn fire_once_rule_survives_its_own_modification() {
    let mut rules = RuleSet::new("once");
    rules
        .add_rule(
            Rule::unary::<Person>("flow", "touch")
                .fires_once()
                .then_mut(|p: &mut Person| p.age += 1)
                .modifies_position(0)
                .build(),
        )
        .unwrap();

    let person = Fact::new(Person::new("Dave", 40));
    let ctx = rules.evaluation_context();
    ctx.add_fact(&person).unwrap();
    let results = rules.evaluate(&ctx).unwrap();

    assert_eq!(results.fire_count("touch"), 1);
    assert_eq!(person.with(|p: &Person| p.age), Some(41));
}

#[test]
fn foreach_rule_filters_children() {
    let recorded: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let log = Arc::clone(&recorded);

    let mut rules = RuleSet::new("foreach");
    rules
        .add_rule(
            Rule::foreach("orders", "in-stock", |order: &Order| order.items.clone())
                .where_each(|item: &Item| item.quantity > 0)
                .then_each(move |item: &Item, _order: &Order| {
                    log.lock().unwrap().insert(item.product.clone());
                })
                .build(),
        )
        .unwrap();

    let order = Order {
        items: vec![
            Item {
                product: "Widget".to_string(),
                quantity: 5,
            },
            Item {
                product: "Gadget".to_string(),
                quantity: 0,
            },
            Item {
                product: "Doohickey".to_string(),
                quantity: 3,
            },
        ],
    };
    let ctx = rules.evaluation_context();
    ctx.add_fact(&Fact::new(order)).unwrap();
    let results = rules.evaluate(&ctx).unwrap();

    assert_eq!(results.total_fired(), 1);
    let expected: HashSet<String> = ["Widget", "Doohickey"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(*recorded.lock().unwrap(), expected);
}

#[test]
fn decide_compares_score_against_threshold() {
    let mut rules = RuleSet::new("scores");
    rules
        .add_rule(
            Rule::unary::<Person>("scores", "approve")
                .then(|_: &Person| context::current().affirm(10.0))
                .build(),
        )
        .unwrap();
    rules
        .add_rule(
            Rule::unary::<Person>("scores", "doubt")
                .then(|_: &Person| context::current().veto(3.0))
                .build(),
        )
        .unwrap();

    assert!(rules
        .decide(5.0, [Fact::new(Person::new("Eve", 30))])
        .unwrap());
    assert!(!rules
        .decide(15.0, [Fact::new(Person::new("Eve", 30))])
        .unwrap());
    assert!(rules
        .decide_default([Fact::new(Person::new("Eve", 30))])
        .unwrap());
}

#[test]
fn wildcard_rules_match_any_fact_type() {
    let counts = Arc::new(Mutex::new(Vec::new()));
    let mut rules = RuleSet::new("poly");

    let log = Arc::clone(&counts);
    rules
        .add_rule(
            Rule::with_params("poly", "any-fact", vec![TypeMatch::Any])
                .then_raw(move |_| log.lock().unwrap().push("any"))
                .build(),
        )
        .unwrap();
    let log = Arc::clone(&counts);
    rules
        .add_rule(
            Rule::unary::<Person>("poly", "person-only")
                .then(move |_: &Person| log.lock().unwrap().push("person"))
                .build(),
        )
        .unwrap();

    let ctx = rules.evaluation_context();
    ctx.add_fact(&Fact::new(Person::new("Frank", 20))).unwrap();
    let results = rules.evaluate(&ctx).unwrap();

    assert_eq!(results.total_fired(), 2);
    let fired = counts.lock().unwrap();
    assert!(fired.contains(&"any"));
    assert!(fired.contains(&"person"));
}

#[test]
fn binary_rule_crosses_all_tuples() {
    let mut rules = RuleSet::new("pairs");
    rules
        .add_rule(
            Rule::binary::<Person, Person>("pairs", "meet")
                .when(|a: &Person, b: &Person| a.age <= b.age)
                .then(|_: &Person, _: &Person| {})
                .build(),
        )
        .unwrap();

    let ctx = rules.evaluation_context();
    ctx.add_fact(&Fact::new(Person::new("Gail", 20))).unwrap();
    ctx.add_fact(&Fact::new(Person::new("Hank", 30))).unwrap();
    let results = rules.evaluate(&ctx).unwrap();

    // (Gail,Gail), (Gail,Hank), (Hank,Hank) satisfy the condition;
    // (Hank,Gail) does not.
    assert_eq!(results.total_evaluated(), 4);
    assert_eq!(results.total_fired(), 3);
}

#[test]
fn identical_violations_deduplicate_but_count() {
    let mut rules = RuleSet::new("dedup");
    rules
        .add_rule(
            Rule::unary::<Person>("checks", "complain")
                .with_salience(50)
                .emits(
                    EventTemplate::new(EventCategory::Violation, "age", "person {0} flagged")
                        .with_param(fact_param(0, |p: &Person| p.name.clone())),
                )
                .then(|_: &Person| {})
                .build(),
        )
        .unwrap();
    rules
        .add_rule(
            Rule::unary::<Person>("checks", "churn")
                .with_salience(100)
                .fires_once()
                .then_mut(|p: &mut Person| p.age += 1)
                .modifies_position(0)
                .build(),
        )
        .unwrap();

    let ctx = rules.evaluation_context();
    ctx.add_fact(&Fact::new(Person::new("Ivy", 25))).unwrap();
    let results = rules.evaluate(&ctx).unwrap();

    // "complain" fires in both planning passes with a structurally
    // identical violation.
    assert_eq!(results.fire_count("complain"), 2);
    assert_eq!(results.events().len(), 1);
    assert_eq!(results.violation_count(), 2);
    assert_eq!(results.events()[0].message, "person Ivy flagged");
    assert_eq!(results.events()[0].rule_name, "complain");
}

#[test]
fn throw_on_violations_raises_with_events() {
    let mut rules = RuleSet::new("strict");
    rules
        .add_rule(
            Rule::unary::<Person>("checks", "too-young")
                .when(|p: &Person| p.age < 18)
                .emits(EventTemplate::new(
                    EventCategory::Violation,
                    "age",
                    "under age",
                ))
                .build(),
        )
        .unwrap();

    let ctx = rules.evaluation_context();
    ctx.throw_on_violations(true);
    ctx.add_fact(&Fact::new(Person::new("Kid", 10))).unwrap();

    match rules.evaluate(&ctx) {
        Err(EngineError::ViolationsExist { violations }) => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].message, "under age");
        }
        other => panic!("expected ViolationsExist, got {:?}", other.map(|r| r.total_fired())),
    }
    // Partial results stay observable through the context.
    assert_eq!(ctx.results().violation_count(), 1);
}

#[test]
fn try_validate_suppresses_and_returns_violations() {
    let mut rules = RuleSet::new("validate");
    rules
        .add_rule(
            Rule::unary::<Person>("checks", "too-young")
                .when(|p: &Person| p.age < 18)
                .emits(EventTemplate::new(
                    EventCategory::Violation,
                    "age",
                    "under age",
                ))
                .build(),
        )
        .unwrap();

    let (ok, violations) = rules
        .try_validate([Fact::new(Person::new("Kid", 10))])
        .unwrap();
    assert!(!ok);
    assert_eq!(violations.len(), 1);

    let (ok, violations) = rules
        .try_validate([Fact::new(Person::new("Adult", 40))])
        .unwrap();
    assert!(ok);
    assert!(violations.is_empty());
}

#[test]
fn throw_on_no_rules_raises_when_nothing_evaluated() {
    let rules = RuleSet::new("empty");
    let ctx = rules.evaluation_context();
    ctx.throw_on_no_rules(true);
    ctx.add_fact(&Fact::new(Person::new("Lone", 1))).unwrap();

    assert!(matches!(
        rules.evaluate(&ctx),
        Err(EngineError::NoRulesEvaluated)
    ));
}

#[test]
fn empty_fact_space_returns_empty_results() {
    let mut rules = RuleSet::new("idle");
    rules
        .add_rule(Rule::unary::<Person>("ns", "r").build())
        .unwrap();

    let ctx = rules.evaluation_context();
    let results = rules.evaluate(&ctx).unwrap();
    assert_eq!(results.total_evaluated(), 0);
    assert_eq!(results.total_fired(), 0);
}

#[test]
fn runaway_session_exhausts_evaluation_budget() {
    let mut rules = RuleSet::new("runaway");
    rules
        .add_rule(
            Rule::unary::<Person>("ns", "spin")
                .then_mut(|p: &mut Person| p.age += 1)
                .modifies_position(0)
                .build(),
        )
        .unwrap();

    let ctx = rules.evaluation_context();
    ctx.set_max_evaluations(10);
    ctx.add_fact(&Fact::new(Person::new("Mo", 0))).unwrap();

    assert!(matches!(
        rules.evaluate(&ctx),
        Err(EngineError::EvaluationExhausted { .. })
    ));
    // Results were finalized before the error was raised.
    assert!(ctx.results().completed().is_some());

    // The same runaway session with suppression reports through results.
    let mut rules = RuleSet::new("runaway2");
    rules
        .add_rule(
            Rule::unary::<Person>("ns", "spin")
                .then_mut(|p: &mut Person| p.age += 1)
                .modifies_position(0)
                .build(),
        )
        .unwrap();
    let ctx = rules.evaluation_context();
    ctx.set_max_evaluations(10);
    ctx.suppress_exceptions();
    ctx.add_fact(&Fact::new(Person::new("Mo", 0))).unwrap();
    assert!(rules.evaluate(&ctx).is_ok());
}

#[test]
fn violation_budget_short_circuits_cleanly() {
    let mut rules = RuleSet::new("budget");
    rules
        .add_rule(
            Rule::unary::<Person>("ns", "flag-and-churn")
                .emits(EventTemplate::new(EventCategory::Violation, "g", "flagged"))
                .then_mut(|p: &mut Person| p.age += 1)
                .modifies_position(0)
                .build(),
        )
        .unwrap();

    let ctx = rules.evaluation_context();
    ctx.set_max_violations(Some(3));
    ctx.add_fact(&Fact::new(Person::new("Nia", 0))).unwrap();

    let results = rules.evaluate(&ctx).unwrap();
    assert_eq!(results.violation_count(), 3);
}

#[test]
fn cascade_inserts_facts_and_forces_replan() {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&recorded);

    let mut rules = RuleSet::new("cascade");
    rules
        .add_rule(
            Rule::unary::<Person>("flow", "spawn-order")
                .fires_once()
                .cascades(|_: &Person| {
                    vec![Fact::new(Order {
                        items: vec![Item {
                            product: "Widget".to_string(),
                            quantity: 1,
                        }],
                    })]
                })
                .build(),
        )
        .unwrap();
    rules
        .add_rule(
            Rule::unary::<Order>("flow", "see-order")
                .then(move |order: &Order| {
                    log.lock().unwrap().push(order.items.len());
                })
                .build(),
        )
        .unwrap();

    let ctx = rules.evaluation_context();
    ctx.add_fact(&Fact::new(Person::new("Ola", 30))).unwrap();
    let results = rules.evaluate(&ctx).unwrap();

    assert_eq!(results.fire_count("spawn-order"), 1);
    assert_eq!(results.fire_count("see-order"), 1);
    assert_eq!(*recorded.lock().unwrap(), vec![1]);
}

#[test]
fn retracting_consequence_removes_fact() {
    let mut rules = RuleSet::new("retract");
    rules
        .add_rule(
            Rule::unary::<Person>("flow", "drop")
                .when(|p: &Person| p.age < 0)
                .then_raw(|facts| {
                    context::current().retract_fact(&facts[0]).unwrap();
                })
                .build(),
        )
        .unwrap();

    let ghost = Fact::new(Person::new("Ghost", -1));
    let ctx = rules.evaluation_context();
    ctx.add_fact(&ghost).unwrap();
    ctx.add_fact(&Fact::new(Person::new("Real", 20))).unwrap();
    let results = rules.evaluate(&ctx).unwrap();

    assert_eq!(results.fire_count("drop"), 1);
    assert_eq!(ctx.fact_count(), 1);
}

#[test]
fn namespace_filter_restricts_session() {
    let fired = Arc::new(Mutex::new(Vec::new()));

    let mut rules = RuleSet::new("spaces");
    for namespace in ["billing.checks", "audit.checks"] {
        let log = Arc::clone(&fired);
        let tag = namespace.to_string();
        rules
            .add_rule(
                Rule::unary::<Person>(namespace, &format!("r-{namespace}"))
                    .then_raw(move |_| log.lock().unwrap().push(tag.clone()))
                    .build(),
            )
            .unwrap();
    }

    let ctx = rules.evaluation_context();
    ctx.set_namespace_filter(vec!["billing".to_string()]);
    ctx.add_fact(&Fact::new(Person::new("Pat", 30))).unwrap();
    let results = rules.evaluate(&ctx).unwrap();

    assert_eq!(results.total_fired(), 1);
    assert_eq!(*fired.lock().unwrap(), vec!["billing.checks"]);
}

#[test]
fn negated_rule_fires_when_conditions_fail() {
    let mut rules = RuleSet::new("otherwise");
    rules
        .add_rule(
            Rule::unary::<Person>("checks", "not-adult")
                .when(|p: &Person| p.age >= 18)
                .otherwise()
                .emits(EventTemplate::new(
                    EventCategory::Warning,
                    "age",
                    "not an adult",
                ))
                .build(),
        )
        .unwrap();

    let (ok, _) = rules
        .try_validate([Fact::new(Person::new("Kid", 10))])
        .unwrap();
    assert!(ok); // warnings are not violations

    let ctx = rules.evaluation_context();
    ctx.add_fact(&Fact::new(Person::new("Kid", 10))).unwrap();
    let results = rules.evaluate(&ctx).unwrap();
    assert_eq!(results.total_fired(), 1);
    assert_eq!(results.events_by_category(EventCategory::Warning).len(), 1);

    let ctx = rules.evaluation_context();
    ctx.add_fact(&Fact::new(Person::new("Adult", 30))).unwrap();
    let results = rules.evaluate(&ctx).unwrap();
    assert_eq!(results.total_fired(), 0);
}

#[test]
fn expired_rules_do_not_activate() {
    let mut rules = RuleSet::new("windows");
    rules
        .add_rule(
            Rule::unary::<Person>("checks", "past")
                .with_date_expires(chrono::Utc::now() - chrono::Duration::hours(1))
                .build(),
        )
        .unwrap();

    let ctx = rules.evaluation_context();
    ctx.add_fact(&Fact::new(Person::new("Q", 1))).unwrap();
    let results = rules.evaluate(&ctx).unwrap();
    assert_eq!(results.total_evaluated(), 0);
    assert_eq!(results.total_fired(), 0);
}

#[test]
fn lookup_tables_reachable_from_consequences() {
    #[derive(Debug)]
    struct Price(f64);

    let mut rules = RuleSet::new("lookups");
    rules
        .add_rule(
            Rule::unary::<Person>("flow", "price-check")
                .then(|_: &Person| {
                    let ctx = context::current();
                    let price = ctx.lookup::<Price>("widget").unwrap();
                    ctx.set_value("widget-price", price.0.into());
                })
                .build(),
        )
        .unwrap();

    let ctx = rules.evaluation_context();
    ctx.add_lookup_map(
        "Price",
        [(rulewright::LookupKey::from("widget"), Price(9.5))]
            .into_iter()
            .collect(),
    );
    ctx.add_fact(&Fact::new(Person::new("R", 1))).unwrap();
    let results = rules.evaluate(&ctx).unwrap();

    assert_eq!(
        results.get_value("widget-price"),
        Some(&rulewright::Value::Number(9.5))
    );
}

#[derive(Default)]
struct Recorder {
    calls: RefCell<Vec<String>>,
}

impl EvaluationListener for Recorder {
    fn begin_evaluation(&self) {
        self.calls.borrow_mut().push("begin".to_string());
    }
    fn begin_tuple_evaluation(&self, _facts: &[Fact]) {
        self.calls.borrow_mut().push("begin-tuple".to_string());
    }
    fn firing_rule(&self, rule: &Rule) {
        self.calls.borrow_mut().push(format!("firing {}", rule.name()));
    }
    fn fired_rule(&self, rule: &Rule, modified: bool) {
        self.calls
            .borrow_mut()
            .push(format!("fired {} {}", rule.name(), modified));
    }
    fn end_tuple_evaluation(&self, _facts: &[Fact]) {
        self.calls.borrow_mut().push("end-tuple".to_string());
    }
    fn end_evaluation(&self) {
        self.calls.borrow_mut().push("end".to_string());
    }
    fn event_created(&self, event: &rulewright::RuleEvent) {
        self.calls.borrow_mut().push(format!("event {}", event.message));
    }
}

#[test]
fn listener_observes_session_lifecycle() {
    let mut rules = RuleSet::new("observed");
    rules
        .add_rule(
            Rule::unary::<Person>("checks", "hello")
                .emits(EventTemplate::new(EventCategory::Info, "g", "hi"))
                .build(),
        )
        .unwrap();

    let recorder = Rc::new(Recorder::default());
    let ctx = rules.evaluation_context();
    ctx.set_listener(recorder.clone());
    ctx.add_fact(&Fact::new(Person::new("S", 1))).unwrap();
    rules.evaluate(&ctx).unwrap();

    let calls = recorder.calls.borrow();
    assert_eq!(
        *calls,
        vec![
            "begin".to_string(),
            "begin-tuple".to_string(),
            "firing hello".to_string(),
            "event hi".to_string(),
            "fired hello false".to_string(),
            "end-tuple".to_string(),
            "end".to_string(),
        ]
    );
}

#[test]
fn contexts_run_exactly_one_session() {
    let mut rules = RuleSet::new("single-use");
    rules
        .add_rule(Rule::unary::<Person>("ns", "r").build())
        .unwrap();

    let ctx = rules.evaluation_context();
    ctx.add_fact(&Fact::new(Person::new("T", 1))).unwrap();
    rules.evaluate(&ctx).unwrap();

    assert!(matches!(
        rules.evaluate(&ctx),
        Err(EngineError::ContextExhausted)
    ));
    assert!(matches!(
        ctx.add_fact(&Fact::new(Person::new("U", 2))),
        Err(EngineError::SessionStarted)
    ));
}

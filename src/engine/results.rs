use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{EventCategory, Value};

/// An event emitted by a firing rule.
///
/// Equality and hashing cover all four fields, which is what deduplicates a
/// structurally identical event re-emitted during later re-evaluation
/// passes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RuleEvent {
    /// Severity of the event
    pub category: EventCategory,
    /// Name of the rule that emitted the event
    pub rule_name: String,
    /// Group the event belongs to
    pub group: String,
    /// Rendered message
    pub message: String,
}

impl std::fmt::Display for RuleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {}",
            self.category, self.rule_name, self.group, self.message
        )
    }
}

/// Aggregated output of one evaluation session.
///
/// Events are set-valued: a structurally identical event appears once, in
/// first-emission order. The violation counter is independent and counts
/// every emission, so violation budgets keep working when equal violations
/// would otherwise collapse.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationResults {
    events: Vec<RuleEvent>,
    #[serde(skip)]
    seen: HashSet<RuleEvent>,
    total_evaluated: u64,
    total_fired: u64,
    violation_count: u64,
    started: Option<DateTime<Utc>>,
    completed: Option<DateTime<Utc>>,
    fired_rules: HashMap<String, u64>,
    mutex_winners: HashMap<String, String>,
    scratch: HashMap<String, Value>,
    affirmations: f64,
    vetos: f64,
}

impl EvaluationResults {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin(&mut self, now: DateTime<Utc>) {
        self.started = Some(now);
    }

    pub(crate) fn finish(&mut self, now: DateTime<Utc>) {
        self.completed = Some(now);
    }

    pub(crate) fn record_evaluated(&mut self) -> u64 {
        self.total_evaluated += 1;
        self.total_evaluated
    }

    pub(crate) fn record_fired(&mut self, rule_name: &str) {
        self.total_fired += 1;
        *self.fired_rules.entry(rule_name.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn record_mutex_winner(&mut self, group: &str, rule_name: &str) {
        self.mutex_winners
            .entry(group.to_string())
            .or_insert_with(|| rule_name.to_string());
    }

    /// Record an emission; returns whether the event was new to the set.
    pub(crate) fn push_event(&mut self, event: RuleEvent) -> bool {
        if event.category == EventCategory::Violation {
            self.violation_count += 1;
        }
        if self.seen.insert(event.clone()) {
            self.events.push(event);
            true
        } else {
            false
        }
    }

    pub(crate) fn add_affirmation(&mut self, weight: f64) {
        self.affirmations += weight;
    }

    pub(crate) fn add_veto(&mut self, weight: f64) {
        self.vetos += weight;
    }

    pub(crate) fn set_value(&mut self, key: &str, value: Value) {
        self.scratch.insert(key.to_string(), value);
    }

    /// Every deduplicated event, in first-emission order.
    pub fn events(&self) -> &[RuleEvent] {
        &self.events
    }

    /// Number of activations whose conditions were evaluated.
    pub fn total_evaluated(&self) -> u64 {
        self.total_evaluated
    }

    /// Number of activations that fired.
    pub fn total_fired(&self) -> u64 {
        self.total_fired
    }

    /// Number of violation emissions, counting repeats.
    pub fn violation_count(&self) -> u64 {
        self.violation_count
    }

    /// Wall-clock instant the session started.
    pub fn started(&self) -> Option<DateTime<Utc>> {
        self.started
    }

    /// Wall-clock instant the session completed.
    pub fn completed(&self) -> Option<DateTime<Utc>> {
        self.completed
    }

    /// Session duration in whole milliseconds; zero until completed.
    pub fn duration_ms(&self) -> i64 {
        match (self.started, self.completed) {
            (Some(started), Some(completed)) => (completed - started).num_milliseconds(),
            _ => 0,
        }
    }

    /// Per-rule fire counts.
    pub fn fired_rules(&self) -> &HashMap<String, u64> {
        &self.fired_rules
    }

    /// How often a rule fired this session.
    pub fn fire_count(&self, rule_name: &str) -> u64 {
        self.fired_rules.get(rule_name).copied().unwrap_or(0)
    }

    /// Winning rule name per mutex group, first winner recorded.
    pub fn mutex_winners(&self) -> &HashMap<String, String> {
        &self.mutex_winners
    }

    /// The session scratch map.
    pub fn scratch(&self) -> &HashMap<String, Value> {
        &self.scratch
    }

    /// Scratch value by key.
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.scratch.get(key)
    }

    /// Accumulated affirmation weight.
    pub fn affirmations(&self) -> f64 {
        self.affirmations
    }

    /// Accumulated veto weight.
    pub fn vetos(&self) -> f64 {
        self.vetos
    }

    /// The session score: affirmations minus vetos.
    pub fn score(&self) -> f64 {
        self.affirmations - self.vetos
    }

    /// The deduplicated violation events.
    pub fn violations(&self) -> Vec<&RuleEvent> {
        self.events_by_category(EventCategory::Violation)
    }

    /// Deduplicated events of one category.
    pub fn events_by_category(&self, category: EventCategory) -> Vec<&RuleEvent> {
        self.events
            .iter()
            .filter(|event| event.category == category)
            .collect()
    }

    /// Deduplicated events of one group.
    pub fn events_by_group(&self, group: &str) -> Vec<&RuleEvent> {
        self.events
            .iter()
            .filter(|event| event.group == group)
            .collect()
    }

    /// Deduplicated events emitted by one rule.
    pub fn events_by_rule(&self, rule_name: &str) -> Vec<&RuleEvent> {
        self.events
            .iter()
            .filter(|event| event.rule_name == rule_name)
            .collect()
    }

    /// Violations grouped by event group.
    pub fn violations_by_group(&self) -> HashMap<&str, Vec<&RuleEvent>> {
        let mut grouped: HashMap<&str, Vec<&RuleEvent>> = HashMap::new();
        for event in self.violations() {
            grouped.entry(event.group.as_str()).or_default().push(event);
        }
        grouped
    }

    /// Serialize the results for reporting.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl std::fmt::Display for EvaluationResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Evaluated: {}", self.total_evaluated)?;
        writeln!(f, "Fired: {}", self.total_fired)?;
        writeln!(f, "Violations: {}", self.violation_count)?;
        writeln!(f, "Score: {}", self.score())?;
        writeln!(f, "Duration: {}ms", self.duration_ms())?;
        for event in &self.events {
            writeln!(f, "  {}", event)?;
        }
        Ok(())
    }
}

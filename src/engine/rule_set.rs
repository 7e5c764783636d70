use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::engine::context::EvaluationContext;
use crate::engine::engine::Evaluator;
use crate::engine::fact::Fact;
use crate::engine::results::{EvaluationResults, RuleEvent};
use crate::engine::rule::Rule;
use crate::engine::rule_tree::RuleTree;
use crate::errors::{EngineError, Result};

/// A named collection of compiled rules backed by a rule tree.
///
/// Rule sets are read-only once their tree is sealed by the first
/// evaluation and are safe to share across threads; each session gets its
/// own [`EvaluationContext`].
#[derive(Debug, Default)]
pub struct RuleSet {
    name: String,
    rules: Vec<Arc<Rule>>,
    names: HashSet<String>,
    tree: RuleTree,
}

impl RuleSet {
    /// Create an empty rule set.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rules: Vec::new(),
            names: HashSet::new(),
            tree: RuleTree::new(),
        }
    }

    /// The rule set name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compile a rule into the set.
    ///
    /// Fails on a duplicate rule name and after the backing tree has been
    /// sealed by an evaluation.
    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        if self.names.contains(rule.name()) {
            return Err(EngineError::DuplicateRule {
                name: rule.name().to_string(),
            });
        }
        let rule = Arc::new(rule);
        self.tree.add(rule.param_types(), vec![Arc::clone(&rule)])?;
        self.names.insert(rule.name().to_string());
        self.rules.push(rule);
        Ok(())
    }

    /// Number of rules in the set.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set holds no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Names of the rules, in insertion order.
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    /// Drop every rule and re-open the backing tree.
    pub fn clear(&mut self) {
        self.rules.clear();
        self.names.clear();
        self.tree.clear();
    }

    /// Create a fresh session context.
    pub fn evaluation_context(&self) -> EvaluationContext {
        EvaluationContext::new()
    }

    /// Run one evaluation session against the context's facts.
    ///
    /// May raise the session-control errors configured on the context;
    /// results stay observable through the context either way.
    pub fn evaluate(&self, ctx: &EvaluationContext) -> Result<EvaluationResults> {
        Evaluator::new(&self.tree).run(ctx)
    }

    /// Evaluate the offered facts and compare the session score to a
    /// threshold.
    pub fn decide<I>(&self, threshold: f64, facts: I) -> Result<bool>
    where
        I: IntoIterator<Item = Fact>,
    {
        let ctx = self.evaluation_context();
        ctx.add_facts(facts)?;
        let results = self.evaluate(&ctx)?;
        Ok(results.score() >= threshold)
    }

    /// [`decide`](Self::decide) against the default threshold of zero.
    pub fn decide_default<I>(&self, facts: I) -> Result<bool>
    where
        I: IntoIterator<Item = Fact>,
    {
        self.decide(0.0, facts)
    }

    /// Evaluate the offered facts with session-control errors suppressed
    /// and report whether the session was violation-free, along with the
    /// violation events.
    pub fn try_validate<I>(&self, facts: I) -> Result<(bool, Vec<RuleEvent>)>
    where
        I: IntoIterator<Item = Fact>,
    {
        let ctx = self.evaluation_context();
        ctx.suppress_exceptions();
        ctx.add_facts(facts)?;
        let results = self.evaluate(&ctx)?;
        let violations: Vec<RuleEvent> = results.violations().into_iter().cloned().collect();
        Ok((violations.is_empty(), violations))
    }

    /// Summary statistics over the compiled rules.
    pub fn stats(&self) -> RuleSetStats {
        let mut arity_counts = [0usize; 4];
        let mut salience_distribution = HashMap::new();
        let mut mutex_groups = HashSet::new();
        for rule in &self.rules {
            arity_counts[rule.arity() - 1] += 1;
            *salience_distribution.entry(rule.salience()).or_insert(0) += 1;
            if let Some(group) = rule.mutex() {
                mutex_groups.insert(group.to_string());
            }
        }
        RuleSetStats {
            name: self.name.clone(),
            total_rules: self.rules.len(),
            arity_counts,
            salience_distribution,
            mutex_group_count: mutex_groups.len(),
        }
    }
}

/// Statistics about a rule set
#[derive(Debug, Clone)]
pub struct RuleSetStats {
    /// The rule set name
    pub name: String,
    /// Total number of compiled rules
    pub total_rules: usize,
    /// Rule counts per arity (index 0 = arity 1)
    pub arity_counts: [usize; 4],
    /// Distribution of rules by salience
    pub salience_distribution: HashMap<i32, usize>,
    /// Number of distinct mutex groups
    pub mutex_group_count: usize,
}

impl std::fmt::Display for RuleSetStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Rule Set: {}", self.name)?;
        writeln!(f, "Total Rules: {}", self.total_rules)?;
        for (index, count) in self.arity_counts.iter().enumerate() {
            if *count > 0 {
                writeln!(f, "  Arity {}: {} rules", index + 1, count)?;
            }
        }
        writeln!(f, "Mutex Groups: {}", self.mutex_group_count)?;
        writeln!(f, "Salience Distribution:")?;

        let mut saliences: Vec<_> = self.salience_distribution.iter().collect();
        saliences.sort_by_key(|(salience, _)| **salience);
        for (salience, count) in saliences {
            writeln!(f, "  Salience {}: {} rules", salience, count)?;
        }
        Ok(())
    }
}

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::codec::decode_selector_into;
use crate::engine::context::{EvaluationContext, SessionGuard};
use crate::engine::fact_space::FactId;
use crate::engine::plan::{EvaluationPlan, PlanCache};
use crate::engine::results::EvaluationResults;
use crate::engine::rule_tree::RuleTree;
use crate::errors::{EngineError, Result};

enum Outcome {
    Quiescent,
    Exhausted,
    ViolationBudget,
}

/// The salience-ordered, mutex-aware, fire-once-aware driver loop.
///
/// Enumerates tuples across the fact space, evaluates rule conditions,
/// fires consequences, detects mutation through the fact-space version
/// counter, and re-plans until quiescence or a budget runs out.
pub(crate) struct Evaluator<'a> {
    tree: &'a RuleTree,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(tree: &'a RuleTree) -> Self {
        Self { tree }
    }

    pub(crate) fn run(&self, ctx: &EvaluationContext) -> Result<EvaluationResults> {
        ctx.mark_started()?;
        let config = ctx.config();
        let listener = ctx.listener();
        let clock = Instant::now();

        ctx.with_results_mut(|results| results.begin(Utc::now()));
        listener.begin_evaluation();
        log::debug!(
            "session started: {} fact(s), filter {:?}",
            ctx.fact_count(),
            config.namespace_filter
        );

        let mut cache = PlanCache::new();
        let mut fired_once: HashSet<(usize, Vec<FactId>)> = HashSet::new();
        let mut outcome = Outcome::Quiescent;

        'session: loop {
            // Budgets are checked at the top of each planning cycle, never
            // inside user code.
            if clock.elapsed() > config.max_duration {
                outcome = Outcome::Exhausted;
                break;
            }
            if let Some(budget) = config.max_violations {
                if ctx.violation_count() >= budget {
                    outcome = Outcome::ViolationBudget;
                    break;
                }
            }

            let now = Utc::now();
            let plan = ctx.with_space(|space| {
                EvaluationPlan::build(space, self.tree, &mut cache, &config.namespace_filter, now)
            });
            if plan.is_empty() {
                break;
            }

            let mut cycle_winners: HashSet<String> = HashSet::new();
            let mut mutated = false;

            for entry in &plan.entries {
                let rule = &entry.rule;
                let mut selectors = [0u16; 4];
                let arity = decode_selector_into(entry.packed, &mut selectors);

                // A selector invalidated by an earlier fire this cycle makes
                // the candidate stale.
                let resolved = ctx.with_space(|space| {
                    let tuple = &selectors[..arity];
                    match (space.get_tuple(tuple), space.identities_for(tuple)) {
                        (Some(facts), Some(identities)) => Some((facts, identities)),
                        _ => None,
                    }
                });
                let (facts, identities) = match resolved {
                    Some(pair) => pair,
                    None => continue,
                };

                let rule_key = Arc::as_ptr(rule) as *const () as usize;
                if rule.fires_once() && fired_once.contains(&(rule_key, identities.clone())) {
                    continue;
                }

                let evaluated = ctx.with_results_mut(|results| results.record_evaluated());
                if evaluated > config.max_evaluations {
                    outcome = Outcome::Exhausted;
                    break 'session;
                }

                listener.begin_tuple_evaluation(&facts);
                let activation = match rule.evaluate(&facts) {
                    Some(activation) => activation,
                    None => {
                        listener.end_tuple_evaluation(&facts);
                        continue;
                    }
                };

                if let Some(group) = rule.mutex() {
                    if cycle_winners.contains(group) {
                        listener.end_tuple_evaluation(&facts);
                        continue;
                    }
                }

                let version_before = ctx.space_version();
                let mut extractor_triggered = false;
                {
                    let _guard = SessionGuard::bind(ctx, rule.name());
                    listener.firing_rule(rule);
                    if let Some(cascade) = rule.cascade_action() {
                        for fact in cascade(&facts) {
                            ctx.insert_fact(&fact)?;
                        }
                    } else {
                        rule.fire(&facts, &activation);
                    }
                    for template in rule.event_templates() {
                        let message = template.render(&facts);
                        ctx.emit_event(template.category(), template.group(), &message);
                    }
                    if let Some(extractor) = rule.modify_extractor() {
                        if let Some(fact) = extractor(&facts) {
                            extractor_triggered = true;
                            // The consequence may already have retracted it.
                            let _ = ctx.modify_fact(&fact);
                        }
                    }
                }
                let modified = extractor_triggered || ctx.space_version() != version_before;

                ctx.with_results_mut(|results| results.record_fired(rule.name()));
                if rule.fires_once() {
                    fired_once.insert((rule_key, identities));
                }
                if let Some(group) = rule.mutex() {
                    cycle_winners.insert(group.to_string());
                    ctx.with_results_mut(|results| {
                        results.record_mutex_winner(group, rule.name());
                    });
                }
                listener.fired_rule(rule, modified);
                listener.end_tuple_evaluation(&facts);

                if let Some(budget) = config.max_violations {
                    if ctx.violation_count() >= budget {
                        outcome = Outcome::ViolationBudget;
                        break 'session;
                    }
                }

                if modified {
                    listener.debug(format_args!(
                        "re-planning after mutating fire of {}",
                        rule.qualified_name()
                    ));
                    mutated = true;
                    break;
                }
            }

            if !mutated {
                break;
            }
        }

        ctx.with_results_mut(|results| results.finish(Utc::now()));
        listener.end_evaluation();
        let results = ctx.results();
        log::debug!(
            "session finished: {} evaluated, {} fired, {} violation(s)",
            results.total_evaluated(),
            results.total_fired(),
            results.violation_count()
        );

        // Session-control errors are raised only after results are complete
        // so the caller still observes the full state through the context.
        let control_error = match outcome {
            Outcome::Exhausted => Some(EngineError::EvaluationExhausted {
                evaluated: results.total_evaluated(),
                elapsed_ms: clock.elapsed().as_millis() as i64,
            }),
            Outcome::Quiescent | Outcome::ViolationBudget => None,
        };
        let control_error = control_error
            .or_else(|| {
                if config.throw_on_violations && results.violation_count() > 0 {
                    Some(EngineError::ViolationsExist {
                        violations: results.violations().into_iter().cloned().collect(),
                    })
                } else {
                    None
                }
            })
            .or_else(|| {
                if config.throw_on_no_rules && results.total_evaluated() == 0 {
                    Some(EngineError::NoRulesEvaluated)
                } else {
                    None
                }
            });

        match control_error {
            Some(error) if !config.suppress_exceptions => Err(error),
            _ => Ok(results),
        }
    }
}

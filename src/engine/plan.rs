use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::codec::{encode_selector, encode_signature, MAX_SIGNATURE_INDEX};
use crate::engine::fact_space::{FactSpace, Selector};
use crate::engine::rule::Rule;
use crate::engine::rule_tree::RuleTree;

/// One activation candidate: a rule crossed with a packed selector tuple.
pub(crate) struct PlanEntry {
    pub(crate) rule: Arc<Rule>,
    pub(crate) packed: u64,
}

/// Session-level cache of "which rules apply to this slot combination".
///
/// Keyed by packed signature for arities 1..=3; arity-4 combinations have
/// no terminator lane in the signature packing and go through their own
/// table keyed by the full index quadruple. Slot indices are stable for the
/// life of a fact space (slots are never removed), so entries stay valid
/// across re-plans.
#[derive(Default)]
pub(crate) struct PlanCache {
    by_signature: HashMap<u32, Vec<Arc<Rule>>>,
    by_quad: HashMap<[u8; 4], Vec<Arc<Rule>>>,
}

impl PlanCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn rules_for<'a>(
        &'a mut self,
        combo: &[usize],
        space: &FactSpace,
        tree: &RuleTree,
        namespaces: &[String],
    ) -> &'a [Arc<Rule>] {
        let find = || applicable_rules(combo, space, tree, namespaces);

        if combo.len() == 4 {
            let key = [
                combo[0] as u8,
                combo[1] as u8,
                combo[2] as u8,
                combo[3] as u8,
            ];
            self.by_quad.entry(key).or_insert_with(find)
        } else {
            let indices: Vec<u8> = combo.iter().map(|&slot| slot as u8).collect();
            let key = encode_signature(&indices);
            self.by_signature.entry(key).or_insert_with(find)
        }
    }
}

/// The ordered list of activation candidates for one planning pass.
pub(crate) struct EvaluationPlan {
    pub(crate) entries: Vec<PlanEntry>,
}

impl EvaluationPlan {
    /// Snapshot the fact space and produce the sorted candidate list.
    ///
    /// For every arity with enough live slots, every ordered slot
    /// combination (repetition allowed) is resolved to its applicable rules;
    /// rules outside their time window are dropped; each surviving rule is
    /// crossed with every selector tuple formed from the combination's
    /// slots. Candidates sort stably by salience then rule name, leaving
    /// fact insertion order as the final tie-break.
    pub(crate) fn build(
        space: &FactSpace,
        tree: &RuleTree,
        cache: &mut PlanCache,
        namespaces: &[String],
        now: DateTime<Utc>,
    ) -> Self {
        let mut entries = Vec::new();

        let live: Vec<usize> = (0..space.schema().len())
            .filter(|&slot| !space.schema()[slot].is_empty())
            .collect();
        if live.is_empty() {
            return Self { entries };
        }

        let selectors_by_slot: HashMap<usize, Vec<Selector>> = live
            .iter()
            .map(|&slot| (slot, space.selectors_in_slot(slot)))
            .collect();

        for arity in 1..=4 {
            for_each_combination(&live, arity, |combo| {
                // Slot indices beyond the signature packing range are legal
                // but uncacheable; they query the tree directly.
                let uncached;
                let packable = combo
                    .iter()
                    .all(|&slot| slot <= MAX_SIGNATURE_INDEX as usize);
                let rules: &[Arc<Rule>] = if packable {
                    cache.rules_for(combo, space, tree, namespaces)
                } else {
                    uncached = applicable_rules(combo, space, tree, namespaces);
                    &uncached
                };
                if rules.is_empty() {
                    return;
                }
                let active: Vec<&Arc<Rule>> =
                    rules.iter().filter(|rule| rule.is_active_at(now)).collect();
                if active.is_empty() {
                    return;
                }

                let lists: Vec<&[Selector]> = combo
                    .iter()
                    .map(|slot| selectors_by_slot[slot].as_slice())
                    .collect();
                let mut tuples = Vec::new();
                let mut scratch = [0u16; 4];
                collect_tuples(&lists, 0, &mut scratch, &mut tuples);

                for rule in active {
                    for &packed in &tuples {
                        entries.push(PlanEntry {
                            rule: Arc::clone(rule),
                            packed,
                        });
                    }
                }
            });
        }

        entries.sort_by(|a, b| {
            a.rule
                .salience()
                .cmp(&b.rule.salience())
                .then_with(|| a.rule.name().cmp(b.rule.name()))
        });

        Self { entries }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn applicable_rules(
    combo: &[usize],
    space: &FactSpace,
    tree: &RuleTree,
    namespaces: &[String],
) -> Vec<Arc<Rule>> {
    let tuple: Vec<_> = combo
        .iter()
        .map(|&slot| space.schema()[slot].type_key())
        .collect();
    tree.find_rules(&tuple, namespaces)
}

/// Visit every ordered combination (with repetition) of `arity` elements
/// drawn from `pool`.
fn for_each_combination(pool: &[usize], arity: usize, mut visit: impl FnMut(&[usize])) {
    let mut odometer = vec![0usize; arity];
    let mut combo = vec![0usize; arity];
    loop {
        for (position, &wheel) in odometer.iter().enumerate() {
            combo[position] = pool[wheel];
        }
        visit(&combo);

        let mut position = arity;
        loop {
            if position == 0 {
                return;
            }
            position -= 1;
            odometer[position] += 1;
            if odometer[position] < pool.len() {
                break;
            }
            odometer[position] = 0;
        }
    }
}

fn collect_tuples(
    lists: &[&[Selector]],
    depth: usize,
    scratch: &mut [u16; 4],
    out: &mut Vec<u64>,
) {
    if depth == lists.len() {
        out.push(encode_selector(&scratch[..depth]));
        return;
    }
    for &selector in lists[depth] {
        scratch[depth] = selector;
        collect_tuples(lists, depth + 1, scratch, out);
    }
}

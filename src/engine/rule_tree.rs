use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::engine::fact::{TypeKey, TypeMatch};
use crate::engine::rule::Rule;
use crate::errors::{EngineError, Result};

#[derive(Default)]
struct Node {
    edges: Vec<(TypeMatch, Node)>,
    rules: Vec<Arc<Rule>>,
}

impl Node {
    fn collect(&self, tuple: &[TypeKey], depth: usize, out: &mut Vec<Arc<Rule>>) {
        if depth == tuple.len() {
            out.extend(self.rules.iter().cloned());
            return;
        }
        for (label, child) in &self.edges {
            if label.admits(tuple[depth]) {
                child.collect(tuple, depth + 1, out);
            }
        }
    }
}

/// A polymorphic, arity-aware index mapping fact-type tuples to compiled
/// rules.
///
/// Roots are partitioned by arity; each edge carries a declared parameter
/// type; a node at depth `d` represents "position `d` is bound to a type the
/// edge admits". The tree is append-only while building and is sealed by
/// the first query; once sealed a per-tuple query cache answers repeat
/// lookups. [`clear`](RuleTree::clear) resets to the build state.
#[derive(Default)]
pub struct RuleTree {
    roots: [Node; 4],
    sealed: AtomicBool,
    cache: RwLock<HashMap<Vec<TypeId>, Vec<Arc<Rule>>>>,
}

impl RuleTree {
    /// Create an empty tree in the build state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register rules under a declared parameter tuple.
    ///
    /// Fails on an empty or over-long tuple, on any rule whose arity does
    /// not match the tuple length, and after the tree has been sealed.
    pub fn add(&mut self, types: &[TypeMatch], rules: Vec<Arc<Rule>>) -> Result<()> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(EngineError::RuleTreeSealed);
        }
        let arity = types.len();
        if arity == 0 || arity > 4 {
            return Err(EngineError::InvalidArity { arity });
        }
        for rule in &rules {
            if rule.arity() != arity {
                return Err(EngineError::ArityMismatch {
                    rule: rule.qualified_name(),
                    declared: rule.arity(),
                    supplied: arity,
                });
            }
        }

        let mut node = &mut self.roots[arity - 1];
        for label in types {
            let position = match node.edges.iter().position(|(edge, _)| edge == label) {
                Some(position) => position,
                None => {
                    node.edges.push((*label, Node::default()));
                    node.edges.len() - 1
                }
            };
            node = &mut node.edges[position].1;
        }
        node.rules.extend(rules);
        Ok(())
    }

    /// All rules whose declared parameter tuple admits the queried type
    /// tuple, in insertion order, restricted by the namespace filter.
    ///
    /// An empty filter admits every rule; otherwise a rule is admitted when
    /// its namespace starts with any listed prefix (case-sensitive). The
    /// first call seals the tree.
    pub fn find_rules(&self, tuple: &[TypeKey], namespaces: &[String]) -> Vec<Arc<Rule>> {
        self.sealed.store(true, Ordering::Release);

        if tuple.is_empty() || tuple.len() > 4 {
            return Vec::new();
        }

        let key: Vec<TypeId> = tuple.iter().map(|t| t.id()).collect();
        let cached = self.cache.read().unwrap().get(&key).cloned();
        let matches = match cached {
            Some(matches) => matches,
            None => {
                let mut matches = Vec::new();
                self.roots[tuple.len() - 1].collect(tuple, 0, &mut matches);
                self.cache.write().unwrap().insert(key, matches.clone());
                matches
            }
        };

        if namespaces.is_empty() {
            return matches;
        }
        matches
            .into_iter()
            .filter(|rule| {
                namespaces
                    .iter()
                    .any(|prefix| rule.namespace().starts_with(prefix.as_str()))
            })
            .collect()
    }

    /// Whether the tree has been sealed by a query.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Drop every registered rule and return to the build state.
    pub fn clear(&mut self) {
        self.roots = Default::default();
        self.sealed.store(false, Ordering::Release);
        self.cache.write().unwrap().clear();
    }
}

impl std::fmt::Debug for RuleTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn count(node: &Node) -> usize {
            node.rules.len() + node.edges.iter().map(|(_, child)| count(child)).sum::<usize>()
        }
        f.debug_struct("RuleTree")
            .field("rules", &self.roots.iter().map(count).sum::<usize>())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Person;
    struct Order;

    fn rule(name: &str, params: Vec<TypeMatch>) -> Arc<Rule> {
        Arc::new(Rule::with_params("test", name, params).build())
    }

    fn names(rules: &[Arc<Rule>]) -> Vec<&str> {
        rules.iter().map(|r| r.name()).collect()
    }

    #[test]
    fn test_wildcard_matches_any_queried_type() {
        let mut tree = RuleTree::new();
        tree.add(&[TypeMatch::Any], vec![rule("any", vec![TypeMatch::Any])])
            .unwrap();
        let found = tree.find_rules(&[TypeKey::of::<Person>()], &[]);
        assert_eq!(names(&found), vec!["any"]);
    }

    #[test]
    fn test_exact_and_wildcard_both_returned() {
        let mut tree = RuleTree::new();
        tree.add(&[TypeMatch::Any], vec![rule("any", vec![TypeMatch::Any])])
            .unwrap();
        tree.add(
            &[TypeMatch::of::<Person>()],
            vec![rule("person", vec![TypeMatch::of::<Person>()])],
        )
        .unwrap();
        let found = tree.find_rules(&[TypeKey::of::<Person>()], &[]);
        assert_eq!(names(&found), vec!["any", "person"]);
        let found = tree.find_rules(&[TypeKey::of::<Order>()], &[]);
        assert_eq!(names(&found), vec!["any"]);
    }

    #[test]
    fn test_mixed_arity_two_lookup() {
        let mut tree = RuleTree::new();
        let params = vec![TypeMatch::of::<Person>(), TypeMatch::Any];
        tree.add(&params.clone(), vec![rule("pair", params)]).unwrap();
        let found = tree.find_rules(&[TypeKey::of::<Person>(), TypeKey::of::<Order>()], &[]);
        assert_eq!(names(&found), vec!["pair"]);
        let found = tree.find_rules(&[TypeKey::of::<Order>(), TypeKey::of::<Order>()], &[]);
        assert!(found.is_empty());
    }

    #[test]
    fn test_seal_on_first_query_then_clear_reopens() {
        let mut tree = RuleTree::new();
        let params = vec![TypeMatch::of::<Person>()];
        tree.add(&params.clone(), vec![rule("a", params.clone())])
            .unwrap();
        assert!(!tree.is_sealed());

        tree.find_rules(&[TypeKey::of::<Person>()], &[]);
        assert!(tree.is_sealed());
        assert!(matches!(
            tree.add(&params.clone(), vec![rule("b", params.clone())]),
            Err(EngineError::RuleTreeSealed)
        ));

        tree.clear();
        assert!(!tree.is_sealed());
        tree.add(&params.clone(), vec![rule("b", params)]).unwrap();
    }

    #[test]
    fn test_empty_tuple_rejected() {
        let mut tree = RuleTree::new();
        assert!(matches!(
            tree.add(&[], vec![]),
            Err(EngineError::InvalidArity { arity: 0 })
        ));
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let mut tree = RuleTree::new();
        let unary = rule("unary", vec![TypeMatch::of::<Person>()]);
        let result = tree.add(&[TypeMatch::of::<Person>(), TypeMatch::Any], vec![unary]);
        assert!(matches!(result, Err(EngineError::ArityMismatch { .. })));
    }

    #[test]
    fn test_namespace_prefix_filter() {
        let mut tree = RuleTree::new();
        let params = vec![TypeMatch::of::<Person>()];
        let billing = Arc::new(Rule::with_params("billing.checks", "a", params.clone()).build());
        let audit = Arc::new(Rule::with_params("audit", "b", params.clone()).build());
        tree.add(&params, vec![billing, audit]).unwrap();

        let tuple = [TypeKey::of::<Person>()];
        assert_eq!(names(&tree.find_rules(&tuple, &[])), vec!["a", "b"]);
        assert_eq!(
            names(&tree.find_rules(&tuple, &["billing".to_string()])),
            vec!["a"]
        );
        assert_eq!(
            names(&tree.find_rules(&tuple, &["Billing".to_string()])),
            Vec::<&str>::new()
        );
        assert_eq!(
            names(&tree.find_rules(&tuple, &["audit".to_string(), "billing".to_string()])),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut tree = RuleTree::new();
        let params = vec![TypeMatch::of::<Person>()];
        tree.add(&params.clone(), vec![rule("first", params.clone())])
            .unwrap();
        tree.add(&params.clone(), vec![rule("second", params)]).unwrap();
        let found = tree.find_rules(&[TypeKey::of::<Person>()], &[]);
        assert_eq!(names(&found), vec!["first", "second"]);
    }
}

//! Algorithm stack interface (spec §4.5): the external call contract
//! that the (out-of-scope) algorithm composition layer plugs into.

use std::fmt;
use std::rc::Rc;

use crate::node::NodeId;
use crate::tree::Tree;

/// An "algo": any unit of strategy logic that inspects and mutates its
/// target strategy, returning whether the stack should continue.
///
/// Algos read `target.universe`, `target.temp`, `target.perm` via
/// `Tree` accessors and drive the tree forward with `allocate` /
/// `rebalance` / `close` / `flatten`.
pub trait Algo {
    /// Runs this algo against `target` within `tree`. Returns `false`
    /// to short-circuit the rest of the stack (unless the stack has
    /// entered extended mode — see [`AlgoStack`]).
    fn call(&self, tree: &mut Tree, target: NodeId) -> bool;

    /// If true, this algo still runs (with its result discarded) after
    /// the stack has short-circuited on an earlier `false`.
    fn run_always(&self) -> bool {
        false
    }
}

/// An ordered collection of algos run against one strategy.
///
/// Normal mode short-circuits on the first `false`. If any member
/// advertises [`Algo::run_always`], the stack enters an extended mode:
/// once short-circuited, it keeps invoking only the `run_always`
/// members (discarding their results) so that cleanup/logging algos
/// still see every tick. The stack's overall return is the first
/// `false` that was returned, or `true` if none was.
#[derive(Clone, Default)]
pub struct AlgoStack(Vec<Rc<dyn Algo>>);

impl fmt::Debug for AlgoStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgoStack").field("len", &self.0.len()).finish()
    }
}

impl AlgoStack {
    /// Builds a stack from an ordered list of algos.
    #[must_use]
    pub fn new(algos: Vec<Rc<dyn Algo>>) -> Self {
        Self(algos)
    }

    /// Number of algos in the stack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the stack has no algos (runs as a no-op, returning `true`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Runs the stack against `target`, implementing the short-circuit
    /// / extended-mode semantics described on the type.
    pub fn run(&self, tree: &mut Tree, target: NodeId) -> bool {
        let has_run_always = self.0.iter().any(|a| a.run_always());
        let mut short_circuited = false;
        let mut result = true;

        for algo in &self.0 {
            if short_circuited {
                if algo.run_always() {
                    algo.call(tree, target);
                }
                continue;
            }

            if !algo.call(tree, target) {
                result = false;
                if has_run_always {
                    short_circuited = true;
                } else {
                    return false;
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Record(RefCell<Vec<&'static str>>, bool, &'static str, bool);

    impl Algo for Record {
        fn call(&self, _tree: &mut Tree, _target: NodeId) -> bool {
            self.0.borrow_mut().push(self.2);
            self.1
        }
        fn run_always(&self) -> bool {
            self.3
        }
    }

    fn minimal_tree() -> Tree {
        Tree::new_single_strategy("root", bt_core::Universe::empty()).unwrap()
    }

    #[test]
    fn test_short_circuits_without_run_always() {
        let log = RefCell::new(Vec::new());
        let a = Rc::new(Record(RefCell::new(vec![]), true, "a", false));
        let b = Rc::new(Record(RefCell::new(vec![]), false, "b", false));
        let c = Rc::new(Record(RefCell::new(vec![]), true, "c", false));
        let stack = AlgoStack::new(vec![a, b, c.clone()]);

        let mut tree = minimal_tree();
        let result = stack.run(&mut tree, NodeId::ROOT);

        assert!(!result);
        assert!(c.0.borrow().is_empty(), "c should not run after short-circuit");
        let _ = &log;
    }

    #[test]
    fn test_extended_mode_runs_run_always_after_short_circuit() {
        let a = Rc::new(Record(RefCell::new(vec![]), false, "a", false));
        let cleanup = Rc::new(Record(RefCell::new(vec![]), true, "cleanup", true));
        let stack = AlgoStack::new(vec![a, cleanup.clone()]);

        let mut tree = minimal_tree();
        let result = stack.run(&mut tree, NodeId::ROOT);

        assert!(!result, "overall result is the first false");
        assert_eq!(*cleanup.0.borrow(), vec!["cleanup"], "run_always member still ran");
    }

    #[test]
    fn test_empty_stack_returns_true() {
        let stack = AlgoStack::new(vec![]);
        let mut tree = minimal_tree();
        assert!(stack.run(&mut tree, NodeId::ROOT));
    }

    // A tiny three-stage algo pipeline — select every symbol, weigh them
    // equally, rebalance to those weights — exercising the full stack
    // contract (`target.universe`, `target.temp`, `rebalance`) the way a
    // real algo composition layer would, without pulling one in.

    struct SelectAll;
    impl Algo for SelectAll {
        fn call(&self, tree: &mut Tree, target: NodeId) -> bool {
            let selected: Vec<String> = tree.universe_view(target).unwrap().symbols().map(String::from).collect();
            tree.temp_mut(target).unwrap().insert("selected".to_string(), serde_json::json!(selected));
            true
        }
    }

    struct WeighEqually;
    impl Algo for WeighEqually {
        fn call(&self, tree: &mut Tree, target: NodeId) -> bool {
            let selected: Vec<String> = tree
                .temp(target)
                .unwrap()
                .get("selected")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|x| x.as_str().map(String::from)).collect())
                .unwrap_or_default();
            if selected.is_empty() {
                return true;
            }
            let w = 1.0 / selected.len() as f64;
            let weights: serde_json::Map<String, serde_json::Value> =
                selected.into_iter().map(|s| (s, serde_json::json!(w))).collect();
            tree.temp_mut(target).unwrap().insert("weights".to_string(), serde_json::Value::Object(weights));
            true
        }
    }

    struct RebalanceToWeights;
    impl Algo for RebalanceToWeights {
        fn call(&self, tree: &mut Tree, target: NodeId) -> bool {
            let weights = tree.temp(target).unwrap().get("weights").cloned();
            if let Some(serde_json::Value::Object(map)) = weights {
                // Pin every rebalance in this sweep to the value seen
                // before the first trade: otherwise the second and later
                // children would measure their target weight against a
                // base already eroded by the first child's commission.
                let base = tree.value(target).unwrap();
                for (name, w) in map {
                    tree.rebalance(target, &name, w.as_f64().unwrap_or(0.0), Some(base), true).unwrap();
                }
            }
            true
        }
    }

    #[test]
    fn test_select_weigh_rebalance_pipeline_splits_capital_equally() {
        use bt_core::{Date, Universe};
        use indexmap::IndexMap;

        let d0 = Date::from_ymd(2025, 1, 1).unwrap();
        let mut cols = IndexMap::new();
        cols.insert("AAPL".to_string(), vec![100.0]);
        cols.insert("MSFT".to_string(), vec![200.0]);
        let universe = Universe::new(vec![d0], cols).unwrap();

        let mut tree = Tree::new("root", universe);
        let root = tree.root();
        tree.setup().unwrap();
        tree.set_stack(
            root,
            AlgoStack::new(vec![Rc::new(SelectAll), Rc::new(WeighEqually), Rc::new(RebalanceToWeights)]),
        )
        .unwrap();

        tree.adjust(root, 100_000.0, true, 0.0).unwrap();
        tree.update(d0).unwrap();
        tree.run(root).unwrap();
        tree.update(d0).unwrap();

        let aapl = *tree.children(root).unwrap().get("AAPL").unwrap();
        let msft = *tree.children(root).unwrap().get("MSFT").unwrap();
        assert!((tree.weight(aapl).unwrap() - 0.5).abs() < 0.02);
        assert!((tree.weight(msft).unwrap() - 0.5).abs() < 0.02);
    }
}

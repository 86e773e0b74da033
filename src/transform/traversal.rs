//! This module contains the shared depth-first traversal that drives the
//! transformation passes over the unit call graph.
//!
//! The traversal visits each unit at most once per walk (the visited set is
//! what makes in-place rewriting safe in a cyclic graph) and consumes one
//! step of the pipeline budget per visited unit. When the budget runs out
//! the max-depth hook fires for the unit instead of its pre/post hooks,
//! giving the pass the chance to substitute a conservative placeholder.

use std::collections::HashSet;

use crate::{
    error::transform::Result,
    unit::{UnitGraph, UnitId},
};

/// Collects every unit reachable from `roots` through call edges, in
/// depth-first pre-order.
///
/// This is the cheap form of the walk used by passes that do not consume
/// the step budget.
#[must_use]
pub fn collect_reachable(graph: &UnitGraph, roots: &[UnitId]) -> Vec<UnitId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    let mut stack: Vec<UnitId> = roots.to_vec();

    while let Some(unit) = stack.pop() {
        if !visited.insert(unit) {
            continue;
        }
        order.push(unit);
        if let Ok(found) = graph.unit(unit) {
            if let Some(body) = found.body() {
                stack.extend(body.call_targets());
            }
        }
    }
    order
}

/// The hooks a pass provides to the traversal.
pub trait Visitor {
    /// Called before recursing into the unit's callees.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] to abort the walk.
    fn pre(&mut self, graph: &mut UnitGraph, unit: UnitId) -> Result<()> {
        let _ = (graph, unit);
        Ok(())
    }

    /// Called after the unit's callees have been visited.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] to abort the walk.
    fn post(&mut self, graph: &mut UnitGraph, unit: UnitId) -> Result<()> {
        let _ = (graph, unit);
        Ok(())
    }

    /// Called instead of the other hooks when the step budget is exhausted
    /// at this unit.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] to abort the walk.
    fn max_depth(&mut self, graph: &mut UnitGraph, unit: UnitId) -> Result<()> {
        let _ = (graph, unit);
        Ok(())
    }
}

/// Walks the call graph depth-first from each of `roots`, invoking the
/// visitor's hooks and decrementing `budget` once per visited unit.
///
/// # Errors
///
/// Returns [`Err`] if a hook errors.
pub fn walk(
    graph: &mut UnitGraph,
    roots: &[UnitId],
    budget: &mut usize,
    visitor: &mut dyn Visitor,
) -> Result<()> {
    let mut visited = HashSet::new();
    for root in roots {
        walk_unit(graph, *root, budget, visitor, &mut visited)?;
    }
    Ok(())
}

fn walk_unit(
    graph: &mut UnitGraph,
    unit: UnitId,
    budget: &mut usize,
    visitor: &mut dyn Visitor,
    visited: &mut HashSet<UnitId>,
) -> Result<()> {
    if !visited.insert(unit) {
        return Ok(());
    }

    if *budget == 0 {
        tracing::warn!(%unit, "Traversal step budget exhausted");
        return visitor.max_depth(graph, unit);
    }
    *budget -= 1;

    visitor.pre(graph, unit)?;

    let targets = graph
        .unit(unit)
        .ok()
        .and_then(|u| u.body().map(crate::value::Expression::call_targets))
        .unwrap_or_default();
    for target in targets {
        walk_unit(graph, target, budget, visitor, visited)?;
    }

    visitor.post(graph, unit)
}

#[cfg(test)]
mod test {
    use crate::{
        transform::traversal::{walk, Visitor},
        unit::{UnitGraph, UnitId},
        value::{Expression, ProcessedCall},
    };

    /// Builds a chain a -> b -> c of units for walking.
    fn chain() -> (UnitGraph, Vec<UnitId>) {
        let mut graph = UnitGraph::new();
        let a = graph.get_or_create("a");
        let b = graph.get_or_create("b");
        let c = graph.get_or_create("c");

        let call = |target| {
            Expression::processed(
                0,
                ProcessedCall {
                    target,
                    arguments: vec![],
                },
            )
        };
        graph.unit_mut(a).unwrap().set_body(call(b));
        graph.unit_mut(b).unwrap().set_body(call(c));
        graph
            .unit_mut(c)
            .unwrap()
            .set_body(Expression::boolean(0, false));
        (graph, vec![a, b, c])
    }

    #[derive(Default)]
    struct Recorder {
        pre: Vec<UnitId>,
        post: Vec<UnitId>,
        exhausted: Vec<UnitId>,
    }

    impl Visitor for Recorder {
        fn pre(
            &mut self,
            _graph: &mut UnitGraph,
            unit: UnitId,
        ) -> crate::error::transform::Result<()> {
            self.pre.push(unit);
            Ok(())
        }

        fn post(
            &mut self,
            _graph: &mut UnitGraph,
            unit: UnitId,
        ) -> crate::error::transform::Result<()> {
            self.post.push(unit);
            Ok(())
        }

        fn max_depth(
            &mut self,
            _graph: &mut UnitGraph,
            unit: UnitId,
        ) -> crate::error::transform::Result<()> {
            self.exhausted.push(unit);
            Ok(())
        }
    }

    #[test]
    fn pre_hooks_fire_top_down_and_post_hooks_bottom_up() -> anyhow::Result<()> {
        let (mut graph, ids) = chain();
        let mut recorder = Recorder::default();
        let mut budget = 100;

        walk(&mut graph, &[ids[0]], &mut budget, &mut recorder)?;

        assert_eq!(recorder.pre, ids);
        assert_eq!(recorder.post, ids.iter().rev().copied().collect::<Vec<_>>());
        assert!(recorder.exhausted.is_empty());
        Ok(())
    }

    #[test]
    fn budget_exhaustion_fires_the_max_depth_hook() -> anyhow::Result<()> {
        let (mut graph, ids) = chain();
        let mut recorder = Recorder::default();
        let mut budget = 2;

        walk(&mut graph, &[ids[0]], &mut budget, &mut recorder)?;

        assert_eq!(recorder.pre, vec![ids[0], ids[1]]);
        assert_eq!(recorder.exhausted, vec![ids[2]]);
        Ok(())
    }

    #[test]
    fn cyclic_graphs_are_walked_once_per_unit() -> anyhow::Result<()> {
        let mut graph = UnitGraph::new();
        let a = graph.get_or_create("a");
        let b = graph.get_or_create("b");
        let call = |target| {
            Expression::processed(
                0,
                ProcessedCall {
                    target,
                    arguments: vec![],
                },
            )
        };
        graph.unit_mut(a)?.set_body(call(b));
        graph.unit_mut(b)?.set_body(call(a));

        let mut recorder = Recorder::default();
        let mut budget = 100;
        walk(&mut graph, &[a], &mut budget, &mut recorder)?;

        assert_eq!(recorder.pre, vec![a, b]);
        Ok(())
    }
}

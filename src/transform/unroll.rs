//! This module contains the recursion unrolling pass: strongly recursive
//! units are copied to a fixed depth, with the base case (depth exhausted)
//! replaced by the constant `false`.
//!
//! # Strong Recursion
//!
//! A unit is strongly recursive only if some chain of calls starting at it
//! closes a cycle back to *that* unit — a strongly-connected-component
//! membership test, not plain cycle detection. Merely reaching a shared
//! callee that is itself on a cycle does not make the origin recursive.
//!
//! The copies produced by unrolling are marked non-recursive so that the
//! detector halts below the unrolled depth instead of re-unrolling the
//! copies forever.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{
    error::transform::Result,
    problem::SatisfactionProblem,
    transform::{rewrite_unit, traversal::collect_reachable, PassContext, Transform},
    unit::{SEFunction, UnitGraph, UnitId},
    value::{ExprData, Expression, ProcessedCall},
};

/// The recursion unrolling pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RecursionUnrolling;

impl Transform for RecursionUnrolling {
    fn run(&mut self, problem: &mut SatisfactionProblem, cx: &mut PassContext) -> Result<()> {
        let roots = problem.constraints().to_vec();
        let graph = problem.graph_mut();

        for origin in collect_reachable(graph, &roots) {
            let Ok(found) = graph.unit(origin) else { continue };
            if found.is_non_recursive() || found.body().is_none() {
                continue;
            }
            if !is_strongly_recursive(graph, origin) {
                continue;
            }

            if cx.budget == 0 {
                tracing::warn!(
                    %origin,
                    "Unrolling budget exhausted; collapsing the recursive unit to false"
                );
                graph
                    .unit_mut(origin)
                    .map_err(graph_error)?
                    .set_body(Expression::boolean(0, false));
                continue;
            }

            unroll(graph, origin, cx)?;
        }
        Ok(())
    }
}

/// Checks whether any chain of calls starting at `origin` returns to
/// `origin`.
///
/// Units marked non-recursive are not expanded, which is what halts the
/// detector below previously unrolled copies.
fn is_strongly_recursive(graph: &UnitGraph, origin: UnitId) -> bool {
    let mut queue: VecDeque<UnitId> = successors(graph, origin).into();
    let mut visited: HashSet<UnitId> = HashSet::new();

    while let Some(unit) = queue.pop_front() {
        if unit == origin {
            return true;
        }
        if !visited.insert(unit) {
            continue;
        }
        if graph.unit(unit).is_ok_and(SEFunction::is_non_recursive) {
            continue;
        }
        queue.extend(successors(graph, unit));
    }
    false
}

/// Gets the call targets of a unit's body.
fn successors(graph: &UnitGraph, unit: UnitId) -> Vec<UnitId> {
    graph
        .unit(unit)
        .ok()
        .and_then(|found| found.body().map(Expression::call_targets))
        .unwrap_or_default()
}

/// Collects the members of the cycle through `origin`: units reachable from
/// `origin` that also reach `origin`.
fn cycle_members(graph: &UnitGraph, origin: UnitId) -> HashSet<UnitId> {
    let mut members = HashSet::new();
    members.insert(origin);

    let mut reachable = HashSet::new();
    let mut queue: VecDeque<UnitId> = successors(graph, origin).into();
    while let Some(unit) = queue.pop_front() {
        if !reachable.insert(unit) {
            continue;
        }
        queue.extend(successors(graph, unit));
    }

    for candidate in reachable {
        if candidate == origin {
            continue;
        }
        if is_strongly_recursive(graph, candidate)
            && reaches(graph, candidate, origin)
        {
            members.insert(candidate);
        }
    }
    members
}

/// Checks whether `from` reaches `to` through call edges.
fn reaches(graph: &UnitGraph, from: UnitId, to: UnitId) -> bool {
    let mut queue: VecDeque<UnitId> = successors(graph, from).into();
    let mut visited = HashSet::new();
    while let Some(unit) = queue.pop_front() {
        if unit == to {
            return true;
        }
        if !visited.insert(unit) {
            continue;
        }
        queue.extend(successors(graph, unit));
    }
    false
}

/// Unrolls the cycle through `origin` to the configured depth.
///
/// For each depth `d` in `1..=depth`, every cycle member is copied with its
/// intra-cycle edges remapped to the same depth, except edges closing the
/// cycle into `origin`, which step down to depth `d - 1`. The depth-zero
/// copy of the origin is the constant `false`. External callers of the
/// origin are redirected to the deepest copy.
fn unroll(graph: &mut UnitGraph, origin: UnitId, cx: &mut PassContext) -> Result<()> {
    let depth = cx.config.unroll_depth;
    let members = cycle_members(graph, origin);

    // Depth zero: the base case.
    let origin_name = graph.unit(origin).map_err(graph_error)?.name().to_string();
    let mut base = SEFunction::new(format!("{origin_name}#u0"));
    base.set_body(Expression::boolean(0, false));
    base.mark_generated();
    base.mark_non_recursive();
    let mut copies: HashMap<(UnitId, usize), UnitId> = HashMap::new();
    copies.insert((origin, 0), graph.insert(base));
    cx.budget = cx.budget.saturating_sub(1);

    for d in 1..=depth {
        // Create this depth's copies first so intra-cycle edges can be
        // remapped to them.
        for member in &members {
            let found = graph.unit(*member).map_err(graph_error)?;
            let mut copy = SEFunction::new(format!("{}#u{d}", found.name()));
            *copy.params_mut() = found.params().clone();
            copy.mark_generated();
            copy.mark_non_recursive();
            let id = graph.insert(copy);
            copies.insert((*member, d), id);
            cx.budget = cx.budget.saturating_sub(1);
        }

        for member in &members {
            let body = graph
                .unit(*member)
                .map_err(graph_error)?
                .body()
                .cloned()
                .expect("Cycle members have bodies");
            let remapped = body.rewrite(&mut |node| match node.data() {
                ExprData::ProcessedCall(call) => {
                    let new_target = if call.target == origin {
                        copies.get(&(origin, d - 1)).copied()
                    } else if members.contains(&call.target) {
                        copies.get(&(call.target, d)).copied()
                    } else {
                        None
                    };
                    match new_target {
                        Some(target) => Expression::processed(
                            node.pc(),
                            ProcessedCall {
                                target,
                                arguments: call.arguments.clone(),
                            },
                        ),
                        None => node,
                    }
                }
                _ => node,
            });
            let copy_id = copies[&(*member, d)];
            graph.unit_mut(copy_id).map_err(graph_error)?.set_body(remapped);
        }
    }

    // Redirect external callers of the origin to the deepest copy.
    let deepest = copies[&(origin, depth)];
    let copy_ids: HashSet<UnitId> = copies.values().copied().collect();
    for caller in graph.ids() {
        if copy_ids.contains(&caller) || members.contains(&caller) {
            continue;
        }
        rewrite_unit(graph, caller, &mut |node| match node.data() {
            ExprData::ProcessedCall(call) if call.target == origin => Ok(Expression::processed(
                node.pc(),
                ProcessedCall {
                    target: deepest,
                    arguments: call.arguments.clone(),
                },
            )),
            _ => Ok(node),
        })?;
    }

    // The original cycle is superseded; halt the detector on it.
    for member in &members {
        graph.unit_mut(*member).map_err(graph_error)?.mark_non_recursive();
    }
    Ok(())
}

fn graph_error(e: crate::error::execution::LocatedError) -> crate::error::transform::Error {
    crate::error::transform::Error::InconsistentGraph {
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod test {
    use crate::{
        problem::SatisfactionProblem,
        transform::{unroll::RecursionUnrolling, Config, PassContext, Transform},
        unit::UnitGraph,
        value::{operator::Operator, types::ValueType, Expression, ProcessedCall, Variable},
        watchdog::LazyWatchdog,
    };

    #[test]
    fn self_recursive_units_unroll_to_the_configured_depth() -> anyhow::Result<()> {
        let mut graph = UnitGraph::new();
        let root = graph.get_or_create("root");
        let recursive = graph.get_or_create("rec");

        let self_call = Expression::processed(
            0,
            ProcessedCall {
                target: recursive,
                arguments: vec![],
            },
        );
        graph.unit_mut(recursive)?.set_body(Expression::op(
            0,
            Operator::Ite,
            vec![
                Expression::variable(0, Variable::new("c", ValueType::Bool)),
                Expression::boolean(0, true),
                self_call,
            ],
            ValueType::Bool,
        ));
        graph.unit_mut(root)?.set_body(Expression::processed(
            0,
            ProcessedCall {
                target: recursive,
                arguments: vec![],
            },
        ));

        let before = graph.len();
        let mut problem = SatisfactionProblem::new(graph, vec![root], vec![]);
        let mut cx = PassContext::new(
            Config::default(),
            problem.graph(),
            LazyWatchdog.in_rc(),
        );
        RecursionUnrolling.run(&mut problem, &mut cx)?;

        let graph = problem.graph();
        // Depth 2 produces exactly three generated units: depths 2, 1, 0.
        assert_eq!(graph.len(), before + 3);

        let depth0 = graph.lookup("rec#u0").expect("Depth 0 copy exists");
        assert!(graph.unit(depth0)?.body().is_some_and(Expression::is_false));

        let depth2 = graph.lookup("rec#u2").expect("Depth 2 copy exists");
        let root_body = problem.graph().unit(root)?.body().unwrap();
        assert_eq!(root_body.call_targets(), vec![depth2]);

        // The depth-2 copy calls depth 1, which calls depth 0.
        let depth1 = graph.lookup("rec#u1").expect("Depth 1 copy exists");
        assert_eq!(graph.unit(depth2)?.body().unwrap().call_targets(), vec![depth1]);
        assert_eq!(graph.unit(depth1)?.body().unwrap().call_targets(), vec![depth0]);
        Ok(())
    }

    #[test]
    fn non_recursive_units_are_left_alone() -> anyhow::Result<()> {
        let mut graph = UnitGraph::new();
        let root = graph.get_or_create("root");
        let leaf = graph.get_or_create("leaf");
        graph.unit_mut(leaf)?.set_body(Expression::boolean(0, true));
        graph.unit_mut(root)?.set_body(Expression::processed(
            0,
            ProcessedCall {
                target: leaf,
                arguments: vec![],
            },
        ));

        let before = graph.len();
        let mut problem = SatisfactionProblem::new(graph, vec![root], vec![]);
        let mut cx = PassContext::new(
            Config::default(),
            problem.graph(),
            LazyWatchdog.in_rc(),
        );
        RecursionUnrolling.run(&mut problem, &mut cx)?;

        assert_eq!(problem.graph().len(), before);
        Ok(())
    }
}

//! This module contains the dead-branch pruning pass: units whose only
//! reachable return values are the single constant `false` collapse to that
//! constant.
//!
//! Such units arise naturally from the dispatch lowering (the fallback of
//! every dispatch chain is `false`) and from the conservative placeholders
//! substituted on budget exhaustion; collapsing them lets the reduction
//! rounds erase entire unreachable regions of the call graph.

use std::collections::HashSet;

use crate::{
    error::transform::Result,
    problem::SatisfactionProblem,
    transform::{traversal::collect_reachable, PassContext, Transform},
    unit::{UnitGraph, UnitId},
    value::{known::KnownValue, operator::Operator, ExprData, Expression},
};

/// The dead-branch pruning pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeadBranchPruning;

impl Transform for DeadBranchPruning {
    fn run(&mut self, problem: &mut SatisfactionProblem, _cx: &mut PassContext) -> Result<()> {
        let roots = problem.constraints().to_vec();
        let graph = problem.graph_mut();
        let reachable = collect_reachable(graph, &roots);

        // Iterate to a fixed point: collapsing one unit can make its
        // callers collapse too.
        let mut false_only: HashSet<UnitId> = HashSet::new();
        loop {
            let mut changed = false;
            for unit in &reachable {
                if false_only.contains(unit) {
                    continue;
                }
                let Ok(found) = graph.unit(*unit) else { continue };
                let Some(body) = found.body() else { continue };
                if returns_only_false(body, &false_only) {
                    false_only.insert(*unit);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for unit in &false_only {
            if let Ok(found) = graph.unit_mut(*unit) {
                if !found.body().is_some_and(Expression::is_false) {
                    found.set_body(Expression::boolean(0, false));
                }
            }
        }
        Ok(())
    }
}

/// Checks whether every value reachable through `expr` is the constant
/// `false`.
fn returns_only_false(expr: &Expression, false_units: &HashSet<UnitId>) -> bool {
    match expr.data() {
        ExprData::Constant(KnownValue::Bool(false)) => true,
        ExprData::Op {
            operator: Operator::Ite,
            operands,
            ..
        } => {
            returns_only_false(&operands[1], false_units)
                && returns_only_false(&operands[2], false_units)
        }
        ExprData::ProcessedCall(call) => false_units.contains(&call.target),
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use crate::{
        problem::SatisfactionProblem,
        transform::{dead_branch::DeadBranchPruning, Config, PassContext, Transform},
        unit::UnitGraph,
        value::{operator::Operator, types::ValueType, Expression, ProcessedCall},
        watchdog::LazyWatchdog,
    };

    #[test]
    fn units_returning_only_false_collapse() -> anyhow::Result<()> {
        let mut graph = UnitGraph::new();
        let root = graph.get_or_create("root");
        let leaf = graph.get_or_create("leaf");

        graph.unit_mut(leaf)?.set_body(Expression::boolean(0, false));
        // The root's branches both reach only false: one directly, one
        // through the leaf.
        graph.unit_mut(root)?.set_body(Expression::op(
            0,
            Operator::Ite,
            vec![
                Expression::variable(
                    0,
                    crate::value::Variable::new("c", ValueType::Bool),
                ),
                Expression::boolean(0, false),
                Expression::processed(
                    0,
                    ProcessedCall {
                        target: leaf,
                        arguments: vec![],
                    },
                ),
            ],
            ValueType::Bool,
        ));

        let mut problem = SatisfactionProblem::new(graph, vec![root], vec![]);
        let mut cx = PassContext::new(
            Config::default(),
            problem.graph(),
            LazyWatchdog.in_rc(),
        );
        DeadBranchPruning.run(&mut problem, &mut cx)?;

        assert!(problem
            .graph()
            .unit(root)?
            .body()
            .is_some_and(Expression::is_false));
        Ok(())
    }

    #[test]
    fn units_with_reachable_true_values_survive() -> anyhow::Result<()> {
        let mut graph = UnitGraph::new();
        let root = graph.get_or_create("root");
        let body = Expression::op(
            0,
            Operator::Ite,
            vec![
                Expression::variable(
                    0,
                    crate::value::Variable::new("c", ValueType::Bool),
                ),
                Expression::boolean(0, true),
                Expression::boolean(0, false),
            ],
            ValueType::Bool,
        );
        graph.unit_mut(root)?.set_body(body.clone());

        let mut problem = SatisfactionProblem::new(graph, vec![root], vec![]);
        let mut cx = PassContext::new(
            Config::default(),
            problem.graph(),
            LazyWatchdog.in_rc(),
        );
        DeadBranchPruning.run(&mut problem, &mut cx)?;

        assert_eq!(problem.graph().unit(root)?.body(), Some(&body));
        Ok(())
    }
}

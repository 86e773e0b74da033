//! This module contains the boolean normalization pass: the conversion of
//! the stack machine's 0/1 integer idiom into true boolean expressions.
//!
//! The machine has no boolean type, so compiled predicates return the
//! integers 0 and 1. The pass detects the top-level return path of each
//! unit by structural pattern (a conditional whose branches are
//! integer-typed and free of calls) and replaces the integer constants on
//! that path with boolean constants, then rewrites fully-boolean
//! conditionals into conjunction/disjunction form.

use crate::{
    error::transform::Result,
    problem::SatisfactionProblem,
    transform::{rewrite_unit, traversal::collect_reachable, PassContext, Transform},
    value::{
        known::KnownValue,
        operator::Operator,
        types::ValueType,
        ExprData,
        Expression,
    },
};

/// The boolean normalization pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BooleanNormalization;

impl Transform for BooleanNormalization {
    fn run(&mut self, problem: &mut SatisfactionProblem, _cx: &mut PassContext) -> Result<()> {
        let roots = problem.constraints().to_vec();
        let graph = problem.graph_mut();

        for unit in collect_reachable(graph, &roots) {
            // First normalize the return spine, then rewrite boolean
            // conditionals into BAND/BOR form.
            let Ok(found) = graph.unit(unit) else { continue };
            if let Some(body) = found.body().cloned() {
                let normalized = booleanize_spine(&body);
                graph
                    .unit_mut(unit)
                    .map_err(|e| crate::error::transform::Error::InconsistentGraph {
                        reason: e.to_string(),
                    })?
                    .set_body(normalized);
            }

            rewrite_unit(graph, unit, &mut |node| {
                Ok(ite_to_boolean(&node).unwrap_or(node))
            })?;
        }
        Ok(())
    }
}

/// Converts 0/1 integer constants into boolean constants along the
/// top-level return path of `expr`.
///
/// The return path is followed through conditionals whose branches are
/// integer-typed and contain no calls; anything else (arithmetic operands,
/// call arguments) is left untouched, since an integer there really is an
/// integer.
#[must_use]
pub fn booleanize_spine(expr: &Expression) -> Expression {
    match expr.data() {
        ExprData::Constant(KnownValue::Int(0)) => Expression::boolean(expr.pc(), false),
        ExprData::Constant(KnownValue::Int(1)) => Expression::boolean(expr.pc(), true),
        ExprData::Op {
            operator: Operator::Ite,
            operands,
            ..
        } if is_return_branch(&operands[1]) && is_return_branch(&operands[2]) => Expression::op(
            expr.pc(),
            Operator::Ite,
            vec![
                operands[0].clone(),
                booleanize_spine(&operands[1]),
                booleanize_spine(&operands[2]),
            ],
            ValueType::Bool,
        ),
        _ => expr.clone(),
    }
}

/// Checks whether a conditional branch looks like part of the compiled 0/1
/// return idiom: integer-typed and free of calls.
fn is_return_branch(expr: &Expression) -> bool {
    let int_typed = matches!(expr.value_type(), ValueType::Int | ValueType::Bool);
    int_typed && expr.call_targets().is_empty()
}

/// Rewrites a conditional whose branches are both boolean into
/// conjunction/disjunction form:
///
/// ```text
/// ITE(c, t, f)
///
/// becomes
///
/// BOR(BAND(c, t), BAND(BNOT(c), f))
/// ```
///
/// Returns [`None`] when the node is not such a conditional.
#[must_use]
pub fn ite_to_boolean(node: &Expression) -> Option<Expression> {
    let ExprData::Op {
        operator: Operator::Ite,
        operands,
        ..
    } = node.data()
    else {
        return None;
    };
    let [condition, true_branch, false_branch] = operands.as_slice() else {
        return None;
    };
    if true_branch.value_type() != ValueType::Bool || false_branch.value_type() != ValueType::Bool
    {
        return None;
    }

    let pc = node.pc();
    let negated = Expression::op(pc, Operator::BNot, vec![condition.clone()], ValueType::Bool);
    let when_true = Expression::op(
        pc,
        Operator::BAnd,
        vec![condition.clone(), true_branch.clone()],
        ValueType::Bool,
    );
    let when_false = Expression::op(
        pc,
        Operator::BAnd,
        vec![negated, false_branch.clone()],
        ValueType::Bool,
    );
    Some(Expression::op(
        pc,
        Operator::BOr,
        vec![when_true, when_false],
        ValueType::Bool,
    ))
}

#[cfg(test)]
mod test {
    use crate::{
        transform::boolean::{booleanize_spine, ite_to_boolean},
        value::{operator::Operator, types::ValueType, ExprData, Expression, Variable},
    };

    fn int_var(name: &str) -> Expression {
        Expression::variable(0, Variable::new(name, ValueType::Int))
    }

    #[test]
    fn zero_one_returns_become_booleans() {
        let condition = Expression::op(
            0,
            Operator::Equal,
            vec![int_var("a"), Expression::int(0, 0)],
            ValueType::Bool,
        );
        let body = Expression::op(
            0,
            Operator::Ite,
            vec![
                condition.clone(),
                Expression::int(0, 1),
                Expression::int(0, 0),
            ],
            ValueType::Int,
        );

        let normalized = booleanize_spine(&body);
        let expected = Expression::op(
            0,
            Operator::Ite,
            vec![
                condition,
                Expression::boolean(0, true),
                Expression::boolean(0, false),
            ],
            ValueType::Bool,
        );
        assert_eq!(normalized, expected);
    }

    #[test]
    fn integers_off_the_return_path_are_untouched() {
        let body = Expression::op(
            0,
            Operator::Add,
            vec![int_var("a"), Expression::int(0, 1)],
            ValueType::Int,
        );
        assert_eq!(booleanize_spine(&body), body);
    }

    #[test]
    fn boolean_conditionals_rewrite_to_band_bor_form() {
        // ITE(EQUAL(a, 0), true, false) must become
        // BOR(BAND(EQUAL(a, 0), true), BAND(BNOT(EQUAL(a, 0)), false)).
        let condition = Expression::op(
            0,
            Operator::Equal,
            vec![int_var("a"), Expression::int(0, 0)],
            ValueType::Bool,
        );
        let node = Expression::op(
            0,
            Operator::Ite,
            vec![
                condition.clone(),
                Expression::boolean(0, true),
                Expression::boolean(0, false),
            ],
            ValueType::Bool,
        );

        let rewritten = ite_to_boolean(&node).expect("The conditional is fully boolean");

        let negated =
            Expression::op(0, Operator::BNot, vec![condition.clone()], ValueType::Bool);
        let expected = Expression::op(
            0,
            Operator::BOr,
            vec![
                Expression::op(
                    0,
                    Operator::BAnd,
                    vec![condition, Expression::boolean(0, true)],
                    ValueType::Bool,
                ),
                Expression::op(
                    0,
                    Operator::BAnd,
                    vec![negated, Expression::boolean(0, false)],
                    ValueType::Bool,
                ),
            ],
            ValueType::Bool,
        );
        assert_eq!(rewritten, expected);
    }

    #[test]
    fn conditionals_over_calls_are_not_rewritten() {
        let call = Expression::processed(
            0,
            crate::value::ProcessedCall {
                target: crate::unit::UnitId(0),
                arguments: vec![],
            },
        );
        let node = Expression::op(
            0,
            Operator::Ite,
            vec![
                Expression::boolean(0, true),
                call.clone(),
                call,
            ],
            ValueType::Undefined,
        );
        assert!(matches!(node.data(), ExprData::Op { .. }));
        assert!(ite_to_boolean(&node).is_none());
    }
}

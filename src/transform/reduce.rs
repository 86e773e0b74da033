//! This module contains the bounded reduction rounds: the cheap rewrites
//! (unused-parameter elimination, trivial-unit inlining, constant folding)
//! that are repeated a fixed number of times to reach a local fixed point
//! without paying for full convergence detection.

use std::collections::HashMap;

use crate::{
    error::transform::Result,
    heap,
    problem::SatisfactionProblem,
    transform::{
        evaluate,
        rewrite_unit,
        traversal::collect_reachable,
        PassContext,
        Transform,
    },
    unit::{UnitGraph, UnitId},
    value::{known::KnownValue, operator::Operator, ExprData, Expression, ProcessedCall},
};

/// The single-node constant folding rule.
///
/// The rule is total: nodes no rule matches are returned unmodified.
/// Operator applications over fully-known operands evaluate at the declared
/// bit-width; conditional expressions with known conditions collapse to the
/// matching branch; heap reads and writes at known addresses on known heaps
/// fold structurally; and a handful of algebraic identities keep the tree
/// small between full rounds.
///
/// # Errors
///
/// Returns [`Err`] if an operator is applied to operand types it cannot be
/// implemented for.
pub fn fold(node: Expression) -> Result<Expression> {
    let pc = node.pc();
    let ExprData::Op {
        operator,
        operands,
        hint,
    } = node.data()
    else {
        return Ok(node);
    };

    match operator {
        Operator::Ite => {
            let condition = &operands[0];
            match condition.as_constant() {
                Some(value) if value.is_truthy() => return Ok(operands[1].clone()),
                Some(value) if value.is_falsy() => return Ok(operands[2].clone()),
                _ => return Ok(node),
            }
        }
        Operator::HeapGet => {
            if let (ExprData::Snapshot(_), Some(_)) =
                (operands[0].data(), operands[1].as_constant())
            {
                return Ok(heap::read_slot(pc, &operands[0], &operands[1], *hint));
            }
            return Ok(node);
        }
        Operator::HeapPut => {
            if let (ExprData::Snapshot(_), Some(_)) =
                (operands[0].data(), operands[1].as_constant())
            {
                return Ok(heap::write_slot(
                    pc,
                    &operands[0],
                    &operands[1],
                    operands[2].clone(),
                ));
            }
            return Ok(node);
        }
        _ => (),
    }

    // Algebraic identities that do not need both operands known.
    if let [left, right] = operands.as_slice() {
        match (operator, left.as_constant(), right.as_constant()) {
            (Operator::BAnd, Some(KnownValue::Bool(true)), _) => return Ok(right.clone()),
            (Operator::BAnd, _, Some(KnownValue::Bool(true))) => return Ok(left.clone()),
            (Operator::BAnd, Some(KnownValue::Bool(false)), _)
            | (Operator::BAnd, _, Some(KnownValue::Bool(false))) => {
                return Ok(Expression::boolean(pc, false));
            }
            (Operator::BOr, Some(KnownValue::Bool(false)), _) => return Ok(right.clone()),
            (Operator::BOr, _, Some(KnownValue::Bool(false))) => return Ok(left.clone()),
            (Operator::BOr, Some(KnownValue::Bool(true)), _)
            | (Operator::BOr, _, Some(KnownValue::Bool(true))) => {
                return Ok(Expression::boolean(pc, true));
            }
            (Operator::Add, _, Some(value)) if value.as_i64() == Some(0) => {
                return Ok(left.clone());
            }
            (Operator::Add, Some(value), _) if value.as_i64() == Some(0) => {
                return Ok(right.clone());
            }
            (Operator::Mul, _, Some(value)) if value.as_i64() == Some(1) => {
                return Ok(left.clone());
            }
            (Operator::Mul, Some(value), _) if value.as_i64() == Some(1) => {
                return Ok(right.clone());
            }
            _ => (),
        }
    }

    let constants: Option<Vec<KnownValue>> =
        operands.iter().map(Expression::as_constant).collect();
    if let Some(constants) = constants {
        if let Some(result) = evaluate::evaluate(*operator, &constants)? {
            return Ok(Expression::constant(pc, result));
        }
    }
    Ok(node)
}

/// What a trivial unit's calls are replaced with during inlining.
#[derive(Clone, Debug)]
enum InlineKind {
    /// The unit's body is a constant: calls become that constant.
    Constant(Expression),

    /// The unit's body is exactly one of its parameters: calls become the
    /// argument at that parameter's position.
    Identity(usize),

    /// The unit's body is a single tail call: calls become the inner call
    /// with the outer arguments substituted through.
    Tail(Expression),
}

/// The bounded reduction rounds pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReductionRounds;

impl Transform for ReductionRounds {
    fn run(&mut self, problem: &mut SatisfactionProblem, cx: &mut PassContext) -> Result<()> {
        let roots = problem.constraints().to_vec();
        for _ in 0..cx.config.reduction_rounds {
            let graph = problem.graph_mut();
            let reachable = collect_reachable(graph, &roots);

            eliminate_unused_parameters(graph, &reachable)?;
            inline_trivial_units(graph, &reachable)?;
            for unit in &reachable {
                rewrite_unit(graph, *unit, &mut fold)?;
            }
        }
        Ok(())
    }
}

/// Removes parameters that no longer occur in their unit's body, dropping
/// the corresponding argument at every call site.
fn eliminate_unused_parameters(graph: &mut UnitGraph, reachable: &[UnitId]) -> Result<()> {
    for unit in reachable {
        loop {
            let Ok(found) = graph.unit(*unit) else { break };
            let Some(body) = found.body().cloned() else {
                break;
            };
            let params = found.params().as_slice().to_vec();
            let Some(index) = params
                .iter()
                .position(|param| !body.mentions(&param.variable))
            else {
                break;
            };

            graph
                .unit_mut(*unit)
                .map_err(|e| crate::error::transform::Error::InconsistentGraph {
                    reason: e.to_string(),
                })?
                .params_mut()
                .remove(index);

            let target = *unit;
            for caller in reachable {
                rewrite_unit(graph, *caller, &mut |node| match node.data() {
                    ExprData::ProcessedCall(call)
                        if call.target == target && call.arguments.len() > index =>
                    {
                        let mut arguments = call.arguments.clone();
                        arguments.remove(index);
                        Ok(Expression::processed(
                            node.pc(),
                            ProcessedCall {
                                target: call.target,
                                arguments,
                            },
                        ))
                    }
                    _ => Ok(node),
                })?;
            }
        }
    }
    Ok(())
}

/// Inlines units whose body is a constant, a pure identity, or a single
/// tail call.
fn inline_trivial_units(graph: &mut UnitGraph, reachable: &[UnitId]) -> Result<()> {
    // Classify before rewriting, so one round inlines against a consistent
    // view of the graph.
    let mut inlinable: HashMap<UnitId, InlineKind> = HashMap::new();
    for unit in reachable {
        let Ok(found) = graph.unit(*unit) else {
            continue;
        };
        let Some(body) = found.body() else { continue };

        match body.data() {
            ExprData::Constant(_) => {
                inlinable.insert(*unit, InlineKind::Constant(body.clone()));
            }
            ExprData::Variable(variable) => {
                if let Some(index) = found
                    .params()
                    .as_slice()
                    .iter()
                    .position(|param| &param.variable == variable)
                {
                    inlinable.insert(*unit, InlineKind::Identity(index));
                }
            }
            ExprData::ProcessedCall(_) => {
                inlinable.insert(*unit, InlineKind::Tail(body.clone()));
            }
            _ => (),
        }
    }

    if inlinable.is_empty() {
        return Ok(());
    }

    for unit in reachable {
        let unit = *unit;
        let mut param_cache: HashMap<UnitId, Vec<crate::unit::Parameter>> = HashMap::new();
        for (target, _) in &inlinable {
            if let Ok(found) = graph.unit(*target) {
                param_cache.insert(*target, found.params().as_slice().to_vec());
            }
        }

        rewrite_unit(graph, unit, &mut |node| {
            let ExprData::ProcessedCall(call) = node.data() else {
                return Ok(node);
            };
            let Some(kind) = inlinable.get(&call.target) else {
                return Ok(node);
            };

            match kind {
                InlineKind::Constant(constant) => Ok(constant.clone()),
                InlineKind::Identity(index) => match call.arguments.get(*index) {
                    Some(argument) => Ok(argument.clone()),
                    None => Ok(node),
                },
                InlineKind::Tail(inner) => {
                    let Some(params) = param_cache.get(&call.target) else {
                        return Ok(node);
                    };
                    let bindings: HashMap<_, _> = params
                        .iter()
                        .map(|param| param.variable.clone())
                        .zip(call.arguments.iter().cloned())
                        .collect();
                    Ok(inner.substitute(&bindings))
                }
            }
        })?;
    }
    Ok(())
}

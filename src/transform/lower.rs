//! This module contains the final lowering pass: the rewrites that bring
//! the converged graph into the shape downstream solver backends can
//! consume.
//!
//! The pass lowers remaining three-way `COMPARE` nodes into
//! `GREATER`/`EQUAL`-guarded conditional chains, expands heap reads and
//! writes at symbolic addresses over known-size snapshots into nested
//! equality-guarded conditionals, retypes parameters still tagged undefined
//! from their call-site argument types, strips calls carrying non-constant
//! heap arguments (they are unrepresentable to solvers), and rewrites
//! boolean-to-int coercions into explicit conditionals.

use crate::{
    error::transform::Result,
    problem::SatisfactionProblem,
    transform::{rewrite_unit, traversal::collect_reachable, PassContext, Transform},
    unit::{ParamKind, UnitGraph, UnitId},
    value::{
        known::KnownValue,
        operator::Operator,
        types::ValueType,
        ExprData,
        Expression,
        Variable,
    },
};

/// The final lowering pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FinalLowering;

impl Transform for FinalLowering {
    fn run(&mut self, problem: &mut SatisfactionProblem, _cx: &mut PassContext) -> Result<()> {
        let roots = problem.constraints().to_vec();
        let graph = problem.graph_mut();
        let reachable = collect_reachable(graph, &roots);

        for unit in &reachable {
            rewrite_unit(graph, *unit, &mut |node| Ok(lower_node(&node)))?;
        }

        retype_undefined_parameters(graph, &reachable)?;
        strip_symbolic_heap_calls(graph, &reachable)?;
        Ok(())
    }
}

/// Applies the structural lowering rules to one node.
fn lower_node(node: &Expression) -> Expression {
    let pc = node.pc();
    let ExprData::Op {
        operator,
        operands,
        hint,
    } = node.data()
    else {
        return node.clone();
    };

    match operator {
        // COMPARE(a, b) becomes
        // ITE(GREATER(a, b), 1, ITE(EQUAL(a, b), 0, -1)).
        Operator::Compare(_) => {
            let [left, right] = operands.as_slice() else {
                return node.clone();
            };
            let greater = Expression::op(
                pc,
                Operator::Greater,
                vec![left.clone(), right.clone()],
                ValueType::Bool,
            );
            let equal = Expression::op(
                pc,
                Operator::Equal,
                vec![left.clone(), right.clone()],
                ValueType::Bool,
            );
            let inner = Expression::op(
                pc,
                Operator::Ite,
                vec![equal, Expression::int(pc, 0), Expression::int(pc, -1)],
                ValueType::Int,
            );
            Expression::op(
                pc,
                Operator::Ite,
                vec![greater, Expression::int(pc, 1), inner],
                ValueType::Int,
            )
        }

        // A heap read at a symbolic address over a known-size snapshot
        // becomes a nested equality-guarded conditional over the slots.
        Operator::HeapGet => {
            let [heap, address] = operands.as_slice() else {
                return node.clone();
            };
            let ExprData::Snapshot(slots) = heap.data() else {
                return node.clone();
            };
            if address.as_constant().is_some() {
                return node.clone();
            }

            let mut chain = Expression::constant(pc, hint.default_value());
            for (index, slot) in slots.iter().enumerate() {
                let guard = address_guard(pc, address, index);
                chain = Expression::op(
                    pc,
                    Operator::Ite,
                    vec![guard, slot.clone(), chain],
                    *hint,
                );
            }
            chain
        }

        // A heap write at a symbolic address over a known-size snapshot
        // becomes a snapshot whose every slot conditionally takes the new
        // value.
        Operator::HeapPut => {
            let [heap, address, value] = operands.as_slice() else {
                return node.clone();
            };
            let ExprData::Snapshot(slots) = heap.data() else {
                return node.clone();
            };
            if address.as_constant().is_some() {
                return node.clone();
            }

            let new_slots = slots
                .iter()
                .enumerate()
                .map(|(index, slot)| {
                    let guard = address_guard(pc, address, index);
                    Expression::op(
                        pc,
                        Operator::Ite,
                        vec![guard, value.clone(), slot.clone()],
                        slot.value_type(),
                    )
                })
                .collect();
            Expression::snapshot(pc, new_slots)
        }

        // Boolean-to-int coercions become explicit conditionals, and
        // int-to-bool coercions become zero tests.
        Operator::BoolToInt => {
            let [operand] = operands.as_slice() else {
                return node.clone();
            };
            Expression::op(
                pc,
                Operator::Ite,
                vec![
                    operand.clone(),
                    Expression::int(pc, 1),
                    Expression::int(pc, 0),
                ],
                ValueType::Int,
            )
        }
        Operator::IntToBool => {
            let [operand] = operands.as_slice() else {
                return node.clone();
            };
            Expression::op(
                pc,
                Operator::NotEqual,
                vec![operand.clone(), Expression::int(pc, 0)],
                ValueType::Bool,
            )
        }

        _ => node.clone(),
    }
}

/// Builds the guard comparing a symbolic address against a known slot
/// index.
fn address_guard(pc: u32, address: &Expression, index: usize) -> Expression {
    #[allow(clippy::cast_possible_wrap)] // Slot counts are far below i64::MAX
    let slot = KnownValue::Reference(index as i64);
    Expression::op(
        pc,
        Operator::Equal,
        vec![address.clone(), Expression::constant(pc, slot)],
        ValueType::Bool,
    )
}

/// Retypes parameters still tagged undefined by unifying each with the type
/// of an actual call-site argument.
fn retype_undefined_parameters(graph: &mut UnitGraph, reachable: &[UnitId]) -> Result<()> {
    for unit in reachable {
        let Ok(found) = graph.unit(*unit) else { continue };
        let undefined: Vec<(usize, Variable)> = found
            .params()
            .as_slice()
            .iter()
            .enumerate()
            .filter(|(_, param)| param.variable.ty == ValueType::Undefined)
            .map(|(index, param)| (index, param.variable.clone()))
            .collect();
        if undefined.is_empty() {
            continue;
        }

        for (index, old_variable) in undefined {
            let Some(new_ty) = argument_type_at(graph, reachable, *unit, index) else {
                continue;
            };

            let new_variable = Variable::new(old_variable.name.clone(), new_ty);
            graph
                .unit_mut(*unit)
                .map_err(graph_error)?
                .params_mut()
                .replace_variable(index, new_variable.clone());

            rewrite_unit(graph, *unit, &mut |node| match node.data() {
                ExprData::Variable(v) if v.name == new_variable.name => {
                    Ok(Expression::variable(node.pc(), new_variable.clone()))
                }
                _ => Ok(node),
            })?;
        }
    }
    Ok(())
}

/// Finds the type of the argument supplied at `index` by any call to
/// `target` whose argument type is known.
fn argument_type_at(
    graph: &UnitGraph,
    reachable: &[UnitId],
    target: UnitId,
    index: usize,
) -> Option<ValueType> {
    for caller in reachable {
        let body = graph.unit(*caller).ok()?.body()?;
        let mut found = None;
        body.visit(&mut |node| {
            if found.is_some() {
                return;
            }
            if let ExprData::ProcessedCall(call) = node.data() {
                if call.target == target {
                    if let Some(argument) = call.arguments.get(index) {
                        let ty = argument.value_type();
                        if ty != ValueType::Undefined {
                            found = Some(ty);
                        }
                    }
                }
            }
        });
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Replaces calls carrying a non-constant heap argument with `false`.
///
/// A heap that is still symbolic after partial evaluation cannot be
/// represented to downstream solvers, so the call is conservatively
/// stripped, trading completeness for a well-formed formula.
fn strip_symbolic_heap_calls(graph: &mut UnitGraph, reachable: &[UnitId]) -> Result<()> {
    let heap_indices: std::collections::HashMap<UnitId, usize> = reachable
        .iter()
        .filter_map(|id| {
            graph.unit(*id).ok().and_then(|found| {
                found
                    .params()
                    .index_of(ParamKind::Heap { slot: None })
                    .map(|index| (*id, index))
            })
        })
        .collect();

    for unit in reachable {
        rewrite_unit(graph, *unit, &mut |node| {
            let ExprData::ProcessedCall(call) = node.data() else {
                return Ok(node);
            };
            let Some(heap_index) = heap_indices.get(&call.target) else {
                return Ok(node);
            };
            let Some(argument) = call.arguments.get(*heap_index) else {
                return Ok(node);
            };
            if matches!(argument.data(), ExprData::Snapshot(_)) {
                return Ok(node);
            }

            tracing::warn!(
                target_unit = %call.target,
                "Stripping a call with a non-constant heap argument"
            );
            Ok(Expression::boolean(node.pc(), false))
        })?;
    }
    Ok(())
}

fn graph_error(e: crate::error::execution::LocatedError) -> crate::error::transform::Error {
    crate::error::transform::Error::InconsistentGraph {
        reason: e.to_string(),
    }
}

//! This module contains the partial evaluation pass: call-site
//! specialization of units whose arguments have reduced to constants, and
//! the unboxing of fully-constant heap arguments into per-slot parameters.
//!
//! Specialized units are generated once and cached by their structural
//! signature (the original unit plus the substituted-constant map); the
//! cache lives in the pipeline's [`PassContext`] rather than in any global
//! state. The pass runs over the shared depth-first traversal and consumes
//! the pipeline's step budget; exhaustion replaces the affected unit with
//! the constant `false`, trading completeness for termination.

use std::collections::HashMap;

use crate::{
    error::transform::{Error, Result},
    problem::SatisfactionProblem,
    transform::{rewrite_unit, traversal, PassContext, Transform},
    unit::{ParamKind, SEFunction, UnitGraph, UnitId},
    value::{
        known::KnownValue,
        operator::Operator,
        ExprData,
        Expression,
        ProcessedCall,
        Variable,
    },
    watchdog::DynWatchdog,
};

/// The cache of specialized units, keyed by the original unit identity and
/// the substituted constants (by parameter index).
#[derive(Debug, Default)]
pub struct SpecializationCache {
    entries: HashMap<(UnitId, Vec<(usize, KnownValue)>), UnitId>,
    generated: usize,
}

impl SpecializationCache {
    /// Creates a new, empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a specialization, if one has been generated for this
    /// signature before.
    #[must_use]
    pub fn get(&self, original: UnitId, constants: &[(usize, KnownValue)]) -> Option<UnitId> {
        self.entries.get(&(original, constants.to_vec())).copied()
    }

    /// Records a newly generated specialization.
    pub fn insert(
        &mut self,
        original: UnitId,
        constants: Vec<(usize, KnownValue)>,
        specialized: UnitId,
    ) {
        self.entries.insert((original, constants), specialized);
    }

    /// Gets the next generation counter, for unique specialized names.
    pub fn next_generation(&mut self) -> usize {
        self.generated += 1;
        self.generated
    }
}

/// The partial evaluation pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PartialEvaluation;

impl Transform for PartialEvaluation {
    fn run(&mut self, problem: &mut SatisfactionProblem, cx: &mut PassContext) -> Result<()> {
        let roots = problem.constraints().to_vec();
        let graph = problem.graph_mut();

        let PassContext {
            budget,
            cache,
            watchdog,
            ..
        } = cx;
        let mut visitor = Evaluator {
            cache,
            watchdog,
            iterations: 0,
        };
        traversal::walk(graph, &roots, budget, &mut visitor)
    }
}

/// The traversal hooks of the partial evaluation pass.
struct Evaluator<'cx> {
    cache: &'cx mut SpecializationCache,
    watchdog: &'cx DynWatchdog,
    iterations: usize,
}

impl traversal::Visitor for Evaluator<'_> {
    fn pre(&mut self, graph: &mut UnitGraph, unit: UnitId) -> Result<()> {
        if self.iterations % self.watchdog.poll_every() == 0 && self.watchdog.should_stop() {
            return Err(Error::StoppedByWatchdog);
        }
        self.iterations += 1;
        evaluate_unit(graph, unit, self.cache)
    }

    fn max_depth(&mut self, graph: &mut UnitGraph, unit: UnitId) -> Result<()> {
        tracing::warn!(
            %unit,
            "Partial evaluation step budget exhausted; substituting false"
        );
        if let Ok(found) = graph.unit_mut(unit) {
            found.set_body(Expression::boolean(0, false));
        }
        Ok(())
    }
}

/// Partially evaluates every call in the body of `unit`.
fn evaluate_unit(
    graph: &mut UnitGraph,
    unit: UnitId,
    cache: &mut SpecializationCache,
) -> Result<()> {
    // The rewrite closure cannot reshape the graph while the body is being
    // rebuilt, so call replacements are planned first and applied second.
    let Ok(found) = graph.unit(unit) else {
        return Ok(());
    };
    let Some(body) = found.body().cloned() else {
        return Ok(());
    };

    let mut calls: Vec<ProcessedCall> = Vec::new();
    body.visit(&mut |node| {
        if let ExprData::ProcessedCall(call) = node.data() {
            calls.push(call.clone());
        }
    });

    let mut replacements: HashMap<ProcessedCall, Expression> = HashMap::new();
    for call in calls {
        if replacements.contains_key(&call) {
            continue;
        }
        if let Some(replacement) = evaluate_call(graph, &call, cache)? {
            replacements.insert(call, replacement);
        }
    }

    if replacements.is_empty() {
        return Ok(());
    }

    rewrite_unit(graph, unit, &mut |node| match node.data() {
        ExprData::ProcessedCall(call) => match replacements.get(call) {
            Some(replacement) => Ok(replacement.clone()),
            None => Ok(node),
        },
        _ => Ok(node),
    })
}

/// Computes the replacement for one call, if partial evaluation applies.
fn evaluate_call(
    graph: &mut UnitGraph,
    call: &ProcessedCall,
    cache: &mut SpecializationCache,
) -> Result<Option<Expression>> {
    // Heap unboxing first: it turns a snapshot argument into scalar
    // constants, which the specialization below then substitutes away.
    let call = match unbox_heap(graph, call, cache)? {
        Some(unboxed) => unboxed,
        None => call.clone(),
    };

    let Ok(target) = graph.unit(call.target) else {
        return Ok(None);
    };
    if target.body().is_none() {
        return Ok(None);
    }
    let params = target.params().as_slice().to_vec();

    let mut constants: Vec<(usize, KnownValue)> = Vec::new();
    for (index, argument) in call.arguments.iter().enumerate() {
        if index >= params.len() {
            break;
        }
        if let Some(value) = argument.as_constant() {
            constants.push((index, value));
        }
    }
    if constants.is_empty() {
        return Ok(Some(Expression::processed(0, call)));
    }

    let specialized = specialize(graph, call.target, &constants, cache)?;
    let remaining_arguments: Vec<Expression> = call
        .arguments
        .iter()
        .enumerate()
        .filter(|(index, _)| !constants.iter().any(|(i, _)| i == index))
        .map(|(_, argument)| argument.clone())
        .collect();

    Ok(Some(Expression::processed(
        0,
        ProcessedCall {
            target: specialized,
            arguments: remaining_arguments,
        },
    )))
}

/// Gets (or generates) the unit specializing `original` with the provided
/// `constants` pre-substituted and removed from its signature.
fn specialize(
    graph: &mut UnitGraph,
    original: UnitId,
    constants: &[(usize, KnownValue)],
    cache: &mut SpecializationCache,
) -> Result<UnitId> {
    if let Some(cached) = cache.get(original, constants) {
        return Ok(cached);
    }

    let found = graph.unit(original).map_err(graph_error)?;
    let name = format!("{}#s{}", found.name(), cache.next_generation());
    let params = found.params().as_slice().to_vec();
    let body = found
        .body()
        .cloned()
        .expect("Specialization requires a body");

    let mut bindings: HashMap<Variable, Expression> = HashMap::new();
    for (index, value) in constants {
        if let Some(param) = params.get(*index) {
            bindings.insert(param.variable.clone(), Expression::constant(0, *value));
        }
    }

    let mut specialized = SEFunction::new(name);
    for (index, param) in params.iter().enumerate() {
        if !constants.iter().any(|(i, _)| *i == index) {
            specialized.params_mut().declare(param.clone());
        }
    }
    specialized.set_body(body.substitute(&bindings));
    specialized.mark_generated();

    let id = graph.insert(specialized);
    cache.insert(original, constants.to_vec(), id);
    Ok(id)
}

/// Unboxes a fully-constant heap snapshot argument into per-slot
/// parameters.
///
/// Unboxing applies when the callee takes the whole heap as one parameter,
/// the call's heap argument is a snapshot whose every slot is constant,
/// and the callee's body only uses the heap through reads at constant
/// addresses. The generated variant takes one parameter per read slot and
/// the call passes the corresponding snapshot slots as scalars.
fn unbox_heap(
    graph: &mut UnitGraph,
    call: &ProcessedCall,
    cache: &mut SpecializationCache,
) -> Result<Option<ProcessedCall>> {
    let Ok(target) = graph.unit(call.target) else {
        return Ok(None);
    };
    let params = target.params().as_slice().to_vec();
    let Some(heap_index) = params
        .iter()
        .position(|param| param.kind == ParamKind::Heap { slot: None })
    else {
        return Ok(None);
    };
    let Some(heap_argument) = call.arguments.get(heap_index) else {
        return Ok(None);
    };
    let ExprData::Snapshot(slots) = heap_argument.data() else {
        return Ok(None);
    };
    if !slots.iter().all(|slot| slot.as_constant().is_some()) {
        return Ok(None);
    }

    let heap_variable = params[heap_index].variable.clone();
    let Some(body) = target.body().cloned() else {
        return Ok(None);
    };
    let Some(read_slots) = constant_heap_reads(&body, &heap_variable) else {
        return Ok(None);
    };

    // Build the unboxed variant, cached by name so repeated calls share it.
    let unboxed_name = format!("{}#h", target.name());
    let unboxed_id = match graph.lookup(&unboxed_name) {
        Some(existing) => existing,
        None => {
            let mut unboxed = SEFunction::new(&unboxed_name);
            for (index, param) in params.iter().enumerate() {
                if index == heap_index {
                    continue;
                }
                unboxed.params_mut().declare(param.clone());
            }
            let mut slot_variables: HashMap<usize, Variable> = HashMap::new();
            for slot in &read_slots {
                let (variable, _) = unboxed.require(
                    ParamKind::Heap { slot: Some(*slot) },
                    crate::value::types::ValueType::Undefined,
                );
                slot_variables.insert(*slot, variable);
            }

            let new_body = body.rewrite(&mut |node| match node.data() {
                ExprData::Op {
                    operator: Operator::HeapGet,
                    operands,
                    ..
                } => match (operands[0].data(), slot_of(&operands[1])) {
                    (ExprData::Variable(v), Some(slot)) if v == &heap_variable => {
                        match slot_variables.get(&slot) {
                            Some(variable) => Expression::variable(node.pc(), variable.clone()),
                            None => node,
                        }
                    }
                    _ => node,
                },
                _ => node,
            });
            unboxed.set_body(new_body);
            unboxed.mark_generated();
            cache.next_generation();
            graph.insert(unboxed)
        }
    };

    let mut arguments: Vec<Expression> = call
        .arguments
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != heap_index)
        .map(|(_, argument)| argument.clone())
        .collect();
    for slot in &read_slots {
        let value = slots
            .get(*slot)
            .cloned()
            .unwrap_or_else(|| Expression::int(0, 0));
        arguments.push(value);
    }

    Ok(Some(ProcessedCall {
        target: unboxed_id,
        arguments,
    }))
}

/// Collects the constant addresses at which `body` reads the heap variable,
/// or [`None`] if the heap is used any other way.
fn constant_heap_reads(body: &Expression, heap: &Variable) -> Option<Vec<usize>> {
    let mut slots: Vec<usize> = Vec::new();
    let mut clean = true;

    body.visit(&mut |node| match node.data() {
        ExprData::Op {
            operator: Operator::HeapGet,
            operands,
            ..
        } => {
            if let (ExprData::Variable(v), Some(slot)) =
                (operands[0].data(), slot_of(&operands[1]))
            {
                if v == heap {
                    if !slots.contains(&slot) {
                        slots.push(slot);
                    }
                    return;
                }
            }
            if operands.iter().any(|operand| operand.mentions(heap)) {
                clean = false;
            }
        }
        ExprData::Op { operands, .. }
            if operands
                .iter()
                .any(|o| matches!(o.data(), ExprData::Variable(v) if v == heap)) =>
        {
            clean = false;
        }
        ExprData::ProcessedCall(call)
            if call
                .arguments
                .iter()
                .any(|a| matches!(a.data(), ExprData::Variable(v) if v == heap)) =>
        {
            clean = false;
        }
        _ => (),
    });

    if clean {
        slots.sort_unstable();
        Some(slots)
    } else {
        None
    }
}

/// Extracts the constant slot index from an address expression.
fn slot_of(address: &Expression) -> Option<usize> {
    address
        .as_constant()
        .and_then(|value| value.as_i64())
        .and_then(|value| usize::try_from(value).ok())
}

fn graph_error(e: crate::error::execution::LocatedError) -> Error {
    Error::InconsistentGraph {
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod test {
    use crate::{
        problem::SatisfactionProblem,
        transform::{partial_eval::PartialEvaluation, Config, PassContext, Transform},
        unit::{ParamKind, UnitGraph},
        value::{
            known::KnownValue,
            operator::Operator,
            types::ValueType,
            ExprData,
            Expression,
            ProcessedCall,
        },
        watchdog::LazyWatchdog,
    };

    #[test]
    fn calls_with_constant_arguments_are_specialized() -> anyhow::Result<()> {
        let mut graph = UnitGraph::new();
        let root = graph.get_or_create("root");
        let callee = graph.get_or_create("target");

        let (x, _) = graph
            .unit_mut(callee)?
            .require(ParamKind::Stack { depth: 0 }, ValueType::Int);
        let (y, _) = graph
            .unit_mut(callee)?
            .require(ParamKind::Stack { depth: 1 }, ValueType::Int);
        graph.unit_mut(callee)?.set_body(Expression::op(
            0,
            Operator::Add,
            vec![Expression::variable(0, x), Expression::variable(0, y)],
            ValueType::Int,
        ));
        graph.unit_mut(root)?.set_body(Expression::processed(
            0,
            ProcessedCall {
                target: callee,
                arguments: vec![
                    Expression::int(0, 4),
                    Expression::variable(
                        0,
                        crate::value::Variable::new("free", ValueType::Int),
                    ),
                ],
            },
        ));

        let mut problem = SatisfactionProblem::new(graph, vec![root], vec![]);
        let mut cx = PassContext::new(
            Config::default(),
            problem.graph(),
            LazyWatchdog.in_rc(),
        );
        PartialEvaluation.run(&mut problem, &mut cx)?;

        // The root now calls a generated unit with only the free argument.
        let body = problem.graph().unit(root)?.body().unwrap().clone();
        let ExprData::ProcessedCall(call) = body.data() else {
            panic!("Root body is not a call");
        };
        assert_ne!(call.target, callee);
        assert_eq!(call.arguments.len(), 1);

        let specialized = problem.graph().unit(call.target)?;
        assert!(specialized.is_generated());
        assert_eq!(specialized.params().len(), 1);

        // The constant has been substituted into the specialized body.
        let specialized_body = specialized.body().unwrap();
        assert!(specialized_body.mentions(&crate::value::Variable::new(
            "target_s1",
            ValueType::Int
        )));
        Ok(())
    }

    #[test]
    fn constant_heap_arguments_are_unboxed_into_slot_parameters() -> anyhow::Result<()> {
        let mut graph = UnitGraph::new();
        let root = graph.get_or_create("root");
        let callee = graph.get_or_create("reader");

        let (heap_var, _) = graph
            .unit_mut(callee)?
            .require(ParamKind::Heap { slot: None }, ValueType::Reference);
        // The callee reads heap slot 2.
        graph.unit_mut(callee)?.set_body(Expression::op(
            0,
            Operator::HeapGet,
            vec![
                Expression::variable(0, heap_var),
                Expression::constant(0, KnownValue::Reference(2)),
            ],
            ValueType::Int,
        ));

        let snapshot = Expression::snapshot(
            0,
            vec![
                Expression::int(0, 3),
                Expression::int(0, 1),
                Expression::int(0, 77),
            ],
        );
        graph.unit_mut(root)?.set_body(Expression::processed(
            0,
            ProcessedCall {
                target: callee,
                arguments: vec![snapshot],
            },
        ));

        let mut problem = SatisfactionProblem::new(graph, vec![root], vec![]);
        let mut cx = PassContext::new(
            Config::default(),
            problem.graph(),
            LazyWatchdog.in_rc(),
        );
        PartialEvaluation.run(&mut problem, &mut cx)?;

        // The heap argument is gone; the slot value travelled as a scalar,
        // and specialization then folded it away entirely.
        let body = problem.graph().unit(root)?.body().unwrap().clone();
        let ExprData::ProcessedCall(call) = body.data() else {
            panic!("Root body is not a call");
        };
        assert!(call.arguments.is_empty());

        let final_target = problem.graph().unit(call.target)?;
        assert!(final_target.is_generated());
        assert_eq!(final_target.body(), Some(&Expression::int(0, 77)));
        Ok(())
    }
}

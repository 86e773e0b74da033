//! This module contains the parameter back-propagation fixed point: the
//! work-queue computation that fills every call site's argument list once
//! the callee requirements discovered by translation are known.
//!
//! # The Protocol
//!
//! When a unit's body contains a call whose callee declares more parameters
//! than the call supplies, the caller must supply the shortfall. Each
//! missing requirement is resolved against the call site's frozen state;
//! anything the frozen state cannot answer becomes a parameter of the
//! caller itself (translated by kind), exactly as an opcode-triggered
//! unclear read would have, and every unit observing the caller is
//! re-enqueued so the growth cascades.
//!
//! Termination is guaranteed because each request strictly grows a unit's
//! declared-parameter set, which is bounded by the distinct stack depths,
//! local slots, field references and heap addresses the program actually
//! touches, and the set of units is finite per problem.

use std::collections::{HashMap, VecDeque};

use crate::{
    error::{container::Locatable, execution, Result},
    unit::{CallSiteId, FrozenState, ParamKind, Parameter, UnitGraph, UnitId},
    value::{ExprData, Expression, FunctionCall},
    watchdog::DynWatchdog,
};

/// Runs the fixed point over every unit in `graph` until no call site is
/// missing arguments anywhere.
///
/// # Errors
///
/// Returns [`Err`] if the graph is inconsistent or the watchdog stops the
/// computation.
pub fn fixed_point(graph: &mut UnitGraph, watchdog: &DynWatchdog) -> Result<()> {
    let mut queue: VecDeque<UnitId> = graph.ids().into();
    let poll_interval = watchdog.poll_every();
    let mut iterations = 0usize;

    while let Some(unit) = queue.pop_front() {
        if iterations % poll_interval == 0 && watchdog.should_stop() {
            return Err(execution::Error::StoppedByWatchdog.locate(0).into());
        }
        iterations += 1;

        if process_unit(graph, unit)? {
            // The unit's own signature grew: everything calling it now has
            // a call with missing arguments.
            for observer in graph.unit(unit)?.observers().to_vec() {
                queue.push_back(observer);
            }
        }
    }
    Ok(())
}

/// Extends the argument lists of every under-supplied call in the body of
/// `unit`, returning whether the unit's own parameter set grew in the
/// process.
fn process_unit(graph: &mut UnitGraph, unit: UnitId) -> Result<bool> {
    let Some(body) = graph.unit(unit)?.body().cloned() else {
        return Ok(false);
    };

    // Phase one: find the calls that are missing arguments.
    let mut shortfalls: Vec<(CallSiteId, UnitId, usize)> = Vec::new();
    body.visit(&mut |node| {
        if let ExprData::Call(call) = node.data() {
            shortfalls.push((call.site, call.target, call.arguments.len()));
        }
    });

    // Phase two: resolve the missing requirements, possibly growing this
    // unit's own parameters.
    let mut extensions: HashMap<CallSiteId, Vec<Expression>> = HashMap::new();
    let mut grew = false;
    for (site, target, supplied) in shortfalls {
        let params = graph.unit(target)?.params().as_slice().to_vec();
        if supplied >= params.len() {
            continue;
        }
        let state = graph.site(site)?.state.clone();

        let mut extra = Vec::with_capacity(params.len() - supplied);
        for param in &params[supplied..] {
            extra.push(resolve(graph, unit, &state, param, &mut grew)?);
        }
        extensions.insert(site, extra);
    }

    if extensions.is_empty() {
        return Ok(grew);
    }

    // Phase three: rebuild the body with the extended argument lists.
    let new_body = body.rewrite(&mut |node| match node.data() {
        ExprData::Call(call) => match extensions.get(&call.site) {
            Some(extra) => {
                let mut arguments = call.arguments.clone();
                arguments.extend(extra.iter().cloned());
                Expression::call(
                    node.pc(),
                    FunctionCall {
                        target: call.target,
                        kind: call.kind,
                        arguments,
                        site: call.site,
                    },
                )
            }
            None => node,
        },
        _ => node,
    });
    graph.unit_mut(unit)?.set_body(new_body);
    Ok(grew)
}

/// Resolves one missing callee requirement at a call site of `unit`.
///
/// Clear sources (the frozen state) are consulted first; an unclear source
/// becomes a parameter of `unit` itself, keyed so that the request keeps
/// propagating outwards through `unit`'s own callers.
fn resolve(
    graph: &mut UnitGraph,
    unit: UnitId,
    state: &FrozenState,
    param: &Parameter,
    grew: &mut bool,
) -> Result<Expression> {
    let ty = param.variable.ty;
    match param.kind {
        ParamKind::Stack { depth } => {
            let len = state.stack.len();
            if depth < len {
                return Ok(state.stack[len - 1 - depth].clone());
            }
            // The requirement reaches below the frozen stack: it is the
            // caller's own incoming stack, past whatever the caller popped
            // itself during translation.
            let base = graph.unit(unit)?.incoming_stack();
            let (variable, new) = graph
                .unit_mut(unit)?
                .require(ParamKind::Stack { depth: base + (depth - len) }, ty);
            *grew |= new;
            Ok(Expression::variable(0, variable))
        }
        ParamKind::Local { slot, frame } => {
            if let Some(value) = state.locals.get(&(frame, slot)) {
                return Ok(value.clone());
            }
            let (variable, new) = graph
                .unit_mut(unit)?
                .require(ParamKind::Local { slot, frame }, ty);
            *grew |= new;
            Ok(Expression::variable(0, variable))
        }
        ParamKind::Static { field } => {
            if let Some(value) = state.statics.get(&field) {
                return Ok(value.clone());
            }
            let (variable, new) = graph
                .unit_mut(unit)?
                .require(ParamKind::Static { field }, ty);
            *grew |= new;
            Ok(Expression::variable(0, variable))
        }
        ParamKind::Heap { slot } => {
            if let Some(heap) = &state.heap {
                match slot {
                    None => return Ok(heap.clone()),
                    Some(index) => {
                        if let ExprData::Snapshot(slots) = heap.data() {
                            if let Some(value) = slots.get(index) {
                                return Ok(value.clone());
                            }
                        }
                    }
                }
            }
            let (variable, new) = graph.unit_mut(unit)?.require(ParamKind::Heap { slot }, ty);
            *grew |= new;
            Ok(Expression::variable(0, variable))
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        unit::{CallSite, FrozenState, ParamKind, UnitGraph},
        value::{types::ValueType, CallKind, ExprData, Expression, FunctionCall},
        watchdog::LazyWatchdog,
    };

    #[test]
    fn arguments_are_filled_from_the_frozen_stack() -> anyhow::Result<()> {
        let mut graph = UnitGraph::new();
        let caller = graph.get_or_create("caller");
        let callee = graph.get_or_create("callee");

        // The callee popped one value beyond its own pushes.
        graph
            .unit_mut(callee)?
            .require(ParamKind::Stack { depth: 0 }, ValueType::Int);
        graph.unit_mut(callee)?.set_body(Expression::boolean(0, false));

        // The caller froze one stack value at the call.
        let site = graph.add_site(CallSite {
            caller,
            state: FrozenState {
                stack: vec![Expression::int(0, 42)],
                ..FrozenState::default()
            },
        });
        graph.unit_mut(callee)?.observe(caller);
        graph.unit_mut(caller)?.set_body(Expression::call(
            0,
            FunctionCall {
                target: callee,
                kind: CallKind::Invoke,
                arguments: Vec::new(),
                site,
            },
        ));

        super::fixed_point(&mut graph, &LazyWatchdog.in_rc())?;

        let body = graph.unit(caller)?.body().unwrap().clone();
        let ExprData::Call(call) = body.data() else {
            panic!("Caller body is not a call");
        };
        assert_eq!(call.arguments, vec![Expression::int(0, 42)]);
        assert!(graph.unit(caller)?.params().is_empty());
        Ok(())
    }

    #[test]
    fn unanswerable_requirements_escalate_to_the_caller() -> anyhow::Result<()> {
        let mut graph = UnitGraph::new();
        let caller = graph.get_or_create("caller");
        let callee = graph.get_or_create("callee");

        graph
            .unit_mut(callee)?
            .require(ParamKind::Stack { depth: 0 }, ValueType::Int);
        graph.unit_mut(callee)?.set_body(Expression::boolean(0, false));

        // The caller froze an empty stack: it cannot answer the request
        // and must declare its own stack parameter.
        let site = graph.add_site(CallSite {
            caller,
            state: FrozenState::default(),
        });
        graph.unit_mut(callee)?.observe(caller);
        graph.unit_mut(caller)?.set_body(Expression::call(
            0,
            FunctionCall {
                target: callee,
                kind: CallKind::Invoke,
                arguments: Vec::new(),
                site,
            },
        ));

        super::fixed_point(&mut graph, &LazyWatchdog.in_rc())?;

        let caller_unit = graph.unit(caller)?;
        assert_eq!(caller_unit.params().len(), 1);
        assert!(caller_unit
            .params()
            .find(ParamKind::Stack { depth: 0 })
            .is_some());

        let body = caller_unit.body().unwrap().clone();
        let ExprData::Call(call) = body.data() else {
            panic!("Caller body is not a call");
        };
        assert_eq!(call.arguments.len(), 1);
        assert!(matches!(call.arguments[0].data(), ExprData::Variable(_)));
        Ok(())
    }

    #[test]
    fn growth_cascades_through_a_chain_of_callers() -> anyhow::Result<()> {
        // outer calls middle, middle calls inner. Inner requires a local of
        // a frame neither middle nor outer froze, so the requirement must
        // propagate through middle into outer.
        let mut graph = UnitGraph::new();
        let outer = graph.get_or_create("outer");
        let middle = graph.get_or_create("middle");
        let inner = graph.get_or_create("inner");

        let frame = crate::vm::frame::FrameId(7);
        graph
            .unit_mut(inner)?
            .require(ParamKind::Local { slot: 2, frame }, ValueType::Int);
        graph.unit_mut(inner)?.set_body(Expression::boolean(0, false));

        let inner_site = graph.add_site(CallSite {
            caller: middle,
            state: FrozenState::default(),
        });
        graph.unit_mut(inner)?.observe(middle);
        graph.unit_mut(middle)?.set_body(Expression::call(
            0,
            FunctionCall {
                target: inner,
                kind: CallKind::Invoke,
                arguments: Vec::new(),
                site: inner_site,
            },
        ));

        let middle_site = graph.add_site(CallSite {
            caller: outer,
            state: FrozenState::default(),
        });
        graph.unit_mut(middle)?.observe(outer);
        graph.unit_mut(outer)?.set_body(Expression::call(
            0,
            FunctionCall {
                target: middle,
                kind: CallKind::Invoke,
                arguments: Vec::new(),
                site: middle_site,
            },
        ));

        super::fixed_point(&mut graph, &LazyWatchdog.in_rc())?;

        // All three units now declare the same requirement, each under its
        // own variable.
        for id in [outer, middle, inner] {
            assert!(
                graph
                    .unit(id)?
                    .params()
                    .find(ParamKind::Local { slot: 2, frame })
                    .is_some(),
                "unit {id} is missing the propagated local requirement"
            );
        }

        // And every call site is fully supplied.
        let middle_body = graph.unit(middle)?.body().unwrap().clone();
        let ExprData::Call(call) = middle_body.data() else {
            panic!("Middle body is not a call");
        };
        assert_eq!(call.arguments.len(), 1);
        Ok(())
    }
}

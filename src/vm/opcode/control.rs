//! The mapping arms for control transfers: conditional and unconditional
//! jumps, multi-way switches and returns.
//!
//! Control transfers never push to the operand stack. They assign the owning
//! unit's terminal expression: a conditional jump becomes an ITE over calls
//! to the jump-target unit and the fall-through unit, an unconditional
//! transfer becomes a direct call, and a return becomes a call into the
//! continuation unit at the caller's post-call program point.

use crate::{
    error::Result,
    value::{
        known::KnownValue,
        operator::Operator,
        types::ValueType,
        CallKind,
        Expression,
    },
    vm::{context::Context, SymbolicVM},
};

/// Executes a conditional jump comparing the top of the stack against zero
/// (or null, for reference conditions).
///
/// # Errors
///
/// Returns [`Err`] if the jump target does not start a basic block.
pub fn conditional_zero(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    condition: Operator,
    target: u32,
) -> Result<()> {
    let value = ctx.pop(vm.graph_mut(), pc, ValueType::Int)?;
    let zero = match value.value_type() {
        ValueType::Reference => Expression::constant(
            pc,
            KnownValue::Reference(crate::constant::NULL_REFERENCE_ADDRESS),
        ),
        _ => Expression::int(pc, 0),
    };
    let predicate = Expression::op(pc, condition, vec![value, zero], ValueType::Bool);
    branch(vm, ctx, pc, predicate, target)
}

/// Executes a conditional jump comparing the top two stack values.
///
/// The second-popped value is the left operand of the comparison.
///
/// # Errors
///
/// Returns [`Err`] if the jump target does not start a basic block.
pub fn conditional_compare(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    condition: Operator,
    target: u32,
) -> Result<()> {
    let right = ctx.pop(vm.graph_mut(), pc, ValueType::Int)?;
    let left = ctx.pop(vm.graph_mut(), pc, ValueType::Int)?;
    let predicate = Expression::op(pc, condition, vec![left, right], ValueType::Bool);
    branch(vm, ctx, pc, predicate, target)
}

/// Assigns the terminal ITE for a conditional jump: the true branch calls
/// the jump-target unit and the false branch calls the fall-through unit.
fn branch(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    predicate: Expression,
    target: u32,
) -> Result<()> {
    let frame = ctx.frame();
    let state = ctx.freeze();

    let target_unit = vm.block_unit(frame, target, pc)?;
    let taken = vm.record_call(ctx.unit(), target_unit, CallKind::Invoke, state.clone(), pc)?;

    let fallthrough_unit = vm.fallthrough_unit(frame, pc)?;
    let not_taken = vm.record_call(ctx.unit(), fallthrough_unit, CallKind::Invoke, state, pc)?;

    let terminal = Expression::op(
        pc,
        Operator::Ite,
        vec![predicate, taken, not_taken],
        ValueType::Undefined,
    );
    ctx.set_terminal(terminal);
    Ok(())
}

/// Executes an unconditional jump by assigning a direct call to the target
/// block's unit as the terminal expression.
///
/// # Errors
///
/// Returns [`Err`] if the jump target does not start a basic block.
pub fn goto(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32, target: u32) -> Result<()> {
    let target_unit = vm.block_unit(ctx.frame(), target, pc)?;
    let call = vm.record_call(ctx.unit(), target_unit, CallKind::Invoke, ctx.freeze(), pc)?;
    ctx.set_terminal(call);
    Ok(())
}

/// Executes a dense multi-way switch.
///
/// # Errors
///
/// Returns [`Err`] if any jump target does not start a basic block.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn table_switch(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    low: i32,
    targets: &[u32],
    default: u32,
) -> Result<()> {
    let pairs: Vec<(i32, u32)> = targets
        .iter()
        .enumerate()
        .map(|(offset, target)| (low + offset as i32, *target))
        .collect();
    switch(vm, ctx, pc, &pairs, default)
}

/// Executes a sparse multi-way switch.
///
/// # Errors
///
/// Returns [`Err`] if any jump target does not start a basic block.
pub fn lookup_switch(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    pairs: &[(i32, u32)],
    default: u32,
) -> Result<()> {
    switch(vm, ctx, pc, pairs, default)
}

/// Lowers a multi-way switch to a right-associated chain of
/// equality-guarded ITEs terminating in the default target.
///
/// The chain is built by folding from the default upwards through the cases
/// in ascending case order, so the lowest case ends up innermost (tested
/// last) and the highest case outermost.
fn switch(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    pairs: &[(i32, u32)],
    default: u32,
) -> Result<()> {
    let key = ctx.pop(vm.graph_mut(), pc, ValueType::Int)?;
    let frame = ctx.frame();
    let state = ctx.freeze();

    let default_unit = vm.block_unit(frame, default, pc)?;
    let mut chain =
        vm.record_call(ctx.unit(), default_unit, CallKind::Invoke, state.clone(), pc)?;

    let mut ordered: Vec<(i32, u32)> = pairs.to_vec();
    ordered.sort_by_key(|(case, _)| *case);

    for (case, target) in ordered {
        let target_unit = vm.block_unit(frame, target, pc)?;
        let call = vm.record_call(ctx.unit(), target_unit, CallKind::Invoke, state.clone(), pc)?;
        let guard = Expression::op(
            pc,
            Operator::Equal,
            vec![key.clone(), Expression::int(pc, case)],
            ValueType::Bool,
        );
        chain = Expression::op(
            pc,
            Operator::Ite,
            vec![guard, call, chain],
            ValueType::Undefined,
        );
    }

    ctx.set_terminal(chain);
    Ok(())
}

/// Executes a return from the current method.
///
/// In a non-root frame the return is wired into the specific continuation
/// unit at the caller's post-call program point, looked up through the
/// caller frame and the basic block covering the return address; distinct
/// call sites to the same callee therefore have independent continuations.
/// In the root frame the returned value itself becomes the unit's terminal
/// expression, as there is nothing to continue into.
///
/// # Errors
///
/// Returns [`Err`] if the continuation's block cannot be found.
pub fn method_return(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    ty: Option<ValueType>,
) -> Result<()> {
    let value = match ty {
        Some(ty) => Some(ctx.pop(vm.graph_mut(), pc, ty)?),
        None => None,
    };

    let frame = vm.frames().get(ctx.frame())?.clone();
    match (frame.parent, frame.return_pc) {
        (Some(parent), Some(return_pc)) => {
            let continuation = vm.block_unit(parent, return_pc, pc)?;
            let mut state = ctx.freeze();
            state.stack = value.into_iter().collect();
            let call = vm.record_call(ctx.unit(), continuation, CallKind::Return, state, pc)?;
            ctx.set_terminal(call);
        }
        _ => {
            // A root return: the constraint's value is the terminal itself.
            let terminal =
                value.unwrap_or_else(|| Expression::constant(pc, KnownValue::Bool(true)));
            ctx.set_terminal(terminal);
        }
    }
    Ok(())
}

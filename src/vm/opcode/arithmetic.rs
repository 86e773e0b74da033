//! The mapping arms for arithmetic, bitwise and shift operations.

use crate::{
    error::Result,
    value::{operator::Operator, types::ValueType, Expression},
    vm::{context::Context, SymbolicVM},
};

/// Executes a typed binary operation.
///
/// # Semantics
///
/// | Stack Index | Input | Output       |
/// | :---------: | :---: | :----------: |
/// | 1           | `b`   | `a <op> b`   |
/// | 2           | `a`   |              |
///
/// The second-popped value is the left operand. Results of `ADD` and `MUL`
/// are stack-type normalized: sub-int operand widths produce an int-typed
/// result, mirroring the stack machine's promotion rules.
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn binary(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    operator: Operator,
    ty: ValueType,
) -> Result<()> {
    let right = ctx.pop(vm.graph_mut(), pc, ty)?;
    let left = ctx.pop(vm.graph_mut(), pc, ty)?;

    let hint = match operator {
        Operator::Add | Operator::Mul => ty.stack_type(),
        _ => ty,
    };
    let result = Expression::op(pc, operator, vec![left, right], hint);
    ctx.push(pc, result)?;
    Ok(())
}

/// Executes an arithmetic negation.
///
/// # Semantics
///
/// | Stack Index | Input | Output |
/// | :---------: | :---: | :----: |
/// | 1           | `a`   | `-a`   |
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn negate(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32, ty: ValueType) -> Result<()> {
    let value = ctx.pop(vm.graph_mut(), pc, ty)?;
    let result = Expression::op(pc, Operator::Neg, vec![value], ty.stack_type());
    ctx.push(pc, result)?;
    Ok(())
}

/// Increments an integer local variable slot by a signed immediate without
/// touching the operand stack.
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn increment_local(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    slot: u16,
    delta: i16,
) -> Result<()> {
    let current = ctx.local(vm.graph_mut(), pc, slot, ValueType::Int)?;
    let incremented = Expression::op(
        pc,
        Operator::Add,
        vec![current, Expression::int(pc, i32::from(delta))],
        ValueType::Int,
    );
    ctx.set_local(slot, incremented);
    Ok(())
}

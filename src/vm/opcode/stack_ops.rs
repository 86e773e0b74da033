//! The mapping arms for constants, local variable access and stack
//! shuffling.

use crate::{
    error::Result,
    value::{known::KnownValue, types::ValueType, Expression},
    vm::{context::Context, SymbolicVM},
};

/// Pushes an immediate constant, widened to its stack representation.
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn push_constant(
    _vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    value: KnownValue,
) -> Result<()> {
    ctx.push(pc, Expression::constant(pc, value.widen_to_stack()))?;
    Ok(())
}

/// Pushes the null reference.
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn push_null(_vm: &mut SymbolicVM, ctx: &mut Context, pc: u32) -> Result<()> {
    ctx.push(
        pc,
        Expression::constant(
            pc,
            KnownValue::Reference(crate::constant::NULL_REFERENCE_ADDRESS),
        ),
    )?;
    Ok(())
}

/// Pushes a loadable constant resolved through the constant pool.
///
/// # Errors
///
/// Returns [`Err`] if the pool entry does not exist or is not a loadable
/// value.
pub fn load_pool_constant(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    index: u16,
) -> Result<()> {
    let value = vm.program().pool().value_at(index, pc)?;
    ctx.push(pc, Expression::constant(pc, value.widen_to_stack()))?;
    Ok(())
}

/// Loads a local variable slot onto the operand stack.
///
/// Reading a slot that has not been written in this block synthesizes a
/// fresh named parameter of the requested type and registers it as a
/// requirement of the owning unit.
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn load_local(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    slot: u16,
    ty: ValueType,
) -> Result<()> {
    let value = ctx.local(vm.graph_mut(), pc, slot, ty)?;
    ctx.push(pc, value)?;
    Ok(())
}

/// Stores the top of the operand stack into a local variable slot.
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn store_local(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    slot: u16,
    ty: ValueType,
) -> Result<()> {
    let value = ctx.pop(vm.graph_mut(), pc, ty)?;
    ctx.set_local(slot, value);
    Ok(())
}

/// Discards the top of the operand stack.
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn discard(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32) -> Result<()> {
    ctx.pop(vm.graph_mut(), pc, ValueType::Undefined)?;
    Ok(())
}

/// Duplicates the top of the operand stack.
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn duplicate(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32) -> Result<()> {
    let value = ctx.pop(vm.graph_mut(), pc, ValueType::Undefined)?;
    ctx.push(pc, value.clone())?;
    ctx.push(pc, value)?;
    Ok(())
}

/// Swaps the top two operand stack values.
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn swap(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32) -> Result<()> {
    if ctx.stack_mut().swap_top() {
        return Ok(());
    }

    // Not enough concrete values: synthesize through pops so that underflow
    // parameters are discovered in the usual way.
    let top = ctx.pop(vm.graph_mut(), pc, ValueType::Undefined)?;
    let below = ctx.pop(vm.graph_mut(), pc, ValueType::Undefined)?;
    ctx.push(pc, top)?;
    ctx.push(pc, below)?;
    Ok(())
}

//! The mapping arm for numeric conversions.

use crate::{
    error::Result,
    value::{operator::Operator, types::ValueType, Expression},
    vm::{context::Context, SymbolicVM},
};

/// Executes a numeric conversion of the top of the operand stack.
///
/// # Semantics
///
/// | Stack Index | Input | Output          |
/// | :---------: | :---: | :-------------: |
/// | 1           | `a`   | `a as <target>` |
///
/// A cast to a type no larger than the operand's stack representation is a
/// no-op when the operand is already exact at the target type; everything
/// else becomes an explicit `CAST` node whose truncation or widening the
/// constant evaluator performs at the declared bit-width.
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn convert(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    from: ValueType,
    to: ValueType,
) -> Result<()> {
    let value = ctx.pop(vm.graph_mut(), pc, from)?;

    // Already exact at the target: nothing to do.
    if value.value_type() == to {
        ctx.push(pc, value)?;
        return Ok(());
    }

    let result = Expression::op(pc, Operator::Cast(to), vec![value], to);
    ctx.push(pc, result)?;
    Ok(())
}

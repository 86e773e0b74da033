//! This module contains the instruction-to-expression mapping: a total
//! function from every decoded opcode to a state transition over the
//! executing block's [`Context`].
//!
//! The mapping is grouped by opcode category, with one module per category.
//! Every arm either mutates the context (stack push/pop, local write, heap
//! PUT) or assigns the owning unit's terminal expression (control
//! transfers); reaching an opcode the mapping does not know is an
//! incoherent-program condition.

pub mod arithmetic;
pub mod compare;
pub mod control;
pub mod convert;
pub mod object;
pub mod stack_ops;

use crate::{
    bytecode::{instruction::Instruction, opcode::Opcode},
    error::Result,
    vm::{context::Context, SymbolicVM},
};

/// Executes one decoded instruction against the provided context,
/// dispatching to the category modules.
///
/// # Errors
///
/// Returns [`Err`] if the instruction reveals the program to be incoherent
/// or if the machine state does not allow the instruction to execute.
pub fn execute(vm: &mut SymbolicVM, ctx: &mut Context, instr: &Instruction) -> Result<()> {
    let pc = instr.pc;
    match &instr.opcode {
        Opcode::Const { value } => stack_ops::push_constant(vm, ctx, pc, *value),
        Opcode::ConstNull => stack_ops::push_null(vm, ctx, pc),
        Opcode::Ldc { index } => stack_ops::load_pool_constant(vm, ctx, pc, *index),
        Opcode::Load { slot, ty } => stack_ops::load_local(vm, ctx, pc, *slot, *ty),
        Opcode::Store { slot, ty } => stack_ops::store_local(vm, ctx, pc, *slot, *ty),
        Opcode::Iinc { slot, delta } => arithmetic::increment_local(vm, ctx, pc, *slot, *delta),
        Opcode::Pop => stack_ops::discard(vm, ctx, pc),
        Opcode::Dup => stack_ops::duplicate(vm, ctx, pc),
        Opcode::Swap => stack_ops::swap(vm, ctx, pc),
        Opcode::Binary { operator, ty } => arithmetic::binary(vm, ctx, pc, *operator, *ty),
        Opcode::Neg { ty } => arithmetic::negate(vm, ctx, pc, *ty),
        Opcode::Convert { from, to } => convert::convert(vm, ctx, pc, *from, *to),
        Opcode::Compare { kind } => compare::three_way(vm, ctx, pc, *kind),
        Opcode::IfZero { condition, target } => {
            control::conditional_zero(vm, ctx, pc, *condition, *target)
        }
        Opcode::IfCompare { condition, target } => {
            control::conditional_compare(vm, ctx, pc, *condition, *target)
        }
        Opcode::Goto { target } => control::goto(vm, ctx, pc, *target),
        Opcode::TableSwitch {
            low,
            targets,
            default,
        } => control::table_switch(vm, ctx, pc, *low, targets, *default),
        Opcode::LookupSwitch { pairs, default } => {
            control::lookup_switch(vm, ctx, pc, pairs, *default)
        }
        Opcode::Return { ty } => control::method_return(vm, ctx, pc, *ty),
        Opcode::New { index } => object::new_object(vm, ctx, pc, *index),
        Opcode::NewArray { element } => object::new_array(vm, ctx, pc, *element),
        Opcode::ANewArray { index } => object::new_reference_array(vm, ctx, pc, *index),
        Opcode::MultiANewArray { index, dimensions } => {
            object::new_multi_array(vm, ctx, pc, *index, *dimensions)
        }
        Opcode::ArrayLength => object::array_length(vm, ctx, pc),
        Opcode::ArrayLoad { ty } => object::array_load(vm, ctx, pc, *ty),
        Opcode::ArrayStore { ty } => object::array_store(vm, ctx, pc, *ty),
        Opcode::GetField { index } => object::get_field(vm, ctx, pc, *index),
        Opcode::PutField { index } => object::put_field(vm, ctx, pc, *index),
        Opcode::GetStatic { index } => object::get_static(vm, ctx, pc, *index),
        Opcode::PutStatic { index } => object::put_static(vm, ctx, pc, *index),
        Opcode::InvokeVirtual { index } => object::invoke_virtual(vm, ctx, pc, *index),
        Opcode::InvokeStatic { index } => object::invoke_static(vm, ctx, pc, *index),
        Opcode::InvokeSpecial { index } => object::invoke_special(vm, ctx, pc, *index),
    }
}

//! The mapping arms for allocation, field and array access, statics and
//! method invocation.
//!
//! Allocation appends fresh slots to the symbolic heap and returns the
//! address of the type tag slot. Field and element access thereafter is
//! address arithmetic over those slots. Method invocation lowers dynamic
//! dispatch to a closed-world chain of type-tag-guarded conditionals over
//! every concrete class the program knows.

use crate::{
    bytecode::program::{MethodId, MethodInfo},
    error::Result,
    heap,
    value::{
        known::KnownValue,
        operator::Operator,
        types::ValueType,
        CallKind,
        Expression,
    },
    vm::{context::Context, SymbolicVM},
};

/// Allocates a new object of the class resolved through the pool, pushing
/// the reference to it.
///
/// The object receives a runtime type tag slot followed by one zero-filled
/// slot per field, inherited fields first.
///
/// # Errors
///
/// Returns [`Err`] if the pool entry or class metadata is incoherent.
pub fn new_object(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32, index: u16) -> Result<()> {
    let class = vm.program().pool().class_at(index, pc)?;
    let tag = vm.program().type_tag(class)?;
    let field_types: Vec<ValueType> = vm
        .program()
        .all_fields(class)?
        .iter()
        .map(|(_, info)| info.ty)
        .collect();

    let mut slots = vec![Expression::int(pc, tag)];
    slots.extend(
        field_types
            .iter()
            .map(|ty| Expression::constant(pc, ty.default_value())),
    );

    let reference = allocate(vm, ctx, pc, slots, None)?;
    ctx.push(pc, reference)?;
    Ok(())
}

/// Allocates a new array of a primitive element type, pushing the reference
/// to it.
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn new_array(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32, element: ValueType) -> Result<()> {
    let count = ctx.pop(vm.graph_mut(), pc, ValueType::Int)?;
    let reference = allocate_array(vm, ctx, pc, element, &count)?;
    ctx.push(pc, reference)?;
    Ok(())
}

/// Allocates a new array of references, pushing the reference to it.
///
/// # Errors
///
/// Returns [`Err`] if the pool entry is incoherent.
pub fn new_reference_array(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    index: u16,
) -> Result<()> {
    // The element class participates only through the element slots, so the
    // array itself carries the generic reference-array tag.
    let _ = vm.program().pool().class_at(index, pc)?;
    let count = ctx.pop(vm.graph_mut(), pc, ValueType::Int)?;
    let reference = allocate_array(vm, ctx, pc, ValueType::Reference, &count)?;
    ctx.push(pc, reference)?;
    Ok(())
}

/// Allocates a multi-dimensional array, pushing the reference to the
/// outermost dimension.
///
/// Dimension counts are popped innermost-first. When every count is a known
/// constant the nested arrays are materialized eagerly, with each element of
/// an outer dimension holding the reference to its sub-array; a symbolic
/// count degrades the remaining dimensions to a single unexpanded level.
///
/// # Errors
///
/// Returns [`Err`] if the pool entry is incoherent.
pub fn new_multi_array(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    index: u16,
    dimensions: u8,
) -> Result<()> {
    let _ = vm.program().pool().class_at(index, pc)?;

    let mut counts = Vec::with_capacity(dimensions as usize);
    for _ in 0..dimensions {
        counts.push(ctx.pop(vm.graph_mut(), pc, ValueType::Int)?);
    }
    // Counts were pushed outermost-first, so popping reversed them.
    counts.reverse();

    let reference = allocate_dimensions(vm, ctx, pc, &counts)?;
    ctx.push(pc, reference)?;
    Ok(())
}

/// Recursively allocates the dimensions of a multi-dimensional array.
#[allow(clippy::cast_possible_truncation)] // Dimension counts fit in i32
fn allocate_dimensions(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    counts: &[Expression],
) -> Result<Expression> {
    let (count, rest) = counts
        .split_first()
        .expect("Multi-dimensional allocation always has at least one dimension");

    let reference = allocate_array(vm, ctx, pc, ValueType::Reference, count)?;
    if rest.is_empty() {
        return Ok(reference);
    }

    if let Some(length) = count.as_constant().and_then(|v| v.as_i64()) {
        for element in 0..length {
            let sub = allocate_dimensions(vm, ctx, pc, rest)?;
            let address =
                heap::element_address(pc, &reference, &Expression::int(pc, element as i32));
            let heap_value = ctx.heap(vm.graph_mut(), pc)?;
            ctx.set_heap(heap::write_slot(pc, &heap_value, &address, sub));
        }
    }
    Ok(reference)
}

/// Pushes the length of the array whose reference is on top of the stack.
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn array_length(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32) -> Result<()> {
    let reference = ctx.pop(vm.graph_mut(), pc, ValueType::Reference)?;
    let heap_value = ctx.heap(vm.graph_mut(), pc)?;
    let address = heap::offset_address(pc, &reference, 1);
    ctx.push(pc, heap::read_slot(pc, &heap_value, &address, ValueType::Int))?;
    Ok(())
}

/// Loads an array element.
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn array_load(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32, ty: ValueType) -> Result<()> {
    let index = ctx.pop(vm.graph_mut(), pc, ValueType::Int)?;
    let reference = ctx.pop(vm.graph_mut(), pc, ValueType::Reference)?;
    let heap_value = ctx.heap(vm.graph_mut(), pc)?;
    let address = heap::element_address(pc, &reference, &index);
    ctx.push(
        pc,
        heap::read_slot(pc, &heap_value, &address, ty.stack_type()),
    )?;
    Ok(())
}

/// Stores an array element.
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn array_store(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32, ty: ValueType) -> Result<()> {
    let value = ctx.pop(vm.graph_mut(), pc, ty)?;
    let index = ctx.pop(vm.graph_mut(), pc, ValueType::Int)?;
    let reference = ctx.pop(vm.graph_mut(), pc, ValueType::Reference)?;
    let heap_value = ctx.heap(vm.graph_mut(), pc)?;
    let address = heap::element_address(pc, &reference, &index);
    ctx.set_heap(heap::write_slot(pc, &heap_value, &address, value));
    Ok(())
}

/// Reads an instance field.
///
/// # Errors
///
/// Returns [`Err`] if the pool entry or field metadata is incoherent.
pub fn get_field(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32, index: u16) -> Result<()> {
    let field = vm.program().pool().field_at(index, pc)?;
    let ty = vm.program().class(field.class)?.fields[field.index].ty;
    let slot = vm.program().field_slot(field.class, field)?;

    let reference = ctx.pop(vm.graph_mut(), pc, ValueType::Reference)?;
    let heap_value = ctx.heap(vm.graph_mut(), pc)?;
    let address = heap::field_address(pc, &reference, slot);
    ctx.push(
        pc,
        heap::read_slot(pc, &heap_value, &address, ty.stack_type()),
    )?;
    Ok(())
}

/// Writes an instance field.
///
/// # Errors
///
/// Returns [`Err`] if the pool entry or field metadata is incoherent.
pub fn put_field(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32, index: u16) -> Result<()> {
    let field = vm.program().pool().field_at(index, pc)?;
    let ty = vm.program().class(field.class)?.fields[field.index].ty;
    let slot = vm.program().field_slot(field.class, field)?;

    let value = ctx.pop(vm.graph_mut(), pc, ty)?;
    let reference = ctx.pop(vm.graph_mut(), pc, ValueType::Reference)?;
    let heap_value = ctx.heap(vm.graph_mut(), pc)?;
    let address = heap::field_address(pc, &reference, slot);
    ctx.set_heap(heap::write_slot(pc, &heap_value, &address, value));
    Ok(())
}

/// Reads a static field.
///
/// # Errors
///
/// Returns [`Err`] if the pool entry is incoherent.
pub fn get_static(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32, index: u16) -> Result<()> {
    let field = vm.program().pool().field_at(index, pc)?;
    let ty = vm.program().class(field.class)?.fields[field.index].ty;
    let value = ctx.static_field(vm.graph_mut(), pc, field, ty)?;
    ctx.push(pc, value)?;
    Ok(())
}

/// Writes a static field.
///
/// # Errors
///
/// Returns [`Err`] if the pool entry is incoherent.
pub fn put_static(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32, index: u16) -> Result<()> {
    let field = vm.program().pool().field_at(index, pc)?;
    let ty = vm.program().class(field.class)?.fields[field.index].ty;
    let value = ctx.pop(vm.graph_mut(), pc, ty)?;
    ctx.set_static(field, value);
    Ok(())
}

/// Invokes a method with virtual dispatch over the receiver's runtime type.
///
/// Dispatch lowers to a chained conditional over every concrete class in
/// the program on which the call can resolve: each branch guards on the
/// receiver's stored type tag equalling that class's tag and calls that
/// class's implementation in its own frame. The chain's fallback is the
/// constant `false`, covering receivers whose type has no matching
/// override.
///
/// # Errors
///
/// Returns [`Err`] if the pool entry or method metadata is incoherent.
pub fn invoke_virtual(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32, index: u16) -> Result<()> {
    let method_ref = vm.program().pool().method_at(index, pc)?;
    let declared = vm.program().method_at(method_ref)?;
    let info = vm.program().method(declared)?.clone();

    let arguments = pop_arguments(vm, ctx, pc, &info)?;
    let receiver = ctx.pop(vm.graph_mut(), pc, ValueType::Reference)?;
    let heap_value = ctx.heap(vm.graph_mut(), pc)?;

    let implementations = vm.program().implementations(method_ref)?;
    let return_pc = vm.continuation_pc();

    let mut chain = Expression::boolean(pc, false);
    for (class, method) in implementations.into_iter().rev() {
        let call = frame_call(
            vm,
            ctx,
            pc,
            method,
            return_pc,
            Some(receiver.clone()),
            &arguments,
        )?;
        let tag = vm.program().type_tag(class)?;
        let stored_tag = heap::read_slot(pc, &heap_value, &receiver, ValueType::Int);
        let guard = Expression::op(
            pc,
            Operator::Equal,
            vec![stored_tag, Expression::int(pc, tag)],
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

/// Invokes a method statically, with no receiver and no dispatch.
///
/// # Errors
///
/// Returns [`Err`] if the pool entry or method metadata is incoherent.
pub fn invoke_static(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32, index: u16) -> Result<()> {
    let method_ref = vm.program().pool().method_at(index, pc)?;
    let method = vm.program().method_at(method_ref)?;
    let info = vm.program().method(method)?.clone();

    let arguments = pop_arguments(vm, ctx, pc, &info)?;
    let return_pc = vm.continuation_pc();
    let call = frame_call(vm, ctx, pc, method, return_pc, None, &arguments)?;
    ctx.set_terminal(call);
    Ok(())
}

/// Invokes a method whose receiver type is statically known.
///
/// Constructor calls resolve directly against the named class;
/// non-constructor special invokes still participate in the dispatch
/// lowering, exactly as virtual calls do.
///
/// # Errors
///
/// Returns [`Err`] if the pool entry or method metadata is incoherent.
pub fn invoke_special(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32, index: u16) -> Result<()> {
    let method_ref = vm.program().pool().method_at(index, pc)?;
    let method = vm.program().method_at(method_ref)?;
    let info = vm.program().method(method)?.clone();

    if info.name != "<init>" {
        return invoke_virtual(vm, ctx, pc, index);
    }

    let arguments = pop_arguments(vm, ctx, pc, &info)?;
    let receiver = ctx.pop(vm.graph_mut(), pc, ValueType::Reference)?;
    let return_pc = vm.continuation_pc();
    let call = frame_call(vm, ctx, pc, method, return_pc, Some(receiver), &arguments)?;
    ctx.set_terminal(call);
    Ok(())
}

/// Pops a method's declared arguments, returning them in parameter order.
fn pop_arguments(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    info: &MethodInfo,
) -> Result<Vec<Expression>> {
    let mut arguments = Vec::with_capacity(info.params.len());
    for ty in info.params.iter().rev() {
        arguments.push(ctx.pop(vm.graph_mut(), pc, *ty)?);
    }
    arguments.reverse();
    Ok(arguments)
}

/// Creates (or, for recursion, re-enters) the callee frame for an invoke and
/// records the call into its entry unit.
///
/// The call site's frozen state carries the caller's remaining state plus
/// the callee frame's argument slots, so that parameter requests
/// propagating back out of the callee can be answered here.
fn frame_call(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    method: MethodId,
    return_pc: Option<u32>,
    receiver: Option<Expression>,
    arguments: &[Expression],
) -> Result<Expression> {
    let info = vm.program().method(method)?.clone();
    let frame = vm.invoke_frame(ctx.frame(), method, return_pc)?;
    let entry = vm.entry_unit(method, frame, pc)?;

    let mut state = ctx.freeze();
    let mut slot: u16 = 0;
    if let Some(receiver) = receiver {
        state.locals.insert((frame, slot), receiver);
        slot += 1;
    }
    for (ty, argument) in info.params.iter().zip(arguments) {
        state.locals.insert((frame, slot), argument.clone());
        slot += ty.slot_width();
    }

    vm.record_call(ctx.unit(), entry, CallKind::Invoke, state, pc)
}

/// Allocates an array with the provided element type and length, returning
/// the reference to its type tag slot.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn allocate_array(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    element: ValueType,
    count: &Expression,
) -> Result<Expression> {
    let tag = heap::array_type_tag(element);
    let mut slots = vec![Expression::int(pc, tag), count.clone()];

    let symbolic_length = match count.as_constant().and_then(|v| v.as_i64()) {
        Some(length) => {
            slots.extend(
                (0..length).map(|_| Expression::constant(pc, element.default_value())),
            );
            None
        }
        None => Some(count.clone()),
    };

    allocate(vm, ctx, pc, slots, symbolic_length)
}

/// Appends `slots` to the symbolic heap, returning the address of the first
/// appended slot as a reference.
///
/// The allocation cursor in reserved slot 0 is advanced past the appended
/// slots; a `symbolic_extra` length extends the advance by a non-constant
/// element count whose slots cannot be enumerated.
#[allow(clippy::cast_possible_wrap)]
fn allocate(
    vm: &mut SymbolicVM,
    ctx: &mut Context,
    pc: u32,
    slots: Vec<Expression>,
    symbolic_extra: Option<Expression>,
) -> Result<Expression> {
    let base = ctx.heapsize(vm.graph_mut(), pc)?;
    let mut heap_value = ctx.heap(vm.graph_mut(), pc)?;

    for (offset, slot_value) in slots.iter().enumerate() {
        let address = heap::offset_address(pc, &base, offset as i64);
        heap_value = heap::write_slot(pc, &heap_value, &address, slot_value.clone());
    }

    let mut new_size = heap::offset_address(pc, &base, slots.len() as i64);
    if let Some(extra) = symbolic_extra {
        new_size = Expression::op(
            pc,
            Operator::Add,
            vec![new_size, extra],
            ValueType::Reference,
        );
    }

    heap_value = heap::write_slot(pc, &heap_value, &Expression::int(pc, 0), new_size.clone());
    ctx.set_heap(heap_value);
    ctx.set_heapsize(new_size);

    let reference = match base.as_constant().and_then(|v| v.as_i64()) {
        Some(address) => Expression::constant(pc, KnownValue::Reference(address)),
        None => base,
    };
    Ok(reference)
}

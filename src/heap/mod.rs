//! This module contains the symbolic heap model: the addressing scheme that
//! turns field and array access into address arithmetic, and the
//! materialization of live object graphs into heap snapshots.
//!
//! # Layout
//!
//! The symbolic heap is a single expression: either a
//! [`crate::value::ExprData::Snapshot`] (an ordered sequence of slot
//! expressions) or a free variable standing for an unknown heap. Slot 0 is
//! reserved: address 0 is the null reference, and the slot doubles as the
//! allocation cursor holding the next free address, so the heap value is
//! self-describing and threads through calls without extra machinery.
//!
//! Every object occupies one runtime type tag slot followed by one slot per
//! field (inherited fields first); every array occupies a type tag slot, a
//! length slot, and one slot per element. The heap only grows; nothing is
//! ever reclaimed.

pub mod materialize;
pub mod object;

pub use materialize::{HeapImage, InsertPoint, Materializer};
pub use object::{LiveArray, LiveField, LiveObject, LiveValue, ObjectHandle, Variability};

use crate::value::{known::KnownValue, operator::Operator, types::ValueType, Expression};

/// Computes the runtime type tag of an array with the provided primitive
/// element type.
///
/// Class tags are positive and array tags are negative, so the two can
/// never collide.
#[must_use]
pub fn array_type_tag(element: ValueType) -> i32 {
    let ordinal = match element {
        ValueType::Byte => 1,
        ValueType::Short => 2,
        ValueType::Int => 3,
        ValueType::Long => 4,
        ValueType::Float => 5,
        ValueType::Double => 6,
        ValueType::Bool => 7,
        ValueType::Char => 8,
        ValueType::Reference | ValueType::Undefined => 9,
    };
    -ordinal
}

/// Offsets the address expression `base` by the constant `offset`,
/// folding immediately when the base is a known address.
#[must_use]
pub fn offset_address(pc: u32, base: &Expression, offset: i64) -> Expression {
    if offset == 0 {
        return base.clone();
    }
    match base.as_constant() {
        Some(KnownValue::Reference(address)) => {
            Expression::constant(pc, KnownValue::Reference(address + offset))
        }
        Some(KnownValue::Int(address)) => {
            Expression::constant(pc, KnownValue::Reference(i64::from(address) + offset))
        }
        _ => Expression::op(
            pc,
            Operator::Add,
            vec![
                base.clone(),
                Expression::constant(pc, KnownValue::Reference(offset)),
            ],
            ValueType::Reference,
        ),
    }
}

/// Computes the address of field `slot` of the object at `reference`.
///
/// Field slots are offset by +1 to skip the type tag.
#[must_use]
#[allow(clippy::cast_possible_wrap)] // Field counts are far below i64::MAX
pub fn field_address(pc: u32, reference: &Expression, slot: usize) -> Expression {
    offset_address(
        pc,
        reference,
        crate::constant::FIELD_SLOT_OFFSET as i64 + slot as i64,
    )
}

/// Computes the address of element `index` of the array at `reference`.
///
/// Element addresses are offset by +2 to skip the type tag and the length
/// slot.
#[must_use]
#[allow(clippy::cast_possible_wrap)] // Offsets are tiny
pub fn element_address(pc: u32, reference: &Expression, index: &Expression) -> Expression {
    let base = offset_address(pc, reference, crate::constant::ELEMENT_SLOT_OFFSET as i64);
    match index.as_constant().and_then(|v| v.as_i64()) {
        Some(constant_index) => offset_address(pc, &base, constant_index),
        None => Expression::op(
            pc,
            Operator::Add,
            vec![base, index.clone()],
            ValueType::Reference,
        ),
    }
}

/// Reads the heap slot at `address`, folding the read immediately when both
/// the heap and the address are constant.
#[must_use]
pub fn read_slot(
    pc: u32,
    heap: &Expression,
    address: &Expression,
    hint: ValueType,
) -> Expression {
    if let (crate::value::ExprData::Snapshot(slots), Some(index)) = (
        heap.data(),
        address.as_constant().and_then(|v| v.as_i64()),
    ) {
        if index >= 0 {
            if let Some(slot) = slots.get(usize::try_from(index).unwrap_or(usize::MAX)) {
                return slot.clone();
            }
            // Reads past the end of a known heap see the default value.
            return Expression::constant(pc, hint.default_value());
        }
    }
    Expression::op(
        pc,
        Operator::HeapGet,
        vec![heap.clone(), address.clone()],
        hint,
    )
}

/// Writes `value` into the heap slot at `address`, folding the write
/// immediately when both the heap and the address are constant.
#[must_use]
pub fn write_slot(
    pc: u32,
    heap: &Expression,
    address: &Expression,
    value: Expression,
) -> Expression {
    if let (crate::value::ExprData::Snapshot(slots), Some(index)) = (
        heap.data(),
        address.as_constant().and_then(|v| v.as_i64()),
    ) {
        if index >= 0 {
            let index = usize::try_from(index).unwrap_or(usize::MAX);
            let mut new_slots = slots.clone();
            if index >= new_slots.len() {
                // The heap only grows: writes past the end extend it with
                // defaults up to the written slot.
                new_slots
                    .resize(index + 1, Expression::constant(pc, ValueType::Int.default_value()));
            }
            new_slots[index] = value;
            return Expression::snapshot(pc, new_slots);
        }
    }
    Expression::op(
        pc,
        Operator::HeapPut,
        vec![heap.clone(), address.clone(), value],
        ValueType::Reference,
    )
}

#[cfg(test)]
mod test {
    use crate::{
        heap::{element_address, field_address, read_slot, write_slot},
        value::{known::KnownValue, types::ValueType, Expression},
    };

    #[test]
    fn field_addresses_skip_the_type_tag() {
        let reference = Expression::constant(0, KnownValue::Reference(10));
        let address = field_address(0, &reference, 0);
        assert_eq!(address.as_constant(), Some(KnownValue::Reference(11)));
    }

    #[test]
    fn element_addresses_skip_the_tag_and_length() {
        let reference = Expression::constant(0, KnownValue::Reference(10));
        let address = element_address(0, &reference, &Expression::int(0, 3));
        assert_eq!(address.as_constant(), Some(KnownValue::Reference(15)));
    }

    #[test]
    fn heap_addressing_round_trips_within_one_heap_value() {
        // Writing field slot i and reading it back from the same symbolic
        // heap value must return exactly the written expression.
        let heap = Expression::snapshot(
            0,
            vec![
                Expression::int(0, 4),
                Expression::int(0, 7),
                Expression::int(0, 0),
                Expression::int(0, 0),
            ],
        );
        let reference = Expression::constant(0, KnownValue::Reference(1));
        let address = field_address(0, &reference, 1);

        let written = Expression::int(0, 42);
        let new_heap = write_slot(0, &heap, &address, written.clone());
        let read = read_slot(0, &new_heap, &address, ValueType::Int);

        assert_eq!(read, written);
    }

    #[test]
    fn symbolic_heap_reads_stay_symbolic() {
        let heap = Expression::variable(
            0,
            crate::value::Variable::new("h", ValueType::Reference),
        );
        let address = Expression::constant(0, KnownValue::Reference(3));
        let read = read_slot(0, &heap, &address, ValueType::Int);

        assert!(matches!(
            read.data(),
            crate::value::ExprData::Op {
                operator: crate::value::operator::Operator::HeapGet,
                ..
            }
        ));
    }
}

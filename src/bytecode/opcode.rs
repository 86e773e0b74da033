//! This module contains the decoded form of the instruction set that the
//! symbolic executor understands.
//!
//! The set is a representative, extensible subset of a stack machine's
//! instruction space rather than an exhaustive one: each variant captures one
//! *shape* of instruction (a typed binary operation, a conditional jump
//! against zero, a field read through the pool) with its operands already
//! decoded by the disassembler. Several source opcodes therefore collapse to
//! one variant — `iconst_3`, `bipush` and `sipush` all decode to
//! [`Opcode::Const`] — without losing the semantics the mapping needs.

use crate::value::{
    known::KnownValue,
    operator::{CompareKind, Operator},
    types::ValueType,
};

/// A decoded instruction of the input program.
#[derive(Clone, Debug, PartialEq)]
pub enum Opcode {
    /// Pushes an immediate constant onto the operand stack.
    Const {
        /// The value to push.
        value: KnownValue,
    },

    /// Pushes the null reference onto the operand stack.
    ConstNull,

    /// Pushes a loadable constant resolved through the constant pool.
    Ldc {
        /// The pool index of the constant.
        index: u16,
    },

    /// Loads a local variable slot onto the operand stack.
    Load {
        /// The slot to load from.
        slot: u16,

        /// The declared type of the load.
        ty: ValueType,
    },

    /// Stores the top of the operand stack into a local variable slot.
    Store {
        /// The slot to store into.
        slot: u16,

        /// The declared type of the store.
        ty: ValueType,
    },

    /// Increments an integer local variable slot by an immediate amount.
    Iinc {
        /// The slot to increment.
        slot: u16,

        /// The signed immediate increment.
        delta: i16,
    },

    /// Discards the top of the operand stack.
    Pop,

    /// Duplicates the top of the operand stack.
    Dup,

    /// Swaps the top two operand stack values.
    Swap,

    /// A typed binary arithmetic, bitwise or shift operation.
    Binary {
        /// The operator to apply.
        operator: Operator,

        /// The declared operand type of the operation.
        ty: ValueType,
    },

    /// Arithmetic negation of the top of the operand stack.
    Neg {
        /// The declared operand type of the negation.
        ty: ValueType,
    },

    /// A numeric conversion of the top of the operand stack.
    Convert {
        /// The type converted from.
        from: ValueType,

        /// The type converted to.
        to: ValueType,
    },

    /// A three-way comparison of the top two operand stack values.
    Compare {
        /// The comparison family, fixing both the operand width and the NaN
        /// behavior.
        kind: CompareKind,
    },

    /// A conditional jump comparing the top of the stack against zero (or
    /// null, for reference conditions).
    IfZero {
        /// The comparison applied between the operand and zero.
        condition: Operator,

        /// The program counter to jump to when the condition holds.
        target: u32,
    },

    /// A conditional jump comparing the top two stack values.
    IfCompare {
        /// The comparison applied between the two operands.
        condition: Operator,

        /// The program counter to jump to when the condition holds.
        target: u32,
    },

    /// An unconditional jump.
    Goto {
        /// The program counter to jump to.
        target: u32,
    },

    /// A dense multi-way switch over a contiguous case range.
    TableSwitch {
        /// The case value of the first target.
        low: i32,

        /// The jump targets for the cases `low..=low + targets.len() - 1`.
        targets: Vec<u32>,

        /// The jump target when no case matches.
        default: u32,
    },

    /// A sparse multi-way switch over explicit case/target pairs.
    LookupSwitch {
        /// The match value and jump target of each case.
        pairs: Vec<(i32, u32)>,

        /// The jump target when no case matches.
        default: u32,
    },

    /// Returns from the current method.
    Return {
        /// The type of the returned value, or [`None`] for a void return.
        ty: Option<ValueType>,
    },

    /// Allocates a new object of a class resolved through the pool.
    New {
        /// The pool index of the class.
        index: u16,
    },

    /// Allocates a new array of a primitive element type.
    NewArray {
        /// The element type of the array.
        element: ValueType,
    },

    /// Allocates a new array of references to a class resolved through the
    /// pool.
    ANewArray {
        /// The pool index of the element class.
        index: u16,
    },

    /// Allocates a multi-dimensional array of a class resolved through the
    /// pool.
    MultiANewArray {
        /// The pool index of the array class.
        index: u16,

        /// The number of dimensions whose sizes are on the stack.
        dimensions: u8,
    },

    /// Pushes the length of the array reference on top of the stack.
    ArrayLength,

    /// Loads an array element.
    ArrayLoad {
        /// The declared element type of the load.
        ty: ValueType,
    },

    /// Stores an array element.
    ArrayStore {
        /// The declared element type of the store.
        ty: ValueType,
    },

    /// Reads an instance field resolved through the pool.
    GetField {
        /// The pool index of the field.
        index: u16,
    },

    /// Writes an instance field resolved through the pool.
    PutField {
        /// The pool index of the field.
        index: u16,
    },

    /// Reads a static field resolved through the pool.
    GetStatic {
        /// The pool index of the field.
        index: u16,
    },

    /// Writes a static field resolved through the pool.
    PutStatic {
        /// The pool index of the field.
        index: u16,
    },

    /// Invokes a method with virtual dispatch over the receiver's runtime
    /// type.
    InvokeVirtual {
        /// The pool index of the method.
        index: u16,
    },

    /// Invokes a method statically (no receiver).
    InvokeStatic {
        /// The pool index of the method.
        index: u16,
    },

    /// Invokes a method with the receiver's type known statically.
    ///
    /// Constructor calls and superclass calls take this shape; non-constructor
    /// special invokes still participate in the dispatch lowering.
    InvokeSpecial {
        /// The pool index of the method.
        index: u16,
    },
}

impl Opcode {
    /// Gets a textual representation of the opcode to aid in debugging.
    #[must_use]
    pub fn as_text_code(&self) -> String {
        match self {
            Self::Const { value } => format!("CONST {value}"),
            Self::ConstNull => "ACONST_NULL".into(),
            Self::Ldc { index } => format!("LDC #{index}"),
            Self::Load { slot, ty } => format!("LOAD[{ty}] {slot}"),
            Self::Store { slot, ty } => format!("STORE[{ty}] {slot}"),
            Self::Iinc { slot, delta } => format!("IINC {slot} {delta}"),
            Self::Pop => "POP".into(),
            Self::Dup => "DUP".into(),
            Self::Swap => "SWAP".into(),
            Self::Binary { operator, ty } => format!("{operator}[{ty}]"),
            Self::Neg { ty } => format!("NEG[{ty}]"),
            Self::Convert { from, to } => format!("{from}2{to}"),
            Self::Compare { kind } => format!("{}", Operator::Compare(*kind)),
            Self::IfZero { condition, target } => format!("IF{condition} -> {target}"),
            Self::IfCompare { condition, target } => format!("IF_CMP{condition} -> {target}"),
            Self::Goto { target } => format!("GOTO {target}"),
            Self::TableSwitch { low, targets, .. } => {
                format!("TABLESWITCH {low}..{}", *low + targets.len() as i32 - 1)
            }
            Self::LookupSwitch { pairs, .. } => format!("LOOKUPSWITCH ({} cases)", pairs.len()),
            Self::Return { ty: Some(ty) } => format!("RETURN[{ty}]"),
            Self::Return { ty: None } => "RETURN".into(),
            Self::New { index } => format!("NEW #{index}"),
            Self::NewArray { element } => format!("NEWARRAY[{element}]"),
            Self::ANewArray { index } => format!("ANEWARRAY #{index}"),
            Self::MultiANewArray { index, dimensions } => {
                format!("MULTIANEWARRAY #{index} dims={dimensions}")
            }
            Self::ArrayLength => "ARRAYLENGTH".into(),
            Self::ArrayLoad { ty } => format!("ALOAD[{ty}]"),
            Self::ArrayStore { ty } => format!("ASTORE[{ty}]"),
            Self::GetField { index } => format!("GETFIELD #{index}"),
            Self::PutField { index } => format!("PUTFIELD #{index}"),
            Self::GetStatic { index } => format!("GETSTATIC #{index}"),
            Self::PutStatic { index } => format!("PUTSTATIC #{index}"),
            Self::InvokeVirtual { index } => format!("INVOKEVIRTUAL #{index}"),
            Self::InvokeStatic { index } => format!("INVOKESTATIC #{index}"),
            Self::InvokeSpecial { index } => format!("INVOKESPECIAL #{index}"),
        }
    }

    /// Checks whether this opcode unconditionally ends the basic block it
    /// appears in.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Goto { .. }
                | Self::TableSwitch { .. }
                | Self::LookupSwitch { .. }
                | Self::Return { .. }
        )
    }
}

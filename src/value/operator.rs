//! This module contains the operators that can appear at the head of an
//! operation expression.

use std::fmt::{Display, Formatter};

use crate::value::types::ValueType;

/// The variant of a three-way comparison operator.
///
/// The stack machine distinguishes the comparison family both by operand
/// width and by the result it produces when either operand is NaN, which is
/// the only difference between the `G` and `L` variants.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CompareKind {
    /// A comparison of two long values.
    Long,

    /// A float comparison pushing `1` when either operand is NaN.
    FloatG,

    /// A float comparison pushing `-1` when either operand is NaN.
    FloatL,

    /// A double comparison pushing `1` when either operand is NaN.
    DoubleG,

    /// A double comparison pushing `-1` when either operand is NaN.
    DoubleL,
}

impl CompareKind {
    /// Gets the value the comparison produces when either operand is NaN.
    #[must_use]
    pub fn nan_sentinel(self) -> i32 {
        match self {
            Self::FloatG | Self::DoubleG | Self::Long => {
                crate::constant::NAN_COMPARISON_GREATER_SENTINEL
            }
            Self::FloatL | Self::DoubleL => crate::constant::NAN_COMPARISON_LESS_SENTINEL,
        }
    }
}

/// The operator at the head of an operation expression.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operator {
    /// Addition of two values.
    Add,

    /// Subtraction of two values, with the second-popped operand on the left.
    Sub,

    /// Multiplication of two values.
    Mul,

    /// Division of two values.
    Div,

    /// Remainder of two values.
    Rem,

    /// Arithmetic negation of one value.
    Neg,

    /// Left shift.
    Shl,

    /// Arithmetic (sign-preserving) right shift.
    Shr,

    /// Logical (zero-filling) right shift.
    Ushr,

    /// Bitwise conjunction.
    And,

    /// Bitwise disjunction.
    Or,

    /// Bitwise exclusive disjunction.
    Xor,

    /// Boolean conjunction.
    BAnd,

    /// Boolean disjunction.
    BOr,

    /// Boolean negation.
    BNot,

    /// Equality of two values.
    Equal,

    /// Inequality of two values.
    NotEqual,

    /// Strict less-than of two values.
    Less,

    /// Less-than-or-equal of two values.
    LessEqual,

    /// Strict greater-than of two values.
    Greater,

    /// Greater-than-or-equal of two values.
    GreaterEqual,

    /// A three-way comparison producing `-1`, `0` or `1`.
    ///
    /// These are lowered into [`Self::Greater`]/[`Self::Equal`]-guarded
    /// conditional chains by the final cleanup pass.
    Compare(CompareKind),

    /// A conditional expression over a condition, a true branch and a false
    /// branch.
    Ite,

    /// Reads the heap slot at an address: `(heap, address)`.
    HeapGet,

    /// Writes a heap slot, producing a new heap: `(heap, address, value)`.
    HeapPut,

    /// A numeric conversion to the given target type.
    Cast(ValueType),

    /// A coercion of a boolean into the integer domain.
    BoolToInt,

    /// A coercion of an integer into the boolean domain.
    IntToBool,
}

impl Operator {
    /// Gets the number of operands the operator consumes.
    #[must_use]
    pub fn arity(&self) -> usize {
        match self {
            Self::Neg | Self::BNot | Self::Cast(_) | Self::BoolToInt | Self::IntToBool => 1,
            Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Rem
            | Self::Shl
            | Self::Shr
            | Self::Ushr
            | Self::And
            | Self::Or
            | Self::Xor
            | Self::BAnd
            | Self::BOr
            | Self::Equal
            | Self::NotEqual
            | Self::Less
            | Self::LessEqual
            | Self::Greater
            | Self::GreaterEqual
            | Self::Compare(_)
            | Self::HeapGet => 2,
            Self::Ite | Self::HeapPut => 3,
        }
    }

    /// Checks whether the operator produces a boolean result.
    #[must_use]
    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::NotEqual
                | Self::Less
                | Self::LessEqual
                | Self::Greater
                | Self::GreaterEqual
                | Self::BAnd
                | Self::BOr
                | Self::BNot
                | Self::IntToBool
        )
    }

    /// Gets the logical complement of a comparison operator, where one
    /// exists.
    #[must_use]
    pub fn negated(&self) -> Option<Self> {
        let negated = match self {
            Self::Equal => Self::NotEqual,
            Self::NotEqual => Self::Equal,
            Self::Less => Self::GreaterEqual,
            Self::GreaterEqual => Self::Less,
            Self::Greater => Self::LessEqual,
            Self::LessEqual => Self::Greater,
            _ => return None,
        };
        Some(negated)
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Rem => "REM",
            Self::Neg => "NEG",
            Self::Shl => "SHL",
            Self::Shr => "SHR",
            Self::Ushr => "USHR",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::BAnd => "BAND",
            Self::BOr => "BOR",
            Self::BNot => "BNOT",
            Self::Equal => "EQUAL",
            Self::NotEqual => "NOTEQUAL",
            Self::Less => "LESS",
            Self::LessEqual => "LESSEQUAL",
            Self::Greater => "GREATER",
            Self::GreaterEqual => "GREATEREQUAL",
            Self::Compare(CompareKind::Long) => "LCMP",
            Self::Compare(CompareKind::FloatG) => "FCMPG",
            Self::Compare(CompareKind::FloatL) => "FCMPL",
            Self::Compare(CompareKind::DoubleG) => "DCMPG",
            Self::Compare(CompareKind::DoubleL) => "DCMPL",
            Self::Ite => "ITE",
            Self::HeapGet => "HGET",
            Self::HeapPut => "HPUT",
            Self::Cast(target) => return write!(f, "CAST[{target}]"),
            Self::BoolToInt => "B2I",
            Self::IntToBool => "I2B",
        };
        write!(f, "{name}")
    }
}

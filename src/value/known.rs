//! This module contains a representation of concrete values that can be known
//! and manipulated statically during symbolic execution.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::value::types::ValueType;

/// The type of data whose value is concretely known during symbolic
/// execution.
///
/// # Representation
///
/// At the level at which the compiler works, every value in the stack machine
/// is a bag of bits at one of a fixed set of widths. Floating point values
/// are stored by their raw IEEE-754 bit patterns so that equality and hashing
/// are well-defined even in the presence of NaN; the numeric interpretation
/// is recovered through [`Self::as_f32`] and [`Self::as_f64`].
///
/// # Overflow
///
/// All arithmetic on known values wraps at the declared bit-width of the
/// operands, mirroring the stack machine's two's complement semantics rather
/// than promoting to arbitrary precision.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum KnownValue {
    /// An 8-bit signed integer.
    Byte(i8),

    /// A 16-bit signed integer.
    Short(i16),

    /// A 32-bit signed integer.
    Int(i32),

    /// A 64-bit signed integer.
    Long(i64),

    /// A 32-bit float, stored as its raw bit pattern.
    Float(u32),

    /// A 64-bit float, stored as its raw bit pattern.
    Double(u64),

    /// A boolean value.
    Bool(bool),

    /// A 16-bit unsigned code unit.
    Char(u16),

    /// An address into the symbolic heap.
    Reference(i64),
}

impl KnownValue {
    /// Constructs a float value from its numeric interpretation.
    #[must_use]
    pub fn from_f32(value: f32) -> Self {
        Self::Float(value.to_bits())
    }

    /// Constructs a double value from its numeric interpretation.
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        Self::Double(value.to_bits())
    }

    /// Gets the type of this value.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Byte(_) => ValueType::Byte,
            Self::Short(_) => ValueType::Short,
            Self::Int(_) => ValueType::Int,
            Self::Long(_) => ValueType::Long,
            Self::Float(_) => ValueType::Float,
            Self::Double(_) => ValueType::Double,
            Self::Bool(_) => ValueType::Bool,
            Self::Char(_) => ValueType::Char,
            Self::Reference(_) => ValueType::Reference,
        }
    }

    /// Gets the numeric interpretation of a float value.
    ///
    /// Returns [`None`] if the value is not a float.
    #[must_use]
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Float(bits) => Some(f32::from_bits(*bits)),
            _ => None,
        }
    }

    /// Gets the numeric interpretation of a double value.
    ///
    /// Returns [`None`] if the value is not a double.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    /// Checks whether this value is a floating point NaN.
    #[must_use]
    pub fn is_nan(&self) -> bool {
        match self {
            Self::Float(bits) => f32::from_bits(*bits).is_nan(),
            Self::Double(bits) => f64::from_bits(*bits).is_nan(),
            _ => false,
        }
    }

    /// Gets this value as it appears on the operand stack, promoting sub-int
    /// integral values to a 32-bit integer.
    #[must_use]
    pub fn widen_to_stack(self) -> Self {
        match self {
            Self::Byte(v) => Self::Int(i32::from(v)),
            Self::Short(v) => Self::Int(i32::from(v)),
            Self::Char(v) => Self::Int(i32::from(v)),
            Self::Bool(v) => Self::Int(i32::from(v)),
            other => other,
        }
    }

    /// Interprets this value as a 64-bit signed integer where the value is
    /// integral.
    ///
    /// Returns [`None`] for floating point values.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Short(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            Self::Bool(v) => Some(i64::from(*v)),
            Self::Char(v) => Some(i64::from(*v)),
            Self::Reference(v) => Some(*v),
            Self::Float(_) | Self::Double(_) => None,
        }
    }

    /// Checks whether this value is the boolean or integral zero.
    #[must_use]
    pub fn is_falsy(&self) -> bool {
        match self {
            Self::Bool(v) => !v,
            other => other.as_i64() == Some(0),
        }
    }

    /// Checks whether this value is the boolean `true` or a non-zero integer.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy() && !matches!(self, Self::Float(_) | Self::Double(_))
    }

    /// Converts this value to the provided `target` type, applying the stack
    /// machine's truncation and widening rules.
    ///
    /// A conversion to a type no wider than the value's stack representation
    /// is a truncation of the low bits; widening conversions sign-extend for
    /// signed integral types and zero-extend for char. Conversions between
    /// the integral and floating families go through the numeric value with
    /// saturation at the target bounds, as the source machine defines.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Truncation is the defined semantic
    pub fn convert_to(self, target: ValueType) -> Self {
        match target {
            ValueType::Byte => Self::Byte(self.to_i64_lossy() as i8),
            ValueType::Short => Self::Short(self.to_i64_lossy() as i16),
            ValueType::Char => Self::Char(self.to_i64_lossy() as u16),
            ValueType::Int => Self::Int(self.to_i64_lossy() as i32),
            ValueType::Long => Self::Long(self.to_i64_lossy()),
            ValueType::Bool => Self::Bool(self.to_i64_lossy() != 0),
            ValueType::Reference => Self::Reference(self.to_i64_lossy()),
            ValueType::Float => match self {
                Self::Float(_) => self,
                Self::Double(bits) => Self::from_f32(f64::from_bits(bits) as f32),
                other => Self::from_f32(other.to_i64_lossy() as f32),
            },
            ValueType::Double => match self {
                Self::Double(_) => self,
                Self::Float(bits) => Self::from_f64(f64::from(f32::from_bits(bits))),
                other => Self::from_f64(other.to_i64_lossy() as f64),
            },
            ValueType::Undefined => self,
        }
    }

    /// Interprets this value as a 64-bit integer, converting floating point
    /// values with saturation as the source machine's `d2l` family does.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // `as` saturates for float casts
    pub fn to_i64_lossy(self) -> i64 {
        match self {
            Self::Float(bits) => f32::from_bits(bits) as i64,
            Self::Double(bits) => f64::from_bits(bits) as i64,
            other => other.as_i64().unwrap_or(0),
        }
    }
}

/// Pretty-prints the known value as `type:value`.
impl Display for KnownValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Byte(v) => write!(f, "byte:{v}"),
            Self::Short(v) => write!(f, "short:{v}"),
            Self::Int(v) => write!(f, "int:{v}"),
            Self::Long(v) => write!(f, "long:{v}"),
            Self::Float(bits) => write!(f, "float:{}", f32::from_bits(*bits)),
            Self::Double(bits) => write!(f, "double:{}", f64::from_bits(*bits)),
            Self::Bool(v) => write!(f, "bool:{v}"),
            Self::Char(v) => write!(f, "char:{v}"),
            Self::Reference(v) => write!(f, "ref:{v}"),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::value::{known::KnownValue, types::ValueType};

    #[test]
    fn can_round_trip_float_bit_patterns() {
        let value = KnownValue::from_f32(1.5);
        assert_eq!(value.as_f32(), Some(1.5));

        let value = KnownValue::from_f64(-2.25);
        assert_eq!(value.as_f64(), Some(-2.25));
    }

    #[test]
    fn nan_values_are_equal_by_bit_pattern() {
        let left = KnownValue::from_f64(f64::NAN);
        let right = KnownValue::from_f64(f64::NAN);
        assert_eq!(left, right);
        assert!(left.is_nan());
    }

    #[test]
    fn can_widen_sub_int_values_to_the_stack_type() {
        assert_eq!(KnownValue::Byte(-1).widen_to_stack(), KnownValue::Int(-1));
        assert_eq!(KnownValue::Char(7).widen_to_stack(), KnownValue::Int(7));
        assert_eq!(KnownValue::Bool(true).widen_to_stack(), KnownValue::Int(1));
        assert_eq!(KnownValue::Long(3).widen_to_stack(), KnownValue::Long(3));
    }

    #[test]
    fn conversion_truncates_to_narrower_widths() {
        let value = KnownValue::Int(0x1_23);
        assert_eq!(value.convert_to(ValueType::Byte), KnownValue::Byte(0x23));

        let value = KnownValue::Long(i64::from(i32::MAX) + 1);
        assert_eq!(value.convert_to(ValueType::Int), KnownValue::Int(i32::MIN));
    }

    #[test]
    fn conversion_between_float_widths_preserves_value() {
        let value = KnownValue::from_f64(1.5);
        assert_eq!(value.convert_to(ValueType::Float), KnownValue::from_f32(1.5));
        assert_eq!(
            KnownValue::from_f32(1.5).convert_to(ValueType::Double),
            KnownValue::from_f64(1.5)
        );
    }

    #[test]
    fn truthiness_follows_integer_interpretation() {
        assert!(KnownValue::Int(1).is_truthy());
        assert!(KnownValue::Int(0).is_falsy());
        assert!(KnownValue::Bool(false).is_falsy());
        assert!(KnownValue::Reference(0).is_falsy());
    }
}

//! This module contains the constant evaluator: the interpretation of each
//! operator over statically known values.
//!
//! # Overflow
//!
//! Arithmetic respects the source numeric width's overflow semantics: it
//! wraps per the declared bit-width rather than promoting to arbitrary
//! precision. The one deliberate exception is reference-typed `ADD`, which
//! widens to a reference, as address arithmetic produces addresses.

use crate::{
    error::transform::{Error, Result},
    value::{
        known::KnownValue,
        operator::{CompareKind, Operator},
    },
};

/// Evaluates `operator` over fully-known `operands`.
///
/// Returns [`None`] when the combination is outside the evaluator's domain
/// but legitimately left symbolic (for example division by a constant
/// zero, whose trap semantics the functional encoding does not model).
///
/// # Errors
///
/// Returns [`Err`] if the operator cannot be implemented for the operand
/// types at all.
#[allow(clippy::too_many_lines)] // The operator table is one logical unit
pub fn evaluate(operator: Operator, operands: &[KnownValue]) -> Result<Option<KnownValue>> {
    let unsupported = || {
        let rendered = operands
            .iter()
            .map(std::string::ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Error::UnsupportedOperator {
            operator,
            operands: rendered,
        }
    };

    let result = match operator {
        Operator::Add => binary_numeric(operands, i32::wrapping_add, i64::wrapping_add, |a, b| {
            a + b
        })?,
        Operator::Sub => binary_numeric(operands, i32::wrapping_sub, i64::wrapping_sub, |a, b| {
            a - b
        })?,
        Operator::Mul => binary_numeric(operands, i32::wrapping_mul, i64::wrapping_mul, |a, b| {
            a * b
        })?,
        Operator::Div => match operands {
            [left, right] if right.is_falsy() && !right.value_type().is_floating() => {
                // Integer division by zero traps on the source machine; the
                // functional encoding leaves it symbolic.
                let _ = left;
                None
            }
            _ => binary_numeric(
                operands,
                i32::wrapping_div,
                i64::wrapping_div,
                |a, b| a / b,
            )?,
        },
        Operator::Rem => match operands {
            [_, right] if right.is_falsy() && !right.value_type().is_floating() => None,
            _ => binary_numeric(
                operands,
                i32::wrapping_rem,
                i64::wrapping_rem,
                |a, b| a % b,
            )?,
        },
        Operator::Neg => match operands {
            [KnownValue::Int(v)] => Some(KnownValue::Int(v.wrapping_neg())),
            [KnownValue::Long(v)] => Some(KnownValue::Long(v.wrapping_neg())),
            [KnownValue::Float(bits)] => Some(KnownValue::from_f32(-f32::from_bits(*bits))),
            [KnownValue::Double(bits)] => Some(KnownValue::from_f64(-f64::from_bits(*bits))),
            _ => return Err(unsupported()),
        },
        Operator::Shl => shift(operands, |a, s| a.wrapping_shl(s), |a, s| a.wrapping_shl(s))
            .ok_or_else(unsupported)
            .map(Some)?,
        Operator::Shr => shift(operands, |a, s| a.wrapping_shr(s), |a, s| a.wrapping_shr(s))
            .ok_or_else(unsupported)
            .map(Some)?,
        Operator::Ushr => shift(
            operands,
            |a, s| (a as u32).wrapping_shr(s) as i32,
            |a, s| (a as u64).wrapping_shr(s) as i64,
        )
        .ok_or_else(unsupported)
        .map(Some)?,
        Operator::And => bitwise(operands, |a, b| a & b).ok_or_else(unsupported).map(Some)?,
        Operator::Or => bitwise(operands, |a, b| a | b).ok_or_else(unsupported).map(Some)?,
        Operator::Xor => bitwise(operands, |a, b| a ^ b).ok_or_else(unsupported).map(Some)?,
        Operator::BAnd => match operands {
            [KnownValue::Bool(a), KnownValue::Bool(b)] => Some(KnownValue::Bool(*a && *b)),
            _ => return Err(unsupported()),
        },
        Operator::BOr => match operands {
            [KnownValue::Bool(a), KnownValue::Bool(b)] => Some(KnownValue::Bool(*a || *b)),
            _ => return Err(unsupported()),
        },
        Operator::BNot => match operands {
            [KnownValue::Bool(a)] => Some(KnownValue::Bool(!a)),
            _ => return Err(unsupported()),
        },
        Operator::Equal
        | Operator::NotEqual
        | Operator::Less
        | Operator::LessEqual
        | Operator::Greater
        | Operator::GreaterEqual => predicate(operator, operands),
        Operator::Compare(kind) => compare(kind, operands),
        Operator::Cast(target) => match operands {
            [value] => Some(value.convert_to(target)),
            _ => return Err(unsupported()),
        },
        Operator::BoolToInt => match operands {
            [KnownValue::Bool(v)] => Some(KnownValue::Int(i32::from(*v))),
            _ => return Err(unsupported()),
        },
        Operator::IntToBool => match operands {
            [value] => Some(KnownValue::Bool(value.is_truthy())),
            _ => return Err(unsupported()),
        },
        // These need expression structure, not just values, and are folded
        // by the passes directly.
        Operator::Ite | Operator::HeapGet | Operator::HeapPut => None,
    };
    Ok(result)
}

/// Evaluates a binary numeric operator, dispatching on the operand widths.
///
/// Reference-typed addition widens to a reference; mixed integral widths
/// compute at the wider width.
fn binary_numeric(
    operands: &[KnownValue],
    int_op: fn(i32, i32) -> i32,
    long_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<Option<KnownValue>> {
    let [left, right] = operands else {
        return Ok(None);
    };

    let result = match (left, right) {
        (KnownValue::Float(a), KnownValue::Float(b)) => Some(KnownValue::from_f32(float_op(
            f64::from(f32::from_bits(*a)),
            f64::from(f32::from_bits(*b)),
        )
            as f32)),
        (KnownValue::Double(a), KnownValue::Double(b)) => Some(KnownValue::from_f64(float_op(
            f64::from_bits(*a),
            f64::from_bits(*b),
        ))),
        (KnownValue::Reference(a), other) => {
            other.as_i64().map(|b| KnownValue::Reference(long_op(*a, b)))
        }
        (other, KnownValue::Reference(b)) => {
            other.as_i64().map(|a| KnownValue::Reference(long_op(a, *b)))
        }
        (KnownValue::Long(a), other) => other.as_i64().map(|b| KnownValue::Long(long_op(*a, b))),
        (other, KnownValue::Long(b)) => other.as_i64().map(|a| KnownValue::Long(long_op(a, *b))),
        (left, right) => match (left.as_i64(), right.as_i64()) {
            #[allow(clippy::cast_possible_truncation)] // Sub-int widths fit
            (Some(a), Some(b)) => Some(KnownValue::Int(int_op(a as i32, b as i32))),
            _ => None,
        },
    };
    Ok(result)
}

/// Evaluates a shift, masking the shift amount at the operand width as the
/// source machine does.
fn shift(
    operands: &[KnownValue],
    int_op: fn(i32, u32) -> i32,
    long_op: fn(i64, u32) -> i64,
) -> Option<KnownValue> {
    let [value, amount] = operands else {
        return None;
    };
    let amount = amount.as_i64()?;
    match value {
        KnownValue::Long(v) => Some(KnownValue::Long(long_op(*v, (amount & 0x3f) as u32))),
        #[allow(clippy::cast_possible_truncation)]
        other => other
            .as_i64()
            .map(|v| KnownValue::Int(int_op(v as i32, (amount & 0x1f) as u32))),
    }
}

/// Evaluates a bitwise operator over integral operands.
fn bitwise(operands: &[KnownValue], op: fn(i64, i64) -> i64) -> Option<KnownValue> {
    let [left, right] = operands else {
        return None;
    };
    if left.value_type().is_floating() || right.value_type().is_floating() {
        return None;
    }
    let result = op(left.as_i64()?, right.as_i64()?);
    match (left, right) {
        (KnownValue::Long(_), _) | (_, KnownValue::Long(_)) => Some(KnownValue::Long(result)),
        #[allow(clippy::cast_possible_truncation)]
        _ => Some(KnownValue::Int(result as i32)),
    }
}

/// Evaluates a comparison predicate over two known values.
fn predicate(operator: Operator, operands: &[KnownValue]) -> Option<KnownValue> {
    let [left, right] = operands else {
        return None;
    };

    let ordering = order(left, right)?;
    let result = match operator {
        Operator::Equal => ordering == std::cmp::Ordering::Equal,
        Operator::NotEqual => ordering != std::cmp::Ordering::Equal,
        Operator::Less => ordering == std::cmp::Ordering::Less,
        Operator::LessEqual => ordering != std::cmp::Ordering::Greater,
        Operator::Greater => ordering == std::cmp::Ordering::Greater,
        Operator::GreaterEqual => ordering != std::cmp::Ordering::Less,
        _ => return None,
    };
    Some(KnownValue::Bool(result))
}

/// Evaluates a three-way comparison, applying the family's NaN sentinel.
fn compare(kind: CompareKind, operands: &[KnownValue]) -> Option<KnownValue> {
    let [left, right] = operands else {
        return None;
    };
    if left.is_nan() || right.is_nan() {
        return Some(KnownValue::Int(kind.nan_sentinel()));
    }
    let ordering = order(left, right)?;
    Some(KnownValue::Int(match ordering {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }))
}

/// Orders two known values numerically, where an ordering exists.
fn order(left: &KnownValue, right: &KnownValue) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (KnownValue::Float(_), _) | (_, KnownValue::Float(_)) => {
            left.as_f32()?.partial_cmp(&right.as_f32()?)
        }
        (KnownValue::Double(_), _) | (_, KnownValue::Double(_)) => {
            left.as_f64()?.partial_cmp(&right.as_f64()?)
        }
        _ => Some(left.as_i64()?.cmp(&right.as_i64()?)),
    }
}

#[cfg(test)]
mod test {
    use crate::{
        transform::evaluate::evaluate,
        value::{
            known::KnownValue,
            operator::{CompareKind, Operator},
        },
    };

    #[test]
    fn addition_wraps_at_the_declared_width() -> anyhow::Result<()> {
        let result = evaluate(
            Operator::Add,
            &[KnownValue::Int(i32::MAX), KnownValue::Int(1)],
        )?;
        assert_eq!(result, Some(KnownValue::Int(i32::MIN)));

        let result = evaluate(
            Operator::Add,
            &[KnownValue::Long(i64::MAX), KnownValue::Long(1)],
        )?;
        assert_eq!(result, Some(KnownValue::Long(i64::MIN)));
        Ok(())
    }

    #[test]
    fn reference_addition_widens_to_reference() -> anyhow::Result<()> {
        let result = evaluate(
            Operator::Add,
            &[KnownValue::Reference(10), KnownValue::Int(3)],
        )?;
        assert_eq!(result, Some(KnownValue::Reference(13)));
        Ok(())
    }

    #[test]
    fn integer_division_by_zero_stays_symbolic() -> anyhow::Result<()> {
        let result = evaluate(Operator::Div, &[KnownValue::Int(4), KnownValue::Int(0)])?;
        assert_eq!(result, None);
        Ok(())
    }

    #[test]
    fn shifts_mask_the_shift_amount() -> anyhow::Result<()> {
        // A shift by 33 on an int shifts by 1.
        let result = evaluate(Operator::Shl, &[KnownValue::Int(1), KnownValue::Int(33)])?;
        assert_eq!(result, Some(KnownValue::Int(2)));
        Ok(())
    }

    #[test]
    fn comparisons_of_nan_produce_the_family_sentinel() -> anyhow::Result<()> {
        let nan = KnownValue::from_f64(f64::NAN);
        let one = KnownValue::from_f64(1.0);

        let greater = evaluate(Operator::Compare(CompareKind::DoubleG), &[nan, one])?;
        assert_eq!(greater, Some(KnownValue::Int(1)));

        let less = evaluate(Operator::Compare(CompareKind::DoubleL), &[nan, one])?;
        assert_eq!(less, Some(KnownValue::Int(-1)));
        Ok(())
    }

    #[test]
    fn three_way_comparison_orders_longs() -> anyhow::Result<()> {
        let result = evaluate(
            Operator::Compare(CompareKind::Long),
            &[KnownValue::Long(3), KnownValue::Long(9)],
        )?;
        assert_eq!(result, Some(KnownValue::Int(-1)));
        Ok(())
    }

    #[test]
    fn boolean_operators_require_booleans() {
        evaluate(Operator::BAnd, &[KnownValue::Int(1), KnownValue::Int(0)])
            .expect_err("BAND of integers must be an unsupported-operator error");
    }

    #[test]
    fn casts_truncate_per_the_conversion_rules() -> anyhow::Result<()> {
        let result = evaluate(
            Operator::Cast(crate::value::types::ValueType::Byte),
            &[KnownValue::Int(0x1ff)],
        )?;
        assert_eq!(result, Some(KnownValue::Byte(-1)));
        Ok(())
    }
}

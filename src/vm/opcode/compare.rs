//! The mapping arm for the three-way comparison family.

use crate::{
    error::Result,
    value::{
        known::KnownValue,
        operator::{CompareKind, Operator},
        types::ValueType,
        Expression,
    },
    vm::{context::Context, SymbolicVM},
};

/// Executes a three-way comparison.
///
/// # Semantics
///
/// | Stack Index | Input | Output                                      |
/// | :---------: | :---: | :-----------------------------------------: |
/// | 1           | `b`   | `if a > b then 1 else if a == b then 0 else -1` |
/// | 2           | `a`   |                                             |
///
/// # NaN
///
/// When both operands are statically known constants and either is NaN, the
/// fixed NaN sentinel of the comparison family is pushed directly: `1` for
/// the `G` variants and `-1` for the `L` variants. Symbolic NaN-bearing
/// comparisons fall through to a generic `COMPARE` node with no NaN guard,
/// which under-models IEEE semantics for symbolic floats; callers that need
/// bit-exact float behavior should not rely on this path.
///
/// # Errors
///
/// Returns [`Err`] if the machine state does not allow execution.
pub fn three_way(vm: &mut SymbolicVM, ctx: &mut Context, pc: u32, kind: CompareKind) -> Result<()> {
    let ty = match kind {
        CompareKind::Long => ValueType::Long,
        CompareKind::FloatG | CompareKind::FloatL => ValueType::Float,
        CompareKind::DoubleG | CompareKind::DoubleL => ValueType::Double,
    };
    let right = ctx.pop(vm.graph_mut(), pc, ty)?;
    let left = ctx.pop(vm.graph_mut(), pc, ty)?;

    if let (Some(left_value), Some(right_value)) = (left.as_constant(), right.as_constant()) {
        if left_value.is_nan() || right_value.is_nan() {
            let sentinel = KnownValue::Int(kind.nan_sentinel());
            ctx.push(pc, Expression::constant(pc, sentinel))?;
            return Ok(());
        }
    }

    let result = Expression::op(
        pc,
        Operator::Compare(kind),
        vec![left, right],
        ValueType::Int,
    );
    ctx.push(pc, result)?;
    Ok(())
}

//! Shared helpers for the integration tests.

#![allow(dead_code)] // Not all helpers are used by every test binary.

use bytecode_constraint_compiler::{
    unit::UnitId,
    value::{types::ValueType, Expression, ProcessedCall, Variable},
};

/// Builds an integer constant expression.
pub fn int(value: i32) -> Expression {
    Expression::int(0, value)
}

/// Builds a boolean constant expression.
pub fn boolean(value: bool) -> Expression {
    Expression::boolean(0, value)
}

/// Builds an integer variable expression.
pub fn int_var(name: &str) -> Expression {
    Expression::variable(0, Variable::new(name, ValueType::Int))
}

/// Builds a processed call expression.
pub fn pcall(target: UnitId, arguments: Vec<Expression>) -> Expression {
    Expression::processed(0, ProcessedCall { target, arguments })
}

/// Counts the conditional nodes in an expression tree.
pub fn count_conditionals(expr: &Expression) -> usize {
    let mut count = 0;
    expr.visit(&mut |node| {
        if let bytecode_constraint_compiler::value::ExprData::Op {
            operator: bytecode_constraint_compiler::value::operator::Operator::Ite,
            ..
        } = node.data()
        {
            count += 1;
        }
    });
    count
}

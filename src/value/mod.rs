//! This module contains the definition of the symbolic [`Expression`] and its
//! supporting types.
//!
//! Expressions are immutable trees built during symbolic execution and
//! rewritten by the transformation pipeline. Every node carries the program
//! counter at which it was created, purely as provenance: two expressions
//! compare equal when their structure is equal, regardless of where they were
//! built.

pub mod known;
pub mod operator;
pub mod types;

use std::fmt::{Display, Formatter};

use derivative::Derivative;
use itertools::Itertools;

use crate::{
    error::transform,
    unit::{CallSiteId, UnitId},
    value::{known::KnownValue, operator::Operator, types::ValueType},
};

/// A named, typed free value in the functional program.
///
/// Variables stand for operand-stack slots, local-variable slots, static
/// fields and heap parameters. Identity is name plus type.
#[derive(Clone, Debug, Eq, Hash, PartialEq, serde::Serialize)]
pub struct Variable {
    /// The unique name of the variable.
    pub name: String,

    /// The type of the value the variable stands for.
    pub ty: ValueType,
}

impl Variable {
    /// Constructs a new variable with the provided `name` and type `ty`.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.ty)
    }
}

/// The two flavors of call site the symbolic executor produces.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CallKind {
    /// A call that enters a new frame or transfers control to another basic
    /// block.
    Invoke,

    /// A call that propagates a return value into the continuation unit at
    /// the caller's post-call program point.
    Return,
}

/// A reference to a callee unit together with its ordered arguments.
///
/// The call also names the [`CallSiteId`] under which the unit graph has
/// frozen the caller's state, which the parameter back-propagation fixed
/// point consults when the callee's signature grows.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FunctionCall {
    /// The unit being called.
    pub target: UnitId,

    /// Whether this is an invoke or a return call.
    pub kind: CallKind,

    /// The ordered arguments, lining up with the callee's parameter order.
    pub arguments: Vec<Expression>,

    /// The identity of the frozen caller state for this call site.
    pub site: CallSiteId,
}

/// The uniform call form that the transformation pipeline collapses both
/// call flavors into once parameter propagation has converged.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ProcessedCall {
    /// The unit being called.
    pub target: UnitId,

    /// The ordered arguments, lining up with the callee's parameter order.
    pub arguments: Vec<Expression>,
}

/// The payload of a symbolic expression node.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ExprData {
    /// A typed literal value.
    Constant(KnownValue),

    /// A constant symbolic heap, represented as an ordered sequence of slot
    /// expressions.
    ///
    /// Although it plays the role of a constant, a snapshot is logically a
    /// sequence of sub-expressions, and the transformer recurses into every
    /// slot rather than treating it as an opaque leaf.
    Snapshot(Vec<Expression>),

    /// A named, typed free value.
    Variable(Variable),

    /// An operator applied to an ordered list of operands.
    Op {
        /// The operator at the head of the application.
        operator: Operator,

        /// The ordered operand expressions.
        operands: Vec<Expression>,

        /// An optional hint for the type of the result.
        hint: ValueType,
    },

    /// A call produced by the symbolic executor.
    Call(FunctionCall),

    /// A call in the uniform processed form.
    ProcessedCall(ProcessedCall),
}

/// A symbolic expression: an immutable tree recording the computation of one
/// value.
#[derive(Clone, Debug, Derivative)]
#[derivative(Eq, Hash, PartialEq)]
pub struct Expression {
    /// The program counter at which this node was created.
    ///
    /// This is provenance only and takes no part in equality or hashing.
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pc: u32,

    /// The payload of the node.
    data: ExprData,
}

impl Expression {
    /// Constructs a new expression created at `pc` with the provided `data`.
    #[must_use]
    pub fn new(pc: u32, data: ExprData) -> Self {
        Self { pc, data }
    }

    /// Constructs a constant expression.
    #[must_use]
    pub fn constant(pc: u32, value: KnownValue) -> Self {
        Self::new(pc, ExprData::Constant(value))
    }

    /// Constructs a boolean constant expression.
    #[must_use]
    pub fn boolean(pc: u32, value: bool) -> Self {
        Self::constant(pc, KnownValue::Bool(value))
    }

    /// Constructs an integer constant expression.
    #[must_use]
    pub fn int(pc: u32, value: i32) -> Self {
        Self::constant(pc, KnownValue::Int(value))
    }

    /// Constructs a heap snapshot expression from ordered `slots`.
    #[must_use]
    pub fn snapshot(pc: u32, slots: Vec<Expression>) -> Self {
        Self::new(pc, ExprData::Snapshot(slots))
    }

    /// Constructs a variable expression.
    #[must_use]
    pub fn variable(pc: u32, variable: Variable) -> Self {
        Self::new(pc, ExprData::Variable(variable))
    }

    /// Constructs an operator application.
    #[must_use]
    pub fn op(pc: u32, operator: Operator, operands: Vec<Expression>, hint: ValueType) -> Self {
        Self::new(
            pc,
            ExprData::Op {
                operator,
                operands,
                hint,
            },
        )
    }

    /// Constructs a call expression.
    #[must_use]
    pub fn call(pc: u32, call: FunctionCall) -> Self {
        Self::new(pc, ExprData::Call(call))
    }

    /// Constructs a processed call expression.
    #[must_use]
    pub fn processed(pc: u32, call: ProcessedCall) -> Self {
        Self::new(pc, ExprData::ProcessedCall(call))
    }

    /// Gets the program counter at which this node was created.
    #[must_use]
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Gets a reference to the payload of this node.
    #[must_use]
    pub fn data(&self) -> &ExprData {
        &self.data
    }

    /// Consumes the expression, returning its payload.
    #[must_use]
    pub fn into_data(self) -> ExprData {
        self.data
    }

    /// Gets the constant payload of this node, if it is a scalar constant.
    #[must_use]
    pub fn as_constant(&self) -> Option<KnownValue> {
        match &self.data {
            ExprData::Constant(value) => Some(*value),
            _ => None,
        }
    }

    /// Checks whether this expression is the boolean constant `false`.
    #[must_use]
    pub fn is_false(&self) -> bool {
        matches!(self.data, ExprData::Constant(KnownValue::Bool(false)))
    }

    /// Computes the statically-known type of the value this expression
    /// produces.
    ///
    /// Calls produce [`ValueType::Undefined`] as their type depends on the
    /// callee's body; the final cleanup pass retypes anything still
    /// undefined.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match &self.data {
            ExprData::Constant(value) => value.value_type(),
            ExprData::Snapshot(_) => ValueType::Reference,
            ExprData::Variable(variable) => variable.ty,
            ExprData::Op {
                operator,
                operands,
                hint,
            } => match operator {
                Operator::Cast(target) => *target,
                Operator::BoolToInt | Operator::Compare(_) => ValueType::Int,
                op if op.is_predicate() => ValueType::Bool,
                Operator::Ite => {
                    let branch = operands.get(1).map_or(ValueType::Undefined, Self::value_type);
                    if branch == ValueType::Undefined {
                        *hint
                    } else {
                        branch
                    }
                }
                Operator::HeapPut => ValueType::Reference,
                _ if *hint != ValueType::Undefined => *hint,
                _ => operands.first().map_or(ValueType::Undefined, Self::value_type),
            },
            ExprData::Call(_) | ExprData::ProcessedCall(_) => ValueType::Undefined,
        }
    }

    /// Applies the total transform function `f` to this expression tree in
    /// post-order, returning the rewritten tree.
    ///
    /// # Ordering
    ///
    /// Children are rewritten before `f` sees their parent, with two special
    /// cases:
    ///
    /// - The slots of a heap [`ExprData::Snapshot`] are each rewritten and a
    ///   new snapshot is rebuilt bottom-up, since a snapshot is a sequence of
    ///   sub-expressions rather than an opaque leaf.
    /// - The condition of an ITE is rewritten and reduced *before* the branch
    ///   operands are visited. If reducing the condition collapses the node
    ///   into something that is no longer an ITE, the transform re-dispatches
    ///   on the replacement instead of continuing as an ITE.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `f` errors on any node. Traversal does not
    /// partially apply: the first failure aborts the whole rewrite.
    pub fn transform(
        &self,
        f: &mut dyn FnMut(Expression) -> transform::Result<Expression>,
    ) -> transform::Result<Expression> {
        let pc = self.pc;
        match &self.data {
            ExprData::Constant(_) | ExprData::Variable(_) => f(self.clone()),
            ExprData::Snapshot(slots) => {
                let new_slots = slots
                    .iter()
                    .map(|slot| slot.transform(f))
                    .collect::<transform::Result<Vec<_>>>()?;
                f(Self::snapshot(pc, new_slots))
            }
            ExprData::Op {
                operator: Operator::Ite,
                operands,
                hint,
            } => {
                let condition = operands[0].transform(f)?;
                let probe = Self::op(
                    pc,
                    Operator::Ite,
                    vec![condition.clone(), operands[1].clone(), operands[2].clone()],
                    *hint,
                );
                let candidate = f(probe.clone())?;

                // If reducing the condition changed the node (it may have
                // collapsed to a branch, which has not been visited yet),
                // re-dispatch on the replacement instead of continuing as a
                // conditional.
                if candidate != probe {
                    return candidate.transform(f);
                }

                // The node survived condition reduction, so the branches can
                // legally be visited now.
                let true_branch = operands[1].transform(f)?;
                let false_branch = operands[2].transform(f)?;
                f(Self::op(
                    pc,
                    Operator::Ite,
                    vec![condition, true_branch, false_branch],
                    *hint,
                ))
            }
            ExprData::Op {
                operator,
                operands,
                hint,
            } => {
                let new_operands = operands
                    .iter()
                    .map(|operand| operand.transform(f))
                    .collect::<transform::Result<Vec<_>>>()?;
                f(Self::op(pc, *operator, new_operands, *hint))
            }
            ExprData::Call(call) => {
                let arguments = call
                    .arguments
                    .iter()
                    .map(|argument| argument.transform(f))
                    .collect::<transform::Result<Vec<_>>>()?;
                f(Self::call(
                    pc,
                    FunctionCall {
                        target: call.target,
                        kind: call.kind,
                        arguments,
                        site: call.site,
                    },
                ))
            }
            ExprData::ProcessedCall(call) => {
                let arguments = call
                    .arguments
                    .iter()
                    .map(|argument| argument.transform(f))
                    .collect::<transform::Result<Vec<_>>>()?;
                f(Self::processed(
                    pc,
                    ProcessedCall {
                        target: call.target,
                        arguments,
                    },
                ))
            }
        }
    }

    /// Applies the infallible transform function `f` in post-order, returning
    /// the rewritten tree.
    ///
    /// This is a convenience over [`Self::transform`] for rules that cannot
    /// fail.
    #[must_use]
    #[allow(clippy::missing_panics_doc)] // The closure is infallible
    pub fn rewrite(&self, f: &mut dyn FnMut(Expression) -> Expression) -> Expression {
        self.transform(&mut |e| Ok(f(e)))
            .expect("An infallible rewrite cannot error")
    }

    /// Visits every node of this expression tree in pre-order, including
    /// snapshot slots and call arguments.
    pub fn visit(&self, f: &mut dyn FnMut(&Expression)) {
        f(self);
        match &self.data {
            ExprData::Constant(_) | ExprData::Variable(_) => (),
            ExprData::Snapshot(children) => {
                children.iter().for_each(|child| child.visit(f));
            }
            ExprData::Op { operands, .. } => {
                operands.iter().for_each(|operand| operand.visit(f));
            }
            ExprData::Call(FunctionCall { arguments, .. })
            | ExprData::ProcessedCall(ProcessedCall { arguments, .. }) => {
                arguments.iter().for_each(|argument| argument.visit(f));
            }
        }
    }

    /// Checks whether the provided `variable` occurs anywhere in this
    /// expression tree.
    #[must_use]
    pub fn mentions(&self, variable: &Variable) -> bool {
        let mut found = false;
        self.visit(&mut |node| {
            if let ExprData::Variable(v) = node.data() {
                if v == variable {
                    found = true;
                }
            }
        });
        found
    }

    /// Replaces every occurrence of the keys of `bindings` with the
    /// corresponding replacement expression.
    #[must_use]
    pub fn substitute(&self, bindings: &std::collections::HashMap<Variable, Expression>) -> Self {
        self.rewrite(&mut |node| match node.data() {
            ExprData::Variable(v) => bindings.get(v).cloned().unwrap_or(node),
            _ => node,
        })
    }

    /// Collects the target of every call that occurs in this expression tree.
    #[must_use]
    pub fn call_targets(&self) -> Vec<UnitId> {
        let mut targets = Vec::new();
        self.visit(&mut |node| match node.data() {
            ExprData::Call(call) => targets.push(call.target),
            ExprData::ProcessedCall(call) => targets.push(call.target),
            _ => (),
        });
        targets
    }
}

/// Pretty-prints the expression in its literal text form, which is the form
/// in which failing nodes are reported.
impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.data {
            ExprData::Constant(value) => write!(f, "{value}"),
            ExprData::Snapshot(slots) => {
                write!(f, "HEAP[{}]", slots.iter().map(ToString::to_string).join(", "))
            }
            ExprData::Variable(variable) => write!(f, "{variable}"),
            ExprData::Op {
                operator, operands, ..
            } => {
                write!(
                    f,
                    "{operator}({})",
                    operands.iter().map(ToString::to_string).join(", ")
                )
            }
            ExprData::Call(call) => {
                let tag = match call.kind {
                    CallKind::Invoke => "CALL",
                    CallKind::Return => "RET",
                };
                write!(
                    f,
                    "{tag}[{}]({})",
                    call.target,
                    call.arguments.iter().map(ToString::to_string).join(", ")
                )
            }
            ExprData::ProcessedCall(call) => {
                write!(
                    f,
                    "PCALL[{}]({})",
                    call.target,
                    call.arguments.iter().map(ToString::to_string).join(", ")
                )
            }
        }
    }
}

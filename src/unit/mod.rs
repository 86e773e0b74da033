//! This module contains the symbolic execution unit: the functional
//! representation of one basic block's effect (or of a generated variant
//! produced by a transform), parameterized over its free inputs.

pub mod graph;

pub use graph::{CallSite, FrozenState, UnitGraph};

use crate::{
    bytecode::pool::FieldRef,
    value::{types::ValueType, Expression, Variable},
    vm::frame::FrameId,
};

/// The identity of a unit within the unit graph.
///
/// Units refer to each other exclusively through these indices. The graph of
/// units is cyclic in the presence of recursion, and handle-based identity
/// lets cycle detection and copying-with-remapping work on plain data.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnitId(pub usize);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// The identity of a call site within the unit graph.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CallSiteId(pub usize);

/// The kind of requirement a unit parameter stands for.
///
/// The four kinds partition a unit's free inputs by where the value comes
/// from in the imperative machine: the caller's operand stack, a local
/// variable slot of a specific call frame, a static field, or the symbolic
/// heap.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ParamKind {
    /// A value popped from below the unit's own operand stack.
    ///
    /// Depth 0 is the first value the unit popped beyond what it pushed
    /// itself, depth 1 the second, and so on.
    Stack {
        /// The underflow depth of the parameter.
        depth: usize,
    },

    /// The value of a local variable slot on entry to the unit.
    Local {
        /// The local variable slot.
        slot: u16,

        /// The call frame the slot belongs to.
        frame: FrameId,
    },

    /// The value of a static field on entry to the unit.
    Static {
        /// The field the parameter stands for.
        field: FieldRef,
    },

    /// The symbolic heap on entry to the unit.
    ///
    /// Before heap unboxing the whole heap is a single parameter with no
    /// slot; partial evaluation may replace it with one parameter per slot
    /// of a constant snapshot.
    Heap {
        /// The heap slot index, or [`None`] for the whole heap.
        slot: Option<usize>,
    },
}

/// A single declared parameter of a unit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Parameter {
    /// The variable that stands for the parameter inside the unit's body.
    pub variable: Variable,

    /// The requirement the parameter satisfies.
    pub kind: ParamKind,
}

/// The ordered set of parameters a unit requires.
///
/// The set only ever grows, and the position of a parameter never changes
/// once added; call-site argument lists line up with this order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

impl ParameterSet {
    /// Creates a new, empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the parameters in declaration order.
    #[must_use]
    pub fn as_slice(&self) -> &[Parameter] {
        &self.params
    }

    /// Gets the number of declared parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Checks whether no parameters are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Gets the parameter with the provided `kind`, if it is declared.
    #[must_use]
    pub fn find(&self, kind: ParamKind) -> Option<&Parameter> {
        self.params.iter().find(|p| p.kind == kind)
    }

    /// Gets the declaration index of the parameter with the provided `kind`.
    #[must_use]
    pub fn index_of(&self, kind: ParamKind) -> Option<usize> {
        self.params.iter().position(|p| p.kind == kind)
    }

    /// Declares `parameter` if no parameter of the same kind exists yet,
    /// returning whether the set grew.
    pub fn declare(&mut self, parameter: Parameter) -> bool {
        if self.find(parameter.kind).is_some() {
            return false;
        }
        self.params.push(parameter);
        true
    }

    /// Removes the parameter at `index`, shifting later parameters down.
    ///
    /// Callers are responsible for removing the corresponding argument from
    /// every call site.
    pub fn remove(&mut self, index: usize) -> Parameter {
        self.params.remove(index)
    }

    /// Replaces the variable of the parameter at `index`, leaving its kind
    /// and position untouched.
    pub fn replace_variable(&mut self, index: usize, variable: Variable) {
        if let Some(param) = self.params.get_mut(index) {
            param.variable = variable;
        }
    }

    /// Counts the declared parameters of stack kind.
    #[must_use]
    pub fn stack_count(&self) -> usize {
        self.params
            .iter()
            .filter(|p| matches!(p.kind, ParamKind::Stack { .. }))
            .count()
    }
}

/// A symbolic execution unit: the functional form of one basic block's
/// effect, or a generated variant of one.
///
/// # Lifecycle
///
/// A unit is created empty when its block is first reached, mutated
/// incrementally while parameter back-propagation discovers its missing
/// inputs, and is effectively immutable once no further missing parameters
/// are found anywhere in the graph. Units are never destroyed; passes that
/// specialize a unit create a new one and leave the original reachable for
/// caching and deduplication by name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SEFunction {
    /// The unique name of the unit.
    name: String,

    /// The body expression, absent until the unit's block has been executed.
    body: Option<Expression>,

    /// The ordered parameters the unit requires.
    params: ParameterSet,

    /// The units that call this unit and must be re-notified whenever the
    /// parameter set grows.
    observers: Vec<UnitId>,

    /// Whether the recursion detector must treat calls to this unit as
    /// non-recursive.
    ///
    /// Set on the copies produced by recursion unrolling so that the
    /// detector halts below the unrolled depth.
    non_recursive: bool,

    /// Whether the unit was generated by a transform pass rather than by
    /// symbolic execution.
    generated: bool,

    /// The number of stack parameters the unit synthesized while its block
    /// was translated.
    ///
    /// Escalated stack requirements arriving later through back-propagation
    /// are keyed past this count, so the value is frozen at finalization.
    incoming_stack: usize,
}

impl SEFunction {
    /// Creates a new, empty unit with the provided `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: None,
            params: ParameterSet::new(),
            observers: Vec::new(),
            non_recursive: false,
            generated: false,
            incoming_stack: 0,
        }
    }

    /// Gets the name of the unit.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the body of the unit, if it has been assigned.
    #[must_use]
    pub fn body(&self) -> Option<&Expression> {
        self.body.as_ref()
    }

    /// Assigns the body of the unit.
    pub fn set_body(&mut self, body: Expression) {
        self.body = Some(body);
    }

    /// Gets the declared parameters of the unit.
    #[must_use]
    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    /// Gets mutable access to the declared parameters of the unit.
    pub fn params_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    /// Declares a parameter of the provided `kind` and type `ty`, returning
    /// the variable that stands for it and whether the set grew.
    ///
    /// The variable is named after the unit and the requirement, so that
    /// identical requirements of different units never collide.
    pub fn require(&mut self, kind: ParamKind, ty: ValueType) -> (Variable, bool) {
        if let Some(existing) = self.params.find(kind) {
            return (existing.variable.clone(), false);
        }

        let name = match kind {
            ParamKind::Stack { depth } => format!("{}_s{depth}", self.name),
            ParamKind::Local { slot, frame } => format!("{}_l{slot}f{frame}", self.name),
            ParamKind::Static { field } => {
                format!("{}_st{}x{}", self.name, field.class.0, field.index)
            }
            ParamKind::Heap { slot: None } => format!("{}_h", self.name),
            ParamKind::Heap { slot: Some(slot) } => format!("{}_h{slot}", self.name),
        };
        let variable = Variable::new(name, ty);
        self.params.declare(Parameter {
            variable: variable.clone(),
            kind,
        });
        (variable, true)
    }

    /// Registers `observer` as a unit that must be re-queried when this
    /// unit's parameter needs grow.
    pub fn observe(&mut self, observer: UnitId) {
        if !self.observers.contains(&observer) {
            self.observers.push(observer);
        }
    }

    /// Gets the units observing this one.
    #[must_use]
    pub fn observers(&self) -> &[UnitId] {
        &self.observers
    }

    /// Freezes the number of stack parameters synthesized during
    /// translation.
    pub fn set_incoming_stack(&mut self, count: usize) {
        self.incoming_stack = count;
    }

    /// Gets the number of stack parameters synthesized during translation.
    #[must_use]
    pub fn incoming_stack(&self) -> usize {
        self.incoming_stack
    }

    /// Marks the unit as exempt from recursion detection.
    pub fn mark_non_recursive(&mut self) {
        self.non_recursive = true;
    }

    /// Checks whether the recursion detector must skip this unit.
    #[must_use]
    pub fn is_non_recursive(&self) -> bool {
        self.non_recursive
    }

    /// Marks the unit as generated by a transform pass.
    pub fn mark_generated(&mut self) {
        self.generated = true;
    }

    /// Checks whether the unit was generated by a transform pass.
    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.generated
    }
}

#[cfg(test)]
mod test {
    use crate::{
        unit::{ParamKind, SEFunction},
        value::types::ValueType,
        vm::frame::FrameId,
    };

    #[test]
    fn requiring_the_same_kind_twice_reuses_the_parameter() {
        let mut unit = SEFunction::new("m0_b0_f0");
        let (first, grew_first) = unit.require(ParamKind::Stack { depth: 0 }, ValueType::Int);
        let (second, grew_second) = unit.require(ParamKind::Stack { depth: 0 }, ValueType::Int);

        assert!(grew_first);
        assert!(!grew_second);
        assert_eq!(first, second);
        assert_eq!(unit.params().len(), 1);
    }

    #[test]
    fn parameter_names_are_scoped_to_the_unit() {
        let mut left = SEFunction::new("a");
        let mut right = SEFunction::new("b");
        let kind = ParamKind::Local {
            slot: 1,
            frame: FrameId(0),
        };

        let (left_var, _) = left.require(kind, ValueType::Int);
        let (right_var, _) = right.require(kind, ValueType::Int);
        assert_ne!(left_var, right_var);
    }

    #[test]
    fn observers_are_not_duplicated() {
        let mut unit = SEFunction::new("x");
        unit.observe(crate::unit::UnitId(3));
        unit.observe(crate::unit::UnitId(3));
        assert_eq!(unit.observers().len(), 1);
    }
}

//! This module contains the per-block execution context: the mutable scratch
//! state through which the instruction mapping threads the operand stack,
//! locals, heap and statics while translating one basic block.

use std::collections::HashMap;

use crate::{
    bytecode::pool::FieldRef,
    error::{container::Locatable, execution},
    unit::{FrozenState, ParamKind, UnitGraph, UnitId},
    value::{operator::Operator, types::ValueType, Expression},
    vm::{frame::FrameId, stack::Stack},
};

/// The mutable scratch state used while translating one basic block into its
/// unit's body.
///
/// Exactly one context is live per call depth while a block is being
/// processed, and a context is dropped once its unit's body is finalized;
/// anything a later consumer might need is frozen into call-site state
/// before that happens.
#[derive(Clone, Debug)]
pub struct Context {
    /// The unit whose body this context is building.
    unit: UnitId,

    /// The frame the block executes in.
    frame: FrameId,

    /// The symbolic operand stack.
    stack: Stack,

    /// The number of stack parameters synthesized so far by popping beyond
    /// the values this block pushed itself.
    underflow: usize,

    /// The local variable values known in this block, for this frame.
    locals: HashMap<u16, Expression>,

    /// The static field values known in this block.
    statics: HashMap<FieldRef, Expression>,

    /// The heap expression threaded through PUT operations, if the block has
    /// touched the heap.
    heap: Option<Expression>,

    /// The next free heap address, tracked while the block allocates.
    heapsize: Option<Expression>,

    /// The terminal expression of the block, assigned by control transfers.
    terminal: Option<Expression>,
}

impl Context {
    /// Creates a fresh context for building the body of `unit` in `frame`.
    #[must_use]
    pub fn new(unit: UnitId, frame: FrameId) -> Self {
        Self {
            unit,
            frame,
            stack: Stack::new(),
            underflow: 0,
            locals: HashMap::new(),
            statics: HashMap::new(),
            heap: None,
            heapsize: None,
            terminal: None,
        }
    }

    /// Gets the unit whose body this context is building.
    #[must_use]
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Gets the frame the block executes in.
    #[must_use]
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    /// Pushes `value` onto the operand stack.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the stack is at its maximum depth.
    pub fn push(&mut self, pc: u32, value: Expression) -> execution::Result<()> {
        self.stack.push(value).locate(pc)
    }

    /// Pops the top of the operand stack.
    ///
    /// Popping from an empty stack synthesizes exactly one fresh stack
    /// parameter of type `expected` on the owning unit instead of failing:
    /// this is how a block's free stack inputs are discovered lazily.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the unit graph is inconsistent.
    pub fn pop(
        &mut self,
        graph: &mut UnitGraph,
        pc: u32,
        expected: ValueType,
    ) -> execution::Result<Expression> {
        if let Some(value) = self.stack.pop() {
            return Ok(value);
        }

        let depth = self.underflow;
        self.underflow += 1;
        let (variable, _) = graph
            .unit_mut(self.unit)?
            .require(ParamKind::Stack { depth }, expected.stack_type());
        Ok(Expression::variable(pc, variable))
    }

    /// Reads the local variable `slot`, synthesizing a fresh local parameter
    /// of type `ty` if the slot has not been written in this block.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the unit graph is inconsistent.
    pub fn local(
        &mut self,
        graph: &mut UnitGraph,
        pc: u32,
        slot: u16,
        ty: ValueType,
    ) -> execution::Result<Expression> {
        if let Some(value) = self.locals.get(&slot) {
            return Ok(value.clone());
        }

        let (variable, _) = graph.unit_mut(self.unit)?.require(
            ParamKind::Local {
                slot,
                frame: self.frame,
            },
            ty,
        );
        let value = Expression::variable(pc, variable);
        self.locals.insert(slot, value.clone());
        Ok(value)
    }

    /// Writes `value` into the local variable `slot`.
    pub fn set_local(&mut self, slot: u16, value: Expression) {
        self.locals.insert(slot, value);
    }

    /// Reads the static field `field`, synthesizing a fresh static parameter
    /// of type `ty` if the field has not been written in this block.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the unit graph is inconsistent.
    pub fn static_field(
        &mut self,
        graph: &mut UnitGraph,
        pc: u32,
        field: FieldRef,
        ty: ValueType,
    ) -> execution::Result<Expression> {
        if let Some(value) = self.statics.get(&field) {
            return Ok(value.clone());
        }

        let (variable, _) = graph
            .unit_mut(self.unit)?
            .require(ParamKind::Static { field }, ty);
        let value = Expression::variable(pc, variable);
        self.statics.insert(field, value.clone());
        Ok(value)
    }

    /// Writes `value` into the static field `field`.
    pub fn set_static(&mut self, field: FieldRef, value: Expression) {
        self.statics.insert(field, value);
    }

    /// Gets the heap expression, synthesizing the unit's heap parameter if
    /// the block has not touched the heap yet.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the unit graph is inconsistent.
    pub fn heap(&mut self, graph: &mut UnitGraph, pc: u32) -> execution::Result<Expression> {
        if let Some(heap) = &self.heap {
            return Ok(heap.clone());
        }

        let (variable, _) = graph
            .unit_mut(self.unit)?
            .require(ParamKind::Heap { slot: None }, ValueType::Reference);
        let heap = Expression::variable(pc, variable);
        self.heap = Some(heap.clone());
        Ok(heap)
    }

    /// Replaces the threaded heap expression.
    pub fn set_heap(&mut self, heap: Expression) {
        self.heap = Some(heap);
    }

    /// Installs the initial heap for a root unit, together with its size.
    pub fn seed_heap(&mut self, heap: Expression, heapsize: Expression) {
        self.heap = Some(heap);
        self.heapsize = Some(heapsize);
    }

    /// Gets the next free heap address.
    ///
    /// The allocation cursor is stored in reserved heap slot 0 (the null
    /// slot), so when the block has not allocated yet the cursor is read
    /// from the heap value itself.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the unit graph is inconsistent.
    pub fn heapsize(&mut self, graph: &mut UnitGraph, pc: u32) -> execution::Result<Expression> {
        if let Some(heapsize) = &self.heapsize {
            return Ok(heapsize.clone());
        }

        let heap = self.heap(graph, pc)?;
        let heapsize = Expression::op(
            pc,
            Operator::HeapGet,
            vec![heap, Expression::int(pc, 0)],
            ValueType::Int,
        );
        self.heapsize = Some(heapsize.clone());
        Ok(heapsize)
    }

    /// Replaces the next free heap address.
    pub fn set_heapsize(&mut self, heapsize: Expression) {
        self.heapsize = Some(heapsize);
    }

    /// Gets the terminal expression of the block, if one has been assigned.
    #[must_use]
    pub fn terminal(&self) -> Option<&Expression> {
        self.terminal.as_ref()
    }

    /// Assigns the terminal expression of the block.
    ///
    /// Control transfers assign this directly; it is never pushed onto the
    /// operand stack.
    pub fn set_terminal(&mut self, terminal: Expression) {
        self.terminal = Some(terminal);
    }

    /// Consumes the context, returning its terminal expression if assigned.
    #[must_use]
    pub fn into_terminal(self) -> Option<Expression> {
        self.terminal
    }

    /// Gets direct access to the operand stack.
    #[must_use]
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Gets mutable access to the operand stack.
    pub fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    /// Freezes the caller-visible state of this context for a call site.
    ///
    /// The frozen state is what the parameter back-propagation fixed point
    /// consults when the callee's signature grows after this context is
    /// gone.
    #[must_use]
    pub fn freeze(&self) -> FrozenState {
        let locals = self
            .locals
            .iter()
            .map(|(slot, value)| ((self.frame, *slot), value.clone()))
            .collect();
        FrozenState {
            stack: self.stack.contents().to_vec(),
            locals,
            statics: self.statics.clone(),
            heap: self.heap.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        unit::{ParamKind, UnitGraph},
        value::{types::ValueType, ExprData, Expression},
        vm::{context::Context, frame::FrameId},
    };

    fn new_context(graph: &mut UnitGraph) -> Context {
        let unit = graph.get_or_create("m0_b0_f0");
        Context::new(unit, FrameId(0))
    }

    #[test]
    fn popping_an_empty_stack_synthesizes_one_parameter() -> anyhow::Result<()> {
        let mut graph = UnitGraph::new();
        let mut ctx = new_context(&mut graph);

        let value = ctx.pop(&mut graph, 0, ValueType::Int)?;
        assert!(matches!(value.data(), ExprData::Variable(_)));

        let unit = graph.unit(ctx.unit())?;
        assert_eq!(unit.params().len(), 1);
        assert!(unit.params().find(ParamKind::Stack { depth: 0 }).is_some());
        Ok(())
    }

    #[test]
    fn successive_underflows_synthesize_increasing_depths() -> anyhow::Result<()> {
        let mut graph = UnitGraph::new();
        let mut ctx = new_context(&mut graph);

        ctx.pop(&mut graph, 0, ValueType::Int)?;
        ctx.pop(&mut graph, 0, ValueType::Int)?;

        let unit = graph.unit(ctx.unit())?;
        assert_eq!(unit.params().len(), 2);
        assert!(unit.params().find(ParamKind::Stack { depth: 1 }).is_some());
        Ok(())
    }

    #[test]
    fn reading_an_uninitialized_local_synthesizes_a_parameter() -> anyhow::Result<()> {
        let mut graph = UnitGraph::new();
        let mut ctx = new_context(&mut graph);

        let first = ctx.local(&mut graph, 0, 3, ValueType::Int)?;
        let second = ctx.local(&mut graph, 0, 3, ValueType::Int)?;
        assert_eq!(first, second);

        let unit = graph.unit(ctx.unit())?;
        assert_eq!(unit.params().len(), 1);
        Ok(())
    }

    #[test]
    fn written_locals_are_read_back_without_parameters() -> anyhow::Result<()> {
        let mut graph = UnitGraph::new();
        let mut ctx = new_context(&mut graph);

        ctx.set_local(2, Expression::int(0, 9));
        let value = ctx.local(&mut graph, 0, 2, ValueType::Int)?;
        assert_eq!(value, Expression::int(0, 9));
        assert!(graph.unit(ctx.unit())?.params().is_empty());
        Ok(())
    }

    #[test]
    fn net_stack_effect_matches_the_opcode_sequence() -> anyhow::Result<()> {
        // Two pushes and three pops must leave one synthesized parameter and
        // an empty stack: the net effect of the sequence.
        let mut graph = UnitGraph::new();
        let mut ctx = new_context(&mut graph);

        ctx.push(0, Expression::int(0, 1))?;
        ctx.push(0, Expression::int(0, 2))?;
        ctx.pop(&mut graph, 0, ValueType::Int)?;
        ctx.pop(&mut graph, 0, ValueType::Int)?;
        ctx.pop(&mut graph, 0, ValueType::Int)?;

        assert!(ctx.stack().is_empty());
        assert_eq!(graph.unit(ctx.unit())?.params().stack_count(), 1);
        Ok(())
    }
}

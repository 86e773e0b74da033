//! This module contains the symbolic virtual machine that translates the
//! basic blocks of the input program into a graph of functional units.
//!
//! # Execution Model
//!
//! Every basic block reached during execution becomes one
//! [`crate::unit::SEFunction`]. A worklist of pending (block, frame) pairs
//! is drained one block at a time: each block executes against a fresh
//! [`Context`] whose unclear reads synthesize unit parameters, and control
//! transfers out of the block become calls to the units of their target
//! blocks. Invokes enter fresh frames (re-entering an ancestor activation
//! when the call is recursive, which is what closes call-graph cycles), and
//! returns call into the continuation unit at the caller's post-call
//! program point.
//!
//! Once the worklist drains, the parameter back-propagation fixed point
//! ([`propagate`]) fills every call site's argument list.

pub mod context;
pub mod frame;
pub mod opcode;
pub mod propagate;
pub mod stack;

use std::collections::VecDeque;

use crate::{
    bytecode::{
        instruction::BlockId,
        program::{MethodId, Program},
    },
    error::{
        container::Locatable,
        execution,
        program,
        Error,
        Result,
    },
    unit::{CallSite, FrozenState, UnitGraph, UnitId},
    value::{CallKind, Expression, FunctionCall},
    vm::{
        context::Context,
        frame::{Frame, FrameArena, FrameId},
    },
    watchdog::DynWatchdog,
};

/// The configuration of the symbolic virtual machine.
#[derive(Clone, Debug)]
pub struct Config {
    /// The maximum number of blocks the machine will translate before
    /// concluding that the program is runaway.
    pub maximum_translated_blocks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            maximum_translated_blocks: 10_000,
        }
    }
}

/// A block waiting to be translated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Pending {
    unit: UnitId,
    method: MethodId,
    block: BlockId,
    frame: FrameId,
}

/// The seed state for executing one constraint entry point.
#[derive(Clone, Debug)]
pub struct RootSeed {
    /// The entry point method.
    pub method: MethodId,

    /// The materialized heap snapshot the entry point runs against.
    pub heap: Expression,

    /// The next free heap address after materialization.
    pub heapsize: Expression,

    /// The initial local variable values (the entry point's arguments).
    pub locals: Vec<(u16, Expression)>,
}

/// The virtual machine used to perform symbolic execution of method
/// bytecode.
///
/// It is designed to be a 1:1 match for the semantics of the imperative
/// stack machine wherever such semantics can be represented as pure
/// functional expressions.
#[derive(Debug)]
pub struct SymbolicVM {
    /// The program being executed.
    program: Program,

    /// The graph of units discovered so far.
    graph: UnitGraph,

    /// The call frames created so far.
    frames: FrameArena,

    /// The queue of blocks waiting to be translated.
    pending: VecDeque<Pending>,

    /// The block currently being translated.
    current: Option<Pending>,

    /// The configuration of the virtual machine.
    config: Config,

    /// A watchdog that gets polled at intervals to check whether execution
    /// needs to exit.
    watchdog: DynWatchdog,
}

impl SymbolicVM {
    /// Constructs a new virtual machine that executes over the provided
    /// `program`.
    #[must_use]
    pub fn new(program: Program, config: Config, watchdog: DynWatchdog) -> Self {
        Self {
            program,
            graph: UnitGraph::new(),
            frames: FrameArena::new(),
            pending: VecDeque::new(),
            current: None,
            config,
            watchdog,
        }
    }

    /// Gets the program being executed.
    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Gets the unit graph discovered so far.
    #[must_use]
    pub fn graph(&self) -> &UnitGraph {
        &self.graph
    }

    /// Gets mutable access to the unit graph.
    pub fn graph_mut(&mut self) -> &mut UnitGraph {
        &mut self.graph
    }

    /// Gets the frame arena.
    #[must_use]
    pub fn frames(&self) -> &FrameArena {
        &self.frames
    }

    /// Consumes the machine, returning the unit graph it built.
    #[must_use]
    pub fn into_graph(self) -> UnitGraph {
        self.graph
    }

    /// Executes one constraint entry point described by `seed`, returning
    /// the identity of its root unit.
    ///
    /// Execution translates every block transitively reachable from the
    /// entry point and then runs the parameter back-propagation fixed point
    /// over the discovered units.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the program is incoherent, if execution produces
    /// an invalid machine state, or if the watchdog stops the run.
    pub fn execute(&mut self, seed: &RootSeed) -> Result<UnitId> {
        let info = self.program.method(seed.method)?.clone();
        let body = info.body.as_ref().ok_or_else(|| {
            program::Error::MissingMethodBody {
                name: info.name.clone(),
            }
            .locate(0)
        })?;
        let entry_block = body.entry();

        let frame = self.frames.push(Frame {
            parent: None,
            method: seed.method,
            return_pc: None,
        });
        let root = self.enqueue(seed.method, entry_block, frame)?;

        // Seed the root context's state separately from the queue: the
        // first popped pending entry is the root and receives the heap and
        // argument locals directly.
        let mut first = true;
        let poll_interval = self.watchdog.poll_every();
        let mut translated = 0usize;

        while let Some(pending) = self.pending.pop_front() {
            if translated % poll_interval == 0 && self.watchdog.should_stop() {
                return Err(execution::Error::StoppedByWatchdog.locate(0).into());
            }
            if translated >= self.config.maximum_translated_blocks {
                return Err(Error::other(format!(
                    "Translated more than {} blocks; the program is runaway",
                    self.config.maximum_translated_blocks
                )));
            }

            let mut ctx = Context::new(pending.unit, pending.frame);
            if first {
                ctx.seed_heap(seed.heap.clone(), seed.heapsize.clone());
                for (slot, value) in &seed.locals {
                    ctx.set_local(*slot, value.clone());
                }
                first = false;
            }

            self.translate_block(pending, ctx)?;
            translated += 1;
        }

        propagate::fixed_point(&mut self.graph, &self.watchdog)?;
        Ok(root)
    }

    /// Translates one pending block, assigning the body of its unit.
    #[allow(clippy::cast_possible_truncation)] // Block counts are far below u32::MAX
    fn translate_block(&mut self, pending: Pending, mut ctx: Context) -> Result<()> {
        self.current = Some(pending);

        let info = self.program.method(pending.method)?.clone();
        let body = info.body.as_ref().ok_or_else(|| {
            program::Error::MissingMethodBody {
                name: info.name.clone(),
            }
            .locate(0)
        })?;
        let block = body
            .block(pending.block)
            .ok_or_else(|| {
                program::Error::NoBlockAtTarget {
                    target: pending.block.0 as u32,
                }
                .locate(0)
            })?
            .clone();

        let mut last_pc = block.start;
        for instruction in &block.instructions {
            last_pc = instruction.pc;
            opcode::execute(self, &mut ctx, instruction)?;
            if ctx.terminal().is_some() {
                break;
            }
        }

        // A block that ends without a control transfer falls through to the
        // next block in program order.
        if ctx.terminal().is_none() {
            let next = body.next_block(pending.block).ok_or_else(|| {
                program::Error::NoBlockAtTarget {
                    target: last_pc + 1,
                }
                .locate(last_pc)
            })?;
            let target = self.enqueue(pending.method, next, pending.frame)?;
            let call =
                self.record_call(ctx.unit(), target, CallKind::Invoke, ctx.freeze(), last_pc)?;
            ctx.set_terminal(call);
        }

        let unit = ctx.unit();
        let terminal = ctx
            .into_terminal()
            .expect("A terminal is always assigned above");
        let translated_unit = self.graph.unit_mut(unit)?;
        let underflow = translated_unit.params().stack_count();
        translated_unit.set_incoming_stack(underflow);
        translated_unit.set_body(terminal);
        self.current = None;
        Ok(())
    }

    /// Gets (creating and enqueueing if needed) the unit for `block` of
    /// `method` in `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the graph is inconsistent.
    fn enqueue(&mut self, method: MethodId, block: BlockId, frame: FrameId) -> Result<UnitId> {
        let name = format!("{method}_{block}_f{frame}");
        if let Some(existing) = self.graph.lookup(&name) {
            return Ok(existing);
        }
        let unit = self.graph.get_or_create(&name);
        self.pending.push_back(Pending {
            unit,
            method,
            block,
            frame,
        });
        Ok(unit)
    }

    /// Gets the unit of the block starting at `target` in `frame`'s method,
    /// creating and enqueueing it if it has not been reached before.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no block starts at `target`.
    pub(crate) fn block_unit(&mut self, frame: FrameId, target: u32, pc: u32) -> Result<UnitId> {
        let method = self.frames.get(frame)?.method;
        let info = self.program.method(method)?;
        let body = info.body.as_ref().ok_or_else(|| {
            program::Error::MissingMethodBody {
                name: info.name.clone(),
            }
            .locate(pc)
        })?;
        let block = body
            .block_at(target)
            .ok_or_else(|| program::Error::NoBlockAtTarget { target }.locate(pc))?;
        self.enqueue(method, block, frame)
    }

    /// Gets the unit of the block that follows the currently-translating
    /// block in program order.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no following block exists.
    pub(crate) fn fallthrough_unit(&mut self, frame: FrameId, pc: u32) -> Result<UnitId> {
        let current = self
            .current
            .expect("A block is always current during translation");
        let info = self.program.method(current.method)?;
        let body = info.body.as_ref().ok_or_else(|| {
            program::Error::MissingMethodBody {
                name: info.name.clone(),
            }
            .locate(pc)
        })?;
        let next = body.next_block(current.block).ok_or_else(|| {
            program::Error::NoBlockAtTarget { target: pc + 1 }.locate(pc)
        })?;
        self.enqueue(current.method, next, frame)
    }

    /// Gets the unit of the entry block of `method` in `frame`, creating and
    /// enqueueing it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the method has no body.
    pub(crate) fn entry_unit(&mut self, method: MethodId, frame: FrameId, pc: u32) -> Result<UnitId> {
        let info = self.program.method(method)?;
        let body = info.body.as_ref().ok_or_else(|| {
            program::Error::MissingMethodBody {
                name: info.name.clone(),
            }
            .locate(pc)
        })?;
        let entry = body.entry();
        self.enqueue(method, entry, frame)
    }

    /// Gets the program counter at which execution continues after the
    /// currently-translating block: the start of the following block, if one
    /// exists.
    pub(crate) fn continuation_pc(&self) -> Option<u32> {
        let current = self.current?;
        let body = self
            .program
            .method(current.method)
            .ok()?
            .body
            .as_ref()?
            .clone();
        let next = body.next_block(current.block)?;
        body.block(next).map(|block| block.start)
    }

    /// Creates (or, when the invoke closes a recursive cycle, re-enters) the
    /// frame for an invoke of `method` from `caller_frame`.
    ///
    /// A fresh frame is created per call site, so distinct call sites to the
    /// same method have independently reconstructed continuations. When an
    /// ancestor activation of the same method exists on the frame chain the
    /// ancestor frame is re-entered instead, which makes the recursive call
    /// reference the existing units and close the call-graph cycle that the
    /// unrolling pass later bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the frame chain is inconsistent.
    pub(crate) fn invoke_frame(
        &mut self,
        caller_frame: FrameId,
        method: MethodId,
        return_pc: Option<u32>,
    ) -> Result<FrameId> {
        if let Some(ancestor) = self.frames.activation_of(caller_frame, method)? {
            return Ok(ancestor);
        }
        Ok(self.frames.push(Frame {
            parent: Some(caller_frame),
            method,
            return_pc,
        }))
    }

    /// Records a call from `caller` to `target`, freezing `state` under a
    /// new call site and registering `caller` as an observer of the callee.
    ///
    /// The call starts with an empty argument list; the parameter
    /// back-propagation fixed point fills the arguments in once the
    /// callee's requirements are known.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the graph is inconsistent.
    pub(crate) fn record_call(
        &mut self,
        caller: UnitId,
        target: UnitId,
        kind: CallKind,
        state: FrozenState,
        pc: u32,
    ) -> Result<Expression> {
        let site = self.graph.add_site(CallSite { caller, state });
        self.graph.unit_mut(target)?.observe(caller);
        Ok(Expression::call(
            pc,
            FunctionCall {
                target,
                kind,
                arguments: Vec::new(),
                site,
            },
        ))
    }
}

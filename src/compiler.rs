//! This module contains the top-level compiler: the orchestration that
//! takes a disassembled program and a set of annotated live object graphs,
//! runs symbolic execution and the transformation pipeline, and produces a
//! [`SatisfactionProblem`] ready for a solver backend.

use crate::{
    bytecode::program::{MethodId, Program},
    error::Result,
    heap::{
        materialize::Materializer,
        object::{ObjectHandle, Variability},
    },
    problem::SatisfactionProblem,
    transform,
    vm::{RootSeed, SymbolicVM},
    watchdog::{DynWatchdog, LazyWatchdog},
};

/// One constraint to compile: an entry point method paired with the live
/// object graph it runs against.
#[derive(Clone, Debug)]
pub struct ConstraintSeed {
    /// The constraint entry point. The method receives the root object as
    /// its receiver (local slot 0).
    pub method: MethodId,

    /// The root of the live object graph.
    pub root: ObjectHandle,

    /// The variability applied at the root of the graph.
    pub variability: Variability,
}

/// The compiler from bytecode programs to satisfaction problems.
#[derive(Debug)]
pub struct Compiler {
    program: Program,
    vm_config: crate::vm::Config,
    transform_config: transform::Config,
    watchdog: DynWatchdog,
}

/// Constructs a new compiler over `program` with the provided
/// configurations.
#[must_use]
pub fn new(
    program: Program,
    vm_config: crate::vm::Config,
    transform_config: transform::Config,
) -> Compiler {
    Compiler {
        program,
        vm_config,
        transform_config,
        watchdog: LazyWatchdog.in_rc(),
    }
}

impl Compiler {
    /// Replaces the watchdog monitoring the compilation.
    #[must_use]
    pub fn with_watchdog(mut self, watchdog: DynWatchdog) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// Compiles the provided constraints into a [`SatisfactionProblem`].
    ///
    /// Construction either succeeds fully or aborts with no problem object;
    /// partial results are never produced.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the program is incoherent, execution fails, or a
    /// transform pass fails.
    pub fn compile(self, seeds: &[ConstraintSeed]) -> Result<SatisfactionProblem> {
        let mut vm = SymbolicVM::new(self.program, self.vm_config, self.watchdog.clone());

        let mut constraints = Vec::with_capacity(seeds.len());
        let mut variables = Vec::new();
        for seed in seeds {
            let image = Materializer::new().materialize(&seed.root, seed.variability);
            variables.extend(image.variables);

            let root_unit = vm.execute(&RootSeed {
                method: seed.method,
                heap: image.heap,
                heapsize: image.heapsize,
                locals: vec![(0, image.root)],
            })?;
            constraints.push(root_unit);
        }

        let mut problem = SatisfactionProblem::new(vm.into_graph(), constraints, variables);
        transform::pipeline(&mut problem, self.transform_config, self.watchdog)?;
        Ok(problem)
    }
}

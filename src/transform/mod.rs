//! This module contains the transformation pipeline: the ordered sequence of
//! rewrite passes applied to a [`SatisfactionProblem`]'s unit graph before it
//! is handed to a solver backend.
//!
//! # The Pipeline
//!
//! Passes run in a fixed overall order:
//!
//! 1. Boolean normalization ([`boolean::BooleanNormalization`]).
//! 2. A bounded number of reduction rounds ([`reduce::ReductionRounds`]).
//! 3. Partial evaluation and specialization
//!    ([`partial_eval::PartialEvaluation`]).
//! 4. Dead-branch pruning ([`dead_branch::DeadBranchPruning`]).
//! 5. Recursion unrolling ([`unroll::RecursionUnrolling`]).
//! 6. Final cleanup ([`reduce::ReductionRounds`] again, then
//!    [`lower::FinalLowering`]).
//!
//! The sequence is idempotent once converged: re-running it on a fixed-point
//! graph changes nothing. Passes share a [`PassContext`] carrying the
//! watchdog, the step budget (sized at 160× the number of discovered units)
//! and the specialization cache, which is explicit state rather than a
//! global.

pub mod boolean;
pub mod dead_branch;
pub mod evaluate;
pub mod lower;
pub mod partial_eval;
pub mod reduce;
pub mod traversal;
pub mod unroll;

use std::{
    any::TypeId,
    fmt::Debug,
};

use downcast_rs::{impl_downcast, Downcast};

use crate::{
    constant::{
        DEFAULT_RECURSION_UNROLL_DEPTH,
        DEFAULT_REDUCTION_ROUNDS,
        STEP_BUDGET_UNIT_MULTIPLIER,
    },
    error::transform::Result,
    problem::SatisfactionProblem,
    transform::partial_eval::SpecializationCache,
    unit::{UnitGraph, UnitId},
    value::{ExprData, Expression, ProcessedCall},
    watchdog::DynWatchdog,
};

/// The configuration of the transformation pipeline.
#[derive(Clone, Debug)]
pub struct Config {
    /// The number of times the cheap reduction-round sequence is repeated.
    pub reduction_rounds: usize,

    /// The depth to which strongly recursive units are unrolled.
    pub unroll_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reduction_rounds: DEFAULT_REDUCTION_ROUNDS,
            unroll_depth: DEFAULT_RECURSION_UNROLL_DEPTH,
        }
    }
}

/// The shared state threaded through every pass of one pipeline run.
#[derive(Debug)]
pub struct PassContext {
    /// The configuration of the pipeline.
    pub config: Config,

    /// The remaining step budget for graph traversals.
    ///
    /// Exhaustion is non-fatal: the affected branch is conservatively
    /// replaced with `false`, trading completeness for termination.
    pub budget: usize,

    /// The cache of specialized units, keyed by the original unit and the
    /// substituted constants.
    pub cache: SpecializationCache,

    /// A watchdog that gets polled at intervals to check whether the
    /// pipeline needs to exit.
    pub watchdog: DynWatchdog,
}

impl PassContext {
    /// Creates a new pass context for a pipeline run over `graph`.
    #[must_use]
    pub fn new(config: Config, graph: &UnitGraph, watchdog: DynWatchdog) -> Self {
        let budget = STEP_BUDGET_UNIT_MULTIPLIER * graph.len().max(1);
        Self {
            config,
            budget,
            cache: SpecializationCache::new(),
            watchdog,
        }
    }
}

/// A trait representing one rewrite pass over the unit graph.
pub trait Transform
where
    Self: Debug + Downcast,
{
    /// Executes the pass on the provided `problem`, with access to the
    /// shared pipeline state in `cx`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if something goes wrong with the rewriting process.
    /// Passes do not partially apply: an error aborts the pipeline.
    fn run(&mut self, problem: &mut SatisfactionProblem, cx: &mut PassContext) -> Result<()>;
}

impl_downcast!(Transform);

/// A container for an ordered set of transform passes that will be run in
/// order.
#[derive(Debug)]
pub struct TransformPasses {
    /// The ordered list of passes that will be executed in order.
    passes: Vec<Box<dyn Transform>>,
}

impl TransformPasses {
    /// Creates a new instance of the pass container with the provided
    /// `passes`.
    #[must_use]
    pub fn new(passes: impl Into<Vec<Box<dyn Transform>>>) -> Self {
        Self {
            passes: passes.into(),
        }
    }

    /// Adds the `pass` to the end of the pass ordering.
    ///
    /// If a pass of the given type already exists in the ordering, it will
    /// not be added.
    pub fn add<P: Transform>(&mut self, pass: P) {
        let ids: Vec<TypeId> = self.passes.iter().map(|p| p.as_ref().type_id()).collect();
        if ids.contains(&pass.type_id()) {
            return;
        }
        self.passes.push(Box::new(pass));
    }

    /// Gets a reference to the pass of the given type, if it exists in the
    /// container.
    #[must_use]
    pub fn get<P: Transform>(&self) -> Option<&P> {
        self.passes
            .iter()
            .find(|p| p.as_ref().as_any().is::<P>())
            .and_then(|p| p.as_ref().as_any().downcast_ref::<P>())
    }

    /// Runs all of the contained passes in order on the provided `problem`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if any of the passes error.
    pub fn run(&mut self, problem: &mut SatisfactionProblem, cx: &mut PassContext) -> Result<()> {
        for pass in &mut self.passes {
            tracing::debug!(pass = ?pass, "Running transform pass");
            pass.run(problem, cx)?;
        }
        Ok(())
    }
}

impl Default for TransformPasses {
    fn default() -> Self {
        Self {
            passes: vec![
                Box::new(boolean::BooleanNormalization),
                Box::new(reduce::ReductionRounds),
                Box::new(partial_eval::PartialEvaluation),
                Box::new(dead_branch::DeadBranchPruning),
                Box::new(unroll::RecursionUnrolling),
                Box::new(reduce::ReductionRounds),
                Box::new(lower::FinalLowering),
            ],
        }
    }
}

/// Runs the default transformation pipeline over `problem`.
///
/// # Errors
///
/// Returns [`Err`] if any pass fails; passes do not partially apply.
pub fn pipeline(
    problem: &mut SatisfactionProblem,
    config: Config,
    watchdog: DynWatchdog,
) -> Result<()> {
    let mut cx = PassContext::new(config, problem.graph(), watchdog);
    collapse_calls(problem.graph_mut())?;
    TransformPasses::default().run(problem, &mut cx)
}

/// Collapses both call-site flavors into the uniform processed form.
///
/// Invoke and return calls differ only during construction, where parameter
/// back-propagation needs the frozen call-site state; once the fixed point
/// has converged the distinction is irrelevant and the passes deal
/// exclusively with [`ProcessedCall`]s.
pub fn collapse_calls(graph: &mut UnitGraph) -> Result<()> {
    for id in graph.ids() {
        rewrite_unit(graph, id, &mut |node| match node.data() {
            ExprData::Call(call) => Ok(Expression::processed(
                node.pc(),
                ProcessedCall {
                    target: call.target,
                    arguments: call.arguments.clone(),
                },
            )),
            _ => Ok(node),
        })?;
    }
    Ok(())
}

/// The single rewrite entry point through which every pass rewrites a
/// unit's body.
///
/// Failures during traversal are fatal and are reported with the literal
/// string form of the node that failed.
///
/// # Errors
///
/// Returns [`Err`] if `f` fails on any node.
pub fn rewrite_unit(
    graph: &mut UnitGraph,
    unit: UnitId,
    f: &mut dyn FnMut(Expression) -> Result<Expression>,
) -> Result<()> {
    let Some(body) = graph
        .unit(unit)
        .map_err(|e| crate::error::transform::Error::InconsistentGraph {
            reason: e.to_string(),
        })?
        .body()
        .cloned()
    else {
        return Ok(());
    };

    let new_body = body.transform(&mut |node| {
        let node_str = node.to_string();
        f(node).map_err(|err| {
            tracing::error!(node = %node_str, "Transform failed at node");
            err.at_node(&node_str)
        })
    })?;

    if let Ok(target) = graph.unit_mut(unit) {
        target.set_body(new_body);
    }
    Ok(())
}

//! Integration scenarios for the transformation pipeline, driven over
//! hand-built unit graphs.

mod common;

use bytecode_constraint_compiler::{
    problem::SatisfactionProblem,
    transform::{
        self,
        boolean::ite_to_boolean,
        reduce::ReductionRounds,
        unroll::RecursionUnrolling,
        Config,
        PassContext,
        Transform,
    },
    unit::{ParamKind, UnitGraph},
    value::{operator::Operator, types::ValueType, Expression},
    watchdog::LazyWatchdog,
};
use common::{boolean, int, int_var, pcall};

/// A unit with body `ADD(x, 5)` and one declared parameter, called once
/// with the argument `10`, must reduce to the constant `15` after the
/// pipeline's inlining and constant evaluation.
#[test]
fn calling_an_additive_unit_with_a_constant_folds_to_a_constant() -> anyhow::Result<()> {
    let mut graph = UnitGraph::new();
    let root = graph.get_or_create("root");
    let callee = graph.get_or_create("add5");

    let (x, _) = graph
        .unit_mut(callee)?
        .require(ParamKind::Stack { depth: 0 }, ValueType::Int);
    graph.unit_mut(callee)?.set_body(Expression::op(
        0,
        Operator::Add,
        vec![Expression::variable(0, x), int(5)],
        ValueType::Int,
    ));
    graph.unit_mut(root)?.set_body(pcall(callee, vec![int(10)]));

    let mut problem = SatisfactionProblem::new(graph, vec![root], vec![]);
    transform::pipeline(&mut problem, Config::default(), LazyWatchdog.in_rc())?;

    assert_eq!(problem.graph().unit(root)?.body(), Some(&int(15)));
    Ok(())
}

/// A two-branch conditional over boolean constants is a valid input to the
/// conditional-to-boolean rewrite, producing the conjunction/disjunction
/// form.
#[test]
fn boolean_conditionals_rewrite_to_disjunctive_form() {
    let condition = Expression::op(
        0,
        Operator::Equal,
        vec![int_var("a"), int(0)],
        ValueType::Bool,
    );
    let node = Expression::op(
        0,
        Operator::Ite,
        vec![condition.clone(), boolean(true), boolean(false)],
        ValueType::Bool,
    );

    let rewritten = ite_to_boolean(&node).expect("A fully boolean conditional must rewrite");

    let negated = Expression::op(0, Operator::BNot, vec![condition.clone()], ValueType::Bool);
    let expected = Expression::op(
        0,
        Operator::BOr,
        vec![
            Expression::op(
                0,
                Operator::BAnd,
                vec![condition, boolean(true)],
                ValueType::Bool,
            ),
            Expression::op(
                0,
                Operator::BAnd,
                vec![negated, boolean(false)],
                ValueType::Bool,
            ),
        ],
        ValueType::Bool,
    );
    assert_eq!(rewritten, expected);
}

/// A self-recursive unit unrolled to depth 2 produces exactly three
/// generated units (depths 2, 1, 0), with the depth-0 body being the
/// constant `false`.
#[test]
fn self_recursion_unrolls_to_three_generated_units() -> anyhow::Result<()> {
    let mut graph = UnitGraph::new();
    let root = graph.get_or_create("root");
    let recursive = graph.get_or_create("countdown");

    let (n, _) = graph
        .unit_mut(recursive)?
        .require(ParamKind::Stack { depth: 0 }, ValueType::Int);
    let n = Expression::variable(0, n);
    let decremented = Expression::op(
        0,
        Operator::Sub,
        vec![n.clone(), int(1)],
        ValueType::Int,
    );
    graph.unit_mut(recursive)?.set_body(Expression::op(
        0,
        Operator::Ite,
        vec![
            Expression::op(0, Operator::Equal, vec![n, int(0)], ValueType::Bool),
            boolean(true),
            pcall(recursive, vec![decremented]),
        ],
        ValueType::Bool,
    ));
    graph
        .unit_mut(root)?
        .set_body(pcall(recursive, vec![int(3)]));

    let before = graph.len();
    let mut problem = SatisfactionProblem::new(graph, vec![root], vec![]);
    let mut cx = PassContext::new(Config::default(), problem.graph(), LazyWatchdog.in_rc());
    RecursionUnrolling.run(&mut problem, &mut cx)?;

    let graph = problem.graph();
    assert_eq!(graph.len(), before + 3);

    let depth0 = graph.lookup("countdown#u0").expect("Depth 0 copy exists");
    let depth1 = graph.lookup("countdown#u1").expect("Depth 1 copy exists");
    let depth2 = graph.lookup("countdown#u2").expect("Depth 2 copy exists");

    assert!(graph.unit(depth0)?.body().is_some_and(Expression::is_false));
    assert_eq!(
        graph.unit(depth1)?.body().unwrap().call_targets(),
        vec![depth0]
    );
    assert_eq!(
        graph.unit(depth2)?.body().unwrap().call_targets(),
        vec![depth1]
    );

    // External callers are redirected to the deepest copy, with arguments
    // preserved.
    let root_body = graph.unit(root)?.body().unwrap();
    assert_eq!(root_body.call_targets(), vec![depth2]);
    Ok(())
}

/// Re-running the reduction rounds on an already-reduced graph must not
/// change any unit's body or parameter list.
#[test]
fn reduction_rounds_are_idempotent_at_the_fixed_point() -> anyhow::Result<()> {
    let mut graph = UnitGraph::new();
    let root = graph.get_or_create("root");
    let callee = graph.get_or_create("add5");

    let (x, _) = graph
        .unit_mut(callee)?
        .require(ParamKind::Stack { depth: 0 }, ValueType::Int);
    graph.unit_mut(callee)?.set_body(Expression::op(
        0,
        Operator::Add,
        vec![Expression::variable(0, x), int(5)],
        ValueType::Int,
    ));
    graph.unit_mut(root)?.set_body(pcall(callee, vec![int(10)]));

    let mut problem = SatisfactionProblem::new(graph, vec![root], vec![]);
    transform::pipeline(&mut problem, Config::default(), LazyWatchdog.in_rc())?;

    // Take a structural snapshot of every unit, then run the reduction
    // rounds again.
    let snapshot: Vec<_> = problem
        .graph()
        .ids()
        .into_iter()
        .map(|id| {
            let unit = problem.graph().unit(id).unwrap();
            (
                unit.body().cloned(),
                unit.params().as_slice().to_vec(),
            )
        })
        .collect();

    let mut cx = PassContext::new(Config::default(), problem.graph(), LazyWatchdog.in_rc());
    ReductionRounds.run(&mut problem, &mut cx)?;

    let after: Vec<_> = problem
        .graph()
        .ids()
        .into_iter()
        .map(|id| {
            let unit = problem.graph().unit(id).unwrap();
            (
                unit.body().cloned(),
                unit.params().as_slice().to_vec(),
            )
        })
        .collect();

    assert_eq!(snapshot, after);
    Ok(())
}

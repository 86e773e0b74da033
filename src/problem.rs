//! This module contains the [`SatisfactionProblem`]: the root artifact that
//! symbolic execution produces and that solver backends consume.

use serde::Serialize;

use crate::{
    error::transform::{Error, Result},
    heap::materialize::InsertPoint,
    unit::{UnitGraph, UnitId},
    value::{known::KnownValue, Variable},
};

/// A solver's verdict: the satisfiability flag plus the values chosen for
/// the problem's free variables.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Solution {
    /// Whether the constraints are satisfiable.
    pub satisfiable: bool,

    /// The value chosen for each free variable.
    pub assignment: Vec<(Variable, KnownValue)>,
}

impl Solution {
    /// Looks up the solved value for `variable`, if the solver chose one.
    #[must_use]
    pub fn value_of(&self, variable: &Variable) -> Option<KnownValue> {
        self.assignment
            .iter()
            .find(|(candidate, _)| candidate == variable)
            .map(|(_, value)| *value)
    }
}

/// The interface to a satisfiability solver backend.
///
/// A backend must either assign a solution to the problem exactly once via
/// [`SatisfactionProblem::assign_solution`], or signal inability to solve
/// (or an internal error) without assigning one.
pub trait Backend {
    /// Solves the provided `problem`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the backend cannot solve the problem or fails
    /// internally; in that case no solution is assigned.
    fn solve(&mut self, problem: &mut SatisfactionProblem) -> Result<()>;
}

/// The root artifact of the compiler: the ordered constraint units, the
/// unit graph they live in, and the map from each problem-level free
/// variable to the insert point that writes its solved value back into the
/// live object graph.
#[derive(Debug)]
pub struct SatisfactionProblem {
    /// The unit graph holding every constraint and everything it calls.
    graph: UnitGraph,

    /// The constraint units, in entry point declaration order.
    constraints: Vec<UnitId>,

    /// The free variables and their insert points.
    variables: Vec<(Variable, InsertPoint)>,

    /// The solution, once a backend assigns one.
    solution: Option<Solution>,

    /// Whether the solution has been written back.
    applied: bool,
}

impl SatisfactionProblem {
    /// Constructs a new problem over the provided graph and constraints.
    #[must_use]
    pub fn new(
        graph: UnitGraph,
        constraints: Vec<UnitId>,
        variables: Vec<(Variable, InsertPoint)>,
    ) -> Self {
        Self {
            graph,
            constraints,
            variables,
            solution: None,
            applied: false,
        }
    }

    /// Gets the unit graph of the problem.
    #[must_use]
    pub fn graph(&self) -> &UnitGraph {
        &self.graph
    }

    /// Gets mutable access to the unit graph, for the transformation
    /// pipeline.
    pub fn graph_mut(&mut self) -> &mut UnitGraph {
        &mut self.graph
    }

    /// Gets the constraint units in declaration order.
    #[must_use]
    pub fn constraints(&self) -> &[UnitId] {
        &self.constraints
    }

    /// Gets the free variables of the problem.
    #[must_use]
    pub fn variables(&self) -> &[(Variable, InsertPoint)] {
        &self.variables
    }

    /// Gets the assigned solution, if any.
    #[must_use]
    pub fn solution(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }

    /// Assigns the solver's `solution` to the problem.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a solution has already been assigned: solution
    /// assignment is one-shot.
    pub fn assign_solution(&mut self, solution: Solution) -> Result<()> {
        if self.solution.is_some() {
            return Err(Error::SolutionAlreadyAssigned);
        }
        self.solution = Some(solution);
        Ok(())
    }

    /// Solves the problem with `backend` and writes the solution back into
    /// the live object graph.
    ///
    /// Every free variable is looked up in the solved assignment and its
    /// insert point's `put` is invoked exactly once; variables the solver
    /// did not assign, and insert points with no external effect, are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the backend fails, or if the solution has already
    /// been applied.
    pub fn solve_with(&mut self, backend: &mut dyn Backend) -> Result<()> {
        backend.solve(self)?;
        self.apply()
    }

    /// Writes the assigned solution back through the insert points.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no solution is assigned or it was already
    /// applied.
    pub fn apply(&mut self) -> Result<()> {
        if self.applied {
            return Err(Error::SolutionAlreadyAssigned);
        }
        let Some(solution) = &self.solution else {
            return Err(Error::BackendUnable {
                reason: "no solution was assigned".into(),
            });
        };

        for (variable, insert_point) in &self.variables {
            if let Some(value) = solution.value_of(variable) {
                insert_point.put(value);
            }
        }
        self.applied = true;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        heap::materialize::InsertPoint,
        problem::{Backend, SatisfactionProblem, Solution},
        unit::UnitGraph,
        value::{known::KnownValue, types::ValueType, Variable},
    };

    struct FixedBackend(Solution);

    impl Backend for FixedBackend {
        fn solve(
            &mut self,
            problem: &mut SatisfactionProblem,
        ) -> crate::error::transform::Result<()> {
            problem.assign_solution(self.0.clone())
        }
    }

    #[test]
    fn solution_assignment_is_one_shot() {
        let mut problem = SatisfactionProblem::new(UnitGraph::new(), vec![], vec![]);
        problem
            .assign_solution(Solution::default())
            .expect("First assignment succeeds");
        problem
            .assign_solution(Solution::default())
            .expect_err("Second assignment must fail");
    }

    #[test]
    fn solving_writes_values_through_insert_points() -> anyhow::Result<()> {
        use crate::heap::object::{LiveField, LiveObject, LiveValue, Variability};

        let object = LiveObject::Instance {
            type_tag: 1,
            fields: vec![LiveField {
                value: LiveValue::Primitive(KnownValue::Int(0)),
                ty: ValueType::Int,
                variability: Variability::Flat,
            }],
        }
        .into_handle();

        let variable = Variable::new("hp2", ValueType::Int);
        let mut problem = SatisfactionProblem::new(
            UnitGraph::new(),
            vec![],
            vec![(
                variable.clone(),
                InsertPoint::Field {
                    object: object.clone(),
                    index: 0,
                },
            )],
        );

        let mut backend = FixedBackend(Solution {
            satisfiable: true,
            assignment: vec![(variable, KnownValue::Int(41))],
        });
        problem.solve_with(&mut backend)?;

        assert_eq!(object.borrow().get_primitive(0), Some(KnownValue::Int(41)));
        Ok(())
    }

    #[test]
    fn solutions_serialize_for_downstream_tooling() -> anyhow::Result<()> {
        let solution = Solution {
            satisfiable: true,
            assignment: vec![(
                Variable::new("hp2", ValueType::Int),
                KnownValue::Int(41),
            )],
        };

        let rendered = serde_json::to_string(&solution)?;
        assert!(rendered.contains("\"satisfiable\":true"));
        assert!(rendered.contains("hp2"));
        Ok(())
    }

    #[test]
    fn failing_backends_leave_no_solution() {
        struct FailingBackend;
        impl Backend for FailingBackend {
            fn solve(
                &mut self,
                _problem: &mut SatisfactionProblem,
            ) -> crate::error::transform::Result<()> {
                Err(crate::error::transform::Error::BackendUnable {
                    reason: "unsupported".into(),
                })
            }
        }

        let mut problem = SatisfactionProblem::new(UnitGraph::new(), vec![], vec![]);
        problem
            .solve_with(&mut FailingBackend)
            .expect_err("Backend failure must surface");
        assert!(problem.solution().is_none());
    }
}

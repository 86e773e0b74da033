//! End-to-end tests driving the compiler from bytecode programs and live
//! object graphs down to transformed satisfaction problems.

mod common;

use bytecode_constraint_compiler as bcc;
use bcc::{
    bytecode::{
        BasicBlock,
        FieldInfo,
        FieldRef,
        Instruction,
        MethodBody,
        MethodInfo,
        MethodRef,
        Opcode,
        PoolEntry,
        Program,
    },
    heap::{LiveField, LiveObject, LiveValue, Variability},
    problem::{Backend, SatisfactionProblem, Solution},
    value::{
        known::KnownValue,
        operator::Operator,
        types::ValueType,
        ExprData,
        Expression,
    },
    vm::{RootSeed, SymbolicVM},
    watchdog::LazyWatchdog,
    ConstraintSeed,
};

/// Builds a method with the provided body blocks.
fn method(name: &str, ret: Option<ValueType>, body: MethodBody) -> MethodInfo {
    MethodInfo {
        name: name.into(),
        owner: bcc::bytecode::ClassId(0),
        params: vec![],
        ret,
        is_static: false,
        body: Some(body),
    }
}

/// A backend that assigns a fixed solution.
struct FixedBackend(Solution);

impl Backend for FixedBackend {
    fn solve(
        &mut self,
        problem: &mut SatisfactionProblem,
    ) -> bcc::error::transform::Result<()> {
        problem.assign_solution(self.0.clone())
    }
}

/// Compiling a constraint over an annotated field produces one free
/// variable whose solved value writes back into the live object.
#[test]
fn field_constraints_round_trip_through_solving() -> anyhow::Result<()> {
    let mut program = Program::new();
    let class = program.add_class(
        "Example",
        None,
        vec![FieldInfo {
            name: "f".into(),
            ty: ValueType::Int,
        }],
    );
    let field_index = program
        .pool_mut()
        .push(PoolEntry::Field(FieldRef { class, index: 0 }));

    // check(): return this.f - 7
    let body = MethodBody::new(vec![BasicBlock::new(vec![
        Instruction::new(
            0,
            Opcode::Load {
                slot: 0,
                ty: ValueType::Reference,
            },
        ),
        Instruction::new(1, Opcode::GetField { index: field_index }),
        Instruction::new(
            4,
            Opcode::Const {
                value: KnownValue::Int(7),
            },
        ),
        Instruction::new(
            5,
            Opcode::Binary {
                operator: Operator::Sub,
                ty: ValueType::Int,
            },
        ),
        Instruction::new(
            6,
            Opcode::Return {
                ty: Some(ValueType::Int),
            },
        ),
    ])]);
    let check = program.add_method(class, method("check", Some(ValueType::Int), body));
    program.add_entry_point(check);

    let root = LiveObject::Instance {
        type_tag: 1,
        fields: vec![LiveField {
            value: LiveValue::Primitive(KnownValue::Int(0)),
            ty: ValueType::Int,
            variability: Variability::Flat,
        }],
    }
    .into_handle();

    let mut problem = bcc::new(program, Default::default(), Default::default()).compile(&[
        ConstraintSeed {
            method: check,
            root: root.clone(),
            variability: Variability::Constant,
        },
    ])?;

    assert_eq!(problem.constraints().len(), 1);
    assert_eq!(problem.variables().len(), 1);

    // The constraint body mentions the materialized field variable.
    let constraint = problem.constraints()[0];
    let body = problem
        .graph()
        .unit(constraint)?
        .body()
        .expect("The constraint has a body")
        .clone();
    let (variable, _) = &problem.variables()[0];
    assert!(body.mentions(variable));

    // Solving writes the chosen value back through the insert point.
    let mut backend = FixedBackend(Solution {
        satisfiable: true,
        assignment: vec![(variable.clone(), KnownValue::Int(7))],
    });
    problem.solve_with(&mut backend)?;
    assert_eq!(root.borrow().get_primitive(0), Some(KnownValue::Int(7)));
    Ok(())
}

/// Builds a two-class program where `Derived` overrides `Base.check`, plus
/// a `test` entry whose only work is a virtual call on its receiver.
fn dispatch_program() -> (Program, bcc::bytecode::MethodId) {
    let mut program = Program::new();
    let base = program.add_class("Base", None, vec![]);
    let derived = program.add_class("Derived", Some(base), vec![]);

    let constant_return = |value: i32| {
        MethodBody::new(vec![BasicBlock::new(vec![
            Instruction::new(
                0,
                Opcode::Const {
                    value: KnownValue::Int(value),
                },
            ),
            Instruction::new(
                1,
                Opcode::Return {
                    ty: Some(ValueType::Int),
                },
            ),
        ])])
    };
    program.add_method(base, method("check", Some(ValueType::Int), constant_return(1)));
    program.add_method(
        derived,
        method("check", Some(ValueType::Int), constant_return(0)),
    );

    let check_ref = program.pool_mut().push(PoolEntry::Method(MethodRef {
        class: base,
        index: 0,
    }));
    let test_body = MethodBody::new(vec![
        BasicBlock::new(vec![
            Instruction::new(
                0,
                Opcode::Load {
                    slot: 0,
                    ty: ValueType::Reference,
                },
            ),
            Instruction::new(1, Opcode::InvokeVirtual { index: check_ref }),
        ]),
        BasicBlock::new(vec![Instruction::new(
            4,
            Opcode::Return {
                ty: Some(ValueType::Int),
            },
        )]),
    ]);
    let test = program.add_method(base, method("test", Some(ValueType::Int), test_body));
    program.add_entry_point(test);
    (program, test)
}

/// The dispatch lowering produces one guarded branch per concrete type plus
/// the constant `false` fallback.
#[test]
fn virtual_dispatch_produces_one_branch_per_type_plus_fallback() -> anyhow::Result<()> {
    let (program, test) = dispatch_program();

    let root = LiveObject::Instance {
        type_tag: 2,
        fields: vec![],
    }
    .into_handle();
    let image =
        bcc::heap::Materializer::new().materialize(&root, Variability::Constant);

    let mut vm = SymbolicVM::new(program, Default::default(), LazyWatchdog.in_rc());
    let constraint = vm.execute(&RootSeed {
        method: test,
        heap: image.heap,
        heapsize: image.heapsize,
        locals: vec![(0, image.root)],
    })?;

    let body = vm
        .graph()
        .unit(constraint)?
        .body()
        .expect("The entry unit has a body")
        .clone();

    // Two concrete classes implement `check`: the chain has exactly two
    // conditionals, and the innermost fallback is `false`.
    assert_eq!(common::count_conditionals(&body), 2);

    let mut innermost = &body;
    while let ExprData::Op {
        operator: Operator::Ite,
        operands,
        ..
    } = innermost.data()
    {
        innermost = &operands[2];
    }
    assert!(innermost.is_false());
    Ok(())
}

/// With all type tags constant, the full pipeline folds the dispatch chain
/// down to the selected implementation's return value.
#[test]
fn dispatch_selects_the_receiver_types_implementation() -> anyhow::Result<()> {
    for (tag, expected) in [(1, 1), (2, 0)] {
        let (program, test) = dispatch_program();
        let root = LiveObject::Instance {
            type_tag: tag,
            fields: vec![],
        }
        .into_handle();

        let problem = bcc::new(program, Default::default(), Default::default()).compile(&[
            ConstraintSeed {
                method: test,
                root,
                variability: Variability::Constant,
            },
        ])?;

        let constraint = problem.constraints()[0];
        let body = problem
            .graph()
            .unit(constraint)?
            .body()
            .expect("The constraint has a body");
        assert_eq!(
            body.as_constant().and_then(|v| v.as_i64()),
            Some(i64::from(expected)),
            "Receiver tag {tag} selected the wrong implementation"
        );
    }
    Ok(())
}

/// Writing an array element and reading it back through the same symbolic
/// heap value returns exactly the written expression.
#[test]
fn array_element_addressing_round_trips() {
    use bcc::heap::{element_address, read_slot, write_slot};

    // Array at address 1: tag, length 2, two elements.
    let heap = Expression::snapshot(
        0,
        vec![
            Expression::int(0, 5),
            Expression::int(0, -3),
            Expression::int(0, 2),
            Expression::int(0, 0),
            Expression::int(0, 0),
        ],
    );
    let reference = Expression::constant(0, KnownValue::Reference(1));
    let index = Expression::int(0, 1);
    let address = element_address(0, &reference, &index);

    let written = common::int(42);
    let new_heap = write_slot(0, &heap, &address, written.clone());
    assert_eq!(read_slot(0, &new_heap, &address, ValueType::Int), written);
}

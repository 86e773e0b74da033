//! This library implements a symbolic execution engine for JVM-style stack
//! machine bytecode that compiles imperative method bodies into a purely
//! functional constraint representation suitable for discharge to
//! satisfiability solvers.
//!
//! # How it Works
//!
//! From a very high level, the compilation is performed as follows:
//!
//! 1. A disassembler (an external collaborator) produces a
//!    [`bytecode::Program`]: classes, methods split into basic blocks of
//!    decoded opcodes, and a constant pool.
//! 2. The live object graph the constraints range over is encoded onto the
//!    symbolic heap by the [`heap::Materializer`], turning annotated fields
//!    into free variables with recorded insert points.
//! 3. The [`vm::SymbolicVM`] translates every reachable basic block into a
//!    [`unit::SEFunction`]: a functional unit parameterized over its free
//!    inputs, with control transfers represented as calls between units.
//!    A work-queue fixed point back-propagates parameter requirements
//!    through the call graph until every call site is fully supplied.
//! 4. The [`transform`] pipeline rewrites the unit graph (boolean
//!    normalization, reduction rounds, partial evaluation, dead-branch
//!    pruning, recursion unrolling, final lowering) until it is a formula a
//!    solver can consume.
//! 5. A [`problem::Backend`] solves the resulting
//!    [`problem::SatisfactionProblem`], and the solution is written back
//!    into the live objects through the recorded insert points.
//!
//! # Basic Usage
//!
//! ```
//! use bytecode_constraint_compiler as bcc;
//! use bcc::{
//!     bytecode::{BasicBlock, Instruction, MethodBody, MethodInfo, Opcode, Program},
//!     heap::{LiveField, LiveObject, LiveValue, Variability},
//!     value::{known::KnownValue, operator::Operator, types::ValueType},
//! };
//!
//! // A one-class program whose constraint method returns `this.f == 7`.
//! let mut program = Program::new();
//! let class = program.add_class(
//!     "Example",
//!     None,
//!     vec![bcc::bytecode::FieldInfo {
//!         name: "f".into(),
//!         ty: ValueType::Int,
//!     }],
//! );
//! let field_index = program.pool_mut().push(bcc::bytecode::PoolEntry::Field(
//!     bcc::bytecode::FieldRef { class, index: 0 },
//! ));
//!
//! let body = MethodBody::new(vec![BasicBlock::new(vec![
//!     Instruction::new(0, Opcode::Load { slot: 0, ty: ValueType::Reference }),
//!     Instruction::new(1, Opcode::GetField { index: field_index }),
//!     Instruction::new(4, Opcode::Const { value: KnownValue::Int(7) }),
//!     Instruction::new(5, Opcode::Binary { operator: Operator::Sub, ty: ValueType::Int }),
//!     Instruction::new(6, Opcode::Return { ty: Some(ValueType::Int) }),
//! ])]);
//! let method = program.add_method(
//!     class,
//!     MethodInfo {
//!         name: "check".into(),
//!         owner: class,
//!         params: vec![],
//!         ret: Some(ValueType::Int),
//!         is_static: false,
//!         body: Some(body),
//!     },
//! );
//! program.add_entry_point(method);
//!
//! // The live object the constraint ranges over, with its field free.
//! let root = LiveObject::Instance {
//!     type_tag: 1,
//!     fields: vec![LiveField {
//!         value: LiveValue::Primitive(KnownValue::Int(0)),
//!         ty: ValueType::Int,
//!         variability: Variability::Flat,
//!     }],
//! }
//! .into_handle();
//!
//! let problem = bcc::new(program, Default::default(), Default::default())
//!     .compile(&[bcc::ConstraintSeed {
//!         method,
//!         root: root.clone(),
//!         variability: Variability::Constant,
//!     }])
//!     .unwrap();
//!
//! assert_eq!(problem.constraints().len(), 1);
//! assert_eq!(problem.variables().len(), 1);
//! ```

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod bytecode;
pub mod compiler;
pub mod constant;
pub mod error;
pub mod heap;
pub mod problem;
pub mod transform;
pub mod unit;
pub mod value;
pub mod vm;
pub mod watchdog;

// Re-exports to provide the library interface.
pub use compiler::{new, Compiler, ConstraintSeed};
pub use problem::{Backend, SatisfactionProblem, Solution};

//! This module contains errors that indicate an incoherent input program.
//!
//! These conditions are fatal: they mean the bytecode, constant pool or class
//! metadata handed to the compiler does not describe a well-formed program,
//! so the current construction is aborted and never retried.

use thiserror::Error;

use crate::error::container;

/// Errors that indicate that the input program is incoherent.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("The opcode {opcode:#04x} is not supported by the instruction mapping")]
    UnsupportedOpcode { opcode: u8 },

    #[error("Constant pool index {index} does not exist")]
    NoSuchPoolEntry { index: u16 },

    #[error("Constant pool index {index} holds a {found} entry where a {expected} was required")]
    WrongPoolEntryKind {
        index: u16,
        expected: &'static str,
        found: &'static str,
    },

    #[error("The class {name:?} is not part of the program")]
    NoSuchClass { name: String },

    #[error("The field {field:?} was not found in class {class:?}")]
    NoSuchField { class: String, field: String },

    #[error("The method {method:?} was not found in class {class:?}")]
    NoSuchMethod { class: String, method: String },

    #[error("No basic block covers the jump target {target:#06x}")]
    NoBlockAtTarget { target: u32 },

    #[error("The method {name:?} has no body to execute")]
    MissingMethodBody { name: String },
}

/// A program error with an associated location in the bytecode.
pub type LocatedError = container::Located<Error>;

/// The result type for methods that may find the program incoherent.
pub type Result<T> = std::result::Result<T, LocatedError>;

/// Make it possible to attach locations to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, pc: u32) -> Self::Located {
        container::Located {
            location: pc,
            payload: self,
        }
    }
}

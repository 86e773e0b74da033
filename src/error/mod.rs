//! This module contains the primary error type for the compiler's interface.
//! It also re-exports the more specific error types that are
//! subsystem-specific.

pub mod container;
pub mod execution;
pub mod program;
pub mod transform;

use thiserror::Error;

/// The interface result type for the library.
///
/// Any function considered to be part of the public interface of the library
/// should return this result type. Subsystems should return the
/// more-specific child error types as appropriate.
pub type Result<T> = std::result::Result<T, Error>;

/// The interface error type for the library.
///
/// All errors returned from the library interface (and hence encountered by
/// the clients of the library) should be members of this enum.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Errors that indicate an incoherent input program.
    #[error(transparent)]
    Program(#[from] program::Error),

    /// Errors from the symbolic execution subsystem of the library.
    #[error(transparent)]
    Execution(#[from] execution::Error),

    /// Errors from the transformation subsystem of the library.
    #[error(transparent)]
    Transform(#[from] transform::Error),

    /// An unknown error, represented as a string.
    #[error("Unknown Error: {_0:?}")]
    Other(String),
}

impl Error {
    /// Constructs an unknown error with the provided `message`.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

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

/// A library error with an associated bytecode location.
pub type LocatedError = container::Located<Error>;

/// Allow simple conversions from located program errors by re-wrapping the
/// located error around the more general payload.
impl From<program::LocatedError> for LocatedError {
    fn from(value: program::LocatedError) -> Self {
        Self {
            location: value.location,
            payload: Error::from(value.payload),
        }
    }
}

/// Allow simple conversions from located execution errors by re-wrapping the
/// located error around the more general payload.
impl From<execution::LocatedError> for LocatedError {
    fn from(value: execution::LocatedError) -> Self {
        Self {
            location: value.location,
            payload: Error::from(value.payload),
        }
    }
}

/// Allow simple conversions from located transform errors by re-wrapping the
/// located error around the more general payload.
impl From<transform::LocatedError> for LocatedError {
    fn from(value: transform::LocatedError) -> Self {
        Self {
            location: value.location,
            payload: Error::from(value.payload),
        }
    }
}

/// Allow located program errors to surface directly as interface errors.
impl From<program::LocatedError> for Error {
    fn from(value: program::LocatedError) -> Self {
        Self::Program(value.payload)
    }
}

/// Allow located execution errors to surface directly as interface errors.
impl From<execution::LocatedError> for Error {
    fn from(value: execution::LocatedError) -> Self {
        Self::Execution(value.payload)
    }
}

//! This module contains errors pertaining to the symbolic execution of the
//! bytecode.

use thiserror::Error;

use crate::error::container;

/// Errors that occur while the symbolic executor is translating basic blocks
/// into functional units.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Maximum stack depth exceeded with request for {requested:?} frames")]
    StackDepthExceeded { requested: usize },

    #[error("The unit graph has no unit with id {id}")]
    NoSuchUnit { id: usize },

    #[error("The call site {id} has no frozen state recorded")]
    NoSuchCallSite { id: usize },

    #[error("The frame {id} does not exist")]
    NoSuchFrame { id: usize },

    #[error("Execution was stopped by the watchdog")]
    StoppedByWatchdog,
}

/// An execution error with an associated location in the bytecode.
pub type LocatedError = container::Located<Error>;

/// A container of execution errors used for aggregation during execution.
pub type Errors = container::Errors<LocatedError>;

/// The result type for methods that may have execution errors.
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

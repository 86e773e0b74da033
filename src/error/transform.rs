//! This module contains errors pertaining to the transformation pipeline.

use thiserror::Error;

use crate::{error::container, value::operator::Operator};

/// Errors that occur while the transformation pipeline is rewriting the unit
/// graph.
///
/// Note that exhaustion of the traversal step budget is deliberately *not* an
/// error: the affected branch is conservatively replaced by the constant
/// `false` and a warning is emitted, trading completeness for termination.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// A rewrite failed at a specific node.
    ///
    /// The node is reported in its literal text form, as transform passes do
    /// not partially apply and the failing node is the only context a caller
    /// can act on.
    #[error("Failed to transform the node `{node}`: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<Error>,
    },

    #[error("The operator {operator} is not implemented for operands of type {operands}")]
    UnsupportedOperator { operator: Operator, operands: String },

    #[error("The operator {operator} was applied to a malformed operand list")]
    MalformedOperands { operator: Operator },

    #[error("The unit graph is inconsistent: {reason}")]
    InconsistentGraph { reason: String },

    #[error("A solution was assigned to a problem that already has one")]
    SolutionAlreadyAssigned,

    #[error("The backend could not solve the problem: {reason}")]
    BackendUnable { reason: String },

    #[error("Transformation was stopped by the watchdog")]
    StoppedByWatchdog,
}

impl Error {
    /// Wraps this error with the literal text form of the `node` at which the
    /// rewrite failed.
    #[must_use]
    pub fn at_node(self, node: &impl std::fmt::Display) -> Self {
        Self::NodeFailed {
            node: node.to_string(),
            source: Box::new(self),
        }
    }
}

/// A transform error with an associated location in the bytecode.
pub type LocatedError = container::Located<Error>;

/// The result type for methods that may have transform errors.
pub type Result<T> = std::result::Result<T, Error>;

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

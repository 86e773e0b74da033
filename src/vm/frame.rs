//! This module contains the call frame arena used to give local variable
//! slots their originating-frame identity.

use crate::{
    bytecode::program::MethodId,
    error::execution::{Error, Result},
};

/// The identity of a call frame.
///
/// Frames are handles into an arena rather than linked structures, so the
/// chain of frames mirroring the call stack can be walked and compared
/// without reference cycles.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FrameId(pub usize);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One activation of a method.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    /// The frame of the caller, or [`None`] for a constraint entry point.
    pub parent: Option<FrameId>,

    /// The method this frame is an activation of.
    pub method: MethodId,

    /// The program counter in the caller's method to continue at once this
    /// frame returns.
    pub return_pc: Option<u32>,
}

/// The arena that owns every call frame created during symbolic execution.
#[derive(Clone, Debug, Default)]
pub struct FrameArena {
    frames: Vec<Frame>,
}

impl FrameArena {
    /// Creates a new, empty frame arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new frame, returning its identity.
    pub fn push(&mut self, frame: Frame) -> FrameId {
        let id = FrameId(self.frames.len());
        self.frames.push(frame);
        id
    }

    /// Gets the frame with the provided `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the frame does not exist.
    pub fn get(&self, id: FrameId) -> Result<&Frame> {
        self.frames.get(id.0).ok_or_else(|| {
            use crate::error::container::Locatable;
            Error::NoSuchFrame { id: id.0 }.locate(0)
        })
    }

    /// Walks the parent chain of `from`, returning the closest frame
    /// (including `from` itself) that is an activation of `method`.
    ///
    /// This is how a recursive invoke finds the activation whose units it
    /// must re-enter to close the call-graph cycle instead of expanding
    /// frames forever.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the frame chain is inconsistent.
    pub fn activation_of(&self, from: FrameId, method: MethodId) -> Result<Option<FrameId>> {
        let mut current = Some(from);
        while let Some(id) = current {
            let frame = self.get(id)?;
            if frame.method == method {
                return Ok(Some(id));
            }
            current = frame.parent;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        bytecode::program::MethodId,
        vm::frame::{Frame, FrameArena},
    };

    #[test]
    fn can_find_an_ancestor_activation() -> anyhow::Result<()> {
        let mut arena = FrameArena::new();
        let root = arena.push(Frame {
            parent: None,
            method: MethodId(0),
            return_pc: None,
        });
        let child = arena.push(Frame {
            parent: Some(root),
            method: MethodId(1),
            return_pc: Some(3),
        });

        assert_eq!(arena.activation_of(child, MethodId(0))?, Some(root));
        assert_eq!(arena.activation_of(child, MethodId(1))?, Some(child));
        assert_eq!(arena.activation_of(child, MethodId(9))?, None);
        Ok(())
    }
}

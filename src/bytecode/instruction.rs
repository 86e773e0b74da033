//! This module contains the instruction stream representation produced by the
//! disassembler: instructions grouped into basic blocks, and blocks grouped
//! into method bodies.

use crate::bytecode::opcode::Opcode;

/// A single decoded instruction at a known program counter.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    /// The program counter of the instruction.
    pub pc: u32,

    /// The decoded opcode.
    pub opcode: Opcode,
}

impl Instruction {
    /// Constructs a new instruction at `pc` with the decoded `opcode`.
    #[must_use]
    pub fn new(pc: u32, opcode: Opcode) -> Self {
        Self { pc, opcode }
    }
}

/// The index of a basic block within its method body.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BlockId(pub usize);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// A maximal straight-line sequence of instructions.
///
/// Control only enters a block at its first instruction and only leaves at
/// its last; the disassembler is responsible for having split the stream at
/// every jump target.
#[derive(Clone, Debug, PartialEq)]
pub struct BasicBlock {
    /// The program counter of the block's first instruction.
    pub start: u32,

    /// The instructions of the block, in program order.
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    /// Constructs a new basic block from its `instructions`.
    ///
    /// An empty block starts at program counter zero.
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self {
        let start = instructions.first().map_or(0, |i| i.pc);
        Self {
            start,
            instructions,
        }
    }
}

/// The body of a method: its basic blocks in program order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MethodBody {
    blocks: Vec<BasicBlock>,
}

impl MethodBody {
    /// Constructs a new method body from `blocks`, which must be in program
    /// order.
    #[must_use]
    pub fn new(blocks: Vec<BasicBlock>) -> Self {
        Self { blocks }
    }

    /// Gets the block with the provided `id`, if it exists.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0)
    }

    /// Gets the identity of the block whose first instruction is at `pc`.
    ///
    /// Jump targets always land at the start of a block, so an inexact match
    /// means the program is incoherent and [`None`] is returned.
    #[must_use]
    pub fn block_at(&self, pc: u32) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|block| block.start == pc)
            .map(BlockId)
    }

    /// Gets the identity of the block that follows `id` in program order, if
    /// one exists.
    #[must_use]
    pub fn next_block(&self, id: BlockId) -> Option<BlockId> {
        if id.0 + 1 < self.blocks.len() {
            Some(BlockId(id.0 + 1))
        } else {
            None
        }
    }

    /// Gets the identity of the entry block of the method.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// Gets the number of blocks in the body.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Checks whether the body has no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod test {
    use crate::bytecode::{
        instruction::{BasicBlock, BlockId, Instruction, MethodBody},
        opcode::Opcode,
    };

    fn block_at(start: u32) -> BasicBlock {
        BasicBlock::new(vec![Instruction::new(start, Opcode::Return { ty: None })])
    }

    #[test]
    fn can_look_up_a_block_by_its_start_pc() {
        let body = MethodBody::new(vec![block_at(0), block_at(8), block_at(20)]);

        assert_eq!(body.block_at(8), Some(BlockId(1)));
        assert_eq!(body.block_at(20), Some(BlockId(2)));
    }

    #[test]
    fn cannot_look_up_a_block_mid_stream() {
        let body = MethodBody::new(vec![block_at(0), block_at(8)]);
        assert_eq!(body.block_at(4), None);
    }

    #[test]
    fn can_get_the_following_block() {
        let body = MethodBody::new(vec![block_at(0), block_at(8)]);
        assert_eq!(body.next_block(BlockId(0)), Some(BlockId(1)));
        assert_eq!(body.next_block(BlockId(1)), None);
    }
}

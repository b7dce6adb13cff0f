//! Program tree over the decoded instruction stream.
//!
//! The tree is an arena: every decoded [`Instruction`] is a node addressed by a stable
//! [`NodeId`], and every [`Subroutine`] owns a contiguous node range that ends with its
//! terminal `RETN`. No node is ever moved or re-linked; the analysis passes attach their
//! results in side tables keyed by `NodeId`.

use std::{fmt, ops::Range};

use crate::disassembler::{Instruction, Opcode};

/// Identifier of an instruction node, its index in [`Program::instructions`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a node identifier from an index.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// The underlying index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identifier of a subroutine, its index in [`Program::subroutines`] (file order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubId(pub(crate) usize);

impl SubId {
    /// The underlying index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Role of a subroutine within the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubroutineKind {
    /// The loader stub that calls the globals initializer or `main`
    Entry,
    /// Global variable initializer, runs before `main`
    Globals,
    /// The script entry point
    Main,
    /// Any other subroutine
    Normal,
}

/// A contiguous run of instructions ending with `RETN`.
#[derive(Debug, Clone)]
pub struct Subroutine {
    /// Identifier (file order)
    pub id: SubId,
    /// Role within the program
    pub kind: SubroutineKind,
    /// Node range `[start, end)`
    pub nodes: Range<usize>,
}

impl Subroutine {
    /// First node.
    #[must_use]
    pub fn first(&self) -> NodeId {
        NodeId(self.nodes.start)
    }

    /// Last node, the terminal `RETN` of a well-formed subroutine.
    #[must_use]
    pub fn last(&self) -> NodeId {
        NodeId(self.nodes.end.saturating_sub(1))
    }

    /// Returns `true` if `node` belongs to this subroutine.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node.0)
    }

    /// Iterates the subroutine's nodes in file order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> {
        self.nodes.clone().map(NodeId)
    }
}

/// The instruction arena partitioned into subroutines.
#[derive(Debug, Clone)]
pub struct Program {
    /// Every decoded instruction, in file order
    pub instructions: Vec<Instruction>,
    /// Subroutines in file order
    pub subroutines: Vec<Subroutine>,
}

impl Program {
    /// Partitions an instruction stream into subroutines.
    ///
    /// Boundaries are the first code instruction (after the `T` size header) plus every
    /// `JSR` target that lands on an instruction boundary. Each subroutine spans up to the
    /// next boundary. All subroutines start as [`SubroutineKind::Normal`]; roles are
    /// assigned by [`crate::analysis::split`].
    #[must_use]
    pub fn build(instructions: Vec<Instruction>) -> Program {
        let code_start = instructions
            .iter()
            .position(|i| i.opcode != Opcode::T)
            .unwrap_or(instructions.len());

        let mut program = Program {
            instructions,
            subroutines: Vec::new(),
        };
        if code_start == program.instructions.len() {
            return program;
        }

        let mut starts: Vec<usize> = program.instructions[code_start..]
            .iter()
            .filter(|i| i.opcode == Opcode::Jsr)
            .filter_map(Instruction::jump_target)
            .filter_map(|target| program.node_at_offset(target))
            .map(NodeId::index)
            .filter(|&index| index > code_start)
            .collect();
        starts.push(code_start);
        starts.sort_unstable();
        starts.dedup();

        let total = program.instructions.len();
        program.subroutines = starts
            .iter()
            .enumerate()
            .map(|(i, &start)| Subroutine {
                id: SubId(i),
                kind: SubroutineKind::Normal,
                nodes: start..starts.get(i + 1).copied().unwrap_or(total),
            })
            .collect();
        program
    }

    /// The instruction behind a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Instruction {
        &self.instructions[id.0]
    }

    /// Looks up the node starting exactly at a byte offset.
    #[must_use]
    pub fn node_at_offset(&self, offset: usize) -> Option<NodeId> {
        self.instructions
            .binary_search_by_key(&offset, |i| i.offset)
            .ok()
            .map(NodeId)
    }

    /// Byte offset of a node.
    #[must_use]
    pub fn position(&self, id: NodeId) -> usize {
        self.instructions[id.0].offset
    }

    /// The subroutine at `id`.
    #[must_use]
    pub fn subroutine(&self, id: SubId) -> &Subroutine {
        &self.subroutines[id.0]
    }

    /// The subroutine whose first node is `node`.
    #[must_use]
    pub fn subroutine_starting_at(&self, node: NodeId) -> Option<SubId> {
        self.subroutines
            .binary_search_by_key(&node.0, |s| s.nodes.start)
            .ok()
            .map(SubId)
    }

    /// The subroutine containing `node`.
    #[must_use]
    pub fn subroutine_of(&self, node: NodeId) -> Option<SubId> {
        let index = self
            .subroutines
            .partition_point(|s| s.nodes.start <= node.0)
            .checked_sub(1)?;
        self.subroutines[index].contains(node).then_some(SubId(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::NcsAssembler, disassembler::decode_stream, disassembler::TypeCode};

    #[test]
    fn test_partition_on_call_targets() {
        let mut asm = NcsAssembler::new();
        asm.jsr("main").unwrap().retn().unwrap();
        asm.label("main").unwrap();
        asm.jsr("helper").unwrap().retn().unwrap();
        asm.label("helper").unwrap();
        asm.nop().unwrap().retn().unwrap();
        let bytes = asm.finish().unwrap();

        let program = Program::build(decode_stream(&bytes).unwrap());
        assert_eq!(program.subroutines.len(), 3);
        assert_eq!(program.subroutines[0].nodes, 1..3);
        assert_eq!(program.subroutines[1].nodes, 3..5);
        assert_eq!(program.subroutines[2].nodes, 5..7);
        assert_eq!(program.subroutine_of(NodeId(4)), Some(SubId(1)));
        assert_eq!(program.subroutine_starting_at(NodeId(5)), Some(SubId(2)));
        assert_eq!(program.subroutine_starting_at(NodeId(6)), None);
    }

    #[test]
    fn test_no_calls_single_subroutine() {
        let mut asm = NcsAssembler::new();
        asm.rsadd(TypeCode::Int).unwrap().movsp(-4).unwrap().retn().unwrap();
        let bytes = asm.finish().unwrap();

        let program = Program::build(decode_stream(&bytes).unwrap());
        assert_eq!(program.subroutines.len(), 1);
        assert_eq!(program.subroutines[0].nodes, 1..4);
        assert_eq!(program.subroutines[0].last(), NodeId(3));
    }

    #[test]
    fn test_header_only_program() {
        let program = Program::build(Vec::new());
        assert!(program.subroutines.is_empty());
    }
}

//! Per-file node analysis: destinations, control-flow origins, dead code and idiom markers.
//!
//! [`NodeAnalysisData`] is computed once per program, right after the tree is built, and
//! read by both stack simulation passes. Each subroutine is analysed independently so that
//! a broken jump in one of them only disqualifies that subroutine.
//!
//! Besides plain destination resolution, two compiler idioms are recognised here because
//! both passes must treat them identically:
//!
//! - **Short-circuit evaluation**: `CPTOPSP -4, 4; JZ L` (or `JNZ`) where the instruction
//!   before `L` is `LOGANDII` (or `LOGORII`). These jumps create no branch structure.
//! - **Deferred action blocks**: `STORE_STATE; JMP L` followed by the block body, which ends
//!   with the `RETN` right before `L`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::{
    analysis::{NodeId, Program, SubId, Subroutine},
    disassembler::{Opcode, Operand},
    Error, Result,
};

/// A deferred action block bracketed by `STORE_STATE` and `JMP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionBlock {
    /// The `STORE_STATE` node
    pub store: NodeId,
    /// The `JMP` skipping the block
    pub jump: NodeId,
    /// First node of the block body
    pub start: NodeId,
    /// The `RETN` closing the block
    pub end: NodeId,
    /// Node where the enclosing code resumes
    pub resume: NodeId,
}

/// Stack states stored against control-flow merge points.
///
/// The registry is generic so that the type pass and the codegen pass each keep their own
/// snapshot kind. Storing a snapshot for a node replaces (and drops) the previous one.
#[derive(Debug, Clone)]
pub struct StackSnapshots<S> {
    entries: HashMap<NodeId, S>,
}

impl<S> Default for StackSnapshots<S> {
    fn default() -> Self {
        StackSnapshots {
            entries: HashMap::new(),
        }
    }
}

impl<S> StackSnapshots<S> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the snapshot for `node`, replacing any earlier one.
    pub fn store(&mut self, node: NodeId, stack: S) {
        self.entries.insert(node, stack);
    }

    /// Removes and returns the snapshot for `node`.
    pub fn take(&mut self, node: NodeId) -> Option<S> {
        self.entries.remove(&node)
    }

    /// Returns `true` if a snapshot is stored for `node`.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.entries.contains_key(&node)
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no snapshot is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every stored snapshot.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Destination, origin and liveness tables for a whole program.
#[derive(Debug, Default)]
pub struct NodeAnalysisData {
    destinations: HashMap<NodeId, NodeId>,
    origins: BTreeMap<NodeId, Vec<NodeId>>,
    dead: Vec<bool>,
    short_circuit: HashSet<NodeId>,
    blocks: HashMap<NodeId, ActionBlock>,
    block_jumps: HashSet<NodeId>,
    block_ends: HashMap<NodeId, NodeId>,
    labels: BTreeSet<NodeId>,
}

impl NodeAnalysisData {
    /// Analyses every subroutine of `program`.
    ///
    /// Returns the tables plus the subroutines that failed structural validation; nodes of
    /// failed subroutines are all marked dead.
    #[must_use]
    pub fn analyze(program: &Program) -> (NodeAnalysisData, Vec<(SubId, Error)>) {
        let mut data = NodeAnalysisData {
            dead: vec![true; program.instructions.len()],
            ..NodeAnalysisData::default()
        };

        let mut failures = Vec::new();
        for sub in &program.subroutines {
            if let Err(error) = data.analyze_subroutine(program, sub) {
                for node in sub.iter() {
                    data.dead[node.index()] = true;
                    data.destinations.remove(&node);
                    data.blocks.remove(&node);
                }
                failures.push((sub.id, error));
            }
        }
        (data, failures)
    }

    fn analyze_subroutine(&mut self, program: &Program, sub: &Subroutine) -> Result<()> {
        let last = sub.last();
        if sub.nodes.is_empty() || program.node(last).opcode != Opcode::Retn {
            return Err(structural_error!(
                program.position(last),
                "subroutine does not end with RETN"
            ));
        }

        self.resolve_destinations(program, sub)?;
        self.find_action_blocks(program, sub)?;
        self.mark_live(program, sub);

        let live: Vec<NodeId> = sub.iter().filter(|&n| !self.is_dead(n)).collect();
        for node in live {
            let instruction = program.node(node);
            if !matches!(instruction.opcode, Opcode::Jmp | Opcode::Jz | Opcode::Jnz) {
                continue;
            }
            let Some(target) = self.destination(node) else {
                continue;
            };

            if instruction.opcode.is_conditional() && self.is_short_circuit_jump(program, node, target)
            {
                self.short_circuit.insert(NodeId(node.0 - 1));
                self.short_circuit.insert(node);
                continue;
            }
            if self.block_jumps.contains(&node) {
                continue;
            }

            self.origins.entry(target).or_default().push(node);
            self.labels.insert(target);
        }
        Ok(())
    }

    fn resolve_destinations(&mut self, program: &Program, sub: &Subroutine) -> Result<()> {
        for node in sub.iter() {
            let instruction = program.node(node);
            if !instruction.opcode.is_jump() {
                continue;
            }

            let target = instruction
                .jump_target()
                .and_then(|offset| program.node_at_offset(offset));
            let resolved = match (instruction.opcode, target) {
                (Opcode::Jsr, Some(target)) => program
                    .subroutine_starting_at(target)
                    .map(|_| target),
                (_, Some(target)) if sub.contains(target) => Some(target),
                _ => None,
            };

            match resolved {
                Some(target) => {
                    self.destinations.insert(node, target);
                }
                None => {
                    return Err(structural_error!(
                        instruction.offset,
                        "{} target {:?} does not resolve to an instruction of this subroutine",
                        instruction.opcode,
                        instruction.jump_target()
                    ))
                }
            }
        }
        Ok(())
    }

    fn find_action_blocks(&mut self, program: &Program, sub: &Subroutine) -> Result<()> {
        for node in sub.iter() {
            let instruction = program.node(node);
            if instruction.opcode != Opcode::StoreState {
                continue;
            }

            let jump = NodeId(node.0 + 1);
            let start = NodeId(node.0 + 2);
            let resume = match sub.contains(jump).then(|| program.node(jump)) {
                Some(next) if next.opcode == Opcode::Jmp => self.destination(jump),
                _ => None,
            };
            let Some(resume) = resume else {
                return Err(structural_error!(
                    instruction.offset,
                    "STORE_STATE is not followed by a JMP over its action block"
                ));
            };

            let end = NodeId(resume.0.saturating_sub(1));
            if resume <= start || program.node(end).opcode != Opcode::Retn {
                return Err(structural_error!(
                    instruction.offset,
                    "action block does not end with RETN"
                ));
            }

            self.blocks.insert(
                node,
                ActionBlock {
                    store: node,
                    jump,
                    start,
                    end,
                    resume,
                },
            );
            self.block_jumps.insert(jump);
            self.block_ends.insert(end, node);
        }
        Ok(())
    }

    fn mark_live(&mut self, program: &Program, sub: &Subroutine) {
        let mut worklist = vec![sub.first()];
        while let Some(node) = worklist.pop() {
            if !sub.contains(node) || !self.dead[node.0] {
                continue;
            }
            self.dead[node.0] = false;
            worklist.extend(self.successors(program, node));
        }
    }

    fn is_short_circuit_jump(&self, program: &Program, jump: NodeId, target: NodeId) -> bool {
        if jump.0 == 0 || target.0 == 0 {
            return false;
        }
        let dup = program.node(NodeId(jump.0 - 1));
        let is_dup = dup.opcode == Opcode::CpTopSp
            && dup.operand == Operand::Stack { offset: -4, size: 4 };
        let combiner = match program.node(jump).opcode {
            Opcode::Jz => Opcode::LogAndII,
            _ => Opcode::LogOrII,
        };
        is_dup && program.node(NodeId(target.0 - 1)).opcode == combiner
    }

    /// Control-flow successors of `node` inside its subroutine.
    ///
    /// Calls fall through to the next node; a `STORE_STATE` reaches both the skipping `JMP`
    /// and the start of its action block; the `RETN` closing an action block has none.
    #[must_use]
    pub fn successors(&self, program: &Program, node: NodeId) -> Vec<NodeId> {
        let next = NodeId(node.0 + 1);
        match program.node(node).opcode {
            Opcode::Retn => Vec::new(),
            Opcode::Jmp => self.destination(node).into_iter().collect(),
            Opcode::Jz | Opcode::Jnz => {
                let mut out = vec![next];
                out.extend(self.destination(node));
                out
            }
            Opcode::StoreState => match self.blocks.get(&node) {
                Some(block) => vec![block.jump, block.start],
                None => vec![next],
            },
            _ if next.0 < program.instructions.len() => vec![next],
            _ => Vec::new(),
        }
    }

    /// Resolved target of a jump or call.
    #[must_use]
    pub fn destination(&self, node: NodeId) -> Option<NodeId> {
        self.destinations.get(&node).copied()
    }

    /// The jumps targeting `node`.
    #[must_use]
    pub fn origins(&self, node: NodeId) -> &[NodeId] {
        self.origins.get(&node).map_or(&[], Vec::as_slice)
    }

    /// Returns `true` if `node` is unreachable from its subroutine entry.
    #[must_use]
    pub fn is_dead(&self, node: NodeId) -> bool {
        self.dead.get(node.0).copied().unwrap_or(true)
    }

    /// Returns `true` for both instructions of a short-circuit test.
    #[must_use]
    pub fn is_short_circuit(&self, node: NodeId) -> bool {
        self.short_circuit.contains(&node)
    }

    /// The action block opened by a `STORE_STATE` node.
    #[must_use]
    pub fn action_block(&self, store: NodeId) -> Option<&ActionBlock> {
        self.blocks.get(&store)
    }

    /// Returns `true` for the `JMP` skipping an action block.
    #[must_use]
    pub fn is_block_jump(&self, node: NodeId) -> bool {
        self.block_jumps.contains(&node)
    }

    /// Returns `true` for the `RETN` closing an action block.
    #[must_use]
    pub fn is_block_end(&self, node: NodeId) -> bool {
        self.block_ends.contains_key(&node)
    }

    /// Returns `true` if `node` is the target of a live branch and needs a label.
    #[must_use]
    pub fn is_label(&self, node: NodeId) -> bool {
        self.labels.contains(&node)
    }

    /// Returns `true` if `node` is targeted by a jump at or after it (a loop header).
    #[must_use]
    pub fn is_loop_header(&self, node: NodeId) -> bool {
        self.origins(node).iter().any(|&origin| origin >= node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::NcsAssembler, disassembler::decode_stream, disassembler::TypeCode};

    fn analyze(asm: &mut NcsAssembler) -> (Program, NodeAnalysisData, Vec<(SubId, Error)>) {
        let bytes = asm.finish().unwrap();
        let program = Program::build(decode_stream(&bytes).unwrap());
        let (data, failures) = NodeAnalysisData::analyze(&program);
        (program, data, failures)
    }

    #[test]
    fn test_dead_code_after_jump() {
        let mut asm = NcsAssembler::new();
        asm.jmp("end").unwrap();
        asm.rsadd(TypeCode::Int).unwrap().movsp(-4).unwrap();
        asm.label("end").unwrap();
        asm.retn().unwrap();
        let (_, data, failures) = analyze(&mut asm);

        assert!(failures.is_empty());
        assert!(!data.is_dead(NodeId(1)));
        assert!(data.is_dead(NodeId(2)));
        assert!(data.is_dead(NodeId(3)));
        assert!(!data.is_dead(NodeId(4)));
        assert_eq!(data.destination(NodeId(1)), Some(NodeId(4)));
        assert_eq!(data.origins(NodeId(4)), &[NodeId(1)]);
        assert!(data.is_label(NodeId(4)));
    }

    #[test]
    fn test_unresolved_target_fails_subroutine() {
        let mut asm = NcsAssembler::new();
        asm.jsr("main").unwrap().retn().unwrap();
        asm.label("main").unwrap();
        asm.raw_jump(Opcode::Jmp, 3).unwrap();
        asm.retn().unwrap();
        let (_, data, failures) = analyze(&mut asm);

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, SubId(1));
        assert!(!data.is_dead(NodeId(1)));
        assert!(data.is_dead(NodeId(3)));
    }

    #[test]
    fn test_missing_retn_fails_subroutine() {
        let mut asm = NcsAssembler::new();
        asm.nop().unwrap();
        let (_, _, failures) = analyze(&mut asm);
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn test_short_circuit_marker() {
        let mut asm = NcsAssembler::new();
        asm.const_int(1).unwrap();
        asm.cptopsp(-4, 4).unwrap().jz("and").unwrap();
        asm.const_int(0).unwrap();
        asm.op(Opcode::LogAndII, TypeCode::IntInt).unwrap();
        asm.label("and").unwrap();
        asm.movsp(-4).unwrap().retn().unwrap();
        let (_, data, failures) = analyze(&mut asm);

        assert!(failures.is_empty());
        assert!(data.is_short_circuit(NodeId(2)));
        assert!(data.is_short_circuit(NodeId(3)));
        assert!(!data.is_label(NodeId(6)));
    }

    #[test]
    fn test_action_block() {
        let mut asm = NcsAssembler::new();
        asm.store_state(8, 0).unwrap().jmp("resume").unwrap();
        asm.nop().unwrap().retn().unwrap();
        asm.label("resume").unwrap();
        asm.retn().unwrap();
        let (_, data, failures) = analyze(&mut asm);

        assert!(failures.is_empty());
        let block = data.action_block(NodeId(1)).unwrap();
        assert_eq!(block.start, NodeId(3));
        assert_eq!(block.end, NodeId(4));
        assert_eq!(block.resume, NodeId(5));
        assert!(data.is_block_jump(NodeId(2)));
        assert!(data.is_block_end(NodeId(4)));
        assert!(!data.is_dead(NodeId(3)));
        assert!(!data.is_label(NodeId(5)));
    }

    #[test]
    fn test_snapshot_registry_last_wins() {
        let mut snapshots = StackSnapshots::new();
        snapshots.store(NodeId(4), vec![1]);
        snapshots.store(NodeId(4), vec![1, 2]);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots.take(NodeId(4)), Some(vec![1, 2]));
        assert!(snapshots.is_empty());
    }
}

//! Structural and type analysis of decoded NCS programs.
//!
//! This module turns a flat instruction stream into a program of typed subroutines. It
//! provides the stores both stack-simulation passes read from, and the engine that infers
//! subroutine prototypes.
//!
//! # Architecture
//!
//! The analysis runs as a fixed sequence of stages, each depending on the completed state of
//! the previous one:
//!
//! - [`tree`] - Instruction arena, subroutine boundaries ([`Program`])
//! - [`nodedata`] - Jump destinations, origins, dead code, short-circuit and action-block
//!   markers ([`NodeAnalysisData`])
//! - [`subroutines`] - Subroutine roles and inferred prototypes ([`SubroutineAnalysisData`])
//! - [`prototype`] - Bootstrap and fixed point over the type-only stack pass
//!   ([`PrototypeEngine`])
//! - [`types`] - The script type model ([`Type`], [`StructType`])
//! - [`stack`] - Slot addressing shared by the type and codegen passes
//!
//! [`Analysis`] bundles the stages for one file.
//!
//! # Usage
//!
//! ```rust
//! use ncscope::{analysis::{Analysis, SubroutineKind}, assembly::NcsAssembler};
//! use ncscope::decompiler::{ActionTable, DecompilerConfig};
//!
//! let mut asm = NcsAssembler::new();
//! asm.jsr("main")?.retn()?;
//! asm.label("main")?.retn()?;
//! let bytes = asm.finish()?;
//!
//! let analysis = Analysis::run(&bytes, &ActionTable::new(), &DecompilerConfig::default())?;
//! assert!(analysis.converged);
//! let main = analysis.subs.main().unwrap();
//! assert_eq!(analysis.program.subroutine(main).kind, SubroutineKind::Main);
//! # Ok::<(), ncscope::Error>(())
//! ```

pub mod nodedata;
pub mod prototype;
pub mod stack;
pub mod subroutines;
pub mod tree;
pub mod typestack;
pub mod types;

use std::collections::HashMap;

use tracing::debug;

pub use nodedata::{ActionBlock, NodeAnalysisData, StackSnapshots};
pub use prototype::{EngineReport, PrototypeEngine};
pub use subroutines::{split, PrototypeStatus, SubroutineAnalysisData, SubroutineState};
pub use tree::{NodeId, Program, SubId, Subroutine, SubroutineKind};
pub use typestack::{Origin, TraceStep, TypeEntry};
pub use types::{group_slots, StructType, Type};

use crate::{
    decompiler::{ActionTable, DecompilerConfig},
    disassembler::decode_stream,
    Error, Result,
};

/// The analysis stores of one program.
///
/// Produced by [`Analysis::run`] and consumed by the codegen pass. Dropping the value (or
/// calling [`Analysis::close`]) releases all per-file state.
pub struct Analysis {
    /// Instruction arena and subroutine boundaries
    pub program: Program,
    /// Per-node control flow facts
    pub nodes: NodeAnalysisData,
    /// Per-subroutine prototypes and the global layout
    pub subs: SubroutineAnalysisData,
    /// Typed walk of every subroutine that completed the type pass
    pub traces: HashMap<SubId, Vec<TraceStep>>,
    /// Convergence warnings, by subroutine where one applies
    pub warnings: Vec<(Option<SubId>, String)>,
    /// Fixed point iterations performed
    pub iterations: usize,
    /// `true` if every subroutine that did not fail is fully prototyped
    pub converged: bool,
}

impl Analysis {
    /// Decodes `data` and runs every analysis stage over it.
    ///
    /// Structural failures are confined to their subroutine and recorded in its
    /// [`SubroutineState::failure`].
    ///
    /// # Errors
    ///
    /// Returns a format or decode error if the bytes cannot be decoded at all.
    pub fn run(data: &[u8], actions: &ActionTable, config: &DecompilerConfig) -> Result<Analysis> {
        let instructions = decode_stream(data)?;
        let mut program = Program::build(instructions);
        let (nodes, failures) = NodeAnalysisData::analyze(&program);
        let mut subs = split(&mut program);
        for (sub, error) in failures {
            subs.state_mut(sub).failure = Some(error);
        }
        debug!(
            instructions = program.instructions.len(),
            subroutines = program.subroutines.len(),
            "built program tree"
        );

        let report = PrototypeEngine::new(&program, &nodes, actions, config, &mut subs).run();
        Ok(Analysis {
            program,
            nodes,
            subs,
            traces: report.traces,
            warnings: report.warnings,
            iterations: report.iterations,
            converged: report.converged,
        })
    }

    /// Reruns one fixed point iteration over the current state.
    ///
    /// Returns `true` if anything changed. A converged analysis returns `false`.
    pub fn iterate(&mut self, actions: &ActionTable, config: &DecompilerConfig) -> bool {
        let mut engine =
            PrototypeEngine::new(&self.program, &self.nodes, actions, config, &mut self.subs);
        let changed = engine.iterate();
        let report = engine.into_report();
        self.traces.extend(report.traces);
        changed
    }

    /// The typed walk of `sub`, if it completed the type pass.
    #[must_use]
    pub fn trace(&self, sub: SubId) -> Option<&[TraceStep]> {
        self.traces.get(&sub).map(Vec::as_slice)
    }

    /// The failure recorded for `sub`, if any.
    #[must_use]
    pub fn failure(&self, sub: SubId) -> Option<&Error> {
        self.subs.state(sub).failure.as_ref()
    }

    /// Releases the analysis stores.
    pub fn close(self) {
        debug!(subroutines = self.program.subroutines.len(), "released analysis state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::NcsAssembler,
        disassembler::{Opcode, TypeCode},
    };

    fn analyze(asm: &mut NcsAssembler) -> Analysis {
        let bytes = asm.finish().unwrap();
        Analysis::run(&bytes, &ActionTable::new(), &DecompilerConfig::default()).unwrap()
    }

    #[test]
    fn test_declare_and_return_leaves_empty_stack() {
        let mut asm = NcsAssembler::new();
        asm.rsadd(TypeCode::Int).unwrap();
        asm.const_int(5).unwrap();
        asm.cpdownsp(-8, 4).unwrap();
        asm.movsp(-8).unwrap();
        asm.retn().unwrap();

        let analysis = analyze(&mut asm);
        let main = analysis.subs.main().unwrap();
        let trace = analysis.trace(main).unwrap();
        let last = trace.last().unwrap();
        assert_eq!(analysis.program.node(last.node).opcode, Opcode::Retn);
        assert_eq!(last.depth, 0);
        assert!(analysis.converged);
    }

    #[test]
    fn test_mutual_recursion_converges() {
        // a(n) returns b(n) unless n is zero, b(n) returns a(n - 1)
        let mut asm = NcsAssembler::new();
        asm.jsr("main").unwrap().retn().unwrap();

        asm.label("main").unwrap();
        asm.rsadd(TypeCode::Int).unwrap();
        asm.const_int(3).unwrap();
        asm.jsr("a").unwrap();
        asm.movsp(-4).unwrap();
        asm.retn().unwrap();

        asm.label("a").unwrap();
        asm.cptopsp(-4, 4).unwrap();
        asm.jz("base").unwrap();
        asm.rsadd(TypeCode::Int).unwrap();
        asm.cptopsp(-8, 4).unwrap();
        asm.jsr("b").unwrap();
        asm.cpdownsp(-12, 4).unwrap();
        asm.movsp(-4).unwrap();
        asm.jmp("end").unwrap();
        asm.label("base").unwrap();
        asm.const_int(0).unwrap();
        asm.cpdownsp(-12, 4).unwrap();
        asm.movsp(-4).unwrap();
        asm.label("end").unwrap();
        asm.movsp(-4).unwrap();
        asm.retn().unwrap();

        asm.label("b").unwrap();
        asm.rsadd(TypeCode::Int).unwrap();
        asm.cptopsp(-8, 4).unwrap();
        asm.const_int(1).unwrap();
        asm.op(Opcode::Sub, TypeCode::IntInt).unwrap();
        asm.jsr("a").unwrap();
        asm.cpdownsp(-12, 4).unwrap();
        asm.movsp(-4).unwrap();
        asm.movsp(-4).unwrap();
        asm.retn().unwrap();

        let mut analysis = analyze(&mut asm);
        assert!(analysis.converged);
        for sub in [SubId(2), SubId(3)] {
            let state = analysis.subs.state(sub);
            assert_eq!(state.status, PrototypeStatus::TotallyPrototyped);
            assert_eq!(state.params, vec![Type::Int]);
            assert_eq!(state.ret, Some(Type::Int));
        }

        let actions = ActionTable::new();
        let config = DecompilerConfig::default();
        assert!(!analysis.iterate(&actions, &config));
    }

    #[test]
    fn test_dead_code_not_traced() {
        let mut asm = NcsAssembler::new();
        asm.jmp("end").unwrap();
        asm.const_int(1).unwrap();
        asm.movsp(-4).unwrap();
        asm.label("end").unwrap();
        asm.retn().unwrap();

        let analysis = analyze(&mut asm);
        let main = analysis.subs.main().unwrap();
        let trace = analysis.trace(main).unwrap();
        assert_eq!(trace.len(), 2);
        assert!(trace
            .iter()
            .all(|step| analysis.program.node(step.node).opcode != Opcode::Const));
    }

    #[test]
    fn test_bad_input_is_an_error() {
        let result = Analysis::run(b"NCS V9.9", &ActionTable::new(), &DecompilerConfig::default());
        assert!(matches!(result, Err(Error::InvalidHeader(_))));
    }
}

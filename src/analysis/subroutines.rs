//! Subroutine splitting and the per-file subroutine analysis store.
//!
//! [`split`] assigns every subroutine of a [`Program`] its role (entry stub, globals
//! initializer, `main`, ordinary subroutine) and creates one [`SubroutineState`] per
//! subroutine. The resulting [`SubroutineAnalysisData`] is the mutable store the prototype
//! engine and the type pass refine in place; it also owns the shared global stack layout and
//! the struct shapes discovered for groups of local declarations.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::{
    analysis::{typestack::TypeEntry, NodeId, Program, StructType, SubId, SubroutineKind, Type},
    disassembler::Opcode,
    Error,
};

/// Progress of prototype inference for one subroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrototypeStatus {
    /// Nothing is known yet
    Unprototyped,
    /// The parameter size is known, some types may still be unresolved
    PartiallyPrototyped,
    /// Every parameter type and the return type are resolved
    TotallyPrototyped,
}

/// Mutable inference record of one subroutine.
#[derive(Debug)]
pub struct SubroutineState {
    /// The subroutine
    pub id: SubId,
    /// Its role
    pub kind: SubroutineKind,
    /// Inference progress
    pub status: PrototypeStatus,
    /// Total parameter size in slots, once known
    pub param_size: Option<usize>,
    /// Parameter types, first parameter first
    pub params: Vec<Type>,
    /// Return type, once known
    pub ret: Option<Type>,
    /// Calls skipped by the bootstrap pass because the callee was not prototyped yet
    pub skips: BTreeSet<NodeId>,
    /// Set when the parameter size is a best-effort guess
    pub assumed: bool,
    /// Structural failure that excludes this subroutine from further analysis
    pub failure: Option<Error>,
}

impl SubroutineState {
    fn new(id: SubId, kind: SubroutineKind) -> Self {
        SubroutineState {
            id,
            kind,
            status: PrototypeStatus::Unprototyped,
            param_size: None,
            params: Vec::new(),
            ret: None,
            skips: BTreeSet::new(),
            assumed: false,
            failure: None,
        }
    }

    /// Returns `true` if the subroutine was excluded after a structural failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Records the parameter size found by the bootstrap pass.
    pub fn set_param_size(&mut self, slots: usize) {
        self.param_size = Some(slots);
        self.params = vec![Type::Unresolved; slots];
        self.status = PrototypeStatus::PartiallyPrototyped;
    }

    /// Parameter types in stack order, bottom of the frame first.
    ///
    /// Arguments are pushed last to first, so the first parameter sits on top.
    #[must_use]
    pub fn param_layout(&self) -> Vec<Type> {
        self.params.iter().rev().cloned().collect()
    }

    /// Returns `true` once the prototype is complete; its parameter shapes no longer change.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.status == PrototypeStatus::TotallyPrototyped
    }

    /// Replaces the parameters from a stack-order layout.
    ///
    /// Returns `false` and keeps the current parameters if the prototype is frozen and
    /// the layout differs.
    pub fn set_param_layout(&mut self, layout: Vec<Type>) -> bool {
        let params: Vec<Type> = layout.into_iter().rev().collect();
        if self.is_frozen() && params != self.params {
            return false;
        }
        self.params = params;
        true
    }

    /// Size of the return value in slots (`0` while unknown).
    #[must_use]
    pub fn ret_size(&self) -> usize {
        self.ret.as_ref().map_or(0, Type::size)
    }

    /// Returns `true` if every parameter and the return type are resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.param_size.is_some()
            && self.params.iter().all(Type::is_resolved)
            && self.ret.as_ref().is_some_and(Type::is_resolved)
    }

    /// Updates [`Self::status`] from the current prototype.
    pub fn update_status(&mut self) {
        self.status = if self.is_resolved() {
            PrototypeStatus::TotallyPrototyped
        } else if self.param_size.is_some() {
            PrototypeStatus::PartiallyPrototyped
        } else {
            PrototypeStatus::Unprototyped
        };
    }
}

/// Comparable summary of everything the type pass can change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fingerprint {
    prototypes: Vec<(PrototypeStatus, Vec<Type>, Option<Type>, bool)>,
    decl_groups: BTreeMap<NodeId, Type>,
    globals: Vec<Type>,
}

/// Per-file store of subroutine states and shared layouts.
#[derive(Debug, Default)]
pub struct SubroutineAnalysisData {
    states: Vec<SubroutineState>,
    entry: Option<SubId>,
    globals: Option<SubId>,
    main: Option<SubId>,
    pub(crate) global_stack: Vec<TypeEntry>,
    pub(crate) decl_groups: BTreeMap<NodeId, Type>,
}

/// Assigns subroutine roles and creates the analysis store.
///
/// The entry stub's first call targets either `main` or, if that target saves the base
/// pointer, the globals initializer, in which case `main` is the first call after its
/// `SAVEBP`. A program whose first subroutine calls nothing is a single `main`.
pub fn split(program: &mut Program) -> SubroutineAnalysisData {
    let mut data = SubroutineAnalysisData::default();
    if program.subroutines.is_empty() {
        return data;
    }

    let first_call = |program: &Program, sub: SubId, after: Option<NodeId>| {
        program
            .subroutine(sub)
            .iter()
            .filter(|&n| after.map_or(true, |a| n > a))
            .filter(|&n| program.node(n).opcode == Opcode::Jsr)
            .find_map(|n| {
                let target = program.node_at_offset(program.node(n).jump_target()?)?;
                program.subroutine_starting_at(target)
            })
    };

    match first_call(program, SubId(0), None) {
        None => data.main = Some(SubId(0)),
        Some(target) => {
            data.entry = Some(SubId(0));
            let savebp = program
                .subroutine(target)
                .iter()
                .find(|&n| program.node(n).opcode == Opcode::SaveBp);
            match savebp.and_then(|at| first_call(program, target, Some(at))) {
                Some(main) => {
                    data.globals = Some(target);
                    data.main = Some(main);
                }
                None => data.main = Some(target),
            }
        }
    }

    for sub in &mut program.subroutines {
        sub.kind = if Some(sub.id) == data.entry {
            SubroutineKind::Entry
        } else if Some(sub.id) == data.globals {
            SubroutineKind::Globals
        } else if Some(sub.id) == data.main {
            SubroutineKind::Main
        } else {
            SubroutineKind::Normal
        };
        data.states.push(SubroutineState::new(sub.id, sub.kind));
    }

    debug!(
        subroutines = data.states.len(),
        globals = data.globals.is_some(),
        main = ?data.main,
        "split program"
    );
    data
}

impl SubroutineAnalysisData {
    /// State of a subroutine.
    #[must_use]
    pub fn state(&self, id: SubId) -> &SubroutineState {
        &self.states[id.0]
    }

    /// Mutable state of a subroutine.
    pub fn state_mut(&mut self, id: SubId) -> &mut SubroutineState {
        &mut self.states[id.0]
    }

    /// State of the subroutine starting at `node`.
    #[must_use]
    pub fn state_by_node(&self, program: &Program, node: NodeId) -> Option<&SubroutineState> {
        program.subroutine_starting_at(node).map(|id| self.state(id))
    }

    /// Iterates all subroutine states in file order.
    pub fn iter(&self) -> impl Iterator<Item = &SubroutineState> {
        self.states.iter()
    }

    /// Number of subroutines that take part in inference (everything but the entry stub).
    #[must_use]
    pub fn num_subs(&self) -> usize {
        self.states
            .iter()
            .filter(|s| s.kind != SubroutineKind::Entry)
            .count()
    }

    /// Number of subroutines that are fully prototyped.
    #[must_use]
    pub fn count_subs_done(&self) -> usize {
        self.states
            .iter()
            .filter(|s| s.kind != SubroutineKind::Entry)
            .filter(|s| s.status == PrototypeStatus::TotallyPrototyped)
            .count()
    }

    /// The entry stub, if the program has one.
    #[must_use]
    pub fn entry(&self) -> Option<SubId> {
        self.entry
    }

    /// The globals initializer, if the program has one.
    #[must_use]
    pub fn globals(&self) -> Option<SubId> {
        self.globals
    }

    /// The `main` subroutine.
    #[must_use]
    pub fn main(&self) -> Option<SubId> {
        self.main
    }

    /// Types of the global variables, bottom of the global stack first.
    #[must_use]
    pub fn global_types(&self) -> Vec<Type> {
        self.global_stack.iter().map(|e| e.ty.clone()).collect()
    }

    /// Struct type of a declaration group starting at an `RSADD` node.
    #[must_use]
    pub fn decl_group(&self, node: NodeId) -> Option<&Type> {
        self.decl_groups.get(&node)
    }

    /// Every distinct non-vector structure used by a prototype, declaration group or global,
    /// inner structures before the structures containing them.
    #[must_use]
    pub fn struct_types(&self) -> Vec<StructType> {
        let mut out = Vec::new();
        let mut visit = |ty: &Type| collect_structs(ty, &mut out);
        for state in &self.states {
            state.params.iter().for_each(&mut visit);
            state.ret.iter().for_each(&mut visit);
        }
        self.decl_groups.values().for_each(&mut visit);
        self.global_stack.iter().for_each(|e| visit(&e.ty));
        out
    }

    pub(crate) fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            prototypes: self
                .states
                .iter()
                .map(|s| (s.status, s.params.clone(), s.ret.clone(), s.is_failed()))
                .collect(),
            decl_groups: self.decl_groups.clone(),
            globals: self.global_types(),
        }
    }
}

fn collect_structs(ty: &Type, out: &mut Vec<StructType>) {
    if let Type::Struct(s) = ty {
        s.members.iter().for_each(|m| collect_structs(m, out));
        if !s.is_vector() && !out.contains(s) {
            out.push(s.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::NcsAssembler, disassembler::decode_stream, disassembler::TypeCode};

    fn program(asm: &mut NcsAssembler) -> Program {
        Program::build(decode_stream(&asm.finish().unwrap()).unwrap())
    }

    #[test]
    fn test_split_without_globals() {
        let mut asm = NcsAssembler::new();
        asm.jsr("main").unwrap().retn().unwrap();
        asm.label("main").unwrap();
        asm.jsr("helper").unwrap().retn().unwrap();
        asm.label("helper").unwrap();
        asm.retn().unwrap();
        let mut program = program(&mut asm);

        let data = split(&mut program);
        assert_eq!(data.entry(), Some(SubId(0)));
        assert_eq!(data.main(), Some(SubId(1)));
        assert_eq!(data.globals(), None);
        assert_eq!(program.subroutines[2].kind, SubroutineKind::Normal);
        assert_eq!(data.num_subs(), 2);
        assert_eq!(data.count_subs_done(), 0);
    }

    #[test]
    fn test_split_with_globals() {
        let mut asm = NcsAssembler::new();
        asm.jsr("globals").unwrap().retn().unwrap();
        asm.label("globals").unwrap();
        asm.rsadd(TypeCode::Int).unwrap();
        asm.savebp().unwrap().jsr("main").unwrap().restorebp().unwrap();
        asm.movsp(-4).unwrap().retn().unwrap();
        asm.label("main").unwrap();
        asm.retn().unwrap();
        let mut program = program(&mut asm);

        let data = split(&mut program);
        assert_eq!(data.globals(), Some(SubId(1)));
        assert_eq!(data.main(), Some(SubId(2)));
        assert_eq!(program.subroutines[1].kind, SubroutineKind::Globals);
        assert_eq!(program.subroutines[2].kind, SubroutineKind::Main);
    }

    #[test]
    fn test_param_layout_is_reversed() {
        let mut state = SubroutineState::new(SubId(1), SubroutineKind::Normal);
        state.set_param_size(2);
        state.params = vec![Type::Int, Type::String];
        assert_eq!(state.param_layout(), vec![Type::String, Type::Int]);
        assert!(state.set_param_layout(vec![Type::Float, Type::Int]));
        assert_eq!(state.params, vec![Type::Int, Type::Float]);
        assert_eq!(state.status, PrototypeStatus::PartiallyPrototyped);

        state.ret = Some(Type::Void);
        state.update_status();
        assert_eq!(state.status, PrototypeStatus::TotallyPrototyped);
    }

    #[test]
    fn test_complete_prototype_is_frozen() {
        let mut state = SubroutineState::new(SubId(1), SubroutineKind::Normal);
        state.set_param_size(2);
        assert!(state.set_param_layout(vec![Type::Int, Type::Int]));
        state.ret = Some(Type::Void);
        state.update_status();
        assert!(state.is_frozen());

        let grouped = Type::Struct(StructType::new(vec![Type::Int, Type::Int]));
        assert!(!state.set_param_layout(vec![grouped]));
        assert_eq!(state.params, vec![Type::Int, Type::Int]);
        assert!(state.set_param_layout(vec![Type::Int, Type::Int]));
    }
}

//! Prototype inference across the call graph.
//!
//! A subroutine's parameter count is only visible through its stack discipline: the
//! callee pops its own parameters with its final `MOVSP`, so the depth reached at the
//! terminal `RETN` (relative to entry) is minus the parameter size. That depth depends on
//! the parameter sizes of every subroutine called on the way, hence two phases:
//!
//! 1. **Bootstrap**: a depth-only walk per subroutine. Calls to subroutines whose parameter
//!    size is still unknown block the walking path (they are recorded as skips). The walk is
//!    repeated over all subroutines until no further parameter size can be found. Whatever
//!    remains after that (mutually dependent cycles without another exit) gets a best-effort
//!    size, computed by assuming blocked callees take no parameters, and a convergence
//!    warning.
//! 2. **Fixed point**: the typed pass ([`DoTypes`]) runs over the globals initializer, every
//!    ordinary subroutine in file order and `main`, repeatedly, until the prototypes, the
//!    declaration groups and the global layout stop changing, or the iteration cap is hit.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, trace, warn};

use crate::{
    analysis::{
        typestack::{operator_types, pop_operand, stack_operand, DoTypes, TraceStep},
        NodeAnalysisData, NodeId, Program, SubId, SubroutineAnalysisData, SubroutineKind,
    },
    decompiler::{ActionTable, DecompilerConfig},
    disassembler::{Instruction, Opcode, Operand, TypeCode},
    Result,
};

/// Result of one bootstrap walk.
enum Walk {
    /// The terminal `RETN` was reached with this parameter size
    Found(usize),
    /// Every path crossed an unprototyped call
    Blocked(BTreeSet<NodeId>),
}

/// Outcome of prototype inference.
#[derive(Debug, Default)]
pub struct EngineReport {
    /// Typed walk of every subroutine from its last successful run
    pub traces: HashMap<SubId, Vec<TraceStep>>,
    /// Convergence warnings, by subroutine where one applies
    pub warnings: Vec<(Option<SubId>, String)>,
    /// Number of fixed point iterations performed
    pub iterations: usize,
    /// `true` if every subroutine ended up fully prototyped
    pub converged: bool,
}

/// Drives the bootstrap and the typed fixed point for one program.
pub struct PrototypeEngine<'a> {
    program: &'a Program,
    nodes: &'a NodeAnalysisData,
    actions: &'a ActionTable,
    config: &'a DecompilerConfig,
    subs: &'a mut SubroutineAnalysisData,
    report: EngineReport,
}

impl<'a> PrototypeEngine<'a> {
    /// Creates an engine over the analysis stores of one program.
    pub fn new(
        program: &'a Program,
        nodes: &'a NodeAnalysisData,
        actions: &'a ActionTable,
        config: &'a DecompilerConfig,
        subs: &'a mut SubroutineAnalysisData,
    ) -> Self {
        PrototypeEngine {
            program,
            nodes,
            actions,
            config,
            subs,
            report: EngineReport::default(),
        }
    }

    /// Runs the bootstrap and iterates the typed pass to its fixed point.
    #[must_use]
    pub fn run(mut self) -> EngineReport {
        self.bootstrap();

        let mut stuck = false;
        while self.report.iterations < self.config.max_iterations {
            if !self.iterate() {
                stuck = !self.all_done();
                break;
            }
        }

        self.report.converged = self.all_done();
        if !self.report.converged {
            let reason = if stuck {
                "prototype inference stopped making progress"
            } else {
                "prototype inference hit the iteration cap"
            };
            let done = self.subs.count_subs_done();
            let total = self.subs.num_subs();
            if self.config.strict_signatures {
                warn!(done, total, iterations = self.report.iterations, "{}", reason);
            } else {
                debug!(done, total, iterations = self.report.iterations, "{}", reason);
            }
            self.report
                .warnings
                .push((None, format!("{reason} ({done} of {total} subroutines typed)")));
            for state in self.subs.iter() {
                if state.kind != SubroutineKind::Entry && !state.is_failed() && !state.is_resolved() {
                    self.report.warnings.push((
                        Some(state.id),
                        "signature contains unresolved types".to_string(),
                    ));
                }
            }
        }
        self.report
    }

    /// Runs one iteration of the typed pass over every subroutine.
    ///
    /// Returns `true` if any prototype, declaration group or global changed.
    pub fn iterate(&mut self) -> bool {
        let before = self.subs.fingerprint();
        for id in self.schedule() {
            if self.subs.state(id).is_failed() {
                continue;
            }
            let pass = DoTypes::new(self.program, self.nodes, self.actions, self.subs, id);
            match pass.run() {
                Ok(trace) => {
                    self.report.traces.insert(id, trace);
                }
                Err(error) => {
                    debug!(sub = id.index(), %error, "subroutine failed type analysis");
                    self.report.traces.remove(&id);
                    self.subs.state_mut(id).failure = Some(error);
                }
            }
        }
        self.report.iterations += 1;

        let changed = before != self.subs.fingerprint();
        trace!(
            iteration = self.report.iterations,
            changed,
            done = self.subs.count_subs_done(),
            "prototype iteration"
        );
        changed
    }

    /// Consumes the engine, returning what it found so far.
    #[must_use]
    pub fn into_report(self) -> EngineReport {
        self.report
    }

    /// Globals first, then ordinary subroutines in file order, `main` last.
    fn schedule(&self) -> Vec<SubId> {
        let mut order: Vec<SubId> = self.subs.globals().into_iter().collect();
        order.extend(
            self.subs
                .iter()
                .filter(|s| s.kind == SubroutineKind::Normal)
                .map(|s| s.id),
        );
        order.extend(self.subs.main());
        order
    }

    fn all_done(&self) -> bool {
        self.subs
            .iter()
            .filter(|s| s.kind != SubroutineKind::Entry && !s.is_failed())
            .all(|s| s.is_resolved())
    }

    /// Finds parameter sizes for every subroutine.
    pub fn bootstrap(&mut self) {
        let order = self.schedule();
        loop {
            loop {
                let mut progress = false;
                for &id in &order {
                    let state = self.subs.state(id);
                    if state.param_size.is_some() || state.is_failed() {
                        continue;
                    }
                    match self.walk(id, false) {
                        Ok(Walk::Found(size)) => {
                            let state = self.subs.state_mut(id);
                            state.set_param_size(size);
                            state.skips.clear();
                            progress = true;
                        }
                        Ok(Walk::Blocked(skips)) => self.subs.state_mut(id).skips = skips,
                        Err(error) => self.subs.state_mut(id).failure = Some(error),
                    }
                }
                if !progress {
                    break;
                }
            }

            let pending = order.iter().copied().find(|&id| {
                let state = self.subs.state(id);
                state.param_size.is_none() && !state.is_failed()
            });
            let Some(id) = pending else {
                break;
            };
            match self.walk(id, true) {
                Ok(walk) => {
                    let size = match walk {
                        Walk::Found(size) => size,
                        Walk::Blocked(_) => 0,
                    };
                    let state = self.subs.state_mut(id);
                    state.set_param_size(size);
                    state.assumed = true;
                    self.report.warnings.push((
                        Some(id),
                        format!("parameter size {size} assumed, callees were not prototyped"),
                    ));
                }
                Err(error) => self.subs.state_mut(id).failure = Some(error),
            }
        }

        debug!(
            subroutines = order.len(),
            assumed = self.subs.iter().filter(|s| s.assumed).count(),
            "bootstrapped parameter sizes"
        );
    }

    /// Depth-only walk from the entry of `id` to its terminal `RETN`.
    ///
    /// With `assume` set, unprototyped callees are taken to have no parameters.
    fn walk(&self, id: SubId, assume: bool) -> Result<Walk> {
        let subroutine = self.program.subroutine(id);
        let mut visited = HashSet::new();
        let mut skips = BTreeSet::new();
        let mut worklist = vec![(subroutine.first(), 0isize)];

        while let Some((node, depth)) = worklist.pop() {
            if !subroutine.contains(node) || self.nodes.is_dead(node) || !visited.insert(node) {
                continue;
            }
            let instruction = self.program.node(node);
            if instruction.opcode == Opcode::Retn {
                if !self.nodes.is_block_end(node) {
                    return Ok(Walk::Found(depth.min(0).unsigned_abs()));
                }
                continue;
            }

            let Some(effect) = self.effect(node, instruction, assume)? else {
                skips.insert(node);
                continue;
            };
            for next in self.nodes.successors(self.program, node) {
                worklist.push((next, depth + effect));
            }
        }

        if skips.is_empty() {
            // No path reaches a return, nothing can be popped.
            return Ok(Walk::Found(0));
        }
        Ok(Walk::Blocked(skips))
    }

    /// Net stack effect in slots; `None` for a call that cannot be accounted for yet.
    fn effect(&self, node: NodeId, instruction: &Instruction, assume: bool) -> Result<Option<isize>> {
        let at = instruction.offset;
        let slots = |bytes: usize| (bytes / 4) as isize;

        let effect = match instruction.opcode {
            Opcode::RsAdd | Opcode::Const | Opcode::SaveBp => 1,
            Opcode::CpTopSp | Opcode::CpTopBp => slots(stack_operand(instruction)?.1),
            Opcode::MovSp => -(pop_operand(instruction)? as isize),
            Opcode::Jz | Opcode::Jnz | Opcode::RestoreBp => -1,
            Opcode::Action => {
                let Operand::Action { index, argc } = instruction.operand else {
                    return Err(structural_error!(at, "ACTION without operands"));
                };
                let def = self
                    .actions
                    .get(usize::from(index))
                    .ok_or_else(|| structural_error!(at, "unknown action {}", index))?;
                def.ret.size() as isize
                    - def.param_stack_size(usize::from(argc)) as isize
            }
            Opcode::Destruct => match instruction.operand {
                Operand::Destruct { remove, save, .. } => {
                    slots(usize::from(save)) - slots(usize::from(remove))
                }
                _ => 0,
            },
            Opcode::Jsr => {
                let callee = self
                    .nodes
                    .destination(node)
                    .and_then(|target| self.program.subroutine_starting_at(target))
                    .ok_or_else(|| structural_error!(at, "call target is not a subroutine"))?;
                match self.subs.state(callee).param_size {
                    Some(size) => -(size as isize),
                    None if assume => 0,
                    None => return Ok(None),
                }
            }
            Opcode::Equal | Opcode::NEqual
                if instruction.type_code() == Some(TypeCode::StructStruct) =>
            {
                match instruction.operand {
                    Operand::StructSize(size) => 1 - 2 * slots(usize::from(size)),
                    _ => return Err(structural_error!(at, "structure comparison without size")),
                }
            }
            opcode if opcode.is_binary() => {
                let code = instruction
                    .type_code()
                    .ok_or_else(|| structural_error!(at, "{} with invalid type byte", opcode))?;
                let (left, right, result) = operator_types(opcode, code).ok_or_else(|| {
                    structural_error!(at, "{} cannot take {} operands", opcode, code)
                })?;
                result.size() as isize - (left.size() + right.size()) as isize
            }
            _ => 0,
        };
        Ok(Some(effect))
    }
}

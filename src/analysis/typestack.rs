//! Type-only stack simulation of one subroutine.
//!
//! The pass walks the live nodes of a subroutine in file order over a stack of
//! [`TypeEntry`] values. It never looks at concrete values; what it produces is evidence:
//!
//! - parameter and return types of the subroutine being simulated and of its callees,
//! - struct shapes, found when a multi-slot copy spans several entries (structification),
//! - the global variable layout, captured at the globals initializer's `SAVEBP`.
//!
//! Evidence is written straight into the [`SubroutineAnalysisData`]; the prototype engine
//! reruns the pass over all subroutines until nothing changes.
//!
//! # Join points
//!
//! Every forward branch stores a snapshot of the stack against its target. When the walk
//! reaches a node with a snapshot, the live stack is replaced by it (the last snapshot stored
//! wins). If the previous node falls through, both stacks must have the same depth, otherwise
//! the subroutine fails with a structural error. Backward branches are checked against the
//! depth recorded when their target was first visited.

use std::collections::HashMap;

use tracing::trace;

use crate::{
    analysis::{
        group_slots,
        stack::{depth, locate, locate_bp, locate_slots, pop_slots, Slotted, Span},
        NodeAnalysisData, NodeId, Program, StackSnapshots, StructType, SubId,
        SubroutineAnalysisData, SubroutineKind, Type,
    },
    decompiler::ActionTable,
    disassembler::{ConstValue, Instruction, Opcode, Operand, TypeCode},
    Result,
};

/// Where a stack entry came from, used to route type evidence back to its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// An intermediate value
    Temp,
    /// A declaration group starting at an `RSADD` node
    Decl(NodeId),
    /// A parameter, by slot from the bottom of the frame
    Param(usize),
}

/// One entry of the type stack.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeEntry {
    /// Type of the entry
    pub ty: Type,
    /// Source of the entry
    pub origin: Origin,
    /// Set for copies; copies route evidence but never form declaration groups
    pub copied: bool,
}

impl TypeEntry {
    fn new(ty: Type, origin: Origin) -> Self {
        TypeEntry {
            ty,
            origin,
            copied: false,
        }
    }

    fn temp(ty: Type) -> Self {
        TypeEntry::new(ty, Origin::Temp)
    }

    fn copy(&self) -> Self {
        TypeEntry {
            ty: self.ty.clone(),
            origin: self.origin,
            copied: true,
        }
    }
}

impl Slotted for TypeEntry {
    fn slots(&self) -> usize {
        self.ty.size()
    }
}

/// One step of the typed walk: a live node and the stack depth before it executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceStep {
    /// The node
    pub node: NodeId,
    /// Its byte offset
    pub offset: usize,
    /// Stack depth in slots before the node executed
    pub depth: usize,
}

/// The type-only stack simulator.
pub(crate) struct DoTypes<'a> {
    program: &'a Program,
    nodes: &'a NodeAnalysisData,
    actions: &'a ActionTable,
    subs: &'a mut SubroutineAnalysisData,
    sub: SubId,
    stack: Vec<TypeEntry>,
    snapshots: StackSnapshots<Vec<TypeEntry>>,
    depths: HashMap<NodeId, usize>,
    blocks: Vec<Vec<TypeEntry>>,
    group_rest: usize,
    returned: bool,
    trace: Vec<TraceStep>,
}

impl<'a> DoTypes<'a> {
    pub(crate) fn new(
        program: &'a Program,
        nodes: &'a NodeAnalysisData,
        actions: &'a ActionTable,
        subs: &'a mut SubroutineAnalysisData,
        sub: SubId,
    ) -> Self {
        DoTypes {
            program,
            nodes,
            actions,
            subs,
            sub,
            stack: Vec::new(),
            snapshots: StackSnapshots::new(),
            depths: HashMap::new(),
            blocks: Vec::new(),
            group_rest: 0,
            returned: false,
            trace: Vec::new(),
        }
    }

    /// Simulates the subroutine once and folds the evidence into the analysis store.
    ///
    /// # Errors
    ///
    /// Returns a structural error if the subroutine has no parameter size yet or if its
    /// stack discipline cannot be followed.
    pub(crate) fn run(mut self) -> Result<Vec<TraceStep>> {
        let program = self.program;
        let subroutine = program.subroutine(self.sub);
        let state = self.subs.state(self.sub);
        if state.param_size.is_none() {
            return Err(structural_error!(
                program.position(subroutine.first()),
                "subroutine has no parameter count"
            ));
        }

        let mut slot = 0;
        for ty in state.param_layout() {
            let size = ty.size();
            self.stack.push(TypeEntry::new(ty, Origin::Param(slot)));
            slot += size;
        }

        let mut previous: Option<NodeId> = None;
        for node in subroutine.iter() {
            if self.nodes.is_dead(node) {
                continue;
            }
            let instruction = program.node(node);

            if let Some(snapshot) = self.snapshots.take(node) {
                let falls_in = previous.is_some_and(|p| program.node(p).opcode.falls_through());
                if falls_in && depth(&snapshot) != depth(&self.stack) {
                    return Err(structural_error!(
                        instruction.offset,
                        "stack depth {} at join point differs from {} on the incoming branch",
                        depth(&self.stack),
                        depth(&snapshot)
                    ));
                }
                self.stack = snapshot;
            }

            let current = depth(&self.stack);
            self.depths.insert(node, current);
            self.trace.push(TraceStep {
                node,
                offset: instruction.offset,
                depth: current,
            });
            self.execute(node, instruction)?;
            previous = Some(node);
        }

        let state = self.subs.state_mut(self.sub);
        if !self.returned {
            state.ret = Some(Type::Void);
        }
        state.update_status();
        trace!(sub = self.sub.index(), status = ?state.status, "typed subroutine");
        Ok(self.trace)
    }

    fn execute(&mut self, node: NodeId, instruction: &Instruction) -> Result<()> {
        let at = instruction.offset;
        if self.group_rest > 0 {
            if instruction.opcode != Opcode::RsAdd {
                return Err(structural_error!(at, "declaration group is interrupted"));
            }
            self.group_rest -= 1;
            return Ok(());
        }

        match instruction.opcode {
            Opcode::RsAdd => self.declare(node, instruction),
            Opcode::Const => {
                let ty = match &instruction.operand {
                    Operand::Const(ConstValue::Int(_)) => Type::Int,
                    Operand::Const(ConstValue::Float(_)) => Type::Float,
                    Operand::Const(ConstValue::String(_)) => Type::String,
                    _ => Type::Object,
                };
                self.stack.push(TypeEntry::temp(ty));
                Ok(())
            }
            Opcode::CpTopSp => {
                let (offset, size) = stack_operand(instruction)?;
                let span = locate(&self.stack, offset, size, at)?;
                let span = group_span(&mut self.stack, span, at, self.subs, self.sub)?;
                let entry = span_entry(&self.stack, span, at)?;
                self.stack.push(entry);
                Ok(())
            }
            Opcode::CpDownSp => {
                let (offset, size) = stack_operand(instruction)?;
                self.copy_down(offset, size, at)
            }
            Opcode::CpTopBp => {
                let (offset, size) = stack_operand(instruction)?;
                let mut globals = std::mem::take(&mut self.subs.global_stack);
                let entry = locate_bp(&globals, offset, size, at)
                    .and_then(|span| group_span(&mut globals, span, at, self.subs, self.sub))
                    .and_then(|span| span_entry(&globals, span, at));
                self.subs.global_stack = globals;
                self.stack.push(entry?);
                Ok(())
            }
            Opcode::CpDownBp => {
                let (offset, size) = stack_operand(instruction)?;
                self.copy_down_bp(offset, size, at)
            }
            Opcode::Action => self.action(instruction),
            Opcode::MovSp => {
                let slots = pop_operand(instruction)?;
                pop_slots(&mut self.stack, slots, at)?;
                Ok(())
            }
            Opcode::LogAndII
            | Opcode::LogOrII
            | Opcode::IncOrII
            | Opcode::ExcOrII
            | Opcode::BoolAndII
            | Opcode::Equal
            | Opcode::NEqual
            | Opcode::Geq
            | Opcode::Gt
            | Opcode::Lt
            | Opcode::Leq
            | Opcode::ShLeft
            | Opcode::ShRight
            | Opcode::UShRight
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod => self.binary(instruction),
            Opcode::Neg => {
                let ty = match instruction.type_code() {
                    Some(TypeCode::Float) => Type::Float,
                    _ => Type::Int,
                };
                self.refine_top(&ty, at)
            }
            Opcode::Comp | Opcode::Not => self.refine_top(&Type::Int, at),
            Opcode::IncISp | Opcode::DecISp => {
                let offset = instruction.rel_offset().unwrap_or_default();
                let span = locate(&self.stack, offset, 4, at)?;
                refine_span(&mut self.stack, span, &Type::Int, self.subs, self.sub);
                Ok(())
            }
            Opcode::IncIBp | Opcode::DecIBp => {
                let offset = instruction.rel_offset().unwrap_or_default();
                let mut globals = std::mem::take(&mut self.subs.global_stack);
                let span = locate_bp(&globals, offset, 4, at);
                if let Ok(span) = &span {
                    refine_span(&mut globals, *span, &Type::Int, self.subs, self.sub);
                }
                self.subs.global_stack = globals;
                span.map(|_| ())
            }
            Opcode::Jmp => {
                if !self.nodes.is_block_jump(node) {
                    self.branch(node, at)?;
                }
                Ok(())
            }
            Opcode::Jz | Opcode::Jnz => {
                self.refine_top(&Type::Int, at)?;
                pop_slots(&mut self.stack, 1, at)?;
                if !self.nodes.is_short_circuit(node) {
                    self.branch(node, at)?;
                }
                Ok(())
            }
            Opcode::Jsr => self.call(node, at),
            Opcode::Retn => {
                if self.nodes.is_block_end(node) {
                    self.stack = self
                        .blocks
                        .pop()
                        .ok_or_else(|| structural_error!(at, "action block end without start"))?;
                    return Ok(());
                }
                let remaining = depth(&self.stack);
                if remaining != 0 {
                    return Err(structural_error!(
                        at,
                        "{} slots left on the stack at return",
                        remaining
                    ));
                }
                Ok(())
            }
            Opcode::Destruct => self.destruct(instruction),
            Opcode::SaveBp => {
                if self.program.subroutine(self.sub).kind == SubroutineKind::Globals {
                    self.subs.global_stack = self.stack.clone();
                }
                self.stack.push(TypeEntry::temp(Type::Int));
                Ok(())
            }
            Opcode::RestoreBp => pop_slots(&mut self.stack, 1, at).map(|_| ()),
            Opcode::StoreState => {
                self.blocks.push(self.stack.clone());
                Ok(())
            }
            Opcode::Nop | Opcode::T | Opcode::StoreStateAll => Ok(()),
        }
    }

    fn declare(&mut self, node: NodeId, instruction: &Instruction) -> Result<()> {
        if let Some(group) = self.subs.decl_group(node).cloned() {
            self.group_rest = group.size().saturating_sub(1);
            self.stack.push(TypeEntry::new(group, Origin::Decl(node)));
            return Ok(());
        }

        let ty = instruction
            .type_code()
            .and_then(Type::from_type_code)
            .ok_or_else(|| {
                structural_error!(
                    instruction.offset,
                    "RSADD with invalid type byte 0x{:02X}",
                    instruction.type_byte
                )
            })?;
        self.stack.push(TypeEntry::new(ty, Origin::Decl(node)));
        Ok(())
    }

    fn branch(&mut self, node: NodeId, at: usize) -> Result<()> {
        let target = self
            .nodes
            .destination(node)
            .ok_or_else(|| structural_error!(at, "branch without destination"))?;
        if target > node {
            self.snapshots.store(target, self.stack.clone());
            return Ok(());
        }

        let current = depth(&self.stack);
        match self.depths.get(&target) {
            Some(&expected) if expected != current => Err(structural_error!(
                at,
                "backward branch carries stack depth {} into a loop entered with {}",
                current,
                expected
            )),
            _ => Ok(()),
        }
    }

    fn top_span(&mut self, slots: usize, at: usize) -> Result<Span> {
        let current = depth(&self.stack);
        if slots > current {
            return Err(structural_error!(
                at,
                "stack underflow reading {} slots from depth {}",
                slots,
                current
            ));
        }
        let span = locate_slots(&self.stack, (current - slots) as isize, slots, at)?;
        group_span(&mut self.stack, span, at, self.subs, self.sub)
    }

    fn refine_top(&mut self, ty: &Type, at: usize) -> Result<()> {
        let span = self.top_span(ty.size(), at)?;
        refine_span(&mut self.stack, span, ty, self.subs, self.sub);
        Ok(())
    }

    /// Pops an operand of type `ty`, folding the type into its source.
    fn pop_typed(&mut self, ty: &Type, at: usize) -> Result<()> {
        let size = ty.size();
        if size == 0 {
            return Ok(());
        }
        self.refine_top(ty, at)?;
        pop_slots(&mut self.stack, size, at)?;
        Ok(())
    }

    fn copy_down(&mut self, offset: i32, size: usize, at: usize) -> Result<()> {
        let slots = size / 4;
        self.top_span(slots, at)?;

        let target = locate(&self.stack, offset, size, at)?;
        if let Span::Below { .. } = target {
            let source = self.top_span(slots, at)?;
            let value = span_type(&self.stack, source, at)?;
            let state = self.subs.state_mut(self.sub);
            let ret = match state.ret.take() {
                Some(mut ret) if ret.size() == value.size() => {
                    ret.refine(&value);
                    ret
                }
                _ => value,
            };
            state.ret = Some(ret.clone());
            refine_span(&mut self.stack, source, &ret, self.subs, self.sub);
            self.returned = true;
            return Ok(());
        }

        let target = group_span(&mut self.stack, target, at, self.subs, self.sub)?;
        let source = self.top_span(slots, at)?;
        let value = span_type(&self.stack, source, at)?;
        let existing = span_type(&self.stack, target, at)?;
        refine_span(&mut self.stack, target, &value, self.subs, self.sub);
        refine_span(&mut self.stack, source, &existing, self.subs, self.sub);
        Ok(())
    }

    fn copy_down_bp(&mut self, offset: i32, size: usize, at: usize) -> Result<()> {
        let source = self.top_span(size / 4, at)?;
        let value = span_type(&self.stack, source, at)?;

        let mut globals = std::mem::take(&mut self.subs.global_stack);
        let existing = locate_bp(&globals, offset, size, at)
            .and_then(|span| group_span(&mut globals, span, at, self.subs, self.sub))
            .and_then(|span| {
                let existing = span_type(&globals, span, at)?;
                refine_span(&mut globals, span, &value, self.subs, self.sub);
                Ok(existing)
            });
        self.subs.global_stack = globals;

        refine_span(&mut self.stack, source, &existing?, self.subs, self.sub);
        Ok(())
    }

    fn action(&mut self, instruction: &Instruction) -> Result<()> {
        let at = instruction.offset;
        let Operand::Action { index, argc } = instruction.operand else {
            return Err(structural_error!(at, "ACTION without operands"));
        };
        let actions = self.actions;
        let def = actions
            .get(usize::from(index))
            .ok_or_else(|| structural_error!(at, "unknown action {}", index))?;
        if usize::from(argc) > def.params.len() {
            return Err(structural_error!(
                at,
                "action {} called with {} arguments, declares {}",
                def.name,
                argc,
                def.params.len()
            ));
        }

        for param in def.params.iter().take(usize::from(argc)) {
            self.pop_typed(&param.ty.clone().normalized(), at)?;
        }
        match def.ret.clone().normalized() {
            Type::Void => {}
            ret => self.stack.push(TypeEntry::temp(ret)),
        }
        Ok(())
    }

    fn binary(&mut self, instruction: &Instruction) -> Result<()> {
        let at = instruction.offset;
        let opcode = instruction.opcode;
        let code = instruction
            .type_code()
            .ok_or_else(|| structural_error!(at, "{} with invalid type byte", opcode))?;

        if code == TypeCode::StructStruct {
            let Operand::StructSize(size) = instruction.operand else {
                return Err(structural_error!(at, "structure comparison without size"));
            };
            let slots = usize::from(size) / 4;
            let right = self.top_span(slots, at)?;
            let right_ty = span_type(&self.stack, right, at)?;
            let mut popped = pop_slots(&mut self.stack, slots, at)?;

            let left = self.top_span(slots, at)?;
            let left_ty = span_type(&self.stack, left, at)?;
            refine_span(&mut self.stack, left, &right_ty, self.subs, self.sub);
            if let [entry] = popped.as_mut_slice() {
                entry.ty.refine(&left_ty);
                learn(self.subs, self.sub, entry.origin, &entry.ty);
            }
            pop_slots(&mut self.stack, slots, at)?;
            self.stack.push(TypeEntry::temp(Type::Int));
            return Ok(());
        }

        let (left, right, result) = operator_types(opcode, code)
            .ok_or_else(|| structural_error!(at, "{} cannot take {} operands", opcode, code))?;
        self.pop_typed(&right, at)?;
        self.pop_typed(&left, at)?;
        self.stack.push(TypeEntry::temp(result));
        Ok(())
    }

    fn call(&mut self, node: NodeId, at: usize) -> Result<()> {
        let callee = self
            .nodes
            .destination(node)
            .and_then(|target| self.program.subroutine_starting_at(target))
            .ok_or_else(|| structural_error!(at, "call target is not a subroutine"))?;

        let state = self.subs.state(callee);
        let Some(param_size) = state.param_size else {
            return Err(structural_error!(at, "call to unprototyped subroutine"));
        };
        let current = depth(&self.stack);
        if param_size > current {
            return Err(structural_error!(
                at,
                "call takes {} slots but the stack holds {}",
                param_size,
                current
            ));
        }
        let base = current - param_size;

        // Caller entries wider than one slot group the callee's parameters
        let mut layout = state.param_layout();
        if !state.is_frozen() {
            let mut slot = 0;
            for entry in &self.stack {
                let size = entry.slots();
                if slot >= base && size > 1 {
                    group_slots(&mut layout, slot - base, size);
                }
                slot += size;
            }
        }

        // Callee parameters wider than one slot group the caller's arguments
        let mut rel = 0;
        for ty in &layout {
            let size = ty.size();
            if size > 1 {
                let span = locate_slots(&self.stack, (base + rel) as isize, size, at)?;
                group_span(&mut self.stack, span, at, self.subs, self.sub)?;
            }
            rel += size;
        }

        let mut args = Vec::with_capacity(layout.len());
        let mut rel = 0;
        for param in &mut layout {
            let size = param.size();
            let span = locate_slots(&self.stack, (base + rel) as isize, size, at)?;
            param.refine(&span_type(&self.stack, span, at)?);
            args.push(span);
            rel += size;
        }
        if !self.subs.state_mut(callee).set_param_layout(layout.clone()) {
            layout = self.subs.state(callee).param_layout();
        }
        for (span, param) in args.into_iter().zip(&layout) {
            refine_span(&mut self.stack, span, param, self.subs, self.sub);
        }
        pop_slots(&mut self.stack, param_size, at)?;

        let Some(ret) = self.subs.state(callee).ret.clone() else {
            return Ok(());
        };
        if ret.size() == 0 {
            return Ok(());
        }
        let slot = self.top_span(ret.size(), at)?;
        let evidence = span_type(&self.stack, slot, at)?;
        if let Some(callee_ret) = self.subs.state_mut(callee).ret.as_mut() {
            callee_ret.refine(&evidence);
        }
        refine_span(&mut self.stack, slot, &ret, self.subs, self.sub);
        Ok(())
    }

    fn destruct(&mut self, instruction: &Instruction) -> Result<()> {
        let at = instruction.offset;
        let Operand::Destruct {
            remove,
            offset,
            save,
        } = instruction.operand
        else {
            return Err(structural_error!(at, "DESTRUCT without operands"));
        };
        let (remove, offset, save) = (
            usize::from(remove) / 4,
            usize::from(offset) / 4,
            usize::from(save) / 4,
        );
        if offset + save > remove {
            return Err(structural_error!(at, "DESTRUCT keeps slots outside its range"));
        }

        let current = depth(&self.stack);
        if remove > current {
            return Err(structural_error!(at, "DESTRUCT of {} slots underflows", remove));
        }
        let kept = if save > 0 {
            let start = (current - remove + offset) as isize;
            let span = locate_slots(&self.stack, start, save, at)?;
            let span = group_span(&mut self.stack, span, at, self.subs, self.sub)?;
            Some(span_entry(&self.stack, span, at)?)
        } else {
            None
        };

        pop_slots(&mut self.stack, remove, at)?;
        if let Some(kept) = kept {
            self.stack.push(TypeEntry::temp(kept.ty));
        }
        Ok(())
    }
}

/// Operand and result types of a binary operator for a type byte.
pub(crate) fn operator_types(opcode: Opcode, code: TypeCode) -> Option<(Type, Type, Type)> {
    let vector = || Type::Struct(StructType::vector());
    let compare = opcode.is_comparison();
    let arithmetic = |result: Type| if compare { Type::Int } else { result };

    Some(match code {
        TypeCode::IntInt => (Type::Int, Type::Int, Type::Int),
        TypeCode::FloatFloat => (Type::Float, Type::Float, arithmetic(Type::Float)),
        TypeCode::IntFloat => (Type::Int, Type::Float, arithmetic(Type::Float)),
        TypeCode::FloatInt => (Type::Float, Type::Int, arithmetic(Type::Float)),
        TypeCode::StringString => (Type::String, Type::String, arithmetic(Type::String)),
        TypeCode::ObjectObject => (Type::Object, Type::Object, Type::Int),
        TypeCode::EffectEffect => (Type::Effect, Type::Effect, Type::Int),
        TypeCode::EventEvent => (Type::Event, Type::Event, Type::Int),
        TypeCode::LocationLocation => (Type::Location, Type::Location, Type::Int),
        TypeCode::TalentTalent => (Type::Talent, Type::Talent, Type::Int),
        TypeCode::VectorVector => (vector(), vector(), arithmetic(vector())),
        TypeCode::VectorFloat => (vector(), Type::Float, vector()),
        TypeCode::FloatVector => (Type::Float, vector(), vector()),
        _ => return None,
    })
}

/// Slots popped by a `MOVSP`.
pub(crate) fn pop_operand(instruction: &Instruction) -> Result<usize> {
    match instruction.rel_offset() {
        Some(rel) if rel <= 0 && rel % 4 == 0 => Ok((rel.unsigned_abs() / 4) as usize),
        _ => Err(structural_error!(
            instruction.offset,
            "MOVSP operand is not a slot aligned pop"
        )),
    }
}

/// `(offset, byte size)` of a stack copy instruction.
pub(crate) fn stack_operand(instruction: &Instruction) -> Result<(i32, usize)> {
    match instruction.stack_operand() {
        Some((offset, size)) => Ok((offset, usize::from(size))),
        None => Err(structural_error!(
            instruction.offset,
            "{} without a stack operand",
            instruction.opcode
        )),
    }
}

/// Collapses a span to a single entry, grouping or nesting structures as needed.
fn group_span(
    stack: &mut Vec<TypeEntry>,
    span: Span,
    at: usize,
    subs: &mut SubroutineAnalysisData,
    sub: SubId,
) -> Result<Span> {
    match span {
        Span::Entries { first, last } if first != last => {
            group_entries(stack, first, last, subs, sub);
            Ok(Span::Entries { first, last: first })
        }
        Span::Inner {
            entry,
            start,
            count,
        } if count > 1 => {
            let mut layout = vec![stack[entry].ty.clone()];
            if !group_slots(&mut layout, start, count) {
                return Err(structural_error!(
                    at,
                    "access of {} slots cuts across structure members",
                    count
                ));
            }
            let ty = layout.pop().unwrap_or(Type::Unresolved);
            if ty != stack[entry].ty {
                stack[entry].ty = ty.clone();
                reshape_origin(subs, sub, stack[entry].origin, ty);
            }
            Ok(span)
        }
        other => Ok(other),
    }
}

fn group_entries(
    stack: &mut Vec<TypeEntry>,
    first: usize,
    last: usize,
    subs: &mut SubroutineAnalysisData,
    sub: SubId,
) {
    let entries: Vec<TypeEntry> = stack.drain(first..=last).collect();
    let ty = Type::Struct(StructType::new(
        entries.iter().map(|e| e.ty.clone()).collect(),
    ));
    let origin = merged_origin(&entries);

    match origin {
        Origin::Decl(head) => {
            for entry in &entries[1..] {
                if let Origin::Decl(node) = entry.origin {
                    subs.decl_groups.remove(&node);
                }
            }
            subs.decl_groups.insert(head, ty.clone());
        }
        Origin::Param(slot) => {
            let state = subs.state_mut(sub);
            let mut layout = state.param_layout();
            if group_slots(&mut layout, slot, ty.size()) && !state.set_param_layout(layout) {
                trace!(sub = sub.0, "parameter shapes are frozen");
            }
        }
        Origin::Temp => {}
    }
    trace!(?origin, ty = %ty, "structified stack span");
    stack.insert(first, TypeEntry::new(ty, origin));
}

/// Origin of a group: declarations or parameters only group when they are adjacent
/// originals, anything else becomes a temporary.
fn merged_origin(entries: &[TypeEntry]) -> Origin {
    if entries.iter().any(|e| e.copied) {
        return Origin::Temp;
    }
    match entries.first().map(|e| e.origin) {
        Some(Origin::Decl(head)) => {
            let mut next = head.index();
            for entry in entries {
                match entry.origin {
                    Origin::Decl(node) if node.index() == next => next += entry.ty.size(),
                    _ => return Origin::Temp,
                }
            }
            Origin::Decl(head)
        }
        Some(Origin::Param(first)) => {
            let mut next = first;
            for entry in entries {
                match entry.origin {
                    Origin::Param(slot) if slot == next => next += entry.ty.size(),
                    _ => return Origin::Temp,
                }
            }
            Origin::Param(first)
        }
        _ => Origin::Temp,
    }
}

/// Propagates a new nesting of a structure entry to its source.
fn reshape_origin(subs: &mut SubroutineAnalysisData, sub: SubId, origin: Origin, ty: Type) {
    match origin {
        Origin::Decl(node) => {
            subs.decl_groups.insert(node, ty);
        }
        Origin::Param(slot) => {
            let state = subs.state_mut(sub);
            let mut layout = state.param_layout();
            if let Some(index) = param_at(&layout, slot) {
                if layout[index].size() == ty.size() {
                    layout[index] = ty;
                    let _ = state.set_param_layout(layout);
                }
            }
        }
        Origin::Temp => {}
    }
}

/// Type of a span that [`group_span`] collapsed.
fn span_type(stack: &[TypeEntry], span: Span, at: usize) -> Result<Type> {
    span_entry(stack, span, at).map(|e| e.ty)
}

/// A copy of the single entry (or structure member) a collapsed span addresses.
fn span_entry(stack: &[TypeEntry], span: Span, at: usize) -> Result<TypeEntry> {
    match span {
        Span::Entries { first, last } if first == last => Ok(stack[first].copy()),
        Span::Inner {
            entry,
            start,
            count,
        } => match stack[entry].ty.member_path(start, count) {
            Some((_, ty)) => Ok(TypeEntry {
                ty,
                origin: Origin::Temp,
                copied: true,
            }),
            None => Err(structural_error!(
                at,
                "slots {}..{} do not select a structure member",
                start,
                start + count
            )),
        },
        _ => Err(structural_error!(at, "access does not address a single value")),
    }
}

/// Folds `ty` into the entry a span addresses and routes it to the entry's source.
fn refine_span(
    stack: &mut [TypeEntry],
    span: Span,
    ty: &Type,
    subs: &mut SubroutineAnalysisData,
    sub: SubId,
) {
    let (entry, start) = match span {
        Span::Entries { first, .. } => (first, 0),
        Span::Inner { entry, start, .. } => (entry, start),
        Span::Below { .. } => return,
    };
    let entry = &mut stack[entry];
    entry.ty.refine_slots(start, ty);
    learn(subs, sub, entry.origin, &entry.ty);
}

/// Refines a parameter of `sub` from the type of an entry that originated from it.
fn learn(subs: &mut SubroutineAnalysisData, sub: SubId, origin: Origin, ty: &Type) {
    let Origin::Param(slot) = origin else {
        return;
    };
    let state = subs.state_mut(sub);
    let mut layout = state.param_layout();
    if let Some(index) = param_at(&layout, slot) {
        if layout[index].refine(ty) {
            let _ = state.set_param_layout(layout);
        }
    }
}

/// Index of the parameter starting exactly at `slot` of a stack-order layout.
fn param_at(layout: &[Type], slot: usize) -> Option<usize> {
    let mut start = 0;
    for (index, param) in layout.iter().enumerate() {
        if start == slot {
            return Some(index);
        }
        start += param.size();
        if start > slot {
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_types() {
        let vector = Type::Struct(StructType::vector());
        assert_eq!(
            operator_types(Opcode::Add, TypeCode::IntInt),
            Some((Type::Int, Type::Int, Type::Int))
        );
        assert_eq!(
            operator_types(Opcode::Lt, TypeCode::FloatFloat),
            Some((Type::Float, Type::Float, Type::Int))
        );
        assert_eq!(
            operator_types(Opcode::Add, TypeCode::StringString),
            Some((Type::String, Type::String, Type::String))
        );
        assert_eq!(
            operator_types(Opcode::Mul, TypeCode::VectorFloat),
            Some((vector.clone(), Type::Float, vector.clone()))
        );
        assert_eq!(
            operator_types(Opcode::Equal, TypeCode::VectorVector),
            Some((vector.clone(), vector, Type::Int))
        );
        assert_eq!(operator_types(Opcode::Add, TypeCode::Int), None);
    }

    #[test]
    fn test_merged_origin() {
        let decl = |n, ty| TypeEntry::new(ty, Origin::Decl(NodeId::new(n)));
        let entries = [decl(4, Type::Float), decl(5, Type::Float), decl(6, Type::Float)];
        assert_eq!(merged_origin(&entries), Origin::Decl(NodeId::new(4)));

        let gap = [decl(4, Type::Float), decl(6, Type::Float)];
        assert_eq!(merged_origin(&gap), Origin::Temp);

        let copies = [decl(4, Type::Float).copy(), decl(5, Type::Float)];
        assert_eq!(merged_origin(&copies), Origin::Temp);

        let params = [
            TypeEntry::new(Type::Int, Origin::Param(0)),
            TypeEntry::new(Type::Int, Origin::Param(1)),
        ];
        assert_eq!(merged_origin(&params), Origin::Param(0));
    }

    #[test]
    fn test_copy_of_three_floats_is_a_vector() {
        use crate::{assembly::NcsAssembler, disassembler::decode_stream};

        let mut asm = NcsAssembler::new();
        asm.const_float(1.0).unwrap();
        asm.const_float(2.0).unwrap();
        asm.const_float(3.0).unwrap();
        asm.cptopsp(-12, 12).unwrap();
        asm.movsp(-24).unwrap();
        asm.retn().unwrap();
        let bytes = asm.finish().unwrap();

        let mut program = Program::build(decode_stream(&bytes).unwrap());
        let (nodes, _) = NodeAnalysisData::analyze(&program);
        let mut subs = crate::analysis::split(&mut program);
        let main = subs.main().unwrap();
        subs.state_mut(main).set_param_size(0);
        let actions = ActionTable::new();

        let mut pass = DoTypes::new(&program, &nodes, &actions, &mut subs, main);
        for node in program.subroutine(main).iter().take(4) {
            pass.execute(node, program.node(node)).unwrap();
        }
        let vector = Type::Struct(StructType::vector());
        assert_eq!(pass.stack.len(), 2);
        assert_eq!(pass.stack[0].ty, vector);
        assert_eq!(pass.stack[1].ty, vector);
        assert!(pass.stack[1].copied);
    }

    #[test]
    fn test_call_keeps_frozen_callee_shape() {
        use crate::{assembly::NcsAssembler, disassembler::decode_stream};

        let mut asm = NcsAssembler::new();
        asm.jsr("main").unwrap().retn().unwrap();
        asm.label("main").unwrap().jsr("take").unwrap().retn().unwrap();
        asm.label("take").unwrap().movsp(-8).unwrap().retn().unwrap();
        let bytes = asm.finish().unwrap();

        let mut program = Program::build(decode_stream(&bytes).unwrap());
        let (nodes, _) = NodeAnalysisData::analyze(&program);
        let mut subs = crate::analysis::split(&mut program);
        let main = subs.main().unwrap();
        let take = SubId(2);
        subs.state_mut(main).set_param_size(0);
        let state = subs.state_mut(take);
        state.set_param_size(2);
        state.params = vec![Type::Int, Type::Int];
        state.ret = Some(Type::Void);
        state.update_status();
        let actions = ActionTable::new();

        let pair = Type::Struct(StructType::new(vec![Type::Int, Type::Int]));
        let mut pass = DoTypes::new(&program, &nodes, &actions, &mut subs, main);
        pass.stack.push(TypeEntry::new(pair, Origin::Temp));
        let jsr = program.subroutine(main).iter().next().unwrap();
        pass.execute(jsr, program.node(jsr)).unwrap();
        assert!(pass.stack.is_empty());

        assert_eq!(subs.state(take).params, vec![Type::Int, Type::Int]);
        assert!(subs.state(take).is_frozen());
    }
}


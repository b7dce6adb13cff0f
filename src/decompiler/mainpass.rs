//! Codegen pass: replays a subroutine over a value stack and emits statements.
//!
//! The pass follows exactly the stack discipline of the type pass, but its entries carry
//! the variable or expression that produced them. Statements come out in instruction order
//! as a flat list; jumps become [`Stmt::Goto`]/[`Stmt::CondGoto`] and jump targets
//! [`Stmt::Label`]. Structuring is left to the cleanup pass.
//!
//! A few compiled idioms need special handling:
//!
//! - The caller reserves a call's return slot with `RSADD`. The pass declares a variable
//!   for it like for any other `RSADD`, then overwrites the slot with the call expression.
//!   The declaration is never referenced and cleanup drops it.
//! - A temporary that is duplicated with `CPTOPSP` is being compared repeatedly (a `switch`
//!   operand or the left side of `&&`/`||`); it is marked so that discarding it emits
//!   nothing. The same holds for a value copied into the caller's return slot.
//! - `STORE_STATE` opens a nested statement buffer that collects the deferred action block.
//!   It is closed by the block's `RETN` and handed to the `ACTION` consuming it.

use tracing::trace;

use crate::{
    analysis::{
        stack::{depth, locate, locate_bp, locate_slots, pop_slots, Span},
        typestack::{operator_types, pop_operand, stack_operand},
        NodeAnalysisData, NodeId, Program, StackSnapshots, StructType, SubId,
        SubroutineAnalysisData, SubroutineKind, Type,
    },
    decompiler::{
        script::{BinaryOp, Expr, LValue, Stmt, SubScriptState, UnaryOp, VarKind, VarTable},
        stack::{StackEntry, Value},
        ActionTable,
    },
    disassembler::{ConstValue, Instruction, Opcode, Operand, TypeCode},
    Result,
};

/// The codegen pass over one subroutine.
pub(crate) struct MainPass<'a> {
    program: &'a Program,
    nodes: &'a NodeAnalysisData,
    subs: &'a SubroutineAnalysisData,
    actions: &'a ActionTable,
    vars: &'a mut VarTable,
    globals: &'a mut Vec<StackEntry>,
    sub: SubId,
    kind: SubroutineKind,
    stack: Vec<StackEntry>,
    snapshots: StackSnapshots<Vec<StackEntry>>,
    out: Vec<Vec<Stmt>>,
    saved: Vec<Vec<StackEntry>>,
    deferred: Vec<Vec<Stmt>>,
    group_rest: usize,
    sealed: bool,
}

impl<'a> MainPass<'a> {
    pub(crate) fn new(
        program: &'a Program,
        nodes: &'a NodeAnalysisData,
        subs: &'a SubroutineAnalysisData,
        actions: &'a ActionTable,
        vars: &'a mut VarTable,
        globals: &'a mut Vec<StackEntry>,
        sub: SubId,
    ) -> Self {
        MainPass {
            program,
            nodes,
            subs,
            actions,
            vars,
            globals,
            sub,
            kind: program.subroutine(sub).kind,
            stack: Vec::new(),
            snapshots: StackSnapshots::new(),
            out: vec![Vec::new()],
            saved: Vec::new(),
            deferred: Vec::new(),
            group_rest: 0,
            sealed: false,
        }
    }

    /// Replays the subroutine and returns its flat statement list.
    ///
    /// # Errors
    ///
    /// Returns a structural error if an instruction cannot be mapped onto the value stack.
    pub(crate) fn run(mut self) -> Result<SubScriptState> {
        let (program, subs) = (self.program, self.subs);
        let state = subs.state(self.sub);
        let params: Vec<_> = state
            .params
            .iter()
            .enumerate()
            .map(|(index, ty)| self.vars.add(ty.clone(), VarKind::Param(index), self.sub))
            .collect();
        for (&var, ty) in params.iter().zip(&state.params).rev() {
            self.stack.push(StackEntry::var(var, ty.clone()));
        }
        let ret = state.ret.clone().unwrap_or(Type::Void);
        let mut script = SubScriptState::new(self.sub, self.kind, params, ret);

        for node in program.subroutine(self.sub).iter() {
            if self.nodes.is_dead(node) {
                continue;
            }
            if let Some(snapshot) = self.snapshots.take(node) {
                self.stack = snapshot;
            }
            let instruction = program.node(node);
            if self.nodes.is_label(node) {
                self.emit(Stmt::Label(instruction.offset));
            }
            self.execute(node, instruction)?;
        }

        if self.out.len() != 1 {
            return Err(structural_error!(
                program.node(program.subroutine(self.sub).last()).offset,
                "action block is not closed"
            ));
        }
        script.body = self.out.pop().unwrap_or_default();
        trace!(
            sub = self.sub.index(),
            statements = script.body.len(),
            "generated subroutine body"
        );
        Ok(script)
    }

    fn emit(&mut self, stmt: Stmt) {
        if self.sealed {
            return;
        }
        if let Some(buffer) = self.out.last_mut() {
            buffer.push(stmt);
        }
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
                let Operand::Const(value) = &instruction.operand else {
                    return Err(structural_error!(at, "CONST without a value"));
                };
                let ty = match value {
                    ConstValue::Int(_) => Type::Int,
                    ConstValue::Float(_) => Type::Float,
                    ConstValue::String(_) => Type::String,
                    ConstValue::Object(_) => Type::Object,
                };
                self.stack
                    .push(StackEntry::expr(Expr::Const(value.clone()), ty));
                Ok(())
            }
            Opcode::CpTopSp => {
                let (offset, size) = stack_operand(instruction)?;
                let span = locate(&self.stack, offset, size, at)?;
                let (expr, ty) = read_span(&self.stack, span, at)?;
                if let Span::Entries { first, last } = span {
                    if first == last && matches!(self.stack[first].value, Value::Expr(_)) {
                        self.stack[first].silent = true;
                    }
                }
                self.stack.push(StackEntry::expr(expr, ty));
                Ok(())
            }
            Opcode::CpDownSp => {
                let (offset, size) = stack_operand(instruction)?;
                let (source, value) = self.top_value(size / 4, at)?;
                match locate(&self.stack, offset, size, at)? {
                    Span::Below { .. } => {
                        if let Span::Entries { first, last } = source {
                            self.stack[first..=last].iter_mut().for_each(|e| e.silent = true);
                        }
                        self.emit(Stmt::Return(Some(value)));
                        Ok(())
                    }
                    target => {
                        let stmts = store(&mut self.stack, target, value.clone(), at)?;
                        self.forward_assignment(source, target, &value, &stmts);
                        stmts.into_iter().for_each(|s| self.emit(s));
                        Ok(())
                    }
                }
            }
            Opcode::CpTopBp => {
                let (offset, size) = stack_operand(instruction)?;
                let span = locate_bp(self.globals, offset, size, at)?;
                let (expr, ty) = read_span(self.globals, span, at)?;
                self.stack.push(StackEntry::expr(expr, ty));
                Ok(())
            }
            Opcode::CpDownBp => {
                let (offset, size) = stack_operand(instruction)?;
                let (_, value) = self.top_value(size / 4, at)?;
                let target = locate_bp(self.globals, offset, size, at)?;
                let stmts = store(self.globals, target, value, at)?;
                stmts.into_iter().for_each(|s| self.emit(s));
                Ok(())
            }
            Opcode::Action => self.action(instruction),
            Opcode::MovSp => {
                let popped = pop_slots(&mut self.stack, pop_operand(instruction)?, at)?;
                self.discard(popped);
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
            Opcode::Neg | Opcode::Comp | Opcode::Not => {
                let op = match instruction.opcode {
                    Opcode::Neg => UnaryOp::Neg,
                    Opcode::Comp => UnaryOp::Comp,
                    _ => UnaryOp::Not,
                };
                let ty = match (op, instruction.type_code()) {
                    (UnaryOp::Neg, Some(TypeCode::Float)) => Type::Float,
                    _ => Type::Int,
                };
                let operand = self.take(1, at)?;
                self.stack
                    .push(StackEntry::expr(Expr::Unary(op, Box::new(operand)), ty));
                Ok(())
            }
            Opcode::IncISp | Opcode::DecISp => {
                let offset = instruction.rel_offset().unwrap_or_default();
                let span = locate(&self.stack, offset, 4, at)?;
                let target = lvalue(&self.stack, span, at)?;
                self.step(target, instruction.opcode == Opcode::IncISp);
                Ok(())
            }
            Opcode::IncIBp | Opcode::DecIBp => {
                let offset = instruction.rel_offset().unwrap_or_default();
                let span = locate_bp(self.globals, offset, 4, at)?;
                let target = lvalue(self.globals, span, at)?;
                self.step(target, instruction.opcode == Opcode::IncIBp);
                Ok(())
            }
            Opcode::Jmp => {
                if !self.nodes.is_block_jump(node) {
                    let target = self.branch(node, at)?;
                    self.emit(Stmt::Goto(target));
                }
                Ok(())
            }
            Opcode::Jz | Opcode::Jnz => {
                let cond = self.take(1, at)?;
                if self.nodes.is_short_circuit(node) {
                    return Ok(());
                }
                let cond = match instruction.opcode {
                    Opcode::Jz => cond.negate(),
                    _ => cond,
                };
                let target = self.branch(node, at)?;
                self.emit(Stmt::CondGoto { cond, target });
                Ok(())
            }
            Opcode::Jsr => self.call(node, at),
            Opcode::Retn => {
                if self.nodes.is_block_end(node) {
                    self.stack = self
                        .saved
                        .pop()
                        .ok_or_else(|| structural_error!(at, "action block end without start"))?;
                    if self.out.len() > 1 {
                        let block = self.out.pop().unwrap_or_default();
                        self.deferred.push(block);
                    }
                }
                Ok(())
            }
            Opcode::Destruct => self.destruct(instruction),
            Opcode::SaveBp => {
                if self.kind == SubroutineKind::Globals {
                    *self.globals = self.stack.clone();
                    self.sealed = true;
                }
                self.stack.push(StackEntry::hidden());
                Ok(())
            }
            Opcode::RestoreBp => pop_slots(&mut self.stack, 1, at).map(|_| ()),
            Opcode::StoreState => {
                self.saved.push(self.stack.clone());
                self.out.push(Vec::new());
                Ok(())
            }
            Opcode::Nop | Opcode::T | Opcode::StoreStateAll => Ok(()),
        }
    }

    fn declare(&mut self, node: NodeId, instruction: &Instruction) -> Result<()> {
        let ty = match self.subs.decl_group(node) {
            Some(group) => {
                self.group_rest = group.size().saturating_sub(1);
                group.clone()
            }
            None => instruction
                .type_code()
                .and_then(Type::from_type_code)
                .ok_or_else(|| {
                    structural_error!(
                        instruction.offset,
                        "RSADD with invalid type byte 0x{:02X}",
                        instruction.type_byte
                    )
                })?,
        };
        let kind = match self.kind {
            SubroutineKind::Globals => VarKind::Global,
            _ => VarKind::Local,
        };
        let var = self.vars.add(ty.clone(), kind, self.sub);
        self.stack.push(StackEntry::var(var, ty));
        self.emit(Stmt::Decl { var, init: None });
        Ok(())
    }

    /// Stores a snapshot for a forward jump and returns the target label.
    fn branch(&mut self, node: NodeId, at: usize) -> Result<usize> {
        let target = self
            .nodes
            .destination(node)
            .ok_or_else(|| structural_error!(at, "branch without destination"))?;
        if target > node {
            self.snapshots.store(target, self.stack.clone());
        }
        Ok(self.program.node(target).offset)
    }

    /// The value of the top `slots` slots, with the span it was read from.
    fn top_value(&self, slots: usize, at: usize) -> Result<(Span, Expr)> {
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
        let (expr, _) = read_span(&self.stack, span, at)?;
        Ok((span, expr))
    }

    /// Pops `slots` slots as one value.
    fn take(&mut self, slots: usize, at: usize) -> Result<Expr> {
        let popped = pop_slots(&mut self.stack, slots, at)?;
        let mut exprs = Vec::with_capacity(popped.len());
        for entry in &popped {
            exprs.push(
                entry
                    .read()
                    .ok_or_else(|| structural_error!(at, "saved base pointer used as a value"))?,
            );
        }
        match exprs.len() {
            1 => Ok(exprs.remove(0)),
            _ => Ok(Expr::Struct(exprs)),
        }
    }

    /// Emits discarded values that have side effects.
    fn discard(&mut self, popped: Vec<StackEntry>) {
        for entry in popped {
            if let Value::Expr(expr) = entry.value {
                if !entry.silent && expr.has_side_effects() {
                    self.emit(Stmt::Expr(expr));
                }
            }
        }
    }

    /// After `a = f()`, chained stores read `a` instead of calling `f` again.
    fn forward_assignment(&mut self, source: Span, target: Span, value: &Expr, stmts: &[Stmt]) {
        let (Span::Entries { first, last }, [Stmt::Assign { target: LValue::Var(var), .. }]) =
            (source, stmts)
        else {
            return;
        };
        if first == last && target != source && value.has_side_effects() {
            self.stack[first].value = Value::Expr(Expr::Var(*var));
        }
    }

    fn step(&mut self, target: LValue, increment: bool) {
        // A copy of the variable on top is the value of a postfix step
        let postfix = matches!(
            (self.stack.last().map(|e| &e.value), &target),
            (Some(Value::Expr(Expr::Var(var))), LValue::Var(stepped)) if var == stepped
        );
        let step = Expr::Step {
            target,
            increment,
            postfix,
        };
        match self.stack.last_mut() {
            Some(top) if postfix => top.value = Value::Expr(step),
            _ => self.emit(Stmt::Expr(step)),
        }
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

        let mut args = Vec::with_capacity(usize::from(argc));
        for param in def.params.iter().take(usize::from(argc)) {
            if param.ty == Type::Action {
                let block = self.deferred.pop().unwrap_or_default();
                args.push(Expr::Deferred(block));
            } else {
                args.push(self.take(param.ty.size(), at)?);
            }
        }

        let call = Expr::Action {
            name: def.name.clone(),
            args,
        };
        match def.ret.clone().normalized() {
            Type::Void => self.emit(Stmt::Expr(call)),
            ret => self.stack.push(StackEntry::expr(call, ret)),
        }
        Ok(())
    }

    fn binary(&mut self, instruction: &Instruction) -> Result<()> {
        let at = instruction.offset;
        let opcode = instruction.opcode;
        let op = BinaryOp::from_opcode(opcode)
            .ok_or_else(|| structural_error!(at, "{} is not a binary operator", opcode))?;
        let code = instruction
            .type_code()
            .ok_or_else(|| structural_error!(at, "{} with invalid type byte", opcode))?;

        let (left_size, right_size, result) = if code == TypeCode::StructStruct {
            let Operand::StructSize(size) = instruction.operand else {
                return Err(structural_error!(at, "structure comparison without size"));
            };
            let slots = usize::from(size) / 4;
            (slots, slots, Type::Int)
        } else {
            let (left, right, result) = operator_types(opcode, code)
                .ok_or_else(|| structural_error!(at, "{} cannot take {} operands", opcode, code))?;
            (left.size(), right.size(), result)
        };

        let right = self.take(right_size, at)?;
        let left = self.take(left_size, at)?;
        self.stack.push(StackEntry::expr(
            Expr::Binary(op, Box::new(left), Box::new(right)),
            result,
        ));
        Ok(())
    }

    fn call(&mut self, node: NodeId, at: usize) -> Result<()> {
        let callee = self
            .nodes
            .destination(node)
            .and_then(|target| self.program.subroutine_starting_at(target))
            .ok_or_else(|| structural_error!(at, "call target is not a subroutine"))?;
        let subs = self.subs;
        let state = subs.state(callee);
        if state.param_size.is_none() {
            return Err(structural_error!(at, "call to unprototyped subroutine"));
        }

        let mut args = Vec::with_capacity(state.params.len());
        for param in &state.params {
            args.push(self.take(param.size(), at)?);
        }
        let call = Expr::Call { sub: callee, args };

        let ret = state.ret.clone().unwrap_or(Type::Void);
        let size = ret.size();
        if size == 0 {
            self.emit(Stmt::Expr(call));
            return Ok(());
        }

        let current = depth(&self.stack);
        if size > current {
            return Err(structural_error!(at, "no return slot reserved for the call"));
        }
        match locate_slots(&self.stack, (current - size) as isize, size, at)? {
            Span::Entries { first, last } => {
                self.stack
                    .splice(first..=last, [StackEntry::expr(call, ret)]);
                Ok(())
            }
            _ => Err(structural_error!(at, "return slot cuts across a variable")),
        }
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
        let current = depth(&self.stack);
        if remove > current || offset + save > remove {
            return Err(structural_error!(at, "DESTRUCT range exceeds the stack"));
        }

        let kept = if save > 0 {
            let start = (current - remove + offset) as isize;
            let span = locate_slots(&self.stack, start, save, at)?;
            Some(read_span(&self.stack, span, at)?)
        } else {
            None
        };
        pop_slots(&mut self.stack, remove, at)?;
        if let Some((expr, ty)) = kept {
            self.stack.push(StackEntry::expr(expr, ty));
        }
        Ok(())
    }
}

/// Selects a member path of a value, looking through structure literals.
fn member(expr: Expr, path: Vec<usize>) -> Expr {
    let mut expr = expr;
    let mut rest = path.as_slice();
    while let (Expr::Struct(items), Some((&index, tail))) = (&expr, rest.split_first()) {
        match items.get(index) {
            Some(item) => {
                expr = item.clone();
                rest = tail;
            }
            None => break,
        }
    }
    if rest.is_empty() {
        expr
    } else {
        Expr::Member(Box::new(expr), rest.to_vec())
    }
}

/// Replaces the member at `path` of a structure value, splitting the value into its
/// members first if it is not a structure literal.
fn with_member(expr: Expr, ty: &Type, path: &[usize], value: Expr) -> Expr {
    let Some((&index, rest)) = path.split_first() else {
        return value;
    };
    let Type::Struct(shape) = ty else {
        return value;
    };
    let count = shape.members.len();
    let mut items = match expr {
        Expr::Struct(items) if items.len() == count => items,
        other => (0..count).map(|i| member(other.clone(), vec![i])).collect(),
    };
    if let (Some(slot), Some(member_ty)) = (items.get_mut(index), shape.members.get(index)) {
        let current = std::mem::replace(slot, Expr::Struct(Vec::new()));
        *slot = with_member(current, member_ty, rest, value);
    }
    Expr::Struct(items)
}

/// The value a span addresses, with its type.
fn read_span(stack: &[StackEntry], span: Span, at: usize) -> Result<(Expr, Type)> {
    let hidden = || structural_error!(at, "saved base pointer used as a value");
    match span {
        Span::Entries { first, last } if first == last => {
            let entry = &stack[first];
            Ok((entry.read().ok_or_else(hidden)?, entry.ty.clone()))
        }
        Span::Entries { first, last } => {
            let mut exprs = Vec::with_capacity(last - first + 1);
            let mut members = Vec::with_capacity(last - first + 1);
            for entry in &stack[first..=last] {
                exprs.push(entry.read().ok_or_else(hidden)?);
                members.push(entry.ty.clone());
            }
            Ok((Expr::Struct(exprs), Type::Struct(StructType::new(members))))
        }
        Span::Inner {
            entry,
            start,
            count,
        } => {
            let (path, ty) = stack[entry].ty.member_path(start, count).ok_or_else(|| {
                structural_error!(at, "slots {}..{} do not select a member", start, start + count)
            })?;
            let base = stack[entry].read().ok_or_else(hidden)?;
            Ok((member(base, path), ty))
        }
        Span::Below { .. } => Err(structural_error!(at, "read below the stack frame")),
    }
}

/// The location a span addresses.
fn lvalue(stack: &[StackEntry], span: Span, at: usize) -> Result<LValue> {
    match span {
        Span::Entries { first, last } if first == last => match stack[first].value {
            Value::Var(var) => Ok(LValue::Var(var)),
            _ => Err(structural_error!(at, "update of a temporary value")),
        },
        Span::Inner {
            entry,
            start,
            count,
        } => match (&stack[entry].value, stack[entry].ty.member_path(start, count)) {
            (Value::Var(var), Some((path, _))) => Ok(LValue::Member(*var, path)),
            _ => Err(structural_error!(at, "update of a temporary member")),
        },
        _ => Err(structural_error!(at, "update does not address a single value")),
    }
}

/// Writes `value` into the entries a span addresses and returns the assignments.
///
/// Writes into temporaries replace the temporary without emitting anything.
fn store(stack: &mut [StackEntry], span: Span, value: Expr, at: usize) -> Result<Vec<Stmt>> {
    match span {
        Span::Entries { first, last } if first == last => match stack[first].value {
            Value::Var(var) => Ok(vec![Stmt::Assign {
                target: LValue::Var(var),
                value,
            }]),
            Value::Expr(_) => {
                stack[first].value = Value::Expr(value);
                Ok(Vec::new())
            }
            Value::Hidden => Err(structural_error!(at, "store into the saved base pointer")),
        },
        Span::Entries { first, last } => {
            let count = last - first + 1;
            let parts = match value {
                Expr::Struct(items) if items.len() == count => items,
                other => (0..count).map(|i| member(other.clone(), vec![i])).collect(),
            };
            let mut stmts = Vec::new();
            for (index, part) in (first..=last).zip(parts) {
                stmts.extend(store(
                    stack,
                    Span::Entries {
                        first: index,
                        last: index,
                    },
                    part,
                    at,
                )?);
            }
            Ok(stmts)
        }
        Span::Inner {
            entry,
            start,
            count,
        } => match &stack[entry].value {
            Value::Var(_) => Ok(vec![Stmt::Assign {
                target: lvalue(stack, span, at)?,
                value,
            }]),
            Value::Expr(current) => {
                let (path, _) = stack[entry].ty.member_path(start, count).ok_or_else(|| {
                    structural_error!(at, "slots {}..{} do not select a member", start, start + count)
                })?;
                let updated = with_member(current.clone(), &stack[entry].ty, &path, value);
                stack[entry].value = Value::Expr(updated);
                Ok(Vec::new())
            }
            Value::Hidden => Err(structural_error!(at, "store into the saved base pointer")),
        },
        Span::Below { .. } => Err(structural_error!(at, "store below the stack frame")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompiler::script::VarId;

    #[test]
    fn test_member_of_struct_literal() {
        let items = Expr::Struct(vec![
            Expr::Const(ConstValue::Float(1.0)),
            Expr::Const(ConstValue::Float(2.0)),
            Expr::Const(ConstValue::Float(3.0)),
        ]);
        assert_eq!(
            member(items, vec![1]),
            Expr::Const(ConstValue::Float(2.0))
        );

        let var = Expr::Var(VarId(0));
        assert_eq!(
            member(var.clone(), vec![2]),
            Expr::Member(Box::new(var), vec![2])
        );
    }

    #[test]
    fn test_store_into_temporary() {
        let mut stack = vec![
            StackEntry::var(VarId(0), Type::Int),
            StackEntry::expr(Expr::Const(ConstValue::Int(1)), Type::Int),
        ];
        let value = Expr::Const(ConstValue::Int(7));
        let span = Span::Entries { first: 1, last: 1 };
        assert!(store(&mut stack, span, value.clone(), 0).unwrap().is_empty());
        assert_eq!(stack[1].value, Value::Expr(value.clone()));

        let span = Span::Entries { first: 0, last: 0 };
        let stmts = store(&mut stack, span, value.clone(), 0).unwrap();
        assert_eq!(
            stmts,
            vec![Stmt::Assign {
                target: LValue::Var(VarId(0)),
                value
            }]
        );
    }

    #[test]
    fn test_store_into_member_of_temporary() {
        let vector = Type::Struct(StructType::vector());
        let copy = Expr::Var(VarId(0));
        let mut stack = vec![
            StackEntry::var(VarId(0), vector.clone()),
            StackEntry::expr(copy.clone(), vector),
        ];
        let value = Expr::Const(ConstValue::Float(9.0));
        let span = Span::Inner {
            entry: 1,
            start: 0,
            count: 1,
        };
        assert!(store(&mut stack, span, value.clone(), 0).unwrap().is_empty());
        assert_eq!(
            stack[1].value,
            Value::Expr(Expr::Struct(vec![
                value,
                Expr::Member(Box::new(copy.clone()), vec![1]),
                Expr::Member(Box::new(copy), vec![2]),
            ]))
        );

        let span = Span::Inner {
            entry: 0,
            start: 2,
            count: 1,
        };
        let stmts = store(&mut stack, span, Expr::Const(ConstValue::Float(1.0)), 0).unwrap();
        assert_eq!(
            stmts,
            vec![Stmt::Assign {
                target: LValue::Member(VarId(0), vec![2]),
                value: Expr::Const(ConstValue::Float(1.0)),
            }]
        );
    }
}


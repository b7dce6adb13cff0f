//! Cleanup of generated statement lists.
//!
//! The codegen pass emits a flat list with labels and jumps. Cleanup rebuilds structured
//! statements from the jump shapes the script compiler produces:
//!
//! ```text
//! if:        CondGoto(!c, Else)  then  Goto(End)  Else:  otherwise  End:
//! while:     Top:  CondGoto(!c, End)  body  Goto(Top)  End:
//! for:       init  Top:  CondGoto(!c, End)  body  Cont:  step  Goto(Top)  End:
//! do/while:  Top:  body  Cont:  CondGoto(c, Top)  End:
//! switch:    CondGoto(x == k1, C1) ... Goto(Default)  C1: body1  Goto(End)  ...  End:
//! ```
//!
//! Jumps to the enclosing loop's exit or continue label become `break`/`continue`, jumps to
//! the end of the subroutine become `return`. Whatever is left is kept as a goto, rendered
//! as a comment and reported.
//!
//! Afterwards declarations are merged with an immediately following initialization and
//! declarations of variables that are never referenced are removed.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::decompiler::script::{BinaryOp, Case, Expr, LValue, Stmt, SubScriptState, VarId};

/// Jump targets `break` and `continue` resolve to.
#[derive(Debug, Clone)]
enum Frame {
    Loop {
        exit: Option<usize>,
        next: Vec<usize>,
    },
    Switch {
        exit: usize,
    },
}

/// The cleanup pass over one subroutine body.
pub struct CleanupPass {
    prefer_switches: bool,
    returns_value: bool,
    tail: HashSet<usize>,
    residual: Vec<usize>,
}

impl CleanupPass {
    /// Creates a pass; `prefer_switches` selects `switch` over `if` chains.
    #[must_use]
    pub fn new(prefer_switches: bool) -> Self {
        CleanupPass {
            prefer_switches,
            returns_value: false,
            tail: HashSet::new(),
            residual: Vec::new(),
        }
    }

    /// Rewrites the body of `script` in place.
    ///
    /// Returns the labels of jumps that could not be structured.
    pub fn run(mut self, script: &mut SubScriptState) -> Vec<usize> {
        self.returns_value = script.ret.size() > 0;
        let body = std::mem::take(&mut script.body);

        // Labels followed by nothing mark the end of the subroutine
        for stmt in body.iter().rev() {
            match stmt {
                Stmt::Label(label) => {
                    self.tail.insert(*label);
                }
                _ => break,
            }
        }

        let mut body = self.structure(body, &[]);
        if matches!(body.last(), Some(Stmt::Return(None))) {
            body.pop();
        }

        let referenced: HashSet<usize> = self.residual.iter().copied().collect();
        drop_labels(&mut body, &referenced);
        merge_declarations(&mut body);
        let mut used = HashSet::new();
        body.iter().for_each(|s| s.visit_vars(&mut |v| {
            used.insert(v);
        }));
        remove_unused(&mut body, &used);

        if !self.residual.is_empty() {
            debug!(
                sub = script.sub.index(),
                gotos = self.residual.len(),
                "unstructured jumps left in subroutine"
            );
        }
        script.body = body;
        self.residual
    }

    fn structure(&mut self, items: Vec<Stmt>, frames: &[Frame]) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(items.len());
        let mut i = 0;
        while i < items.len() {
            match &items[i] {
                Stmt::Label(label) => {
                    let closing = items[i + 1..]
                        .iter()
                        .rposition(|s| jump_target(s) == Some(*label))
                        .map(|offset| i + 1 + offset);
                    match closing {
                        Some(j) => {
                            self.structure_loop(&items, i, j, &mut out, frames);
                            i = j + 1;
                        }
                        None => {
                            out.push(Stmt::Label(*label));
                            i += 1;
                        }
                    }
                }
                Stmt::CondGoto { cond, target } => {
                    if let Some(end) = self.structure_switch(&items, i, &mut out, frames) {
                        i = end;
                        continue;
                    }
                    match label_at(&items, *target).filter(|&t| t > i) {
                        Some(t) => {
                            i = self.structure_if(&items, i, t, &mut out, frames);
                        }
                        None => {
                            let jump = self.resolve_jump(*target, frames, &out);
                            out.push(match jump {
                                Some(stmt) => Stmt::If {
                                    cond: cond.clone(),
                                    then: vec![stmt],
                                    otherwise: Vec::new(),
                                },
                                None => {
                                    self.residual.push(*target);
                                    items[i].clone()
                                }
                            });
                            i += 1;
                        }
                    }
                }
                Stmt::Goto(target) => {
                    if matches!(items.get(i + 1), Some(Stmt::Label(next)) if next == target) {
                        i += 1;
                        continue;
                    }
                    match self.resolve_jump(*target, frames, &out) {
                        Some(Stmt::Return(None))
                            if matches!(out.last(), Some(Stmt::Return(_))) => {}
                        Some(stmt) => out.push(stmt),
                        None if self.tail.contains(target) => {}
                        None => {
                            self.residual.push(*target);
                            out.push(Stmt::Goto(*target));
                        }
                    }
                    i += 1;
                }
                other => {
                    out.push(other.clone());
                    i += 1;
                }
            }
        }
        out
    }

    /// Maps a jump out of the current statement list onto `break`, `continue` or `return`.
    fn resolve_jump(&self, target: usize, frames: &[Frame], out: &[Stmt]) -> Option<Stmt> {
        match frames.last() {
            Some(Frame::Loop { exit, .. }) if *exit == Some(target) => return Some(Stmt::Break),
            Some(Frame::Switch { exit }) if *exit == target => return Some(Stmt::Break),
            _ => {}
        }
        let continues = frames.iter().rev().find_map(|frame| match frame {
            Frame::Loop { next, .. } => Some(next.contains(&target)),
            Frame::Switch { .. } => None,
        });
        if continues == Some(true) {
            return Some(Stmt::Continue);
        }
        if self.tail.contains(&target) {
            if self.returns_value && matches!(out.last(), Some(Stmt::Return(Some(_)))) {
                return None;
            }
            if !self.returns_value {
                return Some(Stmt::Return(None));
            }
        }
        None
    }

    fn structure_if(
        &mut self,
        items: &[Stmt],
        i: usize,
        t: usize,
        out: &mut Vec<Stmt>,
        frames: &[Frame],
    ) -> usize {
        let Stmt::CondGoto { cond, .. } = &items[i] else {
            return i + 1;
        };
        let mut then: Vec<Stmt> = items[i + 1..t].to_vec();
        let mut otherwise = Vec::new();
        let mut end = t;

        if let Some(Stmt::Goto(skip)) = then.last() {
            if let Some(e) = label_at(items, *skip).filter(|&e| e > t) {
                otherwise = items[t + 1..e].to_vec();
                then.pop();
                end = e;
            }
        }

        let mut cond = cond.clone().negate();
        let mut then = self.structure(then, frames);
        let mut otherwise = self.structure(otherwise, frames);
        if then.is_empty() && !otherwise.is_empty() {
            std::mem::swap(&mut then, &mut otherwise);
            cond = cond.negate();
        }
        out.push(Stmt::If {
            cond,
            then,
            otherwise,
        });
        end
    }

    fn structure_loop(
        &mut self,
        items: &[Stmt],
        i: usize,
        j: usize,
        out: &mut Vec<Stmt>,
        frames: &[Frame],
    ) {
        let Stmt::Label(head) = items[i] else {
            return;
        };
        let exit = match items.get(j + 1) {
            Some(Stmt::Label(label)) => Some(*label),
            _ => None,
        };

        if let Stmt::CondGoto { cond, .. } = &items[j] {
            let mut body: Vec<Stmt> = items[i + 1..j].to_vec();
            let mut next = Vec::new();
            if let Some(Stmt::Label(label)) = body.last() {
                next.push(*label);
                body.pop();
            }
            let frame = Frame::Loop { exit, next };
            let body = self.structure(body, &push_frame(frames, frame));
            trace!(head, "structured do/while loop");
            out.push(Stmt::DoWhile {
                body,
                cond: cond.clone(),
            });
            return;
        }

        let (cond, mut body) = match &items[i + 1] {
            Stmt::CondGoto { cond, target } if Some(*target) == exit && i + 1 < j => {
                (cond.clone().negate(), items[i + 2..j].to_vec())
            }
            _ => (
                Expr::Const(crate::disassembler::ConstValue::Int(1)),
                items[i + 1..j].to_vec(),
            ),
        };

        // A label guarding one trailing step statement is the continue point of a for
        let mut next = vec![head];
        let mut step = None;
        if body.len() >= 2 {
            if let (Stmt::Label(label), last) = (&body[body.len() - 2], &body[body.len() - 1]) {
                if is_step(last) {
                    next.push(*label);
                    step = Some(Box::new(last.clone()));
                }
            }
        }
        if step.is_some() {
            body.truncate(body.len() - 2);
        }

        let frame = Frame::Loop { exit, next };
        let body = self.structure(body, &push_frame(frames, frame));
        match step {
            Some(step) => {
                let init = match out.last() {
                    Some(Stmt::Assign { target, .. }) if Some(target.var()) == stepped(&step) => {
                        out.pop().map(Box::new)
                    }
                    _ => None,
                };
                trace!(head, "structured for loop");
                out.push(Stmt::For {
                    init,
                    cond,
                    step: Some(step),
                    body,
                });
            }
            None => {
                trace!(head, "structured while loop");
                out.push(Stmt::While { cond, body });
            }
        }
    }

    /// Recognizes an equality ladder on one value starting at `i`.
    ///
    /// Returns the index of the exit label if a `switch` (or an `if` chain) was emitted.
    fn structure_switch(
        &mut self,
        items: &[Stmt],
        i: usize,
        out: &mut Vec<Stmt>,
        frames: &[Frame],
    ) -> Option<usize> {
        let mut scrutinee: Option<&Expr> = None;
        let mut ladder: Vec<(Expr, usize)> = Vec::new();
        let mut k = i;
        while let Some(Stmt::CondGoto {
            cond: Expr::Binary(BinaryOp::Eq, left, right),
            target,
        }) = items.get(k)
        {
            if !matches!(**right, Expr::Const(_)) || scrutinee.is_some_and(|s| s != &**left) {
                break;
            }
            scrutinee = Some(left);
            ladder.push(((**right).clone(), *target));
            k += 1;
        }
        let scrutinee = scrutinee?.clone();
        let Some(Stmt::Goto(fallback)) = items.get(k) else {
            return None;
        };

        let mut positions = Vec::with_capacity(ladder.len());
        for (_, target) in &ladder {
            positions.push(label_at(items, *target).filter(|&p| p > k)?);
        }
        let fallback_at = label_at(items, *fallback).filter(|&p| p > k)?;

        let mut end = positions.iter().copied().chain([fallback_at]).max()?;
        loop {
            let further = items[k + 1..end]
                .iter()
                .filter_map(|s| match s {
                    Stmt::Goto(target) => label_at(items, *target),
                    _ => None,
                })
                .filter(|&p| p > end)
                .max();
            match further {
                Some(p) => end = p,
                None => break,
            }
        }
        let Stmt::Label(exit) = items[end] else {
            return None;
        };

        // Arms in label order; the fallback is the default arm unless it is the exit
        let mut arms: Vec<(usize, Option<Expr>)> = ladder
            .into_iter()
            .zip(&positions)
            .map(|((value, _), &p)| (p, Some(value)))
            .collect();
        if fallback_at != end {
            arms.push((fallback_at, None));
        }
        arms.sort_by_key(|(p, value)| (*p, value.is_none()));

        let frame = Frame::Switch { exit };
        let frames = push_frame(frames, frame);
        let mut cases = Vec::with_capacity(arms.len());
        for (index, (p, value)) in arms.iter().enumerate() {
            let until = arms
                .get(index + 1)
                .map_or(end, |(next, _)| *next);
            let body = if until > *p {
                self.structure(items[p + 1..until].to_vec(), &frames)
            } else {
                Vec::new()
            };
            cases.push(Case {
                value: value.clone(),
                body,
            });
        }

        if !self.prefer_switches {
            if let Some(chain) = if_chain(&scrutinee, &cases) {
                out.push(chain);
                return Some(end);
            }
        }
        trace!(cases = cases.len(), "structured switch");
        out.push(Stmt::Switch { scrutinee, cases });
        Some(end)
    }
}

fn push_frame(frames: &[Frame], frame: Frame) -> Vec<Frame> {
    let mut frames = frames.to_vec();
    frames.push(frame);
    frames
}

fn jump_target(stmt: &Stmt) -> Option<usize> {
    match stmt {
        Stmt::Goto(target) | Stmt::CondGoto { target, .. } => Some(*target),
        _ => None,
    }
}

fn label_at(items: &[Stmt], label: usize) -> Option<usize> {
    items
        .iter()
        .position(|s| matches!(s, Stmt::Label(l) if *l == label))
}

fn is_step(stmt: &Stmt) -> bool {
    matches!(stmt, Stmt::Assign { .. } | Stmt::Expr(Expr::Step { .. }))
}

fn stepped(stmt: &Stmt) -> Option<VarId> {
    match stmt {
        Stmt::Assign { target, .. } => Some(target.var()),
        Stmt::Expr(Expr::Step { target, .. }) => Some(target.var()),
        _ => None,
    }
}

/// An `if`/`else if` chain equivalent to a switch whose arms never fall through.
fn if_chain(scrutinee: &Expr, cases: &[Case]) -> Option<Stmt> {
    let mut arms = Vec::with_capacity(cases.len());
    let mut default = None;
    for (index, case) in cases.iter().enumerate() {
        let last = index + 1 == cases.len();
        let mut body = case.body.clone();
        match body.last() {
            Some(Stmt::Break) => {
                body.pop();
            }
            Some(Stmt::Return(_)) => {}
            _ if last => {}
            _ => return None,
        }
        if contains_break(&body) {
            return None;
        }
        match &case.value {
            Some(value) => arms.push((value.clone(), body)),
            None if last => default = Some(body),
            None => return None,
        }
    }

    let mut chain = default.unwrap_or_default();
    for (value, body) in arms.into_iter().rev() {
        let cond = Expr::Binary(
            BinaryOp::Eq,
            Box::new(scrutinee.clone()),
            Box::new(value),
        );
        chain = vec![Stmt::If {
            cond,
            then: body,
            otherwise: chain,
        }];
    }
    chain.pop()
}

fn contains_break(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|stmt| match stmt {
        Stmt::Break => true,
        Stmt::If {
            then, otherwise, ..
        } => contains_break(then) || contains_break(otherwise),
        _ => false,
    })
}

/// Applies `f` to every nested statement list, innermost first.
fn for_each_block(stmts: &mut Vec<Stmt>, f: &mut impl FnMut(&mut Vec<Stmt>)) {
    for stmt in stmts.iter_mut() {
        match stmt {
            Stmt::If {
                then, otherwise, ..
            } => {
                for_each_block(then, f);
                for_each_block(otherwise, f);
            }
            Stmt::While { body, .. } | Stmt::DoWhile { body, .. } | Stmt::For { body, .. } => {
                for_each_block(body, f);
            }
            Stmt::Switch { cases, .. } => {
                for case in cases {
                    for_each_block(&mut case.body, f);
                }
            }
            _ => {}
        }
    }
    f(stmts);
}

fn drop_labels(body: &mut Vec<Stmt>, referenced: &HashSet<usize>) {
    for_each_block(body, &mut |stmts| {
        stmts.retain(|s| !matches!(s, Stmt::Label(l) if !referenced.contains(l)));
    });
}

fn merge_declarations(body: &mut Vec<Stmt>) {
    for_each_block(body, &mut |stmts| {
        let mut merged: Vec<Stmt> = Vec::with_capacity(stmts.len());
        for stmt in stmts.drain(..) {
            if let Stmt::Assign {
                target: LValue::Var(var),
                value,
            } = &stmt
            {
                let mut reads_self = false;
                value.visit_reads(&mut |read| reads_self |= read == *var);
                if let Some(Stmt::Decl { var: declared, init }) = merged.last_mut() {
                    if declared == var && init.is_none() && !reads_self {
                        *init = Some(value.clone());
                        continue;
                    }
                }
            }
            merged.push(stmt);
        }
        *stmts = merged;
    });
}

fn remove_unused(body: &mut Vec<Stmt>, used: &HashSet<VarId>) {
    for_each_block(body, &mut |stmts| {
        stmts.retain(|s| !matches!(s, Stmt::Decl { var, init: None } if !used.contains(var)));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{SubId, SubroutineKind, Type},
        decompiler::script::{UnaryOp, VarId},
        disassembler::ConstValue,
    };

    fn int(v: i32) -> Expr {
        Expr::Const(ConstValue::Int(v))
    }

    fn var(n: usize) -> Expr {
        Expr::Var(VarId(n))
    }

    fn run(body: Vec<Stmt>, prefer_switches: bool) -> (Vec<Stmt>, Vec<usize>) {
        let mut script = SubScriptState::new(SubId(1), SubroutineKind::Normal, vec![], Type::Void);
        script.body = body;
        let residual = CleanupPass::new(prefer_switches).run(&mut script);
        (script.body, residual)
    }

    fn call(name: &str) -> Stmt {
        Stmt::Expr(Expr::Action {
            name: name.into(),
            args: vec![var(0)],
        })
    }

    #[test]
    fn test_if_else() {
        let body = vec![
            Stmt::CondGoto {
                cond: var(0).negate(),
                target: 20,
            },
            call("A"),
            Stmt::Goto(30),
            Stmt::Label(20),
            call("B"),
            Stmt::Label(30),
            call("C"),
        ];
        let (body, residual) = run(body, true);
        assert!(residual.is_empty());
        assert_eq!(
            body,
            vec![
                Stmt::If {
                    cond: var(0),
                    then: vec![call("A")],
                    otherwise: vec![call("B")],
                },
                call("C"),
            ]
        );
    }

    #[test]
    fn test_while_with_break() {
        let body = vec![
            Stmt::Label(10),
            Stmt::CondGoto {
                cond: var(0).negate(),
                target: 50,
            },
            Stmt::CondGoto {
                cond: var(1).negate(),
                target: 30,
            },
            Stmt::Goto(50),
            Stmt::Label(30),
            call("A"),
            Stmt::Goto(10),
            Stmt::Label(50),
            call("B"),
        ];
        let (body, residual) = run(body, true);
        assert!(residual.is_empty());
        assert_eq!(
            body,
            vec![
                Stmt::While {
                    cond: var(0),
                    body: vec![
                        Stmt::If {
                            cond: var(1),
                            then: vec![Stmt::Break],
                            otherwise: vec![],
                        },
                        call("A"),
                    ],
                },
                call("B"),
            ]
        );
    }

    #[test]
    fn test_for_loop() {
        let i = LValue::Var(VarId(0));
        let lt = Expr::Binary(BinaryOp::Lt, Box::new(var(0)), Box::new(int(10)));
        let step = Stmt::Expr(Expr::Step {
            target: i.clone(),
            increment: true,
            postfix: true,
        });
        let body = vec![
            Stmt::Decl {
                var: VarId(0),
                init: None,
            },
            Stmt::Assign {
                target: i.clone(),
                value: int(0),
            },
            Stmt::Label(10),
            Stmt::CondGoto {
                cond: lt.clone().negate(),
                target: 60,
            },
            Stmt::CondGoto {
                cond: var(1),
                target: 40,
            },
            call("A"),
            Stmt::Label(40),
            step.clone(),
            Stmt::Goto(10),
            Stmt::Label(60),
        ];
        let (body, residual) = run(body, true);
        assert!(residual.is_empty());
        assert_eq!(
            body,
            vec![
                Stmt::Decl {
                    var: VarId(0),
                    init: None
                },
                Stmt::For {
                    init: Some(Box::new(Stmt::Assign {
                        target: i,
                        value: int(0)
                    })),
                    cond: lt,
                    step: Some(Box::new(step)),
                    body: vec![
                        Stmt::If {
                            cond: var(1),
                            then: vec![Stmt::Continue],
                            otherwise: vec![],
                        },
                        call("A"),
                    ],
                },
            ]
        );
    }

    #[test]
    fn test_do_while() {
        let body = vec![
            Stmt::Label(10),
            call("A"),
            Stmt::CondGoto {
                cond: var(0),
                target: 10,
            },
        ];
        let (body, _) = run(body, true);
        assert_eq!(
            body,
            vec![Stmt::DoWhile {
                body: vec![call("A")],
                cond: var(0),
            }]
        );
    }

    fn ladder() -> Vec<Stmt> {
        let eq = |v| Expr::Binary(BinaryOp::Eq, Box::new(var(0)), Box::new(int(v)));
        vec![
            Stmt::CondGoto {
                cond: eq(1),
                target: 100,
            },
            Stmt::CondGoto {
                cond: eq(2),
                target: 200,
            },
            Stmt::Goto(300),
            Stmt::Label(100),
            call("A"),
            Stmt::Goto(400),
            Stmt::Label(200),
            call("B"),
            Stmt::Goto(400),
            Stmt::Label(300),
            call("C"),
            Stmt::Label(400),
            call("D"),
        ]
    }

    #[test]
    fn test_switch() {
        let (body, residual) = run(ladder(), true);
        assert!(residual.is_empty());
        assert_eq!(
            body,
            vec![
                Stmt::Switch {
                    scrutinee: var(0),
                    cases: vec![
                        Case {
                            value: Some(int(1)),
                            body: vec![call("A"), Stmt::Break],
                        },
                        Case {
                            value: Some(int(2)),
                            body: vec![call("B"), Stmt::Break],
                        },
                        Case {
                            value: None,
                            body: vec![call("C")],
                        },
                    ],
                },
                call("D"),
            ]
        );
    }

    #[test]
    fn test_switch_as_if_chain() {
        let (body, _) = run(ladder(), false);
        let Stmt::If {
            then, otherwise, ..
        } = &body[0]
        else {
            panic!("expected an if chain, got {:?}", body[0]);
        };
        assert_eq!(then, &vec![call("A")]);
        assert!(matches!(&otherwise[0], Stmt::If { otherwise, .. } if otherwise == &vec![call("C")]));
    }

    #[test]
    fn test_residual_goto() {
        let body = vec![
            call("A"),
            Stmt::Label(10),
            call("B"),
            Stmt::CondGoto {
                cond: Expr::Unary(UnaryOp::Not, Box::new(var(0))),
                target: 99,
            },
            Stmt::Goto(10),
            call("C"),
        ];
        let (_, residual) = run(body, true);
        assert_eq!(residual, vec![99]);
    }

    #[test]
    fn test_declarations() {
        let body = vec![
            Stmt::Decl {
                var: VarId(0),
                init: None,
            },
            Stmt::Assign {
                target: LValue::Var(VarId(0)),
                value: int(5),
            },
            Stmt::Decl {
                var: VarId(1),
                init: None,
            },
            Stmt::Return(None),
        ];
        let (body, _) = run(body, true);
        assert_eq!(
            body,
            vec![Stmt::Decl {
                var: VarId(0),
                init: Some(int(5)),
            }]
        );
    }

    #[test]
    fn test_declaration_not_merged_with_self_read() {
        let update = Expr::Struct(vec![
            Expr::Const(ConstValue::Float(9.0)),
            Expr::Member(Box::new(var(0)), vec![1]),
            Expr::Member(Box::new(var(0)), vec![2]),
        ]);
        let body = vec![
            Stmt::Decl {
                var: VarId(0),
                init: None,
            },
            Stmt::Assign {
                target: LValue::Var(VarId(0)),
                value: update.clone(),
            },
        ];
        let (body, _) = run(body, true);
        assert_eq!(
            body,
            vec![
                Stmt::Decl {
                    var: VarId(0),
                    init: None,
                },
                Stmt::Assign {
                    target: LValue::Var(VarId(0)),
                    value: update,
                },
            ]
        );
    }
}

//! Script model produced by the codegen pass.
//!
//! Statements and expressions reference variables through [`VarId`] indices into one
//! [`VarTable`] per file; names are only assigned when the script is rendered, so renaming
//! never touches the model.

use crate::{
    analysis::{SubId, SubroutineKind, Type},
    disassembler::{ConstValue, Opcode},
};

/// Index of a variable in the [`VarTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) usize);

impl VarId {
    /// Index into the variable table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Storage class of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    /// Parameter, by position in the declaration
    Param(usize),
    /// Local of a subroutine
    Local,
    /// Base-pointer addressed global
    Global,
}

/// One variable of the script.
#[derive(Debug, Clone, PartialEq)]
pub struct VarInfo {
    /// Declared type
    pub ty: Type,
    /// Storage class
    pub kind: VarKind,
    /// Subroutine that owns the variable (the globals initializer for globals)
    pub owner: SubId,
}

/// Every variable of one script.
#[derive(Debug, Clone, Default)]
pub struct VarTable {
    vars: Vec<VarInfo>,
}

impl VarTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable.
    pub fn add(&mut self, ty: Type, kind: VarKind, owner: SubId) -> VarId {
        self.vars.push(VarInfo { ty, kind, owner });
        VarId(self.vars.len() - 1)
    }

    /// The variable `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not created by this table.
    #[must_use]
    pub fn get(&self, id: VarId) -> &VarInfo {
        &self.vars[id.0]
    }

    /// Iterates over all variables with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (VarId, &VarInfo)> {
        self.vars.iter().enumerate().map(|(i, v)| (VarId(i), v))
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns `true` if the table holds no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `!`
    Not,
    /// `~`
    Comp,
}

impl UnaryOp {
    /// Source token.
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::Comp => "~",
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinaryOp {
    LogAnd,
    LogOr,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    Ne,
    Ge,
    Gt,
    Lt,
    Le,
    Shl,
    Shr,
    UShr,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    /// The operator of a binary opcode.
    #[must_use]
    pub fn from_opcode(opcode: Opcode) -> Option<BinaryOp> {
        Some(match opcode {
            Opcode::LogAndII => BinaryOp::LogAnd,
            Opcode::LogOrII => BinaryOp::LogOr,
            Opcode::IncOrII => BinaryOp::BitOr,
            Opcode::ExcOrII => BinaryOp::BitXor,
            Opcode::BoolAndII => BinaryOp::BitAnd,
            Opcode::Equal => BinaryOp::Eq,
            Opcode::NEqual => BinaryOp::Ne,
            Opcode::Geq => BinaryOp::Ge,
            Opcode::Gt => BinaryOp::Gt,
            Opcode::Lt => BinaryOp::Lt,
            Opcode::Leq => BinaryOp::Le,
            Opcode::ShLeft => BinaryOp::Shl,
            Opcode::ShRight => BinaryOp::Shr,
            Opcode::UShRight => BinaryOp::UShr,
            Opcode::Add => BinaryOp::Add,
            Opcode::Sub => BinaryOp::Sub,
            Opcode::Mul => BinaryOp::Mul,
            Opcode::Div => BinaryOp::Div,
            Opcode::Mod => BinaryOp::Mod,
            _ => return None,
        })
    }

    /// Source token.
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            BinaryOp::LogAnd => "&&",
            BinaryOp::LogOr => "||",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAnd => "&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Ge => ">=",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::UShr => ">>>",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }

    fn inverse(self) -> Option<BinaryOp> {
        Some(match self {
            BinaryOp::Eq => BinaryOp::Ne,
            BinaryOp::Ne => BinaryOp::Eq,
            BinaryOp::Lt => BinaryOp::Ge,
            BinaryOp::Ge => BinaryOp::Lt,
            BinaryOp::Gt => BinaryOp::Le,
            BinaryOp::Le => BinaryOp::Gt,
            _ => return None,
        })
    }
}

/// An assignable location.
#[derive(Debug, Clone, PartialEq)]
pub enum LValue {
    /// A whole variable
    Var(VarId),
    /// A member of a structure variable, by member index path
    Member(VarId, Vec<usize>),
}

impl LValue {
    /// The variable written to.
    #[must_use]
    pub fn var(&self) -> VarId {
        match self {
            LValue::Var(var) | LValue::Member(var, _) => *var,
        }
    }
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal constant
    Const(ConstValue),
    /// Variable read
    Var(VarId),
    /// Member of a structure value, by member index path
    Member(Box<Expr>, Vec<usize>),
    /// Structure built from consecutive values, `[x, y, z]` for vectors
    Struct(Vec<Expr>),
    /// Unary operation
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Engine action call
    Action {
        /// Action name
        name: String,
        /// Arguments in declaration order
        args: Vec<Expr>,
    },
    /// Subroutine call
    Call {
        /// The callee
        sub: SubId,
        /// Arguments in declaration order
        args: Vec<Expr>,
    },
    /// Deferred statements passed as an `action` argument
    Deferred(Vec<Stmt>),
    /// `++`/`--` applied to a location
    Step {
        /// The location
        target: LValue,
        /// `true` for `++`
        increment: bool,
        /// `true` for `x++`, the value read before the update
        postfix: bool,
    },
}

impl Expr {
    /// Logical negation, folding double negation and inverting comparisons.
    #[must_use]
    pub fn negate(self) -> Expr {
        match self {
            Expr::Unary(UnaryOp::Not, inner) => *inner,
            Expr::Binary(op, left, right) => match op.inverse() {
                Some(inverse) => Expr::Binary(inverse, left, right),
                None => Expr::Unary(UnaryOp::Not, Box::new(Expr::Binary(op, left, right))),
            },
            other => Expr::Unary(UnaryOp::Not, Box::new(other)),
        }
    }

    /// Returns `true` if evaluating the expression changes program state.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        match self {
            Expr::Const(_) | Expr::Var(_) => false,
            Expr::Action { .. } | Expr::Call { .. } | Expr::Step { .. } | Expr::Deferred(_) => {
                true
            }
            Expr::Member(inner, _) | Expr::Unary(_, inner) => inner.has_side_effects(),
            Expr::Struct(members) => members.iter().any(Expr::has_side_effects),
            Expr::Binary(_, left, right) => left.has_side_effects() || right.has_side_effects(),
        }
    }

    /// Calls `f` on every variable read by this expression.
    pub fn visit_reads(&self, f: &mut impl FnMut(VarId)) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(var) => f(*var),
            Expr::Member(inner, _) | Expr::Unary(_, inner) => inner.visit_reads(f),
            Expr::Struct(items) | Expr::Action { args: items, .. } | Expr::Call { args: items, .. } => {
                items.iter().for_each(|e| e.visit_reads(f));
            }
            Expr::Binary(_, left, right) => {
                left.visit_reads(f);
                right.visit_reads(f);
            }
            Expr::Deferred(body) => body.iter().for_each(|s| s.visit_vars(f)),
            Expr::Step { target, .. } => f(target.var()),
        }
    }
}

/// One arm of a `switch`.
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    /// Case value, `None` for `default`
    pub value: Option<Expr>,
    /// Statements up to the next arm
    pub body: Vec<Stmt>,
}

/// A statement.
///
/// `Label`, `Goto` and `CondGoto` are produced by the codegen pass and removed by cleanup
/// wherever the jump pattern maps onto a structured statement. Labels are identified by
/// the byte offset of the instruction they mark.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Variable declaration
    Decl {
        /// The variable
        var: VarId,
        /// Initializer
        init: Option<Expr>,
    },
    /// Assignment
    Assign {
        /// Location written
        target: LValue,
        /// Value
        value: Expr,
    },
    /// Expression evaluated for its side effects
    Expr(Expr),
    /// `return`
    Return(Option<Expr>),
    /// `if`/`else`
    If {
        /// Condition
        cond: Expr,
        /// Taken branch
        then: Vec<Stmt>,
        /// Else branch
        otherwise: Vec<Stmt>,
    },
    /// `while`
    While {
        /// Condition, checked before each iteration
        cond: Expr,
        /// Loop body
        body: Vec<Stmt>,
    },
    /// `do`/`while`
    DoWhile {
        /// Loop body
        body: Vec<Stmt>,
        /// Condition, checked after each iteration
        cond: Expr,
    },
    /// `for`
    For {
        /// Initializer
        init: Option<Box<Stmt>>,
        /// Condition
        cond: Expr,
        /// Step statement
        step: Option<Box<Stmt>>,
        /// Loop body
        body: Vec<Stmt>,
    },
    /// `switch`
    Switch {
        /// Value compared against every case
        scrutinee: Expr,
        /// Arms in source order
        cases: Vec<Case>,
    },
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// Jump target
    Label(usize),
    /// Unconditional jump
    Goto(usize),
    /// Jump taken when `cond` holds
    CondGoto {
        /// Condition
        cond: Expr,
        /// Target label
        target: usize,
    },
    /// Free text
    Comment(String),
}

impl Stmt {
    /// Calls `f` on every variable this statement reads or writes.
    pub fn visit_vars(&self, f: &mut impl FnMut(VarId)) {
        match self {
            Stmt::Decl { init, .. } => {
                if let Some(init) = init {
                    init.visit_reads(f);
                }
            }
            Stmt::Assign { target, value } => {
                f(target.var());
                value.visit_reads(f);
            }
            Stmt::Expr(expr) | Stmt::CondGoto { cond: expr, .. } => expr.visit_reads(f),
            Stmt::Return(value) => {
                if let Some(value) = value {
                    value.visit_reads(f);
                }
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                cond.visit_reads(f);
                then.iter().chain(otherwise).for_each(|s| s.visit_vars(f));
            }
            Stmt::While { cond, body } | Stmt::DoWhile { body, cond } => {
                cond.visit_reads(f);
                body.iter().for_each(|s| s.visit_vars(f));
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                cond.visit_reads(f);
                init.iter().chain(step).for_each(|s| s.visit_vars(f));
                body.iter().for_each(|s| s.visit_vars(f));
            }
            Stmt::Switch { scrutinee, cases } => {
                scrutinee.visit_reads(f);
                for case in cases {
                    case.body.iter().for_each(|s| s.visit_vars(f));
                }
            }
            Stmt::Break
            | Stmt::Continue
            | Stmt::Label(_)
            | Stmt::Goto(_)
            | Stmt::Comment(_) => {}
        }
    }

    /// Returns `true` if control never continues past this statement.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Stmt::Return(_) | Stmt::Break | Stmt::Continue | Stmt::Goto(_)
        )
    }
}

/// The reconstructed body of one subroutine.
#[derive(Debug, Clone)]
pub struct SubScriptState {
    /// The subroutine
    pub sub: SubId,
    /// Its role
    pub kind: SubroutineKind,
    /// Parameters in declaration order
    pub params: Vec<VarId>,
    /// Return type
    pub ret: Type,
    /// Statements
    pub body: Vec<Stmt>,
    /// Why the body could not be reconstructed
    pub failure: Option<String>,
}

impl SubScriptState {
    /// Creates an empty body.
    #[must_use]
    pub fn new(sub: SubId, kind: SubroutineKind, params: Vec<VarId>, ret: Type) -> Self {
        SubScriptState {
            sub,
            kind,
            params,
            ret,
            body: Vec::new(),
            failure: None,
        }
    }

    /// Returns `true` if the body was reconstructed.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }
}

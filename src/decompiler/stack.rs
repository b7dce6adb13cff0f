//! Value stack of the codegen pass.

use crate::{
    analysis::{stack::Slotted, Type},
    decompiler::script::{Expr, VarId},
};

/// What a stack entry holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The storage of a variable
    Var(VarId),
    /// A computed value
    Expr(Expr),
    /// The base pointer saved by `SAVEBP`
    Hidden,
}

/// One entry of the value stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StackEntry {
    /// Type of the value
    pub ty: Type,
    /// The value
    pub value: Value,
    /// Set on values that were duplicated for comparison, such as a `switch` operand, and
    /// on values already returned. Popping them emits nothing.
    pub silent: bool,
}

impl StackEntry {
    /// A variable's storage.
    #[must_use]
    pub fn var(var: VarId, ty: Type) -> Self {
        StackEntry {
            ty,
            value: Value::Var(var),
            silent: false,
        }
    }

    /// A computed value.
    #[must_use]
    pub fn expr(expr: Expr, ty: Type) -> Self {
        StackEntry {
            ty,
            value: Value::Expr(expr),
            silent: false,
        }
    }

    /// The saved base pointer.
    #[must_use]
    pub fn hidden() -> Self {
        StackEntry {
            ty: Type::Int,
            value: Value::Hidden,
            silent: false,
        }
    }

    /// The expression reading this entry, `None` for the saved base pointer.
    #[must_use]
    pub fn read(&self) -> Option<Expr> {
        match &self.value {
            Value::Var(var) => Some(Expr::Var(*var)),
            Value::Expr(expr) => Some(expr.clone()),
            Value::Hidden => None,
        }
    }
}

impl Slotted for StackEntry {
    fn slots(&self) -> usize {
        self.ty.size()
    }
}

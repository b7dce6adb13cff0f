//! Source text generation.
//!
//! Names are not part of the script model. [`Names`] assigns them once per decompilation
//! from the variable table and the subroutine bodies, [`Renderer`] prints the model with
//! those names. Rendering the same model with the same names always yields the same text.

use std::{collections::HashMap, fmt::Write};

use crate::{
    analysis::{StructType, SubId, SubroutineKind, Type},
    decompiler::script::{
        Case, Expr, LValue, Stmt, SubScriptState, VarId, VarKind, VarTable,
    },
    disassembler::ConstValue,
};

const INDENT: &str = "    ";

/// Hungarian prefix of a variable name for a type.
#[must_use]
pub fn type_prefix(ty: &Type) -> &'static str {
    match ty {
        Type::Int | Type::Unresolved | Type::Void | Type::Action => "n",
        Type::Float => "f",
        Type::String => "s",
        Type::Object => "o",
        Type::Effect => "e",
        Type::Event => "ev",
        Type::Location => "l",
        Type::Talent => "t",
        Type::Vector => "v",
        Type::Struct(s) if s.is_vector() => "v",
        Type::Struct(_) => "st",
    }
}

/// Names of subroutines and variables.
#[derive(Debug, Clone, Default)]
pub struct Names {
    subs: HashMap<SubId, String>,
    vars: Vec<String>,
}

impl Names {
    /// Assigns default names.
    ///
    /// Subroutines are `sub1..n` in file order, `main` (or `StartingConditional` when it
    /// returns `int`) for the entry point. Parameters are numbered by position, locals per
    /// subroutine in declaration order and globals in declaration order.
    #[must_use]
    pub fn assign(vars: &VarTable, scripts: &[SubScriptState]) -> Self {
        let mut subs = HashMap::new();
        let mut counter = 0;
        for script in scripts {
            let name = match script.kind {
                SubroutineKind::Main if script.ret == Type::Int => "StartingConditional".into(),
                SubroutineKind::Main => "main".into(),
                SubroutineKind::Normal => {
                    counter += 1;
                    format!("sub{counter}")
                }
                SubroutineKind::Entry | SubroutineKind::Globals => continue,
            };
            subs.insert(script.sub, name);
        }

        let mut names: Vec<Option<String>> = vec![None; vars.len()];
        let mut globals = 0;
        let ordered = scripts
            .iter()
            .filter(|s| s.kind == SubroutineKind::Globals)
            .chain(scripts.iter().filter(|s| s.kind != SubroutineKind::Globals));
        for script in ordered {
            let mut locals = 0;
            let mut order = declared_order(&script.body);
            // Variables used without a surviving declaration are named after the declared ones
            for stmt in &script.body {
                stmt.visit_vars(&mut |var| order.push(var));
            }
            for var in order {
                if names[var.index()].is_some() {
                    continue;
                }
                let info = vars.get(var);
                let prefix = type_prefix(&info.ty);
                names[var.index()] = Some(match info.kind {
                    VarKind::Param(index) => format!("{prefix}Param{}", index + 1),
                    VarKind::Global => {
                        globals += 1;
                        format!("{prefix}Global{globals}")
                    }
                    VarKind::Local => {
                        locals += 1;
                        format!("{prefix}Var{locals}")
                    }
                });
            }
            for &param in &script.params {
                if names[param.index()].is_none() {
                    let info = vars.get(param);
                    if let VarKind::Param(index) = info.kind {
                        names[param.index()] =
                            Some(format!("{}Param{}", type_prefix(&info.ty), index + 1));
                    }
                }
            }
        }

        let vars = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| name.unwrap_or_else(|| format!("var{index}")))
            .collect();
        Names { subs, vars }
    }

    /// Name of a subroutine.
    #[must_use]
    pub fn sub(&self, sub: SubId) -> Option<&str> {
        self.subs.get(&sub).map(String::as_str)
    }

    /// The subroutine carrying `name`.
    #[must_use]
    pub fn find_sub(&self, name: &str) -> Option<SubId> {
        self.subs
            .iter()
            .find_map(|(sub, n)| (n == name).then_some(*sub))
    }

    /// Renames a subroutine.
    pub fn set_sub(&mut self, sub: SubId, name: String) {
        self.subs.insert(sub, name);
    }

    /// Name of a variable.
    #[must_use]
    pub fn var(&self, var: VarId) -> &str {
        self.vars.get(var.index()).map_or("", String::as_str)
    }
}

/// Variables in the order of their declarations, nested blocks included.
pub(crate) fn declared_order(body: &[Stmt]) -> Vec<VarId> {
    let mut order = Vec::new();
    body.iter().for_each(|s| declared(s, &mut order));
    order
}

fn declared(stmt: &Stmt, order: &mut Vec<VarId>) {
    match stmt {
        Stmt::Decl { var, .. } => order.push(*var),
        Stmt::If {
            then, otherwise, ..
        } => then.iter().chain(otherwise).for_each(|s| declared(s, order)),
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } | Stmt::For { body, .. } => {
            body.iter().for_each(|s| declared(s, order));
        }
        Stmt::Switch { cases, .. } => cases
            .iter()
            .flat_map(|c| &c.body)
            .for_each(|s| declared(s, order)),
        _ => {}
    }
}

/// Every distinct non-vector structure reachable from `types`, inner structures first.
#[must_use]
pub fn collect_structs<'t>(types: impl IntoIterator<Item = &'t Type>) -> Vec<StructType> {
    fn visit(ty: &Type, out: &mut Vec<StructType>) {
        if let Type::Struct(s) = ty {
            if s.is_vector() {
                return;
            }
            s.members.iter().for_each(|m| visit(m, out));
            if !out.contains(s) {
                out.push(s.clone());
            }
        }
    }
    let mut out = Vec::new();
    types.into_iter().for_each(|ty| visit(ty, &mut out));
    out
}

/// Prints a script.
pub struct Renderer<'a> {
    vars: &'a VarTable,
    names: &'a Names,
    structs: &'a [StructType],
    rets: HashMap<SubId, &'a Type>,
    out: String,
}

impl<'a> Renderer<'a> {
    /// Creates a renderer over `scripts`.
    #[must_use]
    pub fn new(
        vars: &'a VarTable,
        names: &'a Names,
        structs: &'a [StructType],
        scripts: &'a [SubScriptState],
    ) -> Self {
        Renderer {
            vars,
            names,
            structs,
            rets: scripts.iter().map(|s| (s.sub, &s.ret)).collect(),
            out: String::new(),
        }
    }

    /// Renders the whole file.
    ///
    /// Output order is structure declarations, globals, prototypes, subroutine bodies in
    /// file order and `main` last.
    #[must_use]
    pub fn render(mut self, scripts: &[SubScriptState]) -> String {
        for (index, s) in self.structs.iter().enumerate() {
            let _ = writeln!(self.out, "struct structtype{} {{", index + 1);
            for (field, member) in s.members.iter().enumerate() {
                let ty = self.type_name(member);
                let _ = writeln!(self.out, "{INDENT}{ty} field{};", field + 1);
            }
            let _ = writeln!(self.out, "}};\n");
        }

        for script in scripts.iter().filter(|s| s.kind == SubroutineKind::Globals) {
            self.block(&script.body, 0);
            if !script.body.is_empty() {
                self.out.push('\n');
            }
        }

        let bodies: Vec<&SubScriptState> = scripts
            .iter()
            .filter(|s| s.kind == SubroutineKind::Normal)
            .collect();
        for script in &bodies {
            let header = self.header(script);
            match script.failure {
                Some(_) => {
                    let _ = writeln!(self.out, "// {header};");
                }
                None => {
                    let _ = writeln!(self.out, "{header};");
                }
            }
        }
        if !bodies.is_empty() {
            self.out.push('\n');
        }

        let main = scripts.iter().filter(|s| s.kind == SubroutineKind::Main);
        for script in bodies.into_iter().chain(main) {
            self.subroutine(script);
        }
        self.out
    }

    fn header(&self, script: &SubScriptState) -> String {
        let name = self.names.sub(script.sub).unwrap_or("sub");
        let params: Vec<String> = script
            .params
            .iter()
            .map(|&p| format!("{} {}", self.type_name(&self.vars.get(p).ty), self.names.var(p)))
            .collect();
        format!("{} {}({})", self.type_name(&script.ret), name, params.join(", "))
    }

    fn subroutine(&mut self, script: &SubScriptState) {
        let header = self.header(script);
        if let Some(failure) = &script.failure {
            let _ = writeln!(self.out, "// {header}");
            let _ = writeln!(self.out, "// could not be decompiled: {failure}\n");
            return;
        }
        let _ = writeln!(self.out, "{header} {{");
        self.block(&script.body, 1);
        let _ = writeln!(self.out, "}}\n");
    }

    fn type_name(&self, ty: &Type) -> String {
        match ty {
            Type::Struct(s) if !s.is_vector() => match self.structs.iter().position(|t| t == s) {
                Some(index) => format!("struct structtype{}", index + 1),
                None => ty.to_string(),
            },
            _ => ty.to_string(),
        }
    }

    fn line(&mut self, depth: usize, text: &str) {
        for _ in 0..depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn block(&mut self, stmts: &[Stmt], depth: usize) {
        for stmt in stmts {
            self.stmt(stmt, depth);
        }
    }

    fn stmt(&mut self, stmt: &Stmt, depth: usize) {
        match stmt {
            Stmt::Decl { var, init } => {
                let ty = self.type_name(&self.vars.get(*var).ty);
                let name = self.names.var(*var);
                let text = match init {
                    Some(init) => format!("{ty} {name} = {};", self.expr(init)),
                    None => format!("{ty} {name};"),
                };
                self.line(depth, &text);
            }
            Stmt::Assign { .. } | Stmt::Expr(_) => {
                let text = format!("{};", self.simple(stmt));
                self.line(depth, &text);
            }
            Stmt::Return(None) => self.line(depth, "return;"),
            Stmt::Return(Some(value)) => {
                let text = format!("return {};", self.expr(value));
                self.line(depth, &text);
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let text = format!("if ({}) {{", self.expr(cond));
                self.line(depth, &text);
                self.block(then, depth + 1);
                let mut otherwise = otherwise;
                loop {
                    match otherwise.as_slice() {
                        [] => break,
                        [Stmt::If {
                            cond,
                            then,
                            otherwise: rest,
                        }] => {
                            let text = format!("}} else if ({}) {{", self.expr(cond));
                            self.line(depth, &text);
                            self.block(then, depth + 1);
                            otherwise = rest;
                        }
                        stmts => {
                            self.line(depth, "} else {");
                            self.block(stmts, depth + 1);
                            break;
                        }
                    }
                }
                self.line(depth, "}");
            }
            Stmt::While { cond, body } => {
                let text = format!("while ({}) {{", self.expr(cond));
                self.line(depth, &text);
                self.block(body, depth + 1);
                self.line(depth, "}");
            }
            Stmt::DoWhile { body, cond } => {
                self.line(depth, "do {");
                self.block(body, depth + 1);
                let text = format!("}} while ({});", self.expr(cond));
                self.line(depth, &text);
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                let init = init.as_deref().map(|s| self.simple(s)).unwrap_or_default();
                let step = step.as_deref().map(|s| self.simple(s)).unwrap_or_default();
                let text = format!("for ({init}; {}; {step}) {{", self.expr(cond));
                self.line(depth, &text);
                self.block(body, depth + 1);
                self.line(depth, "}");
            }
            Stmt::Switch { scrutinee, cases } => {
                let text = format!("switch ({}) {{", self.expr(scrutinee));
                self.line(depth, &text);
                for Case { value, body } in cases {
                    let label = match value {
                        Some(value) => format!("case {}:", self.expr(value)),
                        None => "default:".to_string(),
                    };
                    self.line(depth + 1, &label);
                    self.block(body, depth + 2);
                }
                self.line(depth, "}");
            }
            Stmt::Break => self.line(depth, "break;"),
            Stmt::Continue => self.line(depth, "continue;"),
            Stmt::Label(label) => {
                let text = format!("// 0x{label:X}:");
                self.line(depth, &text);
            }
            Stmt::Goto(target) => {
                let text = format!("// goto 0x{target:X};");
                self.line(depth, &text);
            }
            Stmt::CondGoto { cond, target } => {
                let text = format!("// if ({}) goto 0x{target:X};", self.expr(cond));
                self.line(depth, &text);
            }
            Stmt::Comment(text) => {
                let text = format!("// {text}");
                self.line(depth, &text);
            }
        }
    }

    /// A statement without the trailing semicolon, as used in `for` headers.
    fn simple(&self, stmt: &Stmt) -> String {
        match stmt {
            Stmt::Assign { target, value } => {
                format!("{} = {}", self.lvalue(target), self.expr(value))
            }
            Stmt::Expr(Expr::Step {
                target, increment, ..
            }) => {
                format!("{}{}", self.lvalue(target), if *increment { "++" } else { "--" })
            }
            Stmt::Expr(expr) => self.expr(expr),
            Stmt::Decl { var, init: Some(init) } => {
                format!("{} = {}", self.names.var(*var), self.expr(init))
            }
            _ => String::new(),
        }
    }

    fn lvalue(&self, target: &LValue) -> String {
        match target {
            LValue::Var(var) => self.names.var(*var).to_string(),
            LValue::Member(var, path) => {
                let ty = Some(self.vars.get(*var).ty.clone());
                format!("{}{}", self.names.var(*var), member_suffix(ty, path))
            }
        }
    }

    /// The type of an expression where it can be told without the action table.
    fn type_of(&self, expr: &Expr) -> Option<Type> {
        match expr {
            Expr::Var(var) => Some(self.vars.get(*var).ty.clone()),
            Expr::Call { sub, .. } => self.rets.get(sub).map(|t| (*t).clone()),
            Expr::Member(base, path) => {
                let mut ty = self.type_of(base)?;
                for &index in path {
                    ty = match ty {
                        Type::Struct(s) => s.members.get(index)?.clone(),
                        _ => return None,
                    };
                }
                Some(ty)
            }
            _ => None,
        }
    }

    fn operand(&self, expr: &Expr) -> String {
        match expr {
            Expr::Binary(..) => format!("({})", self.expr(expr)),
            _ => self.expr(expr),
        }
    }

    fn args(&self, args: &[Expr]) -> String {
        args.iter()
            .map(|a| self.expr(a))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn expr(&self, expr: &Expr) -> String {
        match expr {
            Expr::Const(value) => constant(value),
            Expr::Var(var) => self.names.var(*var).to_string(),
            Expr::Member(base, path) => {
                format!("{}{}", self.operand(base), member_suffix(self.type_of(base), path))
            }
            Expr::Struct(items) => format!("[{}]", self.args(items)),
            Expr::Unary(op, inner) => format!("{}{}", op.token(), self.operand(inner)),
            Expr::Binary(op, left, right) => {
                format!("{} {} {}", self.operand(left), op.token(), self.operand(right))
            }
            Expr::Action { name, args } => format!("{name}({})", self.args(args)),
            Expr::Call { sub, args } => {
                let name = self.names.sub(*sub).unwrap_or("sub");
                format!("{name}({})", self.args(args))
            }
            Expr::Deferred(body) => match body.as_slice() {
                [Stmt::Expr(inner)] => self.expr(inner),
                stmts => {
                    let inner: Vec<String> = stmts
                        .iter()
                        .map(|s| format!("{};", self.simple(s)))
                        .collect();
                    format!("{{ {} }}", inner.join(" "))
                }
            },
            Expr::Step {
                target,
                increment,
                postfix,
            } => {
                let token = if *increment { "++" } else { "--" };
                let target = self.lvalue(target);
                if *postfix {
                    format!("{target}{token}")
                } else {
                    format!("{token}{target}")
                }
            }
        }
    }
}

/// `.x`/`.y`/`.z` for vectors and `.field<n>` for structures.
///
/// Values of unknown type are engine results, whose only multi-slot type is the vector.
fn member_suffix(ty: Option<Type>, path: &[usize]) -> String {
    let mut out = String::new();
    let mut ty = ty;
    for &index in path {
        let vector = match &ty {
            Some(Type::Struct(s)) => s.is_vector(),
            Some(Type::Vector) | None => true,
            Some(_) => false,
        };
        if vector && index < 3 {
            out.push_str([".x", ".y", ".z"][index]);
            ty = Some(Type::Float);
        } else {
            let _ = write!(out, ".field{}", index + 1);
            ty = match ty {
                Some(Type::Struct(s)) => s.members.get(index).cloned(),
                _ => None,
            };
        }
    }
    out
}

fn constant(value: &ConstValue) -> String {
    match value {
        ConstValue::Int(v) => v.to_string(),
        ConstValue::Float(v) => {
            let text = v.to_string();
            if text.contains(['.', 'e', 'E', 'N', 'i']) {
                text
            } else {
                format!("{text}.0")
            }
        }
        ConstValue::String(s) => {
            let mut out = String::with_capacity(s.len() + 2);
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    c => out.push(c),
                }
            }
            out.push('"');
            out
        }
        ConstValue::Object(0) => "OBJECT_SELF".to_string(),
        ConstValue::Object(1) => "OBJECT_INVALID".to_string(),
        ConstValue::Object(v) => v.to_string(),
    }
}

/// Returns `true` if `name` is a valid script identifier.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

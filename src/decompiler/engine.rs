//! The decompilation pipeline and its result.

use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    analysis::{Analysis, StructType, SubId, SubroutineKind, Type},
    decompiler::{
        cleanup::CleanupPass,
        mainpass::MainPass,
        render::{collect_structs, declared_order, is_identifier, Names, Renderer},
        script::{Stmt, SubScriptState, VarId, VarKind, VarTable},
        stack::StackEntry,
        ActionTable, DecompilerConfig,
    },
    Diagnostic, DiagnosticKind, Error, File, Result,
};

/// One variable as listed by [`Decompilation::variables`].
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    /// Rendered name
    pub name: String,
    /// Declared type
    pub ty: Type,
    /// Storage class
    pub kind: VarKind,
}

/// Decompiles NCS scripts against one action table and configuration.
///
/// Every call runs an independent pipeline; the decompiler holds no per-file state and can
/// be shared between threads.
///
/// # Examples
///
/// ```rust
/// use ncscope::{assembly::NcsAssembler, disassembler::TypeCode};
/// use ncscope::decompiler::{ActionTable, Decompiler, DecompilerConfig};
///
/// let mut asm = NcsAssembler::new();
/// asm.rsadd(TypeCode::Int)?.const_int(5)?.cpdownsp(-8, 4)?.movsp(-8)?.retn()?;
///
/// let decompiler = Decompiler::new(ActionTable::new(), DecompilerConfig::default());
/// let result = decompiler.decompile(&asm.finish()?);
/// assert!(result.source().contains("int nVar1 = 5;"));
/// assert!(result.diagnostics().is_empty());
/// # Ok::<(), ncscope::Error>(())
/// ```
pub struct Decompiler {
    actions: ActionTable,
    config: DecompilerConfig,
}

impl Decompiler {
    /// Creates a decompiler.
    #[must_use]
    pub fn new(actions: ActionTable, config: DecompilerConfig) -> Self {
        Decompiler { actions, config }
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &DecompilerConfig {
        &self.config
    }

    /// The action table in use.
    #[must_use]
    pub fn actions(&self) -> &ActionTable {
        &self.actions
    }

    /// Decompiles one compiled script.
    ///
    /// Never fails: a file that cannot be decoded yields a stub result carrying the
    /// diagnostic, a subroutine that cannot be reconstructed is rendered as a comment.
    #[must_use]
    pub fn decompile(&self, data: &[u8]) -> Decompilation {
        let analysis = match Analysis::run(data, &self.actions, &self.config) {
            Ok(analysis) => analysis,
            Err(error) => {
                warn!(%error, "script could not be decoded");
                return Decompilation::stub(&error);
            }
        };

        let mut vars = VarTable::new();
        let mut globals: Vec<StackEntry> = Vec::new();
        let mut scripts = Vec::with_capacity(analysis.program.subroutines.len());
        let mut pending: Vec<(Option<SubId>, Diagnostic)> = Vec::new();

        // Globals first, every other body addresses them through BP
        let order = analysis
            .subs
            .globals()
            .into_iter()
            .chain(analysis.program.subroutines.iter().map(|s| s.id).filter(|&id| {
                Some(id) != analysis.subs.globals()
                    && analysis.program.subroutine(id).kind != SubroutineKind::Entry
            }));

        for sub in order {
            let kind = analysis.program.subroutine(sub).kind;
            let outcome = match analysis.failure(sub) {
                Some(error) => Err(Diagnostic::from_error(error, None)),
                None => MainPass::new(
                    &analysis.program,
                    &analysis.nodes,
                    &analysis.subs,
                    &self.actions,
                    &mut vars,
                    &mut globals,
                    sub,
                )
                .run()
                .map_err(|error| Diagnostic::from_error(&error, None)),
            };

            let script = match outcome {
                Ok(mut script) => {
                    let residual = CleanupPass::new(self.config.prefer_switches).run(&mut script);
                    for label in residual {
                        pending.push((
                            Some(sub),
                            Diagnostic {
                                kind: DiagnosticKind::Structural,
                                offset: Some(label),
                                subroutine: None,
                                message: format!("unstructured jump to 0x{label:X}"),
                            },
                        ));
                    }
                    script
                }
                Err(diagnostic) => {
                    debug!(sub = sub.index(), error = %diagnostic.message, "subroutine skipped");
                    let script =
                        failed_script(&analysis, &mut vars, &mut globals, sub, kind, &diagnostic);
                    pending.push((Some(sub), diagnostic));
                    script
                }
            };
            scripts.push(script);
        }
        scripts.sort_by_key(|s| s.sub);

        for (sub, message) in &analysis.warnings {
            pending.push((*sub, Diagnostic::convergence(None, message.clone())));
        }
        for script in &scripts {
            let unresolved = script
                .params
                .iter()
                .map(|&p| &vars.get(p).ty)
                .chain(std::iter::once(&script.ret))
                .chain(declared_order(&script.body).into_iter().map(|v| &vars.get(v).ty))
                .filter(|ty| !ty.is_resolved())
                .count();
            if unresolved > 0 {
                pending.push((
                    Some(script.sub),
                    Diagnostic::convergence(
                        None,
                        format!("{unresolved} unresolved types rendered as int"),
                    ),
                ));
            }
        }

        let names = Names::assign(&vars, &scripts);
        let diagnostics = pending
            .into_iter()
            .map(|(sub, mut diagnostic)| {
                diagnostic.subroutine = sub.and_then(|s| names.sub(s)).map(str::to_string);
                diagnostic
            })
            .collect::<Vec<_>>();

        let types = vars
            .iter()
            .map(|(_, v)| &v.ty)
            .chain(scripts.iter().map(|s| &s.ret));
        let structs = collect_structs(types);
        let subroutines = analysis.program.subroutines.len();
        analysis.close();

        let mut result = Decompilation {
            vars,
            scripts,
            names,
            structs,
            diagnostics,
            source: String::new(),
        };
        result.source = result.regenerate();
        debug!(
            subroutines,
            diagnostics = result.diagnostics.len(),
            "decompiled script"
        );
        result
    }

    /// Loads and decompiles a script file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read; decompilation problems are diagnostics.
    pub fn decompile_file(&self, path: &Path) -> Result<Decompilation> {
        let file = File::from_file(path)?;
        Ok(self.decompile(file.data()))
    }

    /// Decompiles several scripts in parallel.
    ///
    /// Results are in input order.
    #[must_use]
    pub fn decompile_batch(&self, inputs: &[&[u8]]) -> Vec<Decompilation> {
        inputs.par_iter().map(|data| self.decompile(data)).collect()
    }
}

/// Placeholder body for a subroutine that could not be reconstructed.
///
/// A failed globals initializer still declares its globals from the inferred layout so
/// that the other subroutines can address them.
fn failed_script(
    analysis: &Analysis,
    vars: &mut VarTable,
    globals: &mut Vec<StackEntry>,
    sub: SubId,
    kind: SubroutineKind,
    diagnostic: &Diagnostic,
) -> SubScriptState {
    let state = analysis.subs.state(sub);
    let params = state
        .params
        .iter()
        .enumerate()
        .map(|(index, ty)| vars.add(ty.clone(), VarKind::Param(index), sub))
        .collect();
    let ret = state.ret.clone().unwrap_or(Type::Void);
    let mut script = SubScriptState::new(sub, kind, params, ret);

    if kind == SubroutineKind::Globals {
        globals.clear();
        for ty in analysis.subs.global_types() {
            let var = vars.add(ty.clone(), VarKind::Global, sub);
            globals.push(StackEntry::var(var, ty));
            script.body.push(Stmt::Decl { var, init: None });
        }
    } else {
        script.failure = Some(diagnostic.message.clone());
    }
    script
}

/// The result of decompiling one script.
///
/// Holds the reconstructed subroutines and the names used to render them; the analysis
/// state of the pipeline run is already released.
#[derive(Debug, Clone)]
pub struct Decompilation {
    vars: VarTable,
    scripts: Vec<SubScriptState>,
    names: Names,
    structs: Vec<StructType>,
    diagnostics: Vec<Diagnostic>,
    source: String,
}

impl Decompilation {
    fn stub(error: &Error) -> Self {
        let diagnostic = Diagnostic::from_error(error, None);
        Decompilation {
            vars: VarTable::new(),
            scripts: Vec::new(),
            names: Names::default(),
            structs: Vec::new(),
            source: format!("// could not be decompiled: {}\n", diagnostic.message),
            diagnostics: vec![diagnostic],
        }
    }

    /// The generated source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Problems encountered while decompiling.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Returns `true` if any subroutine or the whole file could not be reconstructed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.diagnostics.iter().any(|d| {
            matches!(
                d.kind,
                DiagnosticKind::Format | DiagnosticKind::Decode | DiagnosticKind::Structural
            )
        })
    }

    /// The reconstructed subroutines in file order.
    #[must_use]
    pub fn subroutines(&self) -> &[SubScriptState] {
        &self.scripts
    }

    /// Names of the rendered subroutines in file order.
    #[must_use]
    pub fn subroutine_names(&self) -> Vec<&str> {
        self.scripts
            .iter()
            .filter_map(|s| self.names.sub(s.sub))
            .collect()
    }

    /// Parameters and locals of a subroutine, parameters first in declaration order, then
    /// locals in declaration order.
    ///
    /// Returns `None` if no subroutine carries `name`.
    #[must_use]
    pub fn variables(&self, name: &str) -> Option<Vec<VariableInfo>> {
        let sub = self.names.find_sub(name)?;
        let script = self.scripts.iter().find(|s| s.sub == sub)?;
        let mut order = script.params.clone();
        order.extend(
            declared_order(&script.body)
                .into_iter()
                .filter(|&v| self.vars.get(v).kind == VarKind::Local && self.vars.get(v).owner == sub),
        );
        Some(order.into_iter().map(|v| self.info(v)).collect())
    }

    /// The global variables in declaration order.
    #[must_use]
    pub fn globals(&self) -> Vec<VariableInfo> {
        self.scripts
            .iter()
            .filter(|s| s.kind == SubroutineKind::Globals)
            .flat_map(|s| declared_order(&s.body))
            .map(|v| self.info(v))
            .collect()
    }

    fn info(&self, var: VarId) -> VariableInfo {
        let v = self.vars.get(var);
        VariableInfo {
            name: self.names.var(var).to_string(),
            ty: v.ty.clone(),
            kind: v.kind,
        }
    }

    /// Renames a subroutine and regenerates the source.
    ///
    /// Nothing changes if the call fails.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidName`] if `new` is not an identifier
    /// - [`Error::UnknownSubroutine`] if no subroutine is named `old`
    /// - [`Error::NameCollision`] if another subroutine is already named `new`
    pub fn rename_subroutine(&mut self, old: &str, new: &str) -> Result<&str> {
        if !is_identifier(new) {
            return Err(Error::InvalidName(new.to_string()));
        }
        let sub = self
            .names
            .find_sub(old)
            .ok_or_else(|| Error::UnknownSubroutine(old.to_string()))?;
        if old != new {
            if self.names.find_sub(new).is_some() {
                return Err(Error::NameCollision(new.to_string()));
            }
            self.names.set_sub(sub, new.to_string());
            for diagnostic in &mut self.diagnostics {
                if diagnostic.subroutine.as_deref() == Some(old) {
                    diagnostic.subroutine = Some(new.to_string());
                }
            }
            self.source = self.regenerate();
            debug!(old, new, "renamed subroutine");
        }
        Ok(&self.source)
    }

    /// Renders the source from the current state.
    #[must_use]
    pub fn regenerate(&self) -> String {
        if self.scripts.is_empty() {
            return self.source.clone();
        }
        Renderer::new(&self.vars, &self.names, &self.structs, &self.scripts).render(&self.scripts)
    }

    /// Releases the result.
    pub fn close(self) {
        debug!(subroutines = self.scripts.len(), "released decompilation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::NcsAssembler, disassembler::TypeCode};

    fn assert_send<T: Send>() {}

    #[test]
    fn test_result_is_send() {
        assert_send::<Decompilation>();
    }

    #[test]
    fn test_stub_on_bad_header() {
        let decompiler = Decompiler::new(ActionTable::new(), DecompilerConfig::default());
        let result = decompiler.decompile(b"NCS V1.1\x42\x00\x00\x00\x0D");
        assert_eq!(result.diagnostics().len(), 1);
        assert_eq!(result.diagnostics()[0].kind, DiagnosticKind::Format);
        assert!(result.has_failures());
        assert!(result.source().starts_with("// could not be decompiled"));
        assert_eq!(result.regenerate(), result.source());
    }

    #[test]
    fn test_rename_invalid() -> Result<()> {
        let mut asm = NcsAssembler::new();
        asm.jsr("main")?.retn()?;
        asm.label("main")?.jsr("helper")?.retn()?;
        asm.label("helper")?.rsadd(TypeCode::Int)?.movsp(-4)?.retn()?;

        let decompiler = Decompiler::new(ActionTable::new(), DecompilerConfig::default());
        let mut result = decompiler.decompile(&asm.finish()?);
        assert_eq!(result.subroutine_names(), vec!["main", "sub1"]);

        assert!(matches!(
            result.rename_subroutine("sub1", "2nd"),
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(
            result.rename_subroutine("nothing", "x"),
            Err(Error::UnknownSubroutine(_))
        ));

        let source = result.rename_subroutine("sub1", "Helper")?.to_string();
        assert!(source.contains("void Helper();"));
        assert!(source.contains("    Helper();"));
        assert_eq!(result.variables("Helper").map(|v| v.len()), Some(0));
        Ok(())
    }
}

//! Reconstruction of script source from analyzed programs.
//!
//! The decompiler drives the analysis stages, replays every subroutine over a value stack
//! to produce statements, structures the resulting jump soup and renders source text.
//!
//! # Architecture
//!
//! - [`actions`] - Engine action signatures ([`ActionTable`])
//! - [`config`] - Pipeline configuration ([`DecompilerConfig`])
//! - [`script`] - Statements, expressions and variables of the reconstructed script
//! - [`stack`] - Value stack entries of the codegen pass
//! - `mainpass` - Codegen over the value stack, one subroutine at a time
//! - [`cleanup`] - Control flow structuring and declaration cleanup ([`CleanupPass`])
//! - [`render`] - Naming and source text ([`Renderer`])
//! - [`engine`] - The pipeline ([`Decompiler`]) and its result ([`Decompilation`])
//!
//! # Example
//!
//! ```rust
//! use ncscope::{assembly::NcsAssembler, disassembler::TypeCode};
//! use ncscope::decompiler::{ActionTable, Decompiler, DecompilerConfig};
//!
//! let actions = ActionTable::parse("void PrintInteger(int nInteger);")?;
//! let mut asm = NcsAssembler::new();
//! asm.const_int(7)?.action(0, 1)?.retn()?;
//!
//! let result = Decompiler::new(actions, DecompilerConfig::default()).decompile(&asm.finish()?);
//! assert_eq!(result.source(), "void main() {\n    PrintInteger(7);\n}\n\n");
//! # Ok::<(), ncscope::Error>(())
//! ```

pub mod actions;
pub mod cleanup;
pub mod config;
pub mod engine;
mod mainpass;
pub mod render;
pub mod script;
pub mod stack;

pub use actions::{ActionDef, ActionParam, ActionTable};
pub use cleanup::CleanupPass;
pub use config::{DecompilerConfig, GameVariant};
pub use engine::{Decompilation, Decompiler, VariableInfo};
pub use render::{Names, Renderer};
pub use script::{
    BinaryOp, Case, Expr, LValue, Stmt, SubScriptState, UnaryOp, VarId, VarInfo, VarKind,
    VarTable,
};
pub use stack::{StackEntry, Value};

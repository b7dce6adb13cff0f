//! # ncscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types of the
//! ncscope library. Import it to get quick access to the decompiler pipeline.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all ncscope operations
pub use crate::Error;

/// The result type used throughout ncscope
pub use crate::Result;

/// Non-fatal problems collected by the pipeline
pub use crate::{Diagnostic, DiagnosticKind};

/// Low-level file parsing utilities
pub use crate::{File, Parser};

// ================================================================================================
// Decompilation
// ================================================================================================

/// The pipeline and its result
pub use crate::decompiler::{Decompilation, Decompiler, VariableInfo};

/// Pipeline inputs
pub use crate::decompiler::{ActionTable, DecompilerConfig, GameVariant};

// ================================================================================================
// Bytecode
// ================================================================================================

/// Instruction decoding
pub use crate::disassembler::{decode_stream, listing, ConstValue, Instruction, Opcode, TypeCode};

/// Instruction encoding
pub use crate::assembly::NcsAssembler;

// ================================================================================================
// Analysis
// ================================================================================================

/// Analysis stores and the script type model
pub use crate::analysis::{Analysis, SubId, SubroutineKind, Type};

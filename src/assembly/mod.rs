//! NCS bytecode assembly.
//!
//! The assembler produces compiled scripts from individual instructions. It is used to
//! build test input, benchmark workloads and small tools; the decompiler itself never
//! writes bytecode.
//!
//! # Key Components
//!
//! - [`NcsAssembler`] - Fluent instruction builder with label resolution
//! - [`LabelFixup`] - A jump waiting for its label

mod encoder;

pub use encoder::{LabelFixup, NcsAssembler};

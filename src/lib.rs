// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # ncscope
//!
//! A framework for disassembling and reverse compiling NCS script bytecode, the compiled
//! form of NWScript used by the Odyssey engine games, back into recompilable source.
//!
//! ## Features
//!
//! - **Bit-exact decoding** - Big-endian instruction stream with offsets kept for every
//!   instruction and diagnostic
//! - **Prototype inference** - Parameter counts, parameter types and return types of every
//!   subroutine, recursive ones included, from a fixed point over a typed stack simulation
//! - **Structured output** - `if`/`else`, loops, `switch` and deferred action blocks are
//!   rebuilt from the compiled jump patterns
//! - **Best effort** - A damaged subroutine is reported and skipped, the rest of the file
//!   is still decompiled
//! - **Parallel batches** - Independent pipelines per file, see
//!   [`decompiler::Decompiler::decompile_batch`]
//!
//! ## Quick Start
//!
//! ```rust
//! use ncscope::prelude::*;
//!
//! let actions = ActionTable::parse("int Random(int nMaxInteger);")?;
//!
//! // int n = Random(10);
//! let mut asm = NcsAssembler::new();
//! asm.rsadd(TypeCode::Int)?;
//! asm.const_int(10)?.action(0, 1)?;
//! asm.cpdownsp(-8, 4)?.movsp(-4)?;
//! asm.movsp(-4)?.retn()?;
//!
//! let decompiler = Decompiler::new(actions, DecompilerConfig::default());
//! let result = decompiler.decompile(&asm.finish()?);
//! assert!(result.source().contains("int nVar1 = Random(10);"));
//! # Ok::<(), ncscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`disassembler`] - Header validation and instruction decoding
//! - [`analysis`] - Program tree, control flow facts, prototype inference and type pass
//! - [`decompiler`] - Codegen, structuring, rendering and the public pipeline
//! - [`assembly`] - Bytecode builder for tests and tools
//! - [`Error`], [`Diagnostic`] and [`Result`] - Error handling
//!
//! ## Error Handling
//!
//! Decoding and analysis functions return [`Result`]. The pipeline entry point
//! [`decompiler::Decompiler::decompile`] never fails; problems are collected as
//! [`Diagnostic`] values next to the (possibly partial) source:
//!
//! ```rust
//! use ncscope::prelude::*;
//!
//! let decompiler = Decompiler::new(ActionTable::new(), DecompilerConfig::default());
//! let result = decompiler.decompile(b"not a script");
//! assert_eq!(result.diagnostics()[0].kind, DiagnosticKind::Format);
//! ```
//!
//! ## Logging
//!
//! Stage boundaries emit [`tracing`](https://docs.rs/tracing) events. The crate never
//! installs a subscriber.

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust
/// use ncscope::prelude::*;
///
/// let decompiler = Decompiler::new(ActionTable::new(), DecompilerConfig::default());
/// assert!(decompiler.config().prefer_switches);
/// ```
pub mod prelude;

pub mod analysis;
pub mod assembly;
pub mod decompiler;
pub mod disassembler;

/// `ncscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

pub use error::{Diagnostic, DiagnosticKind, Error};

/// Provides access to low-level file and parsing utilities.
///
/// The [`Parser`] type is used for decoding NCS bytecode.
///
/// # Example
///
/// ```rust
/// use ncscope::{Parser, disassembler::decode_instruction};
/// let code = [0x20, 0x00]; // RETN
/// let mut parser = Parser::new(&code);
/// let instruction = decode_instruction(&mut parser)?;
/// assert_eq!(instruction.size, 2);
/// # Ok::<(), ncscope::Error>(())
/// ```
pub use file::{parser::Parser, File};

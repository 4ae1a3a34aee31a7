//! ed9-core
//!
//! Reading, disassembling and re-assembling ED9 `#scp` script files, plus the
//! XLIFF string pipeline built on top of the textual builder program.

#![allow(clippy::uninlined_format_args)]

pub mod asm;
pub mod batch;
pub mod binary;
pub mod cle;
pub mod commands;
pub mod disasm;
pub mod error;
pub mod opcode;
pub mod program;
pub mod script;
pub mod strings;
pub mod tagged;

pub use asm::dispatch::{assemble, assemble_source, Assembly};
pub use asm::{AsmOptions, Assembler};
pub use disasm::{DisasmOptions, Disassembler, Disassembly};
pub use error::{Diagnostic, Diagnostics, Ed9Error, Located, Position, Result};

//! QVM assembler: bidirectional text ↔ module translation.
//!
//! The assembler is a mechanical 1:1 translation. Labels are the only
//! convenience; there are no macros and no optimization.
//!
//! # Usage
//!
//! ```
//! use qvm_assembler::{assemble, disassemble};
//!
//! let text = "ENTER 8\nCONST 42\nLEAVE 8\n";
//! let module = assemble(text).unwrap();
//! let roundtripped = disassemble(&module);
//! assert_eq!(roundtripped, text);
//! ```
//!
//! # Syntax
//!
//! One item per line; `;` starts a comment.
//!
//! - `name:` defines a label at the next instruction index.
//! - `MNEMONIC [operand]`: ENTER, LEAVE, CONST, PUSH, LOCAL, ARG and
//!   BLOCK_COPY require an operand (a number or `@label`); every other
//!   opcode takes none.
//! - `.data b...` and `.lit b...` append bytes; `.lit "text"` appends the
//!   text and a NUL.
//! - `.word n...` appends little-endian words to the data segment.
//! - `.bss n` grows the bss segment, `.version n` sets the header version.
//! - `.insn w...` appends raw instruction words.
//!
//! # Roundtrip Guarantee
//!
//! `assemble(disassemble(module)) == module` holds for every module,
//! including ones with opcode bytes outside the instruction set.

pub mod error;

mod disassembler;
mod lexer;
mod parser;

pub use error::AsmError;

use lexer::tokenize_line;
use parser::Builder;
use qvm_common::Module;

/// Assemble text into a module.
///
/// Returns the first error encountered. Fix one error at a time.
pub fn assemble(text: &str) -> Result<Module, AsmError> {
    let mut builder = Builder::default();

    for (idx, line) in text.lines().enumerate() {
        let line_num = idx + 1;
        let tokens = tokenize_line(line, line_num)?;
        builder.parse_line(&tokens, line_num)?;
    }

    builder.finish()
}

/// Disassemble a module into canonical assembly text.
pub fn disassemble(module: &Module) -> String {
    disassembler::disassemble(module)
}

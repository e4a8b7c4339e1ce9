//! Disassembler: module → canonical assembly text.
//!
//! Output is flat text: directives first, then one instruction per line.
//! No labels, no comments, no blank lines. Words that have no mnemonic form
//! (unknown opcode bytes, or a stray immediate on an opcode that takes none)
//! are written as `.insn` so that any loaded module survives the trip.

use std::fmt::Write;

use qvm_common::module::CURRENT_FORMAT_VERSION;
use qvm_common::{Instruction, Module, Opcode};

/// Bytes per `.data` / `.lit` line.
const BYTES_PER_LINE: usize = 16;

/// Disassemble a module into canonical assembly text.
///
/// The output is guaranteed to reassemble to an identical module
/// (`assemble(disassemble(module)) == module`).
pub fn disassemble(module: &Module) -> String {
    let mut out = String::new();

    if module.format_version != CURRENT_FORMAT_VERSION {
        let _ = writeln!(out, ".version {}", module.format_version);
    }
    write_bytes(&mut out, ".data", &module.data);
    write_bytes(&mut out, ".lit", &module.literals);
    if module.bss_length != 0 {
        let _ = writeln!(out, ".bss {}", module.bss_length);
    }

    for instr in &module.instructions {
        out.push_str(&instruction_line(instr));
        out.push('\n');
    }

    out
}

fn instruction_line(instr: &Instruction) -> String {
    match Opcode::try_from(instr.op) {
        Ok(op) if op.takes_immediate() => format!("{} {}", op.mnemonic(), instr.imm),
        Ok(op) if instr.imm == 0 => op.mnemonic().to_string(),
        _ => format!(".insn {:#010x}", instr.encode()),
    }
}

fn write_bytes(out: &mut String, directive: &str, bytes: &[u8]) {
    for chunk in bytes.chunks(BYTES_PER_LINE) {
        out.push_str(directive);
        for b in chunk {
            let _ = write!(out, " {b:#04x}");
        }
        out.push('\n');
    }
}

//! Per-instruction structural checks.
//!
//! Each instruction is checked on its own: the opcode byte must be known
//! and not UNDEF, and opcodes whose immediate is a size or offset must carry
//! a sensible one.

use crate::error::VerifyError;
use qvm_common::{Instruction, Opcode};

/// Run the structural check.
pub fn check_structural(instrs: &[Instruction]) -> Vec<VerifyError> {
    let mut errors = Vec::new();

    for (at, instr) in instrs.iter().enumerate() {
        let op = match instr.opcode() {
            Ok(op) => op,
            Err(_) => {
                errors.push(VerifyError::UnknownOpcode {
                    at,
                    opcode: instr.op,
                });
                continue;
            }
        };

        let imm = instr.imm;
        match op {
            Opcode::Undef => errors.push(VerifyError::UndefinedInstruction { at }),
            Opcode::Enter | Opcode::Leave if imm < 0 || imm % 4 != 0 => {
                errors.push(VerifyError::BadFrameSize {
                    at,
                    opcode: op.mnemonic(),
                    size: imm,
                });
            }
            // [ps] holds the return address.
            Opcode::Arg if imm < 4 => {
                errors.push(VerifyError::BadArgOffset { at, offset: imm });
            }
            Opcode::BlockCopy if imm < 0 => {
                errors.push(VerifyError::NegativeBlockCopy { at, length: imm });
            }
            _ => {}
        }
    }

    errors
}

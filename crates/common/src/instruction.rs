//! Instruction encoding and decoding for the QVM instruction set.
//!
//! Every instruction is exactly 32 bits, stored little-endian:
//! ```text
//! Bits 0-7:   opcode (u8)
//! Bits 8-31:  immediate (i24, two's complement, sign-extended on decode)
//! ```
//!
//! The opcode byte is kept raw. Whether it names a real opcode is decided
//! when the instruction is dispatched, so a module may carry bytes the VM
//! later rejects with a fault.

use crate::error::DecodeError;
use crate::opcode::Opcode;

/// Smallest value an immediate can hold.
pub const IMMEDIATE_MIN: i32 = -(1 << 23);

/// Largest value an immediate can hold.
pub const IMMEDIATE_MAX: i32 = (1 << 23) - 1;

/// A single 32-bit QVM instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    /// Raw opcode byte.
    pub op: u8,
    /// Sign-extended 24-bit immediate.
    pub imm: i32,
}

impl Instruction {
    /// Create an instruction for a known opcode.
    ///
    /// The immediate is truncated to 24 bits; use [`Instruction::try_new`]
    /// when the value comes from untrusted input.
    pub fn new(opcode: Opcode, imm: i32) -> Self {
        Self::decode(encode_word(opcode as u8, imm))
    }

    /// Create an instruction, rejecting immediates that do not fit in 24 bits.
    pub fn try_new(opcode: Opcode, imm: i32) -> Result<Self, DecodeError> {
        if !(IMMEDIATE_MIN..=IMMEDIATE_MAX).contains(&imm) {
            return Err(DecodeError::ImmediateOutOfRange(imm));
        }
        Ok(Self {
            op: opcode as u8,
            imm,
        })
    }

    /// Instruction with no immediate.
    pub fn bare(opcode: Opcode) -> Self {
        Self {
            op: opcode as u8,
            imm: 0,
        }
    }

    /// Build from a raw opcode byte (possibly unknown) and an immediate.
    pub fn raw(op: u8, imm: i32) -> Self {
        Self::decode(encode_word(op, imm))
    }

    /// Decode one 32-bit word.
    pub fn decode(word: u32) -> Self {
        Self {
            op: (word & 0xFF) as u8,
            // Arithmetic shift of the whole word sign-extends bit 31.
            imm: (word as i32) >> 8,
        }
    }

    /// Encode this instruction to a 32-bit word.
    pub fn encode(&self) -> u32 {
        encode_word(self.op, self.imm)
    }

    /// The decoded opcode, or an error for bytes outside the table.
    pub fn opcode(&self) -> Result<Opcode, DecodeError> {
        Opcode::try_from(self.op)
    }
}

fn encode_word(op: u8, imm: i32) -> u32 {
    ((imm as u32) << 8) | op as u32
}

//! Verification errors for QVM modules.
//!
//! Every per-instruction error carries its instruction index (`at`). The
//! verifier collects ALL errors, not just the first.

use thiserror::Error;

/// Errors found during static verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    // --- Limits ---
    /// The code segment holds no instructions.
    #[error("module has no instructions")]
    EmptyModule,

    /// More instructions than the verifier accepts.
    #[error("module has {size} instructions (limit {limit})")]
    ModuleTooLarge { size: usize, limit: usize },

    /// bss request above the loader limit.
    #[error("bss of {requested} bytes exceeds limit of {limit}")]
    BssTooLarge { requested: u32, limit: u32 },

    // --- Structural ---
    /// Opcode byte outside the instruction set.
    #[error("unknown opcode {opcode:#04x} at instruction {at}")]
    UnknownOpcode { at: usize, opcode: u8 },

    /// UNDEF always faults when executed.
    #[error("UNDEF at instruction {at}")]
    UndefinedInstruction { at: usize },

    /// ENTER or LEAVE with a negative or unaligned frame size.
    #[error("{opcode} frame size {size} at instruction {at} is not a non-negative multiple of 4")]
    BadFrameSize {
        at: usize,
        opcode: &'static str,
        size: i32,
    },

    /// ARG offset that would overwrite the return address slot.
    #[error("ARG offset {offset} at instruction {at} must be at least 4")]
    BadArgOffset { at: usize, offset: i32 },

    /// BLOCK_COPY with a negative length.
    #[error("BLOCK_COPY length {length} at instruction {at} is negative")]
    NegativeBlockCopy { at: usize, length: i32 },

    // --- Targets ---
    /// A constant jump target outside the code segment.
    #[error("jump target {target} at instruction {at} is outside the code")]
    JumpOutOfRange { at: usize, target: i32 },

    /// A constant call target outside the code segment.
    #[error("call target {target} at instruction {at} is outside the code")]
    CallOutOfRange { at: usize, target: i32 },
}

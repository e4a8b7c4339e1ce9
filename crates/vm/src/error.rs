//! Execution faults for the QVM.
//!
//! A fault aborts the current run: once an instruction fails half-way the
//! VM's stack and memory invariants can no longer be trusted. Every variant
//! carries the instruction index (`at`) and, where relevant, the opcode or
//! address involved.

use thiserror::Error;

/// Errors that end a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmFault {
    /// Load, store, copy or argument access outside the arena.
    #[error("{opcode} accessed {len} bytes at {address:#x} out of bounds at instruction {at}")]
    OutOfBounds {
        at: usize,
        opcode: &'static str,
        address: u32,
        len: u32,
    },

    /// Push onto a full operand stack.
    #[error("operand stack overflow at instruction {at}")]
    OperandStackOverflow { at: usize },

    /// Pop from an empty operand stack.
    #[error("operand stack underflow at instruction {at}")]
    OperandStackUnderflow { at: usize },

    /// Program stack grew below the bottom of the stack region.
    #[error("program stack overflow ({program_stack:#x}) at instruction {at}")]
    ProgramStackOverflow { at: usize, program_stack: i64 },

    /// Program stack shrank above its initial top.
    #[error("program stack underflow ({program_stack:#x}) at instruction {at}")]
    ProgramStackUnderflow { at: usize, program_stack: i64 },

    /// Integer division or remainder by zero.
    #[error("{opcode} by zero at instruction {at}")]
    DivisionByZero { at: usize, opcode: &'static str },

    /// JUMP to an index outside the code segment.
    #[error("invalid jump target {target} at instruction {at}")]
    InvalidJumpTarget { at: usize, target: i32 },

    /// CALL to a non-negative index outside the code segment.
    #[error("invalid call target {target} at instruction {at}")]
    InvalidCallTarget { at: usize, target: i32 },

    /// LEAVE found a return address that is neither the sentinel nor code.
    #[error("invalid return address {address} at instruction {at}")]
    InvalidReturnAddress { at: usize, address: i32 },

    /// Opcode byte past the end of the opcode table.
    #[error("unknown opcode {opcode:#04x} at instruction {at}")]
    UnknownOpcode { at: usize, opcode: u8 },

    /// Executed an UNDEF instruction.
    #[error("undefined instruction at {at}")]
    UndefinedInstruction { at: usize },

    /// Entry point or resumed instruction pointer outside the code segment.
    #[error("instruction pointer {ip} outside code")]
    InstructionPointerOutOfRange { ip: usize },

    /// Data, literals, bss and stack do not fit in the configured address space.
    #[error("module needs {required} bytes of memory, limit is {limit}")]
    ArenaTooLarge { required: u64, limit: u64 },

    /// The syscall handler reported a fatal error.
    #[error("syscall {syscall} aborted at instruction {at}: {message}")]
    HostAbort {
        at: usize,
        syscall: i32,
        message: String,
    },

    /// `resume` without an interrupted run.
    #[error("no interrupted run to resume")]
    NotResumable,
}

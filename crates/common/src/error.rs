//! Decode and load errors for QVM modules.

use thiserror::Error;

/// Errors that occur while decoding a single instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Opcode byte is past the end of the opcode table.
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// Immediate does not fit in 24 signed bits.
    #[error("immediate {0} does not fit in 24 bits")]
    ImmediateOutOfRange(i32),
}

/// Errors that occur while loading a module image.
///
/// Loading either produces a complete [`Module`](crate::Module) or one of
/// these; no partially-built module is ever returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// Buffer too short to hold the fixed header.
    #[error("truncated header: {len} bytes (need {needed})")]
    TruncatedHeader { len: usize, needed: usize },

    /// Header magic does not match the QVM constant.
    #[error("invalid magic {found:#010x} (expected {expected:#010x})")]
    InvalidMagic { found: u32, expected: u32 },

    /// Header declares zero instructions.
    #[error("module has no instructions")]
    EmptyCode,

    /// Code segment length disagrees with the instruction count.
    #[error("code length {code_length} does not match {instruction_count} instructions")]
    CodeLengthMismatch {
        instruction_count: u32,
        code_length: u32,
    },

    /// Code segment extends past the end of the buffer.
    #[error("code segment {offset}+{length} exceeds module size {file_len}")]
    CodeOutOfRange {
        offset: u32,
        length: u32,
        file_len: usize,
    },

    /// Data plus literal segments extend past the end of the buffer.
    #[error("data segment {offset}+{length} exceeds module size {file_len}")]
    DataOutOfRange {
        offset: u32,
        length: u64,
        file_len: usize,
    },

    /// Requested bss exceeds the hard ceiling.
    #[error("bss length {requested} exceeds limit {limit}")]
    BssTooLarge { requested: u32, limit: u32 },
}

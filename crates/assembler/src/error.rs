//! Error types for the QVM assembler.

use thiserror::Error;

/// Errors produced during assembly of text to a module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    /// An unrecognized opcode mnemonic was encountered.
    #[error("line {line}: unknown opcode '{token}'")]
    UnknownOpcode { line: usize, token: String },

    /// An unrecognized directive was encountered.
    #[error("line {line}: unknown directive '{token}'")]
    UnknownDirective { line: usize, token: String },

    /// An opcode that takes an operand was given none.
    #[error("line {line}: {opcode} expects an operand")]
    MissingOperand { line: usize, opcode: &'static str },

    /// A numeric literal could not be parsed.
    #[error("line {line}: invalid number '{token}'")]
    InvalidNumber { line: usize, token: String },

    /// An immediate that does not fit in 24 signed bits.
    #[error("line {line}: immediate {value} does not fit in 24 bits")]
    ImmediateOutOfRange { line: usize, value: i64 },

    /// A directive operand outside the range its directive accepts.
    #[error("line {line}: {directive} value {value} out of range")]
    ValueOutOfRange {
        line: usize,
        directive: &'static str,
        value: i64,
    },

    /// A token appeared where it was not expected.
    #[error("line {line}: unexpected token '{token}'")]
    UnexpectedToken { line: usize, token: String },

    /// A malformed label name.
    #[error("line {line}: invalid label '{token}'")]
    InvalidLabel { line: usize, token: String },

    /// A label defined twice.
    #[error("line {line}: label '{label}' already defined")]
    DuplicateLabel { line: usize, label: String },

    /// A reference to a label that is never defined.
    #[error("line {line}: undefined label '{label}'")]
    UndefinedLabel { line: usize, label: String },

    /// A string literal without its closing quote.
    #[error("line {line}: unterminated string")]
    UnterminatedString { line: usize },

    /// An unsupported backslash escape in a string literal.
    #[error("line {line}: invalid escape '\\{escape}'")]
    InvalidEscape { line: usize, escape: char },
}

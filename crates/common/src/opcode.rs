//! Opcode definitions for the QVM instruction set.
//!
//! Numbering follows the Quake III `opcode_t` table so that opcode bytes
//! produced by existing toolchains keep their meaning.

use crate::error::DecodeError;

/// Identifies the operation to perform.
///
/// The `#[repr(u8)]` attribute gives each variant its stable byte value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Control & frame
    /// Trap. Executing it is always a fault.
    Undef = 0,
    /// No operation.
    Ignore = 1,
    /// Debugger break marker. Counted, otherwise a no-op.
    Break = 2,
    /// Reserve `imm` bytes of program stack for a new frame.
    Enter = 3,
    /// Release `imm` bytes of program stack and return to the saved address.
    Leave = 4,
    /// Pop a target and call it. Negative targets are syscalls.
    Call = 5,
    /// Push the immediate.
    Push = 6,
    /// Discard the top operand.
    Pop = 7,
    /// Push the immediate.
    Const = 8,
    /// Push `program_stack + imm`.
    Local = 9,
    /// Pop a target instruction index and jump to it.
    Jump = 10,

    // Integer comparisons
    /// Push 1 if `a == b`.
    Eq = 11,
    /// Push 1 if `a != b`.
    Ne = 12,
    /// Signed `a < b`.
    Lti = 13,
    /// Signed `a <= b`.
    Lei = 14,
    /// Signed `a > b`.
    Gti = 15,
    /// Signed `a >= b`.
    Gei = 16,
    /// Unsigned `a < b`.
    Ltu = 17,
    /// Unsigned `a <= b`.
    Leu = 18,
    /// Unsigned `a > b`.
    Gtu = 19,
    /// Unsigned `a >= b`.
    Geu = 20,

    // Float comparisons
    /// IEEE `a == b`.
    Eqf = 21,
    /// IEEE `a != b`.
    Nef = 22,
    /// IEEE `a < b`.
    Ltf = 23,
    /// IEEE `a <= b`.
    Lef = 24,
    /// IEEE `a > b`.
    Gtf = 25,
    /// IEEE `a >= b`.
    Gef = 26,

    // Memory
    /// Pop address, push zero-extended byte.
    Load1 = 27,
    /// Pop address, push zero-extended half word.
    Load2 = 28,
    /// Pop address, push word.
    Load4 = 29,
    /// Pop value, pop address, store low byte.
    Store1 = 30,
    /// Pop value, pop address, store low half word.
    Store2 = 31,
    /// Pop value, pop address, store word.
    Store4 = 32,
    /// Pop value into the outgoing argument slot at `program_stack + imm`.
    Arg = 33,
    /// Pop source, pop destination, copy `imm` bytes.
    BlockCopy = 34,

    // Integer arithmetic
    /// Sign-extend the low 8 bits.
    Sex8 = 35,
    /// Sign-extend the low 16 bits.
    Sex16 = 36,
    /// Two's complement negation.
    Negi = 37,
    /// Wrapping addition.
    Add = 38,
    /// Wrapping subtraction (`a - b`).
    Sub = 39,
    /// Signed division.
    Divi = 40,
    /// Unsigned division.
    Divu = 41,
    /// Signed remainder.
    Modi = 42,
    /// Unsigned remainder.
    Modu = 43,
    /// Signed multiplication.
    Muli = 44,
    /// Unsigned multiplication.
    Mulu = 45,

    // Bitwise
    /// Bitwise AND.
    Band = 46,
    /// Bitwise OR.
    Bor = 47,
    /// Bitwise XOR.
    Bxor = 48,
    /// Bitwise complement.
    Bcom = 49,
    /// Shift left.
    Lsh = 50,
    /// Arithmetic shift right.
    Rshi = 51,
    /// Logical shift right.
    Rshu = 52,

    // Float arithmetic
    /// Float negation.
    Negf = 53,
    /// Float addition.
    Addf = 54,
    /// Float subtraction.
    Subf = 55,
    /// Float division.
    Divf = 56,
    /// Float multiplication.
    Mulf = 57,
    /// Convert integer value to float.
    Cvif = 58,
    /// Convert float value to integer (truncating).
    Cvfi = 59,
}

/// Number of defined opcodes.
pub const OPCODE_COUNT: usize = 60;

/// All valid opcodes, in byte order. Useful for exhaustive testing.
pub const ALL_OPCODES: [Opcode; OPCODE_COUNT] = [
    Opcode::Undef,
    Opcode::Ignore,
    Opcode::Break,
    Opcode::Enter,
    Opcode::Leave,
    Opcode::Call,
    Opcode::Push,
    Opcode::Pop,
    Opcode::Const,
    Opcode::Local,
    Opcode::Jump,
    Opcode::Eq,
    Opcode::Ne,
    Opcode::Lti,
    Opcode::Lei,
    Opcode::Gti,
    Opcode::Gei,
    Opcode::Ltu,
    Opcode::Leu,
    Opcode::Gtu,
    Opcode::Geu,
    Opcode::Eqf,
    Opcode::Nef,
    Opcode::Ltf,
    Opcode::Lef,
    Opcode::Gtf,
    Opcode::Gef,
    Opcode::Load1,
    Opcode::Load2,
    Opcode::Load4,
    Opcode::Store1,
    Opcode::Store2,
    Opcode::Store4,
    Opcode::Arg,
    Opcode::BlockCopy,
    Opcode::Sex8,
    Opcode::Sex16,
    Opcode::Negi,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Divi,
    Opcode::Divu,
    Opcode::Modi,
    Opcode::Modu,
    Opcode::Muli,
    Opcode::Mulu,
    Opcode::Band,
    Opcode::Bor,
    Opcode::Bxor,
    Opcode::Bcom,
    Opcode::Lsh,
    Opcode::Rshi,
    Opcode::Rshu,
    Opcode::Negf,
    Opcode::Addf,
    Opcode::Subf,
    Opcode::Divf,
    Opcode::Mulf,
    Opcode::Cvif,
    Opcode::Cvfi,
];

impl TryFrom<u8> for Opcode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ALL_OPCODES
            .get(value as usize)
            .copied()
            .ok_or(DecodeError::UnknownOpcode(value))
    }
}

impl Opcode {
    /// Returns the assembly mnemonic for this opcode.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Undef => "UNDEF",
            Opcode::Ignore => "IGNORE",
            Opcode::Break => "BREAK",
            Opcode::Enter => "ENTER",
            Opcode::Leave => "LEAVE",
            Opcode::Call => "CALL",
            Opcode::Push => "PUSH",
            Opcode::Pop => "POP",
            Opcode::Const => "CONST",
            Opcode::Local => "LOCAL",
            Opcode::Jump => "JUMP",
            Opcode::Eq => "EQ",
            Opcode::Ne => "NE",
            Opcode::Lti => "LTI",
            Opcode::Lei => "LEI",
            Opcode::Gti => "GTI",
            Opcode::Gei => "GEI",
            Opcode::Ltu => "LTU",
            Opcode::Leu => "LEU",
            Opcode::Gtu => "GTU",
            Opcode::Geu => "GEU",
            Opcode::Eqf => "EQF",
            Opcode::Nef => "NEF",
            Opcode::Ltf => "LTF",
            Opcode::Lef => "LEF",
            Opcode::Gtf => "GTF",
            Opcode::Gef => "GEF",
            Opcode::Load1 => "LOAD1",
            Opcode::Load2 => "LOAD2",
            Opcode::Load4 => "LOAD4",
            Opcode::Store1 => "STORE1",
            Opcode::Store2 => "STORE2",
            Opcode::Store4 => "STORE4",
            Opcode::Arg => "ARG",
            Opcode::BlockCopy => "BLOCK_COPY",
            Opcode::Sex8 => "SEX8",
            Opcode::Sex16 => "SEX16",
            Opcode::Negi => "NEGI",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Divi => "DIVI",
            Opcode::Divu => "DIVU",
            Opcode::Modi => "MODI",
            Opcode::Modu => "MODU",
            Opcode::Muli => "MULI",
            Opcode::Mulu => "MULU",
            Opcode::Band => "BAND",
            Opcode::Bor => "BOR",
            Opcode::Bxor => "BXOR",
            Opcode::Bcom => "BCOM",
            Opcode::Lsh => "LSH",
            Opcode::Rshi => "RSHI",
            Opcode::Rshu => "RSHU",
            Opcode::Negf => "NEGF",
            Opcode::Addf => "ADDF",
            Opcode::Subf => "SUBF",
            Opcode::Divf => "DIVF",
            Opcode::Mulf => "MULF",
            Opcode::Cvif => "CVIF",
            Opcode::Cvfi => "CVFI",
        }
    }

    /// Look up an opcode by its mnemonic (case-sensitive, uppercase).
    pub fn from_mnemonic(mnemonic: &str) -> Option<Opcode> {
        ALL_OPCODES
            .iter()
            .find(|op| op.mnemonic() == mnemonic)
            .copied()
    }

    /// Whether the immediate field carries meaning for this opcode.
    ///
    /// Every other opcode is emitted with a zero immediate.
    pub fn takes_immediate(&self) -> bool {
        matches!(
            self,
            Opcode::Enter
                | Opcode::Leave
                | Opcode::Push
                | Opcode::Const
                | Opcode::Local
                | Opcode::Arg
                | Opcode::BlockCopy
        )
    }
}

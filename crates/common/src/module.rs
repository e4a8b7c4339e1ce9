//! In-memory representation of a loaded QVM module.
//!
//! A module is the immutable product of [`load`](crate::load): the
//! instruction stream plus the three data regions the VM lays out in its
//! arena. Binary images are produced by [`Module::encode`].

use crate::header::{Header, HEADER_SIZE, QVM_MAGIC};
use crate::instruction::Instruction;

/// Format version written by [`Module::encode`] when none is set.
pub const CURRENT_FORMAT_VERSION: u32 = 1;

/// A loaded QVM module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// The instruction stream. Never empty for a loaded module.
    pub instructions: Vec<Instruction>,
    /// Initialized data, copied to arena offset 0.
    pub data: Vec<u8>,
    /// String literals, placed immediately after `data`.
    pub literals: Vec<u8>,
    /// Length of the zero-filled region after the literals.
    pub bss_length: u32,
    /// Version tag from the header. Informational only.
    pub format_version: u32,
}

impl Module {
    /// Create a module with only code; data regions are empty.
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            data: Vec::new(),
            literals: Vec::new(),
            bss_length: 0,
            format_version: CURRENT_FORMAT_VERSION,
        }
    }

    /// Builder-style setter for the initialized data segment.
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Builder-style setter for the literal segment.
    pub fn with_literals(mut self, literals: Vec<u8>) -> Self {
        self.literals = literals;
        self
    }

    /// Builder-style setter for the bss length.
    pub fn with_bss(mut self, bss_length: u32) -> Self {
        self.bss_length = bss_length;
        self
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns true if the module has no instructions.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Bytes of the arena occupied by data, literals and bss.
    pub fn image_size(&self) -> u64 {
        self.data.len() as u64 + self.literals.len() as u64 + self.bss_length as u64
    }

    /// The header describing this module's canonical encoding.
    pub fn header(&self) -> Header {
        let code_length = (self.instructions.len() * 4) as u32;
        Header {
            magic: QVM_MAGIC,
            instruction_count: self.instructions.len() as u32,
            code_offset: HEADER_SIZE as u32,
            code_length,
            data_offset: HEADER_SIZE as u32 + code_length,
            data_length: self.data.len() as u32,
            literal_length: self.literals.len() as u32,
            bss_length: self.bss_length,
            format_version: self.format_version,
        }
    }

    /// Encode to the binary module format: header, code, data, literals.
    pub fn encode(&self) -> Vec<u8> {
        let header = self.header();
        let mut bytes = Vec::with_capacity(
            HEADER_SIZE + header.code_length as usize + self.data.len() + self.literals.len(),
        );
        header.write(&mut bytes);
        for instr in &self.instructions {
            bytes.extend_from_slice(&instr.encode().to_le_bytes());
        }
        bytes.extend_from_slice(&self.data);
        bytes.extend_from_slice(&self.literals);
        bytes
    }

    /// blake3 digest of the canonical encoding.
    ///
    /// Hosts use this to recognise a module regardless of the file it was
    /// read from.
    pub fn checksum(&self) -> blake3::Hash {
        blake3::hash(&self.encode())
    }
}

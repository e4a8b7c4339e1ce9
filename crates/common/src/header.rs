//! The fixed module header.
//!
//! Nine little-endian 32-bit words:
//! ```text
//! 0  magic            0x12721444
//! 1  instruction_count
//! 2  code_offset
//! 3  code_length
//! 4  data_offset
//! 5  data_length
//! 6  literal_length   literals follow data directly
//! 7  bss_length
//! 8  format_version
//! ```

use crate::error::LoadError;

/// Magic number identifying a QVM image (Quake III `VM_MAGIC`).
pub const QVM_MAGIC: u32 = 0x1272_1444;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 9 * 4;

/// Parsed header fields, before any range validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub instruction_count: u32,
    pub code_offset: u32,
    pub code_length: u32,
    pub data_offset: u32,
    pub data_length: u32,
    pub literal_length: u32,
    pub bss_length: u32,
    pub format_version: u32,
}

impl Header {
    /// Read the header words from the front of `bytes`.
    ///
    /// Only the length is checked here; field validation lives in the loader.
    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        if bytes.len() < HEADER_SIZE {
            return Err(LoadError::TruncatedHeader {
                len: bytes.len(),
                needed: HEADER_SIZE,
            });
        }

        let mut words = [0u32; 9];
        for (word, chunk) in words.iter_mut().zip(bytes[..HEADER_SIZE].chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let [magic, instruction_count, code_offset, code_length, data_offset, data_length, literal_length, bss_length, format_version] =
            words;

        Ok(Self {
            magic,
            instruction_count,
            code_offset,
            code_length,
            data_offset,
            data_length,
            literal_length,
            bss_length,
            format_version,
        })
    }

    /// Append the header words to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        for word in [
            self.magic,
            self.instruction_count,
            self.code_offset,
            self.code_length,
            self.data_offset,
            self.data_length,
            self.literal_length,
            self.bss_length,
            self.format_version,
        ] {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }
}

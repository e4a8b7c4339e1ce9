//! Module loader: binary image → [`Module`].

use crate::error::LoadError;
use crate::header::{Header, QVM_MAGIC};
use crate::instruction::Instruction;
use crate::module::Module;

/// Hard ceiling on the bss a module may request (16 MiB).
pub const MAX_BSS_LENGTH: u32 = 16 * 1024 * 1024;

/// Parse and validate a module image.
///
/// Checks run in header order and the first failure is returned:
/// magic, instruction count, code range, data + literal range, bss ceiling.
/// All offset arithmetic is overflow-checked; an overflowing range is
/// reported as out of range.
pub fn load(bytes: &[u8]) -> Result<Module, LoadError> {
    let header = Header::parse(bytes)?;

    if header.magic != QVM_MAGIC {
        return Err(LoadError::InvalidMagic {
            found: header.magic,
            expected: QVM_MAGIC,
        });
    }

    if header.instruction_count == 0 {
        return Err(LoadError::EmptyCode);
    }

    if header.instruction_count as u64 * 4 != header.code_length as u64 {
        return Err(LoadError::CodeLengthMismatch {
            instruction_count: header.instruction_count,
            code_length: header.code_length,
        });
    }

    let code_end = header.code_offset as u64 + header.code_length as u64;
    if code_end > bytes.len() as u64 {
        return Err(LoadError::CodeOutOfRange {
            offset: header.code_offset,
            length: header.code_length,
            file_len: bytes.len(),
        });
    }

    let data_span = header.data_length as u64 + header.literal_length as u64;
    if header.data_offset as u64 + data_span > bytes.len() as u64 {
        return Err(LoadError::DataOutOfRange {
            offset: header.data_offset,
            length: data_span,
            file_len: bytes.len(),
        });
    }

    if header.bss_length > MAX_BSS_LENGTH {
        return Err(LoadError::BssTooLarge {
            requested: header.bss_length,
            limit: MAX_BSS_LENGTH,
        });
    }

    let code = &bytes[header.code_offset as usize..code_end as usize];
    let instructions = code
        .chunks_exact(4)
        .map(|w| Instruction::decode(u32::from_le_bytes([w[0], w[1], w[2], w[3]])))
        .collect();

    let data_start = header.data_offset as usize;
    let lit_start = data_start + header.data_length as usize;
    let lit_end = lit_start + header.literal_length as usize;

    Ok(Module {
        instructions,
        data: bytes[data_start..lit_start].to_vec(),
        literals: bytes[lit_start..lit_end].to_vec(),
        bss_length: header.bss_length,
        format_version: header.format_version,
    })
}

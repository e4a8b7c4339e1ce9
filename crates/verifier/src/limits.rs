//! Size limits for QVM modules.

use crate::error::VerifyError;
use qvm_common::{Module, MAX_BSS_LENGTH};

/// Maximum module size in instructions.
pub const MAX_INSTRUCTIONS: usize = 1 << 20;

/// Run the limits check.
pub fn check_limits(module: &Module) -> Vec<VerifyError> {
    let mut errors = Vec::new();

    if module.is_empty() {
        errors.push(VerifyError::EmptyModule);
    }
    if module.len() > MAX_INSTRUCTIONS {
        errors.push(VerifyError::ModuleTooLarge {
            size: module.len(),
            limit: MAX_INSTRUCTIONS,
        });
    }
    if module.bss_length > MAX_BSS_LENGTH {
        errors.push(VerifyError::BssTooLarge {
            requested: module.bss_length,
            limit: MAX_BSS_LENGTH,
        });
    }

    errors
}

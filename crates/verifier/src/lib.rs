//! QVM verifier: static checks for modules before execution.
//!
//! The verifier checks a [`Module`] BEFORE it is run. It collects ALL
//! errors (not just the first) and returns them. Passing verification does
//! not make a module safe on its own: the VM still bounds-checks every
//! access. It rejects modules that are certain to fault or were produced by
//! a broken toolchain.
//!
//! # Usage
//!
//! ```
//! use qvm_common::{Instruction, Module, Opcode};
//! use qvm_verifier::verify;
//!
//! let module = Module::new(vec![
//!     Instruction::new(Opcode::Enter, 8),
//!     Instruction::new(Opcode::Const, 42),
//!     Instruction::new(Opcode::Leave, 8),
//! ]);
//!
//! assert!(verify(&module).is_ok());
//! ```
//!
//! # Passes
//!
//! 1. **Limits**: instruction count and bss size
//! 2. **Structural**: known opcodes, frame sizes, ARG and BLOCK_COPY immediates
//! 3. **Targets**: constant JUMP and CALL targets stay inside the code

pub mod error;
pub mod limits;
pub mod structural;
pub mod targets;

pub use error::VerifyError;
pub use limits::MAX_INSTRUCTIONS;

use qvm_common::Module;

/// Verify a module.
///
/// Returns `Ok(())` if the module passes all checks, or
/// `Err(Vec<VerifyError>)` with all errors found, in pass order.
pub fn verify(module: &Module) -> Result<(), Vec<VerifyError>> {
    let instrs = &module.instructions;
    let mut all_errors = Vec::new();

    // Pass 1: Limits
    all_errors.extend(limits::check_limits(module));

    // Pass 2: Structural
    all_errors.extend(structural::check_structural(instrs));

    // Pass 3: Targets
    all_errors.extend(targets::check_targets(instrs));

    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(all_errors)
    }
}

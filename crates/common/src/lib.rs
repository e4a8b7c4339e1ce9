//! QVM common types, instruction encoding and module loading.
//!
//! This crate provides the foundational pieces shared by the VM, the
//! verifier and the assembler:
//!
//! - [`Opcode`]: the 60 Quake III VM opcodes
//! - [`Instruction`]: the 32-bit word (8-bit opcode, 24-bit immediate)
//! - [`Header`]: the fixed nine-word module header
//! - [`Module`]: code, data, literals and bss size
//! - [`load`]: validate and parse a binary image
//! - [`LoadError`], [`DecodeError`]
//!
//! # Usage
//!
//! ```
//! use qvm_common::{load, Instruction, Module, Opcode};
//!
//! let module = Module::new(vec![
//!     Instruction::new(Opcode::Const, 2),
//!     Instruction::new(Opcode::Const, 3),
//!     Instruction::bare(Opcode::Add),
//! ]);
//! let loaded = load(&module.encode()).unwrap();
//! assert_eq!(loaded, module);
//! ```

pub mod error;
pub mod header;
pub mod instruction;
pub mod loader;
pub mod module;
pub mod opcode;

// Re-export commonly used types at the crate root.
pub use error::{DecodeError, LoadError};
pub use header::{Header, HEADER_SIZE, QVM_MAGIC};
pub use instruction::Instruction;
pub use loader::{load, MAX_BSS_LENGTH};
pub use module::Module;
pub use opcode::Opcode;

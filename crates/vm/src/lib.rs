//! QVM virtual machine: executes Quake III bytecode modules in a sandbox.
//!
//! The VM is a stack machine with:
//! - a byte-addressed memory arena holding data, literals, bss and the
//!   program stack, with every access bounds-checked
//! - a small operand stack of raw 32-bit values
//! - a syscall bridge that hands negative call targets to the host
//! - a watchdog and optional breakpoint for bounded execution
//!
//! # Usage
//!
//! ```
//! use qvm_common::{Instruction, Module, Opcode};
//! use qvm_vm::{run, Exit};
//!
//! let module = Module::new(vec![
//!     Instruction::new(Opcode::Const, 2),
//!     Instruction::new(Opcode::Const, 3),
//!     Instruction::bare(Opcode::Add),
//! ]);
//!
//! assert_eq!(run(&module).unwrap(), Exit::Return(5));
//! ```

pub mod error;
pub mod execute;
pub mod machine;
pub mod memory;
pub mod observer;
pub mod syscall;

pub use error::VmFault;
pub use machine::{
    CallFrame, Exit, Vm, VmConfig, DEFAULT_CYCLE_LIMIT, DEFAULT_MAX_MEMORY, DEFAULT_STACK_RESERVE,
    MIN_STACK_RESERVE, OPERAND_STACK_SIZE,
};
pub use memory::{Memory, MemoryError};
pub use observer::{Observer, Step, TracingObserver};
pub use qvm_common::{load, LoadError, Module};
pub use syscall::{from_fn, FnHandler, NoHost, Syscall, SyscallHandler, MAX_SYSCALL_ARGS};

/// Run `module` from instruction 0 with no arguments, the default
/// configuration and no syscall handler.
///
/// # Errors
///
/// Returns [`VmFault`] if the arena cannot be allocated or execution faults.
pub fn run(module: &Module) -> Result<Exit, VmFault> {
    let mut vm = Vm::new(module)?;
    vm.call(0, &[])
}

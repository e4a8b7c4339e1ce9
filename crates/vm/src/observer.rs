//! Per-instruction trace hook.
//!
//! Nothing is observed unless an [`Observer`] is installed with
//! [`Vm::set_observer`](crate::Vm::set_observer); the dispatch loop only
//! checks an `Option` otherwise.

use qvm_common::{Instruction, Opcode};

/// Machine state just before an instruction is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub ip: usize,
    pub instruction: Instruction,
    pub program_stack: u32,
    pub operand_depth: usize,
    /// Top operand, if any.
    pub top: Option<i32>,
}

pub trait Observer {
    fn on_step(&mut self, step: &Step);
}

/// Emits one `tracing` event per instruction at TRACE level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_step(&mut self, step: &Step) {
        let op = Opcode::try_from(step.instruction.op)
            .map(|op| op.mnemonic())
            .unwrap_or("???");
        tracing::trace!(
            ip = step.ip,
            op,
            imm = step.instruction.imm,
            ps = step.program_stack,
            depth = step.operand_depth,
            top = ?step.top,
        );
    }
}

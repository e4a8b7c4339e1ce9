//! Constant control-flow targets.
//!
//! Compiled QVM code loads jump and call targets with a CONST directly in
//! front of the JUMP or CALL. Those targets are known statically and must
//! name an instruction in the module. Computed targets are left to the VM,
//! which checks them at run time. Negative CALL targets are syscalls.

use crate::error::VerifyError;
use qvm_common::{Instruction, Opcode};

/// Run the target check.
pub fn check_targets(instrs: &[Instruction]) -> Vec<VerifyError> {
    let len = instrs.len();
    let in_range = |target: i32| usize::try_from(target).is_ok_and(|t| t < len);

    instrs
        .windows(2)
        .enumerate()
        .filter_map(|(i, pair)| {
            let (load, branch) = (pair[0], pair[1]);
            if load.opcode() != Ok(Opcode::Const) {
                return None;
            }
            let target = load.imm;
            let at = i + 1;
            match branch.opcode() {
                Ok(Opcode::Jump) if !in_range(target) => {
                    Some(VerifyError::JumpOutOfRange { at, target })
                }
                Ok(Opcode::Call) if target >= 0 && !in_range(target) => {
                    Some(VerifyError::CallOutOfRange { at, target })
                }
                _ => None,
            }
        })
        .collect()
}

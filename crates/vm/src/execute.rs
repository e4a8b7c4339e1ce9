//! Main execution loop and opcode dispatch for the QVM.

use crate::error::VmFault;
use crate::machine::{CallFrame, Exit, RunState, Vm};
use crate::observer::Step;
use crate::syscall::{SyscallFlow, SyscallHandler};
use qvm_common::{Instruction, Opcode};

/// What the loop does after one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Next,
    Goto(usize),
    Halt(Exit),
}

impl<'m, H: SyscallHandler> Vm<'m, H> {
    /// Call the function at instruction `entry` with `args` and run until it
    /// returns, the watchdog fires, a breakpoint is hit or a fault occurs.
    ///
    /// The operand stack, call history and cycle counter are cleared first.
    /// Memory is not: globals written by earlier calls stay visible. Use
    /// [`Vm::reset`] for a fresh image.
    pub fn call(&mut self, entry: usize, args: &[i32]) -> Result<Exit, VmFault> {
        if entry >= self.module.len() {
            return Err(VmFault::InstructionPointerOutOfRange { ip: entry });
        }

        self.operand_top = 0;
        self.call_history.clear();
        self.cycle_count = 0;
        self.state = RunState::Idle;
        self.program_stack = self.stack_top;
        self.ip = entry;

        tracing::debug!(entry, args = args.len(), "call");

        // Entry frame: args in declaration order above a zero return address.
        for &arg in args.iter().rev() {
            self.push_program_stack(arg)?;
        }
        self.push_program_stack(0)?;

        self.run(false)
    }

    /// Continue a run that stopped at the cycle limit or a breakpoint.
    ///
    /// The cycle counter restarts, so each resume gets a full budget. A
    /// breakpoint the run stopped at is stepped over once.
    pub fn resume(&mut self) -> Result<Exit, VmFault> {
        match self.state {
            RunState::Interrupted { at_breakpoint } => {
                self.cycle_count = 0;
                tracing::debug!(ip = self.ip, "resume");
                self.run(at_breakpoint)
            }
            RunState::Idle => Err(VmFault::NotResumable),
        }
    }

    fn push_program_stack(&mut self, value: i32) -> Result<(), VmFault> {
        self.adjust_program_stack(-4)?;
        self.memory
            .write_i32(self.program_stack, value)
            .map_err(self.mem_fault("CALL"))
    }

    fn run(&mut self, skip_breakpoint: bool) -> Result<Exit, VmFault> {
        let result = self.run_loop(skip_breakpoint);
        match &result {
            Ok(exit) if exit.is_interrupted() => {
                self.state = RunState::Interrupted {
                    at_breakpoint: matches!(exit, Exit::Breakpoint(_)),
                };
                tracing::debug!(?exit, ip = self.ip, cycles = self.cycle_count, "run interrupted");
            }
            Ok(exit) => {
                self.state = RunState::Idle;
                self.program_stack = self.stack_top;
                tracing::debug!(?exit, cycles = self.cycle_count, "call returned");
            }
            Err(fault) => {
                self.state = RunState::Idle;
                tracing::warn!(%fault, cycles = self.cycle_count, "vm fault");
            }
        }
        result
    }

    fn run_loop(&mut self, mut skip_breakpoint: bool) -> Result<Exit, VmFault> {
        loop {
            // Falling off the end of the code is a normal return.
            if self.ip == self.module.len() {
                return Ok(Exit::Return(self.top_or_zero()));
            }

            if self.cycle_count >= self.cycle_limit {
                return Ok(Exit::CycleLimit);
            }

            let skip = std::mem::take(&mut skip_breakpoint);
            if !skip && self.breakpoint == Some(self.ip) {
                return Ok(Exit::Breakpoint(self.ip));
            }

            let instr = self.fetch()?;

            if self.observer.is_some() {
                let step = Step {
                    ip: self.ip,
                    instruction: instr,
                    program_stack: self.program_stack,
                    operand_depth: self.operand_top,
                    top: self.operands().last().copied(),
                };
                if let Some(observer) = self.observer.as_mut() {
                    observer.on_step(&step);
                }
            }

            self.cycle_count += 1;

            match self.step(instr)? {
                Flow::Next => self.ip += 1,
                Flow::Goto(target) => self.ip = target,
                Flow::Halt(exit) => return Ok(exit),
            }
        }
    }

    /// Execute one instruction at `self.ip`.
    fn step(&mut self, instr: Instruction) -> Result<Flow, VmFault> {
        let at = self.ip;
        let op = Opcode::try_from(instr.op)
            .map_err(|_| VmFault::UnknownOpcode { at, opcode: instr.op })?;
        let imm = instr.imm;

        match op {
            // Control & frame
            Opcode::Undef => return Err(VmFault::UndefinedInstruction { at }),
            Opcode::Ignore => {}
            Opcode::Break => self.break_count += 1,
            Opcode::Enter => self.adjust_program_stack(-(imm as i64))?,
            Opcode::Leave => return self.exec_leave(imm),
            Opcode::Call => return self.exec_call(),
            Opcode::Push | Opcode::Const => self.push(imm)?,
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Local => self.push(self.program_stack.wrapping_add(imm as u32) as i32)?,
            Opcode::Jump => {
                let target = self.pop()?;
                let dest = self
                    .code_index(target)
                    .ok_or(VmFault::InvalidJumpTarget { at, target })?;
                return Ok(Flow::Goto(dest));
            }

            // Integer comparisons
            Opcode::Eq => self.compare(|a, b| a == b)?,
            Opcode::Ne => self.compare(|a, b| a != b)?,
            Opcode::Lti => self.compare(|a, b| a < b)?,
            Opcode::Lei => self.compare(|a, b| a <= b)?,
            Opcode::Gti => self.compare(|a, b| a > b)?,
            Opcode::Gei => self.compare(|a, b| a >= b)?,
            Opcode::Ltu => self.compare(|a, b| (a as u32) < (b as u32))?,
            Opcode::Leu => self.compare(|a, b| (a as u32) <= (b as u32))?,
            Opcode::Gtu => self.compare(|a, b| (a as u32) > (b as u32))?,
            Opcode::Geu => self.compare(|a, b| (a as u32) >= (b as u32))?,

            // Float comparisons
            Opcode::Eqf => self.compare_float(|a, b| a == b)?,
            Opcode::Nef => self.compare_float(|a, b| a != b)?,
            Opcode::Ltf => self.compare_float(|a, b| a < b)?,
            Opcode::Lef => self.compare_float(|a, b| a <= b)?,
            Opcode::Gtf => self.compare_float(|a, b| a > b)?,
            Opcode::Gef => self.compare_float(|a, b| a >= b)?,

            // Memory
            Opcode::Load1 => {
                let address = self.pop()? as u32;
                let v = self.memory.read_u8(address).map_err(self.mem_fault("LOAD1"))?;
                self.push(v as i32)?;
            }
            Opcode::Load2 => {
                let address = self.pop()? as u32;
                let v = self.memory.read_u16(address).map_err(self.mem_fault("LOAD2"))?;
                self.push(v as i32)?;
            }
            Opcode::Load4 => {
                let address = self.pop()? as u32;
                let v = self.memory.read_i32(address).map_err(self.mem_fault("LOAD4"))?;
                self.push(v)?;
            }
            Opcode::Store1 => {
                let value = self.pop()?;
                let address = self.pop()? as u32;
                self.memory
                    .write_u8(address, value as u8)
                    .map_err(self.mem_fault("STORE1"))?;
            }
            Opcode::Store2 => {
                let value = self.pop()?;
                let address = self.pop()? as u32;
                self.memory
                    .write_u16(address, value as u16)
                    .map_err(self.mem_fault("STORE2"))?;
            }
            Opcode::Store4 => {
                let value = self.pop()?;
                let address = self.pop()? as u32;
                self.memory
                    .write_i32(address, value)
                    .map_err(self.mem_fault("STORE4"))?;
            }
            Opcode::Arg => {
                let value = self.pop()?;
                let address = self.program_stack.wrapping_add(imm as u32);
                self.memory
                    .write_i32(address, value)
                    .map_err(self.mem_fault("ARG"))?;
            }
            Opcode::BlockCopy => {
                let src = self.pop()? as u32;
                let dst = self.pop()? as u32;
                self.memory
                    .copy(dst, src, imm as u32)
                    .map_err(self.mem_fault("BLOCK_COPY"))?;
            }

            // Integer arithmetic
            Opcode::Sex8 => self.unary(|a| a as i8 as i32)?,
            Opcode::Sex16 => self.unary(|a| a as i16 as i32)?,
            Opcode::Negi => self.unary(i32::wrapping_neg)?,
            Opcode::Add => self.binary(i32::wrapping_add)?,
            Opcode::Sub => self.binary(i32::wrapping_sub)?,
            Opcode::Divi => self.divide("DIVI", i32::wrapping_div)?,
            Opcode::Divu => self.divide("DIVU", |a, b| (a as u32 / b as u32) as i32)?,
            Opcode::Modi => self.divide("MODI", i32::wrapping_rem)?,
            Opcode::Modu => self.divide("MODU", |a, b| (a as u32 % b as u32) as i32)?,
            // Low 32 bits of a product do not depend on signedness.
            Opcode::Muli | Opcode::Mulu => self.binary(i32::wrapping_mul)?,

            // Bitwise
            Opcode::Band => self.binary(|a, b| a & b)?,
            Opcode::Bor => self.binary(|a, b| a | b)?,
            Opcode::Bxor => self.binary(|a, b| a ^ b)?,
            Opcode::Bcom => self.unary(|a| !a)?,
            Opcode::Lsh => self.binary(|a, b| a.wrapping_shl(b as u32))?,
            Opcode::Rshi => self.binary(|a, b| a.wrapping_shr(b as u32))?,
            Opcode::Rshu => self.binary(|a, b| (a as u32).wrapping_shr(b as u32) as i32)?,

            // Float arithmetic
            Opcode::Negf => self.unary(|a| float_bits(-as_float(a)))?,
            Opcode::Addf => self.binary_float(|a, b| a + b)?,
            Opcode::Subf => self.binary_float(|a, b| a - b)?,
            Opcode::Divf => self.binary_float(|a, b| a / b)?,
            Opcode::Mulf => self.binary_float(|a, b| a * b)?,
            Opcode::Cvif => self.unary(|a| float_bits(a as f32))?,
            Opcode::Cvfi => self.unary(|a| as_float(a) as i32)?,
        }

        Ok(Flow::Next)
    }

    // ---- Calls ----

    fn exec_call(&mut self) -> Result<Flow, VmFault> {
        let at = self.ip;
        let target = self.pop()?;

        if target < 0 {
            return match self.dispatch_syscall(target.wrapping_neg())? {
                SyscallFlow::Continue => Ok(Flow::Next),
                SyscallFlow::Exit(value) => Ok(Flow::Halt(Exit::HostExit(value))),
            };
        }

        let dest = self
            .code_index(target)
            .ok_or(VmFault::InvalidCallTarget { at, target })?;

        // ip + 1 is at least 1, so it can never be mistaken for the sentinel.
        self.memory
            .write_i32(self.program_stack, at as i32 + 1)
            .map_err(self.mem_fault("CALL"))?;
        self.call_history.push(CallFrame {
            return_ip: at + 1,
            program_stack: self.program_stack,
            operand_depth: self.operand_top,
        });
        Ok(Flow::Goto(dest))
    }

    fn exec_leave(&mut self, imm: i32) -> Result<Flow, VmFault> {
        let at = self.ip;
        self.adjust_program_stack(imm as i64)?;
        let address = self
            .memory
            .read_i32(self.program_stack)
            .map_err(self.mem_fault("LEAVE"))?;
        self.call_history.pop();

        if address == 0 {
            return Ok(Flow::Halt(Exit::Return(self.top_or_zero())));
        }

        // A CALL in the last slot returns to one past the end, which the
        // loop treats as a normal return.
        match usize::try_from(address) {
            Ok(dest) if dest <= self.module.len() => Ok(Flow::Goto(dest)),
            _ => Err(VmFault::InvalidReturnAddress { at, address }),
        }
    }

    fn code_index(&self, target: i32) -> Option<usize> {
        usize::try_from(target)
            .ok()
            .filter(|&t| t < self.module.len())
    }

    // ---- Operand helpers ----

    fn unary(&mut self, op: impl FnOnce(i32) -> i32) -> Result<(), VmFault> {
        let a = self.pop()?;
        self.push(op(a))
    }

    fn binary(&mut self, op: impl FnOnce(i32, i32) -> i32) -> Result<(), VmFault> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(op(a, b))
    }

    fn binary_float(&mut self, op: impl FnOnce(f32, f32) -> f32) -> Result<(), VmFault> {
        self.binary(|a, b| float_bits(op(as_float(a), as_float(b))))
    }

    fn compare(&mut self, op: impl FnOnce(i32, i32) -> bool) -> Result<(), VmFault> {
        self.binary(|a, b| op(a, b) as i32)
    }

    fn compare_float(&mut self, op: impl FnOnce(f32, f32) -> bool) -> Result<(), VmFault> {
        self.binary(|a, b| op(as_float(a), as_float(b)) as i32)
    }

    fn divide(
        &mut self,
        opcode: &'static str,
        op: impl FnOnce(i32, i32) -> i32,
    ) -> Result<(), VmFault> {
        let b = self.pop()?;
        let a = self.pop()?;
        if b == 0 {
            return Err(VmFault::DivisionByZero { at: self.ip, opcode });
        }
        self.push(op(a, b))
    }
}

fn as_float(bits: i32) -> f32 {
    f32::from_bits(bits as u32)
}

fn float_bits(value: f32) -> i32 {
    value.to_bits() as i32
}

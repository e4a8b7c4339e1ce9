//! VM state: memory arena, registers, operand stack and configuration.

use crate::error::VmFault;
use crate::memory::{Memory, MemoryError};
use crate::observer::Observer;
use crate::syscall::{NoHost, SyscallHandler};
use qvm_common::{Instruction, Module, MAX_BSS_LENGTH};

/// Operand stack capacity in 32-bit entries.
pub const OPERAND_STACK_SIZE: usize = 256;

/// Default program stack reservation (64 KiB).
pub const DEFAULT_STACK_RESERVE: u32 = 64 * 1024;

/// Smallest stack reservation a VM will accept. Smaller requests are raised
/// to this so the entry frame and a full syscall argument block always fit.
pub const MIN_STACK_RESERVE: u32 = 256;

/// Default watchdog budget in executed instructions.
pub const DEFAULT_CYCLE_LIMIT: u64 = 50_000_000;

/// Default address-space ceiling (64 MiB).
pub const DEFAULT_MAX_MEMORY: u64 = 64 * 1024 * 1024;

/// Addresses are 32-bit; the arena must stay word-aligned below 4 GiB.
const MAX_ADDRESS_SPACE: u64 = u32::MAX as u64 & !3;

/// Tunables for a VM instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Bytes reserved above bss for the program stack.
    pub stack_reserve: u32,
    /// Instructions a single run may execute before it is interrupted.
    pub cycle_limit: u64,
    /// Largest arena the VM may allocate.
    pub max_memory: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_reserve: DEFAULT_STACK_RESERVE,
            cycle_limit: DEFAULT_CYCLE_LIMIT,
            max_memory: DEFAULT_MAX_MEMORY,
        }
    }
}

impl VmConfig {
    pub fn with_stack_reserve(mut self, bytes: u32) -> Self {
        self.stack_reserve = bytes;
        self
    }

    pub fn with_cycle_limit(mut self, cycles: u64) -> Self {
        self.cycle_limit = cycles;
        self
    }

    pub fn with_max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = bytes;
        self
    }
}

/// A record of one bytecode-level call, kept for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    /// Instruction index LEAVE will return to.
    pub return_ip: usize,
    /// Program stack at the CALL.
    pub program_stack: u32,
    /// Operand stack depth at the CALL.
    pub operand_depth: usize,
}

/// How a run ended without faulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Returned through the entry sentinel or ran off the end of the code.
    /// Carries the top operand (0 if the stack was empty).
    Return(i32),
    /// A syscall handler requested an early return with this value.
    HostExit(i32),
    /// The watchdog fired. The run can be resumed.
    CycleLimit,
    /// The breakpoint at this instruction index was reached. The run can be
    /// resumed.
    Breakpoint(usize),
}

impl Exit {
    /// The value the program produced, if it finished.
    pub fn value(&self) -> Option<i32> {
        match self {
            Exit::Return(v) | Exit::HostExit(v) => Some(*v),
            Exit::CycleLimit | Exit::Breakpoint(_) => None,
        }
    }

    /// Whether the run stopped at an iteration boundary and may be resumed.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Exit::CycleLimit | Exit::Breakpoint(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    Idle,
    Interrupted { at_breakpoint: bool },
}

/// A QVM instance.
///
/// Borrows its [`Module`] read-only, so one module can back any number of
/// VMs. Owns its memory arena exclusively.
pub struct Vm<'m, H = NoHost> {
    pub(crate) module: &'m Module,
    pub(crate) memory: Memory,
    pub(crate) host: H,
    /// Instruction pointer (index into the code segment).
    pub(crate) ip: usize,
    /// Byte offset of the current frame in `memory`.
    pub(crate) program_stack: u32,
    pub(crate) operands: [i32; OPERAND_STACK_SIZE],
    pub(crate) operand_top: usize,
    pub(crate) call_history: Vec<CallFrame>,
    pub(crate) cycle_count: u64,
    pub(crate) cycle_limit: u64,
    pub(crate) breakpoint: Option<usize>,
    pub(crate) observer: Option<Box<dyn Observer + Send>>,
    pub(crate) break_count: u64,
    pub(crate) state: RunState,
    /// Lowest address the program stack may reach (end of bss).
    pub(crate) stack_bottom: u32,
    /// Initial program stack: one word below the end of the arena.
    pub(crate) stack_top: u32,
}

impl<'m> Vm<'m, NoHost> {
    /// Create a VM with the default configuration and no syscall handler.
    pub fn new(module: &'m Module) -> Result<Self, VmFault> {
        Self::with_config(module, VmConfig::default())
    }

    /// Create a VM with an explicit configuration and no syscall handler.
    pub fn with_config(module: &'m Module, config: VmConfig) -> Result<Self, VmFault> {
        Vm::with_host(module, config, NoHost)
    }
}

impl<'m, H: SyscallHandler> Vm<'m, H> {
    /// Create a VM whose syscalls are served by `host`.
    ///
    /// Allocates the arena as `[data][literals][bss][stack]`, rounded up to
    /// a word boundary, and copies in the initialized segments.
    pub fn with_host(module: &'m Module, config: VmConfig, host: H) -> Result<Self, VmFault> {
        if module.is_empty() {
            return Err(VmFault::InstructionPointerOutOfRange { ip: 0 });
        }

        let stack_reserve = config.stack_reserve.max(MIN_STACK_RESERVE) as u64;
        let image = module.image_size();
        let limit = config.max_memory.min(MAX_ADDRESS_SPACE);
        let required = round_up_4(image + stack_reserve);
        if module.bss_length > MAX_BSS_LENGTH || required > limit {
            return Err(VmFault::ArenaTooLarge { required, limit });
        }

        let size = required as u32;
        let mut vm = Self {
            module,
            memory: Memory::new(size),
            host,
            ip: 0,
            program_stack: size - 4,
            operands: [0; OPERAND_STACK_SIZE],
            operand_top: 0,
            call_history: Vec::new(),
            cycle_count: 0,
            cycle_limit: config.cycle_limit,
            breakpoint: None,
            observer: None,
            break_count: 0,
            state: RunState::Idle,
            stack_bottom: round_up_4(image) as u32,
            stack_top: size - 4,
        };
        vm.load_image();

        tracing::debug!(
            instructions = module.len(),
            memory = size,
            stack_bottom = vm.stack_bottom,
            "vm created"
        );
        Ok(vm)
    }

    /// Return the VM to its just-constructed state without re-reading the
    /// module: registers cleared, bss and stack zeroed, data and literals
    /// restored. Breakpoint, cycle limit, observer and host are kept.
    pub fn reset(&mut self) {
        self.memory.clear();
        self.load_image();
        self.ip = 0;
        self.program_stack = self.stack_top;
        self.operands = [0; OPERAND_STACK_SIZE];
        self.operand_top = 0;
        self.call_history.clear();
        self.cycle_count = 0;
        self.break_count = 0;
        self.state = RunState::Idle;
        tracing::debug!("vm reset");
    }

    fn load_image(&mut self) {
        let data_len = self.module.data.len();
        let bytes = &mut self.memory;
        // Both writes fit: the arena was sized from these lengths.
        if let Ok(dst) = bytes.slice_mut(0, data_len as u32) {
            dst.copy_from_slice(&self.module.data);
        }
        if let Ok(dst) = bytes.slice_mut(data_len as u32, self.module.literals.len() as u32) {
            dst.copy_from_slice(&self.module.literals);
        }
    }

    // ---- Accessors ----

    pub fn module(&self) -> &'m Module {
        self.module
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Give up the VM and keep its syscall handler.
    pub fn into_host(self) -> H {
        self.host
    }

    pub fn instruction_pointer(&self) -> usize {
        self.ip
    }

    pub fn program_stack(&self) -> u32 {
        self.program_stack
    }

    /// Live operand stack, bottom first.
    pub fn operands(&self) -> &[i32] {
        &self.operands[..self.operand_top]
    }

    pub fn call_history(&self) -> &[CallFrame] {
        &self.call_history
    }

    /// Instructions executed since the current run started.
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn cycle_limit(&self) -> u64 {
        self.cycle_limit
    }

    pub fn set_cycle_limit(&mut self, cycles: u64) {
        self.cycle_limit = cycles;
    }

    /// Number of BREAK instructions executed since the last reset.
    pub fn break_count(&self) -> u64 {
        self.break_count
    }

    /// Stop before executing the instruction at `ip`.
    pub fn set_breakpoint(&mut self, ip: usize) {
        self.breakpoint = Some(ip);
    }

    pub fn clear_breakpoint(&mut self) {
        self.breakpoint = None;
    }

    pub fn breakpoint(&self) -> Option<usize> {
        self.breakpoint
    }

    /// Install a per-instruction observer. Off by default.
    pub fn set_observer(&mut self, observer: Box<dyn Observer + Send>) {
        self.observer = Some(observer);
    }

    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    /// Read a NUL-terminated string from VM memory.
    pub fn read_string(&self, address: u32, max_len: u32) -> Result<String, MemoryError> {
        self.memory.read_string(address, max_len)
    }

    /// Write a NUL-terminated string into VM memory, truncating to `max_len`.
    pub fn write_string(
        &mut self,
        address: u32,
        text: &str,
        max_len: u32,
    ) -> Result<usize, MemoryError> {
        self.memory.write_string(address, text, max_len)
    }

    // ---- Internal helpers ----

    /// Push onto the operand stack, checking for overflow.
    pub(crate) fn push(&mut self, value: i32) -> Result<(), VmFault> {
        if self.operand_top >= OPERAND_STACK_SIZE {
            return Err(VmFault::OperandStackOverflow { at: self.ip });
        }
        self.operands[self.operand_top] = value;
        self.operand_top += 1;
        Ok(())
    }

    /// Pop from the operand stack.
    pub(crate) fn pop(&mut self) -> Result<i32, VmFault> {
        if self.operand_top == 0 {
            return Err(VmFault::OperandStackUnderflow { at: self.ip });
        }
        self.operand_top -= 1;
        Ok(self.operands[self.operand_top])
    }

    /// Top operand, or 0 when the stack is empty.
    pub(crate) fn top_or_zero(&self) -> i32 {
        self.operands().last().copied().unwrap_or(0)
    }

    /// Fetch the instruction at the current ip.
    pub(crate) fn fetch(&self) -> Result<Instruction, VmFault> {
        self.module
            .instructions
            .get(self.ip)
            .copied()
            .ok_or(VmFault::InstructionPointerOutOfRange { ip: self.ip })
    }

    /// Turn a memory error into a fault at the current instruction.
    pub(crate) fn mem_fault(&self, opcode: &'static str) -> impl Fn(MemoryError) -> VmFault {
        let at = self.ip;
        move |e| VmFault::OutOfBounds {
            at,
            opcode,
            address: e.address,
            len: e.len,
        }
    }

    /// Move the program stack by `delta` bytes, keeping it inside the
    /// stack region.
    pub(crate) fn adjust_program_stack(&mut self, delta: i64) -> Result<(), VmFault> {
        let next = self.program_stack as i64 + delta;
        if next < self.stack_bottom as i64 {
            return Err(VmFault::ProgramStackOverflow {
                at: self.ip,
                program_stack: next,
            });
        }
        if next > self.stack_top as i64 {
            return Err(VmFault::ProgramStackUnderflow {
                at: self.ip,
                program_stack: next,
            });
        }
        self.program_stack = next as u32;
        Ok(())
    }
}

fn round_up_4(n: u64) -> u64 {
    (n + 3) & !3
}

//! Syscall bridge: the only path from bytecode to the host.
//!
//! A `CALL` whose popped target is negative invokes syscall `-target`. The
//! bridge gathers up to [`MAX_SYSCALL_ARGS`] words from the program stack
//! (first argument at `[ps + 4]`) without writing to program memory, and
//! hands them to the installed
//! [`SyscallHandler`]. A returned value is pushed onto the operand stack and
//! execution continues after the `CALL`.
//!
//! What each id means is entirely up to the handler. Ids it does not know
//! are still delivered to it; the VM never faults on an unknown id.

use crate::error::VmFault;
use crate::machine::Vm;
use crate::memory::{Memory, MemoryError};

/// Words read from the program stack for every syscall.
pub const MAX_SYSCALL_ARGS: usize = 12;

/// Host-side implementation of the syscall table.
pub trait SyscallHandler {
    /// Serve one syscall. `Some(v)` pushes `v`; `None` leaves the operand
    /// stack untouched.
    fn syscall(&mut self, call: &mut Syscall<'_>) -> Option<i32>;
}

/// Handler for VMs that were given none: every syscall is logged and
/// returns nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHost;

impl SyscallHandler for NoHost {
    fn syscall(&mut self, call: &mut Syscall<'_>) -> Option<i32> {
        tracing::warn!(id = call.id(), "unhandled syscall");
        None
    }
}

/// Adapter that lets a closure serve as a [`SyscallHandler`].
pub struct FnHandler<F>(F);

/// Wrap a closure as a syscall handler.
///
/// ```
/// use qvm_vm::{from_fn, Syscall};
///
/// let host = from_fn(|call: &mut Syscall<'_>| Some(call.arg(0) * 2));
/// # let _ = host;
/// ```
pub fn from_fn<F>(f: F) -> FnHandler<F>
where
    F: FnMut(&mut Syscall<'_>) -> Option<i32>,
{
    FnHandler(f)
}

impl<F> SyscallHandler for FnHandler<F>
where
    F: FnMut(&mut Syscall<'_>) -> Option<i32>,
{
    fn syscall(&mut self, call: &mut Syscall<'_>) -> Option<i32> {
        (self.0)(call)
    }
}

/// What the handler asked the VM to do after returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Directive {
    Continue,
    Exit(i32),
    Abort(String),
}

/// One syscall in flight: its id, its arguments and the VM memory.
pub struct Syscall<'a> {
    id: i32,
    args: &'a [i32],
    memory: &'a mut Memory,
    directive: Directive,
}

impl<'a> Syscall<'a> {
    /// Build a context by hand, for driving a handler outside a VM.
    pub fn new(id: i32, args: &'a [i32], memory: &'a mut Memory) -> Self {
        Self {
            id,
            args,
            memory,
            directive: Directive::Continue,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Every argument word that was read, in declaration order.
    pub fn args(&self) -> &[i32] {
        self.args
    }

    /// Argument `index`, or 0 if the stack did not hold that many words.
    pub fn arg(&self, index: usize) -> i32 {
        self.args.get(index).copied().unwrap_or(0)
    }

    /// Argument `index` as an unsigned value (pointers, sizes).
    pub fn arg_u32(&self, index: usize) -> u32 {
        self.arg(index) as u32
    }

    /// Argument `index` reinterpreted as an IEEE-754 float.
    pub fn arg_f32(&self, index: usize) -> f32 {
        f32::from_bits(self.arg_u32(index))
    }

    pub fn memory(&self) -> &Memory {
        self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        self.memory
    }

    /// Host view of `len` bytes at VM address `address`.
    pub fn host_range(&self, address: u32, len: u32) -> Result<&[u8], MemoryError> {
        self.memory.slice(address, len)
    }

    /// Mutable host view of `len` bytes at VM address `address`.
    pub fn host_range_mut(&mut self, address: u32, len: u32) -> Result<&mut [u8], MemoryError> {
        self.memory.slice_mut(address, len)
    }

    pub fn read_string(&self, address: u32, max_len: u32) -> Result<String, MemoryError> {
        self.memory.read_string(address, max_len)
    }

    pub fn write_string(
        &mut self,
        address: u32,
        text: &str,
        max_len: u32,
    ) -> Result<usize, MemoryError> {
        self.memory.write_string(address, text, max_len)
    }

    /// End the run once the handler returns, with `value` as its result.
    /// Any value the handler returns is still pushed first.
    pub fn request_exit(&mut self, value: i32) {
        self.directive = Directive::Exit(value);
    }

    /// Fail the run with [`VmFault::HostAbort`] once the handler returns.
    pub fn abort(&mut self, message: impl Into<String>) {
        self.directive = Directive::Abort(message.into());
    }

    pub(crate) fn into_directive(self) -> Directive {
        self.directive
    }
}

/// How the dispatch loop should continue after a syscall.
pub(crate) enum SyscallFlow {
    Continue,
    Exit(i32),
}

impl<'m, H: SyscallHandler> Vm<'m, H> {
    /// Run syscall `id` for the CALL at the current instruction.
    pub(crate) fn dispatch_syscall(&mut self, id: i32) -> Result<SyscallFlow, VmFault> {
        let at = self.ip;
        let ps = self.program_stack;

        // [ps] is left alone; in an entry frame it holds the halt sentinel.
        let mut args = [0i32; MAX_SYSCALL_ARGS];
        let mut count = 0;
        for slot in args.iter_mut() {
            let address = ps as u64 + 4 + 4 * count as u64;
            match u32::try_from(address).ok().map(|a| self.memory.read_i32(a)) {
                Some(Ok(word)) => *slot = word,
                _ => break,
            }
            count += 1;
        }

        tracing::debug!(id, at, args = ?&args[..count], "syscall");

        let mut call = Syscall::new(id, &args[..count], &mut self.memory);
        let result = self.host.syscall(&mut call);
        let directive = call.into_directive();

        if let Some(value) = result {
            self.push(value)?;
        }

        match directive {
            Directive::Continue => Ok(SyscallFlow::Continue),
            Directive::Exit(value) => Ok(SyscallFlow::Exit(value)),
            Directive::Abort(message) => Err(VmFault::HostAbort {
                at,
                syscall: id,
                message,
            }),
        }
    }
}

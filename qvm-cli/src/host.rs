//! Console syscall host used by `qvm run`.
//!
//! | id | name         | arguments          | result |
//! |----|--------------|--------------------|--------|
//! | 1  | PRINT        | `(str)`            | 0      |
//! | 2  | ERROR        | `(str)`            | aborts |
//! | 3  | MILLISECONDS | none               | ms     |
//! | 4  | MEMSET       | `(dst, byte, n)`   | dst    |
//! | 5  | MEMCPY       | `(dst, src, n)`    | dst    |
//! | 6  | STRNCPY      | `(dst, src, n)`    | dst    |
//! | 7  | EXIT         | `(code)`           | exits  |

use std::io::Write;
use std::time::Instant;

use qvm_vm::{MemoryError, Syscall, SyscallHandler};
use tracing::warn;

pub const SYS_PRINT: i32 = 1;
pub const SYS_ERROR: i32 = 2;
pub const SYS_MILLISECONDS: i32 = 3;
pub const SYS_MEMSET: i32 = 4;
pub const SYS_MEMCPY: i32 = 5;
pub const SYS_STRNCPY: i32 = 6;
pub const SYS_EXIT: i32 = 7;

/// Longest string PRINT and ERROR will read.
const MAX_STRING: u32 = 4096;

/// Syscall host that prints to a writer.
pub struct ConsoleHost<W> {
    out: W,
    started: Instant,
}

impl<W: Write> ConsoleHost<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            started: Instant::now(),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn print(&mut self, call: &mut Syscall<'_>) -> Result<i32, String> {
        let text = call
            .read_string(call.arg_u32(0), MAX_STRING)
            .map_err(|e| e.to_string())?;
        self.out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush())
            .map_err(|e| format!("console write failed: {e}"))?;
        Ok(0)
    }
}

impl<W: Write> SyscallHandler for ConsoleHost<W> {
    fn syscall(&mut self, call: &mut Syscall<'_>) -> Option<i32> {
        let result = match call.id() {
            SYS_PRINT => self.print(call),
            SYS_ERROR => {
                let message = call
                    .read_string(call.arg_u32(0), MAX_STRING)
                    .unwrap_or_else(|e| e.to_string());
                call.abort(message);
                return None;
            }
            SYS_MILLISECONDS => Ok(self.started.elapsed().as_millis() as i32),
            SYS_MEMSET => memset(call).map_err(|e| e.to_string()),
            SYS_MEMCPY => memcpy(call).map_err(|e| e.to_string()),
            SYS_STRNCPY => strncpy(call).map_err(|e| e.to_string()),
            SYS_EXIT => {
                call.request_exit(call.arg(0));
                return None;
            }
            id => {
                warn!(syscall = id, "unknown syscall");
                return None;
            }
        };

        match result {
            Ok(value) => Some(value),
            Err(message) => {
                call.abort(message);
                None
            }
        }
    }
}

fn memset(call: &mut Syscall<'_>) -> Result<i32, MemoryError> {
    let (dst, byte, len) = (call.arg_u32(0), call.arg(1) as u8, call.arg_u32(2));
    call.host_range_mut(dst, len)?.fill(byte);
    Ok(dst as i32)
}

fn memcpy(call: &mut Syscall<'_>) -> Result<i32, MemoryError> {
    let (dst, src, len) = (call.arg_u32(0), call.arg_u32(1), call.arg_u32(2));
    call.memory_mut().copy(dst, src, len)?;
    Ok(dst as i32)
}

/// C `strncpy`: copy up to `n` bytes, stop at NUL, zero-fill the rest.
fn strncpy(call: &mut Syscall<'_>) -> Result<i32, MemoryError> {
    let (dst, src, len) = (call.arg_u32(0), call.arg_u32(1), call.arg_u32(2));
    let size = call.memory().size();
    call.memory().check(dst, len)?;

    let window = call.host_range(src, len.min(size.saturating_sub(src)))?;
    let copied = match window.iter().position(|&b| b == 0) {
        Some(nul) => nul as u32,
        None if window.len() == len as usize => len,
        None => {
            return Err(MemoryError {
                address: src,
                len,
                size,
            })
        }
    };

    // dst + len was checked above, so neither end can overflow.
    let memory = call.memory_mut();
    memory.copy(dst, src, copied)?;
    memory.slice_mut(dst + copied, len - copied)?.fill(0);
    Ok(dst as i32)
}

//! The VM's flat byte arena.
//!
//! Every access from bytecode, from the syscall bridge and from the host
//! goes through [`Memory::check`]. A failed check happens before any byte
//! is touched, so an out-of-range store or copy leaves the arena unchanged.

use thiserror::Error;

/// A bounds-check failure: `len` bytes at `address` do not fit in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("access of {len} bytes at {address:#x} outside memory of {size} bytes")]
pub struct MemoryError {
    pub address: u32,
    pub len: u32,
    pub size: u32,
}

/// Owned, fixed-size, little-endian byte arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    /// Zero-filled arena of `size` bytes.
    pub fn new(size: u32) -> Self {
        Self {
            bytes: vec![0; size as usize],
        }
    }

    /// Arena size in bytes.
    pub fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// The whole arena.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Zero every byte.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Validate `len` bytes at `address` and return the start index.
    pub fn check(&self, address: u32, len: u32) -> Result<usize, MemoryError> {
        let end = address as u64 + len as u64;
        if end > self.bytes.len() as u64 {
            return Err(MemoryError {
                address,
                len,
                size: self.size(),
            });
        }
        Ok(address as usize)
    }

    /// Borrow `len` bytes at `address`. This is the VM-to-host address
    /// translation: the returned slice is the host view of that range.
    pub fn slice(&self, address: u32, len: u32) -> Result<&[u8], MemoryError> {
        let start = self.check(address, len)?;
        Ok(&self.bytes[start..start + len as usize])
    }

    /// Mutable variant of [`Memory::slice`].
    pub fn slice_mut(&mut self, address: u32, len: u32) -> Result<&mut [u8], MemoryError> {
        let start = self.check(address, len)?;
        Ok(&mut self.bytes[start..start + len as usize])
    }

    fn array<const N: usize>(&self, address: u32) -> Result<[u8; N], MemoryError> {
        let start = self.check(address, N as u32)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[start..start + N]);
        Ok(out)
    }

    pub fn read_u8(&self, address: u32) -> Result<u8, MemoryError> {
        Ok(self.array::<1>(address)?[0])
    }

    pub fn read_u16(&self, address: u32) -> Result<u16, MemoryError> {
        Ok(u16::from_le_bytes(self.array(address)?))
    }

    pub fn read_i32(&self, address: u32) -> Result<i32, MemoryError> {
        Ok(i32::from_le_bytes(self.array(address)?))
    }

    pub fn write_u8(&mut self, address: u32, value: u8) -> Result<(), MemoryError> {
        self.write_bytes(address, &[value])
    }

    pub fn write_u16(&mut self, address: u32, value: u16) -> Result<(), MemoryError> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn write_i32(&mut self, address: u32, value: i32) -> Result<(), MemoryError> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    /// Copy `bytes` into the arena at `address`.
    pub fn write_bytes(&mut self, address: u32, bytes: &[u8]) -> Result<(), MemoryError> {
        self.slice_mut(address, bytes.len() as u32)?
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Copy `len` bytes from `src` to `dst`. Overlapping ranges behave like
    /// `memmove`. Both ranges are checked before anything moves.
    pub fn copy(&mut self, dst: u32, src: u32, len: u32) -> Result<(), MemoryError> {
        let src_start = self.check(src, len)?;
        let dst_start = self.check(dst, len)?;
        self.bytes
            .copy_within(src_start..src_start + len as usize, dst_start);
        Ok(())
    }

    /// Read a NUL-terminated string of at most `max_len` bytes.
    ///
    /// Stops at the first NUL or after `max_len` bytes, whichever comes
    /// first. Running into the end of the arena before either is an error.
    /// Invalid UTF-8 is replaced, since module strings are plain bytes.
    pub fn read_string(&self, address: u32, max_len: u32) -> Result<String, MemoryError> {
        let start = self.check(address, 0)?;
        let available = self.bytes.len() - start;
        let window = &self.bytes[start..start + available.min(max_len as usize)];

        match window.iter().position(|&b| b == 0) {
            Some(nul) => Ok(String::from_utf8_lossy(&window[..nul]).into_owned()),
            None if window.len() == max_len as usize => {
                Ok(String::from_utf8_lossy(window).into_owned())
            }
            None => Err(MemoryError {
                address,
                len: max_len,
                size: self.size(),
            }),
        }
    }

    /// Write `text` plus a terminating NUL into a buffer of `max_len` bytes.
    ///
    /// Text longer than `max_len - 1` bytes is truncated. Returns the number
    /// of text bytes written (excluding the NUL). A zero-length buffer
    /// receives nothing.
    pub fn write_string(
        &mut self,
        address: u32,
        text: &str,
        max_len: u32,
    ) -> Result<usize, MemoryError> {
        if max_len == 0 {
            return Ok(0);
        }
        let n = text.len().min(max_len as usize - 1);
        let dst = self.slice_mut(address, n as u32 + 1)?;
        dst[..n].copy_from_slice(&text.as_bytes()[..n]);
        dst[n] = 0;
        Ok(n)
    }
}

//! # Buffer
//!
//! A growable byte region with independent read and write offsets.
//!
//! ## Invariants
//! - `read <= data.len()` at all times; `data.len()` is the write offset.
//! - Reads never partially consume: either all requested bytes are returned and the
//!   read offset advances, or `Error::Underflow` is returned and nothing moves.

use crate::error::Error;
use crate::error::Result;

/// A saved read position, restored with [`Buffer::rewind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mark {
    pos: usize,
}

/// Growable byte sequence with read and write cursors.
///
/// A buffer is owned by exactly one protocol or transport at a time. It carries no
/// synchronization.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    data: Vec<u8>,
    read: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self { data: Vec::new(), read: 0 }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { data: Vec::with_capacity(cap), read: 0 }
    }

    /// Wraps existing bytes; the read offset starts at zero.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, read: 0 }
    }

    pub fn read_offset(&self) -> usize {
        self.read
    }

    pub fn write_offset(&self) -> usize {
        self.data.len()
    }

    /// Bytes written but not yet read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// The unread bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.read..]
    }

    /// Every byte written since the last reset, read or not.
    pub fn written(&self) -> &[u8] {
        &self.data
    }

    /// Appends bytes at the write offset, growing geometrically.
    pub fn write(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, b: u8) {
        self.data.push(b);
    }

    /// Restores both offsets to zero, keeping the allocation.
    pub fn reset(&mut self) {
        self.data.clear();
        self.read = 0;
    }

    /// Discards written bytes past `write_offset`. Used to roll back a failed encode.
    pub fn truncate(&mut self, write_offset: usize) {
        self.data.truncate(write_offset);
        self.read = self.read.min(self.data.len());
    }

    /// Drops consumed bytes from the front. Returns the number of bytes freed.
    ///
    /// Any `Mark` taken before compaction is invalidated.
    pub fn compact(&mut self) -> usize {
        let freed = self.read;
        if freed > 0 {
            self.data.drain(..freed);
            self.read = 0;
        }
        freed
    }

    pub fn mark(&self) -> Mark {
        Mark { pos: self.read }
    }

    /// Moves the read offset back to `mark`.
    pub fn rewind(&mut self, mark: Mark) {
        debug_assert!(mark.pos <= self.data.len());
        self.read = mark.pos.min(self.data.len());
    }

    /// Runs `f`, rewinding the read offset if it fails.
    pub fn transact<T>(&mut self, f: impl FnOnce(&mut Buffer) -> Result<T>) -> Result<T> {
        let mark = self.mark();
        let result = f(self);
        if result.is_err() {
            self.rewind(mark);
        }
        result
    }

    #[inline]
    fn need(&self, n: usize) -> Result<()> {
        let available = self.remaining();
        if n > available {
            Err(Error::Underflow { needed: n, available })
        } else {
            Ok(())
        }
    }

    /// Returns the next `n` bytes and advances past them.
    pub fn read(&mut self, n: usize) -> Result<&[u8]> {
        self.need(n)?;
        let start = self.read;
        self.read += n;
        Ok(&self.data[start..start + n])
    }

    /// Returns the next `n` bytes without advancing.
    pub fn peek(&self, n: usize) -> Result<&[u8]> {
        self.need(n)?;
        Ok(&self.data[self.read..self.read + n])
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.need(n)?;
        self.read += n;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        let b = self.data[self.read];
        self.read += 1;
        Ok(b)
    }

    /// Reads exactly `N` bytes into an array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.need(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.read..self.read + N]);
        self.read += N;
        Ok(out)
    }
}

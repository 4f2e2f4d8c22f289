//! Bounds-checked little-endian reader over a borrowed byte buffer.

use bytemuck::Pod;

use crate::error::{BookError, BookResult};

/// Sequential reader. Every successful read advances the position by exactly
/// the number of bytes consumed; a failed read leaves it where it was.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    position: usize,
}

macro_rules! read_le {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self) -> BookResult<$ty> {
                self.read_array().map(<$ty>::from_le_bytes)
            }
        )*
    };
}

#[allow(missing_docs)]
impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// The unread tail of the buffer, without consuming it.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.position..]
    }

    pub fn read_bytes(&mut self, len: usize) -> BookResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(BookError::BufferTooShort {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> BookResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Copies a `Pod` record out of the buffer. Account data carries no
    /// alignment guarantee, so this never casts in place.
    pub fn read_pod<T: Pod>(&mut self) -> BookResult<T> {
        let bytes = self.read_bytes(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn skip(&mut self, len: usize) -> BookResult {
        self.read_bytes(len).map(|_| ())
    }

    read_le! {
        read_u8 => u8,
        read_i8 => i8,
        read_u16 => u16,
        read_i16 => i16,
        read_u32 => u32,
        read_i32 => i32,
        read_u64 => u64,
        read_i64 => i64,
        read_u128 => u128,
        read_i128 => i128,
    }
}

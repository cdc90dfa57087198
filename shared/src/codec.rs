//! Bit-level read/write buffer used for every wire message
//!
//! The buffer keeps two independent cursors, both counted in bits. Writes
//! always append at the write cursor and grow the backing storage; reads never
//! go past the write cursor and fail with [`CodecError::TruncatedBuffer`]
//! instead of producing garbage.

use thiserror::Error;

/// Errors produced while decoding a buffer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A read asked for more bits than remain before the write cursor
    #[error("truncated buffer: needed {requested_bits} bits, {remaining_bits} remaining")]
    TruncatedBuffer {
        requested_bits: usize,
        remaining_bits: usize,
    },

    #[error("bit width {0} exceeds 32")]
    BitWidth(u32),

    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown message type tag {0}")]
    UnknownMessageType(u8),

    /// The decoder finished but the packet still had data in it
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Values with a fixed encoded width.
///
/// All implementations use little-endian byte order so the wire format does
/// not depend on the host.
pub trait WireValue: Sized {
    const WIDTH: usize;

    fn write_le(&self, out: &mut [u8]);

    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_wire_value {
    ($($ty:ty),*) => {
        $(
            impl WireValue for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn write_le(&self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_wire_value!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl WireValue for bool {
    const WIDTH: usize = 1;

    fn write_le(&self, out: &mut [u8]) {
        out[0] = u8::from(*self);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitBuffer {
    buffer: Vec<u8>,
    write_pos: usize,
    read_pos: usize,
}

impl BitBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(bytes),
            write_pos: 0,
            read_pos: 0,
        }
    }

    /// Wraps a received datagram for reading
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            buffer: data.to_vec(),
            write_pos: data.len() * 8,
            read_pos: 0,
        }
    }

    pub fn write_bit(&mut self, value: bool) {
        let byte_index = self.write_pos / 8;
        let bit_index = self.write_pos % 8;

        if byte_index >= self.buffer.len() {
            self.buffer.push(0);
        }

        if value {
            self.buffer[byte_index] |= 1 << bit_index;
        } else {
            self.buffer[byte_index] &= !(1 << bit_index);
        }

        self.write_pos += 1;
    }

    pub fn read_bit(&mut self) -> Result<bool, CodecError> {
        self.ensure_remaining(1)?;
        Ok(self.take_bit())
    }

    /// Writes the low `bits` bits of `value`, least-significant first.
    ///
    /// Panics if `bits > 32`.
    pub fn write_bits(&mut self, value: u32, bits: u32) {
        assert!(bits <= 32, "cannot write {} bits from a u32", bits);
        for i in 0..bits {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    pub fn read_bits(&mut self, bits: u32) -> Result<u32, CodecError> {
        if bits > 32 {
            return Err(CodecError::BitWidth(bits));
        }
        self.ensure_remaining(bits as usize)?;

        let mut value = 0u32;
        for i in 0..bits {
            if self.take_bit() {
                value |= 1 << i;
            }
        }
        Ok(value)
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        if self.write_pos % 8 == 0 {
            let start = self.write_pos / 8;
            self.buffer.truncate(start);
            self.buffer.extend_from_slice(data);
            self.write_pos += data.len() * 8;
        } else {
            for byte in data {
                self.write_bits(u32::from(*byte), 8);
            }
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, CodecError> {
        self.ensure_remaining(len * 8)?;

        if self.read_pos % 8 == 0 {
            let start = self.read_pos / 8;
            self.read_pos += len * 8;
            Ok(self.buffer[start..start + len].to_vec())
        } else {
            Ok((0..len).map(|_| self.take_byte()).collect())
        }
    }

    pub fn write_value<T: WireValue>(&mut self, value: T) {
        let mut raw = vec![0u8; T::WIDTH];
        value.write_le(&mut raw);
        self.write_bytes(&raw);
    }

    pub fn read_value<T: WireValue>(&mut self) -> Result<T, CodecError> {
        let raw = self.read_bytes(T::WIDTH)?;
        Ok(T::read_le(&raw))
    }

    /// Writes a string with a 32-bit little-endian length prefix
    pub fn write_str(&mut self, value: &str) {
        self.write_value(value.len() as u32);
        self.write_bytes(value.as_bytes());
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let start = self.read_pos;
        let len = self.read_value::<u32>()? as usize;

        let bytes = match self.read_bytes(len) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.read_pos = start;
                return Err(e);
            }
        };

        String::from_utf8(bytes).map_err(|_| {
            self.read_pos = start;
            CodecError::InvalidUtf8
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.len_bytes()]
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        let len = self.len_bytes();
        self.buffer.truncate(len);
        self.buffer
    }

    /// Size of the written data in bytes, rounding a partial byte up
    pub fn len_bytes(&self) -> usize {
        self.write_pos.div_ceil(8)
    }

    pub fn len_bits(&self) -> usize {
        self.write_pos
    }

    pub fn is_empty(&self) -> bool {
        self.write_pos == 0
    }

    pub fn remaining_bits(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn reset_read(&mut self) {
        self.read_pos = 0;
    }

    pub fn reset_write(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.reset_write();
    }

    fn ensure_remaining(&self, bits: usize) -> Result<(), CodecError> {
        let remaining_bits = self.remaining_bits();
        if bits > remaining_bits {
            return Err(CodecError::TruncatedBuffer {
                requested_bits: bits,
                remaining_bits,
            });
        }
        Ok(())
    }

    fn take_bit(&mut self) -> bool {
        let byte = self.buffer[self.read_pos / 8];
        let bit = (byte >> (self.read_pos % 8)) & 1 == 1;
        self.read_pos += 1;
        bit
    }

    fn take_byte(&mut self) -> u8 {
        let mut byte = 0u8;
        for i in 0..8 {
            if self.take_bit() {
                byte |= 1 << i;
            }
        }
        byte
    }
}

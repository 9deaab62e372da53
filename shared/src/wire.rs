//! Field-ordered binary writer and reader shared by the query protocols
//!
//! Records are flattened field by field in declaration order. Each record type
//! lists its fields once through [`wire_record!`], so the byte layout is
//! exactly the order written there:
//! - nested records are written inline, recursively
//! - `Option` fields that are `None` are skipped entirely, never zero-filled
//! - strings are handed to the encoder, which decides their framing
//!
//! The two encoders differ in byte order and string framing. SQP uses
//! [`BigEndianWriter`] (1-byte length prefix), A2S uses [`LittleEndianWriter`]
//! (null terminator). Every response builds its own writer instance.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Errors raised while encoding or decoding wire records
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("string of {0} bytes does not fit a one byte length prefix")]
    StringTooLong(usize),
    #[error("packet truncated: needed {needed} more bytes")]
    Truncated { needed: usize },
    #[error("string field is not terminated")]
    UnterminatedString,
    #[error("unexpected packet header {0:#04x}")]
    UnexpectedHeader(u8),
}

/// Sink for primitive fields in one protocol's byte order and string framing
pub trait WireEncoder {
    fn put_u8(&mut self, v: u8);
    fn put_u16(&mut self, v: u16);
    fn put_u32(&mut self, v: u32);
    fn put_i16(&mut self, v: i16);
    /// Copies bytes verbatim, no framing.
    fn put_raw(&mut self, bytes: &[u8]);
    fn put_string(&mut self, s: &str) -> Result<(), WireError>;
    fn into_bytes(self) -> Vec<u8>;
}

/// Big-endian encoder with 1-byte length-prefixed strings
#[derive(Debug, Default)]
pub struct BigEndianWriter {
    buf: BytesMut,
}

impl WireEncoder for BigEndianWriter {
    fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    fn put_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    fn put_string(&mut self, s: &str) -> Result<(), WireError> {
        let len = u8::try_from(s.len()).map_err(|_| WireError::StringTooLong(s.len()))?;
        self.buf.put_u8(len);
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Little-endian encoder with null-terminated strings
#[derive(Debug, Default)]
pub struct LittleEndianWriter {
    buf: BytesMut,
}

impl WireEncoder for LittleEndianWriter {
    fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    fn put_i16(&mut self, v: i16) {
        self.buf.put_i16_le(v);
    }

    fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    fn put_string(&mut self, s: &str) -> Result<(), WireError> {
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
        Ok(())
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// A value that knows how to flatten itself onto a [`WireEncoder`]
pub trait WireWrite {
    fn wire_write<E: WireEncoder>(&self, enc: &mut E) -> Result<(), WireError>;
}

impl WireWrite for u8 {
    fn wire_write<E: WireEncoder>(&self, enc: &mut E) -> Result<(), WireError> {
        enc.put_u8(*self);
        Ok(())
    }
}

impl WireWrite for u16 {
    fn wire_write<E: WireEncoder>(&self, enc: &mut E) -> Result<(), WireError> {
        enc.put_u16(*self);
        Ok(())
    }
}

impl WireWrite for u32 {
    fn wire_write<E: WireEncoder>(&self, enc: &mut E) -> Result<(), WireError> {
        enc.put_u32(*self);
        Ok(())
    }
}

impl WireWrite for i16 {
    fn wire_write<E: WireEncoder>(&self, enc: &mut E) -> Result<(), WireError> {
        enc.put_i16(*self);
        Ok(())
    }
}

impl WireWrite for String {
    fn wire_write<E: WireEncoder>(&self, enc: &mut E) -> Result<(), WireError> {
        enc.put_string(self)
    }
}

impl<const N: usize> WireWrite for [u8; N] {
    fn wire_write<E: WireEncoder>(&self, enc: &mut E) -> Result<(), WireError> {
        enc.put_raw(self);
        Ok(())
    }
}

impl<T: WireWrite> WireWrite for Option<T> {
    fn wire_write<E: WireEncoder>(&self, enc: &mut E) -> Result<(), WireError> {
        match self {
            Some(inner) => inner.wire_write(enc),
            None => Ok(()),
        }
    }
}

/// Implements [`WireWrite`] for a struct by writing the listed fields in order
macro_rules! wire_record {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::wire::WireWrite for $ty {
            fn wire_write<E: $crate::wire::WireEncoder>(
                &self,
                enc: &mut E,
            ) -> Result<(), $crate::wire::WireError> {
                $( $crate::wire::WireWrite::wire_write(&self.$field, enc)?; )*
                Ok(())
            }
        }
    };
}

/// Encodes a record with a fresh encoder of type `E`
pub fn encode<E, T>(record: &T) -> Result<Vec<u8>, WireError>
where
    E: WireEncoder + Default,
    T: WireWrite,
{
    let mut enc = E::default();
    record.wire_write(&mut enc)?;
    Ok(enc.into_bytes())
}

/// Cursor over a received datagram
///
/// Every getter checks the remaining length first so a short packet yields
/// [`WireError::Truncated`] instead of a panic.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<(), WireError> {
        if self.buf.remaining() < n {
            return Err(WireError::Truncated {
                needed: n - self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn get_u16_le(&mut self) -> Result<u16, WireError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn get_i16_le(&mut self) -> Result<i16, WireError> {
        self.need(2)?;
        Ok(self.buf.get_i16_le())
    }

    pub fn get_raw(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Reads a 1-byte length-prefixed string.
    pub fn get_prefixed_string(&mut self) -> Result<String, WireError> {
        let len = self.get_u8()? as usize;
        let raw = self.get_raw(len)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    /// Reads a null-terminated string, consuming the terminator.
    pub fn get_cstring(&mut self) -> Result<String, WireError> {
        let end = self
            .buf
            .iter()
            .position(|b| *b == 0)
            .ok_or(WireError::UnterminatedString)?;
        let raw = self.get_raw(end)?;
        self.buf.advance(1);
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}

// src/core/rpc/pack.rs

//! The pack/unpack primitives shared by the wire protocol and the state
//! save files.
//!
//! All integers are little-endian. Strings travel as a `u32` length that
//! includes a trailing NUL, followed by the bytes and the NUL itself; the
//! "no value" string is encoded as length 0 with no data. The "no value"
//! encoding for integers is the maximum of the unsigned width.

use crate::core::LatticeError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Numeric "no value" sentinels, one per unsigned width.
pub const NO_VAL8: u8 = u8::MAX;
pub const NO_VAL16: u16 = u16::MAX;
pub const NO_VAL: u32 = u32::MAX;
pub const NO_VAL64: u64 = u64::MAX;

/// Hard cap on any single packed string, matching the dispatcher's insane
/// message length check.
pub const MAX_PACK_STR_LEN: usize = 16 * 1024 * 1024;

/// Append-only pack writer.
#[derive(Debug, Default)]
pub struct PackBuf {
    buf: BytesMut,
}

impl PackBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pack8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn pack16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn pack32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn pack64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn pack_bool(&mut self, v: bool) {
        self.pack8(u8::from(v));
    }

    /// Unix seconds as a 64-bit value.
    pub fn pack_time(&mut self, v: i64) {
        self.pack64(v as u64);
    }

    /// Packs a string with its NUL-inclusive length. `None` packs as the
    /// null string (length 0, no data).
    pub fn packstr(&mut self, s: Option<&str>) {
        match s {
            None => self.pack32(0),
            Some(s) => {
                self.pack32(s.len() as u32 + 1);
                self.buf.put_slice(s.as_bytes());
                self.buf.put_u8(0);
            }
        }
    }

    /// Packs raw bytes with an exact length prefix.
    pub fn packmem(&mut self, data: &[u8]) {
        self.pack32(data.len() as u32);
        self.buf.put_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Bounds-checked unpack reader over a received buffer.
#[derive(Debug)]
pub struct UnpackBuf {
    buf: Bytes,
}

impl UnpackBuf {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> Result<(), LatticeError> {
        if self.buf.remaining() < n {
            return Err(LatticeError::ParseFailure(format!(
                "buffer underrun: need {n} bytes, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn unpack8(&mut self) -> Result<u8, LatticeError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn unpack16(&mut self) -> Result<u16, LatticeError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn unpack32(&mut self) -> Result<u32, LatticeError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn unpack64(&mut self) -> Result<u64, LatticeError> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn unpack_bool(&mut self) -> Result<bool, LatticeError> {
        Ok(self.unpack8()? != 0)
    }

    pub fn unpack_time(&mut self) -> Result<i64, LatticeError> {
        Ok(self.unpack64()? as i64)
    }

    /// Unpacks a string. Length 0 is the null string and yields `None`.
    pub fn unpackstr(&mut self) -> Result<Option<String>, LatticeError> {
        let len = self.unpack32()? as usize;
        if len == 0 {
            return Ok(None);
        }
        if len > MAX_PACK_STR_LEN {
            return Err(LatticeError::InsaneMessageLength(len));
        }
        self.need(len)?;
        let mut bytes = vec![0u8; len];
        self.buf.copy_to_slice(&mut bytes);
        if bytes.pop() != Some(0) {
            return Err(LatticeError::ParseFailure(
                "packed string missing NUL terminator".into(),
            ));
        }
        Ok(Some(String::from_utf8(bytes)?))
    }

    /// Unpacks a string that must be present.
    pub fn unpackstr_required(&mut self) -> Result<String, LatticeError> {
        self.unpackstr()?
            .ok_or_else(|| LatticeError::ParseFailure("required string was null".into()))
    }

    pub fn unpackmem(&mut self) -> Result<Vec<u8>, LatticeError> {
        let len = self.unpack32()? as usize;
        if len > MAX_PACK_STR_LEN {
            return Err(LatticeError::InsaneMessageLength(len));
        }
        self.need(len)?;
        let mut bytes = vec![0u8; len];
        self.buf.copy_to_slice(&mut bytes);
        Ok(bytes)
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Takes everything left in the buffer.
    pub fn take_rest(&mut self) -> Bytes {
        let len = self.buf.remaining();
        self.buf.copy_to_bytes(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrip() {
        let mut p = PackBuf::new();
        p.pack8(7);
        p.pack16(NO_VAL16);
        p.pack32(0xdead_beef);
        p.pack64(42);
        p.pack_time(1_700_000_000);
        let mut u = UnpackBuf::new(p.into_bytes());
        assert_eq!(u.unpack8().unwrap(), 7);
        assert_eq!(u.unpack16().unwrap(), NO_VAL16);
        assert_eq!(u.unpack32().unwrap(), 0xdead_beef);
        assert_eq!(u.unpack64().unwrap(), 42);
        assert_eq!(u.unpack_time().unwrap(), 1_700_000_000);
        assert_eq!(u.remaining(), 0);
    }

    #[test]
    fn string_roundtrip_and_null() {
        let mut p = PackBuf::new();
        p.packstr(Some("lx[00-03]"));
        p.packstr(None);
        let mut u = UnpackBuf::new(p.into_bytes());
        assert_eq!(u.unpackstr().unwrap().as_deref(), Some("lx[00-03]"));
        assert_eq!(u.unpackstr().unwrap(), None);
    }

    #[test]
    fn underrun_detected() {
        let mut u = UnpackBuf::new(Bytes::from_static(&[1, 2]));
        assert!(u.unpack32().is_err());
    }
}

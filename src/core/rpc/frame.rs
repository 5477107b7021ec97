// src/core/rpc/frame.rs

//! Length-prefixed binary frames.
//!
//! Each frame is a `u32` little-endian payload length followed by the
//! payload: `pack32(version)`, `pack16(message type)`, `packmem(auth
//! credential)`, and the message body. The codec only deals in raw
//! payloads; typed decoding happens in the message layer.

use crate::core::LatticeError;
use crate::core::rpc::pack::{PackBuf, UnpackBuf};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Hard cap on one frame; anything larger is a protocol violation.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// A decoded frame envelope.
#[derive(Debug, Clone)]
pub struct Frame {
    pub version: u32,
    pub msg_type: u16,
    pub auth: Vec<u8>,
    pub body: Bytes,
}

impl Frame {
    pub fn new(version: u32, msg_type: u16, auth: Vec<u8>, body: Bytes) -> Self {
        Self {
            version,
            msg_type,
            auth,
            body,
        }
    }

    fn encode_payload(&self) -> Bytes {
        let mut buf = PackBuf::new();
        buf.pack32(self.version);
        buf.pack16(self.msg_type);
        buf.packmem(&self.auth);
        let mut bytes = BytesMut::from(&buf.into_bytes()[..]);
        bytes.extend_from_slice(&self.body);
        bytes.freeze()
    }

    fn decode_payload(payload: Bytes) -> Result<Self, LatticeError> {
        let mut buf = UnpackBuf::new(payload);
        let version = buf.unpack32()?;
        let msg_type = buf.unpack16()?;
        let auth = buf.unpackmem()?;
        let body = buf.take_rest();
        Ok(Self {
            version,
            msg_type,
            auth,
            body,
        })
    }
}

/// tokio codec for [`Frame`]s.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = LatticeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, LatticeError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(LatticeError::InsaneMessageLength(len));
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let payload = src.split_to(len).freeze();
        Frame::decode_payload(payload).map(Some)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = LatticeError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), LatticeError> {
        let payload = frame.encode_payload();
        if payload.len() > MAX_FRAME_LEN {
            return Err(LatticeError::InsaneMessageLength(payload.len()));
        }
        dst.put_u32_le(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let frame = Frame::new(0x0001_0400, 2001, b"auth".to_vec(), Bytes::from_static(b"body"));
        let mut codec = FrameCodec;
        let mut wire = BytesMut::new();
        codec.encode(frame, &mut wire).unwrap();
        let decoded = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(decoded.version, 0x0001_0400);
        assert_eq!(decoded.msg_type, 2001);
        assert_eq!(decoded.auth, b"auth");
        assert_eq!(&decoded.body[..], b"body");
        assert!(codec.decode(&mut wire).unwrap().is_none());
    }

    #[test]
    fn partial_frame_waits() {
        let frame = Frame::new(1, 1, Vec::new(), Bytes::new());
        let mut codec = FrameCodec;
        let mut wire = BytesMut::new();
        codec.encode(frame, &mut wire).unwrap();
        let mut partial = BytesMut::from(&wire[..wire.len() - 2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn insane_length_rejected() {
        let mut codec = FrameCodec;
        let mut wire = BytesMut::new();
        wire.put_u32_le(u32::MAX);
        assert!(matches!(
            codec.decode(&mut wire),
            Err(LatticeError::InsaneMessageLength(_))
        ));
    }
}

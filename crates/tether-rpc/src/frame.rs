// ABOUTME: Wire frames for the stream multiplexer and their tokio codec.
// ABOUTME: Each frame carries a kind byte, a stream id, and a length-prefixed payload.
//!
//! Frame format:
//! ```text
//! +------+-----------------+-----------------+-- ... --+
//! | Kind | Stream id (u32) | Length (u32)    | Payload |
//! +------+-----------------+-----------------+-- ... --+
//! ```
//!
//! Integers are big-endian. Kinds:
//! - 0x00: Open  - peer opened a new logical stream
//! - 0x01: Data  - one message on a logical stream
//! - 0x02: Close - sender will write no more on the stream
//! - 0x03: Reset - stream refused or aborted

use std::io::{self, ErrorKind};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Header size: 1 byte kind + 4 bytes stream id + 4 bytes length.
pub const HEADER_SIZE: usize = 9;

/// Maximum payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Open = 0x00,
    Data = 0x01,
    Close = 0x02,
    Reset = 0x03,
}

impl FrameKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Open),
            0x01 => Some(Self::Data),
            0x02 => Some(Self::Close),
            0x03 => Some(Self::Reset),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub stream_id: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn open(stream_id: u32) -> Self {
        Self::control(FrameKind::Open, stream_id)
    }

    pub fn data(stream_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Data,
            stream_id,
            payload: payload.into(),
        }
    }

    pub fn close(stream_id: u32) -> Self {
        Self::control(FrameKind::Close, stream_id)
    }

    pub fn reset(stream_id: u32) -> Self {
        Self::control(FrameKind::Reset, stream_id)
    }

    fn control(kind: FrameKind, stream_id: u32) -> Self {
        Self {
            kind,
            stream_id,
            payload: Bytes::new(),
        }
    }
}

/// Codec for [`Frame`]s, for use with `FramedRead`/`FramedWrite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Frame>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the header without consuming
        let kind = buf[0];
        let length = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) as usize;

        if length > MAX_PAYLOAD_SIZE {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("Payload too large: {} bytes", length),
            ));
        }

        if buf.len() < HEADER_SIZE + length {
            buf.reserve(HEADER_SIZE + length - buf.len());
            return Ok(None);
        }

        let kind = FrameKind::from_byte(kind).ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidData, format!("Unknown frame kind: {}", kind))
        })?;

        buf.advance(1);
        let stream_id = buf.get_u32();
        buf.advance(4);
        let payload = buf.split_to(length).freeze();

        Ok(Some(Frame {
            kind,
            stream_id,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> io::Result<()> {
        if frame.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("Payload too large: {} bytes", frame.payload.len()),
            ));
        }

        buf.reserve(HEADER_SIZE + frame.payload.len());
        buf.put_u8(frame.kind.as_byte());
        buf.put_u32(frame.stream_id);
        buf.put_u32(frame.payload.len() as u32);
        buf.extend_from_slice(&frame.payload);
        Ok(())
    }
}

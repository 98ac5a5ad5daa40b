use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, SessionError};

/// Frame header: length (2) + opcode (1) = 3 bytes.
pub const HEADER_SIZE: usize = 3;

/// Default maximum message size negotiated by a server.
pub const DEFAULT_MAX_MSG_SIZE: usize = 6144;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize - HEADER_SIZE;

/// Transport message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Data = 0x02,
    ConnectRequest = 0x10,
    ConnectAck = 0x11,
    ConnectNak = 0x12,
}

impl Opcode {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x02 => Some(Opcode::Data),
            0x10 => Some(Opcode::ConnectRequest),
            0x11 => Some(Opcode::ConnectAck),
            0x12 => Some(Opcode::ConnectNak),
            _ => None,
        }
    }
}

/// One transport message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// A data frame with no payload.
    pub fn ping() -> Self {
        Self::new(Opcode::Data, Bytes::new())
    }

    pub fn is_ping(&self) -> bool {
        self.opcode == Opcode::Data && self.payload.is_empty()
    }

    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// ```text
/// ┌──────────────────┬────────────┬──────────────────┐
/// │ Length (2B BE)   │ Opcode (1B)│ Payload          │
/// │ header included  │            │ (Length - 3 B)   │
/// └──────────────────┴────────────┴──────────────────┘
/// ```
pub fn encode_frame(opcode: Opcode, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(SessionError::MessageTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u16((HEADER_SIZE + payload.len()) as u16);
    dst.put_u8(opcode as u8);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` until a complete frame is buffered. On success the frame
/// bytes are consumed from `src`.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let total = usize::from(u16::from_be_bytes([src[0], src[1]]));
    if total < HEADER_SIZE {
        return Err(SessionError::InvalidFrame(format!(
            "length {total} shorter than header"
        )));
    }
    let opcode = Opcode::from_u8(src[2])
        .ok_or_else(|| SessionError::InvalidFrame(format!("unknown opcode {:#04x}", src[2])))?;

    let payload_len = total - HEADER_SIZE;
    if payload_len > max_payload {
        return Err(SessionError::InvalidFrame(format!(
            "payload of {payload_len} bytes exceeds limit of {max_payload}"
        )));
    }

    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();
    Ok(Some(Frame { opcode, payload }))
}

//! Wire frame encoding and incremental assembly.
//!
//! Every exchange with the instrument application uses the same frame:
//!
//! ```text
//!  0        1        2        4          6       7       8
//! ┌────────┬────────┬────────┬──────────┬───────┬───────┬──────────────┐
//! │facility│subtype │ length │ reserved │ msgId │status │ payload ...  │
//! └────────┴────────┴────────┴──────────┴───────┴───────┴──────────────┘
//! ```
//!
//! `length` is big-endian and counts payload bytes only. The link delivers
//! bytes in fragments of arbitrary size, so [`FrameAssembler`] buffers partial
//! reads until a full frame is available and hands out payloads as zero-copy
//! [`Bytes`] views into the receive buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest payload the link can carry in one message.
pub const MAX_PAYLOAD_LEN: usize = 8192 - HEADER_LEN;

/// Status byte reported by the instrument on success.
pub const STATUS_SUCCESS: u8 = 1;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Command facility
    pub facility: u8,
    /// Command subtype within the facility
    pub subtype: u8,
    /// Declared payload length
    pub data_len: u16,
    /// Sequence number echoed by the instrument
    pub msg_id: u8,
    /// Status byte (requests carry 0)
    pub status: u8,
}

impl FrameHeader {
    /// Parse a header from the first [`HEADER_LEN`] bytes of `buf`.
    ///
    /// Returns `None` if fewer than [`HEADER_LEN`] bytes are available.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let mut cursor = &buf[..HEADER_LEN];
        let facility = cursor.get_u8();
        let subtype = cursor.get_u8();
        let data_len = cursor.get_u16();
        let _reserved = cursor.get_u16();
        let msg_id = cursor.get_u8();
        let status = cursor.get_u8();
        Some(Self {
            facility,
            subtype,
            data_len,
            msg_id,
            status,
        })
    }

    /// Facility/subtype pair identifying the command.
    pub fn kind(&self) -> (u8, u8) {
        (self.facility, self.subtype)
    }

    /// Whether the status byte reports success.
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

/// A complete frame with its payload.
#[derive(Debug, Clone)]
pub struct MessageFrame {
    /// Frame header
    pub header: FrameHeader,
    /// Payload view, exactly `header.data_len` bytes
    pub payload: Bytes,
}

impl MessageFrame {
    /// Encode a request frame.
    pub fn encode_request(facility: u8, subtype: u8, msg_id: u8, payload: &[u8]) -> Bytes {
        Self::encode(facility, subtype, msg_id, 0, payload)
    }

    /// Encode a frame with an explicit status byte.
    ///
    /// Requests always carry status 0; responses are only encoded by link
    /// simulators.
    pub fn encode(facility: u8, subtype: u8, msg_id: u8, status: u8, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_u8(facility);
        buf.put_u8(subtype);
        buf.put_u16(payload.len() as u16);
        buf.put_u16(0);
        buf.put_u8(msg_id);
        buf.put_u8(status);
        buf.put_slice(payload);
        buf.freeze()
    }
}

/// Accumulates link fragments and yields complete frames in arrival order.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: BytesMut,
}

impl FrameAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a received fragment.
    pub fn push(&mut self, fragment: &[u8]) {
        self.buf.extend_from_slice(fragment);
    }

    /// Number of buffered bytes not yet consumed as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Discard any buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Take the next complete frame, if one is buffered.
    ///
    /// Fails if the buffered header declares a payload larger than the link
    /// can carry; the buffer is left untouched in that case.
    pub fn next_frame(&mut self) -> ProtocolResult<Option<MessageFrame>> {
        let Some(header) = FrameHeader::parse(&self.buf) else {
            return Ok(None);
        };
        let data_len = header.data_len as usize;
        if data_len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::corrupt(format!(
                "declared payload of {} bytes exceeds link maximum {} ({}/{})",
                data_len, MAX_PAYLOAD_LEN, header.facility, header.subtype
            )));
        }
        if self.buf.len() < HEADER_LEN + data_len {
            return Ok(None);
        }
        let mut frame = self.buf.split_to(HEADER_LEN + data_len).freeze();
        let payload = frame.split_off(HEADER_LEN);
        Ok(Some(MessageFrame { header, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let bytes = MessageFrame::encode(3, 11, 7, 1, &[0xAA, 0xBB, 0xCC]);
        assert_eq!(&bytes[..HEADER_LEN], &[3, 11, 0, 3, 0, 0, 7, 1]);

        let header = FrameHeader::parse(&bytes).unwrap();
        assert_eq!(header.kind(), (3, 11));
        assert_eq!(header.data_len, 3);
        assert_eq!(header.msg_id, 7);
        assert!(header.is_success());
    }

    #[test]
    fn test_short_header_is_incomplete() {
        assert!(FrameHeader::parse(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_assembles_across_fragments() {
        let bytes = MessageFrame::encode(2, 14, 1, 1, b"payload");
        let mut assembler = FrameAssembler::new();

        assembler.push(&bytes[..5]);
        assert!(assembler.next_frame().unwrap().is_none());
        assembler.push(&bytes[5..10]);
        assert!(assembler.next_frame().unwrap().is_none());
        assembler.push(&bytes[10..]);

        let frame = assembler.next_frame().unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"payload");
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_back_to_back_frames_in_one_fragment() {
        let mut joined = BytesMut::new();
        joined.extend_from_slice(&MessageFrame::encode(3, 11, 1, 1, b"first"));
        joined.extend_from_slice(&MessageFrame::encode(3, 11, 2, 1, b""));
        joined.extend_from_slice(&MessageFrame::encode(3, 12, 3, 1, b"moni"));

        let mut assembler = FrameAssembler::new();
        assembler.push(&joined);

        let a = assembler.next_frame().unwrap().unwrap();
        let b = assembler.next_frame().unwrap().unwrap();
        let c = assembler.next_frame().unwrap().unwrap();
        assert_eq!(a.payload.as_ref(), b"first");
        assert!(b.payload.is_empty());
        assert_eq!(c.header.kind(), (3, 12));
        assert!(assembler.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_oversized_length_is_corrupt() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&[3, 11, 0xFF, 0xFF, 0, 0, 1, 1]);
        let err = assembler.next_frame().unwrap_err();
        assert!(matches!(err, ProtocolError::CorruptFrame { .. }));
    }
}

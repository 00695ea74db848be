//! Frame header encoding/decoding
//!
//! Every SPDY frame starts with an 8-byte header whose first bit tells
//! control frames from data frames:
//!
//! ```text
//! control: |1| version (15) | type (16) | flags (8) | length (24) |
//! data:    |0| stream id (31)           | flags (8) | length (24) |
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::stream_id::StreamId;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 8;

/// Maximum payload size (16MB - 1, limited by 24-bit length field)
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// Protocol version spoken by this crate
pub const SPDY_VERSION: u16 = 3;

const CONTROL_BIT: u32 = 0x8000_0000;

/// Distinguishes control frames from data frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Control frame of the given version and type
    Control { version: u16, frame_type: u16 },
    /// Data frame for a stream
    Data { stream_id: StreamId },
}

/// Frame header containing routing and length information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Control or data frame
    pub kind: FrameKind,
    /// Frame flags (FIN, UNIDIRECTIONAL, CLEAR_SETTINGS ...)
    pub flags: u8,
    /// Length of the payload in bytes
    pub length: u32,
}

impl FrameHeader {
    /// Header for a control frame
    pub fn control(version: u16, frame_type: u16, flags: u8, length: u32) -> Self {
        Self {
            kind: FrameKind::Control {
                version,
                frame_type,
            },
            flags,
            length,
        }
    }

    /// Header for a data frame
    pub fn data(stream_id: StreamId, flags: u8, length: u32) -> Self {
        Self {
            kind: FrameKind::Data { stream_id },
            flags,
            length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        match self.kind {
            FrameKind::Control {
                version,
                frame_type,
            } => {
                dst.put_u16(0x8000 | (version & 0x7FFF));
                dst.put_u16(frame_type);
            }
            FrameKind::Data { stream_id } => {
                dst.put_u32(stream_id.as_u32() & !CONTROL_BIT);
            }
        }
        // flags (8) followed by the 24-bit length
        dst.put_u32((u32::from(self.flags) << 24) | (self.length & MAX_PAYLOAD_SIZE as u32));
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer. Any bit
    /// pattern is a structurally valid header; the codec decides what to do
    /// with unknown types and versions.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let first = src.get_u32();
        let kind = if first & CONTROL_BIT != 0 {
            FrameKind::Control {
                version: ((first >> 16) & 0x7FFF) as u16,
                frame_type: (first & 0xFFFF) as u16,
            }
        } else {
            FrameKind::Data {
                stream_id: StreamId::new(first),
            }
        };

        let second = src.get_u32();
        Ok(Some(Self {
            kind,
            flags: (second >> 24) as u8,
            length: second & MAX_PAYLOAD_SIZE as u32,
        }))
    }

    /// Whether this is a control frame
    pub fn is_control(&self) -> bool {
        matches!(self.kind, FrameKind::Control { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_header_layout() {
        let header = FrameHeader::control(SPDY_VERSION, 7, 0, 8);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);

        // Same bytes a GOAWAY starts with on the wire
        assert_eq!(&buf[..], &[0x80, 0x03, 0x00, 0x07, 0x00, 0x00, 0x00, 0x08]);

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_control());
    }

    #[test]
    fn test_data_header_layout() {
        let header = FrameHeader::data(StreamId::new(5), 0x01, 300);

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(&buf[..], &[0x00, 0x00, 0x00, 0x05, 0x01, 0x00, 0x01, 0x2C]);

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.kind, FrameKind::Data { stream_id: StreamId::new(5) });
        assert_eq!(decoded.flags, 0x01);
        assert_eq!(decoded.length, 300);
    }

    #[test]
    fn test_max_payload_length() {
        let header = FrameHeader::data(StreamId::new(1), 0, MAX_PAYLOAD_SIZE as u32);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.length, MAX_PAYLOAD_SIZE as u32);
    }

    #[test]
    fn test_insufficient_bytes() {
        let mut buf = BytesMut::from(&[0x80u8, 0x03, 0x00, 0x02][..]);
        let result = FrameHeader::decode(&mut buf).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 4);
    }
}

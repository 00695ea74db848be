//! Tokio codec for SPDY/3 frames
//!
//! One codec instance is one direction's worth of header compression state,
//! so a connection needs exactly one encoder and one decoder for its whole
//! life, shared by every stream on it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::compression::{HeaderCompressor, HeaderDecompressor};
use crate::error::ProtocolError;
use crate::frame::{FrameHeader, FrameKind, MAX_PAYLOAD_SIZE, SPDY_VERSION};
use crate::headers::HeaderBlock;
use crate::message::{
    DataFrame, Frame, FrameType, GoAwayStatus, RstStatus, Setting, SettingId, Settings, SynReply,
    SynStream, FLAG_FIN, FLAG_SETTINGS_CLEAR, FLAG_UNIDIRECTIONAL,
};
use crate::stream_id::StreamId;

const ID_MASK: u32 = 0x7FFF_FFFF;

/// Codec for encoding/decoding SPDY frames
#[derive(Debug)]
pub struct FrameCodec {
    /// Version written into and expected on control frames
    version: u16,
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
    /// Created on first outbound header block
    compressor: Option<HeaderCompressor>,
    /// Created on first inbound header block
    decompressor: Option<HeaderDecompressor>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a codec speaking SPDY/3
    pub fn new() -> Self {
        Self::with_version(SPDY_VERSION)
    }

    /// Create a codec for a specific protocol version
    pub fn with_version(version: u16) -> Self {
        Self {
            version,
            pending_header: None,
            compressor: None,
            decompressor: None,
        }
    }

    /// Protocol version of this codec
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Serialize and compress a header block
    pub fn encode_headers(&mut self, headers: &HeaderBlock) -> Result<Bytes, ProtocolError> {
        let compressor = match &mut self.compressor {
            Some(c) => c,
            slot @ None => slot.insert(HeaderCompressor::new()?),
        };
        Ok(Bytes::from(compressor.compress(&headers.encode())?))
    }

    /// Decompress and parse a header block
    pub fn decode_headers(&mut self, block: &[u8]) -> Result<HeaderBlock, ProtocolError> {
        let raw = self
            .decompressor
            .get_or_insert_with(HeaderDecompressor::new)
            .decompress(block)?;
        HeaderBlock::decode(&raw)
    }

    fn decode_control(
        &mut self,
        frame_type: u16,
        flags: u8,
        mut payload: Bytes,
    ) -> Result<Frame, ProtocolError> {
        let Some(ty) = FrameType::from_u16(frame_type) else {
            debug!(frame_type, len = payload.len(), "Skipping unknown control frame");
            return Ok(Frame::Unknown {
                frame_type,
                flags,
                payload,
            });
        };

        let frame = match ty {
            FrameType::SynStream => {
                require_min(&payload, 10, "SYN_STREAM")?;
                let stream_id = StreamId::new(payload.get_u32());
                let associated_id = StreamId::new(payload.get_u32());
                let priority = payload.get_u8() >> 5;
                let slot = payload.get_u8();
                let headers = self.decode_headers(&payload)?;
                Frame::SynStream(SynStream {
                    stream_id,
                    associated_id,
                    priority,
                    slot,
                    fin: flags & FLAG_FIN != 0,
                    unidirectional: flags & FLAG_UNIDIRECTIONAL != 0,
                    headers,
                })
            }
            FrameType::SynReply => {
                require_min(&payload, 4, "SYN_REPLY")?;
                let stream_id = StreamId::new(payload.get_u32());
                let headers = self.decode_headers(&payload)?;
                Frame::SynReply(SynReply {
                    stream_id,
                    fin: flags & FLAG_FIN != 0,
                    headers,
                })
            }
            FrameType::Headers => {
                require_min(&payload, 4, "HEADERS")?;
                let stream_id = StreamId::new(payload.get_u32());
                let headers = self.decode_headers(&payload)?;
                Frame::Headers {
                    stream_id,
                    fin: flags & FLAG_FIN != 0,
                    headers,
                }
            }
            FrameType::RstStream => {
                require_exact(&payload, 8, "RST_STREAM")?;
                Frame::RstStream {
                    stream_id: StreamId::new(payload.get_u32()),
                    status: RstStatus::from_u32(payload.get_u32()),
                }
            }
            FrameType::Settings => {
                require_min(&payload, 4, "SETTINGS")?;
                let count = payload.get_u32() as usize;
                if payload.remaining() / 8 != count || payload.remaining() % 8 != 0 {
                    return Err(ProtocolError::MalformedFrame {
                        frame: "SETTINGS",
                        reason: "entry count does not match length",
                    });
                }
                let entries = (0..count)
                    .map(|_| {
                        let word = payload.get_u32();
                        let value = payload.get_u32();
                        Setting {
                            flags: (word >> 24) as u8,
                            id: SettingId::from_u32(word & 0x00FF_FFFF),
                            value,
                        }
                    })
                    .collect();
                Frame::Settings(Settings {
                    clear: flags & FLAG_SETTINGS_CLEAR != 0,
                    entries,
                })
            }
            FrameType::Ping => {
                require_exact(&payload, 4, "PING")?;
                Frame::Ping {
                    id: payload.get_u32(),
                }
            }
            FrameType::GoAway => {
                require_exact(&payload, 8, "GOAWAY")?;
                Frame::GoAway {
                    last_good_stream_id: StreamId::new(payload.get_u32()),
                    status: GoAwayStatus::from_u32(payload.get_u32()),
                }
            }
            FrameType::WindowUpdate => {
                require_exact(&payload, 8, "WINDOW_UPDATE")?;
                Frame::WindowUpdate {
                    stream_id: StreamId::new(payload.get_u32()),
                    delta: payload.get_u32() & ID_MASK,
                }
            }
        };
        Ok(frame)
    }
}

fn require_min(payload: &Bytes, len: usize, frame: &'static str) -> Result<(), ProtocolError> {
    if payload.len() < len {
        return Err(ProtocolError::MalformedFrame {
            frame,
            reason: "payload too short",
        });
    }
    Ok(())
}

fn require_exact(payload: &Bytes, len: usize, frame: &'static str) -> Result<(), ProtocolError> {
    if payload.len() != len {
        return Err(ProtocolError::MalformedFrame {
            frame,
            reason: "unexpected payload length",
        });
    }
    Ok(())
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        if let FrameKind::Control { version, .. } = header.kind {
            if version != self.version {
                return Err(ProtocolError::UnsupportedVersion(version));
            }
        }

        let payload_len = header.length as usize;
        if src.len() < payload_len {
            src.reserve(payload_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(payload_len).freeze();

        let frame = match header.kind {
            FrameKind::Data { stream_id } => Frame::Data(DataFrame {
                stream_id,
                fin: header.flags & FLAG_FIN != 0,
                data: payload,
            }),
            FrameKind::Control { frame_type, .. } => {
                self.decode_control(frame_type, header.flags, payload)?
            }
        };

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut payload = BytesMut::new();
        let mut flags = 0u8;

        let frame_type = match frame {
            Frame::Data(data) => {
                check_size(data.data.len())?;
                if data.fin {
                    flags |= FLAG_FIN;
                }
                FrameHeader::data(data.stream_id, flags, data.data.len() as u32).encode(dst);
                dst.extend_from_slice(&data.data);
                return Ok(());
            }
            Frame::SynStream(syn) => {
                let block = self.encode_headers(&syn.headers)?;
                if syn.fin {
                    flags |= FLAG_FIN;
                }
                if syn.unidirectional {
                    flags |= FLAG_UNIDIRECTIONAL;
                }
                payload.put_u32(syn.stream_id.as_u32() & ID_MASK);
                payload.put_u32(syn.associated_id.as_u32() & ID_MASK);
                payload.put_u8((syn.priority & 0x07) << 5);
                payload.put_u8(syn.slot);
                payload.extend_from_slice(&block);
                FrameType::SynStream.as_u16()
            }
            Frame::SynReply(reply) => {
                let block = self.encode_headers(&reply.headers)?;
                if reply.fin {
                    flags |= FLAG_FIN;
                }
                payload.put_u32(reply.stream_id.as_u32() & ID_MASK);
                payload.extend_from_slice(&block);
                FrameType::SynReply.as_u16()
            }
            Frame::Headers {
                stream_id,
                fin,
                headers,
            } => {
                let block = self.encode_headers(&headers)?;
                if fin {
                    flags |= FLAG_FIN;
                }
                payload.put_u32(stream_id.as_u32() & ID_MASK);
                payload.extend_from_slice(&block);
                FrameType::Headers.as_u16()
            }
            Frame::RstStream { stream_id, status } => {
                payload.put_u32(stream_id.as_u32() & ID_MASK);
                payload.put_u32(status.as_u32());
                FrameType::RstStream.as_u16()
            }
            Frame::Settings(settings) => {
                if settings.clear {
                    flags |= FLAG_SETTINGS_CLEAR;
                }
                payload.put_u32(settings.entries.len() as u32);
                for entry in &settings.entries {
                    payload.put_u32((u32::from(entry.flags) << 24) | (entry.id.as_u32() & 0x00FF_FFFF));
                    payload.put_u32(entry.value);
                }
                FrameType::Settings.as_u16()
            }
            Frame::Ping { id } => {
                payload.put_u32(id);
                FrameType::Ping.as_u16()
            }
            Frame::GoAway {
                last_good_stream_id,
                status,
            } => {
                payload.put_u32(last_good_stream_id.as_u32() & ID_MASK);
                payload.put_u32(status.as_u32());
                FrameType::GoAway.as_u16()
            }
            Frame::WindowUpdate { stream_id, delta } => {
                payload.put_u32(stream_id.as_u32() & ID_MASK);
                payload.put_u32(delta & ID_MASK);
                FrameType::WindowUpdate.as_u16()
            }
            Frame::Unknown {
                frame_type,
                flags: raw_flags,
                payload: raw,
            } => {
                flags = raw_flags;
                payload.extend_from_slice(&raw);
                frame_type
            }
        };

        check_size(payload.len())?;
        FrameHeader::control(self.version, frame_type, flags, payload.len() as u32).encode(dst);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

fn check_size(len: usize) -> Result<(), ProtocolError> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: len,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(())
}

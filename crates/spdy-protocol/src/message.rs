//! Typed SPDY/3 frames
//!
//! [`Frame`] is what the session layer deals in. The codec turns it into wire
//! bytes and back; header blocks travel here uncompressed as [`HeaderBlock`]s.
//!
//! Only the frame types a client needs are modelled in full. HEADERS is
//! parsed (its block must be inflated to keep zlib state in sync) and
//! everything else surfaces as [`Frame::Unknown`] so the caller can skip it.

use std::fmt;

use bytes::Bytes;

use crate::headers::HeaderBlock;
use crate::stream_id::StreamId;

/// FIN flag on SYN_STREAM, SYN_REPLY, HEADERS and DATA
pub const FLAG_FIN: u8 = 0x01;

/// UNIDIRECTIONAL flag on SYN_STREAM
pub const FLAG_UNIDIRECTIONAL: u8 = 0x02;

/// CLEAR_SETTINGS flag on SETTINGS
pub const FLAG_SETTINGS_CLEAR: u8 = 0x01;

/// Control frame type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FrameType {
    SynStream = 1,
    SynReply = 2,
    RstStream = 3,
    Settings = 4,
    Ping = 6,
    GoAway = 7,
    Headers = 8,
    WindowUpdate = 9,
}

impl FrameType {
    /// Convert to the wire value
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Convert from the wire value
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::SynStream),
            2 => Some(Self::SynReply),
            3 => Some(Self::RstStream),
            4 => Some(Self::Settings),
            6 => Some(Self::Ping),
            7 => Some(Self::GoAway),
            8 => Some(Self::Headers),
            9 => Some(Self::WindowUpdate),
            _ => None,
        }
    }
}

/// RST_STREAM status codes
///
/// `BadContentLength` reuses the INTERNAL_ERROR slot (6) on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RstStatus {
    ProtocolError,
    InvalidStream,
    RefusedStream,
    UnsupportedVersion,
    Cancel,
    BadContentLength,
    FlowControlError,
    StreamInUse,
    StreamAlreadyClosed,
    InvalidCredentials,
    FrameTooLarge,
    /// Code outside the known range, preserved as received
    Unknown(u32),
}

impl RstStatus {
    /// Convert to the wire value
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::ProtocolError => 1,
            Self::InvalidStream => 2,
            Self::RefusedStream => 3,
            Self::UnsupportedVersion => 4,
            Self::Cancel => 5,
            Self::BadContentLength => 6,
            Self::FlowControlError => 7,
            Self::StreamInUse => 8,
            Self::StreamAlreadyClosed => 9,
            Self::InvalidCredentials => 10,
            Self::FrameTooLarge => 11,
            Self::Unknown(code) => *code,
        }
    }

    /// Convert from the wire value
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::ProtocolError,
            2 => Self::InvalidStream,
            3 => Self::RefusedStream,
            4 => Self::UnsupportedVersion,
            5 => Self::Cancel,
            6 => Self::BadContentLength,
            7 => Self::FlowControlError,
            8 => Self::StreamInUse,
            9 => Self::StreamAlreadyClosed,
            10 => Self::InvalidCredentials,
            11 => Self::FrameTooLarge,
            other => Self::Unknown(other),
        }
    }

    /// Short kebab-case name used in logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProtocolError => "protocol-error",
            Self::InvalidStream => "invalid-stream",
            Self::RefusedStream => "refused-stream",
            Self::UnsupportedVersion => "unsupported-version",
            Self::Cancel => "cancelled",
            Self::BadContentLength => "bad-content-length",
            Self::FlowControlError => "flow-control-error",
            Self::StreamInUse => "stream-in-use",
            Self::StreamAlreadyClosed => "already-closed",
            Self::InvalidCredentials => "invalid-credentials",
            Self::FrameTooLarge => "frame-too-large",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for RstStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown({})", code),
            other => write!(f, "{}({})", other.name(), other.as_u32()),
        }
    }
}

/// GOAWAY status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoAwayStatus {
    Ok,
    ProtocolError,
    InternalError,
    Unknown(u32),
}

impl GoAwayStatus {
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::ProtocolError => 1,
            Self::InternalError => 2,
            Self::Unknown(code) => *code,
        }
    }

    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::ProtocolError,
            2 => Self::InternalError,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for GoAwayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::ProtocolError => write!(f, "protocol-error"),
            Self::InternalError => write!(f, "internal-error"),
            Self::Unknown(code) => write!(f, "unknown({})", code),
        }
    }
}

/// SETTINGS entry identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingId {
    UploadBandwidth,
    DownloadBandwidth,
    RoundTripTime,
    MaxConcurrentStreams,
    CurrentCwnd,
    DownloadRetransRate,
    InitialWindowSize,
    ClientCertificateVectorSize,
    Other(u32),
}

impl SettingId {
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::UploadBandwidth => 1,
            Self::DownloadBandwidth => 2,
            Self::RoundTripTime => 3,
            Self::MaxConcurrentStreams => 4,
            Self::CurrentCwnd => 5,
            Self::DownloadRetransRate => 6,
            Self::InitialWindowSize => 7,
            Self::ClientCertificateVectorSize => 8,
            Self::Other(id) => *id,
        }
    }

    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::UploadBandwidth,
            2 => Self::DownloadBandwidth,
            3 => Self::RoundTripTime,
            4 => Self::MaxConcurrentStreams,
            5 => Self::CurrentCwnd,
            6 => Self::DownloadRetransRate,
            7 => Self::InitialWindowSize,
            8 => Self::ClientCertificateVectorSize,
            other => Self::Other(other),
        }
    }
}

/// One SETTINGS entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    /// Per-entry flags (PERSIST_VALUE, PERSISTED)
    pub flags: u8,
    pub id: SettingId,
    pub value: u32,
}

impl Setting {
    pub fn new(id: SettingId, value: u32) -> Self {
        Self { flags: 0, id, value }
    }
}

/// SETTINGS frame body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Peer should drop previously persisted settings
    pub clear: bool,
    pub entries: Vec<Setting>,
}

impl Settings {
    /// Value of the first entry with the given id
    pub fn get(&self, id: SettingId) -> Option<u32> {
        self.entries.iter().find(|s| s.id == id).map(|s| s.value)
    }
}

/// SYN_STREAM: opens a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynStream {
    pub stream_id: StreamId,
    pub associated_id: StreamId,
    /// 0 (highest) to 7 (lowest)
    pub priority: u8,
    pub slot: u8,
    pub fin: bool,
    pub unidirectional: bool,
    pub headers: HeaderBlock,
}

impl SynStream {
    /// Client request opening `stream_id`
    pub fn new(stream_id: StreamId, priority: u8, headers: HeaderBlock) -> Self {
        Self {
            stream_id,
            associated_id: StreamId::ZERO,
            priority: priority & 0x07,
            slot: 0,
            fin: false,
            unidirectional: false,
            headers,
        }
    }

    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }
}

/// SYN_REPLY: the peer accepted a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynReply {
    pub stream_id: StreamId,
    pub fin: bool,
    pub headers: HeaderBlock,
}

/// DATA frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub stream_id: StreamId,
    pub fin: bool,
    pub data: Bytes,
}

impl DataFrame {
    pub fn new(stream_id: StreamId, data: impl Into<Bytes>, fin: bool) -> Self {
        Self {
            stream_id,
            fin,
            data: data.into(),
        }
    }
}

/// A decoded SPDY frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    SynStream(SynStream),
    SynReply(SynReply),
    Data(DataFrame),
    RstStream {
        stream_id: StreamId,
        status: RstStatus,
    },
    Settings(Settings),
    Ping {
        id: u32,
    },
    GoAway {
        last_good_stream_id: StreamId,
        status: GoAwayStatus,
    },
    Headers {
        stream_id: StreamId,
        fin: bool,
        headers: HeaderBlock,
    },
    WindowUpdate {
        stream_id: StreamId,
        delta: u32,
    },
    /// Control frame of a type this crate does not model
    Unknown {
        frame_type: u16,
        flags: u8,
        payload: Bytes,
    },
}

impl Frame {
    pub fn rst_stream(stream_id: StreamId, status: RstStatus) -> Self {
        Frame::RstStream { stream_id, status }
    }

    pub fn ping(id: u32) -> Self {
        Frame::Ping { id }
    }

    pub fn go_away(last_good_stream_id: StreamId, status: GoAwayStatus) -> Self {
        Frame::GoAway {
            last_good_stream_id,
            status,
        }
    }

    pub fn window_update(stream_id: StreamId, delta: u32) -> Self {
        Frame::WindowUpdate {
            stream_id,
            delta: delta & 0x7FFF_FFFF,
        }
    }

    pub fn settings(entries: Vec<Setting>) -> Self {
        Frame::Settings(Settings {
            clear: false,
            entries,
        })
    }

    /// Control frame type, `None` for DATA and unknown control frames
    pub fn frame_type(&self) -> Option<FrameType> {
        match self {
            Frame::SynStream(_) => Some(FrameType::SynStream),
            Frame::SynReply(_) => Some(FrameType::SynReply),
            Frame::RstStream { .. } => Some(FrameType::RstStream),
            Frame::Settings(_) => Some(FrameType::Settings),
            Frame::Ping { .. } => Some(FrameType::Ping),
            Frame::GoAway { .. } => Some(FrameType::GoAway),
            Frame::Headers { .. } => Some(FrameType::Headers),
            Frame::WindowUpdate { .. } => Some(FrameType::WindowUpdate),
            Frame::Data(_) | Frame::Unknown { .. } => None,
        }
    }

    /// Stream this frame addresses, if it is stream-scoped
    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            Frame::SynStream(f) => Some(f.stream_id),
            Frame::SynReply(f) => Some(f.stream_id),
            Frame::Data(f) => Some(f.stream_id),
            Frame::RstStream { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. } => Some(*stream_id),
            Frame::Settings(_) | Frame::Ping { .. } | Frame::GoAway { .. } | Frame::Unknown { .. } => {
                None
            }
        }
    }

    /// Whether the frame carries the FIN flag
    pub fn is_fin(&self) -> bool {
        match self {
            Frame::SynStream(f) => f.fin,
            Frame::SynReply(f) => f.fin,
            Frame::Data(f) => f.fin,
            Frame::Headers { fin, .. } => *fin,
            _ => false,
        }
    }

    /// Frame name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Frame::SynStream(_) => "SYN_STREAM",
            Frame::SynReply(_) => "SYN_REPLY",
            Frame::Data(_) => "DATA",
            Frame::RstStream { .. } => "RST_STREAM",
            Frame::Settings(_) => "SETTINGS",
            Frame::Ping { .. } => "PING",
            Frame::GoAway { .. } => "GOAWAY",
            Frame::Headers { .. } => "HEADERS",
            Frame::WindowUpdate { .. } => "WINDOW_UPDATE",
            Frame::Unknown { .. } => "UNKNOWN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_conversion() {
        for ty in [
            FrameType::SynStream,
            FrameType::SynReply,
            FrameType::RstStream,
            FrameType::Settings,
            FrameType::Ping,
            FrameType::GoAway,
            FrameType::Headers,
            FrameType::WindowUpdate,
        ] {
            assert_eq!(FrameType::from_u16(ty.as_u16()), Some(ty));
        }
        // NOOP (5) was removed in SPDY/3, CREDENTIAL (10) is not modelled
        assert_eq!(FrameType::from_u16(5), None);
        assert_eq!(FrameType::from_u16(10), None);
    }

    #[test]
    fn test_rst_status_codes() {
        assert_eq!(RstStatus::ProtocolError.as_u32(), 1);
        assert_eq!(RstStatus::InvalidStream.as_u32(), 2);
        assert_eq!(RstStatus::RefusedStream.as_u32(), 3);
        assert_eq!(RstStatus::Cancel.as_u32(), 5);
        assert_eq!(RstStatus::BadContentLength.as_u32(), 6);
        assert_eq!(RstStatus::StreamAlreadyClosed.as_u32(), 9);
        assert_eq!(RstStatus::from_u32(42), RstStatus::Unknown(42));
        assert_eq!(RstStatus::from_u32(42).as_u32(), 42);
    }

    #[test]
    fn test_rst_status_display() {
        assert_eq!(RstStatus::RefusedStream.to_string(), "refused-stream(3)");
        assert_eq!(RstStatus::Unknown(99).to_string(), "unknown(99)");
    }

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::Data(DataFrame::new(StreamId::new(3), "abc", true));
        assert_eq!(frame.stream_id(), Some(StreamId::new(3)));
        assert!(frame.is_fin());
        assert_eq!(frame.frame_type(), None);

        let ping = Frame::ping(2);
        assert_eq!(ping.stream_id(), None);
        assert_eq!(ping.frame_type(), Some(FrameType::Ping));
        assert_eq!(ping.name(), "PING");
    }

    #[test]
    fn test_syn_stream_priority_is_three_bits() {
        let syn = SynStream::new(StreamId::new(1), 0xFF, HeaderBlock::new());
        assert_eq!(syn.priority, 7);
    }

    #[test]
    fn test_settings_lookup() {
        let frame = Frame::settings(vec![
            Setting::new(SettingId::InitialWindowSize, 65536),
            Setting::new(SettingId::MaxConcurrentStreams, 100),
        ]);
        let Frame::Settings(settings) = frame else {
            panic!("Expected Settings frame");
        };
        assert_eq!(settings.get(SettingId::MaxConcurrentStreams), Some(100));
        assert_eq!(settings.get(SettingId::RoundTripTime), None);
    }
}

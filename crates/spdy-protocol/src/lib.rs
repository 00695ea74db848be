//! spdy-protocol: SPDY/3 wire protocol
//!
//! This crate defines the binary framing used between the replay client and
//! SPDY servers: the 8-byte frame header, the typed frames carried over a
//! session, the name/value header block and its zlib compression.

pub mod codec;
pub mod compression;
pub mod error;
pub mod frame;
pub mod headers;
pub mod message;
pub mod stream_id;

pub use codec::FrameCodec;
pub use compression::{HeaderCompressor, HeaderDecompressor};
pub use error::ProtocolError;
pub use frame::{FrameHeader, FrameKind, HEADER_SIZE, MAX_PAYLOAD_SIZE, SPDY_VERSION};
pub use headers::{HeaderBlock, HeaderValue};
pub use message::{
    DataFrame, Frame, FrameType, GoAwayStatus, RstStatus, Setting, SettingId, Settings,
    SynReply, SynStream,
};
pub use stream_id::StreamId;

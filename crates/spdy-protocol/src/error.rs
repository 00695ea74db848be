//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding SPDY frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Control frame announced a version this codec was not configured for
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    /// Frame body does not match the layout of its type
    #[error("Malformed {frame} frame: {reason}")]
    MalformedFrame {
        frame: &'static str,
        reason: &'static str,
    },

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Header block could not be parsed
    #[error("Invalid header block: {0}")]
    InvalidHeaderBlock(&'static str),

    /// zlib state error while (de)compressing a header block
    #[error("Header compression error: {0}")]
    Compression(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<flate2::CompressError> for ProtocolError {
    fn from(err: flate2::CompressError) -> Self {
        ProtocolError::Compression(err.to_string())
    }
}

impl From<flate2::DecompressError> for ProtocolError {
    fn from(err: flate2::DecompressError) -> Self {
        ProtocolError::Compression(err.to_string())
    }
}

//! Core error types for the SPDY client

use spdy_protocol::{GoAwayStatus, ProtocolError, RstStatus, StreamId};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the SPDY client
#[derive(Error, Debug)]
pub enum SpdyError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Stream error
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a session stopped being usable
///
/// Cloned into every stream the failure takes down, so it carries strings
/// instead of source errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Transport could not be established
    #[error("Connect to {origin} failed: {reason}")]
    ConnectFailed { origin: String, reason: String },

    /// Transport was not established in time
    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Read or write on the transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Peer sent bytes that could not be decoded
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// No progress for the configured idle period
    #[error("Session idle for {0:?}")]
    IdleTimeout(Duration),

    /// Peer sent GOAWAY
    #[error("Peer sent GOAWAY (last good {last_good_id}, status {status})")]
    GoAwayReceived {
        last_good_id: StreamId,
        status: GoAwayStatus,
    },

    /// This side sent GOAWAY; no new streams are accepted
    #[error("Session is going away")]
    GoingAway,

    /// Session was closed locally
    #[error("Session closed")]
    Closed,
}

/// Terminal failure of one stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Reset raised by this side (cancel, refusal, bad content-length ...)
    #[error("Stream reset locally: {0}")]
    LocalReset(RstStatus),

    /// Reset sent by the peer
    #[error("Stream reset by peer: {0}")]
    RemoteReset(RstStatus),

    /// Stream was live when its session went down
    #[error("Stream aborted: {0}")]
    Aborted(SessionError),

    /// Request never made it onto the wire
    #[error("Request not sent: {0}")]
    Connection(SessionError),

    /// Write after the local side was closed
    #[error("Stream is half-closed")]
    HalfClosed,
}

impl StreamError {
    /// Reset code behind this error, if it was a reset
    pub fn code(&self) -> Option<RstStatus> {
        match self {
            StreamError::LocalReset(code) | StreamError::RemoteReset(code) => Some(*code),
            _ => None,
        }
    }

    /// Whether the failure came from the session rather than the stream
    pub fn is_connection_level(&self) -> bool {
        matches!(self, StreamError::Aborted(_) | StreamError::Connection(_))
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

//! Client configuration

use serde::{Deserialize, Serialize};
use spdy_protocol::SPDY_VERSION;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;
use crate::types::Priority;

/// Configuration for the SPDY client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Use plaintext TCP instead of TLS
    pub plain: bool,

    /// Port used when a request host does not name one
    pub port: Option<u16>,

    /// Protocol version written into control frames
    pub version: u16,

    /// Per-stream receive window advertised to the peer
    pub window_size: u32,

    /// Live stream cap per session, lowered by peer SETTINGS
    pub max_concurrent_streams: u32,

    /// Tear a session down after this long without progress
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,

    /// Connection timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Verify server certificates against the webpki roots.
    ///
    /// Replay targets are usually test servers with self-signed
    /// certificates, hence off by default.
    pub verify_certificates: bool,

    pub user_agent: String,
    pub accept: String,
    pub accept_encoding: String,

    /// Value of the `:version` pseudo-header
    pub http_version: String,

    /// Priority of requests that do not set one (0-7)
    pub default_priority: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            plain: false,
            port: None,
            version: SPDY_VERSION,
            window_size: 1 << 20,
            max_concurrent_streams: 1000,
            idle_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(30),
            verify_certificates: false,
            user_agent: format!("spdy-replay/{}", env!("CARGO_PKG_VERSION")),
            accept: "*/*".to_string(),
            accept_encoding: "gzip,deflate".to_string(),
            http_version: "HTTP/1.1".to_string(),
            default_priority: 6,
        }
    }
}

impl ClientConfig {
    /// Check values the protocol cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != SPDY_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported protocol version {} (only {} is implemented)",
                self.version, SPDY_VERSION
            )));
        }
        if self.window_size == 0 || self.window_size > 0x7FFF_FFFF {
            return Err(ConfigError::Invalid(format!(
                "window_size must be between 1 and 2^31-1, got {}",
                self.window_size
            )));
        }
        if self.max_concurrent_streams == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_streams must be at least 1".to_string(),
            ));
        }
        if self.default_priority > Priority::LOWEST.value() {
            return Err(ConfigError::Invalid(format!(
                "default_priority must be 0-7, got {}",
                self.default_priority
            )));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::Invalid("idle_timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// Session settings derived from this configuration
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            version: self.version,
            window_size: self.window_size,
            max_concurrent_streams: self.max_concurrent_streams,
            idle_timeout: self.idle_timeout,
            connect_timeout: self.connect_timeout,
            user_agent: self.user_agent.clone(),
            accept: self.accept.clone(),
            accept_encoding: self.accept_encoding.clone(),
            http_version: self.http_version.clone(),
        }
    }

    pub fn default_priority(&self) -> Priority {
        Priority::new(self.default_priority)
    }
}

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub version: u16,
    pub window_size: u32,
    pub max_concurrent_streams: u32,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    pub accept: String,
    pub accept_encoding: String,
    pub http_version: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        ClientConfig::default().session_options()
    }
}

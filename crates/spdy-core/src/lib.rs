//! spdy-core: Shared types, errors and configuration for the SPDY client
//!
//! This crate sits between the wire protocol and the session engine: it
//! defines what a request and a reply look like, how failures are reported,
//! how the client is configured and how transports are obtained.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{ClientConfig, SessionOptions};
pub use error::{ConfigError, SessionError, SpdyError, StreamError};
pub use traits::{BoxedTransport, Connector, Transport};
pub use types::{Body, Origin, Priority, Reply, Request, Scheme};

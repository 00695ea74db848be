//! spdy-client: SPDY/3 client engine
//!
//! Multiplexes many request/response streams over one connection per
//! origin. [`Client`] keeps the per-origin [`Session`]s; each submitted
//! request yields a [`StreamHandle`] that delivers reply headers, body
//! chunks and exactly one terminal event.

pub mod client;
pub mod connector;
pub mod replay;
pub mod session;
pub mod stream;

pub use client::Client;
pub use connector::NetConnector;
pub use session::{Session, SessionPhase};
pub use stream::{Response, StreamEvent, StreamHandle, StreamState};

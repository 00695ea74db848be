//! Core trait definitions

mod transport;

pub use transport::{BoxedTransport, Connector, Transport};

//! Transport traits
//!
//! A session only needs a duplex byte channel. Anything that is
//! `AsyncRead + AsyncWrite` qualifies, which lets tests drive a session over
//! an in-memory `tokio::io::duplex` pipe.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::types::Origin;

/// Duplex byte channel a session runs over
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased transport
pub type BoxedTransport = Box<dyn Transport>;

/// Establishes transports to origins
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `origin`, including any TLS handshake
    async fn connect(&self, origin: &Origin) -> io::Result<BoxedTransport>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// Hands out pre-made in-memory pipes
    struct PipeConnector {
        pipes: Mutex<Vec<DuplexStream>>,
    }

    #[async_trait]
    impl Connector for PipeConnector {
        async fn connect(&self, origin: &Origin) -> io::Result<BoxedTransport> {
            let pipe = self.pipes.lock().unwrap().pop().ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionRefused, origin.to_string())
            })?;
            Ok(Box::new(pipe))
        }
    }

    #[tokio::test]
    async fn test_boxed_transport_is_duplex() {
        let (local, mut remote) = tokio::io::duplex(64);
        let connector = PipeConnector {
            pipes: Mutex::new(vec![local]),
        };
        let origin = Origin::http("example.com");

        let mut transport = connector.connect(&origin).await.unwrap();
        transport.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        let err = connector.connect(&origin).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}

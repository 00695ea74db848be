//! TCP and TLS transports
//!
//! Plain origins get a bare TCP stream. TLS origins negotiate the SPDY
//! protocol through ALPN; certificate checks are optional since replay
//! targets are commonly test servers.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use spdy_core::{BoxedTransport, ClientConfig, Connector, Origin};

/// Opens transports to origins over the network
pub struct NetConnector {
    tls: TlsConnector,
    alpn: Vec<u8>,
}

impl NetConnector {
    pub fn new(config: &ClientConfig) -> Result<Self, rustls::Error> {
        let alpn = format!("spdy/{}", config.version).into_bytes();
        let tls = build_tls_config(config.verify_certificates, alpn.clone())?;
        Ok(Self {
            tls: TlsConnector::from(Arc::new(tls)),
            alpn,
        })
    }
}

#[async_trait]
impl Connector for NetConnector {
    async fn connect(&self, origin: &Origin) -> io::Result<BoxedTransport> {
        let tcp = TcpStream::connect(origin.socket_addr()).await?;
        tcp.set_nodelay(true)?;

        if !origin.is_tls() {
            debug!("TCP connection to {} established", origin);
            return Ok(Box::new(tcp));
        }

        let server_name = ServerName::try_from(origin.host.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let tls = self.tls.connect(server_name, tcp).await?;

        match tls.get_ref().1.alpn_protocol() {
            Some(proto) if proto == self.alpn.as_slice() => {
                debug!("TLS connection to {} negotiated {}", origin, String::from_utf8_lossy(proto));
            }
            Some(proto) => warn!(
                "{} negotiated {} instead of {}",
                origin,
                String::from_utf8_lossy(proto),
                String::from_utf8_lossy(&self.alpn)
            ),
            None => warn!("{} did not negotiate a protocol via ALPN", origin),
        }
        Ok(Box::new(tls))
    }
}

fn build_tls_config(verify: bool, alpn: Vec<u8>) -> Result<rustls::ClientConfig, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let mut config = if verify {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert { provider }))
            .with_no_client_auth()
    };
    config.alpn_protocols = vec![alpn];
    Ok(config)
}

/// Accepts any server certificate but still checks handshake signatures
#[derive(Debug)]
struct AcceptAnyCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpn_advertised() {
        let config = build_tls_config(false, b"spdy/3".to_vec()).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"spdy/3".to_vec()]);

        let verified = build_tls_config(true, b"spdy/3".to_vec()).unwrap();
        assert_eq!(verified.alpn_protocols.len(), 1);
    }

    #[tokio::test]
    async fn test_plain_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = NetConnector::new(&ClientConfig::default()).unwrap();
        let origin = Origin::new(spdy_core::Scheme::Http, "127.0.0.1", port);
        assert!(connector.connect(&origin).await.is_err());
    }

    #[tokio::test]
    async fn test_plain_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connector = NetConnector::new(&ClientConfig::default()).unwrap();
        let origin = Origin::new(spdy_core::Scheme::Http, "127.0.0.1", port);
        let (accepted, connected) = tokio::join!(listener.accept(), connector.connect(&origin));
        accepted.unwrap();
        connected.unwrap();
    }
}

//! Client façade: one session per origin, opened on demand

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use spdy_core::{ClientConfig, Connector, Origin, Request, SpdyError};

use crate::connector::NetConnector;
use crate::session::Session;
use crate::stream::StreamHandle;

/// Routes requests to per-origin sessions
pub struct Client {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    /// Sessions indexed by origin
    sessions: DashMap<Origin, Session>,
}

impl Client {
    /// Create a client that connects over the network
    pub fn new(config: ClientConfig) -> Result<Self, SpdyError> {
        let connector = NetConnector::new(&config).map_err(|e| {
            SpdyError::Config(spdy_core::ConfigError::Invalid(format!("TLS setup failed: {}", e)))
        })?;
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a client that opens transports through `connector`
    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, SpdyError> {
        config.validate()?;
        Ok(Self {
            config,
            connector,
            sessions: DashMap::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Origin a request host maps to. The configured port applies when the
    /// host names none.
    pub fn origin_for(&self, host: &str) -> Result<Origin, SpdyError> {
        let mut origin = Origin::parse(host, self.config.plain)?;
        if let Some(port) = self.config.port {
            let authority = host
                .split_once("://")
                .map_or(host, |(_, rest)| rest)
                .split('/')
                .next()
                .unwrap_or_default();
            if !authority.contains(':') {
                origin.port = port;
            }
        }
        Ok(origin)
    }

    /// Session for `origin`, opening a new one when there is none or the
    /// existing one no longer accepts streams
    pub fn session(&self, origin: &Origin) -> Session {
        let mut entry = self
            .sessions
            .entry(origin.clone())
            .or_insert_with(|| self.open_session(origin));
        if !entry.is_usable() {
            debug!("Replacing spent session to {}", origin);
            *entry = self.open_session(origin);
        }
        entry.clone()
    }

    fn open_session(&self, origin: &Origin) -> Session {
        info!("Opening session to {}", origin);
        Session::open(
            origin.clone(),
            self.config.session_options(),
            Arc::clone(&self.connector),
        )
    }

    /// Submit a request on the session for its host
    pub fn request(&self, request: Request) -> Result<StreamHandle, SpdyError> {
        let origin = self.origin_for(&request.host)?;
        Ok(self.session(&origin).submit(request))
    }

    /// GET with the configured default priority
    pub fn get(&self, host: &str, path: &str) -> Result<StreamHandle, SpdyError> {
        self.request(Request::get(host, path).with_priority(self.config.default_priority()))
    }

    /// POST with the configured default priority
    pub fn post(
        &self,
        host: &str,
        path: &str,
        body: impl Into<bytes::Bytes>,
    ) -> Result<StreamHandle, SpdyError> {
        self.request(Request::post(host, path, body).with_priority(self.config.default_priority()))
    }

    /// Number of sessions currently held
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Close every session
    pub async fn shutdown(&self) {
        let sessions: Vec<Session> = self.sessions.iter().map(|r| r.value().clone()).collect();
        self.sessions.clear();
        futures::future::join_all(sessions.iter().map(Session::close)).await;
        info!("Closed {} sessions", sessions.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spdy_core::Scheme;

    fn client(config: ClientConfig) -> Client {
        Client::new(config).unwrap()
    }

    #[test]
    fn test_origin_for_applies_port() {
        let client = client(ClientConfig {
            plain: true,
            port: Some(8080),
            ..Default::default()
        });
        assert_eq!(
            client.origin_for("example.com").unwrap(),
            Origin::new(Scheme::Http, "example.com", 8080)
        );
        assert_eq!(
            client.origin_for("example.com:9000").unwrap(),
            Origin::new(Scheme::Http, "example.com", 9000)
        );
        assert_eq!(
            client.origin_for("https://example.com/x").unwrap(),
            Origin::new(Scheme::Https, "example.com", 8080)
        );
    }

    #[test]
    fn test_origin_for_defaults_to_tls() {
        let client = client(ClientConfig::default());
        assert_eq!(
            client.origin_for("example.com").unwrap(),
            Origin::https("example.com")
        );
        assert!(client.origin_for("gopher://example.com").is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ClientConfig {
            max_concurrent_streams: 0,
            ..Default::default()
        };
        assert!(matches!(Client::new(config), Err(SpdyError::Config(_))));
    }
}

//! Core domain types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use spdy_protocol::HeaderBlock;
use std::fmt;

use crate::error::ConfigError;

/// URL scheme of an origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    /// Port used when an origin does not name one
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection key: one session exists per origin
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Origin {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// TLS origin on the default port
    pub fn https(host: impl Into<String>) -> Self {
        Self::new(Scheme::Https, host, Scheme::Https.default_port())
    }

    /// Plaintext origin on the default port
    pub fn http(host: impl Into<String>) -> Self {
        Self::new(Scheme::Http, host, Scheme::Http.default_port())
    }

    /// Parse `scheme://host[:port]`, `host:port` or a bare host.
    ///
    /// Without a scheme, `plain` picks between http and https.
    pub fn parse(input: &str, plain: bool) -> Result<Self, ConfigError> {
        let (scheme, rest) = match input.split_once("://") {
            Some(("http", rest)) => (Scheme::Http, rest),
            Some(("https", rest)) => (Scheme::Https, rest),
            Some((other, _)) => {
                return Err(ConfigError::Invalid(format!("unsupported scheme: {}", other)))
            }
            None if plain => (Scheme::Http, input),
            None => (Scheme::Https, input),
        };

        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(ConfigError::Invalid(format!("missing host in {:?}", input)));
        }

        match authority.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ConfigError::Invalid(format!("invalid port in {:?}", input)))?;
                Ok(Self::new(scheme, host, port))
            }
            Some(_) => Err(ConfigError::Invalid(format!("missing host in {:?}", input))),
            None => Ok(Self::new(scheme, authority, scheme.default_port())),
        }
    }

    /// Whether connections to this origin use TLS
    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// `host:port` for socket addressing
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Value of the `:host` header; the port is omitted when it is the default
    pub fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            self.socket_addr()
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Stream priority, 0 is the most urgent and 7 the least
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(0);
    pub const LOWEST: Priority = Priority(7);

    /// Create a priority, clamping out-of-range values to the lowest
    pub fn new(value: u8) -> Self {
        Self(value.min(Self::LOWEST.0))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(6)
    }
}

/// Request payload
#[derive(Debug, Clone, Default)]
pub enum Body {
    /// No payload; the request half-closes with its header frame
    #[default]
    Empty,
    /// Whole payload known up front
    Full(Bytes),
    /// Payload supplied later through the stream handle
    Streaming,
}

impl Body {
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// One request submitted on a session
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub host: String,
    pub path: String,
    pub headers: HeaderBlock,
    pub priority: Priority,
    pub body: Body,
}

impl Request {
    /// Start a request for `method host path`
    pub fn new(method: impl Into<String>, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            host: host.into(),
            path: path.into(),
            headers: HeaderBlock::new(),
            priority: Priority::default(),
            body: Body::Empty,
        }
    }

    pub fn get(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new("GET", host, path)
    }

    pub fn post(host: impl Into<String>, path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new("POST", host, path).with_body(Body::Full(body.into()))
    }

    /// Set a request header
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderBlock) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Declared `content-length`, if the caller set one
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get_str("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Whether the response to this request never carries a body
    pub fn expects_empty_response(&self) -> bool {
        self.method == "HEAD"
    }
}

/// Reply headers of a stream
#[derive(Debug, Clone)]
pub struct Reply {
    /// Numeric status code, 0 if the peer sent none
    pub status: u16,
    /// Reason phrase after the status code
    pub reason: String,
    pub version: String,
    pub headers: HeaderBlock,
}

impl Reply {
    /// Build a reply from a SYN_REPLY header block
    pub fn from_headers(headers: HeaderBlock) -> Self {
        let status_line = headers.get_str(":status").unwrap_or_default();
        let (code, reason) = status_line.split_once(' ').unwrap_or((status_line, ""));
        Self {
            status: code.trim().parse().unwrap_or(0),
            reason: reason.trim().to_string(),
            version: headers.get_str(":version").unwrap_or_default().to_string(),
            headers,
        }
    }

    /// Declared `content-length` of the response body
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get_str("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Status codes whose responses never carry a body
    pub fn is_bodiless(&self) -> bool {
        matches!(self.status, 100..=199 | 204 | 304)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_parse() {
        let origin = Origin::parse("https://Example.com:8443/index.html", false).unwrap();
        assert_eq!(origin, Origin::new(Scheme::Https, "example.com", 8443));
        assert_eq!(origin.to_string(), "https://example.com:8443");

        let bare = Origin::parse("example.com", true).unwrap();
        assert_eq!(bare, Origin::http("example.com"));
        assert_eq!(bare.authority(), "example.com");

        let with_port = Origin::parse("localhost:4443", false).unwrap();
        assert!(with_port.is_tls());
        assert_eq!(with_port.authority(), "localhost:4443");
    }

    #[test]
    fn test_origin_parse_errors() {
        assert!(Origin::parse("ftp://example.com", false).is_err());
        assert!(Origin::parse("https://", false).is_err());
        assert!(Origin::parse("example.com:notaport", false).is_err());
        assert!(Origin::parse(":443", false).is_err());
    }

    #[test]
    fn test_priority_clamps() {
        assert_eq!(Priority::new(3).value(), 3);
        assert_eq!(Priority::new(42), Priority::LOWEST);
        assert_eq!(Priority::default().value(), 6);
    }

    #[test]
    fn test_request_content_length() {
        let req = Request::get("example.com", "/").header("Content-Length", " 100 ");
        assert_eq!(req.content_length(), Some(100));
        assert_eq!(req.method, "GET");
        assert!(Request::new("head", "h", "/").expects_empty_response());
    }

    #[test]
    fn test_reply_from_headers() {
        let headers: HeaderBlock = [
            (":status", "404 Not Found"),
            (":version", "HTTP/1.1"),
            ("content-length", "12"),
        ]
        .into_iter()
        .collect();
        let reply = Reply::from_headers(headers);
        assert_eq!(reply.status, 404);
        assert_eq!(reply.reason, "Not Found");
        assert_eq!(reply.version, "HTTP/1.1");
        assert_eq!(reply.content_length(), Some(12));
        assert!(!reply.is_bodiless());

        let no_content: HeaderBlock = [(":status", "204")].into_iter().collect();
        assert!(Reply::from_headers(no_content).is_bodiless());
    }
}

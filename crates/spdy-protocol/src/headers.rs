//! Name/value header blocks
//!
//! A header block is the uncompressed payload that SYN_STREAM, SYN_REPLY and
//! HEADERS frames carry:
//!
//! ```text
//! | pair count (32) | name len (32) | name | value len (32) | value | ...
//! ```
//!
//! Names are lowercased. A header with several values is sent once with the
//! values joined by NUL bytes. Hop-by-hop headers have no meaning on a
//! multiplexed connection and are stripped before encoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Headers that never reach the wire
pub const HOP_BY_HOP_HEADERS: [&str; 4] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
];

const VALUE_SEPARATOR: u8 = 0;

/// Value of a single header: one string or an ordered list of them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Single(Bytes),
    List(Vec<Bytes>),
}

impl HeaderValue {
    /// Value as UTF-8 text; list values are rejoined with ", "
    pub fn to_str_lossy(&self) -> String {
        match self {
            HeaderValue::Single(v) => String::from_utf8_lossy(v).into_owned(),
            HeaderValue::List(values) => values
                .iter()
                .map(|v| String::from_utf8_lossy(v))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Single value as `&str`, `None` for lists and non UTF-8 bytes
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Single(v) => std::str::from_utf8(v).ok(),
            HeaderValue::List(_) => None,
        }
    }

    /// Bytes written on the wire for this value
    fn to_wire(&self) -> Bytes {
        match self {
            HeaderValue::Single(v) => v.clone(),
            HeaderValue::List(values) => {
                let mut joined = BytesMut::new();
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        joined.put_u8(VALUE_SEPARATOR);
                    }
                    joined.extend_from_slice(v);
                }
                joined.freeze()
            }
        }
    }

    fn from_wire(raw: Bytes) -> Self {
        if raw.contains(&VALUE_SEPARATOR) {
            HeaderValue::List(
                raw.split(|b| *b == VALUE_SEPARATOR)
                    .map(Bytes::copy_from_slice)
                    .collect(),
            )
        } else {
            HeaderValue::Single(raw)
        }
    }

    fn push(&mut self, value: Bytes) {
        match self {
            HeaderValue::Single(existing) => {
                let first = std::mem::take(existing);
                *self = HeaderValue::List(vec![first, value]);
            }
            HeaderValue::List(values) => values.push(value),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::Single(Bytes::copy_from_slice(v.as_bytes()))
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::Single(Bytes::from(v))
    }
}

impl From<Bytes> for HeaderValue {
    fn from(v: Bytes) -> Self {
        HeaderValue::Single(v)
    }
}

impl From<Vec<&str>> for HeaderValue {
    fn from(values: Vec<&str>) -> Self {
        HeaderValue::List(
            values
                .into_iter()
                .map(|v| Bytes::copy_from_slice(v.as_bytes()))
                .collect(),
        )
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(values: Vec<String>) -> Self {
        HeaderValue::List(values.into_iter().map(Bytes::from).collect())
    }
}

/// Case-insensitive, insertion-ordered header mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    entries: Vec<(String, HeaderValue)>,
}

impl HeaderBlock {
    /// Create an empty header block
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any value stored under the same name
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<HeaderValue>) {
        let name = name.as_ref().to_ascii_lowercase();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Add a value to a header, turning it into a list if it already exists
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<Bytes>) {
        let name = name.as_ref().to_ascii_lowercase();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1.push(value),
            None => self.entries.push((name, HeaderValue::Single(value))),
        }
    }

    /// Look up a header by name, ignoring case
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Single header value as `&str`
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HeaderValue::as_str)
    }

    /// Whether a header is present
    pub fn contains(&self, name: &str) -> bool {
        self.position(&name.to_ascii_lowercase()).is_some()
    }

    /// Remove a header, returning its value
    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        let idx = self.position(&name.to_ascii_lowercase())?;
        Some(self.entries.remove(idx).1)
    }

    /// Iterate over (name, value) pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of headers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, lowered: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == lowered)
    }

    /// Encode the block into its uncompressed wire form
    pub fn encode(&self) -> Bytes {
        let pairs: Vec<(&str, Bytes)> = self
            .entries
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name))
            .map(|(name, value)| (name.as_str(), value.to_wire()))
            .collect();

        let size = 4 + pairs
            .iter()
            .map(|(name, value)| 8 + name.len() + value.len())
            .sum::<usize>();
        let mut dst = BytesMut::with_capacity(size);

        dst.put_u32(pairs.len() as u32);
        for (name, value) in pairs {
            dst.put_u32(name.len() as u32);
            dst.put_slice(name.as_bytes());
            dst.put_u32(value.len() as u32);
            dst.put_slice(&value);
        }
        dst.freeze()
    }

    /// Encode a copy of this block after letting `hook` rewrite it.
    ///
    /// The hook sees lowercased names and may add or remove anything;
    /// hop-by-hop headers are still stripped afterwards.
    pub fn encode_with<F>(&self, hook: F) -> Bytes
    where
        F: FnOnce(&mut HeaderBlock),
    {
        let mut copy = self.clone();
        hook(&mut copy);
        copy.encode()
    }

    /// Decode an uncompressed header block
    pub fn decode(src: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = Bytes::copy_from_slice(src);
        let count = read_u32(&mut buf)? as usize;

        // every pair takes at least 8 bytes, reject absurd counts up front
        if count > buf.remaining() / 8 {
            return Err(ProtocolError::InvalidHeaderBlock("pair count exceeds block size"));
        }

        let mut block = HeaderBlock::new();
        for _ in 0..count {
            let name = read_chunk(&mut buf)?;
            if name.is_empty() {
                return Err(ProtocolError::InvalidHeaderBlock("empty header name"));
            }
            let name = std::str::from_utf8(&name)
                .map_err(|_| ProtocolError::InvalidHeaderBlock("header name is not UTF-8"))?;
            let value = read_chunk(&mut buf)?;
            block.insert(name, HeaderValue::from_wire(value));
        }

        if buf.has_remaining() {
            return Err(ProtocolError::InvalidHeaderBlock("trailing bytes after last pair"));
        }
        Ok(block)
    }
}

/// Whether a header must never be sent over a SPDY session
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn read_u32(buf: &mut Bytes) -> Result<u32, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::InvalidHeaderBlock("truncated length field"));
    }
    Ok(buf.get_u32())
}

fn read_chunk(buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    let len = read_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::InvalidHeaderBlock("truncated name or value"));
    }
    Ok(buf.split_to(len))
}

impl<K, V> FromIterator<(K, V)> for HeaderBlock
where
    K: AsRef<str>,
    V: Into<HeaderValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut block = HeaderBlock::new();
        for (k, v) in iter {
            block.insert(k, v);
        }
        block
    }
}

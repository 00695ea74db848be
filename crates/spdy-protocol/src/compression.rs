//! zlib header block compression
//!
//! Each direction of a session owns one zlib stream for its whole lifetime.
//! Both ends prime it with the fixed SPDY/3 dictionary and flush with
//! `Z_SYNC_FLUSH` after every block, so a block can only be decoded if every
//! block before it in the same direction was decoded too. Losing or skipping
//! a header block desynchronises the session.

use std::sync::OnceLock;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use tracing::trace;

use crate::error::ProtocolError;

/// Upper bound for one inflated header block
pub const MAX_HEADER_BLOCK_SIZE: usize = 1 << 20;

const DICTIONARY_WORDS: &[&str] = &[
    "options",
    "head",
    "post",
    "put",
    "delete",
    "trace",
    "accept",
    "accept-charset",
    "accept-encoding",
    "accept-language",
    "accept-ranges",
    "age",
    "allow",
    "authorization",
    "cache-control",
    "connection",
    "content-base",
    "content-encoding",
    "content-language",
    "content-length",
    "content-location",
    "content-md5",
    "content-range",
    "content-type",
    "date",
    "etag",
    "expect",
    "expires",
    "from",
    "host",
    "if-match",
    "if-modified-since",
    "if-none-match",
    "if-range",
    "if-unmodified-since",
    "last-modified",
    "location",
    "max-forwards",
    "pragma",
    "proxy-authenticate",
    "proxy-authorization",
    "range",
    "referer",
    "retry-after",
    "server",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "user-agent",
    "vary",
    "via",
    "warning",
    "www-authenticate",
    "method",
    "get",
    "status",
    "200 OK",
    "version",
    "HTTP/1.1",
    "url",
    "public",
    "set-cookie",
    "keep-alive",
    "origin",
];

const DICTIONARY_TAIL: &str = concat!(
    "100101201202205206300302303304305306307402405406407408409410411412413414",
    "415416417502504505203 Non-Authoritative Information204 No Content301 ",
    "Moved Permanently400 Bad Request401 Unauthorized403 Forbidden404 Not ",
    "Found500 Internal Server Error501 Not Implemented503 Service Unavailable",
    "Jan Feb Mar Apr May Jun Jul Aug Sept Oct Nov Dec 00:00:00 Mon, Tue, Wed, ",
    "Thu, Fri, Sat, Sun, GMTchunked,text/html,image/png,image/jpg,image/gif,",
    "application/xml,application/xhtml+xml,text/plain,text/javascript,",
    "publicprivatemax-age=gzip,deflate,sdchcharset=utf-8charset=iso-8859-1,",
    "utf-,*,enq=0.",
);

/// The SPDY/3 header compression dictionary
///
/// Each well-known header word is prefixed with its length as a big-endian
/// u32, followed by a raw run of status lines, dates and media types.
pub fn dictionary() -> &'static [u8] {
    static DICTIONARY: OnceLock<Vec<u8>> = OnceLock::new();
    DICTIONARY.get_or_init(|| {
        let mut dict = Vec::with_capacity(1423);
        for word in DICTIONARY_WORDS {
            dict.extend_from_slice(&(word.len() as u32).to_be_bytes());
            dict.extend_from_slice(word.as_bytes());
        }
        dict.extend_from_slice(DICTIONARY_TAIL.as_bytes());
        dict
    })
}

/// Outbound half of a session's header compression
pub struct HeaderCompressor {
    inner: Compress,
}

impl HeaderCompressor {
    /// Create a compressor primed with the SPDY/3 dictionary
    pub fn new() -> Result<Self, ProtocolError> {
        let mut inner = Compress::new(Compression::default(), true);
        inner.set_dictionary(dictionary())?;
        Ok(Self { inner })
    }

    /// Compress one header block and sync-flush it
    pub fn compress(&mut self, block: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity(block.len() / 2 + 64);
        let start = self.inner.total_in();

        loop {
            if out.capacity() - out.len() < 64 {
                out.reserve(out.capacity().max(256));
            }
            let consumed = (self.inner.total_in() - start) as usize;
            self.inner
                .compress_vec(&block[consumed..], &mut out, FlushCompress::Sync)?;

            let consumed = (self.inner.total_in() - start) as usize;
            // sync flush is complete once zlib stops short of filling the buffer
            if consumed == block.len() && out.len() < out.capacity() {
                break;
            }
        }

        trace!(raw = block.len(), compressed = out.len(), "Compressed header block");
        Ok(out)
    }
}

impl std::fmt::Debug for HeaderCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderCompressor")
            .field("total_in", &self.inner.total_in())
            .field("total_out", &self.inner.total_out())
            .finish()
    }
}

/// Inbound half of a session's header compression
pub struct HeaderDecompressor {
    inner: Decompress,
    max_block_size: usize,
}

impl HeaderDecompressor {
    /// Create a decompressor; the dictionary is supplied when zlib asks for it
    pub fn new() -> Self {
        Self {
            inner: Decompress::new(true),
            max_block_size: MAX_HEADER_BLOCK_SIZE,
        }
    }

    /// Inflate one sync-flushed header block
    pub fn decompress(&mut self, block: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity(block.len() * 4 + 64);
        let start = self.inner.total_in();

        loop {
            if out.len() == out.capacity() {
                if out.len() >= self.max_block_size {
                    return Err(ProtocolError::InvalidHeaderBlock(
                        "inflated header block too large",
                    ));
                }
                out.reserve(out.capacity().max(256));
            }

            let consumed = (self.inner.total_in() - start) as usize;
            let produced = out.len();
            match self
                .inner
                .decompress_vec(&block[consumed..], &mut out, FlushDecompress::Sync)
            {
                Ok(Status::StreamEnd) => break,
                Ok(_) => {}
                Err(err) if err.needs_dictionary().is_some() => {
                    self.inner.set_dictionary(dictionary())?;
                    continue;
                }
                Err(err) => return Err(err.into()),
            }

            let now_consumed = (self.inner.total_in() - start) as usize;
            if now_consumed == block.len() && out.len() < out.capacity() {
                break;
            }
            if now_consumed == consumed && out.len() == produced && out.len() < out.capacity() {
                return Err(ProtocolError::InvalidHeaderBlock(
                    "truncated compressed header block",
                ));
            }
        }

        trace!(compressed = block.len(), raw = out.len(), "Inflated header block");
        Ok(out)
    }
}

impl Default for HeaderDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HeaderDecompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderDecompressor")
            .field("total_in", &self.inner.total_in())
            .field("total_out", &self.inner.total_out())
            .finish()
    }
}

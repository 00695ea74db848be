//! Stream identifier type

use std::fmt;

/// Identifier of a stream within one session.
///
/// Only the low 31 bits travel on the wire. Client-initiated streams use odd
/// ids, server-initiated (pushed) streams use even ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Largest id representable in the 31-bit wire field
    pub const MAX: StreamId = StreamId(0x7FFF_FFFF);

    /// Id 0, used by GOAWAY when no stream was accepted and by
    /// connection-level WINDOW_UPDATE
    pub const ZERO: StreamId = StreamId(0);

    /// First id a client allocates
    pub const FIRST_CLIENT: StreamId = StreamId(1);

    /// Create a new stream ID
    pub fn new(id: u32) -> Self {
        Self(id & Self::MAX.0)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Whether this id belongs to a client-initiated stream
    pub fn is_client_initiated(&self) -> bool {
        self.0 % 2 == 1
    }

    /// The next client id after this one, or `None` once the id space is spent
    pub fn next_client(&self) -> Option<StreamId> {
        let next = if self.0 == 0 { 1 } else { self.0.checked_add(2)? };
        (next <= Self::MAX.0).then_some(StreamId(next))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

impl From<u32> for StreamId {
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_display() {
        assert_eq!(format!("{}", StreamId::new(7)), "stream-7");
    }

    #[test]
    fn test_new_masks_reserved_bit() {
        assert_eq!(StreamId::new(0x8000_0003).as_u32(), 3);
    }

    #[test]
    fn test_client_ids_are_odd_and_increase() {
        let first = StreamId::ZERO.next_client().unwrap();
        assert_eq!(first, StreamId::FIRST_CLIENT);
        assert!(first.is_client_initiated());

        let second = first.next_client().unwrap();
        assert_eq!(second.as_u32(), 3);
        assert!(second > first);
    }

    #[test]
    fn test_client_id_space_exhausts() {
        assert!(StreamId::MAX.next_client().is_none());
        assert!(!StreamId::new(2).is_client_initiated());
    }
}

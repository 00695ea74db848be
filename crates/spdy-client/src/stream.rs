//! Streams: one request/response exchange on a session
//!
//! A [`StreamCore`] is shared between the caller's [`StreamHandle`], the
//! session's stream table and the session tasks. Every transition goes
//! through its mutex, and the terminal transition (`finish`) happens exactly
//! once no matter which side triggers it.
//!
//! Lock order: a session's state lock may be held while taking a stream
//! lock, never the other way round.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use spdy_core::{Reply, Request, SessionError, StreamError};
use spdy_protocol::{Frame, HeaderBlock, RstStatus, StreamId};

use crate::session::{Command, SessionInner};

/// Lifecycle of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Queued, no id yet
    Pending,
    /// Id assigned, header frame sent
    Open,
    /// Our final frame is on the wire
    HalfClosedLocal,
    /// Peer sent its final frame
    HalfClosedRemote,
    /// Both sides finished
    Closed,
    /// Torn down before completing
    Reset,
}

/// Notification delivered to the owner of a stream
///
/// At most one `Headers`, then any number of `Data`, then exactly one of
/// `Finished` or `Failed`.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Headers(Reply),
    Data { chunk: Bytes, fin: bool },
    Finished,
    Failed(StreamError),
}

/// A completed exchange
#[derive(Debug, Clone)]
pub struct Response {
    pub reply: Reply,
    pub body: Bytes,
}

/// What the dispatcher owes the peer after handing a frame to a stream
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound {
    Accepted,
    /// Stream was reset locally; the peer gets an RST_STREAM with this code
    Reset(RstStatus),
    /// Half the receive window is used; replenish it by this much
    WindowUpdate(u32),
}

struct Inner {
    id: Option<StreamId>,
    state: StreamState,
    reply: Option<Reply>,
    expected_in: Option<u64>,
    received_in: u64,
    expected_out: Option<u64>,
    queued_out: u64,
    /// No more writes accepted
    local_fin_queued: bool,
    closed_local: bool,
    closed_remote: bool,
    outbound: VecDeque<(Bytes, bool)>,
    header_sent: bool,
    unacked: u32,
    reset_code: Option<RstStatus>,
    failure: Option<StreamError>,
    destroyed: bool,
    /// Dropped after the terminal event
    events: Option<mpsc::UnboundedSender<StreamEvent>>,
}

impl Inner {
    fn refresh_state(&mut self) {
        self.state = match (self.closed_local, self.closed_remote) {
            (false, false) => StreamState::Open,
            (true, false) => StreamState::HalfClosedLocal,
            (false, true) => StreamState::HalfClosedRemote,
            (true, true) => StreamState::Closed,
        };
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(events) = &self.events {
            // the handle may already be gone
            let _ = events.send(event);
        }
    }
}

pub(crate) struct StreamCore {
    request: Request,
    session: Weak<SessionInner>,
    window_size: u32,
    inner: Mutex<Inner>,
}

impl StreamCore {
    pub(crate) fn new(
        request: Request,
        session: Weak<SessionInner>,
        window_size: u32,
    ) -> (Arc<Self>, StreamHandle) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let core = Arc::new(Self {
            inner: Mutex::new(Inner {
                id: None,
                state: StreamState::Pending,
                reply: None,
                expected_in: None,
                received_in: 0,
                expected_out: request.content_length(),
                queued_out: 0,
                local_fin_queued: false,
                closed_local: false,
                closed_remote: false,
                outbound: VecDeque::new(),
                header_sent: false,
                unacked: 0,
                reset_code: None,
                failure: None,
                destroyed: false,
                events: Some(events),
            }),
            request,
            session,
            window_size,
        });
        let handle = StreamHandle {
            core: Arc::clone(&core),
            events: events_rx,
        };
        (core, handle)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, command: Command) {
        if let Some(session) = self.session.upgrade() {
            session.send(command);
        }
    }

    pub(crate) fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn id(&self) -> Option<StreamId> {
        self.lock().id
    }

    pub(crate) fn state(&self) -> StreamState {
        self.lock().state
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    /// The request has no body: the header frame carries FIN. A non-zero
    /// declared content-length can never be met.
    pub(crate) fn close_with_headers(self: &Arc<Self>) -> Result<(), StreamError> {
        let declared = {
            let mut inner = self.lock();
            inner.local_fin_queued = true;
            inner.expected_out
        };
        match declared {
            Some(len) if len != 0 => {
                tracing::warn!("Request has no body but content-length declared {}", len);
                self.reset_and_notify(RstStatus::BadContentLength);
                Err(StreamError::LocalReset(RstStatus::BadContentLength))
            }
            _ => Ok(()),
        }
    }

    /// Queue outbound payload. Flushed right away once the header frame is
    /// on the wire, otherwise right after it.
    pub(crate) fn enqueue(self: &Arc<Self>, data: Bytes, fin: bool) -> Result<(), StreamError> {
        let flush = {
            let mut inner = self.lock();
            if inner.destroyed {
                return Err(inner.failure.clone().unwrap_or(StreamError::HalfClosed));
            }
            if inner.local_fin_queued {
                return Err(StreamError::HalfClosed);
            }

            inner.queued_out += data.len() as u64;
            let length_ok = match (fin, inner.expected_out) {
                (true, Some(expected)) => expected == inner.queued_out,
                _ => true,
            };
            if !length_ok {
                tracing::warn!(
                    "Request body is {} bytes but content-length declared {:?}",
                    inner.queued_out,
                    inner.expected_out
                );
                None
            } else {
                if fin {
                    inner.local_fin_queued = true;
                }
                if !data.is_empty() || fin {
                    inner.outbound.push_back((data, fin));
                }
                Some(inner.header_sent)
            }
        };

        match flush {
            None => {
                self.reset_and_notify(RstStatus::BadContentLength);
                Err(StreamError::LocalReset(RstStatus::BadContentLength))
            }
            Some(true) => {
                self.send(Command::Flush(Arc::clone(self)));
                Ok(())
            }
            Some(false) => Ok(()),
        }
    }

    /// Claim `id` for this stream; false if it was cancelled while queued
    pub(crate) fn activate(&self, id: StreamId) -> bool {
        let mut inner = self.lock();
        if inner.destroyed {
            return false;
        }
        inner.id = Some(id);
        inner.state = StreamState::Open;
        true
    }

    /// Whether the header frame should carry FIN
    pub(crate) fn syn_fin(&self) -> bool {
        let inner = self.lock();
        inner.local_fin_queued && inner.outbound.is_empty()
    }

    /// Header frame is on the wire; hand back everything buffered behind it
    pub(crate) fn header_sent(&self, fin: bool) -> Vec<(Bytes, bool)> {
        let mut inner = self.lock();
        inner.header_sent = true;
        if fin {
            inner.closed_local = true;
        }
        if inner.destroyed {
            return Vec::new();
        }
        inner.refresh_state();
        inner.outbound.drain(..).collect()
    }

    /// Buffered payload written after the header frame
    pub(crate) fn drain_outbound(&self) -> Vec<(Bytes, bool)> {
        let mut inner = self.lock();
        if inner.destroyed || !inner.header_sent {
            return Vec::new();
        }
        inner.outbound.drain(..).collect()
    }

    /// Our final DATA frame is on the wire
    pub(crate) fn local_fin_sent(self: &Arc<Self>) {
        let done = {
            let mut inner = self.lock();
            if inner.destroyed {
                return;
            }
            inner.closed_local = true;
            inner.refresh_state();
            inner.closed_remote
        };
        if done {
            self.finish(Ok(()));
        }
    }

    pub(crate) fn on_reply(self: &Arc<Self>, headers: HeaderBlock, fin: bool) -> Inbound {
        {
            let mut inner = self.lock();
            if inner.destroyed {
                return Inbound::Accepted;
            }
            if inner.reply.is_some() {
                drop(inner);
                tracing::warn!("Duplicate SYN_REPLY on {:?}", self.id());
                self.reset(RstStatus::StreamInUse);
                return Inbound::Reset(RstStatus::StreamInUse);
            }

            let reply = Reply::from_headers(headers);
            let bodiless = self.request.expects_empty_response() || reply.is_bodiless();
            inner.expected_in = if bodiless { None } else { reply.content_length() };
            inner.reply = Some(reply.clone());
            inner.emit(StreamEvent::Headers(reply));
        }

        if fin {
            self.on_remote_fin()
        } else {
            Inbound::Accepted
        }
    }

    pub(crate) fn on_data(self: &Arc<Self>, chunk: Bytes, fin: bool) -> Inbound {
        let update = {
            let mut inner = self.lock();
            if inner.destroyed {
                return Inbound::Accepted;
            }
            let violation = if inner.reply.is_none() {
                Some(RstStatus::InvalidStream)
            } else if inner.closed_remote {
                Some(RstStatus::StreamAlreadyClosed)
            } else {
                None
            };
            if let Some(code) = violation {
                drop(inner);
                tracing::warn!("Dropping DATA on {:?}: {}", self.id(), code);
                self.reset(code);
                return Inbound::Reset(code);
            }

            let len = chunk.len();
            inner.received_in += len as u64;
            inner.unacked = inner.unacked.saturating_add(len as u32);
            inner.emit(StreamEvent::Data { chunk, fin });

            if !fin && inner.unacked >= self.window_size / 2 {
                Some(std::mem::take(&mut inner.unacked))
            } else {
                None
            }
        };

        if fin {
            self.on_remote_fin()
        } else {
            update.map_or(Inbound::Accepted, Inbound::WindowUpdate)
        }
    }

    /// HEADERS frame: only its FIN matters here
    pub(crate) fn on_headers(self: &Arc<Self>, fin: bool) -> Inbound {
        let has_reply = {
            let inner = self.lock();
            if inner.destroyed {
                return Inbound::Accepted;
            }
            inner.reply.is_some()
        };
        if !has_reply {
            self.reset(RstStatus::ProtocolError);
            return Inbound::Reset(RstStatus::ProtocolError);
        }
        if fin {
            self.on_remote_fin()
        } else {
            Inbound::Accepted
        }
    }

    fn on_remote_fin(self: &Arc<Self>) -> Inbound {
        enum Next {
            Violation(RstStatus),
            Wait,
            Done,
        }

        let next = {
            let mut inner = self.lock();
            if inner.destroyed {
                return Inbound::Accepted;
            }
            if inner.closed_remote {
                Next::Violation(RstStatus::ProtocolError)
            } else if inner
                .expected_in
                .is_some_and(|expected| expected != inner.received_in)
            {
                tracing::warn!(
                    "Response body is {} bytes but content-length declared {:?}",
                    inner.received_in,
                    inner.expected_in
                );
                Next::Violation(RstStatus::BadContentLength)
            } else {
                inner.closed_remote = true;
                inner.refresh_state();
                if inner.closed_local {
                    Next::Done
                } else {
                    Next::Wait
                }
            }
        };

        match next {
            Next::Violation(code) => {
                self.reset(code);
                Inbound::Reset(code)
            }
            Next::Wait => Inbound::Accepted,
            Next::Done => {
                self.finish(Ok(()));
                Inbound::Accepted
            }
        }
    }

    /// Peer reset the stream; nothing is sent back
    pub(crate) fn on_remote_reset(self: &Arc<Self>, code: RstStatus) {
        self.finish(Err(StreamError::RemoteReset(code)));
    }

    /// Over the concurrency cap: the id is spent but nothing hits the wire
    pub(crate) fn refuse(self: &Arc<Self>, id: StreamId) {
        {
            let mut inner = self.lock();
            if inner.destroyed {
                return;
            }
            inner.id = Some(id);
        }
        self.finish(Err(StreamError::LocalReset(RstStatus::RefusedStream)));
    }

    /// Session went down while the stream was live
    pub(crate) fn abort(self: &Arc<Self>, reason: SessionError) {
        self.finish(Err(StreamError::Aborted(reason)));
    }

    /// Request never reached the wire
    pub(crate) fn fail_unsent(self: &Arc<Self>, reason: SessionError) {
        self.finish(Err(StreamError::Connection(reason)));
    }

    /// Local reset; returns the id if the peer knows about this stream
    fn reset(self: &Arc<Self>, code: RstStatus) -> Option<StreamId> {
        self.finish(Err(StreamError::LocalReset(code)))
    }

    /// Local reset that also tells the peer, if it ever saw the stream
    pub(crate) fn reset_and_notify(self: &Arc<Self>, code: RstStatus) {
        if let Some(id) = self.reset(code) {
            tracing::debug!("Resetting {} with {}", id, code);
            if let Some(session) = self.session.upgrade() {
                session.note_reset(id);
                session.send(Command::Frame(Frame::rst_stream(id, code)));
            }
        }
    }

    /// Terminal transition. Returns the stream id when this call destroyed a
    /// stream that had one.
    fn finish(self: &Arc<Self>, result: Result<(), StreamError>) -> Option<StreamId> {
        let id = {
            let mut inner = self.lock();
            if inner.destroyed {
                return None;
            }
            inner.destroyed = true;
            inner.outbound.clear();
            match result {
                Ok(()) => {
                    inner.state = StreamState::Closed;
                    inner.emit(StreamEvent::Finished);
                }
                Err(err) => {
                    inner.state = StreamState::Reset;
                    inner.reset_code = err.code();
                    inner.failure = Some(err.clone());
                    inner.emit(StreamEvent::Failed(err));
                }
            }
            inner.events = None;
            inner.id
        };

        if let (Some(id), Some(session)) = (id, self.session.upgrade()) {
            session.remove_stream(id, self);
        }
        id
    }
}

/// Caller's side of a stream: write, cancel and subscribe
pub struct StreamHandle {
    core: Arc<StreamCore>,
    events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl StreamHandle {
    /// Assigned stream id, `None` until the header frame is sent
    pub fn id(&self) -> Option<StreamId> {
        self.core.id()
    }

    pub fn state(&self) -> StreamState {
        self.core.state()
    }

    /// Code of the reset that ended this stream, if any
    pub fn reset_code(&self) -> Option<RstStatus> {
        self.core.lock().reset_code
    }

    /// Queue request payload
    pub fn write(&self, data: impl Into<Bytes>) -> Result<(), StreamError> {
        self.core.enqueue(data.into(), false)
    }

    /// Queue the last piece of request payload and half-close
    pub fn write_final(&self, data: impl Into<Bytes>) -> Result<(), StreamError> {
        self.core.enqueue(data.into(), true)
    }

    /// Abandon the stream. Never written if it was still queued, otherwise
    /// the peer gets one RST_STREAM.
    pub fn cancel(&self) {
        self.core.reset_and_notify(RstStatus::Cancel);
    }

    /// Next event, `None` once the terminal event has been consumed and the
    /// stream is gone
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Wait for the whole response
    pub async fn response(mut self) -> Result<Response, StreamError> {
        let mut reply = None;
        let mut body = BytesMut::new();

        while let Some(event) = self.next_event().await {
            match event {
                StreamEvent::Headers(r) => reply = Some(r),
                StreamEvent::Data { chunk, .. } => body.extend_from_slice(&chunk),
                StreamEvent::Finished => {
                    return reply
                        .map(|reply| Response {
                            reply,
                            body: body.freeze(),
                        })
                        .ok_or(StreamError::LocalReset(RstStatus::ProtocolError));
                }
                StreamEvent::Failed(err) => return Err(err),
            }
        }
        Err(StreamError::Aborted(SessionError::Closed))
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(request: Request) -> (Arc<StreamCore>, StreamHandle) {
        StreamCore::new(request, Weak::new(), 1 << 16)
    }

    fn reply_headers(status: &str, content_length: Option<&str>) -> HeaderBlock {
        let mut headers = HeaderBlock::new();
        headers.insert(":status", status);
        headers.insert(":version", "HTTP/1.1");
        if let Some(len) = content_length {
            headers.insert("content-length", len);
        }
        headers
    }

    #[tokio::test]
    async fn test_terminal_event_delivered_once() {
        let (core, mut handle) = detached(Request::get("example.com", "/"));
        core.fail_unsent(SessionError::Closed);
        core.abort(SessionError::Closed);
        core.on_remote_reset(RstStatus::Cancel);

        assert!(matches!(
            handle.next_event().await,
            Some(StreamEvent::Failed(StreamError::Connection(SessionError::Closed)))
        ));
        assert!(handle.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_reply_then_data_then_finish() {
        let (core, handle) = detached(Request::get("example.com", "/"));
        core.close_with_headers().unwrap();
        assert!(core.activate(StreamId::new(1)));
        assert!(core.syn_fin());
        assert!(core.header_sent(true).is_empty());
        assert_eq!(core.state(), StreamState::HalfClosedLocal);

        assert_eq!(core.on_reply(reply_headers("200 OK", Some("5")), false), Inbound::Accepted);
        assert_eq!(core.on_data(Bytes::from_static(b"hel"), false), Inbound::Accepted);
        assert_eq!(core.on_data(Bytes::from_static(b"lo"), true), Inbound::Accepted);
        assert_eq!(core.state(), StreamState::Closed);

        let response = handle.response().await.unwrap();
        assert_eq!(response.reply.status, 200);
        assert_eq!(&response.body[..], b"hello");
    }

    #[tokio::test]
    async fn test_data_without_reply_is_invalid() {
        let (core, mut handle) = detached(Request::get("example.com", "/"));
        core.activate(StreamId::new(1));

        assert_eq!(
            core.on_data(Bytes::from_static(b"x"), true),
            Inbound::Reset(RstStatus::InvalidStream)
        );
        assert!(matches!(
            handle.next_event().await,
            Some(StreamEvent::Failed(StreamError::LocalReset(RstStatus::InvalidStream)))
        ));
        assert_eq!(handle.reset_code(), Some(RstStatus::InvalidStream));
    }

    #[tokio::test]
    async fn test_final_write_checks_declared_length() {
        let request = Request::post("example.com", "/upload", Bytes::new())
            .header("content-length", "100");
        let (core, handle) = detached(request);

        core.enqueue(Bytes::from(vec![0u8; 60]), false).unwrap();
        let err = handle.write_final(vec![0u8; 41]).unwrap_err();
        assert_eq!(err, StreamError::LocalReset(RstStatus::BadContentLength));
        assert!(core.is_destroyed());
        assert_eq!(handle.write(vec![1u8]), Err(err));
    }

    #[test]
    fn test_writes_after_final_rejected() {
        let (_core, handle) = detached(Request::get("example.com", "/"));
        handle.write_final("done").unwrap();
        assert_eq!(handle.write("more"), Err(StreamError::HalfClosed));
    }

    #[test]
    fn test_buffered_writes_released_in_order() {
        let (core, handle) = detached(Request::get("example.com", "/"));
        handle.write("a").unwrap();
        handle.write("b").unwrap();
        handle.write_final("c").unwrap();
        assert!(core.drain_outbound().is_empty());

        core.activate(StreamId::new(1));
        assert!(!core.syn_fin());
        let chunks = core.header_sent(false);
        let flat: Vec<(&[u8], bool)> = chunks.iter().map(|(b, f)| (&b[..], *f)).collect();
        assert_eq!(flat, vec![(&b"a"[..], false), (&b"b"[..], false), (&b"c"[..], true)]);
    }

    #[tokio::test]
    async fn test_window_update_after_half_window() {
        let (core, _handle) = StreamCore::new(Request::get("h", "/"), Weak::new(), 100);
        core.activate(StreamId::new(1));
        core.on_reply(reply_headers("200 OK", None), false);

        assert_eq!(core.on_data(Bytes::from(vec![0u8; 30]), false), Inbound::Accepted);
        assert_eq!(
            core.on_data(Bytes::from(vec![0u8; 30]), false),
            Inbound::WindowUpdate(60)
        );
        assert_eq!(core.on_data(Bytes::from(vec![0u8; 10]), false), Inbound::Accepted);
    }

    #[tokio::test]
    async fn test_head_reply_ignores_content_length() {
        let (core, handle) = detached(Request::new("HEAD", "example.com", "/"));
        core.close_with_headers().unwrap();
        core.activate(StreamId::new(1));
        core.header_sent(true);

        core.on_reply(reply_headers("200 OK", Some("1024")), true);
        let response = handle.response().await.unwrap();
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_bodiless_request_with_declared_length_rejected() {
        let request = Request::get("example.com", "/").header("content-length", "12");
        let (core, mut handle) = detached(request);
        assert!(matches!(
            core.close_with_headers(),
            Err(StreamError::LocalReset(RstStatus::BadContentLength))
        ));
        assert!(matches!(
            handle.next_event().await,
            Some(StreamEvent::Failed(StreamError::LocalReset(RstStatus::BadContentLength)))
        ));
        assert!(!core.activate(StreamId::new(1)));

        let zero = Request::get("example.com", "/").header("content-length", "0");
        let (core, _handle) = detached(zero);
        assert!(core.close_with_headers().is_ok());
        assert!(core.syn_fin());
    }

    #[test]
    fn test_cancelled_stream_cannot_activate() {
        let (core, handle) = detached(Request::get("example.com", "/"));
        handle.cancel();
        assert!(!core.activate(StreamId::new(1)));
        assert_eq!(handle.state(), StreamState::Reset);
        assert_eq!(handle.id(), None);
    }
}

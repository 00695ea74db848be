//! One multiplexed connection to an origin
//!
//! A session runs two tasks: the driver owns the write half and serializes
//! every outbound frame, the dispatcher owns the read half and routes inbound
//! frames to streams. Callers talk to the driver through a command queue, so
//! requests submitted before the transport is up are written in submission
//! order once it is.

mod dispatch;
mod driver;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use spdy_core::{Body, Connector, Origin, Request, SessionError, SessionOptions};
use spdy_protocol::{Frame, GoAwayStatus, HeaderBlock, ProtocolError, StreamId};

use crate::stream::{StreamCore, StreamHandle};

/// How many locally reset ids are remembered for dropping late frames
const RECENT_RESETS: usize = 64;

/// Work handed to the driver task
pub(crate) enum Command {
    /// Assign an id and write the header frame
    Open(Arc<StreamCore>),
    /// Write payload buffered on an open stream
    Flush(Arc<StreamCore>),
    Frame(Frame),
    GoAway(GoAwayStatus),
    /// GOAWAY, shut the transport down, then signal
    Close(oneshot::Sender<()>),
}

/// Connection phase as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Transport not established yet
    Pending,
    Connected,
    /// GOAWAY sent; live streams finish, new ones are refused
    GoingAway,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Connected,
    Closed,
}

struct SessionState {
    phase: Phase,
    streams: HashMap<StreamId, Arc<StreamCore>>,
    /// Highest id handed out
    last_stream_id: StreamId,
    /// Highest id the peer replied to
    last_good_id: StreamId,
    /// Set once this side sent GOAWAY
    go_away: Option<StreamId>,
    /// Ids this side sent RST_STREAM for, newest last
    recent_resets: VecDeque<StreamId>,
    max_concurrent_streams: u32,
    pings: HashMap<u32, (Instant, oneshot::Sender<Duration>)>,
    last_activity: Instant,
    failure: Option<SessionError>,
}

pub(crate) struct SessionInner {
    origin: Origin,
    options: SessionOptions,
    state: Mutex<SessionState>,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    next_ping_id: AtomicU32,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn send(&self, command: Command) {
        // a closed queue means the driver is gone and teardown already ran
        let _ = self.commands.send(command);
    }

    pub(crate) fn stream(&self, id: StreamId) -> Option<Arc<StreamCore>> {
        self.lock().streams.get(&id).cloned()
    }

    /// Drop a finished stream from the table, unless the slot was reused
    pub(crate) fn remove_stream(&self, id: StreamId, stream: &Arc<StreamCore>) {
        let mut state = self.lock();
        if state
            .streams
            .get(&id)
            .is_some_and(|live| Arc::ptr_eq(live, stream))
        {
            state.streams.remove(&id);
        }
    }

    /// Remember that the peer was sent an RST_STREAM for `id`
    pub(crate) fn note_reset(&self, id: StreamId) {
        let mut state = self.lock();
        if state.recent_resets.len() == RECENT_RESETS {
            state.recent_resets.pop_front();
        }
        state.recent_resets.push_back(id);
    }

    /// Frames the peer sent before our RST_STREAM reached it
    pub(crate) fn was_reset(&self, id: StreamId) -> bool {
        self.lock().recent_resets.contains(&id)
    }

    pub(crate) fn touch(&self) {
        self.lock().last_activity = Instant::now();
    }

    fn last_activity(&self) -> Instant {
        self.lock().last_activity
    }

    pub(crate) fn note_reply(&self, id: StreamId) {
        let mut state = self.lock();
        if id > state.last_good_id {
            state.last_good_id = id;
        }
    }

    pub(crate) fn lower_stream_cap(&self, cap: u32) {
        let mut state = self.lock();
        if cap < state.max_concurrent_streams {
            info!(
                "Peer lowered max concurrent streams on {} from {} to {}",
                self.origin, state.max_concurrent_streams, cap
            );
            state.max_concurrent_streams = cap;
        }
    }

    pub(crate) fn complete_ping(&self, id: u32) {
        let waiter = self.lock().pings.remove(&id);
        match waiter {
            Some((sent, done)) => {
                let _ = done.send(sent.elapsed());
            }
            None => debug!("Unsolicited PING reply {}", id),
        }
    }

    fn failure(&self) -> SessionError {
        self.lock().failure.clone().unwrap_or(SessionError::Closed)
    }

    /// Mark the transport up; false if the session was torn down meanwhile
    fn mark_connected(&self) -> bool {
        let mut state = self.lock();
        if state.phase == Phase::Closed {
            return false;
        }
        state.phase = Phase::Connected;
        state.last_activity = Instant::now();
        true
    }

    /// Tear the session down; every live stream fails with `reason`.
    /// Only the first call has any effect.
    pub(crate) fn teardown(&self, reason: SessionError) {
        let (streams, pings) = {
            let mut state = self.lock();
            if state.phase == Phase::Closed {
                return;
            }
            state.phase = Phase::Closed;
            state.failure = Some(reason.clone());
            (
                std::mem::take(&mut state.streams),
                std::mem::take(&mut state.pings),
            )
        };
        drop(pings);

        if reason == SessionError::Closed {
            info!("Session to {} closed", self.origin);
        } else {
            info!("Session to {} torn down: {}", self.origin, reason);
        }
        for stream in streams.into_values() {
            stream.abort(reason.clone());
        }
        self.cancel.cancel();
    }

    /// Header block for a request: caller headers plus the pseudo-headers
    /// and the defaults it did not override
    pub(crate) fn request_headers(&self, request: &Request) -> HeaderBlock {
        let options = &self.options;
        let mut headers = request.headers.clone();

        let host = if request.host.is_empty() || request.host.contains("://") {
            self.origin.authority()
        } else {
            request.host.clone()
        };
        headers.insert(":method", request.method.as_str());
        headers.insert(":path", request.path.as_str());
        headers.insert(":version", options.http_version.as_str());
        headers.insert(":host", host);
        headers.insert(":scheme", self.origin.scheme.as_str());

        for (name, value) in [
            ("user-agent", &options.user_agent),
            ("accept", &options.accept),
            ("accept-encoding", &options.accept_encoding),
        ] {
            if !headers.contains(name) {
                headers.insert(name, value.as_str());
            }
        }
        headers
    }
}

/// Handle to a session; clones share the same connection
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start connecting to `origin` in the background. Must be called from
    /// within a tokio runtime.
    pub fn open(origin: Origin, options: SessionOptions, connector: Arc<dyn Connector>) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SessionInner {
            state: Mutex::new(SessionState {
                phase: Phase::Pending,
                streams: HashMap::new(),
                last_stream_id: StreamId::ZERO,
                last_good_id: StreamId::ZERO,
                go_away: None,
                recent_resets: VecDeque::new(),
                max_concurrent_streams: options.max_concurrent_streams,
                pings: HashMap::new(),
                last_activity: Instant::now(),
                failure: None,
            }),
            origin,
            options,
            commands,
            cancel: CancellationToken::new(),
            next_ping_id: AtomicU32::new(1),
        });

        tokio::spawn(driver::run(Arc::clone(&inner), connector, commands_rx));
        Self { inner }
    }

    /// Queue a request. Failures are reported through the returned handle,
    /// never by blocking the caller.
    pub fn submit(&self, mut request: Request) -> StreamHandle {
        let body = std::mem::take(&mut request.body);
        if let Body::Full(data) = &body {
            if !request.headers.contains("content-length") {
                request.headers.insert("content-length", data.len().to_string());
            }
        }

        let (stream, handle) = StreamCore::new(
            request,
            Arc::downgrade(&self.inner),
            self.inner.options.window_size,
        );
        let queued = match body {
            Body::Empty => stream.close_with_headers(),
            Body::Full(data) => stream.enqueue(data, true),
            Body::Streaming => Ok(()),
        };
        if queued.is_err() {
            return handle;
        }

        let rejected = {
            let state = self.inner.lock();
            if state.phase == Phase::Closed {
                Some(state.failure.clone().unwrap_or(SessionError::Closed))
            } else if state.go_away.is_some() {
                Some(SessionError::GoingAway)
            } else {
                // sent under the lock so queue order matches submission order
                self.inner
                    .commands
                    .send(Command::Open(Arc::clone(&stream)))
                    .err()
                    .map(|_| SessionError::Closed)
            }
        };
        if let Some(reason) = rejected {
            debug!("Rejecting {} {}: {}", stream.request().method, stream.request().path, reason);
            stream.fail_unsent(reason);
        }
        handle
    }

    /// Stop accepting new streams and tell the peer so; live streams run on
    pub fn go_away(&self, status: GoAwayStatus) {
        {
            let mut state = self.inner.lock();
            if state.phase == Phase::Closed || state.go_away.is_some() {
                return;
            }
            state.go_away = Some(state.last_stream_id);
        }
        info!("Going away from {} ({})", self.inner.origin, status);
        self.inner.send(Command::GoAway(status));
    }

    /// Send GOAWAY, release the transport and fail whatever is still live.
    /// A session still connecting gives up on the connect instead; its
    /// queued requests fail unsent.
    pub async fn close(&self) {
        let (done, done_rx) = oneshot::channel();
        {
            let mut state = self.inner.lock();
            match state.phase {
                Phase::Closed => return,
                Phase::Pending => {
                    state.go_away = Some(state.last_stream_id);
                    drop(state);
                    self.inner.teardown(SessionError::Closed);
                    return;
                }
                Phase::Connected => {}
            }
            if state.go_away.is_none() {
                state.go_away = Some(state.last_stream_id);
            }
            if self.inner.commands.send(Command::Close(done)).is_err() {
                return;
            }
        }
        let _ = done_rx.await;
    }

    /// Measure a PING round trip
    pub async fn ping(&self) -> Result<Duration, SessionError> {
        let id = self.inner.next_ping_id.fetch_add(2, Ordering::Relaxed);
        let (done, done_rx) = oneshot::channel();
        {
            let mut state = self.inner.lock();
            if state.phase == Phase::Closed {
                return Err(state.failure.clone().unwrap_or(SessionError::Closed));
            }
            state.pings.insert(id, (Instant::now(), done));
        }
        self.inner.send(Command::Frame(Frame::ping(id)));
        match done_rx.await {
            Ok(rtt) => Ok(rtt),
            Err(_) => Err(self.inner.failure()),
        }
    }

    /// Wait until the session is torn down
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await
    }

    pub fn state(&self) -> SessionPhase {
        let state = self.inner.lock();
        match state.phase {
            Phase::Closed => SessionPhase::Closed,
            _ if state.go_away.is_some() => SessionPhase::GoingAway,
            Phase::Pending => SessionPhase::Pending,
            Phase::Connected => SessionPhase::Connected,
        }
    }

    /// Whether new requests can still be submitted
    pub fn is_usable(&self) -> bool {
        matches!(self.state(), SessionPhase::Pending | SessionPhase::Connected)
    }

    /// Number of streams in the live table
    pub fn active_streams(&self) -> usize {
        self.inner.lock().streams.len()
    }

    pub fn contains_stream(&self, id: StreamId) -> bool {
        self.inner.lock().streams.contains_key(&id)
    }

    pub fn last_stream_id(&self) -> StreamId {
        self.inner.lock().last_stream_id
    }

    pub fn max_concurrent_streams(&self) -> u32 {
        self.inner.lock().max_concurrent_streams
    }

    /// Why the session went down, once it has
    pub fn failure(&self) -> Option<SessionError> {
        self.inner.lock().failure.clone()
    }

    pub fn origin(&self) -> &Origin {
        &self.inner.origin
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("origin", &self.inner.origin)
            .field("state", &self.state())
            .finish()
    }
}

/// Map a codec failure onto the session error it causes
fn session_error(err: ProtocolError) -> SessionError {
    match err {
        ProtocolError::Io(e) => SessionError::Transport(e.to_string()),
        other => SessionError::Protocol(other.to_string()),
    }
}


//! Read side of a session: route inbound frames to streams

use std::sync::Arc;

use futures::StreamExt;
use tokio::io::ReadHalf;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

use spdy_core::{BoxedTransport, SessionError};
use spdy_protocol::{Frame, FrameCodec, RstStatus, SettingId, StreamId};

use super::{session_error, Command, SessionInner};
use crate::stream::Inbound;

/// Dispatcher task: read until the transport fails, the peer goes away or
/// nothing happens for the idle period
pub(super) async fn run(
    inner: Arc<SessionInner>,
    mut reader: FramedRead<ReadHalf<BoxedTransport>, FrameCodec>,
) {
    let idle = inner.options.idle_timeout;

    let reason = loop {
        let deadline = inner.last_activity() + idle;
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return,
            frame = reader.next() => match frame {
                Some(Ok(frame)) => {
                    inner.touch();
                    dispatch(&inner, frame);
                }
                Some(Err(e)) => {
                    error!("Failed to read from {}: {}", inner.origin, e);
                    break session_error(e);
                }
                None => break SessionError::Transport("connection closed by peer".to_string()),
            },
            _ = tokio::time::sleep_until(deadline) => {
                // writes may have moved the deadline since this one was armed
                if inner.last_activity() + idle <= tokio::time::Instant::now() {
                    break SessionError::IdleTimeout(idle);
                }
            }
        }
    };

    inner.teardown(reason);
}

fn dispatch(inner: &Arc<SessionInner>, frame: Frame) {
    debug!(
        "Received {} on {:?} (fin: {})",
        frame.name(),
        frame.stream_id(),
        frame.is_fin()
    );

    match frame {
        Frame::SynReply(reply) => {
            let id = reply.stream_id;
            match inner.stream(id) {
                Some(stream) => {
                    inner.note_reply(id);
                    respond(inner, id, stream.on_reply(reply.headers, reply.fin));
                }
                None => unknown_stream(inner, id),
            }
        }
        Frame::Data(data) => {
            let id = data.stream_id;
            match inner.stream(id) {
                Some(stream) => respond(inner, id, stream.on_data(data.data, data.fin)),
                None => unknown_stream(inner, id),
            }
        }
        Frame::Headers {
            stream_id, fin, ..
        } => match inner.stream(stream_id) {
            Some(stream) => respond(inner, stream_id, stream.on_headers(fin)),
            None => debug!("HEADERS for unknown {}", stream_id),
        },
        Frame::RstStream { stream_id, status } => match inner.stream(stream_id) {
            Some(stream) => {
                debug!("Peer reset {}: {}", stream_id, status);
                stream.on_remote_reset(status);
            }
            None => debug!("RST_STREAM for unknown {}: {}", stream_id, status),
        },
        Frame::Settings(settings) => {
            for setting in &settings.entries {
                match setting.id {
                    SettingId::MaxConcurrentStreams => inner.lower_stream_cap(setting.value),
                    other => debug!("Ignoring setting {:?} = {}", other, setting.value),
                }
            }
        }
        Frame::Ping { id } => {
            if id % 2 == 0 {
                inner.send(Command::Frame(Frame::ping(id)));
            } else {
                inner.complete_ping(id);
            }
        }
        Frame::GoAway {
            last_good_stream_id,
            status,
        } => {
            info!(
                "Peer {} sent GOAWAY (last good {}, {})",
                inner.origin, last_good_stream_id, status
            );
            inner.teardown(SessionError::GoAwayReceived {
                last_good_id: last_good_stream_id,
                status,
            });
        }
        Frame::WindowUpdate { stream_id, delta } => {
            debug!("Peer granted {} bytes on {}", delta, stream_id);
        }
        Frame::SynStream(push) => {
            debug!("Refusing pushed {}", push.stream_id);
            inner.send(Command::Frame(Frame::rst_stream(
                push.stream_id,
                RstStatus::RefusedStream,
            )));
        }
        Frame::Unknown { frame_type, .. } => {
            debug!("Skipping control frame of unknown type {}", frame_type);
        }
    }
}

fn respond(inner: &SessionInner, id: StreamId, outcome: Inbound) {
    match outcome {
        Inbound::Accepted => {}
        Inbound::Reset(code) => {
            inner.note_reset(id);
            inner.send(Command::Frame(Frame::rst_stream(id, code)))
        }
        Inbound::WindowUpdate(delta) => {
            inner.send(Command::Frame(Frame::window_update(id, delta)))
        }
    }
}

/// Frame for a stream not in the live table. Frames still in flight for a
/// stream this side reset are dropped; anything else, completed streams
/// included, is answered with invalid-stream.
fn unknown_stream(inner: &SessionInner, id: StreamId) {
    if inner.was_reset(id) {
        debug!("Dropping frame for reset {}", id);
    } else {
        warn!("Frame for unknown {}", id);
        inner.send(Command::Frame(Frame::rst_stream(id, RstStatus::InvalidStream)));
    }
}

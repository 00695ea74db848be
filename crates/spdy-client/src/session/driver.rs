//! Connect and write side of a session

use std::sync::Arc;

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::WriteHalf;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, warn};

use spdy_core::{BoxedTransport, Connector, SessionError};
use spdy_protocol::{
    DataFrame, Frame, FrameCodec, GoAwayStatus, Setting, SettingId, StreamId, SynStream,
};

use super::{dispatch, session_error, Command, SessionInner};
use crate::stream::StreamCore;

/// Largest payload written in one DATA frame
const MAX_DATA_CHUNK: usize = 64 * 1024;

/// Driver task: connect, then serve the command queue until the session ends
pub(super) async fn run(
    inner: Arc<SessionInner>,
    connector: Arc<dyn Connector>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut waiters = Vec::new();

    let result = match connect(&inner, connector.as_ref()).await {
        Ok(transport) => {
            let version = inner.options.version;
            let (read_half, write_half) = tokio::io::split(transport);

            if inner.mark_connected() {
                debug!("Connected to {}", inner.origin);
                let reader = FramedRead::new(read_half, FrameCodec::with_version(version));
                tokio::spawn(dispatch::run(Arc::clone(&inner), reader));

                let mut writer = Writer {
                    inner: Arc::clone(&inner),
                    sink: FramedWrite::new(write_half, FrameCodec::with_version(version)),
                };
                writer.serve(&mut commands, &mut waiters).await
            } else {
                Err(inner.failure())
            }
        }
        Err(err) => {
            error!("Failed to connect to {}: {}", inner.origin, err);
            Err(err)
        }
    };

    inner.teardown(result.err().unwrap_or(SessionError::Closed));

    // Whatever is still queued never reached the wire
    let reason = inner.failure();
    commands.close();
    while let Ok(command) = commands.try_recv() {
        match command {
            Command::Open(stream) => stream.fail_unsent(reason.clone()),
            Command::Close(done) => waiters.push(done),
            Command::Flush(_) | Command::Frame(_) | Command::GoAway(_) => {}
        }
    }
    for done in waiters {
        let _ = done.send(());
    }
}

async fn connect(
    inner: &SessionInner,
    connector: &dyn Connector,
) -> Result<BoxedTransport, SessionError> {
    let origin = &inner.origin;
    let timeout = inner.options.connect_timeout;
    debug!("Connecting to {}", origin);

    tokio::select! {
        _ = inner.cancel.cancelled() => Err(inner.failure()),
        result = tokio::time::timeout(timeout, connector.connect(origin)) => match result {
            Ok(Ok(transport)) => Ok(transport),
            Ok(Err(e)) => Err(SessionError::ConnectFailed {
                origin: origin.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(SessionError::ConnectTimeout(timeout)),
        },
    }
}

struct Writer {
    inner: Arc<SessionInner>,
    sink: FramedWrite<WriteHalf<BoxedTransport>, FrameCodec>,
}

impl Writer {
    /// Returns `Ok` when the session was closed on request
    async fn serve(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        waiters: &mut Vec<oneshot::Sender<()>>,
    ) -> Result<(), SessionError> {
        let window = self.inner.options.window_size;
        self.write(Frame::settings(vec![Setting::new(
            SettingId::InitialWindowSize,
            window,
        )]))
        .await?;

        loop {
            let command = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => return Err(self.inner.failure()),
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => return Ok(()),
                },
            };

            match command {
                Command::Open(stream) => self.open_stream(stream).await?,
                Command::Flush(stream) => {
                    if let Some(id) = stream.id() {
                        let chunks = stream.drain_outbound();
                        self.write_chunks(&stream, id, chunks).await?;
                    }
                }
                Command::Frame(frame) => self.write(frame).await?,
                Command::GoAway(status) => {
                    let last_good = self.inner.lock().last_good_id;
                    self.write(Frame::go_away(last_good, status)).await?;
                }
                Command::Close(done) => {
                    waiters.push(done);
                    let last_good = self.inner.lock().last_good_id;
                    self.write(Frame::go_away(last_good, GoAwayStatus::Ok)).await?;
                    if let Err(e) = self.sink.close().await {
                        debug!("Transport shutdown failed: {}", e);
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn open_stream(&mut self, stream: Arc<StreamCore>) -> Result<(), SessionError> {
        enum Admission {
            Skip,
            Reject(SessionError),
            Refuse(StreamId),
            Open(StreamId),
        }

        let admission = {
            let mut state = self.inner.lock();
            if stream.is_destroyed() {
                Admission::Skip
            } else if state.go_away.is_some() {
                Admission::Reject(SessionError::GoingAway)
            } else {
                match state.last_stream_id.next_client() {
                    None => Admission::Reject(SessionError::Protocol(
                        "stream ids exhausted".to_string(),
                    )),
                    Some(id) if state.streams.len() as u64 >= u64::from(state.max_concurrent_streams) => {
                        state.last_stream_id = id;
                        Admission::Refuse(id)
                    }
                    Some(id) => {
                        if stream.activate(id) {
                            state.last_stream_id = id;
                            state.streams.insert(id, Arc::clone(&stream));
                            Admission::Open(id)
                        } else {
                            Admission::Skip
                        }
                    }
                }
            }
        };

        match admission {
            Admission::Skip => {
                debug!("Skipping cancelled request {}", stream.request().path);
                Ok(())
            }
            Admission::Reject(reason) => {
                stream.fail_unsent(reason);
                Ok(())
            }
            Admission::Refuse(id) => {
                warn!(
                    "Refusing {}: {} streams already live on {}",
                    id,
                    self.inner.lock().max_concurrent_streams,
                    self.inner.origin
                );
                stream.refuse(id);
                Ok(())
            }
            Admission::Open(id) => {
                let request = stream.request();
                let fin = stream.syn_fin();
                let headers = self.inner.request_headers(request);
                debug!("Opening {}: {} {}", id, request.method, request.path);

                let syn = SynStream::new(id, request.priority.value(), headers).with_fin(fin);
                self.write(Frame::SynStream(syn)).await?;

                let chunks = stream.header_sent(fin);
                self.write_chunks(&stream, id, chunks).await
            }
        }
    }

    async fn write_chunks(
        &mut self,
        stream: &Arc<StreamCore>,
        id: StreamId,
        chunks: Vec<(Bytes, bool)>,
    ) -> Result<(), SessionError> {
        for (mut data, fin) in chunks {
            loop {
                let piece = data.split_to(data.len().min(MAX_DATA_CHUNK));
                let last = data.is_empty();
                self.write(Frame::Data(DataFrame::new(id, piece, fin && last)))
                    .await?;
                if last {
                    break;
                }
            }
            if fin {
                stream.local_fin_sent();
            }
        }
        Ok(())
    }

    async fn write(&mut self, frame: Frame) -> Result<(), SessionError> {
        debug!(
            "Sending {} on {:?} (fin: {})",
            frame.name(),
            frame.stream_id(),
            frame.is_fin()
        );
        let inner = Arc::clone(&self.inner);
        tokio::select! {
            _ = inner.cancel.cancelled() => Err(inner.failure()),
            result = self.sink.send(frame) => {
                if let Err(e) = result {
                    error!("Failed to write to {}: {}", inner.origin, e);
                    return Err(session_error(e));
                }
                inner.touch();
                Ok(())
            }
        }
    }
}

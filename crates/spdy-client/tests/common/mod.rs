//! Scripted SPDY peer over an in-memory duplex pipe

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;

use spdy_client::{StreamEvent, StreamHandle};
use spdy_core::{BoxedTransport, Connector, Origin, SessionOptions};
use spdy_protocol::{DataFrame, Frame, FrameCodec, HeaderBlock, StreamId, SynReply, SynStream};

const WAIT: Duration = Duration::from_secs(5);

/// Hands the server end of every connection to the test
pub struct TestConnector {
    peers: mpsc::UnboundedSender<Peer>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl TestConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers,
            gate: Mutex::new(None),
        });
        (connector, peers_rx)
    }

    /// First connect blocks until the returned sender fires
    pub fn gated() -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>, oneshot::Sender<()>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let (open, gate) = oneshot::channel();
        let connector = Arc::new(Self {
            peers,
            gate: Mutex::new(Some(gate)),
        });
        (connector, peers_rx, open)
    }
}

#[async_trait]
impl Connector for TestConnector {
    async fn connect(&self, _origin: &Origin) -> io::Result<BoxedTransport> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let (client, server) = tokio::io::duplex(256 * 1024);
        self.peers
            .send(Peer::new(server))
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "test finished"))?;
        Ok(Box::new(client))
    }
}

/// Connector whose connects always fail
pub struct RefusingConnector;

#[async_trait]
impl Connector for RefusingConnector {
    async fn connect(&self, _origin: &Origin) -> io::Result<BoxedTransport> {
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"))
    }
}

/// Server side of a session
pub struct Peer {
    framed: Framed<DuplexStream, FrameCodec>,
}

impl Peer {
    pub fn new(io: DuplexStream) -> Self {
        Self {
            framed: Framed::new(io, FrameCodec::new()),
        }
    }

    pub async fn recv(&mut self) -> Frame {
        tokio::time::timeout(WAIT, self.framed.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("undecodable frame")
    }

    /// Next read result: `None` once the client shut the transport down
    pub async fn recv_end(&mut self) -> Option<Frame> {
        tokio::time::timeout(WAIT, self.framed.next())
            .await
            .expect("timed out waiting for end of stream")
            .map(|r| r.expect("undecodable frame"))
    }

    /// Next frame without a deadline, `None` at end of stream
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.framed.next().await.and_then(Result::ok)
    }

    pub async fn send(&mut self, frame: Frame) {
        self.framed.send(frame).await.expect("send failed");
    }

    /// The SETTINGS every session opens with; returns the advertised window
    pub async fn expect_settings(&mut self) -> u32 {
        match self.recv().await {
            Frame::Settings(settings) => settings
                .get(spdy_protocol::SettingId::InitialWindowSize)
                .expect("no initial window"),
            other => panic!("expected SETTINGS, got {:?}", other),
        }
    }

    pub async fn recv_syn(&mut self) -> SynStream {
        match self.recv().await {
            Frame::SynStream(syn) => syn,
            other => panic!("expected SYN_STREAM, got {:?}", other),
        }
    }

    pub async fn recv_data(&mut self) -> DataFrame {
        match self.recv().await {
            Frame::Data(data) => data,
            other => panic!("expected DATA, got {:?}", other),
        }
    }

    pub async fn reply(&mut self, id: StreamId, status: &str, extra: &[(&str, &str)], fin: bool) {
        self.send(Frame::SynReply(SynReply {
            stream_id: id,
            fin,
            headers: reply_headers(status, extra),
        }))
        .await;
    }

    pub async fn data(&mut self, id: StreamId, data: impl Into<Bytes>, fin: bool) {
        self.send(Frame::Data(DataFrame::new(id, data, fin))).await;
    }

    /// Ping the client and collect every frame it sent before the echo
    pub async fn sync(&mut self, id: u32) -> Vec<Frame> {
        self.send(Frame::ping(id)).await;
        let mut before = Vec::new();
        loop {
            match self.recv().await {
                Frame::Ping { id: echoed } if echoed == id => return before,
                other => before.push(other),
            }
        }
    }
}

pub fn reply_headers(status: &str, extra: &[(&str, &str)]) -> HeaderBlock {
    let mut headers = HeaderBlock::new();
    headers.insert(":status", status);
    headers.insert(":version", "HTTP/1.1");
    for (name, value) in extra {
        headers.insert(*name, *value);
    }
    headers
}

pub fn origin() -> Origin {
    Origin::http("example.com")
}

pub fn options() -> SessionOptions {
    SessionOptions {
        idle_timeout: Duration::from_secs(60),
        ..Default::default()
    }
}

pub async fn next_event(handle: &mut StreamHandle) -> StreamEvent {
    tokio::time::timeout(WAIT, handle.next_event())
        .await
        .expect("timed out waiting for a stream event")
        .expect("event channel closed")
}

/// Skip headers and data, return the terminal event
pub async fn terminal(handle: &mut StreamHandle) -> StreamEvent {
    loop {
        match next_event(handle).await {
            StreamEvent::Headers(_) | StreamEvent::Data { .. } => continue,
            event => return event,
        }
    }
}

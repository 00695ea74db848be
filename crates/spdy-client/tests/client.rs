mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use common::{next_event, Peer, TestConnector};
use spdy_client::replay::{self, TraceEntry};
use spdy_client::{Client, StreamEvent};
use spdy_core::{ClientConfig, SessionError, StreamError};
use spdy_protocol::{Frame, GoAwayStatus, StreamId};

fn plain_config() -> ClientConfig {
    ClientConfig {
        plain: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_one_session_per_origin() {
    let (connector, mut peers) = TestConnector::new();
    let client = Client::with_connector(plain_config(), connector).unwrap();

    let _a = client.get("example.com", "/a").unwrap();
    let _b = client.get("example.com", "/b").unwrap();
    assert_eq!(client.session_count(), 1);

    let mut peer = peers.recv().await.unwrap();
    peer.expect_settings().await;
    let first = peer.recv_syn().await;
    let second = peer.recv_syn().await;
    assert_eq!(first.stream_id, StreamId::new(1));
    assert_eq!(first.priority, 6);
    assert_eq!(second.stream_id, StreamId::new(3));
    assert_eq!(second.headers.get_str(":path"), Some("/b"));

    let _c = client.get("static.example.com", "/c").unwrap();
    assert_eq!(client.session_count(), 2);
    let mut other = peers.recv().await.unwrap();
    other.expect_settings().await;
    let syn = other.recv_syn().await;
    assert_eq!(syn.stream_id, StreamId::new(1));
    assert_eq!(syn.headers.get_str(":host"), Some("static.example.com"));
}

#[tokio::test]
async fn test_spent_session_replaced() {
    let (connector, mut peers) = TestConnector::new();
    let client = Client::with_connector(plain_config(), connector).unwrap();

    let mut handle = client.get("example.com", "/").unwrap();
    let mut peer = peers.recv().await.unwrap();
    peer.expect_settings().await;
    peer.recv_syn().await;
    peer.send(Frame::go_away(StreamId::ZERO, GoAwayStatus::Ok)).await;

    assert!(matches!(
        next_event(&mut handle).await,
        StreamEvent::Failed(StreamError::Aborted(SessionError::GoAwayReceived { .. }))
    ));

    let _retry = client.get("example.com", "/").unwrap();
    assert_eq!(client.session_count(), 1);
    let mut fresh = peers.recv().await.unwrap();
    fresh.expect_settings().await;
    assert_eq!(fresh.recv_syn().await.stream_id, StreamId::new(1));
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let (connector, mut peers) = TestConnector::new();
    let client = Client::with_connector(plain_config(), connector).unwrap();

    let _handle = client.get("example.com", "/").unwrap();
    let mut peer = peers.recv().await.unwrap();
    peer.expect_settings().await;
    peer.recv_syn().await;

    tokio::time::timeout(Duration::from_secs(5), client.shutdown())
        .await
        .unwrap();
    assert_eq!(client.session_count(), 0);
    assert_eq!(
        peer.recv().await,
        Frame::go_away(StreamId::ZERO, GoAwayStatus::Ok)
    );
}

/// Answers every request with a small body
async fn serve(mut peer: Peer) {
    peer.expect_settings().await;
    while let Some(frame) = peer.next_frame().await {
        if let Frame::SynStream(syn) = frame {
            let path = syn.headers.get_str(":path").unwrap_or_default().to_string();
            let len = path.len().to_string();
            peer.reply(syn.stream_id, "200 OK", &[("content-length", len.as_str())], false)
                .await;
            peer.data(syn.stream_id, path, true).await;
        }
    }
}

#[tokio::test]
async fn test_replay_trace() {
    let (connector, peers) = TestConnector::new();
    let client = Arc::new(Client::with_connector(plain_config(), connector).unwrap());

    let server = tokio::spawn(async move {
        let peers = tokio_stream_of(peers);
        peers.for_each_concurrent(None, serve).await;
    });

    let entries = vec![
        TraceEntry {
            host: "example.com".to_string(),
            path: "/index.html".to_string(),
            offset: Duration::ZERO,
        },
        TraceEntry {
            host: "example.com".to_string(),
            path: "/style.css".to_string(),
            offset: Duration::from_millis(20),
        },
        TraceEntry {
            host: "img.example.com".to_string(),
            path: "/logo.png".to_string(),
            offset: Duration::from_millis(10),
        },
    ];

    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        replay::replay(Arc::clone(&client), entries),
    )
    .await
    .unwrap();

    assert_eq!(summary.requests, 3);
    assert_eq!(summary.succeeded, 3, "{:?}", summary.completions);
    assert_eq!(summary.bytes, "/index.html".len() + "/style.css".len() + "/logo.png".len());
    assert_eq!(summary.completions[1].status, Some(200));
    assert!(summary.completions[1].started_ms >= 20);
    assert_eq!(client.session_count(), 2);

    client.shutdown().await;
    server.abort();
}

fn tokio_stream_of(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<Peer>,
) -> impl futures::Stream<Item = Peer> {
    futures::stream::poll_fn(move |cx| rx.poll_recv(cx))
}

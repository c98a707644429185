// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Server tests against a real listener on an ephemeral port.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]
#![allow(clippy::expect_used)]

use super::*;
use futures_util::{SinkExt, StreamExt};
use pl_core::{Hlc, MessageId};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const WAIT: Duration = Duration::from_secs(3);

/// A relay running on a random port.
struct TestServer {
    url: String,
    state: RelayState,
    task: JoinHandle<()>,
    dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_in(TempDir::new().unwrap()).await
    }

    async fn start_in(dir: TempDir) -> Self {
        let state = RelayState::new(dir.path()).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let serving = state.clone();
        let task = tokio::spawn(async move {
            let _ = serve(listener, serving).await;
        });
        TestServer { url, state, task, dir }
    }

    /// Stop accepting connections, handing back the data directory.
    fn stop(self) -> TempDir {
        self.task.abort();
        self.dir
    }
}

struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    async fn connect(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.unwrap();
        TestClient { ws }
    }

    /// Connect and complete the handshake as `sender`.
    async fn open(url: &str, sender: &str) -> Self {
        let mut client = Self::connect(url).await;
        client.send(&ClientFrame::hello(format!("{sender}-device"), sender)).await;
        match client.expect().await {
            ServerFrame::Welcome { session_id } => assert!(session_id.starts_with("session-")),
            other => panic!("expected welcome, got {other:?}"),
        }
        client
    }

    async fn send(&mut self, frame: &ClientFrame) {
        self.send_raw(&frame.to_json().unwrap()).await;
    }

    async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string().into())).await.unwrap();
    }

    async fn publish(&mut self, envelope: Envelope) {
        self.send(&ClientFrame::Publish { envelope }).await;
    }

    async fn subscribe(&mut self, conversation: &str, cursor: Option<u64>) {
        self.send(&ClientFrame::subscribe(conversation, cursor.map(SyncCursor::at))).await;
    }

    /// Next text frame, or `None` once the server hung up.
    async fn recv(&mut self) -> Option<ServerFrame> {
        loop {
            match timeout(WAIT, self.ws.next()).await.unwrap() {
                Some(Ok(Message::Text(text))) => return Some(ServerFrame::from_json(&text).unwrap()),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn expect(&mut self) -> ServerFrame {
        self.recv().await.unwrap()
    }

    async fn assert_silent(&mut self) {
        let next = timeout(Duration::from_millis(100), self.ws.next()).await;
        assert!(next.is_err(), "unexpected frame: {next:?}");
    }
}

fn envelope(id: &str, conversation: &str, sender: &str, body: &str) -> Envelope {
    Envelope {
        id: MessageId::from(id),
        conversation_id: conversation.to_string(),
        sender_id: sender.to_string(),
        body: body.to_string(),
        created_at: Hlc::new(1_000, 0, 7),
    }
}

fn ack(id: &str, conversation: &str, seq: u64) -> ServerFrame {
    ServerFrame::Ack { message_id: MessageId::from(id), conversation_id: conversation.into(), seq }
}

fn cursor_update(conversation: &str, head: u64) -> ServerFrame {
    ServerFrame::CursorUpdate { conversation_id: conversation.into(), cursor: SyncCursor::at(head) }
}

#[tokio::test]
async fn hello_gets_a_fresh_session() {
    let server = TestServer::start().await;
    let mut a = TestClient::connect(&server.url).await;
    let mut b = TestClient::connect(&server.url).await;

    a.send(&ClientFrame::hello("d1", "alice")).await;
    b.send(&ClientFrame::hello("d2", "bob")).await;

    let (ServerFrame::Welcome { session_id: first }, ServerFrame::Welcome { session_id: second }) =
        (a.expect().await, b.expect().await)
    else {
        panic!("expected two welcomes");
    };
    assert_ne!(first, second);
}

#[tokio::test]
async fn frames_before_hello_end_the_connection() {
    let server = TestServer::start().await;
    let mut client = TestClient::connect(&server.url).await;

    client.send(&ClientFrame::ping(1)).await;

    assert_eq!(client.expect().await, ServerFrame::error("expected hello"));
    assert_eq!(client.recv().await, None);
}

#[tokio::test]
async fn second_hello_is_an_error() {
    let server = TestServer::start().await;
    let mut client = TestClient::open(&server.url, "alice").await;

    client.send(&ClientFrame::hello("d1", "alice")).await;

    assert!(matches!(client.expect().await, ServerFrame::Error { .. }));
}

#[tokio::test]
async fn ping_gets_pong() {
    let server = TestServer::start().await;
    let mut client = TestClient::open(&server.url, "alice").await;

    client.send(&ClientFrame::ping(42)).await;

    assert_eq!(client.expect().await, ServerFrame::Pong { id: 42 });
}

#[tokio::test]
async fn malformed_frames_get_an_error_and_the_session_survives() {
    let server = TestServer::start().await;
    let mut client = TestClient::open(&server.url, "alice").await;

    client.send_raw("{\"type\":\"shout\"}").await;
    let ServerFrame::Error { message } = client.expect().await else {
        panic!("expected error frame");
    };
    assert!(message.starts_with("malformed frame"));

    client.send(&ClientFrame::ping(1)).await;
    assert_eq!(client.expect().await, ServerFrame::Pong { id: 1 });
}

#[tokio::test]
async fn publishes_are_sequenced_per_conversation() {
    let server = TestServer::start().await;
    let mut client = TestClient::open(&server.url, "alice").await;

    client.publish(envelope("a", "general", "alice", "one")).await;
    assert_eq!(client.expect().await, ack("a", "general", 1));
    client.publish(envelope("b", "random", "alice", "two")).await;
    assert_eq!(client.expect().await, ack("b", "random", 1));
    client.publish(envelope("c", "general", "alice", "three")).await;
    assert_eq!(client.expect().await, ack("c", "general", 2));

    assert_eq!(server.state.message_count().await, 3);
}

#[tokio::test]
async fn republished_message_is_reacked_not_rebroadcast() {
    let server = TestServer::start().await;
    let mut alice = TestClient::open(&server.url, "alice").await;
    let mut bob = TestClient::open(&server.url, "bob").await;
    bob.subscribe("general", None).await;
    assert_eq!(bob.expect().await, cursor_update("general", 0));

    alice.publish(envelope("a", "general", "alice", "hello")).await;
    assert_eq!(alice.expect().await, ack("a", "general", 1));
    assert!(matches!(bob.expect().await, ServerFrame::Event { seq: 1, .. }));

    alice.publish(envelope("a", "general", "alice", "hello")).await;
    assert_eq!(alice.expect().await, ack("a", "general", 1));
    bob.assert_silent().await;
    assert_eq!(server.state.message_count().await, 1);
}

#[tokio::test]
async fn subscribe_replays_after_cursor_then_reports_head() {
    let server = TestServer::start().await;
    let mut alice = TestClient::open(&server.url, "alice").await;
    for (i, id) in ["a", "b", "c"].iter().enumerate() {
        alice.publish(envelope(id, "general", "alice", id)).await;
        assert_eq!(alice.expect().await, ack(id, "general", i as u64 + 1));
    }

    let mut bob = TestClient::open(&server.url, "bob").await;
    bob.subscribe("general", Some(1)).await;

    let ServerFrame::Event { seq, message, .. } = bob.expect().await else {
        panic!("expected replayed event");
    };
    assert_eq!((seq, message.id.as_str()), (2, "b"));
    assert!(matches!(bob.expect().await, ServerFrame::Event { seq: 3, .. }));
    assert_eq!(bob.expect().await, cursor_update("general", 3));
}

#[tokio::test]
async fn events_reach_only_subscribers_of_the_conversation() {
    let server = TestServer::start().await;
    let mut alice = TestClient::open(&server.url, "alice").await;
    let mut bob = TestClient::open(&server.url, "bob").await;
    let mut carol = TestClient::open(&server.url, "carol").await;
    bob.subscribe("general", None).await;
    carol.subscribe("random", None).await;
    bob.expect().await;
    carol.expect().await;

    alice.publish(envelope("a", "general", "alice", "hi bob")).await;
    assert_eq!(alice.expect().await, ack("a", "general", 1));

    let ServerFrame::Event { conversation_id, seq, message } = bob.expect().await else {
        panic!("expected event");
    };
    assert_eq!((conversation_id.as_str(), seq, message.body.as_str()), ("general", 1, "hi bob"));
    carol.assert_silent().await;
}

#[tokio::test]
async fn publisher_subscribed_to_its_conversation_sees_the_echo() {
    let server = TestServer::start().await;
    let mut alice = TestClient::open(&server.url, "alice").await;
    alice.subscribe("general", None).await;
    assert_eq!(alice.expect().await, cursor_update("general", 0));

    alice.publish(envelope("a", "general", "alice", "hello")).await;

    assert_eq!(alice.expect().await, ack("a", "general", 1));
    assert!(matches!(alice.expect().await, ServerFrame::Event { seq: 1, .. }));
    alice.assert_silent().await;
}

#[tokio::test]
async fn invalid_publishes_are_rejected() {
    let server = TestServer::start().await;
    let mut client = TestClient::open(&server.url, "alice").await;
    let cases = [
        envelope("empty", "general", "alice", "   "),
        envelope("huge", "general", "alice", &"x".repeat(MAX_BODY_BYTES + 1)),
        envelope("nowhere", " ", "alice", "hi"),
        envelope("impostor", "general", "mallory", "hi"),
    ];

    for case in cases {
        let id = case.id.clone();
        client.publish(case).await;
        match client.expect().await {
            ServerFrame::Reject { message_id, .. } => assert_eq!(message_id, id),
            other => panic!("expected reject for {id}, got {other:?}"),
        }
    }
    assert_eq!(server.state.message_count().await, 0);
}

#[tokio::test]
async fn restart_keeps_sequence_and_history() {
    let server = TestServer::start().await;
    let mut alice = TestClient::open(&server.url, "alice").await;
    alice.publish(envelope("a", "general", "alice", "before restart")).await;
    assert_eq!(alice.expect().await, ack("a", "general", 1));
    let dir = server.stop();

    let server = TestServer::start_in(dir).await;
    let mut alice = TestClient::open(&server.url, "alice").await;
    alice.publish(envelope("a", "general", "alice", "before restart")).await;
    assert_eq!(alice.expect().await, ack("a", "general", 1));
    alice.publish(envelope("b", "general", "alice", "after restart")).await;
    assert_eq!(alice.expect().await, ack("b", "general", 2));

    alice.subscribe("general", None).await;
    assert!(matches!(alice.expect().await, ServerFrame::Event { seq: 1, .. }));
    assert!(matches!(alice.expect().await, ServerFrame::Event { seq: 2, .. }));
    assert_eq!(alice.expect().await, cursor_update("general", 2));
}

mod end_to_end {
    use super::*;
    use parley::{ChatClient, Config, RemoteConfig};
    use pl_core::{DeliveryState, Store};

    fn client(sender: &str, url: &str) -> ChatClient {
        let mut config = Config::new(sender).unwrap();
        config.remote = Some(RemoteConfig::new(url));
        ChatClient::new(Store::open_in_memory().unwrap(), config)
    }

    #[tokio::test]
    async fn offline_message_reaches_another_device() {
        let server = TestServer::start().await;
        let alice = client("alice", &server.url);
        let bob = client("bob", &server.url);

        let sent = alice.send_message("general", "written offline").unwrap();
        alice.start_sync().unwrap();
        alice.wait_synced(WAIT).await.unwrap();
        let stored = alice.store().get(&sent.id).unwrap();
        assert_eq!(stored.delivery_state, DeliveryState::Acknowledged);
        assert_eq!(stored.seq, Some(1));

        bob.join("general", &[]).unwrap();
        bob.start_sync().unwrap();
        bob.wait_synced(WAIT).await.unwrap();
        let received = bob.observe_conversation("general").unwrap().snapshot();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].id, sent.id);
        assert_eq!(received[0].sender_id, "alice");

        // Live traffic flows the other way while both stay connected.
        let mut alice_feed = alice.observe_conversation("general").unwrap();
        bob.send_message("general", "got it").unwrap();
        let conversation = loop {
            let messages = timeout(WAIT, alice_feed.changed()).await.unwrap().unwrap();
            if messages.len() == 2 {
                break messages;
            }
        };
        assert_eq!(conversation[1].body, "got it");
        assert_eq!(conversation[1].seq, Some(2));

        alice.shutdown().await;
        bob.shutdown().await;
    }
}

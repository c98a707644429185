// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for sync module tests.
//!
//! [`MockRelay`] is an in-memory relay that speaks the wire protocol well
//! enough to drive the supervisor and the engine: it welcomes, replays on
//! subscribe, sequences and acks publishes, and answers pings. Tests poke
//! it to drop connections, refuse connects, or hold acks back.

#![allow(clippy::unwrap_used)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pl_core::protocol::{ClientFrame, Envelope, ServerFrame};
use pl_core::{Hlc, MessageId, SyncCursor};
use tokio::sync::mpsc;

use super::transport::{BoxFuture, Transport, TransportError, TransportFactory};

struct Connection {
    tx: mpsc::UnboundedSender<ServerFrame>,
    subscriptions: BTreeSet<String>,
}

#[derive(Default)]
struct RelayState {
    next_connection: usize,
    live: HashMap<usize, Connection>,
    connects: usize,
    fail_connects: u32,
    hold_acks: bool,
    swallow_pings: bool,
    rejections: HashMap<String, String>,
    held: Vec<(usize, Envelope)>,
    log: HashMap<String, Vec<(u64, Envelope)>>,
    sequenced: HashMap<MessageId, u64>,
    published: Vec<Envelope>,
    subscribes: Vec<(String, Option<SyncCursor>)>,
}

impl RelayState {
    fn reply(&self, connection: usize, frame: ServerFrame) {
        if let Some(conn) = self.live.get(&connection) {
            let _ = conn.tx.send(frame);
        }
    }

    fn broadcast(&self, seq: u64, envelope: &Envelope) {
        for conn in self.live.values() {
            if conn.subscriptions.contains(&envelope.conversation_id) {
                let _ = conn.tx.send(ServerFrame::event(seq, envelope.clone()));
            }
        }
    }

    fn append(&mut self, envelope: Envelope) -> u64 {
        let log = self.log.entry(envelope.conversation_id.clone()).or_default();
        let seq = log.len() as u64 + 1;
        log.push((seq, envelope.clone()));
        self.sequenced.insert(envelope.id.clone(), seq);
        self.broadcast(seq, &envelope);
        seq
    }

    fn sequence(&mut self, connection: usize, envelope: Envelope) {
        let seq = match self.sequenced.get(&envelope.id) {
            Some(seq) => *seq,
            None => self.append(envelope.clone()),
        };
        self.reply(
            connection,
            ServerFrame::Ack {
                message_id: envelope.id,
                conversation_id: envelope.conversation_id,
                seq,
            },
        );
    }

    fn handle(&mut self, connection: usize, frame: ClientFrame) -> Result<(), TransportError> {
        if !self.live.contains_key(&connection) {
            return Err(TransportError::SendFailed("connection dropped".into()));
        }
        match frame {
            ClientFrame::Hello { .. } => {
                self.reply(
                    connection,
                    ServerFrame::Welcome { session_id: format!("mock-{connection}") },
                );
            }
            ClientFrame::Subscribe { conversation_id, cursor } => {
                self.subscribes.push((conversation_id.clone(), cursor));
                if let Some(conn) = self.live.get_mut(&connection) {
                    conn.subscriptions.insert(conversation_id.clone());
                }
                let log = self.log.get(&conversation_id).cloned().unwrap_or_default();
                for (seq, envelope) in &log {
                    if !cursor.is_some_and(|c| c.covers(*seq)) {
                        self.reply(connection, ServerFrame::event(*seq, envelope.clone()));
                    }
                }
                let head = log.last().map_or(0, |(seq, _)| *seq);
                self.reply(
                    connection,
                    ServerFrame::CursorUpdate { conversation_id, cursor: SyncCursor::at(head) },
                );
            }
            ClientFrame::Publish { envelope } => {
                self.published.push(envelope.clone());
                if let Some(reason) = self.rejections.get(&envelope.body) {
                    let reason = reason.clone();
                    self.reply(connection, ServerFrame::Reject { message_id: envelope.id, reason });
                } else if self.hold_acks {
                    self.held.push((connection, envelope));
                } else {
                    self.sequence(connection, envelope);
                }
            }
            ClientFrame::Ping { id } => {
                if !self.swallow_pings {
                    self.reply(connection, ServerFrame::Pong { id });
                }
            }
        }
        Ok(())
    }
}

/// In-memory relay shared by every transport its factory builds.
#[derive(Clone, Default)]
pub struct MockRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MockRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory handing out transports connected to this relay.
    pub fn factory(&self) -> TransportFactory {
        let relay = self.clone();
        Arc::new(move || Box::new(MockTransport::new(relay.clone())) as Box<dyn Transport>)
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().unwrap().fail_connects = n;
    }

    /// While set, publishes are recorded but neither sequenced nor acked.
    pub fn hold_acks(&self, hold: bool) {
        self.state.lock().unwrap().hold_acks = hold;
    }

    /// Sequence and ack every held publish, in arrival order.
    pub fn release_acks(&self) {
        let mut state = self.state.lock().unwrap();
        state.hold_acks = false;
        for (connection, envelope) in std::mem::take(&mut state.held) {
            state.sequence(connection, envelope);
        }
    }

    pub fn swallow_pings(&self, swallow: bool) {
        self.state.lock().unwrap().swallow_pings = swallow;
    }

    /// Reject every publish carrying `body`.
    pub fn reject_body(&self, body: &str, reason: &str) {
        self.state.lock().unwrap().rejections.insert(body.to_string(), reason.to_string());
    }

    /// Stop rejecting `body`.
    pub fn accept_body(&self, body: &str) {
        self.state.lock().unwrap().rejections.remove(body);
    }

    /// Sequence a message from another participant and fan it out.
    pub fn inject(&self, conversation_id: &str, sender_id: &str, body: &str) -> Envelope {
        let envelope = Envelope {
            id: MessageId::generate(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            body: body.to_string(),
            created_at: Hlc::new(1_000, 0, 99),
        };
        self.state.lock().unwrap().append(envelope.clone());
        envelope
    }

    /// Send a raw frame to every live connection.
    pub fn push(&self, frame: ServerFrame) {
        let state = self.state.lock().unwrap();
        for conn in state.live.values() {
            let _ = conn.tx.send(frame.clone());
        }
    }

    /// Close every live connection from the relay side.
    pub fn drop_connections(&self) {
        self.state.lock().unwrap().live.clear();
    }

    /// Successful connects so far.
    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn live_connections(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    /// Bodies of every publish received, resends included.
    pub fn published_bodies(&self) -> Vec<String> {
        self.state.lock().unwrap().published.iter().map(|e| e.body.clone()).collect()
    }

    /// Bodies sequenced in `conversation_id`, in sequence order.
    pub fn log_bodies(&self, conversation_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .log
            .get(conversation_id)
            .map(|log| log.iter().map(|(_, e)| e.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Every subscribe received, with the cursor it carried.
    pub fn subscribes(&self) -> Vec<(String, Option<SyncCursor>)> {
        self.state.lock().unwrap().subscribes.clone()
    }

    fn accept(&self) -> Result<(usize, mpsc::UnboundedReceiver<ServerFrame>), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(TransportError::ConnectionFailed("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_connection;
        state.next_connection += 1;
        state.connects += 1;
        state.live.insert(id, Connection { tx, subscriptions: BTreeSet::new() });
        Ok((id, rx))
    }

    fn handle(&self, connection: usize, frame: ClientFrame) -> Result<(), TransportError> {
        self.state.lock().unwrap().handle(connection, frame)
    }

    fn close(&self, connection: usize) {
        self.state.lock().unwrap().live.remove(&connection);
    }
}

/// Transport backed by a [`MockRelay`].
pub struct MockTransport {
    relay: MockRelay,
    connection: Option<(usize, mpsc::UnboundedReceiver<ServerFrame>)>,
}

impl MockTransport {
    pub fn new(relay: MockRelay) -> Self {
        MockTransport { relay, connection: None }
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, _url: &str) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.connection = Some(self.relay.accept()?);
            Ok(())
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some((id, _)) = self.connection.take() {
                self.relay.close(id);
            }
            Ok(())
        })
    }

    fn send(&mut self, frame: ClientFrame) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let (id, _) = self.connection.as_ref().ok_or(TransportError::ConnectionClosed)?;
            self.relay.handle(*id, frame)
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<ServerFrame>> {
        Box::pin(async move {
            let (_, rx) = self.connection.as_mut().ok_or(TransportError::ConnectionClosed)?;
            Ok(rx.recv().await)
        })
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

/// Poll `condition` until it holds, panicking after `timeout`.
pub async fn eventually<F>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within {timeout:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

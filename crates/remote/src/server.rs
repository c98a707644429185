// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket server implementation.
//!
//! Each connection must open with `hello`. After that it may subscribe to
//! conversations, publish messages and ping. Sequenced events reach a
//! connection through the shared broadcast channel, filtered to the
//! conversations it subscribed to.

use std::collections::HashMap;
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use pl_core::message::MAX_BODY_BYTES;
use pl_core::{ClientFrame, Envelope, ServerFrame, SyncCursor};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::state::RelayState;

const MAX_CONVERSATION_ID_BYTES: usize = 128;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Run the WebSocket server on the given address.
pub async fn run(addr: SocketAddr, state: RelayState) -> Result<(), BoxError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on: {}", listener.local_addr()?);
    serve(listener, state).await
}

/// Accept connections until the listener fails.
pub(crate) async fn serve(listener: TcpListener, state: RelayState) -> Result<(), BoxError> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }
}

/// Who is on the other end of a connection, once it said hello.
struct Peer {
    session_id: String,
    sender_id: String,
}

/// Frames to send back, and whether to hang up afterwards.
struct Reply {
    frames: Vec<ServerFrame>,
    close: bool,
}

impl Reply {
    fn send(frame: ServerFrame) -> Self {
        Reply { frames: vec![frame], close: false }
    }

    fn close(frame: ServerFrame) -> Self {
        Reply { frames: vec![frame], close: true }
    }
}

struct Connection {
    peer_addr: SocketAddr,
    peer: Option<Peer>,
    /// Highest sequence id already sent, per subscribed conversation.
    sent: HashMap<String, u64>,
}

/// Handle a single WebSocket connection.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: RelayState,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    info!("New WebSocket connection from: {}", peer_addr);

    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    // Subscribe before any replay so no event can slip between the two.
    let mut broadcast_rx = state.subscribe();
    let mut conn = Connection { peer_addr, peer: None, sent: HashMap::new() };

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = conn.handle_text(&text, &state).await;
                        for frame in reply.frames {
                            ws_sink.send(Message::Text(frame.to_json()?.into())).await?;
                        }
                        if reply.close {
                            let _ = ws_sink.close().await;
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} disconnected", peer_addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sink.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(_)) => {
                        // Ignore other message types (Binary, Pong, Frame)
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", peer_addr, e);
                        break;
                    }
                    None => {
                        info!("Client {} stream ended", peer_addr);
                        break;
                    }
                }
            }

            broadcast = broadcast_rx.recv() => {
                match broadcast {
                    Ok(frame) => {
                        if let Some(frame) = conn.forward(frame) {
                            if let Err(e) = ws_sink.send(Message::Text(frame.to_json()?.into())).await {
                                warn!("Failed to send event to {}: {}", peer_addr, e);
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        // Dropping the connection makes the client resubscribe
                        // from its cursor, so nothing is lost.
                        warn!("Client {} lagged by {} events, disconnecting", peer_addr, n);
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    info!("Connection closed: {}", peer_addr);
    Ok(())
}

impl Connection {
    async fn handle_text(&mut self, text: &str, state: &RelayState) -> Reply {
        let frame = match ClientFrame::from_json(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Malformed frame from {}: {}", self.peer_addr, e);
                return Reply::send(ServerFrame::error(format!("malformed frame: {e}")));
            }
        };
        debug!("Received frame from {}: {:?}", self.peer_addr, frame);

        let Some(peer) = &self.peer else {
            return self.hello(frame, state);
        };

        match frame {
            ClientFrame::Hello { .. } => Reply::send(ServerFrame::error("hello already received")),

            ClientFrame::Subscribe { conversation_id, cursor } => {
                self.subscribe(conversation_id, cursor, state).await
            }

            ClientFrame::Publish { envelope } => {
                if let Some(reason) = rejection(&envelope, &peer.sender_id) {
                    info!(
                        session_id = %peer.session_id,
                        message_id = %envelope.id,
                        %reason,
                        "rejected publish"
                    );
                    return Reply::send(ServerFrame::Reject { message_id: envelope.id, reason });
                }
                let message_id = envelope.id.clone();
                let conversation_id = envelope.conversation_id.clone();
                match state.publish(envelope).await {
                    Ok(appended) => {
                        debug!(%message_id, %conversation_id, ?appended, "sequenced publish");
                        Reply::send(ServerFrame::Ack {
                            message_id,
                            conversation_id,
                            seq: appended.seq(),
                        })
                    }
                    Err(e) => {
                        error!(%message_id, error = %e, "failed to log publish");
                        Reply::send(ServerFrame::error(format!("could not store {message_id}: {e}")))
                    }
                }
            }

            ClientFrame::Ping { id } => Reply::send(ServerFrame::Pong { id }),
        }
    }

    fn hello(&mut self, frame: ClientFrame, state: &RelayState) -> Reply {
        let ClientFrame::Hello { device_id, sender_id } = frame else {
            return Reply::close(ServerFrame::error("expected hello"));
        };
        if sender_id.trim().is_empty() {
            return Reply::close(ServerFrame::error("hello without a sender id"));
        }

        let session_id = state.next_session_id();
        info!(%session_id, %device_id, %sender_id, peer = %self.peer_addr, "session opened");
        self.peer = Some(Peer { session_id: session_id.clone(), sender_id });
        Reply::send(ServerFrame::Welcome { session_id })
    }

    async fn subscribe(
        &mut self,
        conversation_id: String,
        cursor: Option<SyncCursor>,
        state: &RelayState,
    ) -> Reply {
        let (events, head) = state.replay(&conversation_id, cursor).await;
        debug!(
            %conversation_id,
            replayed = events.len(),
            head,
            "subscription replay"
        );
        let mut frames: Vec<ServerFrame> =
            events.into_iter().map(|(seq, message)| ServerFrame::event(seq, message)).collect();
        frames.push(ServerFrame::CursorUpdate {
            conversation_id: conversation_id.clone(),
            cursor: SyncCursor::at(head),
        });
        self.sent.insert(conversation_id, head);
        Reply { frames, close: false }
    }

    /// Pass a broadcast event on if this connection subscribed to its
    /// conversation and has not seen it yet.
    fn forward(&mut self, frame: ServerFrame) -> Option<ServerFrame> {
        let ServerFrame::Event { conversation_id, seq, .. } = &frame else {
            return None;
        };
        let sent = self.sent.get_mut(conversation_id)?;
        if *seq <= *sent {
            return None;
        }
        *sent = *seq;
        Some(frame)
    }
}

/// Why a publish cannot be accepted, if it cannot.
fn rejection(envelope: &Envelope, sender_id: &str) -> Option<String> {
    let conversation_id = envelope.conversation_id.trim();
    if conversation_id.is_empty() {
        return Some("conversation id is empty".to_string());
    }
    if conversation_id.len() > MAX_CONVERSATION_ID_BYTES {
        return Some(format!("conversation id exceeds {MAX_CONVERSATION_ID_BYTES} bytes"));
    }
    if envelope.body.trim().is_empty() {
        return Some("message body is empty".to_string());
    }
    if envelope.body.len() > MAX_BODY_BYTES {
        return Some(format!(
            "message body is {} bytes, max {MAX_BODY_BYTES}",
            envelope.body.len()
        ));
    }
    if envelope.sender_id != sender_id {
        return Some(format!(
            "sender '{}' does not match session sender '{sender_id}'",
            envelope.sender_id
        ));
    }
    None
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;

// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Relay state shared by every connection.
//!
//! Wraps the event log for serialized writes and fans sequenced events out
//! over a broadcast channel.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pl_core::{Envelope, Result, ServerFrame, SyncCursor};
use tokio::sync::{broadcast, Mutex};

use crate::log::{Appended, EventLog};

const EVENT_LOG_FILE: &str = "events.jsonl";

/// Broadcast buffer. Connections that fall further behind are dropped and
/// catch up by resubscribing.
const BROADCAST_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct RelayState {
    inner: Arc<RelayStateInner>,
}

struct RelayStateInner {
    log: Mutex<EventLog>,
    broadcast_tx: broadcast::Sender<ServerFrame>,
    next_session: AtomicU64,
}

impl RelayState {
    /// Opens the event log in `data_dir`.
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let log = EventLog::open(data_dir.join(EVENT_LOG_FILE))?;
        Ok(Self::with_log(log))
    }

    pub fn with_log(log: EventLog) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        RelayState {
            inner: Arc::new(RelayStateInner {
                log: Mutex::new(log),
                broadcast_tx,
                next_session: AtomicU64::new(1),
            }),
        }
    }

    pub fn next_session_id(&self) -> String {
        format!("session-{}", self.inner.next_session.fetch_add(1, Ordering::Relaxed))
    }

    /// Sequences `envelope`, broadcasting it if it is new.
    pub async fn publish(&self, envelope: Envelope) -> Result<Appended> {
        let mut log = self.inner.log.lock().await;
        let appended = log.append(envelope.clone())?;
        if let Appended::New(seq) = appended {
            // Sent under the lock so broadcast order matches sequence order.
            let _ = self.inner.broadcast_tx.send(ServerFrame::event(seq, envelope));
        }
        Ok(appended)
    }

    /// Logged events after `cursor` and the conversation head they end at.
    pub async fn replay(
        &self,
        conversation_id: &str,
        cursor: Option<SyncCursor>,
    ) -> (Vec<(u64, Envelope)>, u64) {
        let log = self.inner.log.lock().await;
        (log.events_after(conversation_id, cursor), log.head(conversation_id))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerFrame> {
        self.inner.broadcast_tx.subscribe()
    }

    pub async fn message_count(&self) -> usize {
        self.inner.log.lock().await.len()
    }
}

// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound queue for locally authored messages.
//!
//! Enqueueing is optimistic: the message is persisted as `Pending` together
//! with an outbox entry and the call returns without waiting for the relay.
//! The sync engine later walks the queue with [`OutboundQueue::drain`],
//! which yields every unacknowledged message in enqueue order. A message
//! leaves the queue only when it is acknowledged (or rejected), so walking
//! the queue again after a restart or reconnect sees it again.

use std::collections::VecDeque;
use std::sync::Arc;

use pl_core::{DeliveryState, Hlc, HlcClock, Message, MessageId, OutboxEntry, Store};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::Result;
use crate::validate::{validate_body, validate_conversation_id};

/// Entries fetched from the store per page while draining.
const DRAIN_PAGE_SIZE: usize = 64;

#[derive(Clone)]
pub struct OutboundQueue {
    store: Store,
    clock: Arc<HlcClock>,
    sender_id: String,
    wakeup: Arc<Notify>,
}

impl OutboundQueue {
    pub fn new(store: Store, clock: Arc<HlcClock>, sender_id: impl Into<String>) -> Self {
        OutboundQueue { store, clock, sender_id: sender_id.into(), wakeup: Arc::new(Notify::new()) }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    /// Build a new local message stamped with the next HLC value.
    pub fn compose(&self, conversation_id: &str, body: &str) -> Result<Message> {
        let conversation_id = validate_conversation_id(conversation_id)?;
        validate_body(body)?;
        Ok(Message::compose(conversation_id, &self.sender_id, body, self.clock.now()))
    }

    /// Persist `msg` as `Pending` and wake the sync engine.
    ///
    /// Returns once the message is durable. Storage failures surface here.
    pub fn enqueue(&self, mut msg: Message) -> Result<Message> {
        validate_conversation_id(&msg.conversation_id)?;
        validate_body(&msg.body)?;
        msg.delivery_state = DeliveryState::Pending;
        msg.seq = None;

        let position = self.store.enqueue_outbound(&msg)?;
        debug!(
            message_id = %msg.id,
            conversation_id = %msg.conversation_id,
            position,
            "enqueued outbound message"
        );
        self.wakeup.notify_one();
        Ok(msg)
    }

    /// Every unacknowledged message, oldest first.
    pub fn drain(&self) -> Drain {
        self.drain_after(0)
    }

    /// Like [`drain`](Self::drain), but starting after queue position `after`.
    pub fn drain_after(&self, after: i64) -> Drain {
        Drain { store: self.store.clone(), after, page: VecDeque::new(), done: false }
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.store.outbox_len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Record that the message was written to a stream.
    pub fn mark_sent(&self, id: &MessageId) -> Result<bool> {
        Ok(self.store.update_state(id, DeliveryState::Sent)?)
    }

    /// Record the relay's acknowledgment. The message leaves the queue.
    pub fn acknowledge(&self, id: &MessageId, seq: u64) -> Result<bool> {
        let changed = self.store.acknowledge(id, seq)?;
        if changed {
            debug!(message_id = %id, seq, "message acknowledged");
        }
        Ok(changed)
    }

    /// Record that the relay refused the message. It leaves the queue until
    /// retried.
    pub fn fail(&self, id: &MessageId, reason: &str) -> Result<bool> {
        let changed = self.store.update_state(id, DeliveryState::Failed)?;
        if changed {
            warn!(message_id = %id, reason, "message rejected by relay");
        }
        Ok(changed)
    }

    /// Put a failed message back at the tail of the queue.
    pub fn retry(&self, id: &MessageId) -> Result<bool> {
        let changed = self.store.update_state(id, DeliveryState::Pending)?;
        if changed {
            self.wakeup.notify_one();
        }
        Ok(changed)
    }

    /// Wake the sync engine without enqueueing, e.g. after a join so the new
    /// conversation gets subscribed.
    pub fn wake(&self) {
        self.wakeup.notify_one();
    }

    /// Resolves after the next enqueue, retry or wake.
    pub async fn notified(&self) {
        self.wakeup.notified().await;
    }

    /// Fold an inbound timestamp into the local clock so replies sort after it.
    pub fn observe(&self, seen: &Hlc) {
        self.clock.receive(seen);
    }
}

/// Lazy walk over the outbox, fetching a page at a time.
///
/// Each call to [`OutboundQueue::drain`] starts a fresh walk, so the
/// sequence can be restarted at will. Entries acknowledged while the walk is
/// in progress are skipped if they have not been fetched yet.
pub struct Drain {
    store: Store,
    after: i64,
    page: VecDeque<OutboxEntry>,
    done: bool,
}

impl Drain {
    /// Queue position of the last entry yielded, or the starting point.
    pub fn position(&self) -> i64 {
        self.after
    }
}

impl Iterator for Drain {
    type Item = Result<OutboxEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.done {
            match self.store.outbox_after(self.after, DRAIN_PAGE_SIZE) {
                Ok(entries) => {
                    self.done = entries.is_empty();
                    self.page.extend(entries);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        let entry = self.page.pop_front()?;
        self.after = entry.position;
        Some(Ok(entry))
    }
}

#[cfg(test)]
#[path = "outbox_tests.rs"]
mod tests;

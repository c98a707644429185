// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Live, ordered views of a conversation for UI code.
//!
//! A [`ConversationFeed`] registers a store subscription and republishes the
//! conversation's message list on a `watch` channel after every committed
//! change that touches it. Dropping the feed unsubscribes.

use std::sync::{Arc, Mutex};

use pl_core::{Message, Store, StoreEvent, SubscriptionId, Window};
use tokio::sync::watch;
use tracing::warn;

use crate::error::{Error, Result};

struct Refresher {
    store: Store,
    conversation_id: String,
    tx: watch::Sender<Vec<Message>>,
    /// Serializes query-then-publish so a slow writer cannot publish a
    /// snapshot older than one already sent.
    gate: Mutex<()>,
}

impl Refresher {
    fn refresh(&self) -> Result<()> {
        let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        let messages = self.store.query(&self.conversation_id, Window::all())?;
        self.tx.send_if_modified(|current| {
            if *current == messages {
                return false;
            }
            *current = messages;
            true
        });
        Ok(())
    }
}

/// Observable, ordered message list of one conversation.
pub struct ConversationFeed {
    refresher: Arc<Refresher>,
    subscription: SubscriptionId,
    rx: watch::Receiver<Vec<Message>>,
}

impl ConversationFeed {
    /// Start observing `conversation_id`. The first snapshot is available
    /// immediately.
    pub fn open(store: &Store, conversation_id: &str) -> Result<Self> {
        let (tx, rx) = watch::channel(Vec::new());
        let refresher = Arc::new(Refresher {
            store: store.clone(),
            conversation_id: conversation_id.to_string(),
            tx,
            gate: Mutex::new(()),
        });

        // Subscribe before the first query so no commit falls in between.
        let subscription = {
            let refresher = Arc::clone(&refresher);
            store.subscribe(move |event| {
                if event.conversation_id() != refresher.conversation_id
                    || matches!(event, StoreEvent::CursorAdvanced { .. })
                {
                    return;
                }
                if let Err(e) = refresher.refresh() {
                    warn!(
                        conversation_id = %refresher.conversation_id,
                        error = %e,
                        "could not refresh conversation feed"
                    );
                }
            })
        };

        let mut feed = ConversationFeed { refresher, subscription, rx };
        feed.refresher.refresh()?;
        drop(feed.rx.borrow_and_update());
        Ok(feed)
    }

    pub fn conversation_id(&self) -> &str {
        &self.refresher.conversation_id
    }

    /// The current message list, in display order.
    pub fn snapshot(&self) -> Vec<Message> {
        self.rx.borrow().clone()
    }

    /// Wait for the next change and return the new list.
    pub async fn changed(&mut self) -> Result<Vec<Message>> {
        self.rx.changed().await.map_err(|_| Error::Stopped)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// A receiver for callers that want to drive the channel themselves.
    pub fn receiver(&self) -> watch::Receiver<Vec<Message>> {
        self.rx.clone()
    }
}

impl Drop for ConversationFeed {
    fn drop(&mut self) {
        self.refresher.store.unsubscribe(self.subscription);
    }
}

#[cfg(test)]
#[path = "observe_tests.rs"]
mod tests;

// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The surface UI code talks to.
//!
//! A [`ChatClient`] owns one device's store, outbound queue and (once
//! started) sync engine. Sending never waits on the network: the message is
//! durable and visible in every [`ConversationFeed`] by the time
//! [`ChatClient::send_message`] returns.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pl_core::{Conversation, HlcClock, Message, MessageId, Store, Window};
use tracing::info;

use crate::config::{db_path, Config};
use crate::error::{Error, Result};
use crate::observe::ConversationFeed;
use crate::outbox::OutboundQueue;
use crate::sync::{
    websocket_factory, ConnectionState, ConnectionSupervisor, SyncEngine, SyncStatus,
    TransportFactory,
};
use crate::validate::{validate_conversation_id, validate_sender_id};

pub struct ChatClient {
    config: Config,
    store: Store,
    queue: OutboundQueue,
    engine: Mutex<Option<SyncEngine>>,
}

impl ChatClient {
    /// Open the device rooted at `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let config = Config::load(data_dir)?;
        let store = Store::open(&db_path(data_dir))?;
        Ok(Self::new(store, config))
    }

    pub fn new(store: Store, config: Config) -> Self {
        let clock = Arc::new(HlcClock::for_device(&config.identity.device_id));
        let queue = OutboundQueue::new(store.clone(), clock, config.identity.sender_id.clone());
        ChatClient { config, store, queue, engine: Mutex::new(None) }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Persist a new message as `Pending` and queue it for delivery.
    pub fn send_message(&self, conversation_id: &str, body: &str) -> Result<Message> {
        let msg = self.queue.compose(conversation_id, body)?;
        self.queue.enqueue(msg)
    }

    /// Live view of one conversation.
    pub fn observe_conversation(&self, conversation_id: &str) -> Result<ConversationFeed> {
        let conversation_id = validate_conversation_id(conversation_id)?;
        ConversationFeed::open(&self.store, conversation_id)
    }

    /// Messages of a conversation in display order.
    pub fn messages(&self, conversation_id: &str, window: Window) -> Result<Vec<Message>> {
        let conversation_id = validate_conversation_id(conversation_id)?;
        Ok(self.store.query(conversation_id, window)?)
    }

    /// Take part in a conversation. This device's sender is always a
    /// participant.
    pub fn join(&self, conversation_id: &str, participants: &[String]) -> Result<Conversation> {
        let conversation_id = validate_conversation_id(conversation_id)?;
        let mut members = vec![self.config.identity.sender_id.clone()];
        for participant in participants {
            members.push(validate_sender_id(participant)?.to_string());
        }
        let conversation = self.store.ensure_conversation(conversation_id, &members)?;
        self.queue.wake();
        Ok(conversation)
    }

    /// Requeue a failed message.
    pub fn retry(&self, id: &MessageId) -> Result<bool> {
        self.queue.retry(id)
    }

    /// Connect to the configured relay over WebSocket.
    ///
    /// Must be called from within a Tokio runtime. Calling it again returns
    /// the running engine.
    pub fn start_sync(&self) -> Result<SyncEngine> {
        self.start_sync_with(websocket_factory())
    }

    /// Like [`start_sync`](Self::start_sync) with a caller-supplied transport.
    pub fn start_sync_with(&self, factory: TransportFactory) -> Result<SyncEngine> {
        let remote = self.config.remote.as_ref().ok_or(Error::NoRemote)?;
        if let Some(problem) = remote.validate_url() {
            return Err(Error::Config(problem));
        }

        let mut slot = self.engine.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(engine) = slot.as_ref() {
            return Ok(engine.clone());
        }

        let supervisor =
            ConnectionSupervisor::new(remote.supervisor_config(&self.config.identity), factory);
        let engine = SyncEngine::new(self.queue.clone(), supervisor, remote.engine_config());
        engine.start();
        info!(url = %remote.url, "sync started");
        *slot = Some(engine.clone());
        Ok(engine)
    }

    /// The running engine, if sync was started.
    pub fn engine(&self) -> Option<SyncEngine> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.engine()
            .map(|engine| engine.supervisor().state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn sync_status(&self) -> Option<SyncStatus> {
        self.engine().map(|engine| engine.status())
    }

    /// Wait for the running engine to catch up and drain the outbox.
    pub async fn wait_synced(&self, timeout: Duration) -> Result<SyncStatus> {
        let engine = self.engine().ok_or(Error::Stopped)?;
        engine.wait_synced(timeout).await
    }

    /// Stop syncing. Queued messages stay queued for the next start.
    pub async fn shutdown(&self) {
        let engine = self.engine.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(engine) = engine {
            engine.shutdown().await;
            info!("sync stopped");
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

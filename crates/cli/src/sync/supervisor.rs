// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection lifecycle management.
//!
//! The [`ConnectionSupervisor`] owns the relay connection. It runs a
//! background task that connects, performs the `hello`/`welcome` handshake,
//! hands the live session out as a [`SessionHandle`], and reconnects with
//! jittered exponential backoff once the session is reported lost.
//!
//! ```text
//!              stop()                      ┌──────────┐
//!   any ─────────────────────────────────► │ Stopped  │
//!                                          └──────────┘
//! ┌──────────────┐ backoff ┌────────────┐ welcome ┌───────────┐
//! │ Disconnected │───────► │ Connecting │───────► │ Connected │◄─┐
//! └──────────────┘         └────────────┘         └───────────┘  │ pong
//!        ▲ ▲                     │ failed               │ missed  │
//!        │ └─────────────────────┘                      ▼ ping    │
//!        │          session lost                  ┌───────────┐  │
//!        └────────────────────────────────────────│ Degraded  │──┘
//!                                                 └───────────┘
//! ```
//!
//! State is readable lock-free; transitions are also published on a
//! broadcast channel for the sync engine.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pl_core::protocol::{ClientFrame, ServerFrame};
use tokio::sync::{broadcast, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::transport::{Transport, TransportError, TransportFactory};
use crate::error::{Error, Result};

/// Upper bound on closing a transport during teardown.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of the event channel. Slow subscribers observe `Lagged`.
const EVENT_CAPACITY: usize = 64;

/// Lifecycle state of the relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    /// Connected, but the relay has stopped answering heartbeats.
    Degraded = 3,
    /// Terminal. No further connection attempts are made.
    Stopped = 4,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Stopped => "stopped",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Degraded,
            4 => ConnectionState::Stopped,
            _ => ConnectionState::Disconnected,
        }
    }

    /// True while a session is established (healthy or not).
    pub fn has_session(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for connecting to the relay.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub url: String,
    pub device_id: String,
    pub sender_id: String,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Consecutive failed attempts before giving up (0 = unlimited).
    pub max_retries: u32,
    /// Deadline for connecting plus the handshake.
    pub connect_timeout: Duration,
}

impl SupervisorConfig {
    pub fn new(
        url: impl Into<String>,
        device_id: impl Into<String>,
        sender_id: impl Into<String>,
    ) -> Self {
        SupervisorConfig {
            url: url.into(),
            device_id: device_id.into(),
            sender_id: sender_id.into(),
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(30),
            max_retries: 0,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// A live, handshaken relay session.
///
/// Clones share the same session. The transport stays owned by the
/// supervisor; holders borrow it with [`lock`](Self::lock) and must drop the
/// guard once the session is closed so the supervisor can tear it down.
#[derive(Clone)]
pub struct SessionHandle {
    generation: u64,
    session_id: Arc<str>,
    transport: Arc<tokio::sync::Mutex<Box<dyn Transport>>>,
    closed: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl SessionHandle {
    /// Sequence number of the session, increasing across reconnects.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Session id issued by the relay in its `welcome`.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Borrow the transport for the life of the session.
    pub async fn lock(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        self.transport.lock().await
    }

    /// Report the session as lost. The first reason given is kept.
    pub fn close(&self, reason: impl Into<String>) {
        {
            let mut slot = self.reason.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the session is closed for any reason, including stop.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    fn reason(&self) -> String {
        self.reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| "stopped".to_string())
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("generation", &self.generation)
            .field("session_id", &self.session_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// State transitions published by the supervisor.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Connecting { attempt: u32 },
    Connected(SessionHandle),
    Degraded { generation: u64 },
    Recovered { generation: u64 },
    /// The session or attempt ended. `retry_in` is the backoff before the
    /// next attempt.
    Disconnected { reason: String, retry_in: Duration },
    /// `max_retries` consecutive attempts failed. `Stopped` follows.
    GaveUp { attempts: u32 },
    Stopped,
}

struct Shared {
    config: SupervisorConfig,
    factory: TransportFactory,
    state: AtomicU8,
    attempt: AtomicU32,
    generation: AtomicU64,
    session: Mutex<Option<SessionHandle>>,
    events: broadcast::Sender<SupervisorEvent>,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn emit(&self, event: SupervisorEvent) {
        // No receivers is fine: state stays readable through `state()`.
        let _ = self.events.send(event);
    }

    fn set_session(&self, session: Option<SessionHandle>) {
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = session;
    }
}

/// Owns the relay connection and keeps it alive. Clones share one supervisor.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    shared: Arc<Shared>,
}

impl ConnectionSupervisor {
    pub fn new(config: SupervisorConfig, factory: TransportFactory) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        ConnectionSupervisor {
            shared: Arc::new(Shared {
                config,
                factory,
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                attempt: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                session: Mutex::new(None),
                events,
                stop: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    /// Spawn the connection loop. Calling it again, or after `stop`, does
    /// nothing.
    pub fn start(&self) {
        let mut task = self.shared.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() || self.shared.stop.is_cancelled() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(run(shared)));
    }

    /// Halt retries and tear down any active session. Terminal.
    pub fn stop(&self) {
        self.shared.stop.cancel();
        let started = self.shared.task.lock().unwrap_or_else(|e| e.into_inner()).is_some();
        if !started && self.state() != ConnectionState::Stopped {
            self.shared.set_state(ConnectionState::Stopped);
            self.shared.emit(SupervisorEvent::Stopped);
        }
    }

    /// Stop and wait for the connection loop to finish its teardown.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.shared.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Attempt number of the connection in progress (0 when none).
    pub fn attempt(&self) -> u32 {
        self.shared.attempt.load(Ordering::Acquire)
    }

    /// The active session, if one is established and not yet lost.
    pub fn current_session(&self) -> Option<SessionHandle> {
        let session = self.shared.session.lock().unwrap_or_else(|e| e.into_inner());
        session.as_ref().filter(|s| !s.is_closed()).cloned()
    }

    /// Receive future state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.shared.events.subscribe()
    }

    fn is_current(&self, handle: &SessionHandle) -> bool {
        !handle.is_closed() && self.shared.generation.load(Ordering::Acquire) == handle.generation
    }

    /// `Connected -> Degraded` for a session that missed a heartbeat.
    pub fn mark_degraded(&self, handle: &SessionHandle) -> bool {
        if !self.is_current(handle)
            || !self.swap_state(ConnectionState::Connected, ConnectionState::Degraded)
        {
            return false;
        }
        warn!(generation = handle.generation, "relay stopped answering heartbeats");
        self.shared.emit(SupervisorEvent::Degraded { generation: handle.generation });
        true
    }

    /// `Degraded -> Connected` once traffic flows again.
    pub fn mark_healthy(&self, handle: &SessionHandle) -> bool {
        if !self.is_current(handle)
            || !self.swap_state(ConnectionState::Degraded, ConnectionState::Connected)
        {
            return false;
        }
        info!(generation = handle.generation, "relay connection recovered");
        self.shared.emit(SupervisorEvent::Recovered { generation: handle.generation });
        true
    }

    fn swap_state(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.shared
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

async fn hello(transport: &mut dyn Transport, config: &SupervisorConfig) -> Result<String> {
    transport.connect(&config.url).await?;
    transport.send(ClientFrame::hello(&config.device_id, &config.sender_id)).await?;
    match transport.recv().await {
        Ok(Some(ServerFrame::Welcome { session_id })) => Ok(session_id),
        Ok(Some(other)) => Err(Error::Protocol(format!("expected welcome, got {other:?}"))),
        Ok(None) => Err(TransportError::ConnectionClosed.into()),
        Err(TransportError::SerializationError(e)) => Err(Error::Protocol(e)),
        Err(e) => Err(e.into()),
    }
}

/// Connect, say hello, and wait for the relay's welcome.
async fn handshake(shared: &Shared) -> Result<(Box<dyn Transport>, String)> {
    let mut transport = (shared.factory)();
    let timeout = shared.config.connect_timeout;

    let outcome = match tokio::time::timeout(timeout, hello(transport.as_mut(), &shared.config)).await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(TransportError::Timeout(timeout).into()),
    };

    match outcome {
        Ok(session_id) => Ok((transport, session_id)),
        Err(e) => {
            let _ = tokio::time::timeout(DISCONNECT_TIMEOUT, transport.disconnect()).await;
            Err(e)
        }
    }
}

/// Wait for the session holder to release the transport, then close it.
async fn teardown(handle: &SessionHandle) {
    let close = async {
        let mut transport = handle.lock().await;
        let _ = transport.disconnect().await;
    };
    if tokio::time::timeout(DISCONNECT_TIMEOUT, close).await.is_err() {
        warn!(generation = handle.generation, "transport teardown timed out");
    }
}

async fn run(shared: Arc<Shared>) {
    let config = &shared.config;
    let mut backoff = Backoff::new(config.backoff_base, config.backoff_max);
    let mut failures = 0u32;

    loop {
        let attempt = failures.saturating_add(1);
        shared.attempt.store(attempt, Ordering::Release);
        shared.set_state(ConnectionState::Connecting);
        shared.emit(SupervisorEvent::Connecting { attempt });
        debug!(url = %config.url, attempt, "connecting to relay");

        let result = tokio::select! {
            _ = shared.stop.cancelled() => break,
            result = handshake(&shared) => result,
        };

        let reason = match result {
            Ok((transport, session_id)) => {
                failures = 0;
                backoff.reset();
                shared.attempt.store(0, Ordering::Release);

                let generation = shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
                let handle = SessionHandle {
                    generation,
                    session_id: Arc::from(session_id.as_str()),
                    transport: Arc::new(tokio::sync::Mutex::new(transport)),
                    closed: shared.stop.child_token(),
                    reason: Arc::new(Mutex::new(None)),
                };
                shared.set_session(Some(handle.clone()));
                shared.set_state(ConnectionState::Connected);
                info!(generation, session_id = %session_id, "connected to relay");
                shared.emit(SupervisorEvent::Connected(handle.clone()));

                handle.closed().await;
                shared.set_session(None);
                teardown(&handle).await;
                handle.reason()
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                warn!(attempt, error = %e, "connection attempt failed");
                if config.max_retries > 0 && failures >= config.max_retries {
                    warn!(attempts = failures, "giving up on relay connection");
                    shared.emit(SupervisorEvent::GaveUp { attempts: failures });
                    break;
                }
                e.to_string()
            }
        };

        if shared.stop.is_cancelled() {
            break;
        }

        let delay = backoff.next_delay();
        shared.set_state(ConnectionState::Disconnected);
        info!(reason = %reason, retry_in_ms = delay.as_millis() as u64, "disconnected from relay");
        shared.emit(SupervisorEvent::Disconnected { reason, retry_in: delay });

        tokio::select! {
            _ = shared.stop.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.set_session(None);
    shared.attempt.store(0, Ordering::Release);
    shared.set_state(ConnectionState::Stopped);
    shared.emit(SupervisorEvent::Stopped);
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;

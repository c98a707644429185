// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The sync engine keeps the local store and the relay in agreement.
//!
//! It follows the [`ConnectionSupervisor`]'s event feed. For every session
//! it borrows the transport, subscribes each known conversation from its
//! persisted cursor, replays the outbound queue in enqueue order, and then
//! multiplexes inbound frames, new enqueues and heartbeats until the session
//! is lost. Inbound events are handed to one worker task per conversation so
//! each conversation is applied strictly in stream order.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pl_core::protocol::{ClientFrame, Envelope, ServerFrame};
use pl_core::{Applied, DeliveryState, SyncCursor};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::supervisor::{ConnectionSupervisor, SessionHandle, SupervisorEvent};
use super::transport::{Transport, TransportError};
use crate::error::{Error, ErrorKind, Result};
use crate::outbox::OutboundQueue;

/// Tuning knobs for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ping period. Zero disables heartbeats.
    pub heartbeat_interval: Duration,
    /// How long a ping may go unanswered before the session is degraded.
    pub heartbeat_timeout: Duration,
    /// Inbound events buffered per conversation worker.
    pub worker_queue: usize,
    /// Attempts at applying one inbound event before giving up on the session.
    pub apply_retries: u32,
    /// Delay between apply attempts, multiplied by the attempt number.
    pub apply_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(5),
            worker_queue: 64,
            apply_retries: 3,
            apply_backoff: Duration::from_millis(50),
        }
    }
}

/// Observable progress of the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    /// Sessions started so far.
    pub sessions: u64,
    /// True once the current session's subscriptions and outbox replay went out.
    pub connected: bool,
    /// Conversations subscribed in the current session.
    pub subscribed: BTreeSet<String>,
    /// Subscribed conversations whose backlog has been fully applied.
    pub caught_up: BTreeSet<String>,
    /// Unacknowledged outbound messages.
    pub outstanding: usize,
    pub last_error: Option<String>,
    /// The engine will not start another session.
    pub stopped: bool,
}

impl SyncStatus {
    /// Every subscription is caught up.
    pub fn is_caught_up(&self) -> bool {
        self.connected && self.subscribed.is_subset(&self.caught_up)
    }

    /// Caught up, with nothing left to deliver.
    pub fn is_synced(&self) -> bool {
        self.is_caught_up() && self.outstanding == 0
    }
}

struct Inner {
    queue: OutboundQueue,
    supervisor: ConnectionSupervisor,
    config: EngineConfig,
    status: watch::Sender<SyncStatus>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn refresh_outstanding(&self) {
        match self.queue.len() {
            Ok(n) => {
                self.status.send_if_modified(|s| {
                    let changed = s.outstanding != n;
                    s.outstanding = n;
                    changed
                });
            }
            Err(e) => warn!(error = %e, "could not count outbound queue"),
        }
    }

    fn record_error(&self, message: String) {
        self.status.send_modify(|s| s.last_error = Some(message));
    }
}

/// Drives synchronization over whatever session the supervisor provides.
/// Clones share one engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(queue: OutboundQueue, supervisor: ConnectionSupervisor, config: EngineConfig) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        SyncEngine {
            inner: Arc::new(Inner {
                queue,
                supervisor,
                config,
                status,
                shutdown: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    /// Start the supervisor and the engine loop. Idempotent.
    pub fn start(&self) {
        let mut task = self.inner.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() || self.inner.shutdown.is_cancelled() {
            return;
        }
        // Subscribe before starting so the first `Connected` is not missed.
        let events = self.inner.supervisor.subscribe();
        self.inner.supervisor.start();
        *task = Some(tokio::spawn(run(Arc::clone(&self.inner), events)));
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.inner.supervisor
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    /// Wait until every subscription is caught up and the outbox is empty.
    pub async fn wait_synced(&self, timeout: Duration) -> Result<SyncStatus> {
        let mut rx = self.inner.status.subscribe();
        let outcome =
            tokio::time::timeout(timeout, rx.wait_for(|s| s.is_synced() || s.stopped)).await;
        match outcome {
            Ok(Ok(status)) if status.is_synced() => Ok(status.clone()),
            Ok(Ok(status)) => Err(match &status.last_error {
                Some(reason) => Error::Timeout(format!("sync stopped: {reason}")),
                None => Error::Stopped,
            }),
            Ok(Err(_)) => Err(Error::Stopped),
            Err(_) => Err(Error::Timeout(format!("not synced after {}s", timeout.as_secs_f32()))),
        }
    }

    /// Stop syncing and wait for the session and its workers to wind down.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.supervisor.shutdown().await;
        let task = self.inner.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.inner.status.send_modify(|s| {
            s.connected = false;
            s.stopped = true;
        });
    }
}

async fn run(inner: Arc<Inner>, mut events: broadcast::Receiver<SupervisorEvent>) {
    let mut next = inner.supervisor.current_session();

    loop {
        let handle = match next.take() {
            Some(handle) => handle,
            None => tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(SupervisorEvent::Connected(handle)) => handle,
                    Ok(SupervisorEvent::Disconnected { reason, .. }) => {
                        inner.record_error(reason);
                        continue;
                    }
                    Ok(SupervisorEvent::GaveUp { attempts }) => {
                        inner.record_error(format!("gave up after {attempts} connection attempts"));
                        continue;
                    }
                    Ok(SupervisorEvent::Stopped) | Err(RecvError::Closed) => break,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "supervisor events lagged");
                        match inner.supervisor.current_session() {
                            Some(handle) => handle,
                            None => continue,
                        }
                    }
                },
            },
        };
        // Stale `Connected` events refer to sessions already finished.
        if handle.is_closed() {
            continue;
        }

        let generation = handle.generation();
        match run_session(&inner, &handle).await {
            Ok(()) => handle.close("sync session ended"),
            Err(e) => {
                warn!(generation, error = %e, kind = ?e.kind(), "sync session lost");
                inner.record_error(e.to_string());
                handle.close(e.to_string());
            }
        }
        inner.status.send_modify(|s| {
            s.connected = false;
            s.subscribed.clear();
            s.caught_up.clear();
        });
    }

    inner.status.send_modify(|s| {
        s.connected = false;
        s.stopped = true;
    });
    debug!("sync engine stopped");
}

/// Hold the session's transport until the session ends.
async fn run_session(inner: &Arc<Inner>, handle: &SessionHandle) -> Result<()> {
    let mut guard = handle.lock().await;
    let transport: &mut dyn Transport = &mut **guard;
    let (failures_tx, mut failures) = mpsc::unbounded_channel();
    let mut session = Session::new(Arc::clone(inner), handle.clone(), failures_tx);

    inner.status.send_modify(|s| {
        s.sessions += 1;
        s.subscribed.clear();
        s.caught_up.clear();
    });
    let result = session.run(transport, &mut failures).await;
    session.finish().await;
    drop(guard);
    result
}

/// Work handed to a conversation worker.
#[derive(Debug)]
enum Inbound {
    Event { seq: u64, envelope: Envelope },
    /// The relay finished replaying the conversation up to `cursor`.
    CaughtUp(SyncCursor),
}

struct Session {
    inner: Arc<Inner>,
    handle: SessionHandle,
    subscribed: HashSet<String>,
    /// Queue position of the last entry sent in this session.
    last_sent: i64,
    workers: HashMap<String, mpsc::Sender<Inbound>>,
    tasks: JoinSet<()>,
    failures: mpsc::UnboundedSender<(String, Error)>,
    next_ping: u64,
    ping_sent: Option<Instant>,
    degraded: bool,
}

impl Session {
    fn new(
        inner: Arc<Inner>,
        handle: SessionHandle,
        failures: mpsc::UnboundedSender<(String, Error)>,
    ) -> Self {
        Session {
            inner,
            handle,
            subscribed: HashSet::new(),
            last_sent: 0,
            workers: HashMap::new(),
            tasks: JoinSet::new(),
            failures,
            next_ping: 0,
            ping_sent: None,
            degraded: false,
        }
    }

    async fn run(
        &mut self,
        transport: &mut dyn Transport,
        failures: &mut mpsc::UnboundedReceiver<(String, Error)>,
    ) -> Result<()> {
        let handle = self.handle.clone();
        let inner = Arc::clone(&self.inner);
        let mut heartbeat = heartbeat_timer(inner.config.heartbeat_interval);

        for conversation in inner.queue.store().conversations()? {
            self.ensure_subscribed(transport, &conversation.id).await?;
        }
        self.flush(transport).await?;
        inner.status.send_modify(|s| s.connected = true);
        info!(
            generation = handle.generation(),
            subscriptions = self.subscribed.len(),
            replayed = self.last_sent,
            "sync session started"
        );

        loop {
            let ping_deadline = self.ping_sent.map(|sent| sent + inner.config.heartbeat_timeout);
            tokio::select! {
                _ = handle.closed() => return Ok(()),
                _ = inner.shutdown.cancelled() => return Ok(()),
                frame = transport.recv() => match frame {
                    Ok(Some(frame)) => self.on_frame(frame).await?,
                    Ok(None) => return Err(TransportError::ConnectionClosed.into()),
                    Err(TransportError::SerializationError(e)) => return Err(Error::Protocol(e)),
                    Err(e) => return Err(e.into()),
                },
                _ = inner.queue.notified() => self.flush(transport).await?,
                _ = tick(&mut heartbeat) => {
                    if self.ping_sent.is_none() {
                        self.ping(transport).await?;
                    }
                    // Picks up messages enqueued by other processes.
                    self.flush(transport).await?;
                }
                _ = sleep_until(ping_deadline) => self.ping_timed_out(transport).await?,
                Some((conversation_id, e)) = failures.recv() => {
                    error!(conversation_id = %conversation_id, error = %e, "could not apply inbound events");
                    return Err(e);
                }
            }
        }
    }

    /// Stop the conversation workers. Queued events are applied first unless
    /// the engine is shutting down.
    async fn finish(&mut self) {
        self.workers.clear();
        if self.inner.shutdown.is_cancelled() {
            self.tasks.abort_all();
        }
        while self.tasks.join_next().await.is_some() {}
    }

    async fn ensure_subscribed(
        &mut self,
        transport: &mut dyn Transport,
        conversation_id: &str,
    ) -> Result<()> {
        if self.subscribed.contains(conversation_id) {
            return Ok(());
        }
        let cursor = self.inner.queue.store().cursor(conversation_id)?;
        transport.send(ClientFrame::subscribe(conversation_id, cursor)).await?;
        debug!(conversation_id, cursor = ?cursor.map(|c| c.position()), "subscribed");
        self.subscribed.insert(conversation_id.to_string());
        self.inner.status.send_modify(|s| {
            s.subscribed.insert(conversation_id.to_string());
        });
        Ok(())
    }

    /// Send every queued message not yet sent in this session, oldest first.
    async fn flush(&mut self, transport: &mut dyn Transport) -> Result<()> {
        for conversation in self.inner.queue.store().conversations()? {
            self.ensure_subscribed(transport, &conversation.id).await?;
        }
        for entry in self.inner.queue.drain_after(self.last_sent) {
            let entry = entry?;
            let message = entry.message;
            self.ensure_subscribed(transport, &message.conversation_id).await?;
            transport.send(ClientFrame::publish(&message)).await?;
            if message.delivery_state == DeliveryState::Pending {
                self.inner.queue.mark_sent(&message.id)?;
            }
            self.last_sent = entry.position;
            trace!(message_id = %message.id, position = entry.position, "published");
        }
        self.inner.refresh_outstanding();
        Ok(())
    }

    async fn on_frame(&mut self, frame: ServerFrame) -> Result<()> {
        // Any traffic proves the relay is alive.
        self.ping_sent = None;
        if self.degraded {
            self.degraded = false;
            self.inner.supervisor.mark_healthy(&self.handle);
        }

        match frame {
            ServerFrame::Event { conversation_id, seq, message } => {
                self.dispatch(conversation_id, Inbound::Event { seq, envelope: message }).await
            }
            ServerFrame::CursorUpdate { conversation_id, cursor } => {
                self.dispatch(conversation_id, Inbound::CaughtUp(cursor)).await
            }
            ServerFrame::Ack { message_id, seq, .. } => {
                match self.inner.queue.acknowledge(&message_id, seq) {
                    Ok(_) => {}
                    Err(Error::MessageNotFound(_) | Error::InvalidTransition { .. }) => {
                        warn!(message_id = %message_id, "ignoring ack for unknown or settled message");
                    }
                    Err(e) => return Err(e),
                }
                self.inner.refresh_outstanding();
                Ok(())
            }
            ServerFrame::Reject { message_id, reason } => {
                match self.inner.queue.fail(&message_id, &reason) {
                    Ok(_) => {}
                    Err(Error::MessageNotFound(_) | Error::InvalidTransition { .. }) => {
                        warn!(
                            message_id = %message_id,
                            reason = %reason,
                            "ignoring reject for unknown or settled message"
                        );
                    }
                    Err(e) => return Err(e),
                }
                self.inner.refresh_outstanding();
                Ok(())
            }
            ServerFrame::Pong { id } => {
                trace!(id, "pong");
                Ok(())
            }
            ServerFrame::Error { message } => {
                warn!(message = %message, "relay reported an error");
                Ok(())
            }
            ServerFrame::Welcome { .. } => {
                Err(Error::Protocol("unexpected welcome during session".to_string()))
            }
        }
    }

    /// Route inbound work to the conversation's worker, starting it on first use.
    async fn dispatch(&mut self, conversation_id: String, inbound: Inbound) -> Result<()> {
        let worker = match self.workers.get(&conversation_id) {
            Some(worker) => worker.clone(),
            None => {
                let (tx, rx) = mpsc::channel(self.inner.config.worker_queue.max(1));
                self.tasks.spawn(run_worker(
                    Arc::clone(&self.inner),
                    conversation_id.clone(),
                    rx,
                    self.failures.clone(),
                ));
                self.workers.insert(conversation_id.clone(), tx.clone());
                tx
            }
        };
        worker.send(inbound).await.map_err(|_| Error::WorkerStopped(conversation_id))
    }

    async fn ping(&mut self, transport: &mut dyn Transport) -> Result<()> {
        self.next_ping += 1;
        transport.send(ClientFrame::ping(self.next_ping)).await?;
        self.ping_sent = Some(Instant::now());
        Ok(())
    }

    /// The outstanding ping went unanswered for the heartbeat timeout. The
    /// first miss degrades the session and pings again; a second one ends it.
    async fn ping_timed_out(&mut self, transport: &mut dyn Transport) -> Result<()> {
        if self.degraded {
            return Err(Error::Timeout("relay stopped answering heartbeats".to_string()));
        }
        self.degraded = true;
        self.inner.supervisor.mark_degraded(&self.handle);
        debug!(generation = self.handle.generation(), "heartbeat missed");
        self.ping(transport).await
    }
}

fn heartbeat_timer(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let start = Instant::now() + period;
    let mut timer = tokio::time::interval_at(start, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(timer)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Apply one conversation's inbound work in arrival order.
async fn run_worker(
    inner: Arc<Inner>,
    conversation_id: String,
    mut rx: mpsc::Receiver<Inbound>,
    failures: mpsc::UnboundedSender<(String, Error)>,
) {
    while let Some(inbound) = rx.recv().await {
        if let Err(e) = apply_with_retry(&inner, &conversation_id, &inbound).await {
            let _ = failures.send((conversation_id, e));
            return;
        }
    }
}

async fn apply_with_retry(inner: &Inner, conversation_id: &str, inbound: &Inbound) -> Result<()> {
    let mut attempt = 1;
    loop {
        match apply(inner, conversation_id, inbound) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::Storage && attempt < inner.config.apply_retries => {
                warn!(conversation_id, attempt, error = %e, "retrying inbound apply");
                tokio::time::sleep(inner.config.apply_backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn apply(inner: &Inner, conversation_id: &str, inbound: &Inbound) -> Result<()> {
    let store = inner.queue.store();
    match inbound {
        Inbound::Event { seq, envelope } => {
            match store.apply_inbound(conversation_id, *seq, envelope.clone())? {
                Applied::Inserted => {
                    inner.queue.observe(&envelope.created_at);
                    debug!(conversation_id, seq, message_id = %envelope.id, "applied inbound message");
                }
                Applied::Confirmed => {
                    debug!(conversation_id, seq, message_id = %envelope.id, "own message confirmed");
                    inner.refresh_outstanding();
                }
                Applied::Duplicate => trace!(conversation_id, seq, "discarded duplicate event"),
                Applied::Ignored => warn!(
                    conversation_id,
                    seq,
                    message_id = %envelope.id,
                    "event reuses the id of a message in another conversation"
                ),
            }
        }
        Inbound::CaughtUp(cursor) => {
            if cursor.position() > 0 {
                store.advance_cursor(conversation_id, *cursor)?;
            }
            inner.status.send_modify(|s| {
                s.caught_up.insert(conversation_id.to_string());
            });
            debug!(conversation_id, cursor = cursor.position(), "caught up");
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;

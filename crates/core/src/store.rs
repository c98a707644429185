// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed local message store.
//!
//! [`Store`] owns every durable piece of client state: messages, the
//! conversations they belong to (with their sync cursors), the outbox that
//! backs the outbound queue, and the registry of peers seen on inbound
//! traffic.
//!
//! Every mutating call runs in a single transaction and returns only after
//! SQLite has synced it (`synchronous = FULL`), so a crash can never leave a
//! partially written message behind. Reads go through the same connection
//! and always observe completed writes.
//!
//! Mutations are published to subscribers as [`StoreEvent`]s after commit,
//! once the connection lock has been released, so callbacks may read the
//! store themselves.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::conversation::{Conversation, Peer, SyncCursor};
use crate::error::{Error, Result};
use crate::message::{DeliveryState, Message, MessageId};
use crate::protocol::Envelope;

/// Version written to `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// SQL schema for the message store.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    cursor INTEGER,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS participants (
    conversation_id TEXT NOT NULL,
    participant_id TEXT NOT NULL,
    PRIMARY KEY (conversation_id, participant_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id)
);

-- local_order records arrival order for messages the server has not sequenced
CREATE TABLE IF NOT EXISTS messages (
    local_order INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    conversation_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL,
    seq INTEGER,
    delivery_state TEXT NOT NULL,
    FOREIGN KEY (conversation_id) REFERENCES conversations(id)
);

-- position is the FIFO order of the outbound queue
CREATE TABLE IF NOT EXISTS outbox (
    position INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT NOT NULL UNIQUE,
    FOREIGN KEY (message_id) REFERENCES messages(id)
);

CREATE TABLE IF NOT EXISTS peers (
    id TEXT PRIMARY KEY,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_seq ON messages(conversation_id, seq);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, local_order);
"#;

const MESSAGE_COLUMNS: &str =
    "m.id, m.conversation_id, m.sender_id, m.body, m.created_at, m.seq, m.delivery_state";

/// A contiguous slice of a conversation's ordered messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Window {
    pub fn all() -> Self {
        Window { offset: 0, limit: None }
    }

    /// The last `n` messages of a conversation holding `total` messages.
    pub fn tail(total: usize, n: usize) -> Self {
        Window { offset: total.saturating_sub(n), limit: Some(n) }
    }
}

impl Default for Window {
    fn default() -> Self {
        Window::all()
    }
}

/// A message waiting in the outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    /// Enqueue order. Strictly increasing, never reused.
    pub position: i64,
    pub message: Message,
}

/// What [`Store::apply_inbound`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A message we had not seen was inserted.
    Inserted,
    /// The event was the echo of one of our own messages.
    Confirmed,
    /// The conversation cursor already covered the event.
    Duplicate,
    /// The event reused the id of a message stored in another conversation.
    /// Only the cursor moved.
    Ignored,
}

/// A committed mutation, delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    MessageAppended { conversation_id: String, message_id: MessageId },
    StateChanged { conversation_id: String, message_id: MessageId, state: DeliveryState },
    CursorAdvanced { conversation_id: String, cursor: SyncCursor },
}

impl StoreEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            StoreEvent::MessageAppended { conversation_id, .. }
            | StoreEvent::StateChanged { conversation_id, .. }
            | StoreEvent::CursorAdvanced { conversation_id, .. } => conversation_id,
        }
    }
}

/// Handle returned by [`Store::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

struct Inner {
    conn: Mutex<Connection>,
    subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
    next_subscription: AtomicU64,
}

/// Shared handle to the local message store. Clones refer to the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

/// Parse a string value from the database, returning a rusqlite error on parse failure.
fn parse_db<T: std::str::FromStr>(
    value: &str,
    column: &str,
) -> std::result::Result<T, rusqlite::Error> {
    value.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(Error::CorruptedData(format!(
                "invalid value '{value}' in column '{column}'"
            ))),
        )
    })
}

fn parse_timestamp(
    value: &str,
    column: &str,
) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc)).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(Error::CorruptedData(format!(
                "invalid timestamp '{value}' in column '{column}'"
            ))),
        )
    })
}

fn seq_to_sql(seq: u64) -> Result<i64> {
    i64::try_from(seq).map_err(|_| Error::CorruptedData(format!("sequence id {seq} out of range")))
}

fn seq_from_sql(value: Option<i64>) -> std::result::Result<Option<u64>, rusqlite::Error> {
    value
        .map(|v| {
            u64::try_from(v).map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Integer,
                    Box::new(Error::CorruptedData(format!("negative sequence id {v}"))),
                )
            })
        })
        .transpose()
}

/// Maps a row selected with [`MESSAGE_COLUMNS`] starting at column `base`.
fn message_from_row(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<Message> {
    let id: String = row.get(base)?;
    let created_at: String = row.get(base + 4)?;
    let seq: Option<i64> = row.get(base + 5)?;
    let state: String = row.get(base + 6)?;
    Ok(Message {
        id: MessageId::from(id),
        conversation_id: row.get(base + 1)?,
        sender_id: row.get(base + 2)?,
        body: row.get(base + 3)?,
        created_at: parse_db(&created_at, "created_at")?,
        seq: seq_from_sql(seq)?,
        delivery_state: parse_db(&state, "delivery_state")?,
    })
}

/// Creates or checks the schema, refusing databases from a newer build.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let found: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if found > SCHEMA_VERSION {
        return Err(Error::UnsupportedSchema { found, supported: SCHEMA_VERSION });
    }
    conn.execute_batch(SCHEMA)?;
    if found < SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
    }
    Ok(())
}

fn ensure_conversation_row(tx: &Transaction<'_>, conversation_id: &str) -> Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO conversations (id, created_at) VALUES (?1, ?2)",
        params![conversation_id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn message_state(tx: &Transaction<'_>, id: &MessageId) -> Result<Option<(String, DeliveryState)>> {
    let row: Option<(String, String)> = tx
        .query_row(
            "SELECT conversation_id, delivery_state FROM messages WHERE id = ?1",
            params![id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        Some((conversation_id, state)) => Ok(Some((conversation_id, state.parse()?))),
        None => Ok(None),
    }
}

fn insert_message(tx: &Transaction<'_>, msg: &Message, state: DeliveryState) -> Result<()> {
    if message_state(tx, &msg.id)?.is_some() {
        return Err(Error::DuplicateMessage(msg.id.to_string()));
    }
    ensure_conversation_row(tx, &msg.conversation_id)?;
    tx.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, body, created_at, seq, delivery_state)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            msg.id.as_str(),
            msg.conversation_id,
            msg.sender_id,
            msg.body,
            msg.created_at.to_string(),
            msg.seq.map(seq_to_sql).transpose()?,
            state.as_str(),
        ],
    )?;
    Ok(())
}

/// Writes a new delivery state and keeps outbox membership in step with it:
/// leaving the outstanding states drops the outbox row, and a retry
/// re-enters the queue at its tail.
fn write_state(tx: &Transaction<'_>, id: &MessageId, state: DeliveryState) -> Result<()> {
    tx.execute(
        "UPDATE messages SET delivery_state = ?1 WHERE id = ?2",
        params![state.as_str(), id.as_str()],
    )?;
    if !state.is_outstanding() {
        tx.execute("DELETE FROM outbox WHERE message_id = ?1", params![id.as_str()])?;
    } else if state == DeliveryState::Pending {
        tx.execute("DELETE FROM outbox WHERE message_id = ?1", params![id.as_str()])?;
        tx.execute("INSERT INTO outbox (message_id) VALUES (?1)", params![id.as_str()])?;
    }
    Ok(())
}

/// Records the relay's sequence id on a message that has none yet.
///
/// A seq already held by another message of the conversation is left with
/// its holder, which happens when the relay has lost or reset its log.
/// Returns `false` if nothing was stamped.
fn stamp_seq(
    tx: &Transaction<'_>,
    id: &MessageId,
    conversation_id: &str,
    seq: u64,
) -> Result<bool> {
    let seq = seq_to_sql(seq)?;
    let changed = tx.execute(
        "UPDATE messages SET seq = ?1
         WHERE id = ?2 AND seq IS NULL
           AND NOT EXISTS (SELECT 1 FROM messages WHERE conversation_id = ?3 AND seq = ?1)",
        params![seq, id.as_str(), conversation_id],
    )?;
    Ok(changed > 0)
}

fn seq_taken(tx: &Transaction<'_>, conversation_id: &str, seq: u64) -> Result<bool> {
    let taken = tx
        .query_row(
            "SELECT 1 FROM messages WHERE conversation_id = ?1 AND seq = ?2",
            params![conversation_id, seq_to_sql(seq)?],
            |_| Ok(()),
        )
        .optional()?;
    Ok(taken.is_some())
}

fn read_cursor(tx: &Connection, conversation_id: &str) -> Result<Option<SyncCursor>> {
    let cursor: Option<Option<i64>> = tx
        .query_row(
            "SELECT cursor FROM conversations WHERE id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(seq_from_sql(cursor.flatten())?.map(SyncCursor::at))
}

fn write_cursor(tx: &Transaction<'_>, conversation_id: &str, cursor: SyncCursor) -> Result<()> {
    tx.execute(
        "UPDATE conversations SET cursor = ?1 WHERE id = ?2",
        params![seq_to_sql(cursor.position())?, conversation_id],
    )?;
    Ok(())
}

impl Store {
    /// Open the store at `path`, creating the file and schema if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;",
        )?;
        run_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        run_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Store {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                subscribers: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// Runs `f` in a transaction, then notifies subscribers of its events.
    fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>, &mut Vec<StoreEvent>) -> Result<T>,
    ) -> Result<T> {
        let mut events = Vec::new();
        let value = {
            let mut conn = self.inner.conn.lock().unwrap_or_else(|e| e.into_inner());
            let tx = conn.transaction()?;
            let value = f(&tx, &mut events)?;
            tx.commit()?;
            value
        };
        self.publish(&events);
        Ok(value)
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.inner.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&conn)
    }

    fn publish(&self, events: &[StoreEvent]) {
        if events.is_empty() {
            return;
        }
        let callbacks: Vec<Callback> = {
            let subs = self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subs.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for event in events {
            for cb in &callbacks {
                cb(event);
            }
        }
    }

    /// Register a callback invoked after every committed mutation.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        let mut subs = self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let before = subs.len();
        subs.retain(|(sub, _)| *sub != id);
        subs.len() != before
    }

    /// Append a message, creating its conversation on first use.
    ///
    /// Fails with [`Error::DuplicateMessage`] if the id is already stored.
    pub fn append(&self, msg: &Message) -> Result<()> {
        self.write(|tx, events| {
            insert_message(tx, msg, msg.delivery_state)?;
            events.push(StoreEvent::MessageAppended {
                conversation_id: msg.conversation_id.clone(),
                message_id: msg.id.clone(),
            });
            Ok(())
        })
    }

    /// Move a message to a new delivery state.
    ///
    /// Returns `false` if the message was already in `state`.
    pub fn update_state(&self, id: &MessageId, state: DeliveryState) -> Result<bool> {
        self.write(|tx, events| {
            let (conversation_id, current) = message_state(tx, id)?
                .ok_or_else(|| Error::MessageNotFound(id.to_string()))?;
            if !current.check_transition(state)? {
                return Ok(false);
            }
            write_state(tx, id, state)?;
            events.push(StoreEvent::StateChanged {
                conversation_id,
                message_id: id.clone(),
                state,
            });
            Ok(true)
        })
    }

    /// Messages of a conversation in display order: sequenced messages by
    /// sequence id, then unsequenced ones in local arrival order.
    pub fn query(&self, conversation_id: &str, window: Window) -> Result<Vec<Message>> {
        self.read(|conn| {
            let limit = window.limit.map_or(-1, |l| l as i64);
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE m.conversation_id = ?1
                 ORDER BY m.seq IS NULL, m.seq, m.local_order
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(
                params![conversation_id, limit, window.offset as i64],
                |row| message_from_row(row, 0),
            )?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
        })
    }

    pub fn get(&self, id: &MessageId) -> Result<Message> {
        self.read(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1"),
                params![id.as_str()],
                |row| message_from_row(row, 0),
            )
            .optional()?
            .ok_or_else(|| Error::MessageNotFound(id.to_string()))
        })
    }

    pub fn count(&self, conversation_id: &str) -> Result<usize> {
        self.read(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    /// Number of stored messages in `state`, across all conversations.
    pub fn count_in_state(&self, state: DeliveryState) -> Result<usize> {
        self.read(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE delivery_state = ?1",
                params![state.as_str()],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    /// Create the conversation if missing and add `participants` to it.
    pub fn ensure_conversation(
        &self,
        conversation_id: &str,
        participants: &[String],
    ) -> Result<Conversation> {
        self.write(|tx, _| {
            ensure_conversation_row(tx, conversation_id)?;
            for participant in participants {
                tx.execute(
                    "INSERT OR IGNORE INTO participants (conversation_id, participant_id)
                     VALUES (?1, ?2)",
                    params![conversation_id, participant],
                )?;
            }
            Ok(())
        })?;
        self.conversation(conversation_id)
    }

    pub fn conversation(&self, conversation_id: &str) -> Result<Conversation> {
        self.read(|conn| {
            let cursor = read_cursor(conn, conversation_id)?;
            let exists: bool = conn.query_row(
                "SELECT COUNT(*) > 0 FROM conversations WHERE id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(Error::ConversationNotFound(conversation_id.to_string()));
            }
            let mut stmt = conn.prepare(
                "SELECT participant_id FROM participants WHERE conversation_id = ?1",
            )?;
            let participant_ids = stmt
                .query_map(params![conversation_id], |row| row.get(0))?
                .collect::<std::result::Result<BTreeSet<String>, _>>()?;
            Ok(Conversation {
                id: conversation_id.to_string(),
                participant_ids,
                last_sync_cursor: cursor,
            })
        })
    }

    /// All known conversations, ordered by id.
    pub fn conversations(&self) -> Result<Vec<Conversation>> {
        let ids: Vec<String> = self.read(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM conversations ORDER BY id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
        })?;
        ids.iter().map(|id| self.conversation(id)).collect()
    }

    pub fn cursor(&self, conversation_id: &str) -> Result<Option<SyncCursor>> {
        self.read(|conn| read_cursor(conn, conversation_id))
    }

    /// Move a conversation's cursor forward. Never moves it back.
    ///
    /// Returns whether the cursor changed.
    pub fn advance_cursor(&self, conversation_id: &str, cursor: SyncCursor) -> Result<bool> {
        self.write(|tx, events| {
            ensure_conversation_row(tx, conversation_id)?;
            if read_cursor(tx, conversation_id)?.is_some_and(|c| c >= cursor) {
                return Ok(false);
            }
            write_cursor(tx, conversation_id, cursor)?;
            events.push(StoreEvent::CursorAdvanced {
                conversation_id: conversation_id.to_string(),
                cursor,
            });
            Ok(true)
        })
    }

    /// Persist a locally authored message as `Pending` together with its
    /// outbox entry. Returns the entry's queue position.
    pub fn enqueue_outbound(&self, msg: &Message) -> Result<i64> {
        self.write(|tx, events| {
            insert_message(tx, msg, DeliveryState::Pending)?;
            tx.execute("INSERT INTO outbox (message_id) VALUES (?1)", params![msg.id.as_str()])?;
            events.push(StoreEvent::MessageAppended {
                conversation_id: msg.conversation_id.clone(),
                message_id: msg.id.clone(),
            });
            Ok(tx.last_insert_rowid())
        })
    }

    /// Up to `limit` unacknowledged outbox entries after `after`, in
    /// enqueue order.
    pub fn outbox_after(&self, after: i64, limit: usize) -> Result<Vec<OutboxEntry>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT o.position, {MESSAGE_COLUMNS} FROM outbox o
                 JOIN messages m ON m.id = o.message_id
                 WHERE o.position > ?1 AND m.delivery_state IN ('pending', 'sent')
                 ORDER BY o.position
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![after, limit as i64], |row| {
                Ok(OutboxEntry { position: row.get(0)?, message: message_from_row(row, 1)? })
            })?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
        })
    }

    pub fn outbox_len(&self) -> Result<usize> {
        self.read(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM outbox o JOIN messages m ON m.id = o.message_id
                 WHERE m.delivery_state IN ('pending', 'sent')",
                [],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    /// Record the remote acknowledgment of an outbound message.
    ///
    /// Idempotent: acknowledging an acknowledged message returns `false`.
    pub fn acknowledge(&self, id: &MessageId, seq: u64) -> Result<bool> {
        self.write(|tx, events| {
            let (conversation_id, current) = message_state(tx, id)?
                .ok_or_else(|| Error::MessageNotFound(id.to_string()))?;
            stamp_seq(tx, id, &conversation_id, seq)?;
            if !current.check_transition(DeliveryState::Acknowledged)? {
                return Ok(false);
            }
            write_state(tx, id, DeliveryState::Acknowledged)?;
            events.push(StoreEvent::StateChanged {
                conversation_id,
                message_id: id.clone(),
                state: DeliveryState::Acknowledged,
            });
            Ok(true)
        })
    }

    /// Merge one inbound event.
    ///
    /// Discards the event if the conversation cursor already covers `seq`.
    /// Otherwise stores the message (or confirms our own echoed message),
    /// records the sender as a peer, and advances the cursor to `seq`, all
    /// in one transaction.
    pub fn apply_inbound(
        &self,
        conversation_id: &str,
        seq: u64,
        envelope: Envelope,
    ) -> Result<Applied> {
        self.write(|tx, events| {
            ensure_conversation_row(tx, conversation_id)?;
            if read_cursor(tx, conversation_id)?.is_some_and(|c| c.covers(seq)) {
                return Ok(Applied::Duplicate);
            }

            let applied = match message_state(tx, &envelope.id)? {
                Some((stored_in, _)) if stored_in != conversation_id => Applied::Ignored,
                Some((_, current)) => {
                    stamp_seq(tx, &envelope.id, conversation_id, seq)?;
                    if current.can_transition_to(DeliveryState::Acknowledged) {
                        write_state(tx, &envelope.id, DeliveryState::Acknowledged)?;
                        events.push(StoreEvent::StateChanged {
                            conversation_id: conversation_id.to_string(),
                            message_id: envelope.id.clone(),
                            state: DeliveryState::Acknowledged,
                        });
                    }
                    Applied::Confirmed
                }
                None => {
                    let now = Utc::now().to_rfc3339();
                    tx.execute(
                        "INSERT INTO peers (id, first_seen, last_seen) VALUES (?1, ?2, ?2)
                         ON CONFLICT(id) DO UPDATE SET last_seen = excluded.last_seen",
                        params![envelope.sender_id, now],
                    )?;
                    let mut msg = envelope.into_message(seq);
                    msg.conversation_id = conversation_id.to_string();
                    if seq_taken(tx, conversation_id, seq)? {
                        msg.seq = None;
                    }
                    insert_message(tx, &msg, DeliveryState::Acknowledged)?;
                    events.push(StoreEvent::MessageAppended {
                        conversation_id: conversation_id.to_string(),
                        message_id: msg.id,
                    });
                    Applied::Inserted
                }
            };

            let cursor = SyncCursor::at(seq);
            write_cursor(tx, conversation_id, cursor)?;
            events.push(StoreEvent::CursorAdvanced {
                conversation_id: conversation_id.to_string(),
                cursor,
            });
            Ok(applied)
        })
    }

    /// Every sender seen on inbound traffic, most recently seen first.
    pub fn peers(&self) -> Result<Vec<Peer>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, first_seen, last_seen FROM peers ORDER BY last_seen DESC, id",
            )?;
            let rows = stmt.query_map([], |row| {
                let first: String = row.get(1)?;
                let last: String = row.get(2)?;
                Ok(Peer {
                    id: row.get(0)?,
                    first_seen: parse_timestamp(&first, "first_seen")?,
                    last_seen: parse_timestamp(&last, "last_seen")?,
                })
            })?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
        })
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

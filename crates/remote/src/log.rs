// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only event log of sequenced messages.
//!
//! Every accepted publish is stored as one JSON line with its
//! per-conversation sequence id and fsynced before it is acknowledged, so a
//! restarted relay replays exactly what it acknowledged. The whole log is
//! indexed in memory on open for replay and deduplication.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use pl_core::{Envelope, Error, MessageId, Result, SyncCursor};
use serde::{Deserialize, Serialize};

/// One line of the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub seq: u64,
    pub message: Envelope,
}

/// Outcome of [`EventLog::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// Newly sequenced at this position.
    New(u64),
    /// The message id was sequenced before, at this position.
    Existing(u64),
}

impl Appended {
    pub fn seq(&self) -> u64 {
        match self {
            Appended::New(seq) | Appended::Existing(seq) => *seq,
        }
    }
}

pub struct EventLog {
    /// `None` keeps the log in memory only.
    path: Option<PathBuf>,
    /// Each conversation's messages; index `i` holds sequence id `i + 1`.
    conversations: HashMap<String, Vec<Envelope>>,
    sequenced: HashMap<MessageId, u64>,
}

impl EventLog {
    /// Opens or creates a log at the given path, indexing existing records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut log = EventLog {
            path: None,
            conversations: HashMap::new(),
            sequenced: HashMap::new(),
        };

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (n, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: LogRecord = serde_json::from_str(&line)?;
                let expected = log.head(&record.message.conversation_id) + 1;
                if record.seq != expected {
                    return Err(Error::CorruptedData(format!(
                        "{} line {}: expected seq {expected} in '{}', found {}",
                        path.display(),
                        n + 1,
                        record.message.conversation_id,
                        record.seq
                    )));
                }
                log.index(record.seq, record.message);
            }
        }

        log.path = Some(path);
        Ok(log)
    }

    /// Creates a log that is never written to disk.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        EventLog { path: None, conversations: HashMap::new(), sequenced: HashMap::new() }
    }

    /// Sequences `message` in its conversation.
    ///
    /// A message id that was already sequenced keeps its original position
    /// and is not written again.
    pub fn append(&mut self, message: Envelope) -> Result<Appended> {
        if let Some(seq) = self.sequenced.get(&message.id) {
            return Ok(Appended::Existing(*seq));
        }

        let seq = self.head(&message.conversation_id) + 1;
        if let Some(path) = &self.path {
            let record = LogRecord { seq, message };
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}", serde_json::to_string(&record)?)?;
            file.sync_all()?;
            self.index(seq, record.message);
        } else {
            self.index(seq, message);
        }
        Ok(Appended::New(seq))
    }

    fn index(&mut self, seq: u64, message: Envelope) {
        self.sequenced.insert(message.id.clone(), seq);
        self.conversations.entry(message.conversation_id.clone()).or_default().push(message);
    }

    /// Events of `conversation_id` not covered by `cursor`, oldest first.
    pub fn events_after(
        &self,
        conversation_id: &str,
        cursor: Option<SyncCursor>,
    ) -> Vec<(u64, Envelope)> {
        let Some(messages) = self.conversations.get(conversation_id) else {
            return Vec::new();
        };
        let skip = cursor.map_or(0, |c| c.position());
        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        messages
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, message)| (i as u64 + 1, message.clone()))
            .collect()
    }

    /// Highest sequence id in the conversation, 0 if it has none.
    pub fn head(&self, conversation_id: &str) -> u64 {
        self.conversations.get(conversation_id).map_or(0, |m| m.len() as u64)
    }

    /// Number of sequenced messages across all conversations.
    pub fn len(&self) -> usize {
        self.sequenced.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sequenced.is_empty()
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;

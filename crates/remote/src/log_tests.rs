// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use pl_core::Hlc;
use tempfile::TempDir;

fn envelope(id: &str, conversation: &str) -> Envelope {
    Envelope {
        id: MessageId::from(id),
        conversation_id: conversation.to_string(),
        sender_id: "alice".to_string(),
        body: format!("body of {id}"),
        created_at: Hlc::new(1000, 0, 1),
    }
}

fn ids(events: &[(u64, Envelope)]) -> Vec<(u64, &str)> {
    events.iter().map(|(seq, e)| (*seq, e.id.as_str())).collect()
}

#[test]
fn sequences_per_conversation() {
    let mut log = EventLog::in_memory();
    assert_eq!(log.append(envelope("a", "general")).unwrap(), Appended::New(1));
    assert_eq!(log.append(envelope("b", "random")).unwrap(), Appended::New(1));
    assert_eq!(log.append(envelope("c", "general")).unwrap(), Appended::New(2));

    assert_eq!(log.head("general"), 2);
    assert_eq!(log.head("random"), 1);
    assert_eq!(log.head("empty"), 0);
    assert_eq!(log.len(), 3);
}

#[test]
fn duplicate_ids_keep_their_position() {
    let mut log = EventLog::in_memory();
    log.append(envelope("a", "general")).unwrap();
    log.append(envelope("b", "general")).unwrap();

    assert_eq!(log.append(envelope("a", "general")).unwrap(), Appended::Existing(1));
    assert_eq!(log.head("general"), 2);
}

#[test]
fn events_after_cursor() {
    let mut log = EventLog::in_memory();
    for id in ["a", "b", "c"] {
        log.append(envelope(id, "general")).unwrap();
    }

    assert_eq!(ids(&log.events_after("general", None)), vec![(1, "a"), (2, "b"), (3, "c")]);
    assert_eq!(ids(&log.events_after("general", Some(SyncCursor::at(2)))), vec![(3, "c")]);
    assert!(log.events_after("general", Some(SyncCursor::at(9))).is_empty());
    assert!(log.events_after("missing", None).is_empty());
}

#[test]
fn reopen_restores_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.jsonl");
    {
        let mut log = EventLog::open(&path).unwrap();
        assert!(log.is_empty());
        log.append(envelope("a", "general")).unwrap();
        log.append(envelope("b", "general")).unwrap();
        log.append(envelope("c", "random")).unwrap();
    }

    let mut log = EventLog::open(&path).unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log.head("general"), 2);
    assert_eq!(log.append(envelope("b", "general")).unwrap(), Appended::Existing(2));
    assert_eq!(log.append(envelope("d", "general")).unwrap(), Appended::New(3));
    assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 4);
}

#[test]
fn gap_in_sequence_is_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.jsonl");
    let record = LogRecord { seq: 2, message: envelope("a", "general") };
    std::fs::write(&path, format!("{}\n", serde_json::to_string(&record).unwrap())).unwrap();

    assert!(matches!(EventLog::open(&path), Err(Error::CorruptedData(_))));
}

#[test]
fn garbage_line_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.jsonl");
    std::fs::write(&path, "not json\n").unwrap();

    assert!(matches!(EventLog::open(&path), Err(Error::Json(_))));
}

// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use pl_core::protocol::Envelope;
use pl_core::{DeliveryState, Hlc, MessageId, SyncCursor};
use std::time::Duration;

fn message(conversation: &str, body: &str, wall_ms: u64) -> Message {
    Message::compose(conversation, "alice", body, Hlc::new(wall_ms, 0, 1))
}

fn bodies(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.body.as_str()).collect()
}

async fn next(feed: &mut ConversationFeed) -> Vec<Message> {
    tokio::time::timeout(Duration::from_secs(1), feed.changed()).await.unwrap().unwrap()
}

#[test]
fn opens_with_current_messages() {
    let store = Store::open_in_memory().unwrap();
    store.append(&message("general", "first", 1)).unwrap();

    let feed = ConversationFeed::open(&store, "general").unwrap();

    assert_eq!(feed.conversation_id(), "general");
    assert_eq!(bodies(&feed.snapshot()), vec!["first"]);
}

#[tokio::test]
async fn publishes_appends() {
    let store = Store::open_in_memory().unwrap();
    let mut feed = ConversationFeed::open(&store, "general").unwrap();
    assert!(feed.snapshot().is_empty());

    store.append(&message("general", "hello", 1)).unwrap();

    assert_eq!(bodies(&next(&mut feed).await), vec!["hello"]);
}

#[tokio::test]
async fn publishes_state_changes() {
    let store = Store::open_in_memory().unwrap();
    let msg = message("general", "hello", 1);
    store.enqueue_outbound(&msg).unwrap();
    let mut feed = ConversationFeed::open(&store, "general").unwrap();

    store.acknowledge(&msg.id, 4).unwrap();

    let messages = next(&mut feed).await;
    assert_eq!(messages[0].delivery_state, DeliveryState::Acknowledged);
    assert_eq!(messages[0].seq, Some(4));
}

#[tokio::test]
async fn inbound_events_keep_sequence_order() {
    let store = Store::open_in_memory().unwrap();
    let mut feed = ConversationFeed::open(&store, "general").unwrap();
    let mine = message("general", "mine", 5);
    store.enqueue_outbound(&mine).unwrap();
    next(&mut feed).await;

    let theirs = Envelope {
        id: MessageId::from("remote-1"),
        conversation_id: "general".into(),
        sender_id: "bob".into(),
        body: "theirs".into(),
        created_at: Hlc::new(9, 0, 2),
    };
    store.apply_inbound("general", 1, theirs).unwrap();

    assert_eq!(bodies(&next(&mut feed).await), vec!["theirs", "mine"]);
}

#[tokio::test]
async fn ignores_other_conversations_and_cursor_moves() {
    let store = Store::open_in_memory().unwrap();
    store.ensure_conversation("general", &[]).unwrap();
    let mut feed = ConversationFeed::open(&store, "general").unwrap();

    store.append(&message("random", "elsewhere", 1)).unwrap();
    store.advance_cursor("general", SyncCursor::at(3)).unwrap();
    let quiet = tokio::time::timeout(Duration::from_millis(50), feed.changed()).await;
    assert!(quiet.is_err());

    store.append(&message("general", "here", 2)).unwrap();
    assert_eq!(bodies(&next(&mut feed).await), vec!["here"]);
}

#[test]
fn drop_unsubscribes() {
    let store = Store::open_in_memory().unwrap();
    let feed = ConversationFeed::open(&store, "general").unwrap();
    let subscription = feed.subscription;

    drop(feed);

    assert!(!store.unsubscribe(subscription));
}

#[test]
fn receiver_sees_updates() {
    let store = Store::open_in_memory().unwrap();
    let feed = ConversationFeed::open(&store, "general").unwrap();
    let mut rx = feed.receiver();

    store.append(&message("general", "hello", 1)).unwrap();

    assert!(rx.has_changed().unwrap());
    assert_eq!(bodies(&rx.borrow_and_update()), vec!["hello"]);
}

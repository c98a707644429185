// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use yare::parameterized;

use DeliveryState::*;

#[parameterized(
    pending_to_sent = { Pending, Sent },
    pending_to_acked = { Pending, Acknowledged },
    pending_to_failed = { Pending, Failed },
    sent_to_acked = { Sent, Acknowledged },
    sent_to_failed = { Sent, Failed },
    retry = { Failed, Pending },
)]
fn allowed_transitions(from: DeliveryState, to: DeliveryState) {
    assert!(from.can_transition_to(to));
    assert!(from.check_transition(to).unwrap());
}

#[parameterized(
    sent_back_to_pending = { Sent, Pending },
    acked_to_pending = { Acknowledged, Pending },
    acked_to_failed = { Acknowledged, Failed },
    acked_to_sent = { Acknowledged, Sent },
    failed_to_sent = { Failed, Sent },
    failed_to_acked = { Failed, Acknowledged },
)]
fn rejected_transitions(from: DeliveryState, to: DeliveryState) {
    assert!(!from.can_transition_to(to));
    let err = from.check_transition(to).unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[parameterized(
    pending = { Pending },
    sent = { Sent },
    acked = { Acknowledged },
    failed = { Failed },
)]
fn same_state_is_a_noop(state: DeliveryState) {
    assert!(!state.check_transition(state).unwrap());
}

#[parameterized(
    pending = { "pending", Pending },
    sent = { "SENT", Sent },
    acknowledged = { "acknowledged", Acknowledged },
    acked_alias = { "acked", Acknowledged },
    failed = { "failed", Failed },
)]
fn parse_delivery_state(input: &str, expected: DeliveryState) {
    assert_eq!(input.parse::<DeliveryState>().unwrap(), expected);
}

#[test]
fn parse_unknown_state_fails() {
    assert!(matches!("lost".parse::<DeliveryState>(), Err(Error::InvalidDeliveryState(_))));
}

#[test]
fn outstanding_states() {
    assert!(Pending.is_outstanding());
    assert!(Sent.is_outstanding());
    assert!(!Acknowledged.is_outstanding());
    assert!(!Failed.is_outstanding());
}

#[test]
fn compose_starts_pending_without_seq() {
    let msg = Message::compose("general", "alice", "hi", Hlc::new(1, 0, 0));
    assert_eq!(msg.delivery_state, Pending);
    assert_eq!(msg.seq, None);
    assert_eq!(msg.conversation_id, "general");
}

#[test]
fn generated_ids_are_unique() {
    let a = MessageId::generate();
    let b = MessageId::generate();
    assert_ne!(a, b);
    assert_eq!(a.as_str().len(), 36);
}

#[test]
fn message_id_serializes_as_plain_string() {
    let id = MessageId::from("abc");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
}

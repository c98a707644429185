// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::commands::testing::TestContext;
use pl_core::Message;

#[test]
fn test_log_empty_conversation() {
    let ctx = TestContext::new();
    let lines = run_impl(&ctx.client, "general", 10, OutputFormat::Text).unwrap();
    assert_eq!(lines, vec!["No messages in general"]);
}

#[test]
fn test_log_sequenced_before_pending() {
    let ctx = TestContext::new();
    ctx.send("general", "still queued");
    ctx.inbound("general", 1, "bob", "first").inbound("general", 2, "carol", "second");

    let lines = run_impl(&ctx.client, "general", 0, OutputFormat::Text).unwrap();

    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("#1 ") && lines[0].ends_with("bob: first"));
    assert!(lines[1].starts_with("#2 ") && lines[1].ends_with("carol: second"));
    assert!(lines[2].ends_with("alice: still queued  [pending]"));
}

#[test]
fn test_log_limit_keeps_latest() {
    let ctx = TestContext::new();
    for seq in 1..=5 {
        ctx.inbound("general", seq, "bob", &format!("m{seq}"));
    }

    let lines = run_impl(&ctx.client, "general", 2, OutputFormat::Text).unwrap();

    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("bob: m4"));
    assert!(lines[1].ends_with("bob: m5"));
}

#[test]
fn test_log_json() {
    let ctx = TestContext::new();
    let sent = ctx.send("general", "hello");

    let lines = run_impl(&ctx.client, "general", 0, OutputFormat::Json).unwrap();
    let messages: Vec<Message> = serde_json::from_str(&lines[0]).unwrap();

    assert_eq!(messages, vec![sent]);
}

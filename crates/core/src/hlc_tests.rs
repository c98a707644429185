// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use yare::parameterized;

#[derive(Clone)]
struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    fn at(ms: u64) -> Self {
        ManualClock(Arc::new(AtomicU64::new(ms)))
    }

    fn set(&self, ms: u64) {
        self.0.store(ms, AtomicOrdering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

#[parameterized(
    wall_wins = { Hlc::new(100, 9, 9), Hlc::new(200, 0, 0) },
    counter_breaks_tie = { Hlc::new(100, 1, 9), Hlc::new(100, 2, 0) },
    node_breaks_tie = { Hlc::new(100, 1, 1), Hlc::new(100, 1, 2) },
)]
fn ordering(lower: Hlc, higher: Hlc) {
    assert!(lower < higher);
}

#[test]
fn display_and_parse_agree() {
    let hlc = Hlc::new(1_700_000_000_000, 3, 77);
    assert_eq!(hlc.to_string(), "1700000000000-3-77");
    assert_eq!("1700000000000-3-77".parse::<Hlc>().unwrap(), hlc);
}

#[parameterized(
    word = { "later" },
    two_parts = { "1-2" },
    four_parts = { "1-2-3-4" },
    bad_wall = { "x-2-3" },
    bad_counter = { "1-x-3" },
    negative_node = { "1-2--3" },
)]
fn parse_rejects(input: &str) {
    assert!(matches!(input.parse::<Hlc>(), Err(Error::InvalidHlc(_))));
}

#[test]
fn node_id_is_stable_per_device() {
    assert_eq!(node_id_for("device-a"), node_id_for("device-a"));
    assert_ne!(node_id_for("device-a"), node_id_for("device-b"));
}

#[test]
fn now_is_strictly_increasing_with_frozen_clock() {
    let clock = HlcClock::with_clock(ManualClock::at(1000), 1);
    let a = clock.now();
    let b = clock.now();
    let c = clock.now();
    assert!(a < b && b < c);
    assert_eq!(c, Hlc::new(1000, 2, 1));
}

#[test]
fn now_survives_clock_going_backwards() {
    let source = ManualClock::at(5000);
    let clock = HlcClock::with_clock(source.clone(), 1);
    let before = clock.now();
    source.set(1000);
    let after = clock.now();
    assert!(after > before);
    assert_eq!(after.wall_ms, 5000);
}

#[test]
fn now_resets_counter_when_wall_advances() {
    let source = ManualClock::at(1000);
    let clock = HlcClock::with_clock(source.clone(), 1);
    clock.now();
    clock.now();
    source.set(2000);
    assert_eq!(clock.now(), Hlc::new(2000, 0, 1));
}

#[test]
fn receive_from_the_future_orders_replies_after_it() {
    let clock = HlcClock::with_clock(ManualClock::at(1000), 1);
    let remote = Hlc::new(9000, 4, 2);
    let merged = clock.receive(&remote);
    assert!(merged > remote);
    assert!(clock.now() > remote);
}

#[test]
fn receive_from_the_past_keeps_local_time() {
    let clock = HlcClock::with_clock(ManualClock::at(5000), 1);
    let local = clock.now();
    let merged = clock.receive(&Hlc::new(10, 0, 2));
    assert!(merged > local);
    assert_eq!(merged.wall_ms, 5000);
}

#[test]
fn receive_at_same_wall_time_passes_both_counters() {
    let clock = HlcClock::with_clock(ManualClock::at(1000), 1);
    clock.now();
    let merged = clock.receive(&Hlc::new(1000, 7, 2));
    assert_eq!(merged, Hlc::new(1000, 8, 1));
}

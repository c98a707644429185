// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Hybrid Logical Clock timestamps for message `created_at` values.
//!
//! A message's timestamp is minted on the authoring device and must sort
//! after everything that device has already seen, even if its wall clock
//! is behind a peer's. Inbound messages feed [`HlcClock::receive`] so that
//! replies always order after the message they answer.
//!
//! Text form: `{wall_ms}-{counter}-{node_id}`. Ordering compares wall time,
//! then counter, then node id.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// A Hybrid Logical Clock timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hlc {
    /// Wall clock time in milliseconds since Unix epoch.
    pub wall_ms: u64,
    /// Logical counter for events within the same millisecond.
    pub counter: u32,
    /// Authoring device, used as the final tiebreaker.
    pub node_id: u32,
}

impl Hlc {
    pub fn new(wall_ms: u64, counter: u32, node_id: u32) -> Self {
        Hlc { wall_ms, counter, node_id }
    }
}

/// Derives a stable 32-bit node id from a device identifier (FNV-1a).
pub fn node_id_for(device_id: &str) -> u32 {
    device_id
        .bytes()
        .fold(0x811c_9dc5_u32, |hash, byte| (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193))
}

impl Ord for Hlc {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall_ms
            .cmp(&other.wall_ms)
            .then_with(|| self.counter.cmp(&other.counter))
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for Hlc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.wall_ms, self.counter, self.node_id)
    }
}

impl FromStr for Hlc {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('-');
        let (Some(wall), Some(counter), Some(node), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidHlc(format!(
                "expected format 'wall_ms-counter-node_id', got '{s}'"
            )));
        };

        let field = |name: &str, value: &str| {
            Error::InvalidHlc(format!("invalid {name} '{value}' in '{s}'"))
        };
        Ok(Hlc::new(
            wall.parse().map_err(|_| field("wall_ms", wall))?,
            counter.parse().map_err(|_| field("counter", counter))?,
            node.parse().map_err(|_| field("node_id", node))?,
        ))
    }
}

/// Source of wall clock milliseconds. Injectable for tests.
pub trait ClockSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by `SystemTime`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
    }
}

/// Produces strictly increasing [`Hlc`] values for one device.
pub struct HlcClock<C: ClockSource = SystemClock> {
    clock: C,
    node_id: u32,
    last: Mutex<(u64, u32)>,
}

impl HlcClock<SystemClock> {
    /// Creates a system clock for the given device.
    pub fn for_device(device_id: &str) -> Self {
        Self::with_clock(SystemClock, node_id_for(device_id))
    }
}

impl<C: ClockSource> HlcClock<C> {
    pub fn with_clock(clock: C, node_id: u32) -> Self {
        HlcClock { clock, node_id, last: Mutex::new((0, 0)) }
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Mints a timestamp for a locally authored message.
    ///
    /// Never goes backwards, even when the wall clock does.
    pub fn now(&self) -> Hlc {
        let physical = self.clock.now_ms();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());

        *last = if physical > last.0 { (physical, 0) } else { (last.0, last.1 + 1) };
        Hlc::new(last.0, last.1, self.node_id)
    }

    /// Folds a timestamp seen on an inbound message into the clock.
    ///
    /// Any timestamp minted afterwards orders after `seen`.
    pub fn receive(&self, seen: &Hlc) -> Hlc {
        let physical = self.clock.now_ms();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let (last_ms, last_counter) = *last;

        *last = if physical > last_ms && physical > seen.wall_ms {
            (physical, 0)
        } else {
            match seen.wall_ms.cmp(&last_ms) {
                Ordering::Greater => (seen.wall_ms, seen.counter + 1),
                Ordering::Equal => (last_ms, last_counter.max(seen.counter) + 1),
                Ordering::Less => (last_ms, last_counter + 1),
            }
        };
        Hlc::new(last.0, last.1, self.node_id)
    }
}

#[cfg(test)]
#[path = "hlc_tests.rs"]
mod tests;

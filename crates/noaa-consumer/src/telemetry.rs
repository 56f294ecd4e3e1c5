// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Frame counters for one consumer.
//!
//! Malformed frames are dropped silently on the data path; these counters
//! make the drops observable without changing delivery semantics. One set
//! is shared by every stream worker and recent-log fetch of a consumer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregated frame counters (all values use relaxed atomics).
#[derive(Debug, Default)]
pub struct FrameCounters {
    decoded: AtomicU64,
    dropped: AtomicU64,
    connections: AtomicU64,
}

impl FrameCounters {
    pub(crate) fn record_decoded(&self) {
        self.decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Captures a point-in-time snapshot of the counters.
    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            decoded: self.decoded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
        }
    }
}

/// Plain data representation of [`FrameCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSnapshot {
    /// Frames decoded into envelopes, from streams and multipart bodies.
    pub decoded: u64,
    /// Frames discarded as malformed.
    pub dropped: u64,
    /// Successful websocket establishments.
    pub connections: u64,
}

impl fmt::Display for FrameSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "decoded={}, dropped={}, connections={}",
            self.decoded, self.dropped, self.connections
        )
    }
}

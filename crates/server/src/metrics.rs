// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory metrics counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-wide counters, incremented lock-free from handlers.
pub struct Metrics {
    started_at: Instant,
    pub http_requests: AtomicU64,
    pub ws_connections: AtomicU64,
    pub sessions_created: AtomicU64,
    pub worktrees_created: AtomicU64,
    pub turns_started: AtomicU64,
    pub slow_consumers_dropped: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            http_requests: AtomicU64::new(0),
            ws_connections: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            worktrees_created: AtomicU64::new(0),
            turns_started: AtomicU64::new(0),
            slow_consumers_dropped: AtomicU64::new(0),
        }
    }
}

/// Point-in-time view for the status endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub uptime_ms: u64,
    pub http_requests: u64,
    pub ws_connections: u64,
    pub sessions_created: u64,
    pub worktrees_created: u64,
    pub turns_started: u64,
    pub slow_consumers_dropped: u64,
}

impl Metrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            http_requests: self.http_requests.load(Ordering::Relaxed),
            ws_connections: self.ws_connections.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            worktrees_created: self.worktrees_created.load(Ordering::Relaxed),
            turns_started: self.turns_started.load(Ordering::Relaxed),
            slow_consumers_dropped: self.slow_consumers_dropped.load(Ordering::Relaxed),
        }
    }
}

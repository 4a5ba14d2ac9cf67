//! Bridge statistics shared by the facade and the acceptor

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters plus the time of the last client poll
#[derive(Debug, Default)]
pub struct BridgeStats {
    submitted: AtomicU64,
    dispatched: AtomicU64,
    delivered: AtomicU64,
    timed_out: AtomicU64,
    idle_polls: AtomicU64,
    framing_failures: AtomicU64,
    send_failures: AtomicU64,
    late_replies: AtomicU64,
    last_poll_at: RwLock<Option<DateTime<Utc>>>,
}

/// Point-in-time copy for API responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub dispatched: u64,
    pub delivered: u64,
    pub timed_out: u64,
    pub idle_polls: u64,
    pub framing_failures: u64,
    pub send_failures: u64,
    pub late_replies: u64,
    pub queued: usize,
    pub pending: usize,
    pub last_poll_at: Option<String>,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle_poll(&self) {
        self.idle_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_framing_failure(&self) {
        self.framing_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// The command could not be written to the EA
    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_reply(&self) {
        self.late_replies.fetch_add(1, Ordering::Relaxed);
    }

    /// Any accepted connection counts as a poll
    pub fn record_poll(&self) {
        *self.last_poll_at.write() = Some(Utc::now());
    }

    pub fn last_poll_at(&self) -> Option<DateTime<Utc>> {
        *self.last_poll_at.read()
    }

    pub fn snapshot(&self, queued: usize, pending: usize) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            idle_polls: self.idle_polls.load(Ordering::Relaxed),
            framing_failures: self.framing_failures.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            late_replies: self.late_replies.load(Ordering::Relaxed),
            queued,
            pending,
            last_poll_at: self.last_poll_at().map(|t| t.to_rfc3339()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = BridgeStats::new();
        stats.record_submitted();
        stats.record_submitted();
        stats.record_dispatched();
        stats.record_idle_poll();
        stats.record_send_failure();
        assert!(stats.last_poll_at().is_none());
        stats.record_poll();

        let snapshot = stats.snapshot(1, 2);
        assert_eq!(snapshot.submitted, 2);
        assert_eq!(snapshot.dispatched, 1);
        assert_eq!(snapshot.idle_polls, 1);
        assert_eq!(snapshot.delivered, 0);
        assert_eq!(snapshot.send_failures, 1);
        assert_eq!(snapshot.framing_failures, 0);
        assert_eq!(snapshot.queued, 1);
        assert_eq!(snapshot.pending, 2);
        assert!(snapshot.last_poll_at.is_some());
    }
}

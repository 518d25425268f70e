//! Connection counters
//!
//! Plain atomic counters updated by the IO thread and the caller thread,
//! readable from anywhere without locking.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one connection
///
/// # Example
///
/// ```rust
/// use ziapi_driver::ConnectionMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = ConnectionMetrics::new();
/// metrics.events_received.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().events_received, 1);
/// ```
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    /// Events received from the server (routed or not)
    pub events_received: AtomicU64,
    /// Events handed to the queue
    pub events_routed: AtomicU64,
    /// Events discarded by subscription or API level filtering
    pub events_filtered: AtomicU64,
    /// Events lost to queue overflow
    pub events_dropped: AtomicU64,
    pub requests_sent: AtomicU64,
    pub replies_received: AtomicU64,
    /// Replies whose request had already timed out
    pub stale_replies: AtomicU64,
    pub receive_errors: AtomicU64,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_routed: self.events_routed.load(Ordering::Relaxed),
            events_filtered: self.events_filtered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            replies_received: self.replies_received.load(Ordering::Relaxed),
            stale_replies: self.stale_replies.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.events_received.store(0, Ordering::Relaxed);
        self.events_routed.store(0, Ordering::Relaxed);
        self.events_filtered.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
        self.requests_sent.store(0, Ordering::Relaxed);
        self.replies_received.store(0, Ordering::Relaxed);
        self.stale_replies.store(0, Ordering::Relaxed);
        self.receive_errors.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`ConnectionMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub events_routed: u64,
    pub events_filtered: u64,
    pub events_dropped: u64,
    pub requests_sent: u64,
    pub replies_received: u64,
    pub stale_replies: u64,
    pub receive_errors: u64,
}

impl MetricsSnapshot {
    /// Percentage of received events that reached the queue.
    pub fn routed_rate(&self) -> f64 {
        if self.events_received == 0 {
            return 0.0;
        }
        (self.events_routed as f64 / self.events_received as f64) * 100.0
    }

    /// Percentage of routed events lost to overflow.
    pub fn drop_rate(&self) -> f64 {
        if self.events_routed == 0 {
            return 0.0;
        }
        (self.events_dropped as f64 / self.events_routed as f64) * 100.0
    }
}

//! Hypervisor-wide counters
//!
//! Plain atomics updated with `Relaxed` ordering. Read them through
//! [`SystemMetrics::snapshot`] for a consistent-enough view in tests and logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared by every component of one hypervisor instance
#[derive(Debug, Default)]
pub struct SystemMetrics {
    pub messages_processed: AtomicU64,
    pub messages_failed: AtomicU64,
    pub messages_rejected: AtomicU64,
    pub total_processing_time_ns: AtomicU64,

    // Execution paths
    pub inline_calls: AtomicU64,
    pub sync_calls: AtomicU64,

    // Lifecycle
    pub actors_loaded: AtomicU64,
    pub actors_spawned: AtomicU64,
    pub garbage_spawns: AtomicU64,
    pub actors_shutdown: AtomicU64,

    // Scheduler
    pub quiescence_events: AtomicU64,
    pub idle_events: AtomicU64,
}

/// Point-in-time copy of [`SystemMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub messages_rejected: u64,
    pub inline_calls: u64,
    pub sync_calls: u64,
    pub actors_loaded: u64,
    pub actors_spawned: u64,
    pub garbage_spawns: u64,
    pub actors_shutdown: u64,
    pub quiescence_events: u64,
    pub idle_events: u64,
}

impl SystemMetrics {
    pub fn record_message_handled(&self, duration: Duration, success: bool) {
        if success {
            self.messages_processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.messages_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_processing_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.messages_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_call(&self, inline: bool) {
        if inline {
            self.inline_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sync_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_loaded(&self) {
        self.actors_loaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Spawned children; unreachable ones are also counted as garbage
    pub fn record_spawn(&self, reachable: bool) {
        self.actors_spawned.fetch_add(1, Ordering::Relaxed);
        if !reachable {
            self.garbage_spawns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_shutdown(&self, count: u64) {
        self.actors_shutdown.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_quiescence(&self) {
        self.quiescence_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idle(&self) {
        self.idle_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_processing_time_ns(&self) -> f64 {
        let count = self.messages_processed.load(Ordering::Relaxed)
            + self.messages_failed.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_processing_time_ns.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            inline_calls: self.inline_calls.load(Ordering::Relaxed),
            sync_calls: self.sync_calls.load(Ordering::Relaxed),
            actors_loaded: self.actors_loaded.load(Ordering::Relaxed),
            actors_spawned: self.actors_spawned.load(Ordering::Relaxed),
            garbage_spawns: self.garbage_spawns.load(Ordering::Relaxed),
            actors_shutdown: self.actors_shutdown.load(Ordering::Relaxed),
            quiescence_events: self.quiescence_events.load(Ordering::Relaxed),
            idle_events: self.idle_events.load(Ordering::Relaxed),
        }
    }
}

//! Acquisition metrics shared by the producer and consumer adapters
//!
//! Lock-free atomic counters on the hot path, plus a snapshot type for
//! periodic reporting. All operations use Relaxed ordering; the numbers are
//! for monitoring and are only eventually consistent.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the emulator (push side) and the sink (pop side)
#[derive(Debug, Default)]
pub struct AtomicCounters {
    /// Packets accepted by the store
    pub packets_pushed: AtomicU64,
    /// Packets dropped on overflow
    pub packets_dropped: AtomicU64,
    /// Events accepted by the store
    pub events_pushed: AtomicU64,
    /// Events dropped on overflow
    pub events_dropped: AtomicU64,
    /// Raw bytes accepted by the store
    pub bytes_pushed: AtomicU64,
    /// Push attempts retried after an overflow
    pub retries: AtomicU64,
    /// Batches popped by the consumer
    pub batches_popped: AtomicU64,
    /// Events popped by the consumer
    pub events_popped: AtomicU64,
    /// Pops rejected for lack of data
    pub underruns: AtomicU64,
    /// Batches whose first event did not follow the previous batch
    pub continuity_errors: AtomicU64,
}

impl AtomicCounters {
    /// Create new zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a packet accepted by the store
    #[inline]
    pub fn record_push(&self, events: u64, bytes: u64) {
        self.packets_pushed.fetch_add(1, Ordering::Relaxed);
        self.events_pushed.fetch_add(events, Ordering::Relaxed);
        self.bytes_pushed.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a packet dropped on overflow
    #[inline]
    pub fn record_drop(&self, events: u64) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
        self.events_dropped.fetch_add(events, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch handed to the consumer
    #[inline]
    pub fn record_pop(&self, events: u64) {
        self.batches_popped.fetch_add(1, Ordering::Relaxed);
        self.events_popped.fetch_add(events, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_underruns(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_continuity_errors(&self) {
        self.continuity_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of current values
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            packets_pushed: self.packets_pushed.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            events_pushed: self.events_pushed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            bytes_pushed: self.bytes_pushed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            batches_popped: self.batches_popped.load(Ordering::Relaxed),
            events_popped: self.events_popped.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            continuity_errors: self.continuity_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of counter values at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub packets_pushed: u64,
    pub packets_dropped: u64,
    pub events_pushed: u64,
    pub events_dropped: u64,
    pub bytes_pushed: u64,
    pub retries: u64,
    pub batches_popped: u64,
    pub events_popped: u64,
    pub underruns: u64,
    pub continuity_errors: u64,
}

impl CounterSnapshot {
    /// Events pushed but not yet popped, as seen by the counters
    pub fn in_flight(&self) -> u64 {
        self.events_pushed.saturating_sub(self.events_popped)
    }

    /// Fraction of produced events that were dropped (0.0 - 1.0)
    pub fn drop_ratio(&self) -> f64 {
        let produced = self.events_pushed + self.events_dropped;
        if produced == 0 {
            0.0
        } else {
            self.events_dropped as f64 / produced as f64
        }
    }

    /// Calculate rate between two snapshots given elapsed seconds
    pub fn rate_from(&self, prev: &CounterSnapshot, elapsed_secs: f64) -> RateSnapshot {
        if elapsed_secs <= 0.0 {
            return RateSnapshot::default();
        }

        RateSnapshot {
            push_rate: (self.events_pushed.saturating_sub(prev.events_pushed)) as f64
                / elapsed_secs,
            pop_rate: (self.events_popped.saturating_sub(prev.events_popped)) as f64
                / elapsed_secs,
            drop_rate: (self.events_dropped.saturating_sub(prev.events_dropped)) as f64
                / elapsed_secs,
            bytes_rate: (self.bytes_pushed.saturating_sub(prev.bytes_pushed)) as f64
                / elapsed_secs,
        }
    }
}

/// Rate calculations from counter snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct RateSnapshot {
    /// Events pushed per second
    pub push_rate: f64,
    /// Events popped per second
    pub pop_rate: f64,
    /// Events dropped per second
    pub drop_rate: f64,
    /// Bytes pushed per second
    pub bytes_rate: f64,
}

impl RateSnapshot {
    /// Format bytes rate as human-readable string (KB/s, MB/s, etc.)
    pub fn format_bytes_rate(&self) -> String {
        if self.bytes_rate >= 1_000_000_000.0 {
            format!("{:.2} GB/s", self.bytes_rate / 1_000_000_000.0)
        } else if self.bytes_rate >= 1_000_000.0 {
            format!("{:.2} MB/s", self.bytes_rate / 1_000_000.0)
        } else if self.bytes_rate >= 1_000.0 {
            format!("{:.2} KB/s", self.bytes_rate / 1_000.0)
        } else {
            format!("{:.0} B/s", self.bytes_rate)
        }
    }

    /// Format an events rate as human-readable string (K/s, M/s, etc.)
    pub fn format_events_rate(rate: f64) -> String {
        if rate >= 1_000_000.0 {
            format!("{:.2} M/s", rate / 1_000_000.0)
        } else if rate >= 1_000.0 {
            format!("{:.2} K/s", rate / 1_000.0)
        } else {
            format!("{:.0} /s", rate)
        }
    }
}

//! Data sink - pops event batches from the store for downstream processing
//!
//! Architecture:
//! - `DataSink`: polls the store on a fixed interval, pops `chunk_events`
//!   at a time and applies the underrun policy when not enough is buffered
//! - `BatchSink`: the downstream processor each batch is handed to
//! - `ChannelSummary`: default processor, per-channel pulse height statistics
//!
//! The sink also checks that batches are contiguous: every batch must start
//! at the logical event where the previous one ended.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::common::{AtomicCounters, ShutdownReceiver};
use crate::store::{EventBatch, EventConsumer, Underrun};

/// What the sink does when fewer than `chunk_events` are buffered
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnderrunPolicy {
    /// Take nothing and try again on the next poll
    #[default]
    Wait,
    /// Take whatever is buffered, if anything
    Partial,
}

/// DataSink configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataSinkConfig {
    /// Events requested per pop
    pub chunk_events: usize,
    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Behaviour when a full chunk is not available
    pub underrun_policy: UnderrunPolicy,
    /// Statistics output interval in seconds
    pub stats_interval_secs: u64,
    /// Pop everything still buffered when shutting down
    pub drain_on_shutdown: bool,
}

impl Default for DataSinkConfig {
    fn default() -> Self {
        Self {
            chunk_events: 50,
            poll_interval_ms: 20,
            underrun_policy: UnderrunPolicy::Wait,
            stats_interval_secs: 1,
            drain_on_shutdown: true,
        }
    }
}

/// Downstream consumer of popped batches (display, processing, ...)
pub trait BatchSink: Send {
    fn on_batch(&mut self, batch: &EventBatch);
}

/// Per-channel pulse height statistics
///
/// Pulse height of a trace is its maximum minus its minimum, the minimum
/// standing in for the baseline.
#[derive(Debug, Clone, Default)]
pub struct ChannelSummary {
    events: u64,
    height_sum: Vec<u64>,
    height_max: Vec<u16>,
}

impl ChannelSummary {
    pub fn new(channel_count: usize) -> Self {
        Self {
            events: 0,
            height_sum: vec![0; channel_count],
            height_max: vec![0; channel_count],
        }
    }

    /// Events seen so far
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Mean pulse height on `channel`
    pub fn mean_height(&self, channel: usize) -> Option<f64> {
        if self.events == 0 {
            return None;
        }
        let sum = self.height_sum.get(channel)?;
        Some(*sum as f64 / self.events as f64)
    }

    /// Largest pulse height seen on `channel`
    pub fn max_height(&self, channel: usize) -> Option<u16> {
        self.height_max.get(channel).copied()
    }

    /// Channel with the highest mean pulse height
    pub fn brightest_channel(&self) -> Option<usize> {
        if self.events == 0 {
            return None;
        }
        self.height_sum
            .iter()
            .enumerate()
            .max_by_key(|(_, sum)| **sum)
            .map(|(channel, _)| channel)
    }
}

impl BatchSink for ChannelSummary {
    fn on_batch(&mut self, batch: &EventBatch) {
        for event in batch.events() {
            for (channel, trace) in event.channels().enumerate() {
                let (min, max) = trace
                    .iter()
                    .fold((u16::MAX, u16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
                let height = max.saturating_sub(min);
                if let Some(sum) = self.height_sum.get_mut(channel) {
                    *sum += height as u64;
                    self.height_max[channel] = self.height_max[channel].max(height);
                }
            }
            self.events += 1;
        }
    }
}

/// Statistics tracker
#[derive(Debug, Default, Clone)]
pub struct DataSinkStats {
    pub total_batches: u64,
    pub total_events: u64,
    pub underruns: u64,
    pub continuity_errors: u64,
    /// Logical index the next batch must start at
    next_event: Option<u64>,
    events_since_last_report: u64,
}

impl DataSinkStats {
    /// Record a batch; returns false if it does not continue the previous one
    fn update(&mut self, batch: &EventBatch) -> bool {
        let contiguous = self.next_event.map_or(true, |e| e == batch.first_event());
        if !contiguous {
            self.continuity_errors += 1;
        }

        self.next_event = Some(batch.end_event());
        self.total_batches += 1;
        self.total_events += batch.len() as u64;
        self.events_since_last_report += batch.len() as u64;
        contiguous
    }

    fn report(&mut self, total_elapsed: f64, interval_elapsed: f64, buffered: usize) -> String {
        let events_per_sec = if interval_elapsed > 0.0 {
            self.events_since_last_report as f64 / interval_elapsed
        } else {
            0.0
        };
        let total_rate = if total_elapsed > 0.0 {
            self.total_events as f64 / total_elapsed
        } else {
            0.0
        };

        self.events_since_last_report = 0;

        format!(
            "Events: {} total ({:.0}/s avg, {:.0}/s current) | Batches: {} | Underruns: {} | Buffered: {}",
            self.total_events,
            total_rate,
            events_per_sec,
            self.total_batches,
            self.underruns,
            buffered
        )
    }
}

/// Data sink - the consumer side of the acquisition session
pub struct DataSink {
    config: DataSinkConfig,
    counters: Arc<AtomicCounters>,
    stats: DataSinkStats,
}

impl DataSink {
    /// Create a new data sink with the given configuration
    pub fn new(config: DataSinkConfig, counters: Arc<AtomicCounters>) -> Self {
        Self {
            config,
            counters,
            stats: DataSinkStats::default(),
        }
    }

    /// Statistics so far
    pub fn stats(&self) -> &DataSinkStats {
        &self.stats
    }

    fn deliver<K: BatchSink>(&mut self, batch: &EventBatch, sink: &mut K) {
        let expected = self.stats.next_event;
        if !self.stats.update(batch) {
            self.counters.inc_continuity_errors();
            error!(
                expected = ?expected,
                received = batch.first_event(),
                "Batch does not continue the previous one"
            );
        }
        self.counters.record_pop(batch.len() as u64);
        sink.on_batch(batch);
    }

    /// Try once to pop a chunk and hand it to `sink`
    ///
    /// Returns the number of events consumed.
    pub fn poll_once<K: BatchSink>(
        &mut self,
        consumer: &mut EventConsumer,
        batch: &mut EventBatch,
        sink: &mut K,
    ) -> usize {
        let requested = self.config.chunk_events;

        let available = match consumer.pop_into(requested, batch) {
            Ok(()) => {
                self.deliver(batch, sink);
                return requested;
            }
            Err(Underrun { available }) => available,
        };

        self.stats.underruns += 1;
        self.counters.inc_underruns();

        match self.config.underrun_policy {
            UnderrunPolicy::Partial if available > 0 => {
                // Only this consumer shrinks the store, so `available` is still there
                if consumer.pop_into(available, batch).is_err() {
                    return 0;
                }
                debug!(requested, popped = available, "Partial pop");
                self.deliver(batch, sink);
                available
            }
            _ => {
                debug!(requested, available, "Underrun, waiting for more events");
                0
            }
        }
    }

    /// Pop everything currently buffered, in chunks
    ///
    /// Returns the number of events consumed.
    pub fn drain<K: BatchSink>(
        &mut self,
        consumer: &mut EventConsumer,
        batch: &mut EventBatch,
        sink: &mut K,
    ) -> usize {
        let mut drained = 0;
        loop {
            let count = consumer.len().min(self.config.chunk_events.max(1));
            if count == 0 {
                break;
            }
            if consumer.pop_into(count, batch).is_err() {
                break;
            }
            self.deliver(batch, sink);
            drained += count;
        }
        drained
    }

    /// Poll the store until shutdown
    pub async fn run<K: BatchSink>(
        &mut self,
        consumer: &mut EventConsumer,
        sink: &mut K,
        mut shutdown: ShutdownReceiver,
    ) {
        let capacity = consumer.capacity();
        if self.config.chunk_events == 0 || self.config.chunk_events > capacity {
            let clamped = self.config.chunk_events.clamp(1, capacity);
            warn!(
                requested = self.config.chunk_events,
                chunk_events = clamped,
                capacity,
                "chunk_events out of range for this store, clamped"
            );
            self.config.chunk_events = clamped;
        }

        let chunk = self.config.chunk_events;
        let mut batch = EventBatch::with_capacity(consumer.layout(), chunk);
        let mut ticker = interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        // Bound the catch-up loop so a fast producer cannot starve the shutdown check
        let max_pops_per_tick = consumer.capacity() / chunk.max(1) + 1;

        let start_time = Instant::now();
        let mut last_report_time = Instant::now();
        let stats_interval = Duration::from_secs(self.config.stats_interval_secs);

        info!(
            chunk_events = chunk,
            poll_interval_ms = self.config.poll_interval_ms,
            underrun_policy = ?self.config.underrun_policy,
            "DataSink started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("DataSink received shutdown signal");
                    break;
                }

                _ = ticker.tick() => {
                    for _ in 0..max_pops_per_tick {
                        if self.poll_once(consumer, &mut batch, sink) < chunk {
                            break;
                        }
                    }

                    if last_report_time.elapsed() >= stats_interval {
                        let report = self.stats.report(
                            start_time.elapsed().as_secs_f64(),
                            last_report_time.elapsed().as_secs_f64(),
                            consumer.len(),
                        );
                        last_report_time = Instant::now();
                        info!("{}", report);
                    }
                }
            }
        }

        if self.config.drain_on_shutdown {
            let drained = self.drain(consumer, &mut batch, sink);
            info!(events = drained, "Drained store on shutdown");
        }

        info!(
            batches = self.stats.total_batches,
            events = self.stats.total_events,
            underruns = self.stats.underruns,
            continuity_errors = self.stats.continuity_errors,
            left_in_store = consumer.len(),
            "DataSink stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::shutdown_channel;
    use crate::store::{EventProducer, EventStore, RecordLayout};

    fn split_store(capacity: usize) -> (EventProducer, EventConsumer) {
        EventStore::new(RecordLayout::new(2, 4, capacity).unwrap()).split()
    }

    fn sink_with(config: DataSinkConfig) -> (DataSink, Arc<AtomicCounters>) {
        let counters = Arc::new(AtomicCounters::new());
        (DataSink::new(config, counters.clone()), counters)
    }

    #[test]
    fn default_config() {
        let config = DataSinkConfig::default();
        assert_eq!(config.chunk_events, 50);
        assert_eq!(config.poll_interval_ms, 20);
        assert_eq!(config.underrun_policy, UnderrunPolicy::Wait);
        assert_eq!(config.stats_interval_secs, 1);
        assert!(config.drain_on_shutdown);
    }

    #[test]
    fn channel_summary_tracks_heights() {
        let mut store = EventStore::new(RecordLayout::new(2, 4, 4).unwrap());
        // event 0: ch0 height 10, ch1 height 2
        // event 1: ch0 height 4,  ch1 height 30
        store
            .push_samples(2, &[5, 15, 5, 5, 1, 2, 3, 1, 0, 4, 0, 0, 10, 40, 10, 10])
            .unwrap();
        let batch = store.pop(2).unwrap();

        let mut summary = ChannelSummary::new(2);
        assert_eq!(summary.brightest_channel(), None);
        assert_eq!(summary.mean_height(0), None);

        summary.on_batch(&batch);
        assert_eq!(summary.events(), 2);
        assert_eq!(summary.mean_height(0), Some(7.0));
        assert_eq!(summary.mean_height(1), Some(16.0));
        assert_eq!(summary.max_height(0), Some(10));
        assert_eq!(summary.max_height(1), Some(30));
        assert_eq!(summary.max_height(2), None);
        assert_eq!(summary.brightest_channel(), Some(1));
    }

    #[test]
    fn wait_policy_takes_nothing_on_underrun() {
        let (mut producer, mut consumer) = split_store(8);
        producer.push_samples(3, &[1; 24]).unwrap();

        let (mut sink, counters) = sink_with(DataSinkConfig {
            chunk_events: 5,
            ..Default::default()
        });
        let mut batch = EventBatch::new(consumer.layout());
        let mut summary = ChannelSummary::new(2);

        assert_eq!(sink.poll_once(&mut consumer, &mut batch, &mut summary), 0);
        assert_eq!(consumer.len(), 3);
        assert_eq!(summary.events(), 0);
        assert_eq!(counters.snapshot().underruns, 1);

        producer.push_samples(2, &[2; 16]).unwrap();
        assert_eq!(sink.poll_once(&mut consumer, &mut batch, &mut summary), 5);
        assert_eq!(summary.events(), 5);
        assert_eq!(counters.snapshot().events_popped, 5);
    }

    #[test]
    fn partial_policy_takes_what_is_there() {
        let (mut producer, mut consumer) = split_store(8);
        producer.push_samples(3, &[1; 24]).unwrap();

        let (mut sink, counters) = sink_with(DataSinkConfig {
            chunk_events: 5,
            underrun_policy: UnderrunPolicy::Partial,
            ..Default::default()
        });
        let mut batch = EventBatch::new(consumer.layout());
        let mut summary = ChannelSummary::new(2);

        assert_eq!(sink.poll_once(&mut consumer, &mut batch, &mut summary), 3);
        assert!(consumer.is_empty());
        assert_eq!(batch.len(), 3);

        // Empty store: nothing to take, still an underrun
        assert_eq!(sink.poll_once(&mut consumer, &mut batch, &mut summary), 0);
        let snap = counters.snapshot();
        assert_eq!(snap.underruns, 2);
        assert_eq!(snap.batches_popped, 1);
    }

    #[test]
    fn continuity_break_is_counted() {
        let (mut sink, counters) = sink_with(DataSinkConfig::default());
        let mut summary = ChannelSummary::new(2);

        let (mut p1, mut c1) = split_store(8);
        p1.push_samples(4, &[0; 32]).unwrap();
        sink.deliver(&c1.pop(2).unwrap(), &mut summary);
        sink.deliver(&c1.pop(2).unwrap(), &mut summary);
        assert_eq!(sink.stats().continuity_errors, 0);

        // A batch from another store restarts at event 0
        let (mut p2, mut c2) = split_store(8);
        p2.push_samples(1, &[0; 8]).unwrap();
        sink.deliver(&c2.pop(1).unwrap(), &mut summary);

        assert_eq!(sink.stats().continuity_errors, 1);
        assert_eq!(counters.snapshot().continuity_errors, 1);
        assert_eq!(sink.stats().total_events, 5);
    }

    #[test]
    fn drain_empties_store_in_chunks() {
        let (mut producer, mut consumer) = split_store(16);
        producer.push_samples(11, &[3; 88]).unwrap();

        let (mut sink, counters) = sink_with(DataSinkConfig {
            chunk_events: 4,
            ..Default::default()
        });
        let mut batch = EventBatch::new(consumer.layout());
        let mut summary = ChannelSummary::new(2);

        assert_eq!(sink.drain(&mut consumer, &mut batch, &mut summary), 11);
        assert!(consumer.is_empty());
        assert_eq!(counters.snapshot().batches_popped, 3);
        assert_eq!(sink.stats().continuity_errors, 0);
    }

    #[test]
    fn report_resets_interval_counter() {
        let mut stats = DataSinkStats::default();
        let (mut producer, mut consumer) = split_store(8);
        producer.push_samples(4, &[0; 32]).unwrap();
        stats.update(&consumer.pop(4).unwrap());

        let report = stats.report(2.0, 1.0, 0);
        assert!(report.contains("Events: 4 total"));
        assert!(report.contains("2/s avg"));
        assert!(report.contains("4/s current"));
        assert_eq!(stats.events_since_last_report, 0);
    }

    #[tokio::test]
    async fn run_drains_on_shutdown() {
        let (mut producer, mut consumer) = split_store(16);
        producer.push_samples(7, &[9; 56]).unwrap();

        let (mut sink, counters) = sink_with(DataSinkConfig {
            chunk_events: 5,
            poll_interval_ms: 5,
            ..Default::default()
        });
        let mut summary = ChannelSummary::new(2);

        let (tx, rx) = shutdown_channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = tx.send(());
        });

        sink.run(&mut consumer, &mut summary, rx).await;

        assert!(consumer.is_empty());
        assert_eq!(summary.events(), 7);
        assert_eq!(counters.snapshot().events_popped, 7);
    }

    #[tokio::test]
    async fn run_clamps_chunk_to_capacity() {
        let (mut producer, mut consumer) = split_store(8);
        producer.push_samples(8, &[4; 64]).unwrap();

        let (mut sink, counters) = sink_with(DataSinkConfig {
            chunk_events: 100,
            poll_interval_ms: 5,
            drain_on_shutdown: false,
            ..Default::default()
        });
        let mut summary = ChannelSummary::new(2);

        let (tx, rx) = shutdown_channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = tx.send(());
        });

        sink.run(&mut consumer, &mut summary, rx).await;

        assert!(consumer.is_empty());
        assert_eq!(summary.events(), 8);
        assert_eq!(counters.snapshot().batches_popped, 1);
    }

    #[tokio::test]
    async fn run_without_drain_leaves_remainder() {
        let (mut producer, mut consumer) = split_store(16);
        producer.push_samples(7, &[9; 56]).unwrap();

        let (mut sink, _counters) = sink_with(DataSinkConfig {
            chunk_events: 5,
            poll_interval_ms: 5,
            drain_on_shutdown: false,
            ..Default::default()
        });
        let mut summary = ChannelSummary::new(2);

        let (tx, rx) = shutdown_channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = tx.send(());
        });

        sink.run(&mut consumer, &mut summary, rx).await;

        assert_eq!(summary.events(), 5);
        assert_eq!(consumer.len(), 2);
    }
}

//! Emulator data source - synthetic flow-cytometry events for the store
//!
//! Stands in for the instrument: generates packets of raw multi-channel
//! pulse traces and pushes them into the event store.
//!
//! Architecture:
//! - `PacketSource`: anything that can produce one framed packet at a time
//! - `PulseGenerator`: the synthetic `PacketSource`
//! - `Emulator`: async driver that pushes one packet per tick and applies
//!   the overflow policy when the store is full

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::common::{AtomicCounters, ShutdownReceiver};
use crate::store::{EventProducer, Overflow, RecordLayout};

/// What the emulator does with a packet the store rejects
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Drop the whole packet and carry on
    #[default]
    Drop,
    /// Back off and retry up to `max_retries` times, then drop
    Retry,
}

/// Emulator configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Number of events per packet
    pub events_per_packet: usize,
    /// Interval between packets in milliseconds (0 = full speed)
    pub packet_interval_ms: u64,
    /// Behaviour when the store is full
    pub overflow_policy: OverflowPolicy,
    /// Sleep between retries in milliseconds
    pub retry_backoff_ms: u64,
    /// Retries before a packet is dropped
    pub max_retries: u32,
    /// RNG seed (None = seeded from the OS)
    pub seed: Option<u64>,
    /// Baseline ADC level
    pub baseline: u16,
    /// Gaussian noise sigma in ADC counts
    pub noise_sigma: f64,
    /// Mean pulse amplitude in ADC counts
    pub amplitude_mean: f64,
    /// Pulse amplitude sigma in ADC counts
    pub amplitude_sigma: f64,
    /// Number of distinct emission spectra to draw events from
    pub fluorophores: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            events_per_packet: 100,
            packet_interval_ms: 10,
            overflow_policy: OverflowPolicy::Drop,
            retry_backoff_ms: 1,
            max_retries: 3,
            seed: None,
            baseline: 200,
            noise_sigma: 4.0,
            amplitude_mean: 8000.0,
            amplitude_sigma: 2000.0,
            fluorophores: 4,
        }
    }
}

impl EmulatorConfig {
    /// Noise and amplitude spreads must be usable as a standard deviation
    pub fn check_sigmas(&self) -> Result<(), EmulatorError> {
        for (name, value) in [
            ("noise_sigma", self.noise_sigma),
            ("amplitude_sigma", self.amplitude_sigma),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EmulatorError::InvalidSigma { name, value });
            }
        }
        Ok(())
    }
}

/// Emulator errors
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Invalid pulse distribution: {0}")]
    Distribution(#[from] rand_distr::NormalError),

    #[error("events_per_packet must be in 1..={capacity}, got {events}")]
    PacketSize { events: usize, capacity: usize },

    #[error("fluorophores must be at least 1")]
    NoFluorophores,

    #[error("{name} must be finite and non-negative, got {value}")]
    InvalidSigma { name: &'static str, value: f64 },
}

/// Source of framed packets for the store
///
/// The byte layout is the store's: per event, channel 0's full time trace
/// then channel 1's and so on, as little-endian `u16`; events back to back.
pub trait PacketSource: Send {
    /// Replace the contents of `out` with one packet and return its event count
    fn next_packet(&mut self, out: &mut Vec<u8>) -> usize;
}

/// Synthetic pulse generator
///
/// Each event is a particle crossing the laser: a Gaussian pulse in time,
/// spread over the channels by the emission spectrum of one of
/// `fluorophores` dyes, on top of a noisy baseline.
pub struct PulseGenerator {
    layout: RecordLayout,
    events_per_packet: usize,
    baseline: f64,
    amplitude: Normal<f64>,
    noise: Normal<f64>,
    /// Per-dye channel weights, peak normalized to 1.0
    signatures: Vec<Vec<f64>>,
    rng: StdRng,
}

impl PulseGenerator {
    /// Create a generator for the given layout
    pub fn new(layout: RecordLayout, config: &EmulatorConfig) -> Result<Self, EmulatorError> {
        if config.events_per_packet == 0 || config.events_per_packet > layout.capacity_events() {
            return Err(EmulatorError::PacketSize {
                events: config.events_per_packet,
                capacity: layout.capacity_events(),
            });
        }
        if config.fluorophores == 0 {
            return Err(EmulatorError::NoFluorophores);
        }
        config.check_sigmas()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            layout,
            events_per_packet: config.events_per_packet,
            baseline: config.baseline as f64,
            amplitude: Normal::new(config.amplitude_mean, config.amplitude_sigma)?,
            noise: Normal::new(0.0, config.noise_sigma)?,
            signatures: emission_signatures(layout.channel_count(), config.fluorophores),
            rng,
        })
    }

    /// Channel weights of each dye
    pub fn signatures(&self) -> &[Vec<f64>] {
        &self.signatures
    }

    /// Append one event's samples to `out`
    fn generate_event(&mut self, out: &mut Vec<u8>) {
        let n = self.layout.samples_per_channel();
        let dye = self.rng.gen_range(0..self.signatures.len());
        let amplitude = self.amplitude.sample(&mut self.rng).max(0.0);

        // Pulse centred somewhere in the first half of the window
        let center = self.rng.gen_range(n / 4..=n / 2) as f64;
        let width = (n as f64 / 10.0).max(1.0);

        for channel in 0..self.layout.channel_count() {
            let peak = amplitude * self.signatures[dye][channel];
            for t in 0..n {
                let x = (t as f64 - center) / width;
                let value = self.baseline
                    + peak * (-0.5 * x * x).exp()
                    + self.noise.sample(&mut self.rng);
                let sample = value.round().clamp(0.0, u16::MAX as f64) as u16;
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
    }
}

impl PacketSource for PulseGenerator {
    fn next_packet(&mut self, out: &mut Vec<u8>) -> usize {
        out.clear();
        out.reserve(self.events_per_packet * self.layout.bytes_per_event());
        for _ in 0..self.events_per_packet {
            self.generate_event(out);
        }
        self.events_per_packet
    }
}

/// Emission spectra: dye `d` peaks on an evenly spaced channel and falls off
/// as a Gaussian over neighbouring channels.
fn emission_signatures(channels: usize, dyes: usize) -> Vec<Vec<f64>> {
    let spread = (channels as f64 / 4.0).max(0.5);
    (0..dyes)
        .map(|d| {
            let peak = (d * channels / dyes) as f64;
            (0..channels)
                .map(|c| {
                    let x = (c as f64 - peak) / spread;
                    (-0.5 * x * x).exp()
                })
                .collect()
        })
        .collect()
}

/// Emulator data source
///
/// Pulls packets from a [`PacketSource`] and pushes them into the store.
pub struct Emulator<S: PacketSource = PulseGenerator> {
    config: EmulatorConfig,
    source: S,
    counters: Arc<AtomicCounters>,
    packet: Vec<u8>,
    packets_generated: u64,
}

impl<S: PacketSource> Emulator<S> {
    /// Create a new emulator around a packet source
    pub fn new(config: EmulatorConfig, source: S, counters: Arc<AtomicCounters>) -> Self {
        Self {
            config,
            source,
            counters,
            packet: Vec::new(),
            packets_generated: 0,
        }
    }

    /// Packets generated so far, accepted or not
    pub fn packets_generated(&self) -> u64 {
        self.packets_generated
    }

    /// Generate one packet and push it, applying the overflow policy
    async fn emit_packet(&mut self, producer: &mut EventProducer) -> Result<(), Overflow> {
        let event_count = self.source.next_packet(&mut self.packet);
        self.packets_generated += 1;

        let mut retries = 0;
        loop {
            match producer.push(event_count, &self.packet) {
                Ok(()) => {
                    self.counters.record_push(event_count as u64, self.packet.len() as u64);
                    debug!(
                        seq = self.packets_generated,
                        events = event_count,
                        buffered = producer.len(),
                        "Pushed packet"
                    );
                    return Ok(());
                }
                Err(overflow)
                    if self.config.overflow_policy == OverflowPolicy::Retry
                        && retries < self.config.max_retries =>
                {
                    retries += 1;
                    self.counters.inc_retries();
                    debug!(
                        events = overflow.dropped,
                        attempt = retries,
                        "Store full, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
                }
                Err(overflow) => {
                    self.counters.record_drop(overflow.dropped as u64);
                    warn!(
                        seq = self.packets_generated,
                        dropped = overflow.dropped,
                        free = producer.free(),
                        "Acquisition buffer full, packet dropped"
                    );
                    return Err(overflow);
                }
            }
        }
    }

    /// Push packets until shutdown
    ///
    /// If packet_interval_ms is 0, runs at full speed, yielding between
    /// packets so the consumer task gets scheduled.
    pub async fn run(&mut self, producer: &mut EventProducer, mut shutdown: ShutdownReceiver) {
        let use_ticker = self.config.packet_interval_ms > 0;
        let mut ticker = interval(Duration::from_millis(self.config.packet_interval_ms.max(1)));

        info!(
            events_per_packet = self.config.events_per_packet,
            packet_interval_ms = self.config.packet_interval_ms,
            overflow_policy = ?self.config.overflow_policy,
            capacity = producer.capacity(),
            "Emulator started"
        );

        loop {
            if use_ticker {
                tokio::select! {
                    biased;

                    _ = shutdown.recv() => {
                        info!("Emulator received shutdown signal");
                        break;
                    }

                    _ = ticker.tick() => {
                        let _ = self.emit_packet(producer).await;
                    }
                }
            } else {
                tokio::select! {
                    biased;

                    _ = shutdown.recv() => {
                        info!("Emulator received shutdown signal");
                        break;
                    }

                    _ = tokio::task::yield_now() => {}
                }

                let _ = self.emit_packet(producer).await;
            }
        }

        info!(total_packets = self.packets_generated, "Emulator stopped");
    }

    /// Push a fixed number of packets (useful for testing)
    pub async fn run_packets(&mut self, producer: &mut EventProducer, count: u64) {
        let mut ticker = interval(Duration::from_millis(self.config.packet_interval_ms.max(1)));

        for _ in 0..count {
            if self.config.packet_interval_ms > 0 {
                ticker.tick().await;
            } else {
                tokio::task::yield_now().await;
            }
            let _ = self.emit_packet(producer).await;
        }

        info!(total_packets = self.packets_generated, "Emulator finished");
    }
}

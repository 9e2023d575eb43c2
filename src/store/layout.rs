//! Record layout: how one event is encoded as samples
//!
//! One event is `channel_count` channel traces of `samples_per_channel`
//! unsigned 16-bit samples each, stored channel-major (channel 0's full
//! trace, then channel 1's, ...). All derived sizes are computed once at
//! construction and never change afterwards.

use std::ops::Range;

use serde::Deserialize;

use super::error::LayoutError;

/// Width of one raw sample in bytes (little-endian `u16`)
pub const BYTES_PER_SAMPLE: usize = 2;

/// Construction-time acquisition constants, as read from the config file
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayoutConfig {
    /// Number of simultaneous analog channels per event
    pub channel_count: usize,
    /// Acquisition rate in samples per microsecond
    pub sample_rate: f64,
    /// Maximum time window captured per event in microseconds
    pub max_event_duration: f64,
    /// Width of one raw sample in bytes
    pub bytes_per_sample: usize,
    /// Largest packet the producer may deliver in one push
    pub max_events_per_packet: usize,
    /// Number of full packets the store must be able to hold
    pub max_packets_in_flight: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            channel_count: 16,
            sample_rate: 50.0,
            max_event_duration: 2.0,
            bytes_per_sample: BYTES_PER_SAMPLE,
            max_events_per_packet: 100,
            max_packets_in_flight: 50,
        }
    }
}

/// Validated record layout with derived sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    channel_count: usize,
    samples_per_channel: usize,
    values_per_event: usize,
    bytes_per_event: usize,
    capacity_events: usize,
}

impl RecordLayout {
    /// Build a layout directly from channel count, samples per channel and
    /// ring capacity in events.
    pub fn new(
        channel_count: usize,
        samples_per_channel: usize,
        capacity_events: usize,
    ) -> Result<Self, LayoutError> {
        if channel_count == 0 {
            return Err(LayoutError::NoChannels);
        }
        if samples_per_channel == 0 {
            return Err(LayoutError::NoSamples);
        }
        if capacity_events == 0 {
            return Err(LayoutError::Zero("capacity_events"));
        }

        let values_per_event = channel_count
            .checked_mul(samples_per_channel)
            .ok_or(LayoutError::TooLarge("values_per_event"))?;
        let bytes_per_event = values_per_event
            .checked_mul(BYTES_PER_SAMPLE)
            .ok_or(LayoutError::TooLarge("bytes_per_event"))?;
        // Storage size in bytes must be addressable too
        capacity_events
            .checked_mul(bytes_per_event)
            .ok_or(LayoutError::TooLarge("storage size"))?;

        Ok(Self {
            channel_count,
            samples_per_channel,
            values_per_event,
            bytes_per_event,
            capacity_events,
        })
    }

    /// Derive and validate a layout from the acquisition constants.
    ///
    /// `samples_per_channel = floor(sample_rate * max_event_duration)` and
    /// `capacity_events = max_events_per_packet * max_packets_in_flight`.
    pub fn from_config(config: &LayoutConfig) -> Result<Self, LayoutError> {
        if config.channel_count == 0 {
            return Err(LayoutError::NoChannels);
        }
        for (name, value) in [
            ("sample_rate", config.sample_rate),
            ("max_event_duration", config.max_event_duration),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(LayoutError::InvalidTiming { name, value });
            }
        }
        if config.bytes_per_sample != BYTES_PER_SAMPLE {
            return Err(LayoutError::UnsupportedSampleWidth(config.bytes_per_sample));
        }
        if config.max_events_per_packet == 0 {
            return Err(LayoutError::Zero("max_events_per_packet"));
        }
        if config.max_packets_in_flight == 0 {
            return Err(LayoutError::Zero("max_packets_in_flight"));
        }

        let samples = (config.sample_rate * config.max_event_duration).floor();
        if samples < 1.0 {
            return Err(LayoutError::NoSamples);
        }
        if samples >= usize::MAX as f64 {
            return Err(LayoutError::TooLarge("samples_per_channel"));
        }

        let capacity_events = config
            .max_events_per_packet
            .checked_mul(config.max_packets_in_flight)
            .ok_or(LayoutError::TooLarge("capacity_events"))?;

        Self::new(config.channel_count, samples as usize, capacity_events)
    }

    /// Number of analog channels per event
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Number of time samples per channel trace
    #[inline]
    pub fn samples_per_channel(&self) -> usize {
        self.samples_per_channel
    }

    /// Number of samples in one event
    #[inline]
    pub fn values_per_event(&self) -> usize {
        self.values_per_event
    }

    /// Number of raw bytes in one event
    #[inline]
    pub fn bytes_per_event(&self) -> usize {
        self.bytes_per_event
    }

    /// Fixed ring capacity in events
    #[inline]
    pub fn capacity_events(&self) -> usize {
        self.capacity_events
    }

    /// Total number of sample slots in the ring storage
    #[inline]
    pub fn storage_len(&self) -> usize {
        self.capacity_events * self.values_per_event
    }

    /// Physical sample ranges covering logical events
    /// `[start_event, start_event + event_count)`.
    ///
    /// The second range is empty unless the logical range crosses the
    /// physical end of storage. Both ranges start and end on event
    /// boundaries. `event_count` must not exceed the capacity.
    pub fn physical_ranges(
        &self,
        start_event: u64,
        event_count: usize,
    ) -> (Range<usize>, Range<usize>) {
        debug_assert!(event_count <= self.capacity_events);

        let len = event_count * self.values_per_event;
        let start = (start_event % self.capacity_events as u64) as usize * self.values_per_event;
        let end = self.storage_len();

        if start + len <= end {
            (start..start + len, 0..0)
        } else {
            let first = end - start;
            (start..end, 0..len - first)
        }
    }
}

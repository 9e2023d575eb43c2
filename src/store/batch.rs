//! Batches of events handed to the consumer
//!
//! A batch owns one flat, contiguous sample vector. The
//! (event, channel, sample) shape is a view over it, never a copy.

use std::slice::ChunksExact;

use super::layout::RecordLayout;

/// Events popped from the store, oldest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    channel_count: usize,
    samples_per_channel: usize,
    /// Logical store index of event 0 in this batch
    first_event: u64,
    samples: Vec<u16>,
}

impl EventBatch {
    /// Create an empty batch for the given layout
    pub fn new(layout: &RecordLayout) -> Self {
        Self {
            channel_count: layout.channel_count(),
            samples_per_channel: layout.samples_per_channel(),
            first_event: 0,
            samples: Vec::new(),
        }
    }

    /// Create an empty batch with room for `events` events
    pub fn with_capacity(layout: &RecordLayout, events: usize) -> Self {
        Self {
            samples: Vec::with_capacity(events * layout.values_per_event()),
            ..Self::new(layout)
        }
    }

    /// Refill this batch in place, keeping its allocation
    pub(crate) fn refill(&mut self, first_event: u64, first: &[u16], second: &[u16]) {
        self.first_event = first_event;
        self.samples.clear();
        self.samples.extend_from_slice(first);
        self.samples.extend_from_slice(second);
    }

    #[inline]
    fn values_per_event(&self) -> usize {
        self.channel_count * self.samples_per_channel
    }

    /// Number of events in the batch
    pub fn len(&self) -> usize {
        self.samples.len() / self.values_per_event()
    }

    /// Check if batch is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Logical store index of the first event in this batch
    pub fn first_event(&self) -> u64 {
        self.first_event
    }

    /// Logical store index one past the last event in this batch
    pub fn end_event(&self) -> u64 {
        self.first_event + self.len() as u64
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn samples_per_channel(&self) -> usize {
        self.samples_per_channel
    }

    /// Shape as (events, channels, samples)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.len(), self.channel_count, self.samples_per_channel)
    }

    /// Flat samples in event, channel, time order
    pub fn as_flat(&self) -> &[u16] {
        &self.samples
    }

    /// Take ownership of the flat samples
    pub fn into_samples(self) -> Vec<u16> {
        self.samples
    }

    /// View of event `index`, if present
    pub fn event(&self, index: usize) -> Option<EventView<'_>> {
        let vpe = self.values_per_event();
        let start = index.checked_mul(vpe)?;
        let samples = self.samples.get(start..start.checked_add(vpe)?)?;
        Some(EventView {
            samples,
            samples_per_channel: self.samples_per_channel,
        })
    }

    /// Iterate over events, oldest first
    pub fn events(&self) -> Events<'_> {
        Events {
            chunks: self.samples.chunks_exact(self.values_per_event()),
            samples_per_channel: self.samples_per_channel,
        }
    }

    /// Single sample at (event, channel, time)
    pub fn sample(&self, event: usize, channel: usize, time: usize) -> Option<u16> {
        if channel >= self.channel_count || time >= self.samples_per_channel {
            return None;
        }
        self.event(event)?.channel(channel).map(|trace| trace[time])
    }
}

/// Borrowed view of a single event
#[derive(Debug, Clone, Copy)]
pub struct EventView<'a> {
    samples: &'a [u16],
    samples_per_channel: usize,
}

impl<'a> EventView<'a> {
    /// All samples of this event, channel-major
    pub fn as_flat(&self) -> &'a [u16] {
        self.samples
    }

    /// Number of channels in this event
    pub fn channel_count(&self) -> usize {
        self.samples.len() / self.samples_per_channel
    }

    /// Time trace of one channel
    pub fn channel(&self, channel: usize) -> Option<&'a [u16]> {
        let start = channel.checked_mul(self.samples_per_channel)?;
        self.samples.get(start..start.checked_add(self.samples_per_channel)?)
    }

    /// Iterate over channel traces in channel order
    pub fn channels(&self) -> ChunksExact<'a, u16> {
        self.samples.chunks_exact(self.samples_per_channel)
    }
}

/// Iterator over the events of a batch
pub struct Events<'a> {
    chunks: ChunksExact<'a, u16>,
    samples_per_channel: usize,
}

impl<'a> Iterator for Events<'a> {
    type Item = EventView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks.next().map(|samples| EventView {
            samples,
            samples_per_channel: self.samples_per_channel,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Events<'_> {}

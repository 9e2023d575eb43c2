//! Circular event store between the acquisition producer and its consumer
//!
//! A fixed-capacity ring of whole events. The producer pushes packets of raw
//! samples, the consumer pops batches of arbitrary size. Nothing grows after
//! construction.
//!
//! # Cursors
//!
//! `head` (oldest unconsumed event) and `tail` (next free slot) are
//! monotonically increasing logical event indices; they are never wrapped.
//! The physical slot of logical event `i` is `i mod capacity_events`.
//! At all times `head <= tail <= head + capacity_events`.
//!
//! # Concurrency
//!
//! Single producer, single consumer. [`EventStore::split`] hands out one
//! [`EventProducer`] and one [`EventConsumer`]; both are `Send`, neither is
//! `Clone`, and every mutating method takes `&mut self`.
//!
//! ```text
//! Producer copies into [tail, new_tail), then Release-stores tail  ->  consumer Acquire-loads tail
//! Consumer copies out of [head, new_head), then Release-stores head ->  producer Acquire-loads head
//! ```
//!
//! The consumer only touches slots in `[head, tail)` and the producer only
//! touches slots in `[tail, head + capacity)`, so the two never alias.
//!
//! # Backpressure
//!
//! Both sides are non-blocking. A push that does not fit is rejected whole
//! with [`Overflow`]; a pop asking for more than is buffered is rejected with
//! [`Underrun`]. Neither touches the cursors. Waiting, retrying and dropping
//! are the caller's business.

pub mod batch;
pub mod error;
pub mod layout;

pub use batch::{EventBatch, EventView, Events};
pub use error::{LayoutError, Overflow, StoreError, Underrun};
pub use layout::{LayoutConfig, RecordLayout, BYTES_PER_SAMPLE};

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

// ============================================================================
// Shared ring storage
// ============================================================================

/// Storage and cursors shared by the producer and consumer handles.
struct EventRing {
    layout: RecordLayout,
    /// `capacity_events * values_per_event` sample slots
    storage: Box<[UnsafeCell<u16>]>,
    /// Oldest unconsumed event. Written only by the consumer.
    head: AtomicU64,
    /// Next free event slot. Written only by the producer.
    tail: AtomicU64,
}

// SAFETY: slot access is partitioned by the head/tail protocol described in
// the module docs; the cursors themselves are atomics.
unsafe impl Sync for EventRing {}

impl EventRing {
    fn new(layout: RecordLayout) -> Self {
        let storage = (0..layout.storage_len()).map(|_| UnsafeCell::new(0)).collect();

        Self {
            layout,
            storage,
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
        }
    }

    fn capacity(&self) -> usize {
        self.layout.capacity_events()
    }

    fn len(&self) -> usize {
        // head first: tail never moves backwards, so this cannot underflow
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        ((tail - head) as usize).min(self.capacity())
    }

    /// # Safety
    ///
    /// No other reference to the slots in `range` may exist while the
    /// returned slice is alive.
    #[allow(clippy::mut_from_ref)]
    unsafe fn segment_mut(&self, range: Range<usize>) -> &mut [u16] {
        let cells = &self.storage[range];
        // UnsafeCell<u16> is repr(transparent) over u16
        let base = UnsafeCell::raw_get(cells.as_ptr());
        unsafe { std::slice::from_raw_parts_mut(base, cells.len()) }
    }

    /// # Safety
    ///
    /// No mutable reference to the slots in `range` may exist while the
    /// returned slice is alive.
    unsafe fn segment(&self, range: Range<usize>) -> &[u16] {
        let cells = &self.storage[range];
        let base = UnsafeCell::raw_get(cells.as_ptr()) as *const u16;
        unsafe { std::slice::from_raw_parts(base, cells.len()) }
    }
}

impl fmt::Debug for EventRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRing")
            .field("layout", &self.layout)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .finish_non_exhaustive()
    }
}

fn decode_le(dst: &mut [u16], src: &[u8]) {
    for (sample, bytes) in dst.iter_mut().zip(src.chunks_exact(BYTES_PER_SAMPLE)) {
        *sample = u16::from_le_bytes([bytes[0], bytes[1]]);
    }
}

// ============================================================================
// Producer
// ============================================================================

/// Write side of the store. There is exactly one per store.
#[derive(Debug)]
pub struct EventProducer {
    ring: Arc<EventRing>,
}

impl EventProducer {
    /// Reserve `[tail, tail + event_count)`, let `fill` write it, then
    /// publish the new tail.
    fn write_with<F>(&mut self, event_count: usize, fill: F) -> Result<(), Overflow>
    where
        F: FnOnce(&mut [u16], &mut [u16]),
    {
        if event_count == 0 {
            return Ok(());
        }

        let ring = &*self.ring;
        let tail = ring.tail.load(Ordering::Relaxed);
        let head = ring.head.load(Ordering::Acquire);
        let free = ring.capacity() as u64 - (tail - head);

        if event_count as u64 > free {
            return Err(Overflow {
                dropped: event_count,
            });
        }

        let (first, second) = ring.layout.physical_ranges(tail, event_count);
        // SAFETY: both ranges lie in [tail, head + capacity), which the
        // consumer does not read until tail is published below. `&mut self`
        // rules out a second writer, and the ranges are disjoint.
        let (first, second) = unsafe { (ring.segment_mut(first), ring.segment_mut(second)) };
        fill(first, second);

        ring.tail.store(tail + event_count as u64, Ordering::Release);
        Ok(())
    }

    /// Push a packet of `event_count` events given as little-endian raw bytes.
    ///
    /// Rejects the whole packet with [`Overflow`] if it does not fit; nothing
    /// is written in that case.
    ///
    /// # Panics
    ///
    /// Panics if `raw_bytes.len() != event_count * bytes_per_event`. A
    /// mis-framed packet is a bug in the producer, not a capacity condition.
    pub fn push(&mut self, event_count: usize, raw_bytes: &[u8]) -> Result<(), Overflow> {
        let bytes_per_event = self.ring.layout.bytes_per_event();
        assert!(
            event_count.checked_mul(bytes_per_event) == Some(raw_bytes.len()),
            "malformed packet: {} bytes for {} events of {} bytes each",
            raw_bytes.len(),
            event_count,
            bytes_per_event
        );

        self.write_with(event_count, |first, second| {
            let (head_bytes, tail_bytes) = raw_bytes.split_at(first.len() * BYTES_PER_SAMPLE);
            decode_le(first, head_bytes);
            decode_le(second, tail_bytes);
        })
    }

    /// Push a packet of `event_count` events given as decoded samples.
    ///
    /// # Panics
    ///
    /// Panics if `samples.len() != event_count * values_per_event`.
    pub fn push_samples(&mut self, event_count: usize, samples: &[u16]) -> Result<(), Overflow> {
        let values_per_event = self.ring.layout.values_per_event();
        assert!(
            event_count.checked_mul(values_per_event) == Some(samples.len()),
            "malformed packet: {} samples for {} events of {} samples each",
            samples.len(),
            event_count,
            values_per_event
        );

        self.write_with(event_count, |first, second| {
            let (a, b) = samples.split_at(first.len());
            first.copy_from_slice(a);
            second.copy_from_slice(b);
        })
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.ring.layout
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Events currently buffered
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events that can be pushed right now
    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Logical index of the next free slot
    pub fn tail(&self) -> u64 {
        self.ring.tail.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// Read side of the store. There is exactly one per store.
#[derive(Debug)]
pub struct EventConsumer {
    ring: Arc<EventRing>,
}

impl EventConsumer {
    /// Hand `[head, head + event_count)` to `read`, then publish the new head.
    fn consume<R, F>(&mut self, event_count: usize, read: F) -> Result<R, Underrun>
    where
        F: FnOnce(u64, &[u16], &[u16]) -> R,
    {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        let tail = ring.tail.load(Ordering::Acquire);
        let available = (tail - head) as usize;

        if event_count > available {
            return Err(Underrun { available });
        }

        let (first, second) = ring.layout.physical_ranges(head, event_count);
        // SAFETY: both ranges lie in [head, tail), published by the producer
        // and not rewritten until head moves past them below.
        let (first, second) = unsafe { (ring.segment(first), ring.segment(second)) };
        let out = read(head, first, second);

        if event_count > 0 {
            ring.head.store(head + event_count as u64, Ordering::Release);
        }
        Ok(out)
    }

    /// Pop the `event_count` oldest events into a new batch.
    ///
    /// Rejects with [`Underrun`] if fewer are buffered; nothing is consumed
    /// in that case.
    pub fn pop(&mut self, event_count: usize) -> Result<EventBatch, Underrun> {
        let mut batch = EventBatch::new(&self.ring.layout);
        self.pop_into(event_count, &mut batch)?;
        Ok(batch)
    }

    /// Pop into an existing batch, reusing its allocation.
    ///
    /// On [`Underrun`] the batch is left untouched.
    ///
    /// # Panics
    ///
    /// Panics if `batch` was built for a different layout.
    pub fn pop_into(&mut self, event_count: usize, batch: &mut EventBatch) -> Result<(), Underrun> {
        assert_eq!(
            (batch.channel_count(), batch.samples_per_channel()),
            (
                self.ring.layout.channel_count(),
                self.ring.layout.samples_per_channel()
            ),
            "batch built for a different layout"
        );

        self.consume(event_count, |first_event, first, second| {
            batch.refill(first_event, first, second)
        })
    }

    /// Consume the `event_count` oldest events without copying them out.
    ///
    /// `read` gets the buffered samples as two slices in temporal order; the
    /// second is empty unless the range wraps the end of storage. Each slice
    /// holds whole events. The events count as consumed once `read` returns.
    pub fn read_with<R, F>(&mut self, event_count: usize, read: F) -> Result<R, Underrun>
    where
        F: FnOnce(&[u16], &[u16]) -> R,
    {
        self.consume(event_count, |_, first, second| read(first, second))
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.ring.layout
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Events currently buffered
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Logical index of the oldest unconsumed event
    pub fn head(&self) -> u64 {
        self.ring.head.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Store
// ============================================================================

/// Fixed-capacity event ring, owned by a single thread until split.
#[derive(Debug)]
pub struct EventStore {
    producer: EventProducer,
    consumer: EventConsumer,
}

impl EventStore {
    /// Allocate a store for the given layout
    pub fn new(layout: RecordLayout) -> Self {
        let ring = Arc::new(EventRing::new(layout));

        debug!(
            capacity_events = layout.capacity_events(),
            channel_count = layout.channel_count(),
            samples_per_channel = layout.samples_per_channel(),
            storage_bytes = layout.storage_len() * BYTES_PER_SAMPLE,
            "Allocated event store"
        );

        Self {
            producer: EventProducer { ring: ring.clone() },
            consumer: EventConsumer { ring },
        }
    }

    /// Validate the acquisition constants and allocate a store
    pub fn from_config(config: &LayoutConfig) -> Result<Self, LayoutError> {
        Ok(Self::new(RecordLayout::from_config(config)?))
    }

    /// Separate the write and read sides, e.g. to move them to different tasks
    pub fn split(self) -> (EventProducer, EventConsumer) {
        (self.producer, self.consumer)
    }

    /// See [`EventProducer::push`]
    pub fn push(&mut self, event_count: usize, raw_bytes: &[u8]) -> Result<(), Overflow> {
        self.producer.push(event_count, raw_bytes)
    }

    /// See [`EventProducer::push_samples`]
    pub fn push_samples(&mut self, event_count: usize, samples: &[u16]) -> Result<(), Overflow> {
        self.producer.push_samples(event_count, samples)
    }

    /// See [`EventConsumer::pop`]
    pub fn pop(&mut self, event_count: usize) -> Result<EventBatch, Underrun> {
        self.consumer.pop(event_count)
    }

    /// See [`EventConsumer::pop_into`]
    pub fn pop_into(&mut self, event_count: usize, batch: &mut EventBatch) -> Result<(), Underrun> {
        self.consumer.pop_into(event_count, batch)
    }

    /// See [`EventConsumer::read_with`]
    pub fn read_with<R, F>(&mut self, event_count: usize, read: F) -> Result<R, Underrun>
    where
        F: FnOnce(&[u16], &[u16]) -> R,
    {
        self.consumer.read_with(event_count, read)
    }

    pub fn layout(&self) -> &RecordLayout {
        self.producer.layout()
    }

    pub fn capacity(&self) -> usize {
        self.producer.capacity()
    }

    pub fn len(&self) -> usize {
        self.producer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    pub fn free(&self) -> usize {
        self.producer.free()
    }

    pub fn head(&self) -> u64 {
        self.consumer.head()
    }

    pub fn tail(&self) -> u64 {
        self.producer.tail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_store() -> EventStore {
        // 2 channels x 4 samples, 6 events
        EventStore::new(RecordLayout::new(2, 4, 6).unwrap())
    }

    fn to_bytes(samples: &[u16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn new_store_is_empty() {
        let store = small_store();
        assert!(store.is_empty());
        assert!(!store.is_full());
        assert_eq!(store.capacity(), 6);
        assert_eq!(store.free(), 6);
        assert_eq!((store.head(), store.tail()), (0, 0));
    }

    #[test]
    fn push_bytes_decodes_little_endian() {
        let mut store = small_store();
        let samples: Vec<u16> = (0..8).map(|i| 0x0100 * i + 0xAB).collect();
        store.push(1, &to_bytes(&samples)).unwrap();

        let batch = store.pop(1).unwrap();
        assert_eq!(batch.as_flat(), samples.as_slice());
    }

    #[test]
    fn zero_length_is_noop() {
        let mut store = small_store();
        store.push(0, &[]).unwrap();
        store.push_samples(0, &[]).unwrap();
        let batch = store.pop(0).unwrap();
        assert!(batch.is_empty());
        assert_eq!((store.head(), store.tail()), (0, 0));

        // Also when full
        store.push_samples(6, &[7; 48]).unwrap();
        store.push(0, &[]).unwrap();
        assert_eq!(store.tail(), 6);
    }

    #[test]
    fn overflow_leaves_state_unchanged() {
        let mut store = small_store();
        store.push_samples(4, &[1; 32]).unwrap();

        let err = store.push_samples(3, &[2; 24]).unwrap_err();
        assert_eq!(err, Overflow { dropped: 3 });
        assert_eq!((store.head(), store.tail()), (0, 4));

        let batch = store.pop(4).unwrap();
        assert!(batch.as_flat().iter().all(|&v| v == 1));
    }

    #[test]
    fn oversized_packet_always_overflows() {
        let mut store = small_store();
        let err = store.push_samples(7, &[0; 56]).unwrap_err();
        assert_eq!(err.dropped, 7);
        assert!(store.is_empty());
    }

    #[test]
    fn underrun_reports_available() {
        let mut store = small_store();
        assert_eq!(store.pop(1).unwrap_err(), Underrun { available: 0 });

        store.push_samples(2, &[5; 16]).unwrap();
        assert_eq!(store.pop(3).unwrap_err(), Underrun { available: 2 });
        assert_eq!((store.head(), store.tail()), (0, 2));
    }

    #[test]
    #[should_panic(expected = "malformed packet")]
    fn malformed_bytes_panic() {
        let mut store = small_store();
        let _ = store.push(1, &[0u8; 15]);
    }

    #[test]
    #[should_panic(expected = "malformed packet")]
    fn malformed_zero_event_packet_panics() {
        let mut store = small_store();
        let _ = store.push(0, &[0u8; 16]);
    }

    #[test]
    #[should_panic(expected = "malformed packet")]
    fn malformed_samples_panic() {
        let mut store = small_store();
        let _ = store.push_samples(2, &[0u16; 8]);
    }

    #[test]
    #[should_panic(expected = "batch built for a different layout")]
    fn pop_into_foreign_batch_panics() {
        let mut store = small_store();
        store.push_samples(1, &[0; 8]).unwrap();
        let other = RecordLayout::new(4, 2, 6).unwrap();
        let mut batch = EventBatch::new(&other);
        let _ = store.pop_into(1, &mut batch);
    }

    #[test]
    fn read_with_exposes_wrapped_segments() {
        let mut store = small_store();
        store.push_samples(5, &[0; 40]).unwrap();
        store.pop(5).unwrap();

        let values: Vec<u16> = (100..132).collect();
        store.push_samples(4, &values).unwrap();

        let (a, b) = store
            .read_with(4, |first, second| (first.to_vec(), second.to_vec()))
            .unwrap();
        // Event 5 sits in the last slot, events 6..9 wrap to the front
        assert_eq!(a, (100..108).collect::<Vec<u16>>());
        assert_eq!(b, (108..132).collect::<Vec<u16>>());
        assert!(store.is_empty());
        assert_eq!(store.head(), 9);
    }

    #[test]
    fn read_with_underrun_does_not_call_closure() {
        let mut store = small_store();
        let mut called = false;
        let err = store.read_with(1, |_, _| called = true).unwrap_err();
        assert_eq!(err.available, 0);
        assert!(!called);
    }

    #[test]
    fn pop_into_reuses_batch() {
        let mut store = small_store();
        let mut batch = EventBatch::with_capacity(store.layout(), 6);

        store.push_samples(2, &(0..16).collect::<Vec<_>>()).unwrap();
        store.pop_into(2, &mut batch).unwrap();
        assert_eq!(batch.first_event(), 0);
        assert_eq!(batch.len(), 2);

        store.push_samples(1, &[9; 8]).unwrap();
        store.pop_into(1, &mut batch).unwrap();
        assert_eq!(batch.first_event(), 2);
        assert_eq!(batch.as_flat(), &[9; 8]);

        // Underrun leaves the previous contents alone
        assert!(store.pop_into(1, &mut batch).is_err());
        assert_eq!(batch.as_flat(), &[9; 8]);
    }

    #[test]
    fn split_handles_share_cursors() {
        let (mut producer, mut consumer) = small_store().split();
        producer.push_samples(3, &[1; 24]).unwrap();
        assert_eq!(consumer.len(), 3);
        assert_eq!(producer.free(), 3);

        consumer.pop(2).unwrap();
        assert_eq!(producer.free(), 5);
        assert_eq!(consumer.head(), 2);
        assert_eq!(producer.tail(), 3);
    }

    #[test]
    fn handles_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<EventProducer>();
        assert_send::<EventConsumer>();
        assert_send::<EventStore>();
    }
}

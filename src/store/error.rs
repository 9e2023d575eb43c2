//! Error types for the event store
//!
//! `Overflow` and `Underrun` are ordinary backpressure results: the calling
//! adapter decides whether to drop, retry or wait. Neither mutates the store.

use thiserror::Error;

/// Push rejected because the packet does not fit in the free capacity.
///
/// The whole packet is rejected; nothing was written.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("acquisition buffer full, packet of {dropped} events dropped")]
pub struct Overflow {
    /// Number of events in the rejected packet
    pub dropped: usize,
}

/// Pop rejected because fewer events are buffered than requested.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("acquisition buffer underrun, only {available} events available")]
pub struct Underrun {
    /// Number of events buffered at the time of the call
    pub available: usize,
}

/// Either store backpressure condition
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Overflow(#[from] Overflow),

    #[error(transparent)]
    Underrun(#[from] Underrun),
}

/// Invalid record layout configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    #[error("channel_count must be at least 1")]
    NoChannels,

    #[error("{name} must be finite and positive, got {value}")]
    InvalidTiming { name: &'static str, value: f64 },

    #[error("sample_rate * max_event_duration yields zero samples per channel")]
    NoSamples,

    #[error("unsupported sample width: {0} bytes (only 2-byte unsigned samples are supported)")]
    UnsupportedSampleWidth(usize),

    #[error("{0} must be at least 1")]
    Zero(&'static str),

    #[error("derived {0} overflows the address space")]
    TooLarge(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_message() {
        let err = Overflow { dropped: 42 };
        let msg = err.to_string();
        assert!(msg.contains("buffer full"));
        assert!(msg.contains("42"));
    }

    #[test]
    fn underrun_message() {
        let err = Underrun { available: 3 };
        assert!(err.to_string().contains("only 3 events"));
    }

    #[test]
    fn store_error_from() {
        let err: StoreError = Overflow { dropped: 1 }.into();
        assert_eq!(err, StoreError::Overflow(Overflow { dropped: 1 }));
        assert!(err.to_string().contains("buffer full"));

        let err: StoreError = Underrun { available: 0 }.into();
        assert!(matches!(err, StoreError::Underrun(Underrun { available: 0 })));
    }

    #[test]
    fn layout_error_messages() {
        let err = LayoutError::InvalidTiming {
            name: "sample_rate",
            value: -1.0,
        };
        assert!(err.to_string().contains("sample_rate"));
        assert!(LayoutError::UnsupportedSampleWidth(4)
            .to_string()
            .contains("4 bytes"));
    }
}

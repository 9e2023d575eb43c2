//! Infrastructure shared by the acquisition components
//!
//! Errors, metrics, CLI arguments and shutdown signalling. The event data
//! itself lives in [`crate::store`].

pub mod cli;
pub mod error;
pub mod metrics;
pub mod shutdown;

pub use cli::{AcquireArgs, CommonArgs};
pub use error::{PipelineError, PipelineResult};
pub use metrics::{AtomicCounters, CounterSnapshot, RateSnapshot};
pub use shutdown::{setup_shutdown, shutdown_channel, ShutdownReceiver, ShutdownSender};

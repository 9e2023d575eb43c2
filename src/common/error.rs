//! Error types for the acquisition pipeline
//!
//! Store backpressure (`Overflow`, `Underrun`) is not an error at this level:
//! the adapters handle it by policy. This type covers what actually stops a
//! session: bad configuration and task failures.

use thiserror::Error;

use crate::config::ConfigError;
use crate::data_source_emulator::EmulatorError;
use crate::store::LayoutError;

/// Errors that abort an acquisition session
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration file could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Record layout rejected
    #[error("Invalid record layout: {0}")]
    Layout(#[from] LayoutError),

    /// Pulse generator could not be built from the emulator settings
    #[error("Emulator error: {0}")]
    Emulator(#[from] EmulatorError),

    /// A producer or consumer task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

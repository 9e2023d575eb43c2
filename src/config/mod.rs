//! Configuration for an acquisition session
//!
//! Loaded from a TOML file with one table per component. Every table and
//! every key is optional; missing values fall back to the defaults.
//!
//! # Example
//! ```ignore
//! let config = Config::load("config.toml")?;
//! config.validate()?;
//! let store = EventStore::new(config.record_layout()?);
//! ```

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::data_sink::DataSinkConfig;
use crate::data_source_emulator::EmulatorConfig;
use crate::store::{LayoutConfig, LayoutError, RecordLayout};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid record layout: {0}")]
    Layout(#[from] LayoutError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Record layout and store capacity
    pub layout: LayoutConfig,
    /// Synthetic producer
    pub emulator: EmulatorConfig,
    /// Consumer
    pub sink: DataSinkConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Derived record layout
    pub fn record_layout(&self) -> Result<RecordLayout, ConfigError> {
        Ok(RecordLayout::from_config(&self.layout)?)
    }

    /// Check the sections against each other
    pub fn validate(&self) -> Result<(), ConfigError> {
        let layout = self.record_layout()?;

        let events = self.emulator.events_per_packet;
        let max_events = self.layout.max_events_per_packet;
        if events == 0 || events > max_events {
            return Err(ConfigError::Invalid(format!(
                "emulator.events_per_packet = {} must be in 1..={}",
                events, max_events
            )));
        }

        let chunk = self.sink.chunk_events;
        if chunk == 0 || chunk > layout.capacity_events() {
            return Err(ConfigError::Invalid(format!(
                "sink.chunk_events = {} must be in 1..={}",
                chunk,
                layout.capacity_events()
            )));
        }

        self.emulator
            .check_sigmas()
            .map_err(|e| ConfigError::Invalid(format!("emulator.{}", e)))?;

        if self.emulator.fluorophores == 0 {
            return Err(ConfigError::Invalid(
                "emulator.fluorophores must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

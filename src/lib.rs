//! spectral-acq: real-time event acquisition for a spectral flow cytometer
//!
//! A fixed-capacity circular event store sits between a packet producer
//! (the instrument, or the synthetic emulator standing in for it) and a
//! slower consumer that takes events out in chunks.

pub mod common;
pub mod config;
pub mod data_sink;
pub mod data_source_emulator;
pub mod store;

//! rocmon: a ROCm GPU telemetry collector.
//!
//! Polls `rocm-smi` on an interval, parses its output into typed samples,
//! validates them and keeps a bounded rolling history that can be queried
//! while collection is running.

pub mod collectors;
pub mod config;
pub mod controller;
pub mod device_info;
pub mod error;
pub mod history;
pub mod model;
pub mod parser;
pub mod sampler;

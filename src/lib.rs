//! tsdb-aggregate - Query-time resampling and consolidation for time-series samples
//!
//! This library turns raw, irregular observations into regular, gap-aware
//! series:
//! - K-way merge of partitioned storage reads into timestamp rows
//! - Counter and derive rate conversion with wrap handling
//! - Heartbeat-bounded linear interpolation onto a step grid
//! - Epoch-aligned bucket consolidation (AVERAGE, MIN, MAX, LAST, FIRST)
//! - Derived metrics from arithmetic expressions
//! - Last-update tracking per resource

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod results;
pub mod storage;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Tracing subscriber setup
pub mod logging;

/// Measurement query pipeline: row assembly, rate conversion, resampling,
/// consolidation, expressions and export
pub mod query;

// Re-export main types
pub use config::Config;
pub use error::{Error, Result};
pub use query::{Descriptor, QueryEngine, ResultProcessor};
pub use results::{ResultSet, Row};
pub use types::{Duration, Measurement, Resource, Sample, TimeRange, Timestamp, ValueType};

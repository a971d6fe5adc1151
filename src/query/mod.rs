//! Measurement query engine
//!
//! Turns sparse, irregular raw samples into a regular, gap-aware series at a
//! caller-chosen resolution, then derives and selects columns.
//!
//! # Architecture
//!
//! ```text
//! SampleRepository::select   one ascending cursor per partition
//!      │
//!      ▼
//! ┌──────────────┐
//! │ RowAssembler │  k-way merge, one row per timestamp
//! └──────────────┘
//!      │
//!      ▼
//! ┌──────────────┐
//! │    Rate      │  counter/derive → per-second rate
//! └──────────────┘
//!      │
//!      ▼
//! ┌──────────────┐
//! │ PrimaryData  │  step grid, heartbeat gaps, interpolation
//! └──────────────┘
//!      │
//!      ▼
//! ┌──────────────┐
//! │ Aggregation  │  AVERAGE / MIN / MAX / LAST / FIRST per bucket
//! └──────────────┘
//!      │
//!      ▼
//! ┌──────────────┐
//! │   Compute    │  expressions in declaration order
//! └──────────────┘
//!      │
//!      ▼
//! ┌──────────────┐
//! │   Export     │  exported labels only
//! └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tsdb_aggregate::query::{AggregationFunction, Descriptor, QueryEngine};
//! use tsdb_aggregate::storage::{MemorySampleRepository, SampleRepository};
//! use tsdb_aggregate::types::{Duration, Resource, Sample, Timestamp, ValueType};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = Arc::new(MemorySampleRepository::new(Duration::from_days(1))?);
//! let eth0 = Resource::new("router1:eth0");
//! repository
//!     .insert(
//!         (0..=12)
//!             .map(|i| {
//!                 Sample::new(
//!                     Timestamp::from_secs(i * 300),
//!                     eth0.clone(),
//!                     "ifInOctets",
//!                     ValueType::Counter(i as u64 * 3000),
//!                 )
//!             })
//!             .collect(),
//!     )
//!     .await?;
//!
//! let descriptor = Descriptor::new()
//!     .datasource("in", "ifInOctets", AggregationFunction::Average)
//!     .expression("bits", "in * 8")
//!     .export(["bits"]);
//!
//! let engine = QueryEngine::new(repository);
//! let results = engine
//!     .select(
//!         &eth0,
//!         Timestamp::from_secs(900),
//!         Timestamp::from_secs(2699),
//!         Duration::from_secs(900),
//!         &descriptor,
//!     )
//!     .await?;
//!
//! assert_eq!(results.len(), 2);
//! assert_eq!(results.rows()[0].get("bits").and_then(|m| m.value), Some(80.0));
//! # Ok(())
//! # }
//! ```

pub mod descriptor;
pub mod engine;
pub mod error;
pub mod expression;
pub mod operators;
pub mod processor;

// Re-export main types
pub use descriptor::{AggregationFunction, Datasource, Descriptor, Expression, DEFAULT_STEP};
pub use engine::QueryEngine;
pub use error::{QueryError, QueryErrorKind, QueryResult};
pub use expression::{CompiledExpression, Formula};
pub use operators::{
    Aggregation, Compute, Export, MergedCursor, PrimaryData, Rate, RowAssembler, RowIter,
    RowSource, RowsSource,
};
pub use processor::{ResultProcessor, ResultProcessorBuilder};

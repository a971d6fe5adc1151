//! Storage collaborators for the query engine
//!
//! The query pipeline only depends on the traits in this module:
//!
//! - [`SampleRepository`] returns raw samples as ascending per-partition
//!   cursors, which the row assembler merges
//! - [`LastUpdateRepository`] records when each resource was last written
//!
//! In-memory implementations are provided for both so the pipeline can run
//! end to end without an external store.
//!
//! # Example
//!
//! ```rust
//! use tsdb_aggregate::storage::{LastUpdate, LastUpdateRepository, MemoryLastUpdateRepository};
//! use tsdb_aggregate::types::{Duration, Resource, Timestamp};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = MemoryLastUpdateRepository::new(Duration::from_days(1))?;
//! let router = Resource::new("router1");
//! repository
//!     .insert(vec![LastUpdate::new(router.clone(), Timestamp::from_secs(100))])
//!     .await?;
//! assert_eq!(repository.select_last_update(&router).await?, Timestamp::from_secs(100));
//! # Ok(())
//! # }
//! ```

pub mod last_update;
pub mod memory;

pub use last_update::MemoryLastUpdateRepository;
pub use memory::MemorySampleRepository;

use crate::error::StorageError;
use crate::types::{Element, Resource, Sample, TimeRange, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Ascending stream of elements from one storage partition
pub type Cursor<T> = Box<dyn Iterator<Item = Result<T, StorageError>> + Send>;

/// Cursor over raw samples
pub type ElementCursor = Cursor<Sample>;

// =============================================================================
// SampleRepository Trait
// =============================================================================

/// Source of raw samples
#[async_trait]
pub trait SampleRepository: Send + Sync + 'static {
    /// Read the samples of `resource` within `range`
    ///
    /// Returns one cursor per time partition, each ascending by timestamp.
    /// Only samples whose name is in `names` are returned; an empty set
    /// returns every name.
    async fn select(
        &self,
        resource: &Resource,
        range: TimeRange,
        names: &BTreeSet<String>,
    ) -> Result<Vec<ElementCursor>, StorageError>;

    /// Write a batch of samples
    async fn insert(&self, samples: Vec<Sample>) -> Result<(), StorageError>;
}

// =============================================================================
// LastUpdateRepository Trait
// =============================================================================

/// Marker recording the latest write time of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastUpdate {
    /// Resource written
    pub resource: Resource,
    /// Time of the write
    pub timestamp: Timestamp,
}

impl LastUpdate {
    /// Element name used when a marker is placed in a row
    pub const NAME: &'static str = "last_update";

    /// Create a marker
    pub fn new(resource: Resource, timestamp: Timestamp) -> Self {
        Self {
            resource,
            timestamp,
        }
    }
}

impl Element for LastUpdate {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn resource(&self) -> &Resource {
        &self.resource
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn numeric_value(&self) -> Option<f64> {
        Some(self.timestamp.as_millis() as f64)
    }
}

/// Store of per-resource last-update markers
#[async_trait]
pub trait LastUpdateRepository: Send + Sync + 'static {
    /// Record a batch of markers
    async fn insert(&self, updates: Vec<LastUpdate>) -> Result<(), StorageError>;

    /// Most recent unexpired write time of `resource`
    ///
    /// Returns [`Timestamp::EPOCH`] when nothing is known.
    async fn select_last_update(&self, resource: &Resource) -> Result<Timestamp, StorageError>;
}

/// Write a batch of markers in the background
///
/// Must be called from within a tokio runtime. The returned handle may be
/// awaited for the outcome or dropped; failures are logged either way.
pub fn spawn_insert(
    repository: Arc<dyn LastUpdateRepository>,
    updates: Vec<LastUpdate>,
) -> JoinHandle<Result<(), StorageError>> {
    tokio::spawn(async move {
        let count = updates.len();
        let result = repository.insert(updates).await;
        if let Err(ref e) = result {
            warn!(updates = count, error = %e, "Last-update batch failed");
        }
        result
    })
}

//! In-memory sample repository
//!
//! Samples are bucketed by resource and fixed-width, epoch-aligned time
//! partitions. A read selects the partitions overlapping the requested range
//! and scans them concurrently, returning one ascending cursor per partition
//! for the row assembler to merge.

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::storage::{ElementCursor, SampleRepository};
use crate::types::{Duration, Resource, Sample, TimeRange};
use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Partition key: resource id and partition start (epoch millis)
type PartitionKey = (String, i64);

/// In-memory sample store split into fixed-width time partitions
///
/// Each partition keeps its samples sorted by `(timestamp, name)`. Writing a
/// sample whose timestamp and name already exist replaces the stored one.
pub struct MemorySampleRepository {
    partition_width: Duration,
    partitions: RwLock<BTreeMap<PartitionKey, Vec<Sample>>>,
}

impl MemorySampleRepository {
    /// Create an empty store
    pub fn new(partition_width: Duration) -> Result<Self, StorageError> {
        if !partition_width.is_positive() {
            return Err(StorageError::ConfigurationError(format!(
                "partition width must be positive, got {}",
                partition_width
            )));
        }
        Ok(Self {
            partition_width,
            partitions: RwLock::new(BTreeMap::new()),
        })
    }

    /// Create an empty store from configuration
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Self::new(config.partition_width)
    }

    /// Width of one partition
    pub fn partition_width(&self) -> Duration {
        self.partition_width
    }

    /// Number of non-empty partitions
    pub fn partition_count(&self) -> usize {
        self.partitions.read().len()
    }

    fn partition_key(&self, sample: &Sample) -> PartitionKey {
        (
            sample.resource.id().to_string(),
            sample.timestamp.align_down(self.partition_width).as_millis(),
        )
    }

    /// Read one partition into a cursor
    async fn read_partition(
        &self,
        key: PartitionKey,
        range: TimeRange,
        names: &BTreeSet<String>,
    ) -> Result<ElementCursor, StorageError> {
        let samples: Vec<Sample> = {
            let partitions = self.partitions.read();
            let partition = partitions.get(&key).ok_or_else(|| {
                StorageError::ReadFailed(format!("partition {} of '{}' vanished", key.1, key.0))
            })?;
            partition
                .iter()
                .filter(|s| range.contains(s.timestamp))
                .filter(|s| names.is_empty() || names.contains(&s.name))
                .cloned()
                .collect()
        };
        Ok(Box::new(samples.into_iter().map(Ok)))
    }
}

#[async_trait]
impl SampleRepository for MemorySampleRepository {
    async fn select(
        &self,
        resource: &Resource,
        range: TimeRange,
        names: &BTreeSet<String>,
    ) -> Result<Vec<ElementCursor>, StorageError> {
        let first = range.start.align_down(self.partition_width).as_millis();
        let last = range.end.align_down(self.partition_width).as_millis();
        let keys: Vec<PartitionKey> = self
            .partitions
            .read()
            .range((resource.id().to_string(), first)..=(resource.id().to_string(), last))
            .map(|(key, _)| key.clone())
            .collect();

        debug!(
            resource = %resource,
            partitions = keys.len(),
            start = %range.start,
            end = %range.end,
            "Reading sample partitions"
        );

        try_join_all(
            keys.into_iter()
                .map(|key| self.read_partition(key, range, names)),
        )
        .await
    }

    async fn insert(&self, samples: Vec<Sample>) -> Result<(), StorageError> {
        let count = samples.len();
        let mut partitions = self.partitions.write();
        for sample in samples {
            let partition = partitions.entry(self.partition_key(&sample)).or_default();
            let position = partition.binary_search_by(|existing| {
                (existing.timestamp, existing.name.as_str())
                    .cmp(&(sample.timestamp, sample.name.as_str()))
            });
            match position {
                Ok(index) => partition[index] = sample,
                Err(index) => partition.insert(index, sample),
            }
        }
        debug!(samples = count, "Samples written");
        Ok(())
    }
}

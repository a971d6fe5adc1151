//! Last-update tracking
//!
//! Records the most recent write time per resource. Markers optionally
//! expire a fixed TTL after they were written; an expired or missing marker
//! reads as [`Timestamp::EPOCH`].

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::metrics::LAST_UPDATE_WRITES;
use crate::storage::{LastUpdate, LastUpdateRepository};
use crate::types::{Duration, Resource, Timestamp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Marker {
    timestamp: Timestamp,
    written_at: DateTime<Utc>,
}

/// In-memory last-update store with optional expiry
///
/// Markers expire `ttl` after they were written; a TTL of zero keeps them
/// forever. Writing an older timestamp over a live marker leaves the newer
/// one in place.
pub struct MemoryLastUpdateRepository {
    ttl: Duration,
    markers: RwLock<HashMap<Resource, Marker>>,
}

impl MemoryLastUpdateRepository {
    /// Create an empty store; a negative TTL is rejected
    pub fn new(ttl: Duration) -> Result<Self, StorageError> {
        if ttl < Duration::ZERO {
            return Err(StorageError::ConfigurationError(format!(
                "last-update TTL must not be negative, got {}",
                ttl
            )));
        }
        Ok(Self {
            ttl,
            markers: RwLock::new(HashMap::new()),
        })
    }

    /// Create an empty store from configuration
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Self::new(config.last_update_ttl)
    }

    /// Marker lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, marker: &Marker, now: DateTime<Utc>) -> bool {
        self.ttl.is_positive()
            && now - marker.written_at >= chrono::Duration::milliseconds(self.ttl.as_millis())
    }
}

#[async_trait]
impl LastUpdateRepository for MemoryLastUpdateRepository {
    async fn insert(&self, updates: Vec<LastUpdate>) -> Result<(), StorageError> {
        let count = updates.len();
        let now = Utc::now();
        {
            let mut markers = self.markers.write();
            for update in updates {
                let marker = Marker {
                    timestamp: update.timestamp,
                    written_at: now,
                };
                match markers.entry(update.resource) {
                    Entry::Vacant(slot) => {
                        slot.insert(marker);
                    },
                    Entry::Occupied(mut slot) => {
                        let current = *slot.get();
                        if self.is_expired(&current, now) || marker.timestamp >= current.timestamp {
                            slot.insert(marker);
                        }
                    },
                }
            }
        }

        LAST_UPDATE_WRITES.inc_by(count as u64);
        debug!(updates = count, "Last-update markers written");
        Ok(())
    }

    async fn select_last_update(&self, resource: &Resource) -> Result<Timestamp, StorageError> {
        let now = Utc::now();
        let timestamp = self
            .markers
            .read()
            .get(resource)
            .filter(|marker| !self.is_expired(marker, now))
            .map(|marker| marker.timestamp)
            .unwrap_or(Timestamp::EPOCH);
        Ok(timestamp)
    }
}

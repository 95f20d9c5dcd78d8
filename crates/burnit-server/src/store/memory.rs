use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use super::backend::{ensure_time_left, SecretBackend};
use super::error::BackendError;
use super::model::SecretRecord;

/// In-process backend on a sharded concurrent map.
///
/// `remove` and the entry API each hold the shard lock for their whole
/// duration, which gives find-and-remove and insert-if-vacant their atomicity.
/// Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: DashMap<String, SecretRecord>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, record: &SecretRecord, deadline: Instant) -> Result<(), BackendError> {
        ensure_time_left(deadline)?;
        match self.records.entry(record.key.clone()) {
            Entry::Occupied(_) => Err(BackendError::DuplicateKey),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn find_and_remove(
        &self,
        key: &str,
        deadline: Instant,
    ) -> Result<Option<SecretRecord>, BackendError> {
        ensure_time_left(deadline)?;
        Ok(self.records.remove(key).map(|(_, record)| record))
    }

    async fn purge_expired(&self, now: i64, deadline: Instant) -> Result<usize, BackendError> {
        ensure_time_left(deadline)?;
        let mut removed = 0usize;
        self.records.retain(|_, record| {
            let keep = !record.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn count(&self, deadline: Instant) -> Result<usize, BackendError> {
        ensure_time_left(deadline)?;
        Ok(self.records.len())
    }
}

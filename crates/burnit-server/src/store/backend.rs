use async_trait::async_trait;
use tokio::time::Instant;

use super::error::BackendError;
use super::model::SecretRecord;

/// Storage interface consumed by [`SecretStore`](super::SecretStore).
///
/// Every method takes the caller's deadline. The store also bounds each call
/// with that deadline, so an implementation that ignores it cannot hang a
/// request; honouring it lets a backend skip work that can no longer matter.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Short label for logs and `/api/info`.
    fn name(&self) -> &'static str;

    /// Insert `record` as one atomic write.
    /// Must return [`BackendError::DuplicateKey`] instead of overwriting.
    async fn insert(&self, record: &SecretRecord, deadline: Instant) -> Result<(), BackendError>;

    /// Locate and delete the record under `key` as one atomic operation.
    ///
    /// Of any number of concurrent calls for the same key, at most one may
    /// return `Some`. A separate read followed by a delete does not qualify.
    async fn find_and_remove(
        &self,
        key: &str,
        deadline: Instant,
    ) -> Result<Option<SecretRecord>, BackendError>;

    /// Remove every record whose TTL has elapsed at `now`. Returns how many went.
    async fn purge_expired(&self, now: i64, deadline: Instant) -> Result<usize, BackendError>;

    /// Number of records currently held, expired or not.
    async fn count(&self, deadline: Instant) -> Result<usize, BackendError>;
}

/// Fail fast when the deadline has already passed before any work starts.
pub(crate) fn ensure_time_left(deadline: Instant) -> Result<(), BackendError> {
    if Instant::now() >= deadline {
        return Err(BackendError::unavailable("deadline exceeded"));
    }
    Ok(())
}

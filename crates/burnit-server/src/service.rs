use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{info, warn};

use crate::store::{
    ConsumedSecret, NewSecret, SecretStore, SizeCheck, SizeGuard, StoreError,
};

/// Per-operation deadline used when none is configured.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Shortest period the expiry sweep will run at.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// The surface transports talk to: size guard first, then the store, with
/// every backend call bounded by the configured timeout.
#[derive(Clone)]
pub struct SecretService {
    guard: SizeGuard,
    store: SecretStore,
    op_timeout: Duration,
}

impl SecretService {
    pub fn new(store: SecretStore, guard: SizeGuard, op_timeout: Duration) -> Self {
        Self {
            guard,
            store,
            op_timeout,
        }
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.guard.limit()
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.op_timeout
    }

    /// Store a consume-only secret and return its retrieval key.
    pub async fn create_secret(
        &self,
        payload: Vec<u8>,
        filename: Option<String>,
    ) -> Result<String, StoreError> {
        self.create(NewSecret {
            payload,
            filename,
            ttl_seconds: None,
        })
        .await
    }

    /// Store a secret that also stops being readable after `ttl`.
    pub async fn create_expiring_secret(
        &self,
        payload: Vec<u8>,
        filename: Option<String>,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        self.create(NewSecret {
            payload,
            filename,
            ttl_seconds: Some(ttl.as_secs()),
        })
        .await
    }

    pub async fn create(&self, secret: NewSecret) -> Result<String, StoreError> {
        let size = secret.payload.len();
        if let SizeCheck::Rejected { limit } = self.guard.check(size) {
            return Err(StoreError::PayloadTooLarge { size, limit });
        }
        self.store.create(secret, self.deadline()).await
    }

    /// Read the secret under `key` and burn it.
    pub async fn consume_secret(&self, key: &str) -> Result<ConsumedSecret, StoreError> {
        self.store.consume(key, self.deadline()).await
    }

    pub async fn live_count(&self) -> Result<usize, StoreError> {
        self.store.count(self.deadline()).await
    }

    /// One expiry sweep pass.
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        let removed = self.store.purge_expired(self.deadline()).await?;
        if removed > 0 {
            info!(removed, "purged expired secrets");
        }
        Ok(removed)
    }

    /// Spawn a background task that calls `purge_expired()` every `interval`.
    ///
    /// Periods below [`MIN_SWEEP_INTERVAL`] (including zero) are raised to it.
    pub fn spawn_sweep(self, interval: Duration) -> JoinHandle<()> {
        let period = if interval < MIN_SWEEP_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "sweep interval too short, using {}s",
                MIN_SWEEP_INTERVAL.as_secs()
            );
            MIN_SWEEP_INTERVAL
        } else {
            interval
        };

        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                if let Err(e) = self.purge_expired().await {
                    warn!(error = %e, "background sweep error");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::MemoryBackend;

    fn make_service(limit: usize) -> SecretService {
        let store = SecretStore::new(Arc::new(MemoryBackend::new()));
        SecretService::new(store, SizeGuard::new(limit), DEFAULT_OP_TIMEOUT)
    }

    #[tokio::test]
    async fn hello_note_scenario() {
        let svc = make_service(1000);
        let k1 = svc
            .create_secret(b"hello".to_vec(), Some("note.txt".into()))
            .await
            .unwrap();

        let got = svc.consume_secret(&k1).await.unwrap();
        assert_eq!(got.payload, b"hello");
        assert_eq!(got.filename.as_deref(), Some("note.txt"));

        assert_eq!(svc.consume_secret(&k1).await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_without_a_write() {
        let svc = make_service(1000);
        let err = svc.create_secret(vec![b'x'; 1001], None).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::PayloadTooLarge {
                size: 1001,
                limit: 1000
            }
        );
        assert_eq!(svc.live_count().await.unwrap(), 0);

        svc.create_secret(vec![b'x'; 1000], None).await.unwrap();
        assert_eq!(svc.live_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn binary_payload_round_trips_exactly() {
        let svc = make_service(1000);
        let payload: Vec<u8> = (0..=255).collect();
        let key = svc.create_secret(payload.clone(), None).await.unwrap();
        let got = svc.consume_secret(&key).await.unwrap();
        assert_eq!(got.payload, payload);
        assert_eq!(got.filename, None);
    }

    #[tokio::test]
    async fn expiring_secret_is_readable_before_ttl() {
        let svc = make_service(1000);
        let key = svc
            .create_expiring_secret(b"soon".to_vec(), None, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(svc.purge_expired().await.unwrap(), 0);
        assert_eq!(svc.consume_secret(&key).await.unwrap().payload, b"soon");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_sweep_keeps_running_and_purges() {
        let svc = make_service(1000);
        svc.create_expiring_secret(b"stale".to_vec(), None, Duration::ZERO)
            .await
            .unwrap();
        let kept = svc.create_secret(b"kept".to_vec(), None).await.unwrap();
        assert_eq!(svc.live_count().await.unwrap(), 2);

        let sweep = svc.clone().spawn_sweep(Duration::ZERO);
        time::sleep(MIN_SWEEP_INTERVAL * 3).await;

        assert!(!sweep.is_finished(), "sweep task must still be alive");
        assert_eq!(svc.live_count().await.unwrap(), 1);
        assert_eq!(svc.consume_secret(&kept).await.unwrap().payload, b"kept");
        sweep.abort();
    }
}

use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::backend::SecretBackend;
use super::error::{BackendError, StoreError};
use super::keygen::{KeyGenerator, TimeOrderedKeys};
use super::model::{ConsumedSecret, NewSecret, SecretRecord};

/// How many keys `create` mints before giving up with `KeyCollision`.
pub const MAX_KEY_ATTEMPTS: u32 = 3;

/// Longest key `consume` will send to the backend.
pub const MAX_KEY_LEN: usize = 256;

/// The create / read-and-burn engine.
///
/// Holds no records and no locks of its own: every guarantee rests on the
/// backend's atomic insert-if-vacant and find-and-remove.
#[derive(Clone)]
pub struct SecretStore {
    backend: Arc<dyn SecretBackend>,
    keys: Arc<dyn KeyGenerator>,
}

impl SecretStore {
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self::with_key_generator(backend, Arc::new(TimeOrderedKeys))
    }

    pub fn with_key_generator(
        backend: Arc<dyn SecretBackend>,
        keys: Arc<dyn KeyGenerator>,
    ) -> Self {
        Self { backend, keys }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub(crate) fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    /// Store a new secret and return its key.
    ///
    /// Size is not checked here; the caller runs the size guard first. A
    /// timeout is ambiguous (the write may have committed), so callers must not
    /// blindly retry a `StorageUnavailable` from this method.
    pub async fn create(&self, secret: NewSecret, deadline: Instant) -> Result<String, StoreError> {
        let now = Self::now();
        let expires_at = secret
            .ttl_seconds
            .map(|ttl| now.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX)));
        let mut record = SecretRecord::new(
            String::new(),
            secret.payload,
            secret.filename,
            now,
            expires_at,
        );

        for attempt in 1..=MAX_KEY_ATTEMPTS {
            record.key = self.keys.generate();
            match bounded(deadline, self.backend.insert(&record, deadline)).await {
                Ok(()) => {
                    debug!(key = %record.key, bytes = record.payload.len(), "stored secret");
                    return Ok(record.key.clone());
                }
                Err(BackendError::DuplicateKey) => {
                    warn!(attempt, "key collision, regenerating");
                }
                Err(BackendError::Unavailable(msg)) => {
                    warn!(error = %msg, "create failed");
                    return Err(StoreError::StorageUnavailable(msg));
                }
            }
        }
        Err(StoreError::KeyCollision {
            attempts: MAX_KEY_ATTEMPTS,
        })
    }

    /// Fetch and burn the secret under `key`.
    ///
    /// Exactly one of any number of concurrent callers gets the content; the
    /// rest see `NotFound`, the same answer as for a key that never existed.
    /// Retrying after a `StorageUnavailable` is always safe.
    pub async fn consume(&self, key: &str, deadline: Instant) -> Result<ConsumedSecret, StoreError> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(StoreError::NotFound);
        }

        let found = bounded(deadline, self.backend.find_and_remove(key, deadline))
            .await
            .map_err(|e| {
                warn!(error = %e, "consume failed");
                StoreError::from(e)
            })?;

        let Some(mut record) = found else {
            debug!(key = %key, "secret not found");
            return Err(StoreError::NotFound);
        };

        if record.is_expired(Self::now()) {
            debug!(key = %key, "lazy-evicted expired secret");
            return Err(StoreError::NotFound);
        }

        debug!(key = %key, "burned secret after read");
        Ok(record.take_contents())
    }

    /// Remove expired records. Returns how many were removed.
    pub async fn purge_expired(&self, deadline: Instant) -> Result<usize, StoreError> {
        let now = Self::now();
        Ok(bounded(deadline, self.backend.purge_expired(now, deadline)).await?)
    }

    /// Number of records the backend currently holds.
    pub async fn count(&self, deadline: Instant) -> Result<usize, StoreError> {
        Ok(bounded(deadline, self.backend.count(deadline)).await?)
    }
}

/// Run a backend call, turning deadline expiry into `Unavailable`.
async fn bounded<T>(
    deadline: Instant,
    call: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    timeout_at(deadline, call)
        .await
        .unwrap_or_else(|_| Err(BackendError::unavailable("deadline exceeded")))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::store::db::RedbBackend;
    use crate::store::memory::MemoryBackend;

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn secret(payload: &[u8], filename: Option<&str>) -> NewSecret {
        NewSecret {
            payload: payload.to_vec(),
            filename: filename.map(Into::into),
            ttl_seconds: None,
        }
    }

    /// Hands out a scripted sequence of keys, repeating the last one.
    struct ScriptedKeys(Mutex<VecDeque<&'static str>>);

    impl ScriptedKeys {
        fn new(keys: &[&'static str]) -> Arc<Self> {
            Arc::new(Self(Mutex::new(keys.iter().copied().collect())))
        }
    }

    impl KeyGenerator for ScriptedKeys {
        fn generate(&self) -> String {
            let mut q = self.0.lock().unwrap();
            if q.len() > 1 {
                q.pop_front().unwrap().to_owned()
            } else {
                q.front().unwrap().to_string()
            }
        }
    }

    /// Never answers.
    struct StalledBackend;

    #[async_trait]
    impl SecretBackend for StalledBackend {
        fn name(&self) -> &'static str {
            "stalled"
        }
        async fn insert(&self, _: &SecretRecord, _: Instant) -> Result<(), BackendError> {
            std::future::pending().await
        }
        async fn find_and_remove(
            &self,
            _: &str,
            _: Instant,
        ) -> Result<Option<SecretRecord>, BackendError> {
            std::future::pending().await
        }
        async fn purge_expired(&self, _: i64, _: Instant) -> Result<usize, BackendError> {
            std::future::pending().await
        }
        async fn count(&self, _: Instant) -> Result<usize, BackendError> {
            std::future::pending().await
        }
    }

    async fn exactly_one_winner(store: SecretStore) {
        let key = store
            .create(secret(b"contended", None), deadline())
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            let key = key.clone();
            tasks.push(tokio::spawn(
                async move { store.consume(&key, deadline()).await },
            ));
        }

        let mut wins = 0;
        let mut misses = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(s) => {
                    assert_eq!(s.payload, b"contended");
                    wins += 1;
                }
                Err(StoreError::NotFound) => misses += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(misses, 31);
    }

    #[tokio::test]
    async fn round_trip_then_burned() {
        let store = SecretStore::new(Arc::new(MemoryBackend::new()));
        let key = store
            .create(secret(b"hello", Some("note.txt")), deadline())
            .await
            .unwrap();

        let got = store.consume(&key, deadline()).await.unwrap();
        assert_eq!(got.payload, b"hello");
        assert_eq!(got.filename.as_deref(), Some("note.txt"));

        for _ in 0..3 {
            assert_eq!(
                store.consume(&key, deadline()).await,
                Err(StoreError::NotFound)
            );
        }
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let store = SecretStore::new(Arc::new(MemoryBackend::new()));
        store.create(secret(b"x", None), deadline()).await.unwrap();
        assert_eq!(
            store.consume("nonexistent-key", deadline()).await,
            Err(StoreError::NotFound)
        );
        assert_eq!(store.count(deadline()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn oversized_key_never_reaches_backend() {
        let store = SecretStore::new(Arc::new(StalledBackend));
        let key = "k".repeat(MAX_KEY_LEN + 1);
        assert_eq!(
            store.consume(&key, deadline()).await,
            Err(StoreError::NotFound)
        );
        assert_eq!(store.consume("", deadline()).await, Err(StoreError::NotFound));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_memory() {
        exactly_one_winner(SecretStore::new(Arc::new(MemoryBackend::new()))).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_redb() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RedbBackend::open(&dir.path().join("race.db")).unwrap();
        exactly_one_winner(SecretStore::new(Arc::new(backend))).await;
    }

    #[tokio::test]
    async fn collision_is_retried_with_fresh_key() {
        let store = SecretStore::with_key_generator(
            Arc::new(MemoryBackend::new()),
            ScriptedKeys::new(&["a", "a", "b"]),
        );
        assert_eq!(
            store.create(secret(b"one", None), deadline()).await.unwrap(),
            "a"
        );
        assert_eq!(
            store.create(secret(b"two", None), deadline()).await.unwrap(),
            "b"
        );

        // The first secret was not overwritten.
        let first = store.consume("a", deadline()).await.unwrap();
        assert_eq!(first.payload, b"one");
    }

    #[tokio::test]
    async fn persistent_collision_gives_up() {
        let store = SecretStore::with_key_generator(
            Arc::new(MemoryBackend::new()),
            ScriptedKeys::new(&["same"]),
        );
        store.create(secret(b"one", None), deadline()).await.unwrap();
        assert_eq!(
            store.create(secret(b"two", None), deadline()).await,
            Err(StoreError::KeyCollision {
                attempts: MAX_KEY_ATTEMPTS
            })
        );
        assert_eq!(store.count(deadline()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stalled_backend_hits_deadline() {
        let store = SecretStore::new(Arc::new(StalledBackend));
        let soon = || Instant::now() + Duration::from_millis(50);

        assert!(matches!(
            store.create(secret(b"x", None), soon()).await,
            Err(StoreError::StorageUnavailable(_))
        ));
        assert!(matches!(
            store.consume("some-key", soon()).await,
            Err(StoreError::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn expired_secret_reads_as_not_found_and_is_gone() {
        let backend = Arc::new(MemoryBackend::new());
        let store = SecretStore::new(backend.clone());
        let key = store
            .create(
                NewSecret {
                    payload: b"late".to_vec(),
                    filename: None,
                    ttl_seconds: Some(0),
                },
                deadline(),
            )
            .await
            .unwrap();

        assert_eq!(
            store.consume(&key, deadline()).await,
            Err(StoreError::NotFound)
        );
        assert_eq!(backend.count(deadline()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_removes_expired_only() {
        let store = SecretStore::new(Arc::new(MemoryBackend::new()));
        let live = store.create(secret(b"live", None), deadline()).await.unwrap();
        store
            .create(
                NewSecret {
                    payload: b"dead".to_vec(),
                    filename: None,
                    ttl_seconds: Some(0),
                },
                deadline(),
            )
            .await
            .unwrap();

        assert_eq!(store.purge_expired(deadline()).await.unwrap(), 1);
        assert_eq!(store.count(deadline()).await.unwrap(), 1);
        assert!(store.consume(&live, deadline()).await.is_ok());
    }
}

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backend::{ensure_time_left, SecretBackend};
use super::error::BackendError;
use super::model::SecretRecord;

const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

/// Leading byte of every stored record. Bumped if the layout ever changes.
const RECORD_FORMAT_V1: u8 = 0x01;

/// On-disk backend on an embedded redb database.
///
/// redb admits one write transaction at a time, so a check-then-insert or a
/// remove inside a single write transaction is atomic with respect to every
/// other writer.
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        let write_txn = db.begin_write()?;
        write_txn.open_table(SECRETS)?;
        write_txn.commit()?;

        info!(path = %path.display(), "opened secret database");
        Ok(Self { db: Arc::new(db) })
    }

    /// Insert unless the key is already live. Returns false on a duplicate.
    fn insert_blocking(&self, record: &SecretRecord) -> Result<bool> {
        let bytes = encode(record)?;
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(SECRETS)?;
            if table.get(record.key.as_str())?.is_some() {
                false
            } else {
                table.insert(record.key.as_str(), bytes.as_slice())?;
                true
            }
        };
        if inserted {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(inserted)
    }

    fn find_and_remove_blocking(&self, key: &str) -> Result<Option<SecretRecord>> {
        let write_txn = self.db.begin_write()?;
        let removed: Option<Vec<u8>> = {
            let mut table = write_txn.open_table(SECRETS)?;
            // Copy out so the guard's borrow of `table` ends here.
            let removed = table.remove(key)?.map(|guard| guard.value().to_vec());
            removed
        };
        let Some(bytes) = removed else {
            write_txn.abort()?;
            return Ok(None);
        };
        write_txn.commit()?;
        debug!(key = %key, "removed secret");
        // A record that fails to decode is still gone; report it as corrupt.
        decode(&bytes).map(Some)
    }

    fn purge_expired_blocking(&self, now: i64) -> Result<usize> {
        // Collect expired keys in a read pass first. A row that no longer
        // decodes can never be read back, so it goes too.
        let expired: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SECRETS)?;
            let mut keys = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                match decode(v.value()) {
                    Ok(record) if record.is_expired(now) => keys.push(k.value().to_owned()),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %format!("{e:#}"), "dropping undecodable record");
                        keys.push(k.value().to_owned());
                    }
                }
            }
            keys
        };

        if expired.is_empty() {
            return Ok(0);
        }

        // A consumer may have burned some of these in between; count only
        // what this transaction actually removed.
        let write_txn = self.db.begin_write()?;
        let mut removed = 0usize;
        {
            let mut table = write_txn.open_table(SECRETS)?;
            for key in &expired {
                if table.remove(key.as_str())?.is_some() {
                    removed += 1;
                }
            }
        }
        write_txn.commit()?;
        Ok(removed)
    }

    fn count_blocking(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SECRETS)?;
        let len = usize::try_from(table.len()?).context("record count overflow")?;
        Ok(len)
    }

    /// Run a blocking redb call off the async executor.
    async fn blocking<T, F>(&self, deadline: Instant, f: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&RedbBackend) -> Result<T> + Send + 'static,
    {
        ensure_time_left(deadline)?;
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(&this))
            .await
            .map_err(BackendError::unavailable)?
            .map_err(|e| BackendError::Unavailable(format!("{e:#}")))
    }
}

#[async_trait]
impl SecretBackend for RedbBackend {
    fn name(&self) -> &'static str {
        "redb"
    }

    async fn insert(&self, record: &SecretRecord, deadline: Instant) -> Result<(), BackendError> {
        let record = record.clone();
        let inserted = self
            .blocking(deadline, move |db| db.insert_blocking(&record))
            .await?;
        if inserted {
            Ok(())
        } else {
            Err(BackendError::DuplicateKey)
        }
    }

    async fn find_and_remove(
        &self,
        key: &str,
        deadline: Instant,
    ) -> Result<Option<SecretRecord>, BackendError> {
        let key = key.to_owned();
        self.blocking(deadline, move |db| db.find_and_remove_blocking(&key))
            .await
    }

    async fn purge_expired(&self, now: i64, deadline: Instant) -> Result<usize, BackendError> {
        self.blocking(deadline, move |db| db.purge_expired_blocking(now))
            .await
    }

    async fn count(&self, deadline: Instant) -> Result<usize, BackendError> {
        self.blocking(deadline, |db| db.count_blocking()).await
    }
}

/// Encode a record as `[RECORD_FORMAT_V1] + bincode(record)`.
fn encode(record: &SecretRecord) -> Result<Vec<u8>> {
    let body = bincode::serde::encode_to_vec(record, bincode::config::standard())
        .context("bincode encode")?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(RECORD_FORMAT_V1);
    out.extend_from_slice(&body);
    Ok(out)
}

fn decode(bytes: &[u8]) -> Result<SecretRecord> {
    match bytes.split_first() {
        None => anyhow::bail!("empty record"),
        Some((&RECORD_FORMAT_V1, body)) => {
            let (record, _) = bincode::serde::decode_from_slice(body, bincode::config::standard())
                .context("bincode decode")?;
            Ok(record)
        }
        Some((marker, _)) => anyhow::bail!("unknown record format {marker:#04x}"),
    }
}

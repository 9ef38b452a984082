//! Durable counter store persisted as a JSON snapshot file.
//!
//! Records live in memory for lookups. Every write rewrites the whole
//! snapshot through a temporary file and an atomic rename, so a crash never
//! leaves a half-written file behind. That makes each write O(N) in the
//! number of stored clients; keep the retention short for large fleets.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::record::RateLimitRecord;
use super::store::{CounterStore, MemoryStore};
use crate::error::{Result, TurnstileError};

/// Counter store that survives restarts.
pub struct FileStore {
    path: PathBuf,
    records: MemoryStore,
    /// Held across every in-memory change and the snapshot write that
    /// follows it, so no snapshot ever contains a change that is later rolled back
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open the store at `path`, loading an existing snapshot if present.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let records: Vec<RateLimitRecord> = serde_json::from_slice(&bytes).map_err(|e| {
                    TurnstileError::StoreUnavailable(format!(
                        "Corrupt counter snapshot {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                info!(path = %path.display(), records = records.len(), "Loaded counter snapshot");
                MemoryStore::from_records(records)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No counter snapshot found, starting empty");
                MemoryStore::new()
            }
            Err(e) => return Err(unavailable(&path, e)),
        };

        Ok(Self {
            path,
            records,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Caller must hold `write_lock`.
    async fn write_snapshot(&self) -> Result<()> {
        let mut snapshot = self.records.snapshot();
        snapshot.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| TurnstileError::StoreUnavailable(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| unavailable(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| unavailable(&self.path, e))?;

        debug!(path = %self.path.display(), records = snapshot.len(), "Counter snapshot written");
        Ok(())
    }
}

fn unavailable(path: &Path, e: std::io::Error) -> TurnstileError {
    TurnstileError::StoreUnavailable(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl CounterStore for FileStore {
    async fn get(&self, client_id: &str) -> Result<Option<RateLimitRecord>> {
        Ok(self.records.lookup(client_id))
    }

    async fn upsert(&self, record: RateLimitRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let client_id = record.client_id.clone();
        let previous = self.records.put(record);

        if let Err(e) = self.write_snapshot().await {
            warn!(client_id = %client_id, error = %e, "Failed to persist counter, rolling back");
            match previous {
                Some(previous) => {
                    self.records.put(previous);
                }
                None => self.records.remove(&client_id),
            }
            return Err(e);
        }
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: i64) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let removed = self.records.retain_from(cutoff);
        if removed > 0 {
            self.write_snapshot().await?;
        }
        Ok(removed)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.count())
    }
}

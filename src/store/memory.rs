//! In-memory record store with optional JSON snapshot persistence.
//!
//! With a snapshot path every write is applied to a copy, the copy is written
//! to `<path>.tmp` and renamed over `<path>`, and only then does the copy
//! replace the live state. A failed write therefore leaves both memory and
//! disk at the previous state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{QueryOrder, RecordStore, StoreError};
use crate::transfer::state::TransferStatus;
use crate::transfer::types::{NewTransfer, NotificationId, TransferId, TransferRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    /// Next id to hand out; ids are never reused, even after removal
    next_id: TransferId,
    records: BTreeMap<TransferId, TransferRecord>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            next_id: 1,
            records: BTreeMap::new(),
        }
    }
}

pub struct MemoryStore {
    state: RwLock<Snapshot>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Volatile store, records are lost when dropped
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Snapshot::default()),
            snapshot_path: None,
        }
    }

    /// Open a store backed by a JSON snapshot, loading it if it exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Snapshot>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            records = snapshot.records.len(),
            "Record store opened"
        );

        Ok(Self {
            state: RwLock::new(snapshot),
            snapshot_path: Some(path),
        })
    }

    async fn write<R>(&self, f: impl FnOnce(&mut Snapshot) -> R) -> Result<R, StoreError> {
        let mut guard = self.state.write().await;
        match &self.snapshot_path {
            None => Ok(f(&mut guard)),
            Some(path) => {
                let mut next = guard.clone();
                let out = f(&mut next);
                write_snapshot(path, &next).await?;
                *guard = next;
                Ok(out)
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let bytes = serde_json::to_vec_pretty(snapshot)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn ordered(records: impl Iterator<Item = TransferRecord>, order: QueryOrder) -> Vec<TransferRecord> {
    // BTreeMap iteration is ascending id, which is creation order.
    let mut rows: Vec<TransferRecord> = records.collect();
    if order == QueryOrder::NewestFirst {
        rows.reverse();
    }
    rows
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(&self, new: NewTransfer) -> Result<TransferId, StoreError> {
        let id = self
            .write(|s| {
                let id = s.next_id;
                s.next_id += 1;
                s.records.insert(id, new.into_record(id));
                id
            })
            .await?;
        debug!(transfer_id = id, "Record created");
        Ok(id)
    }

    async fn update_status(
        &self,
        id: TransferId,
        status: TransferStatus,
    ) -> Result<bool, StoreError> {
        self.write(|s| match s.records.get_mut(&id) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        })
        .await
    }

    async fn update_progress(&self, id: TransferId, progress: f64) -> Result<bool, StoreError> {
        self.write(|s| match s.records.get_mut(&id) {
            Some(record) => {
                record.progress = progress;
                true
            }
            None => false,
        })
        .await
    }

    async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, StoreError> {
        Ok(self.state.read().await.records.get(&id).cloned())
    }

    async fn query_all(&self, order: QueryOrder) -> Result<Vec<TransferRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(ordered(state.records.values().cloned(), order))
    }

    async fn query_live(&self) -> Result<Vec<TransferRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(ordered(
            state.records.values().filter(|r| r.is_live()).cloned(),
            QueryOrder::NewestFirst,
        ))
    }

    async fn remove(&self, id: TransferId) -> Result<bool, StoreError> {
        self.write(|s| s.records.remove(&id).is_some()).await
    }

    async fn remove_all(&self) -> Result<bool, StoreError> {
        self.write(|s| {
            let had_records = !s.records.is_empty();
            s.records.clear();
            had_records
        })
        .await
    }

    async fn remove_inactive(&self) -> Result<usize, StoreError> {
        self.write(|s| {
            let before = s.records.len();
            s.records.retain(|_, r| r.is_live());
            before - s.records.len()
        })
        .await
    }

    async fn set_notification_id(
        &self,
        id: TransferId,
        notification_id: NotificationId,
    ) -> Result<bool, StoreError> {
        self.write(|s| match s.records.get_mut(&id) {
            Some(record) => {
                record.notification_id = notification_id;
                true
            }
            None => false,
        })
        .await
    }

    async fn notification_id(&self, id: TransferId) -> Result<NotificationId, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .records
            .get(&id)
            .map(|r| r.notification_id)
            .unwrap_or(0))
    }

    async fn close(&self) -> Result<(), StoreError> {
        if let Some(path) = &self.snapshot_path {
            let state = self.state.read().await;
            write_snapshot(path, &state).await?;
            info!(path = %path.display(), "Record store closed");
        }
        Ok(())
    }
}

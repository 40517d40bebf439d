//! Record store abstraction
//!
//! The lifecycle coordinator and the list projection only talk to storage
//! through [`RecordStore`], so the storage engine can be swapped without
//! touching transition logic:
//! - [`MemoryStore`] keeps records in memory, optionally mirrored to a JSON
//!   snapshot file so records survive a restart
//! - tests wrap it to inject failures and delays

pub mod memory;
#[cfg(test)]
pub mod mock;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::transfer::state::TransferStatus;
use crate::transfer::types::{NewTransfer, NotificationId, TransferId, TransferRecord};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Ordering of bulk queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryOrder {
    /// Descending creation order (the projection's order)
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Durable storage of transfer records
///
/// Every method is atomic per key. `bool` results report whether a record
/// with the given id existed; `Err` means the write did not happen.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new record in `NotStarted` and return its fresh id.
    async fn create(&self, new: NewTransfer) -> Result<TransferId, StoreError>;

    async fn update_status(&self, id: TransferId, status: TransferStatus)
    -> Result<bool, StoreError>;

    async fn update_progress(&self, id: TransferId, progress: f64) -> Result<bool, StoreError>;

    async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, StoreError>;

    async fn query_all(&self, order: QueryOrder) -> Result<Vec<TransferRecord>, StoreError>;

    /// Records in `NotStarted` or `Started`, newest first
    async fn query_live(&self) -> Result<Vec<TransferRecord>, StoreError>;

    async fn remove(&self, id: TransferId) -> Result<bool, StoreError>;

    /// Remove every record. Returns whether anything was removed.
    async fn remove_all(&self) -> Result<bool, StoreError>;

    /// Remove every record that is not live. Returns the number removed.
    async fn remove_inactive(&self) -> Result<usize, StoreError>;

    async fn set_notification_id(
        &self,
        id: TransferId,
        notification_id: NotificationId,
    ) -> Result<bool, StoreError>;

    /// Returns 0 when no notification was published or the id is unknown.
    async fn notification_id(&self, id: TransferId) -> Result<NotificationId, StoreError>;

    /// Flush and release resources. Called once at shutdown.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

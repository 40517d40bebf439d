//! Store wrappers for tests: failure injection and controllable query latency.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{MemoryStore, QueryOrder, RecordStore, StoreError};
use crate::transfer::state::TransferStatus;
use crate::transfer::types::{NewTransfer, NotificationId, TransferId, TransferRecord};

/// Wraps a [`MemoryStore`]; writes and/or reads can be switched to fail.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("mock write failure".into()))
        } else {
            Ok(())
        }
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("mock read failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn create(&self, new: NewTransfer) -> Result<TransferId, StoreError> {
        self.check_write()?;
        self.inner.create(new).await
    }

    async fn update_status(
        &self,
        id: TransferId,
        status: TransferStatus,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        self.inner.update_status(id, status).await
    }

    async fn update_progress(&self, id: TransferId, progress: f64) -> Result<bool, StoreError> {
        self.check_write()?;
        self.inner.update_progress(id, progress).await
    }

    async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, StoreError> {
        self.check_read()?;
        self.inner.get(id).await
    }

    async fn query_all(&self, order: QueryOrder) -> Result<Vec<TransferRecord>, StoreError> {
        self.check_read()?;
        self.inner.query_all(order).await
    }

    async fn query_live(&self) -> Result<Vec<TransferRecord>, StoreError> {
        self.check_read()?;
        self.inner.query_live().await
    }

    async fn remove(&self, id: TransferId) -> Result<bool, StoreError> {
        self.check_write()?;
        self.inner.remove(id).await
    }

    async fn remove_all(&self) -> Result<bool, StoreError> {
        self.check_write()?;
        self.inner.remove_all().await
    }

    async fn remove_inactive(&self) -> Result<usize, StoreError> {
        self.check_write()?;
        self.inner.remove_inactive().await
    }

    async fn set_notification_id(
        &self,
        id: TransferId,
        notification_id: NotificationId,
    ) -> Result<bool, StoreError> {
        self.check_write()?;
        self.inner.set_notification_id(id, notification_id).await
    }

    async fn notification_id(&self, id: TransferId) -> Result<NotificationId, StoreError> {
        self.check_read()?;
        self.inner.notification_id(id).await
    }
}

/// Wraps a store; every `query_all` blocks until a permit is released.
pub struct GatedStore {
    inner: Arc<dyn RecordStore>,
    gate: Semaphore,
    queries: AtomicUsize,
}

impl GatedStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
            queries: AtomicUsize::new(0),
        }
    }

    /// Let `n` blocked (or future) queries through
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Number of `query_all` calls that have started
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for GatedStore {
    async fn create(&self, new: NewTransfer) -> Result<TransferId, StoreError> {
        self.inner.create(new).await
    }

    async fn update_status(
        &self,
        id: TransferId,
        status: TransferStatus,
    ) -> Result<bool, StoreError> {
        self.inner.update_status(id, status).await
    }

    async fn update_progress(&self, id: TransferId, progress: f64) -> Result<bool, StoreError> {
        self.inner.update_progress(id, progress).await
    }

    async fn get(&self, id: TransferId) -> Result<Option<TransferRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn query_all(&self, order: QueryOrder) -> Result<Vec<TransferRecord>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| StoreError::Unavailable("gate closed".into()))?;
        permit.forget();
        self.inner.query_all(order).await
    }

    async fn query_live(&self) -> Result<Vec<TransferRecord>, StoreError> {
        self.inner.query_live().await
    }

    async fn remove(&self, id: TransferId) -> Result<bool, StoreError> {
        self.inner.remove(id).await
    }

    async fn remove_all(&self) -> Result<bool, StoreError> {
        self.inner.remove_all().await
    }

    async fn remove_inactive(&self) -> Result<usize, StoreError> {
        self.inner.remove_inactive().await
    }

    async fn set_notification_id(
        &self,
        id: TransferId,
        notification_id: NotificationId,
    ) -> Result<bool, StoreError> {
        self.inner.set_notification_id(id, notification_id).await
    }

    async fn notification_id(&self, id: TransferId) -> Result<NotificationId, StoreError> {
        self.inner.notification_id(id).await
    }
}

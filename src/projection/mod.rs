//! Async List Projection
//!
//! An ordered, eventually consistent view of the record store for observers
//! such as a UI list. Queries run in the background; each completed query is
//! reconciled into the published rows with a range diff, so observers get
//! incremental insert/update/remove edits instead of a full reset.
//!
//! Readers always see the rows of one completed refresh: the whole edit
//! batch is applied under a single write lock.

pub mod diff;
mod worker;

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};

pub use diff::RowEdit;

use crate::store::RecordStore;
use crate::transfer::{
    DisplayMetadata, EngineEvent, EngineHandle, TransferError, TransferId, TransferKind,
    TransferRecord, TransferStatus,
};

/// Observer-facing copy of a record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionRow {
    pub id: TransferId,
    pub kind: TransferKind,
    pub status: TransferStatus,
    pub progress: f64,
    pub metadata: DisplayMetadata,
    pub created_at: DateTime<Utc>,
}

impl ProjectionRow {
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }
}

impl From<TransferRecord> for ProjectionRow {
    fn from(r: TransferRecord) -> Self {
        Self {
            id: r.id,
            kind: r.kind,
            status: r.status,
            progress: r.progress,
            metadata: r.metadata,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ProjectionStatus {
    /// No refresh requested yet
    #[default]
    Null,
    Querying,
    Finished,
    /// Last query failed; rows are from the refresh before it
    Error,
}

/// Published alongside the rows on a watch channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionState {
    pub status: ProjectionStatus,
    pub live_count: usize,
    /// Set while the last query failed
    pub error: Option<TransferError>,
    /// Completed refreshes, failed ones included
    pub refreshes: u64,
}

/// Edits of one completed refresh, in application order
#[derive(Debug, Clone)]
pub struct ProjectionUpdate {
    pub edits: Vec<RowEdit<ProjectionRow>>,
    pub live_count: usize,
}

#[derive(Debug, Default)]
pub(crate) struct PublishedView {
    rows: Vec<ProjectionRow>,
    live_count: usize,
}

#[derive(Clone)]
pub struct Projection {
    view: Arc<RwLock<PublishedView>>,
    refresh_tx: mpsc::Sender<()>,
    state_rx: watch::Receiver<ProjectionState>,
    updates: broadcast::Sender<ProjectionUpdate>,
    engine: Option<EngineHandle>,
}

impl Projection {
    /// Spawn the background tasks and request the first refresh.
    ///
    /// With `events`, every engine event requests a refresh. With `engine`,
    /// the clear commands are available.
    pub fn spawn(
        store: Arc<dyn RecordStore>,
        engine: Option<EngineHandle>,
        events: Option<broadcast::Receiver<EngineEvent>>,
    ) -> Self {
        let view = Arc::new(RwLock::new(PublishedView::default()));
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let (results_tx, results_rx) = mpsc::channel(2);
        let (state_tx, state_rx) = watch::channel(ProjectionState::default());
        let (updates, _) = broadcast::channel(64);

        tokio::spawn(worker::run_queries(store, refresh_rx, results_tx));
        tokio::spawn(
            worker::Reconciler {
                view: view.clone(),
                state_tx,
                updates: updates.clone(),
            }
            .run(results_rx),
        );
        if let Some(events) = events {
            tokio::spawn(worker::follow_events(events, refresh_tx.downgrade()));
        }

        let projection = Self {
            view,
            refresh_tx,
            state_rx,
            updates,
            engine,
        };
        projection.request_refresh();
        projection
    }

    /// Schedule a refresh without waiting for it. Returns `false` when a
    /// refresh is already owed, in which case this request is merged into it.
    pub fn request_refresh(&self) -> bool {
        worker::request(&self.refresh_tx)
    }

    pub fn rows(&self) -> Vec<ProjectionRow> {
        self.read().rows.clone()
    }

    pub fn row(&self, index: usize) -> Option<ProjectionRow> {
        self.read().rows.get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().rows.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.read().live_count
    }

    /// Rows and live count of the same refresh
    pub fn snapshot(&self) -> (Vec<ProjectionRow>, usize) {
        let view = self.read();
        (view.rows.clone(), view.live_count)
    }

    pub fn state(&self) -> ProjectionState {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ProjectionState> {
        self.state_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProjectionUpdate> {
        self.updates.subscribe()
    }

    /// Wait until at least `count` refreshes have completed.
    pub async fn refreshed(&self, count: u64) -> Result<ProjectionState, TransferError> {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(|s| s.refreshes >= count)
            .await
            .map_err(|_| TransferError::EngineStopped)?;
        Ok(state.clone())
    }

    /// Remove every finished record, then refresh.
    pub async fn clear_transfers(&self) -> Result<usize, TransferError> {
        let removed = self.engine()?.clear_all().await?;
        self.request_refresh();
        Ok(removed)
    }

    /// Remove one finished record, then refresh.
    pub async fn clear_transfer(&self, id: TransferId) -> Result<(), TransferError> {
        self.engine()?.clear_one(id).await?;
        self.request_refresh();
        Ok(())
    }

    fn engine(&self) -> Result<&EngineHandle, TransferError> {
        self.engine.as_ref().ok_or(TransferError::EngineStopped)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PublishedView> {
        self.view.read().unwrap_or_else(PoisonError::into_inner)
    }
}

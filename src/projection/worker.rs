//! Background tasks behind a [`Projection`](super::Projection)
//!
//! ```text
//! request_refresh ─▶ [cap 1] ─▶ query worker ─▶ reconciler ─▶ published view
//!                                   │                             │
//!                               RecordStore                  updates / state
//! ```
//!
//! The request channel holds at most one pending request, so a burst of
//! refresh requests during a query collapses into one follow-up query.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

use super::diff::{apply, diff};
use super::{ProjectionRow, ProjectionState, ProjectionStatus, ProjectionUpdate, PublishedView};
use crate::store::{QueryOrder, RecordStore};
use crate::transfer::{EngineEvent, TransferError};

pub(crate) enum QueryMessage {
    Started,
    Finished(Result<Vec<ProjectionRow>, TransferError>),
}

/// Ask for a refresh without waiting. `false` when one is already owed.
pub(crate) fn request(tx: &mpsc::Sender<()>) -> bool {
    match tx.try_send(()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(())) => {
            debug!("Refresh already pending");
            false
        }
        Err(mpsc::error::TrySendError::Closed(())) => false,
    }
}

/// Single-flight query loop. Ends when every requester is gone.
pub(crate) async fn run_queries(
    store: Arc<dyn RecordStore>,
    mut requests: mpsc::Receiver<()>,
    results: mpsc::Sender<QueryMessage>,
) {
    while requests.recv().await.is_some() {
        if results.send(QueryMessage::Started).await.is_err() {
            break;
        }
        let outcome = store
            .query_all(QueryOrder::NewestFirst)
            .await
            .map(|records| records.into_iter().map(ProjectionRow::from).collect())
            .map_err(|e| TransferError::ProjectionQuery(e.to_string()));
        if results.send(QueryMessage::Finished(outcome)).await.is_err() {
            break;
        }
    }
}

/// Applies query results to the published view.
pub(crate) struct Reconciler {
    pub(crate) view: Arc<RwLock<PublishedView>>,
    pub(crate) state_tx: watch::Sender<ProjectionState>,
    pub(crate) updates: broadcast::Sender<ProjectionUpdate>,
}

impl Reconciler {
    pub(crate) async fn run(self, mut results: mpsc::Receiver<QueryMessage>) {
        while let Some(message) = results.recv().await {
            match message {
                QueryMessage::Started => {
                    self.state_tx
                        .send_modify(|s| s.status = ProjectionStatus::Querying);
                }
                QueryMessage::Finished(Ok(rows)) => {
                    let update = self.publish(rows);
                    let live_count = update.live_count;
                    if !update.edits.is_empty() {
                        debug!(edits = update.edits.len(), live_count, "Projection updated");
                    }
                    let _ = self.updates.send(update);
                    self.state_tx.send_modify(|s| {
                        s.status = ProjectionStatus::Finished;
                        s.error = None;
                        s.live_count = live_count;
                        s.refreshes += 1;
                    });
                }
                QueryMessage::Finished(Err(e)) => {
                    warn!(error = %e, "Projection query failed, keeping previous rows");
                    self.state_tx.send_modify(|s| {
                        s.status = ProjectionStatus::Error;
                        s.error = Some(e);
                        s.refreshes += 1;
                    });
                }
            }
        }
    }

    /// Swap in `rows` under one write lock.
    fn publish(&self, rows: Vec<ProjectionRow>) -> ProjectionUpdate {
        let live_count = rows.iter().filter(|r| r.is_live()).count();
        let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);

        let edits = diff(&view.rows, &rows, |r| r.id);
        apply(&mut view.rows, &edits);
        debug_assert_eq!(view.rows, rows);
        view.live_count = live_count;

        ProjectionUpdate { edits, live_count }
    }
}

/// Refresh on every engine event until the projection or the engine is gone.
pub(crate) async fn follow_events(
    mut events: broadcast::Receiver<EngineEvent>,
    refresh: mpsc::WeakSender<()>,
) {
    loop {
        match events.recv().await {
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                let Some(tx) = refresh.upgrade() else {
                    break;
                };
                request(&tx);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

//! Events published to observers
//!
//! Fan-out over a `tokio::sync::broadcast` channel. Publishing never blocks
//! and never fails: with no subscribers the event is simply dropped, and a
//! slow subscriber sees `Lagged` instead of stalling the control loop.

use serde::Serialize;
use tokio::sync::broadcast;

use super::state::TransferStatus;
use super::types::TransferId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    RecordAdded { id: TransferId },
    RecordRemoved { id: TransferId },
    /// Bulk removal (clear commands, sync pruning)
    RecordsChanged,
    StatusChanged { id: TransferId, status: TransferStatus },
    ProgressChanged { id: TransferId, progress: f64 },
    /// The set of live transfers grew or shrank
    LiveCountChanged,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

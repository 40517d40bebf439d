//! Transfer Service
//!
//! Wires the record store, coordinator, control loop, watchdog and
//! projections together. The store is opened by the caller and handed in;
//! [`TransferService::shutdown`] runs the final recovery and closes it.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::EngineConfig;
use crate::projection::Projection;
use crate::store::RecordStore;
use crate::transfer::channel::command_channel;
use crate::transfer::{
    ActivityLedger, Collaborators, ControlLoop, EngineEvent, EngineHandle, EventBus,
    ExpiryWatchdog, TransferCoordinator, TransferError,
};

pub struct TransferService {
    handle: EngineHandle,
    events: EventBus,
    ledger: Arc<ActivityLedger>,
    store: Arc<dyn RecordStore>,
    control: JoinHandle<()>,
    watchdog: JoinHandle<()>,
}

impl TransferService {
    /// Recover leftovers from the previous run, then start the control loop
    /// and the watchdog.
    pub async fn start(
        store: Arc<dyn RecordStore>,
        collaborators: Collaborators,
        config: &EngineConfig,
    ) -> Result<Self, TransferError> {
        let ledger = Arc::new(ActivityLedger::new());
        let events = EventBus::new(config.event_capacity);
        let (plugin_tx, plugin_rx) = mpsc::unbounded_channel();

        let mut coordinator = TransferCoordinator::new(
            store.clone(),
            ledger.clone(),
            events.clone(),
            collaborators,
            plugin_tx,
        )
        .with_notifications(config.notifications_enabled)
        .with_expiry_threshold(config.watchdog().expiry_threshold);

        let recovered = coordinator.recover().await?;
        info!(recovered, "Startup recovery done");

        let (handle, commands) = command_channel(config.command_queue_size);
        let (expired_tx, expired_rx) = mpsc::channel(16);

        let watchdog = tokio::spawn(
            ExpiryWatchdog::new(ledger.clone(), expired_tx, config.watchdog()).run(),
        );
        let control = tokio::spawn(
            ControlLoop::new(coordinator, commands, plugin_rx, expired_rx).run(),
        );

        Ok(Self {
            handle,
            events,
            ledger,
            store,
            control,
            watchdog,
        })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// A projection that refreshes on every engine event
    pub fn projection(&self) -> Projection {
        Projection::spawn(
            self.store.clone(),
            Some(self.handle.clone()),
            Some(self.events.subscribe()),
        )
    }

    /// Transfers currently tracked by the watchdog
    pub fn tracked(&self) -> usize {
        self.ledger.len()
    }

    /// Interrupt whatever is still live, stop the tasks and close the store.
    /// Returns the number of records interrupted.
    pub async fn shutdown(self) -> Result<usize, TransferError> {
        let recovered = self.handle.shutdown().await?;
        self.watchdog.abort();
        let _ = self.control.await;
        self.store.close().await?;
        info!(recovered, "Transfer service stopped");
        Ok(recovered)
    }
}

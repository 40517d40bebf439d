//! Transfer Lifecycle
//!
//! Tracks uploads, downloads and syncs requested by client processes.
//!
//! # Architecture
//!
//! A single control loop owns the [`TransferCoordinator`] and serializes every
//! status transition. Callers talk to it through an [`EngineHandle`]; upload
//! plugins report through a [`PluginReporter`]; the [`ExpiryWatchdog`] posts
//! batches of silent transfers.
//!
//! # Status Graph
//!
//! ```text
//! NOT_STARTED → STARTED → FINISHED
//!      │           │
//!      │           ├──→ CANCELED ────┐
//!      │           └──→ INTERRUPTED ─┤
//!      └──→ CANCELED / FINISHED /    │
//!           INTERRUPTED              │
//!                   STARTED ←────────┘ (restart)
//! ```
//!
//! # Invariants
//!
//! 1. **Store first**: the status is persisted before the ledger, events or
//!    notifications change
//! 2. **Only Interrupted is automatic**: the watchdog and `recover()` never
//!    move a record anywhere else
//! 3. **Ledger tracks live records**: an entry exists only while the record
//!    is `NOT_STARTED` or `STARTED`

pub mod callback;
pub mod channel;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod ledger;
pub mod notify;
pub mod plugin;
pub mod state;
pub mod types;
pub mod watchdog;

#[cfg(test)]
mod integration_tests;

// Re-exports for convenience
pub use callback::{CallbackInvoker, HttpCallbackInvoker};
pub use channel::{ControlLoop, EngineHandle};
pub use coordinator::{Collaborators, TransferCoordinator};
pub use error::TransferError;
pub use events::{EngineEvent, EventBus};
pub use ledger::ActivityLedger;
pub use notify::{LogNotifier, Notification, Notifier};
pub use plugin::{PluginFactory, PluginRegistry, PluginReporter, TransferPlugin};
pub use state::{TransferKind, TransferStatus};
pub use types::{
    CallbackInfo, DisplayMetadata, DownloadRequest, SyncRequest, TransferId, TransferRecord,
    UploadItem, UploadRequest, UploadSource,
};
pub use watchdog::{ExpiryWatchdog, WatchdogConfig};

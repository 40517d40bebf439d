//! Transfer Engine - lifecycle tracking for uploads, downloads and syncs
//!
//! Client processes register transfers, report progress and finish them;
//! the engine persists their status, interrupts transfers whose client went
//! silent, and keeps a live, incrementally updated list for observers.
//!
//! # Modules
//!
//! - [`transfer`] - Status graph, coordinator, control loop, watchdog
//! - [`store`] - Record store trait and the snapshot-backed memory store
//! - [`projection`] - Async list projection with range diffs
//! - [`service`] - Wiring and explicit startup/shutdown
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod logging;
pub mod projection;
pub mod service;
pub mod store;
pub mod transfer;

// Convenient re-exports at crate root
pub use projection::{Projection, ProjectionRow, ProjectionState, ProjectionStatus, RowEdit};
pub use service::TransferService;
pub use store::{MemoryStore, QueryOrder, RecordStore, StoreError};
pub use transfer::{
    EngineEvent, EngineHandle, TransferError, TransferId, TransferKind, TransferRecord,
    TransferStatus,
};

/// Build identifier: crate version plus git hash
pub fn build_version() -> &'static str {
    concat!(env!("CARGO_PKG_VERSION"), "+", env!("GIT_HASH"))
}

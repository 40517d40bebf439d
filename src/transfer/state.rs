//! Transfer Status Definitions
//!
//! Status and kind IDs are stable integers so they can be stored and sent
//! over the wire without string matching.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transfer status
///
/// ```text
/// NotStarted ──▶ Started ──▶ Finished
///     │             │
///     │             ├──▶ Canceled ──┐
///     │             └──▶ Interrupted┤
///     └──▶ Canceled / Finished /    │
///          Interrupted              │
///                  Started ◀────────┘  (start / restart)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum TransferStatus {
    /// Record created, client has not reported start yet
    NotStarted = 1,
    /// Transfer in progress
    Started = 2,
    /// Canceled by the user or the owning client
    Canceled = 3,
    /// Terminal: completed successfully
    Finished = 4,
    /// Failed, expired by the watchdog, or left over from a crash
    Interrupted = 5,
}

impl TransferStatus {
    /// Live transfers are the ones tracked by the activity ledger.
    #[inline]
    pub fn is_live(&self) -> bool {
        matches!(self, TransferStatus::NotStarted | TransferStatus::Started)
    }

    /// Canceled or interrupted transfers can be started again.
    #[inline]
    pub fn is_restartable(&self) -> bool {
        matches!(self, TransferStatus::Canceled | TransferStatus::Interrupted)
    }

    /// Statuses a client may pass to `finish`.
    #[inline]
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TransferStatus::Finished | TransferStatus::Canceled | TransferStatus::Interrupted
        )
    }

    /// Whether `self -> next` is an edge of the status graph.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        match (self, next) {
            (NotStarted, Started | Canceled | Finished | Interrupted) => true,
            (Started, Canceled | Finished | Interrupted) => true,
            (Canceled | Interrupted, Started) => true,
            _ => false,
        }
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransferStatus::NotStarted),
            2 => Some(TransferStatus::Started),
            3 => Some(TransferStatus::Canceled),
            4 => Some(TransferStatus::Finished),
            5 => Some(TransferStatus::Interrupted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::NotStarted => "NOT_STARTED",
            TransferStatus::Started => "STARTED",
            TransferStatus::Canceled => "CANCELED",
            TransferStatus::Finished => "FINISHED",
            TransferStatus::Interrupted => "INTERRUPTED",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferStatus::from_id(value).ok_or(())
    }
}

/// Transfer kind, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum TransferKind {
    /// Executed by a bound plugin inside the engine
    Upload = 1,
    /// Executed by the client, tracked here
    Download = 2,
    /// Executed by the client, not retained once finished
    Sync = 3,
}

impl TransferKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransferKind::Upload),
            2 => Some(TransferKind::Download),
            3 => Some(TransferKind::Sync),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Upload => "UPLOAD",
            TransferKind::Download => "DOWNLOAD",
            TransferKind::Sync => "SYNC",
        }
    }

    /// Download and Sync are driven by an external client.
    #[inline]
    pub fn is_client_driven(&self) -> bool {
        !matches!(self, TransferKind::Upload)
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

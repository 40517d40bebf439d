//! Transfer Error Types

use thiserror::Error;

use super::state::TransferStatus;
use super::types::TransferId;
use crate::store::StoreError;

/// Transfer error types
///
/// None of these leave a record half-written: the store write either
/// happened before any side effect, or the operation was aborted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    #[error("Transfer not found: {0}")]
    NotFound(TransferId),

    #[error("Invalid transition for transfer {id}: {op} not allowed in {status}")]
    InvalidTransition {
        id: TransferId,
        op: &'static str,
        status: TransferStatus,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Transfer plugin unavailable: {0}")]
    PluginUnavailable(String),

    #[error("Client callback unreachable: {0}")]
    CallbackUnreachable(String),

    #[error("Projection query failed: {0}")]
    ProjectionQuery(String),

    #[error("Transfer engine is not running")]
    EngineStopped,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TransferError {
    /// Stable error code for clients
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::NotFound(_) => "TRANSFER_NOT_FOUND",
            TransferError::InvalidTransition { .. } => "INVALID_TRANSITION",
            TransferError::InvalidArgument(_) => "INVALID_ARGUMENT",
            TransferError::Store(_) => "STORE_FAILURE",
            TransferError::PluginUnavailable(_) => "PLUGIN_UNAVAILABLE",
            TransferError::CallbackUnreachable(_) => "CALLBACK_UNREACHABLE",
            TransferError::ProjectionQuery(_) => "PROJECTION_QUERY_FAILURE",
            TransferError::EngineStopped => "ENGINE_STOPPED",
            TransferError::Config(_) => "CONFIG_ERROR",
        }
    }

    pub(crate) fn invalid(id: TransferId, op: &'static str, status: TransferStatus) -> Self {
        TransferError::InvalidTransition { id, op, status }
    }
}

impl From<StoreError> for TransferError {
    fn from(e: StoreError) -> Self {
        TransferError::Store(e.to_string())
    }
}

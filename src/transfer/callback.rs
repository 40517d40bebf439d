//! Out-of-band client callbacks
//!
//! Downloads and syncs are executed by their client. To cancel or restart
//! one, the engine calls a method at the address the client supplied when
//! it created the transfer. Failures are reported to the caller, which only
//! logs them: a callback never changes stored status.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::error::TransferError;
use super::types::{CallbackInfo, TransferId};

#[async_trait]
pub trait CallbackInvoker: Send + Sync {
    async fn invoke(
        &self,
        callback: &CallbackInfo,
        method: &str,
        id: TransferId,
    ) -> Result<(), TransferError>;
}

#[derive(Serialize)]
struct CallbackBody {
    transfer_id: TransferId,
}

/// Invokes `POST <endpoint>/<method>` with `{"transfer_id": id}`.
pub struct HttpCallbackInvoker {
    client: reqwest::Client,
}

impl HttpCallbackInvoker {
    pub fn new(timeout: Duration) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransferError::Config(format!("callback client: {e}")))?;
        Ok(Self { client })
    }

    fn url(callback: &CallbackInfo, method: &str) -> String {
        format!("{}/{}", callback.endpoint.trim_end_matches('/'), method)
    }
}

#[async_trait]
impl CallbackInvoker for HttpCallbackInvoker {
    async fn invoke(
        &self,
        callback: &CallbackInfo,
        method: &str,
        id: TransferId,
    ) -> Result<(), TransferError> {
        let url = Self::url(callback, method);
        debug!(transfer_id = id, url = %url, "Invoking client callback");

        let response = self
            .client
            .post(&url)
            .json(&CallbackBody { transfer_id: id })
            .send()
            .await
            .map_err(|e| TransferError::CallbackUnreachable(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(TransferError::CallbackUnreachable(format!(
                "{url}: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}


#[cfg(test)]
pub use mock::RecordingCallbacks;

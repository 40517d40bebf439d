//! Transfer Core Types
//!
//! Records as stored by the record store, plus the request types the
//! engine accepts for creating new transfers.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{TransferKind, TransferStatus};

/// Transfer ID, assigned by the record store on creation
pub type TransferId = u64;

/// Handle of a published user notification (0 = none)
pub type NotificationId = u32;

/// Descriptive record fields. Never interpreted by the lifecycle logic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    pub display_name: String,
    /// File or resource name shown when the URL has no usable last segment
    pub resource_name: String,
    pub url: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: u64,
    pub application_icon: Option<String>,
    pub service_icon: Option<String>,
    pub thumbnail_icon: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub account_id: Option<i64>,
    pub cancel_supported: bool,
    pub restart_supported: bool,
}

impl DisplayMetadata {
    /// Name used in notifications: last URL segment, else the resource name.
    pub fn file_name(&self) -> String {
        self.url
            .as_deref()
            .and_then(|url| url.rsplit('/').next())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.resource_name.clone())
    }
}

/// Out-of-band address of the client owning a Download or Sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackInfo {
    /// Base address of the client, e.g. `http://127.0.0.1:7001/transfers`
    pub endpoint: String,
    pub cancel_method: Option<String>,
    pub restart_method: Option<String>,
}

/// Callback methods the engine can invoke on a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackMethod {
    Cancel,
    Restart,
}

impl CallbackMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackMethod::Cancel => "cancel",
            CallbackMethod::Restart => "restart",
        }
    }
}

impl CallbackInfo {
    pub fn new(
        endpoint: impl Into<String>,
        cancel_method: Option<String>,
        restart_method: Option<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            cancel_method: cancel_method.filter(|m| !m.is_empty()),
            restart_method: restart_method.filter(|m| !m.is_empty()),
        }
    }

    /// Configured method name, `None` when the client did not supply one.
    pub fn method(&self, method: CallbackMethod) -> Option<&str> {
        match method {
            CallbackMethod::Cancel => self.cancel_method.as_deref(),
            CallbackMethod::Restart => self.restart_method.as_deref(),
        }
    }
}

/// What an upload plugin should send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UploadSource {
    /// A local file
    File { path: String },
    /// Inline content, e.g. a vCard, that was never written to disk
    Content {
        name: String,
        mime_type: Option<String>,
        data: Vec<u8>,
    },
}

/// Upload parameters kept with the record so a restart can rebind a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadItem {
    pub plugin_id: String,
    pub source: UploadSource,
    pub mime_type: Option<String>,
    pub metadata_stripped: bool,
    pub scale_percent: Option<f64>,
}

/// A persisted transfer record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub kind: TransferKind,
    pub status: TransferStatus,
    /// Fraction in `[0.0, 1.0]`
    pub progress: f64,
    pub metadata: DisplayMetadata,
    pub callback: Option<CallbackInfo>,
    pub upload: Option<UploadItem>,
    pub notification_id: NotificationId,
    pub created_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Key grouping syncs of the same source for failure pruning
    pub fn sync_source(&self) -> Option<&str> {
        match self.kind {
            TransferKind::Sync => Some(self.metadata.display_name.as_str()),
            _ => None,
        }
    }
}

/// Fields supplied when a record is created; the store fills in the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransfer {
    pub kind: TransferKind,
    pub metadata: DisplayMetadata,
    pub callback: Option<CallbackInfo>,
    pub upload: Option<UploadItem>,
}

impl NewTransfer {
    /// Build the initial record once the store has chosen an id.
    pub fn into_record(self, id: TransferId) -> TransferRecord {
        TransferRecord {
            id,
            kind: self.kind,
            status: TransferStatus::NotStarted,
            progress: 0.0,
            metadata: self.metadata,
            callback: self.callback,
            upload: self.upload,
            notification_id: 0,
            created_at: Utc::now(),
        }
    }
}

/// Client request: track a download
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub display_name: String,
    pub application_icon: Option<String>,
    pub service_icon: Option<String>,
    pub file_path: String,
    pub mime_type: Option<String>,
    pub expected_file_size: u64,
    pub callback: Option<CallbackInfo>,
}

impl DownloadRequest {
    pub fn into_new_transfer(self) -> NewTransfer {
        let resource_name = Path::new(&self.file_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let url = if self.file_path.is_empty() {
            None
        } else if self.file_path.starts_with('/') {
            Some(format!("file://{}", self.file_path))
        } else {
            Some(self.file_path.clone())
        };

        NewTransfer {
            kind: TransferKind::Download,
            metadata: DisplayMetadata {
                display_name: self.display_name,
                resource_name,
                url,
                mime_type: self.mime_type,
                file_size: self.expected_file_size,
                application_icon: self.application_icon,
                service_icon: self.service_icon,
                cancel_supported: has_method(&self.callback, CallbackMethod::Cancel),
                restart_supported: has_method(&self.callback, CallbackMethod::Restart),
                ..Default::default()
            },
            callback: self.callback,
            upload: None,
        }
    }
}

/// Client request: track a sync job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub display_name: String,
    pub application_icon: Option<String>,
    pub service_icon: Option<String>,
    pub callback: Option<CallbackInfo>,
}

impl SyncRequest {
    pub fn into_new_transfer(self) -> NewTransfer {
        NewTransfer {
            kind: TransferKind::Sync,
            metadata: DisplayMetadata {
                display_name: self.display_name,
                application_icon: self.application_icon,
                service_icon: self.service_icon,
                cancel_supported: has_method(&self.callback, CallbackMethod::Cancel),
                restart_supported: has_method(&self.callback, CallbackMethod::Restart),
                ..Default::default()
            },
            callback: self.callback,
            upload: None,
        }
    }
}

/// Client request: upload through a named plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub plugin_id: String,
    pub source: UploadSource,
    pub mime_type: Option<String>,
    pub metadata_stripped: bool,
    pub title: Option<String>,
    pub description: Option<String>,
    pub account_id: Option<i64>,
    pub scale_percent: Option<f64>,
}

impl UploadRequest {
    pub fn file(plugin_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            source: UploadSource::File { path: path.into() },
            mime_type: None,
            metadata_stripped: false,
            title: None,
            description: None,
            account_id: None,
            scale_percent: None,
        }
    }

    /// Metadata that does not depend on the plugin instance
    pub(crate) fn base_metadata(&self) -> DisplayMetadata {
        let (resource_name, url, file_size, mime_type) = match &self.source {
            UploadSource::File { path } => {
                let name = Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
                (name, Some(path.clone()), size, self.mime_type.clone())
            }
            UploadSource::Content {
                name,
                mime_type,
                data,
            } => (
                name.clone(),
                None,
                data.len() as u64,
                mime_type.clone().or_else(|| self.mime_type.clone()),
            ),
        };

        DisplayMetadata {
            resource_name,
            url,
            mime_type,
            file_size,
            title: self.title.clone(),
            description: self.description.clone(),
            account_id: self.account_id,
            ..Default::default()
        }
    }

    pub(crate) fn upload_item(&self) -> UploadItem {
        UploadItem {
            plugin_id: self.plugin_id.clone(),
            source: self.source.clone(),
            mime_type: self.mime_type.clone(),
            metadata_stripped: self.metadata_stripped,
            scale_percent: self.scale_percent,
        }
    }
}

fn has_method(callback: &Option<CallbackInfo>, method: CallbackMethod) -> bool {
    callback
        .as_ref()
        .and_then(|cb| cb.method(method))
        .is_some()
}

//! User notifications for transfer status
//!
//! [`plan`] decides what a status change should look like to the user;
//! a [`Notifier`] publishes it. Each transfer owns at most one notification,
//! whose id is kept in the record so later updates replace it in place.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use super::state::{TransferKind, TransferStatus};
use super::types::{NotificationId, TransferId};

pub const CATEGORY_TRANSFER: &str = "transfer";
pub const CATEGORY_COMPLETE: &str = "transfer.complete";
pub const CATEGORY_ERROR: &str = "transfer.error";

const APP_NAME: &str = "Transfers";
const APP_ICON: &str = "icon-lock-transfer";
/// Constant so repeated progress updates don't churn the action list
const CANCEL_ACTION: &str = "transferengine_cancel_transfer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Urgency {
    Low,
    Normal,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NotificationAction {
    /// Cancel the transfer through the engine
    Cancel {
        name: &'static str,
        transfer_id: TransferId,
    },
    /// Open a downloaded file
    OpenFile { url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Existing notification to replace, 0 for a new one
    pub replaces_id: NotificationId,
    pub category: &'static str,
    pub app_name: &'static str,
    pub app_icon: &'static str,
    pub summary: String,
    pub body: &'static str,
    pub urgency: Urgency,
    pub progress: Option<f64>,
    pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationPlan {
    Publish(Notification),
    /// Withdraw the existing notification and forget its id
    Close(NotificationId),
    Nothing,
}

/// Inputs for one notification decision
#[derive(Debug, Clone)]
pub struct NotificationRequest<'a> {
    pub id: TransferId,
    pub kind: TransferKind,
    pub status: TransferStatus,
    pub progress: f64,
    pub file_name: &'a str,
    pub existing: NotificationId,
    pub can_cancel: bool,
    /// Local file of a finished download
    pub local_file: Option<&'a str>,
}

/// Banner rules: finished uploads/downloads, failed uploads/downloads and
/// ongoing uploads/downloads are shown; syncs never are.
pub fn plan(req: &NotificationRequest<'_>) -> NotificationPlan {
    let (category, body, urgency) = match (req.status, req.kind) {
        (_, TransferKind::Sync) => {
            return NotificationPlan::Nothing;
        }
        (TransferStatus::Finished, TransferKind::Upload) => {
            (CATEGORY_COMPLETE, "File uploaded", Urgency::Normal)
        }
        (TransferStatus::Finished, TransferKind::Download) => {
            (CATEGORY_COMPLETE, "File downloaded", Urgency::Normal)
        }
        (TransferStatus::Interrupted, TransferKind::Upload) => {
            (CATEGORY_ERROR, "Upload failed", Urgency::Critical)
        }
        (TransferStatus::Interrupted, TransferKind::Download) => {
            (CATEGORY_ERROR, "Download failed", Urgency::Critical)
        }
        (TransferStatus::Started, TransferKind::Upload) => {
            (CATEGORY_TRANSFER, "File uploading", Urgency::Low)
        }
        (TransferStatus::Started, TransferKind::Download) => {
            (CATEGORY_TRANSFER, "File downloading", Urgency::Low)
        }
        (TransferStatus::Canceled, _) if req.existing > 0 => {
            return NotificationPlan::Close(req.existing);
        }
        _ => return NotificationPlan::Nothing,
    };

    let mut actions = Vec::new();
    let mut progress = None;

    match req.status {
        TransferStatus::Started => {
            if req.progress > 0.0 {
                progress = Some(req.progress);
            }
            if req.can_cancel {
                actions.push(NotificationAction::Cancel {
                    name: CANCEL_ACTION,
                    transfer_id: req.id,
                });
            }
        }
        TransferStatus::Finished => {
            if let Some(url) = req.local_file {
                actions.push(NotificationAction::OpenFile {
                    url: url.to_string(),
                });
            }
        }
        _ => {}
    }

    NotificationPlan::Publish(Notification {
        replaces_id: req.existing,
        category,
        app_name: APP_NAME,
        app_icon: APP_ICON,
        summary: req.file_name.to_string(),
        body,
        urgency,
        progress,
        actions,
    })
}

/// Presentation layer
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish (or replace) a notification and return its id.
    async fn publish(&self, notification: &Notification) -> NotificationId;

    async fn close(&self, id: NotificationId);
}

/// Writes notifications to the log. Used when no desktop integration exists.
#[derive(Default)]
pub struct LogNotifier {
    next_id: AtomicU32,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, notification: &Notification) -> NotificationId {
        let id = if notification.replaces_id > 0 {
            notification.replaces_id
        } else {
            self.next_id.fetch_add(1, Ordering::Relaxed) + 1
        };
        info!(
            notification_id = id,
            category = notification.category,
            summary = %notification.summary,
            body = notification.body,
            progress = ?notification.progress,
            "Notification"
        );
        id
    }

    async fn close(&self, id: NotificationId) {
        info!(notification_id = id, "Notification closed");
    }
}


#[cfg(test)]
pub use mock::RecordingNotifier;

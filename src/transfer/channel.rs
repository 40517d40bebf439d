//! Control channel
//!
//! Every caller reaches the coordinator through [`EngineHandle`], which
//! sends a command with a oneshot responder to the control loop. The loop
//! also drains plugin signals and watchdog batches, so all transitions are
//! serialized on one task.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::coordinator::TransferCoordinator;
use super::error::TransferError;
use super::plugin::PluginEvent;
use super::state::TransferStatus;
use super::types::{DownloadRequest, SyncRequest, TransferId, TransferRecord, UploadRequest};

// ============================================================================
// Commands
// ============================================================================

type Responder<T> = oneshot::Sender<Result<T, TransferError>>;

pub(crate) enum Command {
    CreateDownload(DownloadRequest, Responder<TransferId>),
    CreateSync(SyncRequest, Responder<TransferId>),
    Upload(UploadRequest, Responder<TransferId>),
    Start(TransferId, Responder<()>),
    Restart(TransferId, Responder<()>),
    Finish {
        id: TransferId,
        status: TransferStatus,
        reason: Option<String>,
        reply: Responder<()>,
    },
    Progress {
        id: TransferId,
        progress: f64,
        reply: Responder<()>,
    },
    Cancel(TransferId, Responder<()>),
    Get(TransferId, Responder<TransferRecord>),
    ListAll(Responder<Vec<TransferRecord>>),
    ListLive(Responder<Vec<TransferRecord>>),
    ClearAll(Responder<usize>),
    ClearOne(TransferId, Responder<()>),
    SetNotifications(bool, Responder<()>),
    NotificationsEnabled(Responder<bool>),
    HasActivity(Responder<bool>),
    Recover(Responder<usize>),
    /// Final recovery, then the loop exits
    Shutdown(Responder<usize>),
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable client of the control loop
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Responder<T>) -> Command,
    ) -> Result<T, TransferError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| TransferError::EngineStopped)?;
        rx.await.map_err(|_| TransferError::EngineStopped)?
    }

    pub async fn create_download(&self, req: DownloadRequest) -> Result<TransferId, TransferError> {
        self.request(|reply| Command::CreateDownload(req, reply)).await
    }

    pub async fn create_sync(&self, req: SyncRequest) -> Result<TransferId, TransferError> {
        self.request(|reply| Command::CreateSync(req, reply)).await
    }

    pub async fn upload(&self, req: UploadRequest) -> Result<TransferId, TransferError> {
        self.request(|reply| Command::Upload(req, reply)).await
    }

    pub async fn start(&self, id: TransferId) -> Result<(), TransferError> {
        self.request(|reply| Command::Start(id, reply)).await
    }

    pub async fn restart(&self, id: TransferId) -> Result<(), TransferError> {
        self.request(|reply| Command::Restart(id, reply)).await
    }

    pub async fn finish(
        &self,
        id: TransferId,
        status: TransferStatus,
        reason: Option<String>,
    ) -> Result<(), TransferError> {
        self.request(|reply| Command::Finish {
            id,
            status,
            reason,
            reply,
        })
        .await
    }

    pub async fn update_progress(&self, id: TransferId, progress: f64) -> Result<(), TransferError> {
        self.request(|reply| Command::Progress {
            id,
            progress,
            reply,
        })
        .await
    }

    pub async fn cancel(&self, id: TransferId) -> Result<(), TransferError> {
        self.request(|reply| Command::Cancel(id, reply)).await
    }

    pub async fn get(&self, id: TransferId) -> Result<TransferRecord, TransferError> {
        self.request(|reply| Command::Get(id, reply)).await
    }

    pub async fn list_all(&self) -> Result<Vec<TransferRecord>, TransferError> {
        self.request(Command::ListAll).await
    }

    pub async fn list_live(&self) -> Result<Vec<TransferRecord>, TransferError> {
        self.request(Command::ListLive).await
    }

    pub async fn clear_all(&self) -> Result<usize, TransferError> {
        self.request(Command::ClearAll).await
    }

    pub async fn clear_one(&self, id: TransferId) -> Result<(), TransferError> {
        self.request(|reply| Command::ClearOne(id, reply)).await
    }

    pub async fn set_notifications_enabled(&self, enabled: bool) -> Result<(), TransferError> {
        self.request(|reply| Command::SetNotifications(enabled, reply))
            .await
    }

    pub async fn notifications_enabled(&self) -> Result<bool, TransferError> {
        self.request(Command::NotificationsEnabled).await
    }

    pub async fn has_activity(&self) -> Result<bool, TransferError> {
        self.request(Command::HasActivity).await
    }

    pub async fn recover(&self) -> Result<usize, TransferError> {
        self.request(Command::Recover).await
    }

    pub(crate) async fn shutdown(&self) -> Result<usize, TransferError> {
        self.request(Command::Shutdown).await
    }
}

// ============================================================================
// Control loop
// ============================================================================

/// Owns the coordinator and serializes everything that reaches it.
pub struct ControlLoop {
    coordinator: TransferCoordinator,
    commands: mpsc::Receiver<Command>,
    plugin_events: mpsc::UnboundedReceiver<PluginEvent>,
    expired: mpsc::Receiver<Vec<TransferId>>,
}

/// Create the command channel pair
pub(crate) fn command_channel(buffer: usize) -> (EngineHandle, mpsc::Receiver<Command>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (EngineHandle { tx }, rx)
}

impl ControlLoop {
    pub(crate) fn new(
        coordinator: TransferCoordinator,
        commands: mpsc::Receiver<Command>,
        plugin_events: mpsc::UnboundedReceiver<PluginEvent>,
        expired: mpsc::Receiver<Vec<TransferId>>,
    ) -> Self {
        Self {
            coordinator,
            commands,
            plugin_events,
            expired,
        }
    }

    /// Run until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        info!("Control loop started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        let _ = reply.send(self.coordinator.recover().await);
                        break;
                    }
                    Some(command) => self.dispatch(command).await,
                    None => {
                        debug!("All engine handles dropped");
                        break;
                    }
                },
                Some(event) = self.plugin_events.recv() => {
                    self.coordinator.handle_plugin_event(event).await;
                }
                Some(ids) = self.expired.recv() => {
                    self.coordinator.expire(ids).await;
                }
            }
        }
        info!("Control loop stopped");
    }

    async fn dispatch(&mut self, command: Command) {
        let c = &mut self.coordinator;
        // A dropped responder means the caller gave up waiting.
        match command {
            Command::CreateDownload(req, reply) => {
                let _ = reply.send(c.create_download(req).await);
            }
            Command::CreateSync(req, reply) => {
                let _ = reply.send(c.create_sync(req).await);
            }
            Command::Upload(req, reply) => {
                let _ = reply.send(c.upload(req).await);
            }
            Command::Start(id, reply) => {
                let _ = reply.send(c.start(id).await);
            }
            Command::Restart(id, reply) => {
                let _ = reply.send(c.restart(id).await);
            }
            Command::Finish {
                id,
                status,
                reason,
                reply,
            } => {
                let _ = reply.send(c.finish(id, status, reason).await);
            }
            Command::Progress {
                id,
                progress,
                reply,
            } => {
                let _ = reply.send(c.update_progress(id, progress).await);
            }
            Command::Cancel(id, reply) => {
                let _ = reply.send(c.cancel(id).await);
            }
            Command::Get(id, reply) => {
                let _ = reply.send(c.get(id).await);
            }
            Command::ListAll(reply) => {
                let _ = reply.send(c.list_all().await);
            }
            Command::ListLive(reply) => {
                let _ = reply.send(c.list_live().await);
            }
            Command::ClearAll(reply) => {
                let _ = reply.send(c.clear_all().await);
            }
            Command::ClearOne(id, reply) => {
                let _ = reply.send(c.clear_one(id).await);
            }
            Command::SetNotifications(enabled, reply) => {
                c.set_notifications_enabled(enabled);
                let _ = reply.send(Ok(()));
            }
            Command::NotificationsEnabled(reply) => {
                let _ = reply.send(Ok(c.notifications_enabled()));
            }
            Command::HasActivity(reply) => {
                let _ = reply.send(Ok(c.has_activity()));
            }
            Command::Recover(reply) => {
                let _ = reply.send(c.recover().await);
            }
            Command::Shutdown(reply) => {
                // Handled in run(); kept exhaustive.
                let _ = reply.send(c.recover().await);
            }
        }
    }
}

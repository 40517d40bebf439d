//! Transfer Coordinator
//!
//! Owns every status transition. It is driven by exactly one task (the
//! control loop in [`super::channel`]), so methods take `&mut self` and no
//! two transitions ever run concurrently.
//!
//! Every mutating operation writes the store first. If that write fails the
//! operation is aborted before the ledger, events or notifications are
//! touched, so the persisted status stays authoritative.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::callback::CallbackInvoker;
use super::error::TransferError;
use super::events::{EngineEvent, EventBus};
use super::ledger::ActivityLedger;
use super::notify::{NotificationPlan, NotificationRequest, Notifier, plan};
use super::plugin::{PluginEvent, PluginRegistry, PluginReporter, PluginSignal, TransferPlugin};
use super::state::{TransferKind, TransferStatus};
use super::types::{
    CallbackInfo, CallbackMethod, DownloadRequest, NewTransfer, SyncRequest, TransferId, TransferRecord,
    UploadItem, UploadRequest,
};
use super::watchdog::WatchdogConfig;
use crate::store::{QueryOrder, RecordStore};

/// Capabilities the coordinator calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub plugins: PluginRegistry,
    pub callbacks: Arc<dyn CallbackInvoker>,
    pub notifier: Arc<dyn Notifier>,
}

/// A live plugin instance bound to one Upload record
struct Binding {
    generation: u64,
    plugin: Box<dyn TransferPlugin>,
}

/// Percentage used to suppress duplicate progress notifications
fn percent(progress: f64) -> i64 {
    (progress * 100.0).floor() as i64
}

pub struct TransferCoordinator {
    store: Arc<dyn RecordStore>,
    ledger: Arc<ActivityLedger>,
    events: EventBus,
    collaborators: Collaborators,
    plugin_tx: mpsc::UnboundedSender<PluginEvent>,
    bindings: HashMap<TransferId, Binding>,
    next_generation: u64,
    kinds: HashMap<TransferId, TransferKind>,
    notifications_enabled: bool,
    expiry_threshold: Duration,
}

impl TransferCoordinator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        ledger: Arc<ActivityLedger>,
        events: EventBus,
        collaborators: Collaborators,
        plugin_tx: mpsc::UnboundedSender<PluginEvent>,
    ) -> Self {
        Self {
            store,
            ledger,
            events,
            collaborators,
            plugin_tx,
            bindings: HashMap::new(),
            next_generation: 0,
            kinds: HashMap::new(),
            notifications_enabled: true,
            expiry_threshold: WatchdogConfig::default().expiry_threshold,
        }
    }

    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications_enabled = enabled;
        self
    }

    /// Silence required before [`expire`](Self::expire) interrupts a transfer.
    /// Must match the watchdog's threshold.
    pub fn with_expiry_threshold(mut self, threshold: Duration) -> Self {
        self.expiry_threshold = threshold;
        self
    }

    // ==================== Creation ====================

    pub async fn create_download(&mut self, req: DownloadRequest) -> Result<TransferId, TransferError> {
        self.create(req.into_new_transfer()).await
    }

    pub async fn create_sync(&mut self, req: SyncRequest) -> Result<TransferId, TransferError> {
        self.create(req.into_new_transfer()).await
    }

    async fn create(&mut self, new: NewTransfer) -> Result<TransferId, TransferError> {
        let kind = new.kind;
        let id = self.store.create(new).await?;
        self.kinds.insert(id, kind);
        self.ledger.touch(id);

        info!(transfer_id = id, kind = %kind, "Transfer created");
        self.events.publish(EngineEvent::RecordAdded { id });
        self.events.publish(EngineEvent::StatusChanged {
            id,
            status: TransferStatus::NotStarted,
        });
        self.events.publish(EngineEvent::LiveCountChanged);
        Ok(id)
    }

    /// Create an Upload record and bind a plugin to it.
    ///
    /// The plugin is loaded before anything is persisted: an unknown plugin
    /// id leaves no record behind. The record moves to `Started` once the
    /// plugin acknowledges.
    pub async fn upload(&mut self, req: UploadRequest) -> Result<TransferId, TransferError> {
        let plugin = self.collaborators.plugins.load(&req.plugin_id)?;

        let mut metadata = req.base_metadata();
        metadata.display_name = plugin.display_name();
        metadata.service_icon = plugin.service_icon();
        metadata.cancel_supported = plugin.cancel_enabled();
        metadata.restart_supported = plugin.restart_enabled();

        let item = req.upload_item();
        let id = self
            .create(NewTransfer {
                kind: TransferKind::Upload,
                metadata,
                callback: None,
                upload: Some(item.clone()),
            })
            .await?;

        self.bind(id, plugin, item).await;
        Ok(id)
    }

    async fn bind(&mut self, id: TransferId, plugin: Box<dyn TransferPlugin>, item: UploadItem) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let reporter = PluginReporter::new(id, generation, self.plugin_tx.clone());

        // Signals sent from inside start() are queued behind this call.
        plugin.start(item, reporter).await;
        if let Some(old) = self.bindings.insert(id, Binding { generation, plugin }) {
            debug!(transfer_id = id, generation = old.generation, "Replaced plugin binding");
        }
    }

    fn unbind(&mut self, id: TransferId) -> Option<Box<dyn TransferPlugin>> {
        self.bindings.remove(&id).map(|b| b.plugin)
    }

    // ==================== Client operations ====================

    /// Start a Download or Sync.
    pub async fn start(&mut self, id: TransferId) -> Result<(), TransferError> {
        let record = self.load(id).await?;
        if !record.kind.is_client_driven() {
            warn!(transfer_id = id, "Uploads start when created");
            return Err(TransferError::invalid(id, "start", record.status));
        }
        if record.status == TransferStatus::Started {
            warn!(transfer_id = id, "Transfer already started");
            return Err(TransferError::invalid(id, "start", record.status));
        }

        self.transition(&record, TransferStatus::Started, "start").await?;
        self.ledger.touch(id);
        Ok(())
    }

    /// Start a canceled or interrupted transfer again.
    pub async fn restart(&mut self, id: TransferId) -> Result<(), TransferError> {
        let record = self.load(id).await?;
        if !record.status.is_restartable() {
            warn!(transfer_id = id, status = %record.status, "Transfer cannot be restarted");
            return Err(TransferError::invalid(id, "restart", record.status));
        }

        match record.kind {
            TransferKind::Upload => self.restart_upload(record).await,
            TransferKind::Download | TransferKind::Sync => {
                let (callback, method) = match record
                    .callback
                    .as_ref()
                    .and_then(|cb| cb.method(CallbackMethod::Restart).map(|m| (cb, m)))
                {
                    Some((cb, m)) => (cb.clone(), m.to_string()),
                    None => {
                        warn!(transfer_id = id, "No restart callback defined");
                        return Err(TransferError::CallbackUnreachable(format!(
                            "transfer {id} has no restart callback"
                        )));
                    }
                };

                self.reset_progress(id).await?;
                self.invoke_callback(id, callback, method);
                Ok(())
            }
        }
    }

    async fn restart_upload(&mut self, record: TransferRecord) -> Result<(), TransferError> {
        let id = record.id;
        let item = record.upload.clone().ok_or_else(|| {
            TransferError::PluginUnavailable(format!("transfer {id} has no upload item"))
        })?;
        let plugin = self.collaborators.plugins.load(&item.plugin_id)?;

        self.reset_progress(id).await?;
        self.transition(&record, TransferStatus::Started, "restart")
            .await?;
        self.ledger.touch(id);
        self.bind(id, plugin, item).await;
        info!(transfer_id = id, "Upload restarted");
        Ok(())
    }

    async fn reset_progress(&mut self, id: TransferId) -> Result<(), TransferError> {
        if !self.store.update_progress(id, 0.0).await? {
            return Err(TransferError::NotFound(id));
        }
        self.events
            .publish(EngineEvent::ProgressChanged { id, progress: 0.0 });
        Ok(())
    }

    /// Finish a Download or Sync with a client-supplied final status.
    pub async fn finish(
        &mut self,
        id: TransferId,
        status: TransferStatus,
        reason: Option<String>,
    ) -> Result<(), TransferError> {
        if !status.is_final() {
            return Err(TransferError::InvalidArgument(format!(
                "{status} is not a final status"
            )));
        }
        let record = self.load(id).await?;
        if !record.kind.is_client_driven() {
            warn!(transfer_id = id, "Uploads are finished by their plugin");
            return Err(TransferError::invalid(id, "finish", record.status));
        }

        self.finish_record(&record, status, "finish").await?;
        match reason {
            Some(reason) if status == TransferStatus::Interrupted => {
                warn!(transfer_id = id, reason = %reason, "Transfer interrupted")
            }
            Some(reason) => info!(transfer_id = id, reason = %reason, "Transfer finished"),
            None => {}
        }
        Ok(())
    }

    /// Shared tail of client finish, watchdog expiry and plugin terminal signals.
    async fn finish_record(
        &mut self,
        record: &TransferRecord,
        status: TransferStatus,
        op: &'static str,
    ) -> Result<(), TransferError> {
        let id = record.id;
        self.transition(record, status, op).await?;
        self.ledger.forget(id);

        if record.kind != TransferKind::Sync {
            self.notify(record, status, record.progress).await;
            return Ok(());
        }

        let pruned = self.prune_failed_syncs(record).await;
        if status == TransferStatus::Finished {
            match self.store.remove(id).await {
                Ok(true) => {
                    self.kinds.remove(&id);
                    self.events.publish(EngineEvent::RecordRemoved { id });
                }
                Ok(false) => {}
                Err(e) => error!(transfer_id = id, error = %e, "Failed to remove finished sync"),
            }
        }
        if pruned > 0 {
            self.events.publish(EngineEvent::RecordsChanged);
        }
        Ok(())
    }

    /// Drop interrupted syncs of the same source, except `record` itself.
    async fn prune_failed_syncs(&mut self, record: &TransferRecord) -> usize {
        let Some(source) = record.sync_source() else {
            return 0;
        };
        let rows = match self.store.query_all(QueryOrder::NewestFirst).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(transfer_id = record.id, error = %e, "Failed to query syncs for pruning");
                return 0;
            }
        };

        let mut pruned = 0;
        for stale in rows.iter().filter(|r| {
            r.id != record.id
                && r.kind == TransferKind::Sync
                && r.status == TransferStatus::Interrupted
                && r.sync_source() == Some(source)
        }) {
            match self.store.remove(stale.id).await {
                Ok(true) => {
                    self.kinds.remove(&stale.id);
                    pruned += 1;
                }
                Ok(false) => {}
                Err(e) => error!(transfer_id = stale.id, error = %e, "Failed to prune sync"),
            }
        }
        if pruned > 0 {
            info!(source = source, pruned, "Pruned failed syncs");
        }
        pruned
    }

    /// Report progress of a started Download or Upload.
    pub async fn update_progress(&mut self, id: TransferId, progress: f64) -> Result<(), TransferError> {
        if !(0.0..=1.0).contains(&progress) {
            return Err(TransferError::InvalidArgument(format!(
                "progress {progress} outside [0, 1]"
            )));
        }
        let record = self.load(id).await?;
        if record.kind == TransferKind::Sync || record.status != TransferStatus::Started {
            warn!(transfer_id = id, kind = %record.kind, status = %record.status, "Progress rejected");
            return Err(TransferError::invalid(id, "progress", record.status));
        }

        if !self.store.update_progress(id, progress).await? {
            return Err(TransferError::NotFound(id));
        }
        self.ledger.touch(id);
        self.events
            .publish(EngineEvent::ProgressChanged { id, progress });

        if percent(progress) != percent(record.progress) {
            self.notify(&record, record.status, progress).await;
        }
        Ok(())
    }

    /// Cancel a live transfer. Does not wait for the plugin or client to
    /// acknowledge; that arrives later as a normal transition.
    pub async fn cancel(&mut self, id: TransferId) -> Result<(), TransferError> {
        if !self.kind_of(id).await?.is_client_driven() {
            let Some(binding) = self.bindings.get(&id) else {
                let record = self.load(id).await?;
                if !record.is_live() {
                    warn!(transfer_id = id, status = %record.status, "Transfer is not live");
                    return Err(TransferError::invalid(id, "cancel", record.status));
                }
                warn!(transfer_id = id, "No plugin bound to upload");
                return Err(TransferError::PluginUnavailable(format!(
                    "no plugin bound to transfer {id}"
                )));
            };
            binding.plugin.cancel().await;
            self.ledger.forget(id);
            info!(transfer_id = id, "Upload cancel requested");
            return Ok(());
        }

        let record = self.load(id).await?;
        if !record.is_live() {
            warn!(transfer_id = id, status = %record.status, "Transfer is not live");
            return Err(TransferError::invalid(id, "cancel", record.status));
        }
        let Some((callback, method)) = record
            .callback
            .as_ref()
            .and_then(|cb| cb.method(CallbackMethod::Cancel).map(|m| (cb.clone(), m.to_string())))
        else {
            warn!(transfer_id = id, "No cancel callback defined");
            return Err(TransferError::CallbackUnreachable(format!(
                "transfer {id} has no cancel callback"
            )));
        };

        self.ledger.forget(id);
        self.invoke_callback(id, callback, method);
        Ok(())
    }

    fn invoke_callback(&self, id: TransferId, callback: CallbackInfo, method: String) {
        let invoker = self.collaborators.callbacks.clone();
        tokio::spawn(async move {
            if let Err(e) = invoker.invoke(&callback, &method, id).await {
                warn!(transfer_id = id, method = %method, error = %e, "Client callback failed");
            }
        });
    }

    // ==================== Plugin and watchdog ====================

    pub async fn handle_plugin_event(&mut self, event: PluginEvent) {
        let id = event.id;
        match self.bindings.get(&id) {
            Some(b) if b.generation == event.binding => {}
            _ => {
                debug!(transfer_id = id, binding = event.binding, "Signal from stale plugin ignored");
                return;
            }
        }

        let result = match event.signal {
            PluginSignal::Progress(progress) => self.update_progress(id, progress).await,
            PluginSignal::Status(TransferStatus::Started) => self.plugin_started(id).await,
            PluginSignal::Status(status) if status.is_final() => {
                self.unbind(id);
                match self.load(id).await {
                    Ok(record) => self.finish_record(&record, status, "plugin").await,
                    Err(e) => Err(e),
                }
            }
            PluginSignal::Status(status) => {
                warn!(transfer_id = id, status = %status, "Unexpected plugin status");
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(transfer_id = id, error = %e, "Plugin signal rejected");
        }
    }

    async fn plugin_started(&mut self, id: TransferId) -> Result<(), TransferError> {
        let record = self.load(id).await?;
        if record.status != TransferStatus::Started {
            self.transition(&record, TransferStatus::Started, "plugin")
                .await?;
        }
        self.ledger.touch(id);
        Ok(())
    }

    /// Interrupt transfers the watchdog found silent. Returns how many moved.
    ///
    /// The batch may be stale: ids that were finished, canceled or refreshed
    /// after the sweep are skipped.
    pub async fn expire(&mut self, ids: Vec<TransferId>) -> usize {
        let now = Instant::now();
        let mut interrupted = 0;
        for id in ids {
            if !self.ledger.is_silent(id, now, self.expiry_threshold) {
                debug!(transfer_id = id, "Transfer active since the sweep, not expiring");
                continue;
            }
            let record = match self.store.get(id).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    self.ledger.forget(id);
                    continue;
                }
                Err(e) => {
                    // Entry stays; the next sweep retries.
                    error!(transfer_id = id, error = %e, "Failed to load expired transfer");
                    continue;
                }
            };
            if !record.is_live() {
                self.ledger.forget(id);
                continue;
            }

            if let Some(plugin) = self.unbind(id) {
                plugin.cancel().await;
            }
            match self
                .finish_record(&record, TransferStatus::Interrupted, "expire")
                .await
            {
                Ok(()) => {
                    warn!(transfer_id = id, "Transfer expired");
                    interrupted += 1;
                }
                Err(e) => error!(transfer_id = id, error = %e, "Failed to expire transfer"),
            }
        }
        interrupted
    }

    /// Interrupt every live record. Run at startup and at shutdown.
    pub async fn recover(&mut self) -> Result<usize, TransferError> {
        let live = self.store.query_live().await?;
        let mut interrupted = 0;
        for record in &live {
            if let Some(plugin) = self.unbind(record.id) {
                plugin.cancel().await;
            }
            match self
                .transition(record, TransferStatus::Interrupted, "recover")
                .await
            {
                Ok(()) => {
                    self.ledger.forget(record.id);
                    interrupted += 1;
                }
                Err(e) => error!(transfer_id = record.id, error = %e, "Failed to recover transfer"),
            }
        }
        if interrupted > 0 {
            info!(interrupted, "Recovered inconsistent transfers");
        }
        Ok(interrupted)
    }

    // ==================== Queries and housekeeping ====================

    pub async fn list_all(&self) -> Result<Vec<TransferRecord>, TransferError> {
        Ok(self.store.query_all(QueryOrder::NewestFirst).await?)
    }

    pub async fn list_live(&self) -> Result<Vec<TransferRecord>, TransferError> {
        Ok(self.store.query_live().await?)
    }

    pub async fn get(&self, id: TransferId) -> Result<TransferRecord, TransferError> {
        self.load(id).await
    }

    /// Remove every record that is not live.
    pub async fn clear_all(&mut self) -> Result<usize, TransferError> {
        let removed = self.store.remove_inactive().await?;
        if removed > 0 {
            let ledger = &self.ledger;
            let bindings = &self.bindings;
            self.kinds
                .retain(|id, _| ledger.contains(*id) || bindings.contains_key(id));
            self.events.publish(EngineEvent::RecordsChanged);
        }
        Ok(removed)
    }

    /// Remove one record that is not live.
    pub async fn clear_one(&mut self, id: TransferId) -> Result<(), TransferError> {
        let record = self.load(id).await?;
        if record.is_live() {
            warn!(transfer_id = id, "Refusing to clear a live transfer");
            return Err(TransferError::invalid(id, "clear", record.status));
        }
        if !self.store.remove(id).await? {
            return Err(TransferError::NotFound(id));
        }
        self.kinds.remove(&id);
        self.events.publish(EngineEvent::RecordRemoved { id });
        Ok(())
    }

    pub fn set_notifications_enabled(&mut self, enabled: bool) {
        self.notifications_enabled = enabled;
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled
    }

    /// Whether any transfer is still being tracked
    pub fn has_activity(&self) -> bool {
        !self.ledger.is_empty() || !self.bindings.is_empty()
    }

    // ==================== Internals ====================

    async fn load(&self, id: TransferId) -> Result<TransferRecord, TransferError> {
        self.store
            .get(id)
            .await?
            .ok_or(TransferError::NotFound(id))
    }

    async fn kind_of(&mut self, id: TransferId) -> Result<TransferKind, TransferError> {
        if let Some(kind) = self.kinds.get(&id) {
            return Ok(*kind);
        }
        let kind = self.load(id).await?.kind;
        self.kinds.insert(id, kind);
        Ok(kind)
    }

    /// Write `next` and publish the change. Rejects edges outside the graph.
    async fn transition(
        &mut self,
        record: &TransferRecord,
        next: TransferStatus,
        op: &'static str,
    ) -> Result<(), TransferError> {
        let id = record.id;
        if !record.status.can_transition_to(next) {
            warn!(transfer_id = id, from = %record.status, to = %next, op, "Invalid transition");
            return Err(TransferError::invalid(id, op, record.status));
        }
        if !self.store.update_status(id, next).await? {
            return Err(TransferError::NotFound(id));
        }

        debug!(transfer_id = id, from = %record.status, to = %next, op, "Status changed");
        self.events
            .publish(EngineEvent::StatusChanged { id, status: next });
        if record.status.is_live() != next.is_live() {
            self.events.publish(EngineEvent::LiveCountChanged);
        }
        Ok(())
    }

    async fn notify(&self, record: &TransferRecord, status: TransferStatus, progress: f64) {
        if !self.notifications_enabled {
            return;
        }
        let file_name = record.metadata.file_name();
        if file_name.is_empty() {
            return;
        }
        let id = record.id;
        let existing = match self.store.notification_id(id).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(transfer_id = id, error = %e, "Failed to read notification id");
                return;
            }
        };
        let local_file = record
            .metadata
            .url
            .as_deref()
            .filter(|url| record.kind == TransferKind::Download && url.starts_with("file://"));

        let request = NotificationRequest {
            id,
            kind: record.kind,
            status,
            progress,
            file_name: &file_name,
            existing,
            can_cancel: record.metadata.cancel_supported,
            local_file,
        };

        let stored = match plan(&request) {
            NotificationPlan::Publish(notification) => {
                let published = self.collaborators.notifier.publish(&notification).await;
                (published != existing).then_some(published)
            }
            NotificationPlan::Close(existing) => {
                self.collaborators.notifier.close(existing).await;
                Some(0)
            }
            NotificationPlan::Nothing => None,
        };

        if let Some(notification_id) = stored
            && let Err(e) = self.store.set_notification_id(id, notification_id).await
        {
            warn!(transfer_id = id, error = %e, "Failed to store notification id");
        }
    }
}

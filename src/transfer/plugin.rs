//! Upload execution plugins
//!
//! An upload is performed by a plugin instance bound to exactly one live
//! Upload record. Plugins are created on demand from a [`PluginRegistry`] of
//! factories keyed by plugin id. How factories are discovered (static
//! registration, a directory of shared objects, ...) is up to the embedder.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::TransferError;
use super::state::TransferStatus;
use super::types::{TransferId, UploadItem};

/// Something a bound plugin reported
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PluginSignal {
    Status(TransferStatus),
    Progress(f64),
}

/// A signal tagged with the binding it came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PluginEvent {
    pub id: TransferId,
    /// Generation of the binding; signals from stale bindings are ignored
    pub binding: u64,
    pub signal: PluginSignal,
}

/// Channel back into the control loop, handed to a plugin on start.
#[derive(Debug, Clone)]
pub struct PluginReporter {
    id: TransferId,
    binding: u64,
    tx: mpsc::UnboundedSender<PluginEvent>,
}

impl PluginReporter {
    pub(crate) fn new(id: TransferId, binding: u64, tx: mpsc::UnboundedSender<PluginEvent>) -> Self {
        Self { id, binding, tx }
    }

    pub fn transfer_id(&self) -> TransferId {
        self.id
    }

    pub fn status(&self, status: TransferStatus) {
        self.send(PluginSignal::Status(status));
    }

    pub fn progress(&self, progress: f64) {
        self.send(PluginSignal::Progress(progress));
    }

    fn send(&self, signal: PluginSignal) {
        // Engine shut down: nothing left to report to.
        let _ = self.tx.send(PluginEvent {
            id: self.id,
            binding: self.binding,
            signal,
        });
    }
}

/// One upload in flight
///
/// `start` and `cancel` must return promptly; the actual work runs elsewhere
/// and reports through the [`PluginReporter`].
#[async_trait]
pub trait TransferPlugin: Send + Sync {
    fn display_name(&self) -> String;

    fn service_icon(&self) -> Option<String> {
        None
    }

    fn cancel_enabled(&self) -> bool {
        true
    }

    fn restart_enabled(&self) -> bool {
        true
    }

    async fn start(&self, item: UploadItem, reporter: PluginReporter);

    /// Best effort. The plugin acknowledges by reporting `Canceled`.
    async fn cancel(&self);
}

/// Creates plugin instances for one plugin id
pub trait PluginFactory: Send + Sync {
    fn plugin_id(&self) -> &str;

    fn create(&self) -> Box<dyn TransferPlugin>;
}

#[derive(Default, Clone)]
pub struct PluginRegistry {
    factories: HashMap<String, Arc<dyn PluginFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one with the same id.
    pub fn register(&mut self, factory: Arc<dyn PluginFactory>) {
        self.factories
            .insert(factory.plugin_id().to_string(), factory);
    }

    pub fn load(&self, plugin_id: &str) -> Result<Box<dyn TransferPlugin>, TransferError> {
        self.factories
            .get(plugin_id)
            .map(|f| f.create())
            .ok_or_else(|| TransferError::PluginUnavailable(plugin_id.to_string()))
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Mock plugin for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// State shared between a mock plugin instance and the test
    #[derive(Default)]
    pub struct MockPluginState {
        reporter: Mutex<Option<PluginReporter>>,
        item: Mutex<Option<UploadItem>>,
        start_count: AtomicUsize,
        cancel_count: AtomicUsize,
    }

    impl MockPluginState {
        pub fn start_count(&self) -> usize {
            self.start_count.load(Ordering::SeqCst)
        }

        pub fn cancel_count(&self) -> usize {
            self.cancel_count.load(Ordering::SeqCst)
        }

        pub fn item(&self) -> Option<UploadItem> {
            self.item.lock().unwrap().clone()
        }

        pub fn reporter(&self) -> PluginReporter {
            self.reporter
                .lock()
                .unwrap()
                .clone()
                .expect("plugin was never started")
        }

        pub fn report_status(&self, status: TransferStatus) {
            self.reporter().status(status);
        }

        pub fn report_progress(&self, progress: f64) {
            self.reporter().progress(progress);
        }
    }

    /// Acknowledges start immediately; everything else is driven by the test.
    pub struct MockPlugin {
        state: Arc<MockPluginState>,
    }

    #[async_trait]
    impl TransferPlugin for MockPlugin {
        fn display_name(&self) -> String {
            "Mock Service".to_string()
        }

        fn service_icon(&self) -> Option<String> {
            Some("icon-m-mock".to_string())
        }

        async fn start(&self, item: UploadItem, reporter: PluginReporter) {
            self.state.start_count.fetch_add(1, Ordering::SeqCst);
            *self.state.item.lock().unwrap() = Some(item);
            reporter.status(TransferStatus::Started);
            *self.state.reporter.lock().unwrap() = Some(reporter);
        }

        async fn cancel(&self) {
            self.state.cancel_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Factory that remembers every instance it created
    pub struct MockPluginFactory {
        id: &'static str,
        instances: Mutex<Vec<Arc<MockPluginState>>>,
    }

    impl MockPluginFactory {
        pub fn new(id: &'static str) -> Self {
            Self {
                id,
                instances: Mutex::new(Vec::new()),
            }
        }

        pub fn instance(&self, n: usize) -> Arc<MockPluginState> {
            self.instances.lock().unwrap()[n].clone()
        }

        pub fn created(&self) -> usize {
            self.instances.lock().unwrap().len()
        }
    }

    impl PluginFactory for MockPluginFactory {
        fn plugin_id(&self) -> &str {
            self.id
        }

        fn create(&self) -> Box<dyn TransferPlugin> {
            let state = Arc::new(MockPluginState::default());
            self.instances.lock().unwrap().push(state.clone());
            Box::new(MockPlugin { state })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_registry_load() {
            let mut registry = PluginRegistry::new();
            registry.register(Arc::new(MockPluginFactory::new("mock")));

            assert!(registry.load("mock").is_ok());
            assert!(matches!(
                registry.load("missing"),
                Err(TransferError::PluginUnavailable(id)) if id == "missing"
            ));
            assert_eq!(registry.plugin_ids(), vec!["mock".to_string()]);
        }

        #[tokio::test]
        async fn test_reporter_tags_events() {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let reporter = PluginReporter::new(9, 3, tx);
            reporter.progress(0.25);
            reporter.status(TransferStatus::Finished);

            assert_eq!(
                rx.recv().await.unwrap(),
                PluginEvent {
                    id: 9,
                    binding: 3,
                    signal: PluginSignal::Progress(0.25)
                }
            );
            assert_eq!(
                rx.recv().await.unwrap().signal,
                PluginSignal::Status(TransferStatus::Finished)
            );
        }
    }
}

#[cfg(test)]
pub use mock::{MockPluginFactory, MockPluginState};

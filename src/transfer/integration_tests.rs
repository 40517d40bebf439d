//! Integration tests for the transfer lifecycle
//!
//! These run the real control loop, watchdog and projection against the
//! in-memory store, with mock plugins, callbacks and notifier.

#[cfg(test)]
mod integration_tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;
    use tokio::sync::{broadcast, mpsc};

    use crate::config::EngineConfig;
    use crate::projection::ProjectionStatus;
    use crate::service::TransferService;
    use crate::store::{MemoryStore, QueryOrder, RecordStore};
    use crate::transfer::callback::RecordingCallbacks;
    use crate::transfer::coordinator::{Collaborators, TransferCoordinator};
    use crate::transfer::events::{EngineEvent, EventBus};
    use crate::transfer::ledger::ActivityLedger;
    use crate::transfer::notify::RecordingNotifier;
    use crate::transfer::plugin::{MockPluginFactory, PluginRegistry};
    use crate::transfer::state::TransferStatus;
    use crate::transfer::types::{
        CallbackInfo, DownloadRequest, SyncRequest, TransferId, UploadRequest,
    };

    struct TestHarness {
        service: TransferService,
        store: Arc<MemoryStore>,
        callbacks: Arc<RecordingCallbacks>,
        factory: Arc<MockPluginFactory>,
    }

    impl TestHarness {
        async fn start() -> Self {
            Self::start_with(Arc::new(MemoryStore::new())).await
        }

        async fn start_with(store: Arc<MemoryStore>) -> Self {
            let callbacks = Arc::new(RecordingCallbacks::new());
            let factory = Arc::new(MockPluginFactory::new("mock"));
            let mut plugins = PluginRegistry::new();
            plugins.register(factory.clone());

            let service = TransferService::start(
                store.clone(),
                Collaborators {
                    plugins,
                    callbacks: callbacks.clone(),
                    notifier: Arc::new(RecordingNotifier::new()),
                },
                &EngineConfig::default(),
            )
            .await
            .unwrap();

            Self {
                service,
                store,
                callbacks,
                factory,
            }
        }

        async fn status(&self, id: TransferId) -> Option<TransferStatus> {
            self.store.get(id).await.unwrap().map(|r| r.status)
        }
    }

    fn download(name: &str) -> DownloadRequest {
        DownloadRequest {
            display_name: "Browser".into(),
            file_path: format!("/home/user/Downloads/{name}"),
            callback: Some(CallbackInfo::new(
                "http://127.0.0.1:7001/browser",
                Some("cancelDownload".into()),
                Some("restartDownload".into()),
            )),
            ..Default::default()
        }
    }

    fn sync(source: &str) -> SyncRequest {
        SyncRequest {
            display_name: source.into(),
            ..Default::default()
        }
    }

    async fn next_status(
        rx: &mut broadcast::Receiver<EngineEvent>,
    ) -> (TransferId, TransferStatus) {
        loop {
            if let EngineEvent::StatusChanged { id, status } = rx.recv().await.unwrap() {
                return (id, status);
            }
        }
    }

    // ========================================================================
    // Scenarios
    // ========================================================================

    /// Finished syncs disappear; only the latest failure per source remains.
    #[tokio::test]
    async fn test_sync_retention() {
        let h = TestHarness::start().await;
        let engine = h.service.handle();

        let s1 = engine.create_sync(sync("mail")).await.unwrap();
        engine.start(s1).await.unwrap();
        engine
            .finish(s1, TransferStatus::Finished, None)
            .await
            .unwrap();
        let all = h.store.query_all(QueryOrder::NewestFirst).await.unwrap();
        assert!(all.iter().all(|r| r.id != s1));

        let s2 = engine.create_sync(sync("mail")).await.unwrap();
        engine.start(s2).await.unwrap();
        engine
            .finish(s2, TransferStatus::Interrupted, Some("offline".into()))
            .await
            .unwrap();
        let s3 = engine.create_sync(sync("mail")).await.unwrap();
        engine.start(s3).await.unwrap();
        engine
            .finish(s3, TransferStatus::Interrupted, Some("offline".into()))
            .await
            .unwrap();

        let remaining: Vec<_> = h
            .store
            .query_all(QueryOrder::NewestFirst)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.id, r.status))
            .collect();
        assert_eq!(remaining, vec![(s3, TransferStatus::Interrupted)]);
    }

    /// A started download whose client goes silent is interrupted by the
    /// watchdog, with exactly one status event.
    #[tokio::test(start_paused = true)]
    async fn test_silent_download_expires() {
        let h = TestHarness::start().await;
        let engine = h.service.handle();

        let id = engine.create_download(download("a.iso")).await.unwrap();
        engine.start(id).await.unwrap();
        assert_eq!(h.service.tracked(), 1);

        let mut events = h.service.subscribe();
        tokio::time::advance(Duration::from_secs(181)).await;

        let (event_id, status) = next_status(&mut events).await;
        assert_eq!((event_id, status), (id, TransferStatus::Interrupted));
        assert_eq!(h.status(id).await, Some(TransferStatus::Interrupted));
        assert_eq!(h.service.tracked(), 0);

        // Nothing else moves on later sweeps.
        tokio::time::advance(Duration::from_secs(300)).await;
        tokio::task::yield_now().await;
        while let Ok(e) = events.try_recv() {
            assert!(
                !matches!(e, EngineEvent::StatusChanged { .. }),
                "unexpected {e:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_keeps_download_alive() {
        let h = TestHarness::start().await;
        let engine = h.service.handle();

        let id = engine.create_download(download("a.iso")).await.unwrap();
        engine.start(id).await.unwrap();

        for step in 1..=5 {
            tokio::time::advance(Duration::from_secs(100)).await;
            engine.update_progress(id, step as f64 / 10.0).await.unwrap();
        }
        assert_eq!(h.status(id).await, Some(TransferStatus::Started));
        assert_eq!(h.service.tracked(), 1);
    }

    #[tokio::test]
    async fn test_startup_recovers_and_shutdown_interrupts() {
        let store = Arc::new(MemoryStore::new());
        let left_over = store
            .create(download("old.iso").into_new_transfer())
            .await
            .unwrap();
        store
            .update_status(left_over, TransferStatus::Started)
            .await
            .unwrap();

        let h = TestHarness::start_with(store.clone()).await;
        assert_eq!(h.status(left_over).await, Some(TransferStatus::Interrupted));

        let engine = h.service.handle();
        let live = engine.create_download(download("new.iso")).await.unwrap();
        engine.start(live).await.unwrap();

        assert_eq!(h.service.shutdown().await.unwrap(), 1);
        assert_eq!(
            store.get(live).await.unwrap().unwrap().status,
            TransferStatus::Interrupted
        );
        assert_eq!(
            engine.start(live).await.unwrap_err(),
            crate::transfer::TransferError::EngineStopped
        );
    }

    #[tokio::test]
    async fn test_upload_cancel_through_engine() {
        let h = TestHarness::start().await;
        let engine = h.service.handle();
        let mut events = h.service.subscribe();

        let id = engine
            .upload(UploadRequest::file("mock", "/tmp/photo.jpg"))
            .await
            .unwrap();
        assert_eq!(next_status(&mut events).await, (id, TransferStatus::NotStarted));
        assert_eq!(next_status(&mut events).await, (id, TransferStatus::Started));

        engine.cancel(id).await.unwrap();
        let plugin = h.factory.instance(0);
        assert_eq!(plugin.cancel_count(), 1);
        assert_eq!(h.service.tracked(), 0);

        plugin.report_status(TransferStatus::Canceled);
        assert_eq!(next_status(&mut events).await, (id, TransferStatus::Canceled));
        assert!(!engine.has_activity().await.unwrap());
    }

    #[tokio::test]
    async fn test_restart_download_calls_client() {
        let h = TestHarness::start().await;
        let engine = h.service.handle();

        let id = engine.create_download(download("a.iso")).await.unwrap();
        engine
            .finish(id, TransferStatus::Canceled, None)
            .await
            .unwrap();
        engine.restart(id).await.unwrap();

        let inv = h.callbacks.next().await;
        assert_eq!((inv.id, inv.method.as_str()), (id, "restartDownload"));
        assert_eq!(h.status(id).await, Some(TransferStatus::Canceled));
    }

    #[tokio::test]
    async fn test_projection_follows_engine() {
        let h = TestHarness::start().await;
        let engine = h.service.handle();
        let projection = h.service.projection();
        let mut state = projection.watch_state();

        let a = engine.create_download(download("a.iso")).await.unwrap();
        let b = engine.create_download(download("b.iso")).await.unwrap();
        engine.start(a).await.unwrap();
        engine
            .finish(b, TransferStatus::Finished, None)
            .await
            .unwrap();

        let snapshot = state
            .wait_for(|s| s.status == ProjectionStatus::Finished && s.live_count == 1)
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.error, None);

        // Events keep arriving after the first refresh; wait for the view
        // to settle on the final store content.
        loop {
            let rows = projection.rows();
            if rows.len() == 2 && rows[1].status == TransferStatus::Started {
                break;
            }
            state.changed().await.unwrap();
        }
        assert_eq!(projection.rows()[0].id, b);

        assert_eq!(projection.clear_transfers().await.unwrap(), 1);
        loop {
            if projection.rows().iter().map(|r| r.id).collect::<Vec<_>>() == vec![a] {
                break;
            }
            state.changed().await.unwrap();
        }
        assert_eq!(projection.live_count(), 1);
    }

    // ========================================================================
    // Status graph property
    // ========================================================================

    #[derive(Debug, Clone)]
    enum Op {
        CreateDownload,
        CreateSync,
        Upload,
        Start(usize),
        Restart(usize),
        Finish(usize, TransferStatus),
        Progress(usize, u8),
        Cancel(usize),
        PluginReport(usize, TransferStatus),
        Expire(usize),
        Recover,
    }

    fn arb_final() -> impl Strategy<Value = TransferStatus> {
        prop_oneof![
            Just(TransferStatus::Finished),
            Just(TransferStatus::Canceled),
            Just(TransferStatus::Interrupted),
        ]
    }

    fn arb_reported() -> impl Strategy<Value = TransferStatus> {
        prop_oneof![
            Just(TransferStatus::NotStarted),
            Just(TransferStatus::Started),
            Just(TransferStatus::Finished),
            Just(TransferStatus::Canceled),
            Just(TransferStatus::Interrupted),
        ]
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            2 => Just(Op::CreateDownload),
            1 => Just(Op::CreateSync),
            1 => Just(Op::Upload),
            3 => (0..6usize).prop_map(Op::Start),
            2 => (0..6usize).prop_map(Op::Restart),
            3 => (0..6usize, arb_final()).prop_map(|(i, s)| Op::Finish(i, s)),
            2 => (0..6usize, 0..=100u8).prop_map(|(i, p)| Op::Progress(i, p)),
            2 => (0..6usize).prop_map(Op::Cancel),
            3 => (0..6usize, arb_reported()).prop_map(|(i, s)| Op::PluginReport(i, s)),
            1 => (0..6usize).prop_map(Op::Expire),
            1 => Just(Op::Recover),
        ]
    }

    async fn run_ops(ops: Vec<Op>) -> Result<(), TestCaseError> {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let bus = EventBus::new(4096);
        let mut events = bus.subscribe();
        let factory = Arc::new(MockPluginFactory::new("mock"));
        let mut plugins = PluginRegistry::new();
        plugins.register(factory.clone());
        let (plugin_tx, mut plugin_rx) = mpsc::unbounded_channel();
        let mut coordinator = TransferCoordinator::new(
            store.clone(),
            Arc::new(ActivityLedger::new()),
            bus,
            Collaborators {
                plugins,
                callbacks: Arc::new(RecordingCallbacks::new()),
                notifier: Arc::new(RecordingNotifier::new()),
            },
            plugin_tx,
        );

        let mut ids: Vec<TransferId> = Vec::new();
        let pick = |ids: &[TransferId], i: usize| ids.get(i % ids.len().max(1)).copied();

        for op in ops {
            match op {
                Op::CreateDownload => {
                    ids.push(coordinator.create_download(download("x")).await.unwrap());
                }
                Op::CreateSync => {
                    ids.push(coordinator.create_sync(sync("src")).await.unwrap());
                }
                Op::Upload => {
                    ids.push(
                        coordinator
                            .upload(UploadRequest::file("mock", "/tmp/x"))
                            .await
                            .unwrap(),
                    );
                }
                Op::Start(i) => {
                    if let Some(id) = pick(&ids, i) {
                        let _ = coordinator.start(id).await;
                    }
                }
                Op::Restart(i) => {
                    if let Some(id) = pick(&ids, i) {
                        let _ = coordinator.restart(id).await;
                    }
                }
                Op::Finish(i, status) => {
                    if let Some(id) = pick(&ids, i) {
                        let _ = coordinator.finish(id, status, None).await;
                    }
                }
                Op::Progress(i, p) => {
                    if let Some(id) = pick(&ids, i) {
                        let _ = coordinator.update_progress(id, p as f64 / 100.0).await;
                    }
                }
                Op::Cancel(i) => {
                    if let Some(id) = pick(&ids, i) {
                        let _ = coordinator.cancel(id).await;
                    }
                }
                Op::PluginReport(i, status) => {
                    let created = factory.created();
                    if created > 0 {
                        let plugin = factory.instance(i % created);
                        plugin.report_status(status);
                    }
                }
                Op::Expire(i) => {
                    if let Some(id) = pick(&ids, i) {
                        tokio::time::advance(Duration::from_secs(181)).await;
                        coordinator.expire(vec![id]).await;
                    }
                }
                Op::Recover => {
                    coordinator.recover().await.unwrap();
                }
            }
            while let Ok(event) = plugin_rx.try_recv() {
                coordinator.handle_plugin_event(event).await;
            }
        }

        let mut last: HashMap<TransferId, TransferStatus> = HashMap::new();
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::StatusChanged { id, status } = event {
                match last.insert(id, status) {
                    None => {
                        prop_assert_eq!(status, TransferStatus::NotStarted);
                    }
                    Some(prev) => {
                        prop_assert!(
                            prev.can_transition_to(status),
                            "illegal edge {} -> {} for {}",
                            prev,
                            status,
                            id
                        );
                    }
                }
            }
        }

        // The store agrees with the last event of every surviving record.
        for record in store.query_all(QueryOrder::NewestFirst).await.unwrap() {
            prop_assert_eq!(last.get(&record.id).copied(), Some(record.status));
        }
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_only_legal_edges(ops in proptest::collection::vec(arb_op(), 1..60)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();
            rt.block_on(run_ops(ops))?;
        }
    }
}

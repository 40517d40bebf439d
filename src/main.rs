//! Transfer Engine
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌──────────────┐
//! │ Clients  │───▶│ Control Loop │───▶│ Record Store │
//! │ Plugins  │    │ (Coordinator)│    │  (snapshot)  │
//! └──────────┘    └──────────────┘    └──────────────┘
//!                        ▲
//!                 ┌──────┴──────┐
//!                 │  Watchdog   │
//!                 └─────────────┘
//! ```
//!
//! Exits after a configurable idle period unless `keep_running` is set or
//! `TRANSFER_ENGINE_KEEP_RUNNING` is present, and on ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use transfer_engine::config::AppConfig;
use transfer_engine::service::TransferService;
use transfer_engine::store::{MemoryStore, RecordStore};
use transfer_engine::transfer::{
    Collaborators, EngineHandle, HttpCallbackInvoker, LogNotifier, PluginRegistry,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Resolves at the first idle-period boundary with no live transfer.
async fn wait_until_idle(handle: &EngineHandle, idle: Duration) {
    let mut ticker = tokio::time::interval(idle.max(Duration::from_secs(1)));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match handle.has_activity().await {
            Ok(true) => continue,
            Ok(false) => return,
            Err(e) => {
                warn!(error = %e, "Engine stopped unexpectedly");
                return;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _log_guard = transfer_engine::logging::init_logging(&config)?;

    info!(env = %env, version = transfer_engine::build_version(), "Starting transfer engine");

    let store: Arc<dyn RecordStore> = match &config.store.snapshot_path {
        Some(path) => Arc::new(
            MemoryStore::open(path)
                .await
                .with_context(|| format!("opening record store {path}"))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };

    let collaborators = Collaborators {
        plugins: PluginRegistry::new(),
        callbacks: Arc::new(HttpCallbackInvoker::new(config.callbacks.timeout())?),
        notifier: Arc::new(LogNotifier::new()),
    };

    let service = TransferService::start(store, collaborators, &config.engine).await?;
    let handle = service.handle();

    if config.engine.keep_running {
        info!("Idle exit disabled");
        tokio::signal::ctrl_c().await?;
    } else {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => signal?,
            _ = wait_until_idle(&handle, config.engine.idle_exit()) => {
                info!(idle_secs = config.engine.idle_exit_secs, "No transfers, exiting");
            }
        }
    }

    let interrupted = service.shutdown().await?;
    info!(interrupted, "Shutdown complete");
    Ok(())
}

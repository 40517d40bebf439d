//! Expiry Watchdog
//!
//! Background task that finds transfers whose client stopped reporting.
//! It only reads the [`ActivityLedger`]; remediation happens in the control
//! loop, which receives one batch of expired ids per sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::ledger::ActivityLedger;
use super::types::TransferId;

/// Configuration for the expiry watchdog
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// How often to sweep the ledger
    pub sweep_interval: Duration,
    /// Silence after which a transfer is interrupted
    pub expiry_threshold: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            expiry_threshold: Duration::from_secs(180),
        }
    }
}

pub struct ExpiryWatchdog {
    ledger: Arc<ActivityLedger>,
    expired_tx: mpsc::Sender<Vec<TransferId>>,
    config: WatchdogConfig,
}

impl ExpiryWatchdog {
    pub fn new(
        ledger: Arc<ActivityLedger>,
        expired_tx: mpsc::Sender<Vec<TransferId>>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            ledger,
            expired_tx,
            config,
        }
    }

    /// Ids silent for longer than the threshold at `now`
    pub fn sweep(&self, now: Instant) -> Vec<TransferId> {
        self.ledger.expired(now, self.config.expiry_threshold)
    }

    /// Run until the control loop goes away.
    pub async fn run(self) {
        info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            expiry_threshold_secs = self.config.expiry_threshold.as_secs(),
            "Starting expiry watchdog"
        );

        let period = self.config.sweep_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let expired = self.sweep(Instant::now());
            if expired.is_empty() {
                debug!(tracked = self.ledger.len(), "Sweep found nothing expired");
                continue;
            }

            warn!(count = expired.len(), ids = ?expired, "Transfers expired");
            if self.expired_tx.send(expired).await.is_err() {
                debug!("Control loop gone, stopping watchdog");
                break;
            }
        }
    }
}

//! Activity ledger: last time each live transfer showed signs of life.
//!
//! Shared between the control loop (which touches and clears entries) and
//! the expiry watchdog (which only reads them), stored in a `DashMap` so
//! neither side takes a global lock.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use super::types::TransferId;

#[derive(Default)]
pub struct ActivityLedger {
    entries: DashMap<TransferId, Instant>,
}

impl ActivityLedger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Record activity now, adding the entry if needed.
    pub fn touch(&self, id: TransferId) {
        self.entries.insert(id, Instant::now());
    }

    /// Drop the entry. Returns `false` if the transfer was not tracked.
    pub fn forget(&self, id: TransferId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn contains(&self, id: TransferId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn last_seen(&self, id: TransferId) -> Option<Instant> {
        self.entries.get(&id).map(|e| *e.value())
    }

    /// Whether the transfer is tracked and has been silent for longer than
    /// `threshold` at `now`.
    pub fn is_silent(&self, id: TransferId, now: Instant, threshold: Duration) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|e| exceeds(now, *e.value(), threshold))
    }

    /// Ids silent for longer than `threshold` at `now`, ascending.
    pub fn expired(&self, now: Instant, threshold: Duration) -> Vec<TransferId> {
        let mut ids: Vec<TransferId> = self
            .entries
            .iter()
            .filter(|e| exceeds(now, *e.value(), threshold))
            .map(|e| *e.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn exceeds(now: Instant, last_seen: Instant, threshold: Duration) -> bool {
    now.saturating_duration_since(last_seen) > threshold
}

//! Feature status board
//!
//! Keeps the coarse lifecycle state of each engine subsystem and publishes
//! every transition on a broadcast channel. Publishing never blocks: with
//! no subscriber the update is simply dropped, and slow subscribers lag.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use fencesync_core::domain::{FeatureState, FeatureStatus};
use tokio::sync::broadcast;
use tracing::debug;

/// Feature id of the multi-target device subsystem
pub const DEVICE_SYNC_FEATURE: &str = "device_sync";
/// Feature id of the single-target (cloud) subsystem
pub const CLOUD_SYNC_FEATURE: &str = "cloud_sync";

#[derive(Debug)]
pub struct FeatureBoard {
    features: Mutex<BTreeMap<String, FeatureStatus>>,
    tx: broadcast::Sender<FeatureStatus>,
}

impl FeatureBoard {
    /// Creates an empty board whose channel buffers `capacity` updates
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            features: Mutex::new(BTreeMap::new()),
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, FeatureStatus>> {
        self.features
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a feature in the `Stopped` state; an existing entry is kept
    pub fn register(&self, id: &str, display_name: &str) {
        self.lock()
            .entry(id.to_string())
            .or_insert_with(|| FeatureStatus {
                id: id.to_string(),
                display_name: display_name.to_string(),
                state: FeatureState::Stopped,
                error_message: None,
            });
    }

    /// Moves a feature to `state` and publishes the new status
    ///
    /// Unknown ids are ignored. Repeating the current state with the same
    /// error message publishes nothing.
    pub fn set_state(&self, id: &str, state: FeatureState, error_message: Option<String>) {
        let snapshot = {
            let mut features = self.lock();
            let Some(feature) = features.get_mut(id) else {
                return;
            };
            if feature.state == state && feature.error_message == error_message {
                return;
            }
            feature.state = state;
            feature.error_message = error_message;
            feature.clone()
        };

        debug!(feature = id, state = %state, "Feature state changed");
        // Err only means nobody is listening.
        let _ = self.tx.send(snapshot);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<FeatureStatus> {
        self.lock().get(id).cloned()
    }

    /// All features, ordered by id
    #[must_use]
    pub fn snapshot(&self) -> Vec<FeatureStatus> {
        self.lock().values().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeatureStatus> {
        self.tx.subscribe()
    }
}

impl Default for FeatureBoard {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_starts_stopped_and_is_idempotent() {
        let board = FeatureBoard::new(8);
        board.register(CLOUD_SYNC_FEATURE, "Cloud sync");
        board.set_state(CLOUD_SYNC_FEATURE, FeatureState::Running, None);
        board.register(CLOUD_SYNC_FEATURE, "Renamed");

        let status = board.get(CLOUD_SYNC_FEATURE).unwrap();
        assert_eq!(status.state, FeatureState::Running);
        assert_eq!(status.display_name, "Cloud sync");
    }

    #[test]
    fn set_state_without_subscribers_does_not_fail() {
        let board = FeatureBoard::new(1);
        board.register(DEVICE_SYNC_FEATURE, "Device sync");
        board.set_state(DEVICE_SYNC_FEATURE, FeatureState::Error, Some("boom".into()));
        assert_eq!(
            board.get(DEVICE_SYNC_FEATURE).unwrap().error_message.as_deref(),
            Some("boom")
        );
    }

    #[tokio::test]
    async fn transitions_are_published_once() {
        let board = FeatureBoard::new(8);
        board.register(DEVICE_SYNC_FEATURE, "Device sync");
        let mut rx = board.subscribe();

        board.set_state(DEVICE_SYNC_FEATURE, FeatureState::Starting, None);
        board.set_state(DEVICE_SYNC_FEATURE, FeatureState::Running, None);
        board.set_state(DEVICE_SYNC_FEATURE, FeatureState::Running, None);
        board.set_state("unknown", FeatureState::Running, None);

        assert_eq!(rx.recv().await.unwrap().state, FeatureState::Starting);
        assert_eq!(rx.recv().await.unwrap().state, FeatureState::Running);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn snapshot_is_ordered_by_id() {
        let board = FeatureBoard::default();
        board.register(DEVICE_SYNC_FEATURE, "Device sync");
        board.register(CLOUD_SYNC_FEATURE, "Cloud sync");
        let ids: Vec<String> = board.snapshot().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["cloud_sync", "device_sync"]);
    }
}

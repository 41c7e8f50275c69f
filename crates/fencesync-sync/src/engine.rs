//! Engine facade
//!
//! The [`SyncEngine`] wires a [`SyncOrchestrator`] and a
//! [`MultiTargetCoordinator`] from a loaded [`Config`] and gives the host
//! (daemon, tests, an embedding UI) one object to start, query and stop.
//!
//! ## Lifecycle
//!
//! 1. **Build**: register filesystem providers, add single-target and
//!    multi-target configurations (triggers start immediately)
//! 2. **Start**: initialize providers, mark subsystems running
//! 3. **Shutdown**: cancel every trigger, then wait for in-flight passes

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fencesync_core::config::Config;
use fencesync_core::domain::{ConfigurationStatus, FeatureStatus, SyncResultEvent};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    coordinator::{filesystem_device_factory, MultiTargetCoordinator},
    filesystem::FilesystemSyncProvider,
    orchestrator::SyncOrchestrator,
    status::FeatureBoard,
};

/// Host-facing synchronization engine
pub struct SyncEngine {
    orchestrator: SyncOrchestrator,
    coordinator: MultiTargetCoordinator,
    features: Arc<FeatureBoard>,
    shutdown: CancellationToken,
}

impl SyncEngine {
    /// Builds an engine from `config`
    ///
    /// Providers are registered before configurations so references
    /// resolve regardless of declaration order.
    ///
    /// # Errors
    /// Returns an error naming the first configuration that was rejected.
    pub fn from_config(config: &Config) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let features = Arc::new(FeatureBoard::new(config.sync.event_capacity));
        let orchestrator = SyncOrchestrator::with_features(Arc::clone(&features), &shutdown);
        let coordinator = MultiTargetCoordinator::with_factory(
            orchestrator.clone(),
            filesystem_device_factory(),
            config.sync.event_capacity,
            &shutdown,
        );

        for provider in &config.providers {
            orchestrator.register_provider(
                provider.name.clone(),
                Arc::new(FilesystemSyncProvider::new(&provider.root)),
            );
        }

        for cfg in &config.configurations {
            orchestrator
                .add_configuration(cfg.clone())
                .with_context(|| format!("Failed to add configuration '{}'", cfg.name))?;
        }

        for cfg in &config.multi_target {
            coordinator
                .register(cfg.clone())
                .with_context(|| format!("Failed to add multi-target configuration '{}'", cfg.name))?;
        }

        info!(
            providers = config.providers.len(),
            configurations = config.configurations.len(),
            multi_target = config.multi_target.len(),
            "Sync engine built"
        );

        Ok(Self {
            orchestrator,
            coordinator,
            features,
            shutdown,
        })
    }

    /// Initializes providers and marks both subsystems running
    ///
    /// A provider that fails to initialize is logged and left registered;
    /// its configurations fail until the backend comes back.
    pub async fn start(&self) {
        let failed = self.orchestrator.initialize_providers().await;
        if !failed.is_empty() {
            warn!(providers = ?failed, "Some providers failed to initialize");
        }
        self.coordinator.start();
        info!("Sync engine started");
    }

    #[must_use]
    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    #[must_use]
    pub fn coordinator(&self) -> &MultiTargetCoordinator {
        &self.coordinator
    }

    /// Status of every single-target configuration, derived ones included
    #[must_use]
    pub fn statuses(&self) -> Vec<ConfigurationStatus> {
        self.orchestrator.statuses()
    }

    #[must_use]
    pub fn features(&self) -> Vec<FeatureStatus> {
        self.features.snapshot()
    }

    pub fn subscribe_features(&self) -> broadcast::Receiver<FeatureStatus> {
        self.features.subscribe()
    }

    pub fn subscribe_results(&self) -> broadcast::Receiver<SyncResultEvent> {
        self.coordinator.subscribe()
    }

    /// Forwards a device arrival to the coordinator
    pub async fn device_connected(
        &self,
        identifier: &str,
        volume_label: Option<String>,
        serial_number: Option<String>,
    ) -> Vec<SyncResultEvent> {
        self.coordinator
            .on_device_connected(identifier, volume_label, serial_number)
            .await
    }

    /// Forwards a device removal to the coordinator
    pub fn device_disconnected(&self, identifier: &str) -> usize {
        self.coordinator.on_device_disconnected(identifier)
    }

    /// Stops every trigger; passes already running are left to finish
    pub fn shutdown(&self) {
        info!("Shutting down sync engine");
        self.coordinator.shutdown();
        self.orchestrator.shutdown();
        self.shutdown.cancel();
    }

    /// Waits for in-flight passes of both subsystems, at most `timeout`
    ///
    /// Returns `true` if everything finished in time.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let (single, multi) = tokio::join!(
            self.orchestrator.wait_idle(timeout),
            self.coordinator.wait_idle(timeout)
        );
        single && multi
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use fencesync_core::config::ConfigBuilder;
    use fencesync_core::domain::{
        FeatureState, MultiTargetSyncConfiguration, RelativePath, SyncConfiguration, SyncStatus,
        SyncTarget,
    };
    use tempfile::TempDir;

    use super::*;
    use crate::status::{CLOUD_SYNC_FEATURE, DEVICE_SYNC_FEATURE};

    #[tokio::test]
    async fn builds_from_config_and_syncs() {
        let local = TempDir::new().unwrap();
        let share = TempDir::new().unwrap();
        std::fs::write(local.path().join("notes.txt"), b"notes").unwrap();

        let cfg = SyncConfiguration::new(
            "Notes",
            local.path(),
            RelativePath::new("notes").unwrap(),
            "share",
        );
        let id = cfg.id;
        let config = ConfigBuilder::new()
            .provider("share", share.path().to_path_buf())
            .configuration(cfg)
            .build();

        let engine = SyncEngine::from_config(&config).unwrap();
        engine.start().await;

        assert!(engine.orchestrator().sync_now(id).await.unwrap());
        assert!(share.path().join("notes").join("notes.txt").exists());
        let status = &engine.statuses()[0];
        assert_eq!(status.last_status, SyncStatus::Success);
    }

    #[tokio::test]
    async fn rejects_configuration_with_unknown_provider() {
        let cfg = SyncConfiguration::new("Docs", "/tmp/docs", RelativePath::root(), "missing");
        let config = ConfigBuilder::new().configuration(cfg).build();

        let err = SyncEngine::from_config(&config).err().unwrap();
        assert!(format!("{err:#}").contains("Docs"));
    }

    #[tokio::test]
    async fn start_and_shutdown_drive_feature_states() {
        let share = TempDir::new().unwrap();
        let usb = TempDir::new().unwrap();
        let config = ConfigBuilder::new()
            .provider("share", share.path().to_path_buf())
            .multi_target(
                MultiTargetSyncConfiguration::new("Photos", share.path())
                    .with_target(SyncTarget::device("USB", usb.path().to_string_lossy())),
            )
            .build();

        let engine = SyncEngine::from_config(&config).unwrap();
        engine.start().await;
        let running: Vec<_> = engine.features().into_iter().map(|f| f.state).collect();
        assert_eq!(running, vec![FeatureState::Running, FeatureState::Running]);

        engine.shutdown();
        let board = engine.features();
        let state = |id: &str| board.iter().find(|f| f.id == id).unwrap().state;
        assert_eq!(state(CLOUD_SYNC_FEATURE), FeatureState::Stopped);
        assert_eq!(state(DEVICE_SYNC_FEATURE), FeatureState::Stopped);
        assert!(engine.wait_idle(Duration::from_secs(1)).await);
    }
}

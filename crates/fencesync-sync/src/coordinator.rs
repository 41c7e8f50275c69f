//! Multi-target coordination
//!
//! The [`MultiTargetCoordinator`] owns multi-target configurations. Cloud
//! targets are delegated to the [`SyncOrchestrator`] as derived
//! single-target configurations; device targets are synchronized here,
//! through providers created on demand when the external device notifier
//! reports a connected mount.
//!
//! ## Device lifecycle
//!
//! ```text
//! on_device_connected ──→ match targets (identifier > label > serial)
//!                          ──→ mark available, bind to mount
//!                          ──→ create + initialize provider (cached per mount)
//!                          ──→ run every match concurrently ──→ SyncResultEvent
//! on_device_disconnected ──→ mark unavailable, unbind, drop provider
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use fencesync_core::{
    domain::{
        ConfigurationId, DeviceIdentity, FeatureState, MultiTargetStrategy,
        MultiTargetSyncConfiguration, SyncResultEvent, SyncStatus, SyncTarget, TargetId,
        TargetKind,
    },
    ports::{DeviceProviderFactory, DeviceSyncProvider, SyncProvider},
};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    filesystem::FilesystemSyncProvider,
    orchestrator::{RunOutcome, SyncOrchestrator},
    patterns::FilePatterns,
    scheduler::{InFlightTracker, PeriodicTrigger, RunGate},
    status::{FeatureBoard, DEVICE_SYNC_FEATURE},
    transfer::{run_transfer, TransferRequest},
    SyncError,
};

/// Factory building a [`FilesystemSyncProvider`] rooted at the mount
#[must_use]
pub fn filesystem_device_factory() -> DeviceProviderFactory {
    Arc::new(|identity: &DeviceIdentity| -> Arc<dyn DeviceSyncProvider> {
        Arc::new(FilesystemSyncProvider::for_device(identity))
    })
}

/// Normalized form of a mount identifier, used as cache and binding key
fn mount_key(identifier: &str) -> String {
    identifier
        .trim()
        .trim_end_matches(&['/', '\\'][..])
        .to_ascii_lowercase()
}

// ============================================================================
// Internal state
// ============================================================================

struct MultiEntry {
    config: MultiTargetSyncConfiguration,
    /// Cloud target → orchestrator configuration
    derived: HashMap<TargetId, ConfigurationId>,
    /// Device target → identifier of the mount it is currently bound to
    bound: HashMap<TargetId, String>,
    gates: HashMap<TargetId, Arc<RunGate>>,
    trigger: Option<PeriodicTrigger>,
}

impl MultiEntry {
    fn gate(&mut self, target: TargetId) -> Arc<RunGate> {
        Arc::clone(self.gates.entry(target).or_default())
    }
}

#[derive(Default)]
struct State {
    entries: Vec<MultiEntry>,
    /// Connected device providers by mount key
    devices: HashMap<String, Arc<dyn DeviceSyncProvider>>,
}

impl State {
    fn entry(&self, id: ConfigurationId) -> Option<&MultiEntry> {
        self.entries.iter().find(|e| e.config.id == id)
    }

    fn entry_mut(&mut self, id: ConfigurationId) -> Option<&mut MultiEntry> {
        self.entries.iter_mut().find(|e| e.config.id == id)
    }
}

struct Inner {
    orchestrator: SyncOrchestrator,
    factory: DeviceProviderFactory,
    state: Mutex<State>,
    events: broadcast::Sender<SyncResultEvent>,
    features: Arc<FeatureBoard>,
    shutdown: CancellationToken,
    in_flight: InFlightTracker,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

enum ReachCheck {
    Cloud(Arc<dyn SyncProvider>),
    Device(Arc<dyn DeviceSyncProvider>),
}

/// Availability check for one target
struct Reachability {
    target: TargetId,
    mount: Option<String>,
    check: Option<ReachCheck>,
}

/// One (configuration, target) pair to synchronize
#[derive(Debug, Clone, Copy)]
struct Job {
    config: ConfigurationId,
    target: TargetId,
    kind: TargetKind,
}

// ============================================================================
// MultiTargetCoordinator
// ============================================================================

/// Owner of multi-target configurations and device connectivity
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct MultiTargetCoordinator {
    inner: Arc<Inner>,
}

impl MultiTargetCoordinator {
    /// Creates a coordinator using filesystem device providers
    #[must_use]
    pub fn new(orchestrator: SyncOrchestrator) -> Self {
        Self::with_factory(
            orchestrator,
            filesystem_device_factory(),
            64,
            &CancellationToken::new(),
        )
    }

    /// Creates a coordinator with a custom device provider factory
    ///
    /// `event_capacity` bounds the result broadcast buffer. Triggers are
    /// children of `parent`.
    #[must_use]
    pub fn with_factory(
        orchestrator: SyncOrchestrator,
        factory: DeviceProviderFactory,
        event_capacity: usize,
        parent: &CancellationToken,
    ) -> Self {
        let features = Arc::clone(orchestrator.features());
        features.register(DEVICE_SYNC_FEATURE, "Device sync");
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                orchestrator,
                factory,
                state: Mutex::new(State::default()),
                events,
                features,
                shutdown: parent.child_token(),
                in_flight: InFlightTracker::new(),
            }),
        }
    }

    #[must_use]
    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.inner.orchestrator
    }

    /// Subscribes to the outcome of every target sync attempt
    pub fn subscribe(&self) -> broadcast::Receiver<SyncResultEvent> {
        self.inner.events.subscribe()
    }

    /// Marks the device subsystem running
    pub fn start(&self) {
        self.inner
            .features
            .set_state(DEVICE_SYNC_FEATURE, FeatureState::Running, None);
    }

    // ------------------------------------------------------------------
    // Configurations
    // ------------------------------------------------------------------

    /// Registers a multi-target configuration
    ///
    /// Every cloud target becomes a derived single-target configuration in
    /// the orchestrator. Under `AllTargets` the derived configurations carry
    /// the cloud interval; under the single-target strategies they are
    /// manual and this coordinator owns one periodic trigger instead.
    ///
    /// # Errors
    /// Returns [`SyncError::Configuration`] if the configuration is invalid,
    /// its id is already registered, or a derived configuration is rejected
    /// (e.g. unknown cloud provider). Nothing is registered on failure.
    #[instrument(skip(self, cfg), fields(configuration = %cfg.name))]
    pub fn register(
        &self,
        mut cfg: MultiTargetSyncConfiguration,
    ) -> Result<ConfigurationId, SyncError> {
        let id = cfg.id;
        cfg.validate()
            .map_err(|e| SyncError::Configuration(e.to_string()))?;
        FilePatterns::new(&cfg.include_patterns, &cfg.exclude_patterns)?;
        if self.inner.state().entry(id).is_some() {
            return Err(SyncError::Configuration(format!(
                "multi-target configuration {id} is already registered"
            )));
        }

        for target in &mut cfg.targets {
            target.available = false;
        }

        let derived = self.derive_cloud_configurations(&cfg)?;

        let mut entry = MultiEntry {
            config: cfg,
            derived,
            bound: HashMap::new(),
            gates: HashMap::new(),
            trigger: None,
        };
        self.reschedule(&mut entry);

        let mut state = self.inner.state();
        if state.entry(id).is_some() {
            drop(state);
            self.drop_derived(&entry.derived);
            return Err(SyncError::Configuration(format!(
                "multi-target configuration {id} is already registered"
            )));
        }
        info!(
            %id,
            targets = entry.config.targets.len(),
            strategy = %entry.config.strategy,
            "Registered multi-target configuration"
        );
        state.entries.push(entry);
        Ok(id)
    }

    fn derive_cloud_configurations(
        &self,
        cfg: &MultiTargetSyncConfiguration,
    ) -> Result<HashMap<TargetId, ConfigurationId>, SyncError> {
        let interval = if cfg.strategy == MultiTargetStrategy::AllTargets {
            cfg.cloud_sync_interval_secs
        } else {
            0
        };

        let mut derived = HashMap::new();
        for target in cfg.targets.iter().filter(|t| t.is_cloud()) {
            let single = cfg.derive_cloud_configuration(target, interval);
            // Single-target strategies pick the cloud target per run, so the
            // orchestrator must not run these on its own.
            let added = if cfg.strategy == MultiTargetStrategy::AllTargets {
                self.inner.orchestrator.add_configuration(single)
            } else {
                self.inner.orchestrator.add_owned_configuration(single)
            };
            match added {
                Ok(single_id) => {
                    derived.insert(target.id, single_id);
                }
                Err(e) => {
                    warn!(target = %target.name, error = %e, "Cloud target rejected, rolling back");
                    self.drop_derived(&derived);
                    return Err(e);
                }
            }
        }
        Ok(derived)
    }

    fn drop_derived(&self, derived: &HashMap<TargetId, ConfigurationId>) {
        for single_id in derived.values() {
            if let Err(e) = self.inner.orchestrator.remove_configuration(*single_id) {
                debug!(%single_id, error = %e, "Derived configuration already gone");
            }
        }
    }

    /// Starts the coordinator-owned trigger for single-target strategies
    fn reschedule(&self, entry: &mut MultiEntry) {
        if let Some(trigger) = entry.trigger.take() {
            trigger.cancel();
        }
        let cfg = &entry.config;
        if self.inner.shutdown.is_cancelled()
            || !cfg.enabled
            || cfg.strategy == MultiTargetStrategy::AllTargets
            || cfg.cloud_sync_interval_secs == 0
        {
            return;
        }

        let id = cfg.id;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        entry.trigger = Some(PeriodicTrigger::start(
            cfg.name.clone(),
            Duration::from_secs(cfg.cloud_sync_interval_secs),
            &self.inner.shutdown,
            move || {
                if let Some(inner) = weak.upgrade() {
                    let coordinator = MultiTargetCoordinator { inner };
                    tokio::spawn(async move {
                        coordinator.sync_configuration(id).await;
                    });
                }
            },
        ));
    }

    /// Removes a configuration, its trigger and its derived configurations
    ///
    /// # Errors
    /// Returns [`SyncError::NotFound`] for an unknown id.
    pub fn remove(&self, id: ConfigurationId) -> Result<MultiTargetSyncConfiguration, SyncError> {
        let mut entry = {
            let mut state = self.inner.state();
            let index = state
                .entries
                .iter()
                .position(|e| e.config.id == id)
                .ok_or(SyncError::NotFound(id))?;
            state.entries.remove(index)
        };
        if let Some(trigger) = entry.trigger.take() {
            trigger.cancel();
        }
        self.drop_derived(&entry.derived);
        info!(%id, configuration = %entry.config.name, "Removed multi-target configuration");
        Ok(entry.config)
    }

    /// Enables or disables a configuration and its derived configurations
    ///
    /// # Errors
    /// Returns [`SyncError::NotFound`] for an unknown id.
    pub fn set_enabled(&self, id: ConfigurationId, enabled: bool) -> Result<(), SyncError> {
        let derived: Vec<ConfigurationId> = {
            let mut state = self.inner.state();
            let entry = state.entry_mut(id).ok_or(SyncError::NotFound(id))?;
            if entry.config.enabled == enabled {
                return Ok(());
            }
            entry.config.enabled = enabled;
            self.reschedule(entry);
            entry.derived.values().copied().collect()
        };

        for single_id in derived {
            self.inner.orchestrator.set_enabled(single_id, enabled)?;
        }
        info!(%id, enabled, "Multi-target configuration toggled");
        Ok(())
    }

    /// Snapshots of every configuration, with runtime availability
    #[must_use]
    pub fn configurations(&self) -> Vec<MultiTargetSyncConfiguration> {
        self.inner
            .state()
            .entries
            .iter()
            .map(|e| e.config.clone())
            .collect()
    }

    #[must_use]
    pub fn configuration(&self, id: ConfigurationId) -> Option<MultiTargetSyncConfiguration> {
        self.inner.state().entry(id).map(|e| e.config.clone())
    }

    /// Orchestrator configuration id backing a cloud target
    #[must_use]
    pub fn derived_configuration(
        &self,
        id: ConfigurationId,
        target: TargetId,
    ) -> Option<ConfigurationId> {
        self.inner
            .state()
            .entry(id)
            .and_then(|e| e.derived.get(&target).copied())
    }

    /// Number of live coordinator-owned triggers
    #[must_use]
    pub fn active_trigger_count(&self) -> usize {
        self.inner
            .state()
            .entries
            .iter()
            .filter(|e| e.trigger.as_ref().is_some_and(|t| !t.is_cancelled()))
            .count()
    }

    /// Number of device passes currently executing
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.count()
    }

    // ------------------------------------------------------------------
    // Device lifecycle
    // ------------------------------------------------------------------

    /// Handles a device arrival reported by the external notifier
    ///
    /// Every `auto_sync` device target of every enabled configuration is
    /// matched against the identity. Matches become available, are bound to
    /// this mount and sync concurrently. Returns one event per attempt; the
    /// same events are broadcast to subscribers.
    #[instrument(
        skip(self, identifier, volume_label, serial_number),
        fields(device = %identifier)
    )]
    pub async fn on_device_connected(
        &self,
        identifier: &str,
        volume_label: Option<String>,
        serial_number: Option<String>,
    ) -> Vec<SyncResultEvent> {
        let identity = DeviceIdentity::new(identifier, volume_label, serial_number);
        let key = mount_key(identifier);

        let jobs: Vec<Job> = {
            let mut state = self.inner.state();
            let mut jobs = Vec::new();
            for entry in state.entries.iter_mut().filter(|e| e.config.enabled) {
                for target in entry.config.targets.iter_mut() {
                    if !target.auto_sync {
                        continue;
                    }
                    let Some(rule) = target.match_device(&identity) else {
                        continue;
                    };
                    info!(
                        configuration = %entry.config.name,
                        target = %target.name,
                        rule = %rule,
                        "Device matched target"
                    );
                    target.available = true;
                    entry.bound.insert(target.id, identity.identifier.clone());
                    jobs.push(Job {
                        config: entry.config.id,
                        target: target.id,
                        kind: TargetKind::Device,
                    });
                }
            }
            jobs
        };

        if jobs.is_empty() {
            debug!("No target matches the connected device");
            return Vec::new();
        }

        let provider = match self.device_provider(&key, &identity).await {
            Ok(provider) => provider,
            Err(reason) => {
                warn!(error = %reason, "Device provider could not be initialized");
                return jobs
                    .iter()
                    .filter_map(|job| self.inner.failure_event(job, &identity.identifier, &reason))
                    .collect();
            }
        };

        let mut runs = JoinSet::new();
        for job in jobs {
            let inner = Arc::clone(&self.inner);
            let provider = Arc::clone(&provider);
            runs.spawn(async move { Inner::run_device_job(inner, job, provider).await });
        }
        collect_events(runs).await
    }

    /// Handles a device removal reported by the external notifier
    ///
    /// Every target whose identifier or bound mount equals `identifier`
    /// becomes unavailable. Returns the number of targets affected.
    #[instrument(skip(self, identifier), fields(device = %identifier))]
    pub fn on_device_disconnected(&self, identifier: &str) -> usize {
        let key = mount_key(identifier);
        let mut state = self.inner.state();
        let mut affected = 0;
        for entry in state.entries.iter_mut() {
            for target in entry.config.targets.iter_mut().filter(|t| t.is_device()) {
                let bound_here = entry
                    .bound
                    .get(&target.id)
                    .is_some_and(|mount| mount_key(mount) == key);
                if bound_here || mount_key(&target.identifier) == key {
                    entry.bound.remove(&target.id);
                    if target.available {
                        affected += 1;
                    }
                    target.available = false;
                }
            }
        }
        state.devices.remove(&key);
        info!(targets = affected, "Device disconnected");
        affected
    }

    /// Cached provider for a mount, created and initialized on first use
    async fn device_provider(
        &self,
        key: &str,
        identity: &DeviceIdentity,
    ) -> Result<Arc<dyn DeviceSyncProvider>, String> {
        let cached = self.inner.state().devices.get(key).cloned();
        if let Some(provider) = cached {
            return Ok(provider);
        }

        let provider = (self.inner.factory)(identity);
        provider.initialize().await.map_err(|e| e.to_string())?;

        let mut state = self.inner.state();
        // The device may have been unplugged while initializing.
        let still_bound = state
            .entries
            .iter()
            .any(|e| e.bound.values().any(|mount| mount_key(mount) == key));
        if !still_bound {
            debug!(mount = key, "Device disconnected during initialization");
            return Err("device was disconnected during initialization".to_string());
        }
        let provider = Arc::clone(state.devices.entry(key.to_string()).or_insert(provider));
        debug!(mount = key, "Device provider ready");
        Ok(provider)
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    /// Synchronizes every enabled configuration concurrently
    pub async fn sync_all(&self) -> Vec<SyncResultEvent> {
        let ids: Vec<ConfigurationId> = self
            .inner
            .state()
            .entries
            .iter()
            .filter(|e| e.config.enabled)
            .map(|e| e.config.id)
            .collect();

        let mut runs = JoinSet::new();
        for id in ids {
            let coordinator = self.clone();
            runs.spawn(async move { coordinator.sync_configuration(id).await });
        }

        let mut events = Vec::new();
        while let Some(joined) = runs.join_next().await {
            match joined {
                Ok(mut batch) => events.append(&mut batch),
                Err(e) => warn!(error = %e, "Multi-target run aborted"),
            }
        }
        events
    }

    /// Refreshes availability of one configuration's targets, then runs
    /// the targets its strategy selects
    ///
    /// Unknown or disabled configurations produce no events.
    pub async fn sync_configuration(&self, id: ConfigurationId) -> Vec<SyncResultEvent> {
        self.refresh_availability(id).await;

        let jobs: Vec<Job> = {
            let state = self.inner.state();
            let Some(entry) = state.entry(id).filter(|e| e.config.enabled) else {
                return Vec::new();
            };
            entry
                .config
                .select_targets()
                .into_iter()
                .map(|t| Job {
                    config: id,
                    target: t.id,
                    kind: t.kind,
                })
                .collect()
        };

        if jobs.is_empty() {
            debug!(%id, "No available target selected");
            return Vec::new();
        }

        let mut runs = JoinSet::new();
        for job in jobs {
            let inner = Arc::clone(&self.inner);
            runs.spawn(async move {
                match job.kind {
                    TargetKind::Cloud => {
                        inner.run_cloud_job(job).await.into_iter().collect::<Vec<_>>()
                    }
                    TargetKind::Device => match inner.bound_provider(job) {
                        Some(provider) => Inner::run_device_job(inner, job, provider).await,
                        None => Vec::new(),
                    },
                }
            });
        }
        collect_events(runs).await
    }

    /// Cloud targets are available while their provider is authenticated,
    /// device targets while their bound provider is connected
    ///
    /// A device target whose mount went away is unbound.
    async fn refresh_availability(&self, id: ConfigurationId) {
        let checks: Vec<Reachability> = {
            let state = self.inner.state();
            let Some(entry) = state.entry(id) else {
                return;
            };
            entry
                .config
                .targets
                .iter()
                .map(|t| match t.kind {
                    TargetKind::Cloud => Reachability {
                        target: t.id,
                        mount: None,
                        check: self
                            .inner
                            .orchestrator
                            .provider(&t.identifier)
                            .map(ReachCheck::Cloud),
                    },
                    TargetKind::Device => {
                        let mount = entry.bound.get(&t.id).cloned();
                        let check = mount
                            .as_ref()
                            .and_then(|m| state.devices.get(&mount_key(m)).cloned())
                            .map(ReachCheck::Device);
                        Reachability {
                            target: t.id,
                            mount,
                            check,
                        }
                    }
                })
                .collect()
        };

        let mut results = Vec::with_capacity(checks.len());
        for reach in checks {
            let available = match &reach.check {
                Some(ReachCheck::Cloud(provider)) => provider.is_authenticated().await,
                Some(ReachCheck::Device(provider)) => provider.is_connected().await,
                None => false,
            };
            results.push((reach.target, available, reach.mount));
        }

        let mut state = self.inner.state();
        let mut stale_mounts = Vec::new();
        if let Some(entry) = state.entry_mut(id) {
            for (target_id, available, mount) in results {
                if let Some(target) = entry.config.target_mut(target_id) {
                    target.available = available;
                }
                if let (false, Some(mount)) = (available, mount) {
                    debug!(target = %target_id, mount = %mount, "Bound device no longer connected");
                    entry.bound.remove(&target_id);
                    stale_mounts.push(mount_key(&mount));
                }
            }
        }
        for key in stale_mounts {
            state.devices.remove(&key);
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Cancels coordinator triggers; device passes in flight complete
    pub fn shutdown(&self) {
        let features = &self.inner.features;
        features.set_state(DEVICE_SYNC_FEATURE, FeatureState::Stopping, None);
        self.inner.shutdown.cancel();
        {
            let mut state = self.inner.state();
            for entry in state.entries.iter_mut() {
                entry.trigger = None;
            }
        }
        info!("Multi-target coordinator shut down");
        features.set_state(DEVICE_SYNC_FEATURE, FeatureState::Stopped, None);
    }

    /// Waits until no device pass is executing, at most `timeout`
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.inner.in_flight.wait_idle(timeout).await
    }
}

async fn collect_events(mut runs: JoinSet<Vec<SyncResultEvent>>) -> Vec<SyncResultEvent> {
    let mut events = Vec::new();
    while let Some(joined) = runs.join_next().await {
        match joined {
            Ok(mut batch) => events.append(&mut batch),
            Err(e) => warn!(error = %e, "Target run aborted"),
        }
    }
    events
}

// ============================================================================
// Per-target passes
// ============================================================================

impl Inner {
    fn publish(&self, event: &SyncResultEvent) {
        // Err only means nobody is listening.
        let _ = self.events.send(event.clone());
    }

    fn bound_provider(&self, job: Job) -> Option<Arc<dyn DeviceSyncProvider>> {
        let state = self.state();
        let mount = state.entry(job.config)?.bound.get(&job.target)?;
        state.devices.get(&mount_key(mount)).cloned()
    }

    fn failure_event(
        &self,
        job: &Job,
        drive_identifier: &str,
        reason: &str,
    ) -> Option<SyncResultEvent> {
        let event = {
            let state = self.state();
            let entry = state.entry(job.config)?;
            let target = entry.config.target(job.target)?;
            SyncResultEvent {
                configuration_id: job.config,
                configuration_name: entry.config.name.clone(),
                target_name: target.name.clone(),
                drive_identifier: drive_identifier.to_string(),
                volume_label: target.volume_label.clone(),
                success: false,
                error_message: Some(reason.to_string()),
            }
        };
        self.publish(&event);
        Some(event)
    }

    fn mark_synced(&self, job: &Job) {
        let mut state = self.state();
        if let Some(target) = state
            .entry_mut(job.config)
            .and_then(|e| e.config.target_mut(job.target))
        {
            target.last_sync_time = Some(Utc::now());
        }
    }

    /// Runs a device job under its gate, including one coalesced rerun
    async fn run_device_job(
        inner: Arc<Inner>,
        job: Job,
        provider: Arc<dyn DeviceSyncProvider>,
    ) -> Vec<SyncResultEvent> {
        let gate = {
            let mut state = inner.state();
            match state.entry_mut(job.config) {
                Some(entry) => entry.gate(job.target),
                None => return Vec::new(),
            }
        };
        if !gate.try_begin() {
            debug!(target = %job.target, "Device pass already running, coalesced");
            return Vec::new();
        }

        let mut events = Vec::new();
        loop {
            events.extend(inner.device_pass(&job, &provider).await);
            if !gate.finish() {
                break;
            }
        }
        events
    }

    async fn device_pass(
        &self,
        job: &Job,
        provider: &Arc<dyn DeviceSyncProvider>,
    ) -> Option<SyncResultEvent> {
        let (config_name, target, request) = {
            let state = self.state();
            let entry = state.entry(job.config)?;
            let target: SyncTarget = entry.config.target(job.target)?.clone();
            let request = TransferRequest::for_target(&entry.config, &target);
            (entry.config.name.clone(), target, request)
        };

        let volume_label = provider
            .describe_device()
            .await
            .and_then(|d| d.volume_label)
            .or_else(|| target.volume_label.clone());
        let drive_identifier = self
            .state()
            .entry(job.config)
            .and_then(|e| e.bound.get(&job.target).cloned())
            .unwrap_or_else(|| target.identifier.clone());

        info!(configuration = %config_name, target = %target.name, "Device sync started");
        let outcome = match request {
            Err(e) => Err(e.to_string()),
            Ok(request) => {
                let _guard = self.in_flight.enter();
                let provider = Arc::clone(provider);
                let handle =
                    tokio::spawn(async move { run_transfer(provider.as_ref(), &request).await });
                match handle.await {
                    Ok(Ok(report)) if report.status() == SyncStatus::Success => Ok(()),
                    Ok(Ok(report)) => Err(report.error_summary().unwrap_or_default()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(e) => Err(SyncError::Unexpected(e.to_string()).to_string()),
                }
            }
        };

        match &outcome {
            Ok(()) => {
                self.mark_synced(job);
                info!(configuration = %config_name, target = %target.name, "Device sync succeeded");
            }
            Err(e) => {
                warn!(configuration = %config_name, target = %target.name, error = %e, "Device sync failed")
            }
        }

        let event = SyncResultEvent {
            configuration_id: job.config,
            configuration_name: config_name,
            target_name: target.name,
            drive_identifier,
            volume_label,
            success: outcome.is_ok(),
            error_message: outcome.err(),
        };
        self.publish(&event);
        Some(event)
    }

    /// Runs a cloud target through its derived orchestrator configuration
    ///
    /// A request coalesced into a run already in flight publishes nothing;
    /// the run in flight reports the result.
    async fn run_cloud_job(&self, job: Job) -> Option<SyncResultEvent> {
        let (config_name, target, derived) = {
            let state = self.state();
            let entry = state.entry(job.config)?;
            let target = entry.config.target(job.target)?.clone();
            let derived = *entry.derived.get(&job.target)?;
            (entry.config.name.clone(), target, derived)
        };

        let outcome = match self.orchestrator.run_now(derived).await {
            Ok(RunOutcome::Coalesced) => {
                debug!(target = %target.name, "Cloud target already running, coalesced");
                return None;
            }
            Ok(RunOutcome::Finished(SyncStatus::Success)) => Ok(()),
            Ok(RunOutcome::Finished(status)) => Err(self
                .orchestrator
                .configuration(derived)
                .and_then(|c| c.status.last_error)
                .unwrap_or_else(|| format!("run ended {status}"))),
            Err(e) => Err(e.to_string()),
        };

        if outcome.is_ok() {
            self.mark_synced(&job);
        }

        let event = SyncResultEvent {
            configuration_id: job.config,
            configuration_name: config_name,
            target_name: target.name,
            drive_identifier: target.identifier,
            volume_label: None,
            success: outcome.is_ok(),
            error_message: outcome.err(),
        };
        self.publish(&event);
        Some(event)
    }
}

// ============================================================================
// Unit tests
// ============================================================================

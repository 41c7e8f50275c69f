//! Single-target orchestration
//!
//! The [`SyncOrchestrator`] owns the registry of named providers and the
//! single-target configurations, one periodic trigger per scheduled
//! configuration, and the run bookkeeping behind the status surface.
//!
//! ## Concurrency
//!
//! - All registries sit behind one `std::sync::Mutex` that is only held to
//!   snapshot or update state, never across an `.await`.
//! - Every run executes in its own Tokio task. A panic inside a run surfaces
//!   as a `JoinError` and is recorded as `Failed`.
//! - A [`RunGate`] per configuration coalesces overlapping ticks and manual
//!   requests into at most one pending rerun; different configurations run
//!   in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use fencesync_core::{
    domain::{ConfigurationId, ConfigurationStatus, FeatureState, SyncConfiguration, SyncStatus},
    ports::SyncProvider,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    scheduler::{InFlightTracker, PeriodicTrigger, RunGate},
    status::{FeatureBoard, CLOUD_SYNC_FEATURE},
    transfer::{run_transfer, TransferRequest},
    SyncError,
};

// ============================================================================
// Internal state
// ============================================================================

/// What became of a run request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run (and any rerun requested meanwhile) ended with this status
    Finished(SyncStatus),
    /// Another run was in flight; it will run once more on this request's
    /// behalf
    Coalesced,
}

struct ConfigEntry {
    config: SyncConfiguration,
    trigger: Option<PeriodicTrigger>,
    gate: Arc<RunGate>,
    /// Run only on request of its owner, never by `sync_all`
    owned: bool,
}

#[derive(Default)]
struct State {
    providers: HashMap<String, Arc<dyn SyncProvider>>,
    /// Registration order is kept for stable listings
    configurations: Vec<ConfigEntry>,
}

impl State {
    fn entry(&self, id: ConfigurationId) -> Option<&ConfigEntry> {
        self.configurations.iter().find(|e| e.config.id == id)
    }

    fn entry_mut(&mut self, id: ConfigurationId) -> Option<&mut ConfigEntry> {
        self.configurations.iter_mut().find(|e| e.config.id == id)
    }
}

struct Inner {
    state: Mutex<State>,
    shutdown: CancellationToken,
    features: Arc<FeatureBoard>,
    in_flight: InFlightTracker,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ============================================================================
// SyncOrchestrator
// ============================================================================

/// Registry of providers and single-target configurations
///
/// Cheap to clone; clones share the same registries.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator with its own feature board and shutdown token
    #[must_use]
    pub fn new() -> Self {
        Self::with_features(Arc::new(FeatureBoard::default()), &CancellationToken::new())
    }

    /// Creates an orchestrator reporting to `features`, shut down together
    /// with `parent`
    #[must_use]
    pub fn with_features(features: Arc<FeatureBoard>, parent: &CancellationToken) -> Self {
        features.register(CLOUD_SYNC_FEATURE, "Cloud sync");
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                shutdown: parent.child_token(),
                features,
                in_flight: InFlightTracker::new(),
            }),
        }
    }

    pub fn features(&self) -> &Arc<FeatureBoard> {
        &self.inner.features
    }

    // ------------------------------------------------------------------
    // Providers
    // ------------------------------------------------------------------

    /// Registers `provider` under `name`, replacing any previous one
    pub fn register_provider(&self, name: impl Into<String>, provider: Arc<dyn SyncProvider>) {
        let name = name.into();
        let replaced = self
            .inner
            .state()
            .providers
            .insert(name.clone(), provider)
            .is_some();
        info!(provider = %name, replaced, "Registered sync provider");
    }

    #[must_use]
    pub fn provider(&self, name: &str) -> Option<Arc<dyn SyncProvider>> {
        self.inner.state().providers.get(name).cloned()
    }

    /// Registered provider names, sorted
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.state().providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Initializes every registered provider
    ///
    /// Failures are logged and do not stop the others. Returns the names of
    /// the providers that failed.
    pub async fn initialize_providers(&self) -> Vec<String> {
        let features = &self.inner.features;
        features.set_state(CLOUD_SYNC_FEATURE, FeatureState::Starting, None);

        let providers: Vec<(String, Arc<dyn SyncProvider>)> = self
            .inner
            .state()
            .providers
            .iter()
            .map(|(name, p)| (name.clone(), Arc::clone(p)))
            .collect();

        let mut failed = Vec::new();
        for (name, provider) in &providers {
            match provider.initialize().await {
                Ok(()) => debug!(provider = %name, "Provider initialized"),
                Err(e) => {
                    warn!(provider = %name, error = %e, "Provider failed to initialize");
                    failed.push(name.clone());
                }
            }
        }
        failed.sort();

        if !providers.is_empty() && failed.len() == providers.len() {
            features.set_state(
                CLOUD_SYNC_FEATURE,
                FeatureState::Error,
                Some(format!("no provider could be initialized: {}", failed.join(", "))),
            );
        } else {
            features.set_state(CLOUD_SYNC_FEATURE, FeatureState::Running, None);
        }
        failed
    }

    // ------------------------------------------------------------------
    // Configurations
    // ------------------------------------------------------------------

    fn check_configuration(state: &State, cfg: &SyncConfiguration) -> Result<(), SyncError> {
        cfg.validate()
            .map_err(|e| SyncError::Configuration(e.to_string()))?;
        if !state.providers.contains_key(&cfg.provider_name) {
            return Err(SyncError::Configuration(format!(
                "provider '{}' is not registered",
                cfg.provider_name
            )));
        }
        TransferRequest::for_configuration(cfg)?;
        Ok(())
    }

    /// Adds a configuration and starts its trigger when scheduled
    ///
    /// # Errors
    /// Returns [`SyncError::Configuration`] for an unregistered provider,
    /// malformed patterns, structural validation failures or a duplicate id.
    /// A rejected configuration is never added.
    pub fn add_configuration(&self, cfg: SyncConfiguration) -> Result<ConfigurationId, SyncError> {
        self.insert_configuration(cfg, false)
    }

    /// Adds a configuration whose runs are chosen by another component
    ///
    /// It is skipped by [`sync_all`](Self::sync_all); only
    /// [`sync_now`](Self::sync_now) and its own trigger run it. Used for
    /// cloud targets of multi-target configurations whose strategy picks a
    /// single target per run.
    ///
    /// # Errors
    /// Same as [`add_configuration`](Self::add_configuration).
    pub fn add_owned_configuration(
        &self,
        cfg: SyncConfiguration,
    ) -> Result<ConfigurationId, SyncError> {
        self.insert_configuration(cfg, true)
    }

    #[instrument(skip(self, cfg), fields(configuration = %cfg.name))]
    fn insert_configuration(
        &self,
        mut cfg: SyncConfiguration,
        owned: bool,
    ) -> Result<ConfigurationId, SyncError> {
        let id = cfg.id;
        let mut state = self.inner.state();
        Self::check_configuration(&state, &cfg)?;
        if state.entry(id).is_some() {
            return Err(SyncError::Configuration(format!(
                "configuration {id} is already registered"
            )));
        }

        if cfg.status.recover_interrupted() {
            warn!("Recovered configuration left in progress by a previous run");
        }

        let mut entry = ConfigEntry {
            config: cfg,
            trigger: None,
            gate: Arc::new(RunGate::new()),
            owned,
        };
        self.reschedule(&mut entry);
        state.configurations.push(entry);

        info!(%id, owned, "Added sync configuration");
        Ok(id)
    }

    /// Cancels the trigger of a configuration, then removes it
    ///
    /// # Errors
    /// Returns [`SyncError::NotFound`] for an unknown id.
    pub fn remove_configuration(
        &self,
        id: ConfigurationId,
    ) -> Result<SyncConfiguration, SyncError> {
        let mut state = self.inner.state();
        let index = state
            .configurations
            .iter()
            .position(|e| e.config.id == id)
            .ok_or(SyncError::NotFound(id))?;

        let mut entry = state.configurations.remove(index);
        if let Some(trigger) = entry.trigger.take() {
            trigger.cancel();
        }
        info!(%id, configuration = %entry.config.name, "Removed sync configuration");
        Ok(entry.config)
    }

    /// Enables or disables a configuration, starting or cancelling its trigger
    ///
    /// # Errors
    /// Returns [`SyncError::NotFound`] for an unknown id.
    pub fn set_enabled(&self, id: ConfigurationId, enabled: bool) -> Result<(), SyncError> {
        let mut state = self.inner.state();
        let entry = state.entry_mut(id).ok_or(SyncError::NotFound(id))?;
        if entry.config.enabled != enabled {
            entry.config.enabled = enabled;
            self.reschedule(entry);
            info!(%id, enabled, "Configuration toggled");
        }
        Ok(())
    }

    /// Replaces a configuration's settings, keeping its run status
    ///
    /// # Errors
    /// [`SyncError::NotFound`] for an unknown id, [`SyncError::Configuration`]
    /// for the same reasons as [`add_configuration`](Self::add_configuration).
    pub fn update_configuration(&self, mut cfg: SyncConfiguration) -> Result<(), SyncError> {
        let id = cfg.id;
        let mut state = self.inner.state();
        Self::check_configuration(&state, &cfg)?;
        let entry = state.entry_mut(id).ok_or(SyncError::NotFound(id))?;

        cfg.status = entry.config.status.clone();
        entry.config = cfg;
        self.reschedule(entry);
        info!(%id, configuration = %entry.config.name, "Updated sync configuration");
        Ok(())
    }

    /// Drops the current trigger and starts a new one if the configuration
    /// is scheduled and the orchestrator is not shut down
    fn reschedule(&self, entry: &mut ConfigEntry) {
        if let Some(trigger) = entry.trigger.take() {
            trigger.cancel();
        }
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let Some(period) = entry.config.interval().filter(|_| entry.config.enabled) else {
            return;
        };

        let id = entry.config.id;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        entry.trigger = Some(PeriodicTrigger::start(
            entry.config.name.clone(),
            period,
            &self.inner.shutdown,
            move || {
                if let Some(inner) = weak.upgrade() {
                    let orchestrator = SyncOrchestrator { inner };
                    tokio::spawn(async move {
                        let _ = orchestrator.sync_now(id).await;
                    });
                }
            },
        ));
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    /// Runs a configuration now
    ///
    /// Returns `Ok(true)` iff the run finished with `Success`. If a run of
    /// this configuration is already in flight, the request is coalesced
    /// into one pending rerun and `Ok(false)` is returned immediately.
    ///
    /// # Errors
    /// Returns [`SyncError::NotFound`] for an unknown id.
    pub async fn sync_now(&self, id: ConfigurationId) -> Result<bool, SyncError> {
        Ok(self.run_now(id).await? == RunOutcome::Finished(SyncStatus::Success))
    }

    /// Runs a configuration now, telling a coalesced request apart from a
    /// finished run
    ///
    /// # Errors
    /// Returns [`SyncError::NotFound`] for an unknown id.
    pub async fn run_now(&self, id: ConfigurationId) -> Result<RunOutcome, SyncError> {
        let gate = {
            let state = self.inner.state();
            Arc::clone(&state.entry(id).ok_or(SyncError::NotFound(id))?.gate)
        };

        if !gate.try_begin() {
            debug!(%id, "Run already in flight, coalesced into pending rerun");
            return Ok(RunOutcome::Coalesced);
        }

        let mut status = self.run_once(id).await;
        while gate.finish() {
            debug!(%id, "Running coalesced rerun");
            status = self.run_once(id).await;
        }
        Ok(RunOutcome::Finished(status))
    }

    /// Runs every enabled configuration concurrently, except owned ones
    ///
    /// Returns one entry per configuration that was started.
    pub async fn sync_all(&self) -> Vec<(ConfigurationId, Result<bool, SyncError>)> {
        let ids: Vec<ConfigurationId> = self
            .inner
            .state()
            .configurations
            .iter()
            .filter(|e| e.config.enabled && !e.owned)
            .map(|e| e.config.id)
            .collect();

        let mut runs = JoinSet::new();
        for id in ids {
            let orchestrator = self.clone();
            runs.spawn(async move { (id, orchestrator.sync_now(id).await) });
        }

        let mut results = Vec::new();
        while let Some(joined) = runs.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "sync_all task aborted"),
            }
        }
        results
    }

    /// One pass of one configuration; the caller owns its gate
    async fn run_once(&self, id: ConfigurationId) -> SyncStatus {
        let (name, provider, request) = {
            let mut state = self.inner.state();
            let Some(entry) = state.entry_mut(id) else {
                return SyncStatus::Failed;
            };
            if let Err(e) = entry.config.status.begin() {
                warn!(%id, error = %e, "Cannot start run");
                return SyncStatus::Failed;
            }
            let name = entry.config.name.clone();
            let provider_name = entry.config.provider_name.clone();
            let request = TransferRequest::for_configuration(&entry.config);
            let provider = state.providers.get(&provider_name).cloned();
            (name, provider, request)
        };

        let (status, error) = match (provider, request) {
            (None, _) => (
                SyncStatus::Failed,
                Some("provider is no longer registered".to_string()),
            ),
            (_, Err(e)) => (SyncStatus::Failed, Some(e.to_string())),
            (Some(provider), Ok(request)) => {
                let _guard = self.inner.in_flight.enter();
                info!(configuration = %name, "Sync run started");
                let handle =
                    tokio::spawn(async move { run_transfer(provider.as_ref(), &request).await });
                match handle.await {
                    Ok(Ok(report)) => (report.status(), report.error_summary()),
                    Ok(Err(e)) => (SyncStatus::Failed, Some(e.to_string())),
                    Err(e) => (
                        SyncStatus::Failed,
                        Some(SyncError::Unexpected(e.to_string()).to_string()),
                    ),
                }
            }
        };

        match &error {
            None => info!(configuration = %name, %status, "Sync run finished"),
            Some(e) => {
                warn!(configuration = %name, %status, error = %e, "Sync run finished with errors")
            }
        }

        if let Some(entry) = self.inner.state().entry_mut(id) {
            if let Err(e) = entry.config.status.complete(status, error) {
                warn!(%id, error = %e, "Could not record run outcome");
            }
        }
        status
    }

    // ------------------------------------------------------------------
    // Status queries
    // ------------------------------------------------------------------

    #[must_use]
    pub fn configurations(&self) -> Vec<SyncConfiguration> {
        self.inner
            .state()
            .configurations
            .iter()
            .map(|e| e.config.clone())
            .collect()
    }

    #[must_use]
    pub fn configuration(&self, id: ConfigurationId) -> Option<SyncConfiguration> {
        self.inner.state().entry(id).map(|e| e.config.clone())
    }

    #[must_use]
    pub fn statuses(&self) -> Vec<ConfigurationStatus> {
        self.inner
            .state()
            .configurations
            .iter()
            .map(|e| ConfigurationStatus::from(&e.config))
            .collect()
    }

    /// Number of live periodic triggers
    #[must_use]
    pub fn active_trigger_count(&self) -> usize {
        self.inner
            .state()
            .configurations
            .iter()
            .filter(|e| e.trigger.as_ref().is_some_and(|t| !t.is_cancelled()))
            .count()
    }

    /// Number of transfer passes currently executing
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.count()
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Cancels every trigger; runs already in flight complete normally
    pub fn shutdown(&self) {
        let features = &self.inner.features;
        features.set_state(CLOUD_SYNC_FEATURE, FeatureState::Stopping, None);
        self.inner.shutdown.cancel();
        let cancelled = {
            let mut state = self.inner.state();
            state
                .configurations
                .iter_mut()
                .filter_map(|e| e.trigger.take())
                .count()
        };
        info!(triggers = cancelled, "Orchestrator shut down");
        features.set_state(CLOUD_SYNC_FEATURE, FeatureState::Stopped, None);
    }

    /// Waits until no run is in flight, at most `timeout`
    ///
    /// Returns `true` if the orchestrator went idle in time.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.inner.in_flight.wait_idle(timeout).await
    }
}

impl Default for SyncOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Unit tests
// ============================================================================

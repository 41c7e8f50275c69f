//! Read-only status surface consumed by the external status channel
//!
//! These are plain data snapshots. Producing them never blocks a sync run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::ConfigurationId;
use super::sync_configuration::{SyncConfiguration, SyncStatus};

/// Lifecycle state of a coarse engine subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl fmt::Display for FeatureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeatureState::Stopped => "stopped",
            FeatureState::Starting => "starting",
            FeatureState::Running => "running",
            FeatureState::Stopping => "stopping",
            FeatureState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of one registered feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureStatus {
    pub id: String,
    pub display_name: String,
    pub state: FeatureState,
    pub error_message: Option<String>,
}

/// Snapshot of one configuration's last run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationStatus {
    pub id: ConfigurationId,
    pub name: String,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_status: SyncStatus,
    pub last_error: Option<String>,
}

impl From<&SyncConfiguration> for ConfigurationStatus {
    fn from(cfg: &SyncConfiguration) -> Self {
        Self {
            id: cfg.id,
            name: cfg.name.clone(),
            last_sync_time: cfg.status.last_sync_time,
            last_status: cfg.status.last_status,
            last_error: cfg.status.last_error.clone(),
        }
    }
}

/// Outcome of one sync attempt against one target of a multi-target
/// configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResultEvent {
    pub configuration_id: ConfigurationId,
    pub configuration_name: String,
    pub target_name: String,
    /// Mount identifier for devices, provider name for cloud targets
    pub drive_identifier: String,
    pub volume_label: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

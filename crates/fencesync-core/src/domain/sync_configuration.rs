//! Single-target sync configuration and its run status
//!
//! A [`SyncConfiguration`] binds one local folder to one path on one
//! registered provider. The [`SyncStatusRecord`] embedded in it tracks the
//! outcome of the most recent run through the state machine:
//!
//! ```text
//! NeverSynced ──→ InProgress ──→ Success
//!                    ▲   │  └──→ PartialSuccess
//!                    │   └─────→ Failed
//!                    └── (any terminal state, next run)
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ConfigurationId, RelativePath};

/// Which way files flow between the local folder and the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Local folder to target
    #[default]
    Upload,
    /// Target to local folder
    Download,
    /// Both ways; the strictly newer side wins
    Bidirectional,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncDirection::Upload => "upload",
            SyncDirection::Download => "download",
            SyncDirection::Bidirectional => "bidirectional",
        };
        write!(f, "{s}")
    }
}

/// Outcome of the most recent run of a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    NeverSynced,
    InProgress,
    Success,
    Failed,
    /// Some files transferred, others failed, within the same run
    PartialSuccess,
}

impl SyncStatus {
    /// Whether a run may move from `self` to `next`
    #[must_use]
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, next),
            (NeverSynced | Success | Failed | PartialSuccess, InProgress)
                | (InProgress, Success | Failed | PartialSuccess)
        )
    }

    /// Whether this status ends a run
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SyncStatus::Success | SyncStatus::Failed | SyncStatus::PartialSuccess
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::NeverSynced => "never_synced",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
            SyncStatus::PartialSuccess => "partial_success",
        };
        write!(f, "{s}")
    }
}

/// Status bookkeeping carried by every configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusRecord {
    #[serde(default)]
    pub last_status: SyncStatus,
    #[serde(default)]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl SyncStatusRecord {
    /// Marks a run as started
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidState`] if a run is already in progress.
    pub fn begin(&mut self) -> Result<(), DomainError> {
        self.transition(SyncStatus::InProgress)?;
        self.last_error = None;
        Ok(())
    }

    /// Records the terminal outcome of a run
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidState`] if no run is in progress or
    /// `status` is not terminal.
    pub fn complete(&mut self, status: SyncStatus, error: Option<String>) -> Result<(), DomainError> {
        self.transition(status)?;
        self.last_sync_time = Some(Utc::now());
        self.last_error = error;
        Ok(())
    }

    /// Resets a status left `InProgress` by an interrupted engine
    ///
    /// Returns `true` if the record was changed.
    pub fn recover_interrupted(&mut self) -> bool {
        if self.last_status == SyncStatus::InProgress {
            self.last_status = SyncStatus::Failed;
            self.last_error = Some("interrupted".to_string());
            true
        } else {
            false
        }
    }

    fn transition(&mut self, next: SyncStatus) -> Result<(), DomainError> {
        if !self.last_status.can_transition_to(next) {
            return Err(DomainError::InvalidState {
                from: self.last_status.to_string(),
                to: next.to_string(),
            });
        }
        self.last_status = next;
        Ok(())
    }
}

/// A saved rule binding one local folder to one provider path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfiguration {
    #[serde(default)]
    pub id: ConfigurationId,
    pub name: String,
    pub local_path: PathBuf,
    #[serde(default)]
    pub remote_path: RelativePath,
    pub provider_name: String,
    #[serde(default)]
    pub direction: SyncDirection,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Seconds between periodic runs; 0 means manual only
    #[serde(default)]
    pub interval_secs: u64,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub delete_on_sync: bool,
    #[serde(flatten)]
    pub status: SyncStatusRecord,
}

fn default_enabled() -> bool {
    true
}

impl SyncConfiguration {
    /// Creates an enabled, manual-only upload configuration
    pub fn new(
        name: impl Into<String>,
        local_path: impl Into<PathBuf>,
        remote_path: RelativePath,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            id: ConfigurationId::new(),
            name: name.into(),
            local_path: local_path.into(),
            remote_path,
            provider_name: provider_name.into(),
            direction: SyncDirection::Upload,
            enabled: true,
            interval_secs: 0,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            delete_on_sync: false,
            status: SyncStatusRecord::default(),
        }
    }

    pub fn with_direction(mut self, direction: SyncDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_patterns(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.include_patterns = include;
        self.exclude_patterns = exclude;
        self
    }

    pub fn with_delete_on_sync(mut self, delete: bool) -> Self {
        self.delete_on_sync = delete;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Period of the automatic trigger, if any
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }

    /// Whether this configuration should own a periodic trigger
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.enabled && self.interval_secs > 0
    }

    /// Structural checks that do not depend on the provider registry
    ///
    /// # Errors
    /// Returns [`DomainError::ValidationFailed`] for an empty name or
    /// provider name.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "configuration name must not be empty".to_string(),
            ));
        }
        if self.provider_name.trim().is_empty() {
            return Err(DomainError::ValidationFailed(format!(
                "configuration '{}' has no provider name",
                self.name
            )));
        }
        if self.local_path.as_os_str().is_empty() {
            return Err(DomainError::ValidationFailed(format!(
                "configuration '{}' has no local path",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SyncConfiguration {
        SyncConfiguration::new(
            "Photos",
            "/home/user/Pictures",
            RelativePath::new("backup/pictures").unwrap(),
            "Cloud1",
        )
    }

    #[test]
    fn new_configuration_is_manual_upload() {
        let cfg = sample();
        assert!(cfg.enabled);
        assert_eq!(cfg.direction, SyncDirection::Upload);
        assert_eq!(cfg.interval(), None);
        assert!(!cfg.is_scheduled());
        assert_eq!(cfg.status.last_status, SyncStatus::NeverSynced);
    }

    #[test]
    fn scheduled_requires_enabled_and_interval() {
        let cfg = sample().with_interval_secs(60);
        assert!(cfg.is_scheduled());
        assert_eq!(cfg.interval(), Some(Duration::from_secs(60)));

        let disabled = cfg.with_enabled(false);
        assert!(!disabled.is_scheduled());
    }

    #[test]
    fn status_machine_happy_path() {
        let mut record = SyncStatusRecord::default();
        record.begin().unwrap();
        assert_eq!(record.last_status, SyncStatus::InProgress);

        record.complete(SyncStatus::Success, None).unwrap();
        assert_eq!(record.last_status, SyncStatus::Success);
        assert!(record.last_sync_time.is_some());

        record.begin().unwrap();
        record
            .complete(SyncStatus::PartialSuccess, Some("1 file failed".into()))
            .unwrap();
        assert_eq!(record.last_error.as_deref(), Some("1 file failed"));
    }

    #[test]
    fn status_machine_rejects_double_begin() {
        let mut record = SyncStatusRecord::default();
        record.begin().unwrap();
        let err = record.begin().unwrap_err();
        assert!(matches!(err, DomainError::InvalidState { .. }));
    }

    #[test]
    fn status_machine_rejects_complete_without_begin() {
        let mut record = SyncStatusRecord::default();
        assert!(record.complete(SyncStatus::Success, None).is_err());

        record.begin().unwrap();
        assert!(record.complete(SyncStatus::NeverSynced, None).is_err());
    }

    #[test]
    fn begin_clears_previous_error() {
        let mut record = SyncStatusRecord::default();
        record.begin().unwrap();
        record
            .complete(SyncStatus::Failed, Some("unreachable".into()))
            .unwrap();
        record.begin().unwrap();
        assert!(record.last_error.is_none());
    }

    #[test]
    fn recover_interrupted_only_touches_in_progress() {
        let mut record = SyncStatusRecord {
            last_status: SyncStatus::InProgress,
            ..Default::default()
        };
        assert!(record.recover_interrupted());
        assert_eq!(record.last_status, SyncStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some("interrupted"));

        assert!(!record.recover_interrupted());
    }

    #[test]
    fn validate_rejects_missing_provider() {
        let mut cfg = sample();
        cfg.provider_name = " ".into();
        assert!(cfg.validate().is_err());
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn deserializes_with_defaults() {
        let yaml = r#"
name: Documents
local_path: /home/user/Documents
provider_name: nas
"#;
        let cfg: SyncConfiguration = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.enabled);
        assert!(cfg.remote_path.is_root());
        assert_eq!(cfg.direction, SyncDirection::Upload);
        assert_eq!(cfg.status.last_status, SyncStatus::NeverSynced);
    }
}

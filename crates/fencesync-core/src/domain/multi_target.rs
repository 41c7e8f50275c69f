//! Multi-target configurations, targets, and device identity matching

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ConfigurationId, RelativePath, TargetId};
use super::sync_configuration::{SyncConfiguration, SyncDirection, SyncStatusRecord};

// ============================================================================
// Targets
// ============================================================================

/// Kind of backend a target lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Always-on provider, addressed by registered provider name
    Cloud,
    /// Intermittently connected mount (USB drive, external disk, share)
    Device,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Cloud => write!(f, "cloud"),
            TargetKind::Device => write!(f, "device"),
        }
    }
}

/// One destination inside a [`MultiTargetSyncConfiguration`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTarget {
    #[serde(default)]
    pub id: TargetId,
    pub name: String,
    pub kind: TargetKind,
    /// Provider name for cloud targets, mount identifier for devices
    pub identifier: String,
    /// Folder on the target that mirrors the source
    #[serde(default)]
    pub path: RelativePath,
    /// Lower is preferred
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub auto_sync: bool,
    #[serde(default)]
    pub volume_label: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    /// Runtime reachability; never persisted
    #[serde(skip)]
    pub available: bool,
    #[serde(default)]
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl SyncTarget {
    /// Creates a cloud target bound to a registered provider name
    pub fn cloud(name: impl Into<String>, provider_name: impl Into<String>) -> Self {
        Self::with_kind(name, TargetKind::Cloud, provider_name)
    }

    /// Creates a device target bound to a mount identifier
    pub fn device(name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::with_kind(name, TargetKind::Device, identifier)
    }

    fn with_kind(name: impl Into<String>, kind: TargetKind, identifier: impl Into<String>) -> Self {
        Self {
            id: TargetId::new(),
            name: name.into(),
            kind,
            identifier: identifier.into(),
            path: RelativePath::root(),
            priority: 0,
            auto_sync: kind == TargetKind::Device,
            volume_label: None,
            serial_number: None,
            available: false,
            last_sync_time: None,
        }
    }

    pub fn with_path(mut self, path: RelativePath) -> Self {
        self.path = path;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }

    pub fn with_volume_label(mut self, label: impl Into<String>) -> Self {
        self.volume_label = Some(label.into());
        self
    }

    pub fn with_serial_number(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    #[must_use]
    pub fn is_device(&self) -> bool {
        self.kind == TargetKind::Device
    }

    #[must_use]
    pub fn is_cloud(&self) -> bool {
        self.kind == TargetKind::Cloud
    }

    /// Matches a freshly connected device against this target's identity
    ///
    /// Rules are tried in order and the first satisfied one is reported:
    /// mount identifier, then volume label, then serial number. Label and
    /// serial comparisons ignore ASCII case and surrounding whitespace.
    /// Cloud targets never match.
    #[must_use]
    pub fn match_device(&self, device: &DeviceIdentity) -> Option<DeviceMatch> {
        if !self.is_device() {
            return None;
        }

        if identifiers_equal(&self.identifier, &device.identifier) {
            return Some(DeviceMatch::Identifier);
        }
        if fields_equal(self.volume_label.as_deref(), device.volume_label.as_deref()) {
            return Some(DeviceMatch::VolumeLabel);
        }
        if fields_equal(self.serial_number.as_deref(), device.serial_number.as_deref()) {
            return Some(DeviceMatch::SerialNumber);
        }
        None
    }
}

/// Mount identifiers are compared without trailing separators so `E:\`
/// and `E:` (or `/media/usb/` and `/media/usb`) name the same mount.
fn identifiers_equal(a: &str, b: &str) -> bool {
    let trim = |s: &str| s.trim().trim_end_matches(&['/', '\\'][..]).to_ascii_lowercase();
    let (a, b) = (trim(a), trim(b));
    !a.is_empty() && a == b
}

fn fields_equal(a: Option<&str>, b: Option<&str>) -> bool {
    match (a.map(str::trim), b.map(str::trim)) {
        (Some(a), Some(b)) => !a.is_empty() && a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

/// Identity triple delivered by the external device notifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Mount point or drive identifier
    pub identifier: String,
    pub volume_label: Option<String>,
    pub serial_number: Option<String>,
}

impl DeviceIdentity {
    pub fn new(
        identifier: impl Into<String>,
        volume_label: Option<String>,
        serial_number: Option<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            volume_label,
            serial_number,
        }
    }
}

/// Which identity rule matched a device to a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceMatch {
    Identifier,
    VolumeLabel,
    SerialNumber,
}

impl fmt::Display for DeviceMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMatch::Identifier => write!(f, "identifier"),
            DeviceMatch::VolumeLabel => write!(f, "volume_label"),
            DeviceMatch::SerialNumber => write!(f, "serial_number"),
        }
    }
}

// ============================================================================
// Multi-target configuration
// ============================================================================

/// Policy for choosing among several targets in one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiTargetStrategy {
    #[default]
    AllTargets,
    HighestPriorityOnly,
    CloudPreferred,
    DevicePreferred,
}

impl fmt::Display for MultiTargetStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MultiTargetStrategy::AllTargets => "all_targets",
            MultiTargetStrategy::HighestPriorityOnly => "highest_priority_only",
            MultiTargetStrategy::CloudPreferred => "cloud_preferred",
            MultiTargetStrategy::DevicePreferred => "device_preferred",
        };
        write!(f, "{s}")
    }
}

/// A saved rule binding one source folder to several targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiTargetSyncConfiguration {
    #[serde(default)]
    pub id: ConfigurationId,
    pub name: String,
    pub source_path: PathBuf,
    #[serde(default)]
    pub targets: Vec<SyncTarget>,
    #[serde(default)]
    pub direction: SyncDirection,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub delete_on_sync: bool,
    /// Period for cloud targets; 0 means manual only
    #[serde(default)]
    pub cloud_sync_interval_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub strategy: MultiTargetStrategy,
}

fn default_enabled() -> bool {
    true
}

impl MultiTargetSyncConfiguration {
    /// Creates an enabled, empty, all-targets configuration
    pub fn new(name: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            id: ConfigurationId::new(),
            name: name.into(),
            source_path: source_path.into(),
            targets: Vec::new(),
            direction: SyncDirection::Upload,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            delete_on_sync: false,
            cloud_sync_interval_secs: 0,
            enabled: true,
            strategy: MultiTargetStrategy::AllTargets,
        }
    }

    pub fn with_target(mut self, target: SyncTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_strategy(mut self, strategy: MultiTargetStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_direction(mut self, direction: SyncDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_cloud_sync_interval_secs(mut self, secs: u64) -> Self {
        self.cloud_sync_interval_secs = secs;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// # Errors
    /// Returns [`DomainError::ValidationFailed`] when enabled without
    /// targets, for an empty name, or for a target without identifier.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "multi-target configuration name must not be empty".to_string(),
            ));
        }
        if self.enabled && self.targets.is_empty() {
            return Err(DomainError::ValidationFailed(format!(
                "multi-target configuration '{}' is enabled but has no targets",
                self.name
            )));
        }
        if let Some(target) = self.targets.iter().find(|t| t.identifier.trim().is_empty()) {
            return Err(DomainError::ValidationFailed(format!(
                "target '{}' in '{}' has no identifier",
                target.name, self.name
            )));
        }
        Ok(())
    }

    pub fn target(&self, id: TargetId) -> Option<&SyncTarget> {
        self.targets.iter().find(|t| t.id == id)
    }

    pub fn target_mut(&mut self, id: TargetId) -> Option<&mut SyncTarget> {
        self.targets.iter_mut().find(|t| t.id == id)
    }

    /// Re-expresses a cloud target as a single-target configuration
    ///
    /// The derived configuration is manual-only unless `interval_secs` is
    /// non-zero; it shares this configuration's direction and patterns.
    #[must_use]
    pub fn derive_cloud_configuration(
        &self,
        target: &SyncTarget,
        interval_secs: u64,
    ) -> SyncConfiguration {
        SyncConfiguration {
            id: ConfigurationId::new(),
            name: format!("{} -> {}", self.name, target.name),
            local_path: self.source_path.clone(),
            remote_path: target.path.clone(),
            provider_name: target.identifier.clone(),
            direction: self.direction,
            enabled: self.enabled,
            interval_secs,
            include_patterns: self.include_patterns.clone(),
            exclude_patterns: self.exclude_patterns.clone(),
            delete_on_sync: self.delete_on_sync,
            status: SyncStatusRecord::default(),
        }
    }

    /// Targets the next run should use, according to the strategy
    ///
    /// Only available targets are considered. `AllTargets` returns every
    /// one of them in list order; the other strategies return at most one:
    /// - `HighestPriorityOnly`: lowest `priority`, earliest in list on ties
    /// - `CloudPreferred`: best cloud target, else best device target
    /// - `DevicePreferred`: best device target, else best cloud target
    #[must_use]
    pub fn select_targets(&self) -> Vec<&SyncTarget> {
        let available = || self.targets.iter().filter(|t| t.available);
        let best = |kind: Option<TargetKind>| {
            available()
                .filter(|t| kind.map_or(true, |k| t.kind == k))
                .min_by_key(|t| t.priority)
        };

        match self.strategy {
            MultiTargetStrategy::AllTargets => available().collect(),
            MultiTargetStrategy::HighestPriorityOnly => best(None).into_iter().collect(),
            MultiTargetStrategy::CloudPreferred => best(Some(TargetKind::Cloud))
                .or_else(|| best(Some(TargetKind::Device)))
                .into_iter()
                .collect(),
            MultiTargetStrategy::DevicePreferred => best(Some(TargetKind::Device))
                .or_else(|| best(Some(TargetKind::Cloud)))
                .into_iter()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str, label: Option<&str>, serial: Option<&str>) -> DeviceIdentity {
        DeviceIdentity::new(id, label.map(String::from), serial.map(String::from))
    }

    #[test]
    fn match_prefers_identifier() {
        let target = SyncTarget::device("USB", "E:")
            .with_volume_label("BACKUP")
            .with_serial_number("SN123");
        let m = target.match_device(&identity("E:\\", Some("BACKUP"), Some("SN123")));
        assert_eq!(m, Some(DeviceMatch::Identifier));
    }

    #[test]
    fn match_falls_back_to_label_then_serial() {
        let target = SyncTarget::device("USB", "E:")
            .with_volume_label("backup")
            .with_serial_number("SN123");
        assert_eq!(
            target.match_device(&identity("F:", Some("BACKUP"), Some("SN123"))),
            Some(DeviceMatch::VolumeLabel)
        );
        assert_eq!(
            target.match_device(&identity("F:", Some("OTHER"), Some("SN123"))),
            Some(DeviceMatch::SerialNumber)
        );
        assert_eq!(
            target.match_device(&identity("F:", Some("OTHER"), Some("SN999"))),
            None
        );
    }

    #[test]
    fn serial_only_target_matches_different_identifier() {
        let mut target = SyncTarget::device("USB", "");
        target.serial_number = Some("SN123".into());
        assert_eq!(
            target.match_device(&identity("F:", None, Some("SN123"))),
            Some(DeviceMatch::SerialNumber)
        );
    }

    #[test]
    fn missing_fields_never_match() {
        let target = SyncTarget::device("USB", "E:");
        assert_eq!(target.match_device(&identity("F:", None, None)), None);
    }

    #[test]
    fn cloud_targets_never_match_devices() {
        let target = SyncTarget::cloud("Drive", "E:");
        assert_eq!(target.match_device(&identity("E:", None, None)), None);
    }

    #[test]
    fn validate_rejects_enabled_without_targets() {
        let cfg = MultiTargetSyncConfiguration::new("Docs", "/home/user/Docs");
        assert!(cfg.validate().is_err());

        let disabled = cfg.clone().with_enabled(false);
        assert!(disabled.validate().is_ok());

        let with_target = cfg.with_target(SyncTarget::device("USB", "/media/usb"));
        assert!(with_target.validate().is_ok());
    }

    #[test]
    fn derive_cloud_configuration_copies_policy() {
        let target = SyncTarget::cloud("Drive", "Cloud1")
            .with_path(RelativePath::new("Backups/Docs").unwrap());
        let cfg = MultiTargetSyncConfiguration::new("Docs", "/home/user/Docs")
            .with_direction(SyncDirection::Bidirectional)
            .with_target(target.clone());

        let derived = cfg.derive_cloud_configuration(&target, 120);
        assert_eq!(derived.provider_name, "Cloud1");
        assert_eq!(derived.remote_path.as_str(), "Backups/Docs");
        assert_eq!(derived.local_path, PathBuf::from("/home/user/Docs"));
        assert_eq!(derived.direction, SyncDirection::Bidirectional);
        assert_eq!(derived.interval_secs, 120);
        assert_ne!(derived.id, cfg.id);
    }

    fn strategy_fixture(strategy: MultiTargetStrategy) -> MultiTargetSyncConfiguration {
        let mut cfg = MultiTargetSyncConfiguration::new("Docs", "/src")
            .with_strategy(strategy)
            .with_target(SyncTarget::cloud("cloud-b", "B").with_priority(2))
            .with_target(SyncTarget::device("usb-a", "/a").with_priority(1))
            .with_target(SyncTarget::cloud("cloud-c", "C").with_priority(1))
            .with_target(SyncTarget::device("usb-d", "/d").with_priority(0));
        for t in &mut cfg.targets {
            t.available = true;
        }
        cfg
    }

    fn names(targets: Vec<&SyncTarget>) -> Vec<&str> {
        targets.into_iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn all_targets_selects_every_available() {
        let mut cfg = strategy_fixture(MultiTargetStrategy::AllTargets);
        cfg.targets[0].available = false;
        assert_eq!(names(cfg.select_targets()), vec!["usb-a", "cloud-c", "usb-d"]);
    }

    #[test]
    fn highest_priority_only_selects_lowest_value() {
        let mut cfg = strategy_fixture(MultiTargetStrategy::HighestPriorityOnly);
        assert_eq!(names(cfg.select_targets()), vec!["usb-d"]);

        // Ties resolve to list order.
        cfg.targets[3].available = false;
        assert_eq!(names(cfg.select_targets()), vec!["usb-a"]);
    }

    #[test]
    fn cloud_preferred_falls_back_to_device() {
        let mut cfg = strategy_fixture(MultiTargetStrategy::CloudPreferred);
        assert_eq!(names(cfg.select_targets()), vec!["cloud-c"]);

        cfg.targets[0].available = false;
        cfg.targets[2].available = false;
        assert_eq!(names(cfg.select_targets()), vec!["usb-d"]);
    }

    #[test]
    fn device_preferred_falls_back_to_cloud() {
        let mut cfg = strategy_fixture(MultiTargetStrategy::DevicePreferred);
        assert_eq!(names(cfg.select_targets()), vec!["usb-d"]);

        cfg.targets[1].available = false;
        cfg.targets[3].available = false;
        assert_eq!(names(cfg.select_targets()), vec!["cloud-c"]);
    }

    #[test]
    fn nothing_available_selects_nothing() {
        let mut cfg = strategy_fixture(MultiTargetStrategy::HighestPriorityOnly);
        for t in &mut cfg.targets {
            t.available = false;
        }
        assert!(cfg.select_targets().is_empty());
    }

    #[test]
    fn availability_is_not_serialized() {
        let mut target = SyncTarget::device("USB", "/media/usb");
        target.available = true;
        let yaml = serde_yaml::to_string(&target).unwrap();
        assert!(!yaml.contains("available"));

        let back: SyncTarget = serde_yaml::from_str(&yaml).unwrap();
        assert!(!back.available);
    }
}

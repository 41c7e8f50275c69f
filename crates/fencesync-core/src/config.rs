//! Configuration module for FenceSync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.
//! Saved sync rules (single-target and multi-target) live in the same file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::multi_target::MultiTargetSyncConfiguration;
use crate::domain::sync_configuration::SyncConfiguration;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for FenceSync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Filesystem providers (network shares, fixed disks) registered at startup.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Saved single-target rules.
    #[serde(default)]
    pub configurations: Vec<SyncConfiguration>,
    /// Saved multi-target rules.
    #[serde(default)]
    pub multi_target: Vec<MultiTargetSyncConfiguration>,
}

/// Engine-wide synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Buffer size of the status and result broadcast channels.
    pub event_capacity: usize,
    /// Seconds to wait for in-flight runs during shutdown.
    pub shutdown_grace_secs: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

/// A named filesystem provider rooted at a local path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub root: PathBuf,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Write the configuration, including rule status, to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/fencesync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("fencesync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            shutdown_grace_secs: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.event_capacity"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid. Provider
    /// references of single-target rules are checked against the
    /// `providers` section only when it is non-empty, because cloud
    /// providers are registered in code.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.event_capacity == 0 {
            errors.push(ValidationError {
                field: "sync.event_capacity".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        // --- providers ---
        let mut seen = HashSet::new();
        for (i, provider) in self.providers.iter().enumerate() {
            if provider.name.trim().is_empty() {
                errors.push(ValidationError {
                    field: format!("providers[{i}].name"),
                    message: "must not be empty".into(),
                });
            } else if !seen.insert(provider.name.as_str()) {
                errors.push(ValidationError {
                    field: format!("providers[{i}].name"),
                    message: format!("duplicate provider name '{}'", provider.name),
                });
            }
            if provider.root.as_os_str().is_empty() {
                errors.push(ValidationError {
                    field: format!("providers[{i}].root"),
                    message: "must not be empty".into(),
                });
            }
        }

        // --- configurations ---
        for (i, cfg) in self.configurations.iter().enumerate() {
            if let Err(e) = cfg.validate() {
                errors.push(ValidationError {
                    field: format!("configurations[{i}]"),
                    message: e.to_string(),
                });
            } else if !self.providers.is_empty() && !seen.contains(cfg.provider_name.as_str()) {
                errors.push(ValidationError {
                    field: format!("configurations[{i}].provider_name"),
                    message: format!("unknown provider '{}'", cfg.provider_name),
                });
            }
        }

        // --- multi_target ---
        for (i, cfg) in self.multi_target.iter().enumerate() {
            if let Err(e) = cfg.validate() {
                errors.push(ValidationError {
                    field: format!("multi_target[{i}]"),
                    message: e.to_string(),
                });
            }
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use fencesync_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .provider("nas", PathBuf::from("/mnt/nas"))
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.sync.event_capacity = capacity;
        self
    }

    pub fn shutdown_grace_secs(mut self, seconds: u64) -> Self {
        self.config.sync.shutdown_grace_secs = seconds;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    // --- rules ---

    pub fn provider(mut self, name: impl Into<String>, root: PathBuf) -> Self {
        self.config.providers.push(ProviderConfig {
            name: name.into(),
            root,
        });
        self
    }

    pub fn configuration(mut self, cfg: SyncConfiguration) -> Self {
        self.config.configurations.push(cfg);
        self
    }

    pub fn multi_target(mut self, cfg: MultiTargetSyncConfiguration) -> Self {
        self.config.multi_target.push(cfg);
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::domain::{MultiTargetStrategy, RelativePath, SyncDirection, TargetKind};

    // -- Defaults --

    #[test]
    fn default_config_has_sensible_values() {
        let cfg = Config::default();
        assert_eq!(cfg.sync.event_capacity, 256);
        assert_eq!(cfg.sync.shutdown_grace_secs, 10);
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
        assert!(cfg.providers.is_empty());
        assert!(cfg.configurations.is_empty());
        assert!(cfg.multi_target.is_empty());
    }

    #[test]
    fn default_config_passes_validation() {
        let errors = Config::default().validate();
        assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");
    }

    // -- Loading --

    #[test]
    fn load_from_yaml_file() {
        let yaml = r#"
sync:
  event_capacity: 64
  shutdown_grace_secs: 3
logging:
  level: debug
  json: true
providers:
  - name: nas
    root: /mnt/nas
configurations:
  - name: Documents
    local_path: /home/user/Documents
    remote_path: backup/docs
    provider_name: nas
    direction: bidirectional
    interval_secs: 300
    include_patterns: ["*.odt", "*.pdf"]
multi_target:
  - name: Photos
    source_path: /home/user/Pictures
    strategy: device_preferred
    cloud_sync_interval_secs: 600
    targets:
      - name: USB stick
        kind: device
        identifier: /media/user/BACKUP
        serial_number: SN123
        auto_sync: true
      - name: NAS
        kind: cloud
        identifier: nas
        priority: 1
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(yaml.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.sync.event_capacity, 64);
        assert_eq!(cfg.sync.shutdown_grace_secs, 3);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
        assert_eq!(cfg.providers[0].root, PathBuf::from("/mnt/nas"));

        let docs = &cfg.configurations[0];
        assert_eq!(docs.remote_path, RelativePath::new("backup/docs").unwrap());
        assert_eq!(docs.direction, SyncDirection::Bidirectional);
        assert_eq!(docs.interval_secs, 300);
        assert_eq!(docs.include_patterns, vec!["*.odt", "*.pdf"]);

        let photos = &cfg.multi_target[0];
        assert_eq!(photos.strategy, MultiTargetStrategy::DevicePreferred);
        assert_eq!(photos.targets.len(), 2);
        assert_eq!(photos.targets[0].kind, TargetKind::Device);
        assert_eq!(photos.targets[0].serial_number.as_deref(), Some("SN123"));
        assert_eq!(photos.targets[1].priority, 1);

        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn save_then_load_preserves_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let cfg = ConfigBuilder::new()
            .provider("nas", PathBuf::from("/mnt/nas"))
            .configuration(SyncConfiguration::new(
                "Docs",
                "/home/user/Docs",
                RelativePath::root(),
                "nas",
            ))
            .build();
        cfg.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.configurations, cfg.configurations);
        assert_eq!(loaded.providers, cfg.providers);
    }

    #[test]
    fn load_or_default_returns_default_on_missing_file() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(cfg.sync.event_capacity, 256);
    }

    #[test]
    fn load_returns_error_on_invalid_yaml() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"not: [valid: yaml: {{{").unwrap();
        tmp.flush().unwrap();

        assert!(Config::load(tmp.path()).is_err());
    }

    // -- Validation --

    #[test]
    fn validate_catches_zero_event_capacity() {
        let mut cfg = Config::default();
        cfg.sync.event_capacity = 0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "sync.event_capacity"));
    }

    #[test]
    fn validate_catches_invalid_log_level() {
        let mut cfg = Config::default();
        cfg.logging.level = "verbose".into();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "logging.level"));
    }

    #[test]
    fn validate_accepts_all_valid_log_levels() {
        for level in VALID_LOG_LEVELS {
            let mut cfg = Config::default();
            cfg.logging.level = (*level).into();
            assert!(cfg.validate().is_empty(), "level {level} should be valid");
        }
    }

    #[test]
    fn validate_catches_duplicate_provider_names() {
        let cfg = ConfigBuilder::new()
            .provider("nas", PathBuf::from("/mnt/a"))
            .provider("nas", PathBuf::from("/mnt/b"))
            .build();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "providers[1].name"));
    }

    #[test]
    fn validate_catches_unknown_provider_reference() {
        let cfg = ConfigBuilder::new()
            .provider("nas", PathBuf::from("/mnt/nas"))
            .configuration(SyncConfiguration::new(
                "Docs",
                "/home/user/Docs",
                RelativePath::root(),
                "Cloud1",
            ))
            .build();
        let errors = cfg.validate();
        assert!(errors
            .iter()
            .any(|e| e.field == "configurations[0].provider_name"));
    }

    #[test]
    fn validate_catches_enabled_multi_target_without_targets() {
        let cfg = ConfigBuilder::new()
            .multi_target(MultiTargetSyncConfiguration::new("Empty", "/src"))
            .build();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "multi_target[0]"));
    }

    // -- Builder --

    #[test]
    fn builder_overrides_fields() {
        let cfg = ConfigBuilder::new()
            .event_capacity(8)
            .shutdown_grace_secs(1)
            .logging_level("warn")
            .logging_json(true)
            .build();
        assert_eq!(cfg.sync.event_capacity, 8);
        assert_eq!(cfg.sync.shutdown_grace_secs, 1);
        assert_eq!(cfg.logging.level, "warn");
        assert!(cfg.logging.json);
    }

    #[test]
    fn builder_build_validated_fails_for_invalid_config() {
        let result = ConfigBuilder::new()
            .event_capacity(0)
            .logging_level("nope")
            .build_validated();
        let errors = result.unwrap_err();
        assert!(errors.len() >= 2);
    }

    // -- default_path --

    #[test]
    fn default_path_ends_with_config_yaml() {
        let p = Config::default_path();
        assert!(p.ends_with("fencesync/config.yaml"));
    }

    // -- ValidationError Display --

    #[test]
    fn validation_error_display() {
        let err = ValidationError {
            field: "sync.event_capacity".into(),
            message: "must be greater than 0".into(),
        };
        assert_eq!(err.to_string(), "sync.event_capacity: must be greater than 0");
    }
}

//! FenceSync Sync - Multi-target synchronization engine
//!
//! Provides:
//! - A filesystem provider for network shares, fixed disks and removable devices
//! - The shared upload / download / bidirectional transfer algorithm
//! - Periodic triggers with per-configuration re-entrancy protection
//! - Single-target orchestration and multi-target coordination
//!
//! ## Modules
//!
//! - [`filesystem`] - `SyncProvider` over a mounted directory tree
//! - [`patterns`] - Include/exclude glob filtering
//! - [`transfer`] - One synchronization pass between a folder and a provider
//! - [`scheduler`] - Run gate and periodic triggers
//! - [`orchestrator`] - Provider registry and single-target configurations
//! - [`coordinator`] - Multi-target configurations and device lifecycle
//! - [`status`] - Feature status board
//! - [`engine`] - Host-facing facade wiring everything from a `Config`

pub mod coordinator;
pub mod engine;
pub mod filesystem;
pub mod orchestrator;
pub mod patterns;
pub mod scheduler;
pub mod status;
pub mod transfer;

use fencesync_core::domain::{errors::DomainError, ConfigurationId};
use fencesync_core::ports::ProviderError;
use thiserror::Error;

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// A configuration was rejected (unknown provider, bad pattern, duplicate id)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider could not be reached or refused authentication
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A single file could not be transferred
    #[error("Transfer failed for {path}: {reason}")]
    Transfer { path: String, reason: String },

    /// A run ended abnormally (panic, cancelled task)
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    /// No configuration with that id is registered
    #[error("Configuration not found: {0}")]
    NotFound(ConfigurationId),

    /// An I/O error occurred during local file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A domain-level error propagated from fencesync-core
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl From<ProviderError> for SyncError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotConnected(_) | ProviderError::NotAuthenticated(_) => {
                SyncError::ProviderUnavailable(err.to_string())
            }
            ProviderError::NotFound(path) | ProviderError::InvalidPath(path) => {
                SyncError::Transfer {
                    path,
                    reason: "not found or not addressable".to_string(),
                }
            }
            ProviderError::Io(e) => SyncError::Io(e),
            ProviderError::Other(msg) => SyncError::Unexpected(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_connectivity_errors_map_to_unavailable() {
        let err: SyncError = ProviderError::NotConnected("/media/usb".into()).into();
        assert!(matches!(err, SyncError::ProviderUnavailable(_)));

        let err: SyncError = ProviderError::NotAuthenticated("Cloud1".into()).into();
        assert!(matches!(err, SyncError::ProviderUnavailable(_)));
    }

    #[test]
    fn transfer_error_display_names_path() {
        let err = SyncError::Transfer {
            path: "docs/a.txt".into(),
            reason: "device removed".into(),
        };
        assert_eq!(err.to_string(), "Transfer failed for docs/a.txt: device removed");
    }
}

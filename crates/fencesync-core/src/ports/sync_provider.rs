//! Sync provider port (driven/secondary port)
//!
//! This module defines the capability contract every sync backend
//! implements: cloud vendors, network shares and removable devices all
//! look the same to the orchestration layer.
//!
//! ## Design Notes
//!
//! - Failures never cross the boundary as panics. Implementations log the
//!   underlying fault and return a [`ProviderError`].
//! - A failed listing is an `Err`, distinct from an empty listing, so a
//!   transient fault can never be mistaken for "the target is empty".
//! - Uses `#[async_trait]` for async trait methods.
//! - Implementations must tolerate concurrent calls for different remote
//!   paths; they hold no mutable state beyond their bound root.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::multi_target::DeviceIdentity;
use crate::domain::newtypes::RelativePath;
use crate::domain::remote_file::RemoteFileDescriptor;

// ============================================================================
// ProviderError
// ============================================================================

/// Errors reported by a [`SyncProvider`]
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The backing mount or endpoint is not reachable
    #[error("target not connected: {0}")]
    NotConnected(String),

    /// Credentials are missing or rejected
    #[error("provider not authenticated: {0}")]
    NotAuthenticated(String),

    /// The requested remote path does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Filesystem or transport I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A path could not be mapped onto the target
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Any other backend-specific failure
    #[error("{0}")]
    Other(String),
}

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

// ============================================================================
// SyncProvider trait
// ============================================================================

/// Port trait for transfer operations against one addressable backend
///
/// ## Implementation Notes
///
/// - `list_files` is recomputed on every call; it must not hand out a
///   cached or lazily evaluated stream.
/// - `list_files` should not compute content hashes; `get_file_info` may.
/// - Remote paths are relative to the provider's own root.
#[async_trait::async_trait]
pub trait SyncProvider: Send + Sync {
    /// Prepares the provider for use (e.g. verifies the root exists)
    async fn initialize(&self) -> ProviderResult<()>;

    /// Whether the backend is currently usable
    async fn is_authenticated(&self) -> bool;

    /// Copies a local file to `remote_path`, overwriting
    async fn upload(&self, local_path: &Path, remote_path: &RelativePath) -> ProviderResult<()>;

    /// Copies `remote_path` to a local file, overwriting
    async fn download(&self, remote_path: &RelativePath, local_path: &Path) -> ProviderResult<()>;

    /// Removes a remote file or directory
    async fn delete(&self, remote_path: &RelativePath) -> ProviderResult<()>;

    /// Lists every file below `remote_path`, recursively
    async fn list_files(&self, remote_path: &RelativePath)
        -> ProviderResult<Vec<RemoteFileDescriptor>>;

    /// Describes a single remote entry, `None` if it does not exist
    async fn get_file_info(
        &self,
        remote_path: &RelativePath,
    ) -> ProviderResult<Option<RemoteFileDescriptor>>;
}

// ============================================================================
// DeviceSyncProvider trait
// ============================================================================

/// Identity and capacity of a mounted device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub volume_label: Option<String>,
    pub serial_number: Option<String>,
    pub total_bytes: Option<u64>,
    pub free_bytes: Option<u64>,
}

/// A provider backed by an intermittently connected mount
#[async_trait::async_trait]
pub trait DeviceSyncProvider: SyncProvider {
    /// Whether the mount root is still reachable
    async fn is_connected(&self) -> bool;

    /// Identity and capacity for matching and display, `None` if unplugged
    async fn describe_device(&self) -> Option<DeviceInfo>;
}

/// Creates a device provider for a freshly connected device
pub type DeviceProviderFactory =
    Arc<dyn Fn(&DeviceIdentity) -> Arc<dyn DeviceSyncProvider> + Send + Sync>;

//! Domain entities and business logic
//!
//! This module contains the core domain types for FenceSync:
//! - Newtypes for identifiers and OS-agnostic relative paths
//! - Single-target configurations and their run status machine
//! - Multi-target configurations, targets and device identity matching
//! - Remote file descriptors reported by providers
//! - Status snapshots and sync result events
//! - Domain-specific error types

pub mod errors;
pub mod multi_target;
pub mod newtypes;
pub mod remote_file;
pub mod status;
pub mod sync_configuration;

// Re-export commonly used types
pub use errors::DomainError;
pub use multi_target::{
    DeviceIdentity, DeviceMatch, MultiTargetStrategy, MultiTargetSyncConfiguration, SyncTarget,
    TargetKind,
};
pub use newtypes::*;
pub use remote_file::RemoteFileDescriptor;
pub use status::{ConfigurationStatus, FeatureState, FeatureStatus, SyncResultEvent};
pub use sync_configuration::{SyncConfiguration, SyncDirection, SyncStatus, SyncStatusRecord};

//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the traits the engine depends on; their implementations live
//! in adapter crates.
//!
//! - [`SyncProvider`] - Transfer and listing against one backend
//! - [`DeviceSyncProvider`] - A provider on a removable mount, with
//!   connectivity and identity introspection

pub mod sync_provider;

pub use sync_provider::{
    DeviceInfo, DeviceProviderFactory, DeviceSyncProvider, ProviderError, ProviderResult,
    SyncProvider,
};

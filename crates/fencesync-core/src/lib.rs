//! FenceSync Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `SyncConfiguration`, `MultiTargetSyncConfiguration`,
//!   `SyncTarget`, `RemoteFileDescriptor`, status snapshots
//! - **Port definitions** - `SyncProvider`, `DeviceSyncProvider`
//! - **Configuration** - YAML-backed engine configuration
//!
//! # Architecture
//!
//! The domain module contains pure business logic with no I/O.
//! Ports define trait interfaces that adapter crates implement.

pub mod config;
pub mod domain;
pub mod ports;

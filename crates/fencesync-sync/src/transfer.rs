//! One synchronization pass between a local folder and a provider
//!
//! Shared by the orchestrator (single-target configurations) and the
//! coordinator (device targets of multi-target configurations).
//!
//! ## Rules
//!
//! - **Upload**: a local file is sent when the target copy is absent or
//!   strictly older. With `delete_on_sync`, target files in pattern scope
//!   without a local counterpart are deleted.
//! - **Download**: mirror image of upload.
//! - **Bidirectional**: the strictly newer side overwrites the other,
//!   one-sided files are copied across and equal times are left alone.
//!   Deletions are never propagated: without history a one-sided file is
//!   indistinguishable from a deleted one.
//!
//! Modification times are compared in 2 second slots, the resolution of
//! FAT volumes; anything finer would make every device copy look stale.
//!
//! A file that fails is recorded and the pass continues with the next one.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Instant;

use fencesync_core::{
    domain::{
        MultiTargetSyncConfiguration, RelativePath, RemoteFileDescriptor, SyncConfiguration,
        SyncDirection, SyncStatus, SyncTarget,
    },
    ports::SyncProvider,
};
use tracing::{debug, info, instrument, warn};

use crate::{filesystem::scan_directory, patterns::FilePatterns, SyncError};

// ============================================================================
// Request and report
// ============================================================================

/// Everything one pass needs, detached from the configuration it came from
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub local_root: PathBuf,
    pub remote_root: RelativePath,
    pub direction: SyncDirection,
    pub patterns: FilePatterns,
    pub delete_on_sync: bool,
}

impl TransferRequest {
    /// Builds the request for a single-target configuration
    ///
    /// # Errors
    /// Returns [`SyncError::Configuration`] for malformed patterns.
    pub fn for_configuration(cfg: &SyncConfiguration) -> Result<Self, SyncError> {
        Ok(Self {
            local_root: cfg.local_path.clone(),
            remote_root: cfg.remote_path.clone(),
            direction: cfg.direction,
            patterns: FilePatterns::new(&cfg.include_patterns, &cfg.exclude_patterns)?,
            delete_on_sync: cfg.delete_on_sync,
        })
    }

    /// Builds the request for one target of a multi-target configuration
    ///
    /// # Errors
    /// Returns [`SyncError::Configuration`] for malformed patterns.
    pub fn for_target(
        cfg: &MultiTargetSyncConfiguration,
        target: &SyncTarget,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            local_root: cfg.source_path.clone(),
            remote_root: target.path.clone(),
            direction: cfg.direction,
            patterns: FilePatterns::new(&cfg.include_patterns, &cfg.exclude_patterns)?,
            delete_on_sync: cfg.delete_on_sync,
        })
    }
}

/// Counters of one completed pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub uploaded: usize,
    pub downloaded: usize,
    pub deleted: usize,
    /// One `"path: reason"` entry per failed file operation
    pub failures: Vec<String>,
    pub duration_ms: u64,
}

impl TransferReport {
    /// Number of file operations that succeeded
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.uploaded + self.downloaded + self.deleted
    }

    /// `Success` without failures, `PartialSuccess` when some operations
    /// succeeded and some failed, `Failed` when every attempt failed
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        match (self.failures.is_empty(), self.succeeded()) {
            (true, _) => SyncStatus::Success,
            (false, 0) => SyncStatus::Failed,
            (false, _) => SyncStatus::PartialSuccess,
        }
    }

    /// Human-readable failure summary, `None` when nothing failed
    #[must_use]
    pub fn error_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        const SHOWN: usize = 3;
        let mut summary = format!(
            "{} file operation(s) failed: {}",
            self.failures.len(),
            self.failures
                .iter()
                .take(SHOWN)
                .cloned()
                .collect::<Vec<_>>()
                .join("; ")
        );
        if self.failures.len() > SHOWN {
            summary.push_str("; ...");
        }
        Some(summary)
    }

    fn record_failure(&mut self, path: &RelativePath, reason: impl std::fmt::Display) {
        warn!(path = %path, reason = %reason, "File operation failed");
        self.failures.push(format!("{path}: {reason}"));
    }
}

// ============================================================================
// Pass
// ============================================================================

type FileIndex = BTreeMap<RelativePath, RemoteFileDescriptor>;

/// Runs one pass of `request` against `provider`
///
/// # Errors
/// - [`SyncError::ProviderUnavailable`] if the provider is not authenticated
///   or its target cannot be listed because it is disconnected
/// - [`SyncError::Configuration`] if the local folder is missing while the
///   pass would read from it
/// - [`SyncError::Io`] if either side cannot be enumerated
///
/// Per-file failures do not abort the pass; they are counted in the report.
#[instrument(
    skip(provider, request),
    fields(
        local = %request.local_root.display(),
        remote = %request.remote_root,
        direction = %request.direction,
    )
)]
pub async fn run_transfer<P>(
    provider: &P,
    request: &TransferRequest,
) -> Result<TransferReport, SyncError>
where
    P: SyncProvider + ?Sized,
{
    let started = Instant::now();

    if !provider.is_authenticated().await {
        return Err(SyncError::ProviderUnavailable(
            "provider is not authenticated".to_string(),
        ));
    }

    let local = scan_local(request).await?;
    let remote = scan_remote(provider, request).await?;
    debug!(local = local.len(), remote = remote.len(), "Indexed both sides");

    let mut report = TransferReport::default();
    match request.direction {
        SyncDirection::Upload => {
            for (path, file) in &local {
                if is_newer(file, remote.get(path)) {
                    upload(provider, request, path, &mut report).await;
                }
            }
            if request.delete_on_sync {
                for path in remote.keys().filter(|p| !local.contains_key(*p)) {
                    delete_remote(provider, request, path, &mut report).await;
                }
            }
        }
        SyncDirection::Download => {
            for (path, file) in &remote {
                if is_newer(file, local.get(path)) {
                    download(provider, request, path, &mut report).await;
                }
            }
            if request.delete_on_sync {
                for path in local.keys().filter(|p| !remote.contains_key(*p)) {
                    delete_local(request, path, &mut report).await;
                }
            }
        }
        SyncDirection::Bidirectional => {
            let paths: BTreeSet<&RelativePath> = local.keys().chain(remote.keys()).collect();
            for path in paths {
                match (local.get(path), remote.get(path)) {
                    (Some(l), r) if is_newer(l, r) => {
                        upload(provider, request, path, &mut report).await;
                    }
                    (l, Some(r)) if is_newer(r, l) => {
                        download(provider, request, path, &mut report).await;
                    }
                    _ => {}
                }
            }
        }
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        uploaded = report.uploaded,
        downloaded = report.downloaded,
        deleted = report.deleted,
        failed = report.failures.len(),
        duration_ms = report.duration_ms,
        "Transfer pass complete"
    );
    Ok(report)
}

/// Coarsest mtime resolution among supported targets (FAT stores 2 s)
const MTIME_GRANULARITY_SECS: i64 = 2;

/// Modification time reduced to the common resolution of both sides
fn mtime_slot(file: &RemoteFileDescriptor) -> i64 {
    file.modified.timestamp().div_euclid(MTIME_GRANULARITY_SECS)
}

/// Strictly newer once both times are reduced to the common resolution;
/// a file with no counterpart always counts as newer
fn is_newer(candidate: &RemoteFileDescriptor, other: Option<&RemoteFileDescriptor>) -> bool {
    other.map_or(true, |o| mtime_slot(candidate) > mtime_slot(o))
}

async fn scan_local(request: &TransferRequest) -> Result<FileIndex, SyncError> {
    let root = &request.local_root;
    match tokio::fs::metadata(root).await {
        Ok(m) if m.is_dir() => {}
        Ok(_) => {
            return Err(SyncError::Configuration(format!(
                "local path {} is not a directory",
                root.display()
            )))
        }
        // A download may populate a folder that does not exist yet.
        Err(e) if e.kind() == ErrorKind::NotFound
            && request.direction == SyncDirection::Download =>
        {
            return Ok(FileIndex::new())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(SyncError::Configuration(format!(
                "local folder {} does not exist",
                root.display()
            )))
        }
        Err(e) => return Err(e.into()),
    }

    Ok(scan_directory(root, root)
        .await?
        .into_iter()
        .filter(|f| request.patterns.is_included(&f.path))
        .map(|f| (f.path.clone(), f))
        .collect())
}

async fn scan_remote<P>(provider: &P, request: &TransferRequest) -> Result<FileIndex, SyncError>
where
    P: SyncProvider + ?Sized,
{
    let listing = provider.list_files(&request.remote_root).await?;
    Ok(listing
        .into_iter()
        .filter(|f| !f.is_directory)
        .filter_map(|f| {
            let relative = f.path.strip_prefix(&request.remote_root)?;
            (!relative.is_root() && request.patterns.is_included(&relative))
                .then_some((relative, f))
        })
        .collect())
}

async fn upload<P>(
    provider: &P,
    request: &TransferRequest,
    path: &RelativePath,
    report: &mut TransferReport,
) where
    P: SyncProvider + ?Sized,
{
    let local = path.to_path_under(&request.local_root);
    match provider
        .upload(&local, &request.remote_root.join(path))
        .await
    {
        Ok(()) => {
            debug!(path = %path, "Uploaded");
            report.uploaded += 1;
        }
        Err(e) => report.record_failure(path, e),
    }
}

async fn download<P>(
    provider: &P,
    request: &TransferRequest,
    path: &RelativePath,
    report: &mut TransferReport,
) where
    P: SyncProvider + ?Sized,
{
    let local = path.to_path_under(&request.local_root);
    match provider
        .download(&request.remote_root.join(path), &local)
        .await
    {
        Ok(()) => {
            debug!(path = %path, "Downloaded");
            report.downloaded += 1;
        }
        Err(e) => report.record_failure(path, e),
    }
}

async fn delete_remote<P>(
    provider: &P,
    request: &TransferRequest,
    path: &RelativePath,
    report: &mut TransferReport,
) where
    P: SyncProvider + ?Sized,
{
    match provider.delete(&request.remote_root.join(path)).await {
        Ok(()) => {
            debug!(path = %path, "Deleted from target");
            report.deleted += 1;
        }
        Err(e) => report.record_failure(path, e),
    }
}

async fn delete_local(request: &TransferRequest, path: &RelativePath, report: &mut TransferReport) {
    let local = path.to_path_under(&request.local_root);
    match tokio::fs::remove_file(&local).await {
        Ok(()) => {
            debug!(path = %path, "Deleted locally");
            report.deleted += 1;
        }
        Err(e) => report.record_failure(path, e),
    }
}

// ============================================================================
// Unit tests
// ============================================================================

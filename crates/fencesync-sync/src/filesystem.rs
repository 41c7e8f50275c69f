//! Filesystem provider (secondary/driven adapter)
//!
//! Implements [`SyncProvider`] and [`DeviceSyncProvider`] over a directory
//! tree rooted at a mount point, using `tokio::fs` for async file
//! operations. The same adapter serves network shares, fixed disks and
//! removable devices.
//!
//! ## Design Decisions
//!
//! - **Modification times**: copies carry the source mtime over to the
//!   destination. Without it every copy would look newer than its source
//!   and repeated runs would never settle.
//! - **Atomic replace**: a copy lands in a hidden sibling temp file that is
//!   stamped and then renamed over the destination. An interrupted copy
//!   leaves the destination as it was; leftover temp files are never
//!   listed.
//! - **Lazy hashing**: `list_files` only stats; `get_file_info` computes a
//!   SHA-256 content hash.
//! - **Reachability**: every operation first checks the root. An unplugged
//!   device yields [`ProviderError::NotConnected`], a missing subtree under
//!   a reachable root yields an empty listing.

use std::ffi::OsString;
use std::future::Future;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::pin::Pin;

use chrono::{DateTime, Utc};
use fencesync_core::{
    domain::{DeviceIdentity, RelativePath, RemoteFileDescriptor},
    ports::{DeviceInfo, DeviceSyncProvider, ProviderError, ProviderResult, SyncProvider},
};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, BufReader};
use tracing::{debug, instrument, warn};

// ============================================================================
// FilesystemSyncProvider struct
// ============================================================================

/// Provider that maps relative remote paths onto a local mount root
#[derive(Debug, Clone)]
pub struct FilesystemSyncProvider {
    root: PathBuf,
    volume_label: Option<String>,
    serial_number: Option<String>,
}

impl FilesystemSyncProvider {
    /// Creates a provider rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            volume_label: None,
            serial_number: None,
        }
    }

    /// Creates a provider for a freshly connected device
    ///
    /// The identity's identifier is the mount root; label and serial are
    /// kept for [`DeviceSyncProvider::describe_device`].
    #[must_use]
    pub fn for_device(identity: &DeviceIdentity) -> Self {
        Self {
            root: PathBuf::from(&identity.identifier),
            volume_label: identity.volume_label.clone(),
            serial_number: identity.serial_number.clone(),
        }
    }

    /// The mount root this provider writes under
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn root_reachable(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn ensure_connected(&self) -> ProviderResult<()> {
        if self.root_reachable().await {
            Ok(())
        } else {
            Err(ProviderError::NotConnected(self.root.display().to_string()))
        }
    }

    fn resolve(&self, remote_path: &RelativePath) -> PathBuf {
        remote_path.to_path_under(&self.root)
    }
}

// ============================================================================
// Tree walking and copying helpers
// ============================================================================

/// Lists every regular file below `dir`, with paths relative to `base`
///
/// Directories are descended into but not reported. Entries whose names are
/// not valid UTF-8 are skipped with a warning.
pub async fn scan_directory(base: &Path, dir: &Path) -> io::Result<Vec<RemoteFileDescriptor>> {
    let mut out = Vec::new();
    walk(base, dir.to_path_buf(), &mut out).await?;
    Ok(out)
}

fn walk<'a>(
    base: &'a Path,
    dir: PathBuf,
    out: &'a mut Vec<RemoteFileDescriptor>,
) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                // Removed between readdir and stat.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };

            if metadata.is_dir() {
                walk(base, path, out).await?;
            } else if metadata.is_file() {
                if is_temp_file(&path) {
                    debug!(path = %path.display(), "Skipping in-progress copy");
                    continue;
                }
                let relative = path
                    .strip_prefix(base)
                    .ok()
                    .and_then(|p| RelativePath::from_path(p).ok());
                match relative {
                    Some(relative) => out.push(RemoteFileDescriptor::file(
                        relative,
                        metadata.len(),
                        modified_utc(&metadata)?,
                    )),
                    None => warn!(path = %path.display(), "Skipping unaddressable file"),
                }
            }
        }
        Ok(())
    })
}

fn modified_utc(metadata: &std::fs::Metadata) -> io::Result<DateTime<Utc>> {
    Ok(DateTime::<Utc>::from(metadata.modified()?))
}

/// Suffix of the hidden sibling a copy is staged in
const TEMP_SUFFIX: &str = ".fencesync-tmp";

/// Read size used when hashing
const HASH_CHUNK: usize = 64 * 1024;

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX))
}

/// `dir/name` → `dir/.name.fencesync-tmp`
fn temp_path_for(dst: &Path) -> io::Result<PathBuf> {
    let name = dst.file_name().ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("{} has no file name", dst.display()),
        )
    })?;
    let mut staged = OsString::from(".");
    staged.push(name);
    staged.push(TEMP_SUFFIX);
    Ok(dst.with_file_name(staged))
}

/// Copies `src` over `dst`, creating parent directories and carrying the
/// source modification time over
///
/// The destination is replaced by a rename, so on any failure it keeps its
/// previous content and mtime and the staged copy is removed.
pub async fn copy_preserving_mtime(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let modified = tokio::fs::metadata(src).await?.modified()?;
    let staged = temp_path_for(dst)?;

    let result = stage_and_replace(src, &staged, dst, modified).await;
    if result.is_err() {
        match tokio::fs::remove_file(&staged).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %staged.display(), error = %e, "Failed to remove staged copy"),
        }
    }
    result
}

async fn stage_and_replace(
    src: &Path,
    staged: &Path,
    dst: &Path,
    modified: std::time::SystemTime,
) -> io::Result<()> {
    tokio::fs::copy(src, staged).await?;

    let stamped = staged.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new().write(true).open(&stamped)?;
        file.set_modified(modified)?;
        file.sync_all()
    })
    .await
    .map_err(|e| io::Error::new(ErrorKind::Other, e))??;

    tokio::fs::rename(staged, dst).await
}

/// SHA-256 of a file, read in fixed-size chunks
pub async fn hash_file(path: &Path) -> io::Result<String> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = BufReader::with_capacity(HASH_CHUNK, file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn log_failure<T>(
    operation: &str,
    path: &RelativePath,
    result: ProviderResult<T>,
) -> ProviderResult<T> {
    if let Err(e) = &result {
        warn!(operation, path = %path, error = %e, "Filesystem provider operation failed");
    }
    result
}

#[cfg(unix)]
fn capacity(path: &Path) -> Option<(u64, u64)> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    // SAFETY: statvfs is plain old data and zero is a valid bit pattern.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and stat is a valid out-pointer.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    let fragment = stat.f_frsize as u64;
    Some((
        (stat.f_blocks as u64).saturating_mul(fragment),
        (stat.f_bavail as u64).saturating_mul(fragment),
    ))
}

#[cfg(not(unix))]
fn capacity(_path: &Path) -> Option<(u64, u64)> {
    None
}

// ============================================================================
// Operation bodies
// ============================================================================

impl FilesystemSyncProvider {
    async fn copy_in(&self, local_path: &Path, remote_path: &RelativePath) -> ProviderResult<()> {
        self.ensure_connected().await?;
        if remote_path.is_root() {
            return Err(ProviderError::InvalidPath(
                "cannot upload onto the root".into(),
            ));
        }
        copy_preserving_mtime(local_path, &self.resolve(remote_path)).await?;
        Ok(())
    }

    async fn copy_out(&self, remote_path: &RelativePath, local_path: &Path) -> ProviderResult<()> {
        self.ensure_connected().await?;
        let source = self.resolve(remote_path);
        match tokio::fs::metadata(&source).await {
            Ok(m) if m.is_file() => {}
            Ok(_) => {
                return Err(ProviderError::InvalidPath(format!(
                    "{remote_path} is not a file"
                )))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ProviderError::NotFound(remote_path.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        copy_preserving_mtime(&source, local_path).await?;
        Ok(())
    }

    async fn remove(&self, remote_path: &RelativePath) -> ProviderResult<()> {
        self.ensure_connected().await?;
        if remote_path.is_root() {
            return Err(ProviderError::InvalidPath(
                "refusing to delete the root".into(),
            ));
        }
        let target = self.resolve(remote_path);
        let metadata = match tokio::fs::metadata(&target).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ProviderError::NotFound(remote_path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&target).await?;
        } else {
            tokio::fs::remove_file(&target).await?;
        }
        Ok(())
    }

    async fn list(&self, remote_path: &RelativePath) -> ProviderResult<Vec<RemoteFileDescriptor>> {
        self.ensure_connected().await?;
        let dir = self.resolve(remote_path);
        match tokio::fs::metadata(&dir).await {
            Ok(m) if m.is_dir() => {}
            Ok(m) => {
                return Ok(vec![RemoteFileDescriptor::file(
                    remote_path.clone(),
                    m.len(),
                    modified_utc(&m)?,
                )])
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }
        Ok(scan_directory(&self.root, &dir).await?)
    }

    async fn describe(
        &self,
        remote_path: &RelativePath,
    ) -> ProviderResult<Option<RemoteFileDescriptor>> {
        self.ensure_connected().await?;
        let target = self.resolve(remote_path);
        let metadata = match tokio::fs::metadata(&target).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut descriptor = RemoteFileDescriptor::file(
            remote_path.clone(),
            metadata.len(),
            modified_utc(&metadata)?,
        );
        if metadata.is_dir() {
            descriptor.is_directory = true;
            descriptor.size = 0;
            return Ok(Some(descriptor));
        }

        let hash = hash_file(&target).await?;
        Ok(Some(descriptor.with_hash(hash)))
    }
}

// ============================================================================
// SyncProvider implementation
// ============================================================================

#[async_trait::async_trait]
impl SyncProvider for FilesystemSyncProvider {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn initialize(&self) -> ProviderResult<()> {
        let result = self.ensure_connected().await;
        if result.is_ok() {
            debug!("filesystem provider ready");
        }
        log_failure("initialize", &RelativePath::root(), result)
    }

    async fn is_authenticated(&self) -> bool {
        self.root_reachable().await
    }

    #[instrument(skip(self, remote_path), fields(root = %self.root.display(), remote = %remote_path))]
    async fn upload(&self, local_path: &Path, remote_path: &RelativePath) -> ProviderResult<()> {
        let result = self.copy_in(local_path, remote_path).await;
        if result.is_ok() {
            debug!("upload complete");
        }
        log_failure("upload", remote_path, result)
    }

    #[instrument(skip(self, remote_path), fields(root = %self.root.display(), remote = %remote_path))]
    async fn download(&self, remote_path: &RelativePath, local_path: &Path) -> ProviderResult<()> {
        let result = self.copy_out(remote_path, local_path).await;
        if result.is_ok() {
            debug!("download complete");
        }
        log_failure("download", remote_path, result)
    }

    #[instrument(skip(self, remote_path), fields(root = %self.root.display(), remote = %remote_path))]
    async fn delete(&self, remote_path: &RelativePath) -> ProviderResult<()> {
        let result = self.remove(remote_path).await;
        log_failure("delete", remote_path, result)
    }

    #[instrument(skip(self, remote_path), fields(root = %self.root.display(), remote = %remote_path))]
    async fn list_files(
        &self,
        remote_path: &RelativePath,
    ) -> ProviderResult<Vec<RemoteFileDescriptor>> {
        let result = self.list(remote_path).await;
        if let Ok(files) = &result {
            debug!(count = files.len(), "listing complete");
        }
        log_failure("list_files", remote_path, result)
    }

    #[instrument(skip(self, remote_path), fields(root = %self.root.display(), remote = %remote_path))]
    async fn get_file_info(
        &self,
        remote_path: &RelativePath,
    ) -> ProviderResult<Option<RemoteFileDescriptor>> {
        let result = self.describe(remote_path).await;
        log_failure("get_file_info", remote_path, result)
    }
}

// ============================================================================
// DeviceSyncProvider implementation
// ============================================================================

#[async_trait::async_trait]
impl DeviceSyncProvider for FilesystemSyncProvider {
    async fn is_connected(&self) -> bool {
        self.root_reachable().await
    }

    async fn describe_device(&self) -> Option<DeviceInfo> {
        if !self.root_reachable().await {
            return None;
        }

        let volume_label = self.volume_label.clone().or_else(|| {
            self.root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        });

        let root = self.root.clone();
        let space = tokio::task::spawn_blocking(move || capacity(&root))
            .await
            .ok()
            .flatten();

        Some(DeviceInfo {
            volume_label,
            serial_number: self.serial_number.clone(),
            total_bytes: space.map(|(total, _)| total),
            free_bytes: space.map(|(_, free)| free),
        })
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use tempfile::TempDir;

    use super::*;

    fn rel(s: &str) -> RelativePath {
        RelativePath::new(s).unwrap()
    }

    fn write(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    // ------------------------------------------------------------------
    // upload / download
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn upload_creates_parents_and_preserves_mtime() {
        let local = TempDir::new().unwrap();
        let mount = TempDir::new().unwrap();
        let src = write(local.path(), "a.txt", b"hello");
        let past = SystemTime::now() - Duration::from_secs(3600);
        set_mtime(&src, past);

        let provider = FilesystemSyncProvider::new(mount.path());
        provider.upload(&src, &rel("docs/2024/a.txt")).await.unwrap();

        let dst = mount.path().join("docs").join("2024").join("a.txt");
        assert_eq!(std::fs::read(&dst).unwrap(), b"hello");
        assert_eq!(
            std::fs::metadata(&dst).unwrap().modified().unwrap(),
            std::fs::metadata(&src).unwrap().modified().unwrap()
        );
    }

    #[tokio::test]
    async fn upload_overwrites_existing() {
        let local = TempDir::new().unwrap();
        let mount = TempDir::new().unwrap();
        write(mount.path(), "a.txt", b"old");
        let src = write(local.path(), "a.txt", b"new");

        let provider = FilesystemSyncProvider::new(mount.path());
        provider.upload(&src, &rel("a.txt")).await.unwrap();
        assert_eq!(std::fs::read(mount.path().join("a.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn failed_upload_leaves_destination_untouched() {
        let local = TempDir::new().unwrap();
        let mount = TempDir::new().unwrap();
        let dst = write(mount.path(), "a.txt", b"good");
        let past = SystemTime::now() - Duration::from_secs(3600);
        set_mtime(&dst, past);

        // A directory cannot be copied, so the copy fails mid-operation.
        let not_a_file = local.path().join("a.txt");
        std::fs::create_dir(&not_a_file).unwrap();

        let provider = FilesystemSyncProvider::new(mount.path());
        assert!(provider.upload(&not_a_file, &rel("a.txt")).await.is_err());

        assert_eq!(std::fs::read(&dst).unwrap(), b"good");
        assert_eq!(std::fs::metadata(&dst).unwrap().modified().unwrap(), past);
        let names: Vec<_> = std::fs::read_dir(mount.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a.txt")]);
    }

    #[tokio::test]
    async fn staged_copies_are_never_listed() {
        let mount = TempDir::new().unwrap();
        write(mount.path(), "docs/a.txt", b"complete");
        write(mount.path(), "docs/.a.txt.fencesync-tmp", b"FULL-CO");
        write(mount.path(), "docs/.b.txt.fencesync-tmp", b"partial");

        let provider = FilesystemSyncProvider::new(mount.path());
        let listed: Vec<String> = provider
            .list_files(&RelativePath::root())
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.path.to_string())
            .collect();
        assert_eq!(listed, vec!["docs/a.txt"]);
    }

    #[test]
    fn temp_path_is_hidden_sibling() {
        let staged = temp_path_for(Path::new("/media/usb/docs/a.txt")).unwrap();
        assert_eq!(staged, PathBuf::from("/media/usb/docs/.a.txt.fencesync-tmp"));
        assert!(is_temp_file(&staged));
        assert!(!is_temp_file(Path::new("/media/usb/docs/a.txt")));
        assert!(temp_path_for(Path::new("/")).is_err());
    }

    #[tokio::test]
    async fn download_missing_file_is_not_found() {
        let local = TempDir::new().unwrap();
        let mount = TempDir::new().unwrap();
        let provider = FilesystemSyncProvider::new(mount.path());

        let err = provider
            .download(&rel("missing.txt"), &local.path().join("missing.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn download_copies_into_nested_local_path() {
        let local = TempDir::new().unwrap();
        let mount = TempDir::new().unwrap();
        write(mount.path(), "x/y.bin", b"payload");

        let provider = FilesystemSyncProvider::new(mount.path());
        let dst = local.path().join("x").join("y.bin");
        provider.download(&rel("x/y.bin"), &dst).await.unwrap();
        assert_eq!(std::fs::read(dst).unwrap(), b"payload");
    }

    // ------------------------------------------------------------------
    // list_files
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn list_files_is_recursive_and_relative_to_root() {
        let mount = TempDir::new().unwrap();
        write(mount.path(), "backup/a.txt", b"1");
        write(mount.path(), "backup/sub/b.txt", b"22");
        write(mount.path(), "other/c.txt", b"333");

        let provider = FilesystemSyncProvider::new(mount.path());
        let mut files = provider.list_files(&rel("backup")).await.unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["backup/a.txt", "backup/sub/b.txt"]);
        assert_eq!(files[1].size, 2);
        assert_eq!(files[1].name, "b.txt");
        assert!(files.iter().all(|f| f.hash.is_none() && !f.is_directory));
    }

    #[tokio::test]
    async fn list_missing_subtree_is_empty() {
        let mount = TempDir::new().unwrap();
        let provider = FilesystemSyncProvider::new(mount.path());
        assert!(provider.list_files(&rel("nothing/here")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_root_is_not_connected() {
        let mount = TempDir::new().unwrap();
        let gone = mount.path().join("unplugged");
        let provider = FilesystemSyncProvider::new(&gone);

        assert!(!provider.is_authenticated().await);
        assert!(!provider.is_connected().await);
        assert!(provider.describe_device().await.is_none());
        let err = provider.list_files(&RelativePath::root()).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConnected(_)));
        assert!(provider.initialize().await.is_err());
    }

    // ------------------------------------------------------------------
    // get_file_info / delete
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn get_file_info_computes_sha256() {
        let mount = TempDir::new().unwrap();
        write(mount.path(), "hello.txt", b"hello");

        let provider = FilesystemSyncProvider::new(mount.path());
        let info = provider.get_file_info(&rel("hello.txt")).await.unwrap().unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(
            info.hash.as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );

        assert!(provider.get_file_info(&rel("nope.txt")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hash_spans_multiple_chunks() {
        let mount = TempDir::new().unwrap();
        let content: Vec<u8> = (0..(HASH_CHUNK * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let path = write(mount.path(), "big.bin", &content);

        let expected = format!("{:x}", Sha256::digest(&content));
        assert_eq!(hash_file(&path).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn delete_removes_files_and_directories() {
        let mount = TempDir::new().unwrap();
        write(mount.path(), "d/a.txt", b"1");
        write(mount.path(), "b.txt", b"2");

        let provider = FilesystemSyncProvider::new(mount.path());
        provider.delete(&rel("b.txt")).await.unwrap();
        provider.delete(&rel("d")).await.unwrap();
        assert!(!mount.path().join("b.txt").exists());
        assert!(!mount.path().join("d").exists());

        let err = provider.delete(&rel("b.txt")).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
        assert!(provider.delete(&RelativePath::root()).await.is_err());
    }

    // ------------------------------------------------------------------
    // describe_device
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn describe_device_uses_identity_and_falls_back_to_dir_name() {
        let mount = TempDir::new().unwrap();
        let root = mount.path().join("BACKUP");
        std::fs::create_dir(&root).unwrap();

        let identity = DeviceIdentity::new(root.to_string_lossy(), None, Some("SN123".into()));
        let provider = FilesystemSyncProvider::for_device(&identity);
        let info = provider.describe_device().await.unwrap();
        assert_eq!(info.volume_label.as_deref(), Some("BACKUP"));
        assert_eq!(info.serial_number.as_deref(), Some("SN123"));
        #[cfg(unix)]
        assert!(info.total_bytes.unwrap_or(0) >= info.free_bytes.unwrap_or(0));
    }
}

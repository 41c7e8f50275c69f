//! Provider-neutral description of a file on a target

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::RelativePath;

/// A file (or directory) as reported by a provider listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileDescriptor {
    pub name: String,
    /// Relative to the provider root, `/`-separated
    pub path: RelativePath,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Content hash, only filled in by `get_file_info`
    pub hash: Option<String>,
    pub is_directory: bool,
}

impl RemoteFileDescriptor {
    /// Describes a regular file without a hash
    pub fn file(path: RelativePath, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            name: path.file_name().to_string(),
            path,
            size,
            modified,
            hash: None,
            is_directory: false,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }
}

//! Include/exclude glob filtering
//!
//! Patterns are matched case-insensitively. A pattern without `/` is
//! matched against the file name only, so `*.tmp` excludes temporary files
//! at any depth; a pattern containing `/` is matched against the whole
//! relative path. An empty include list admits every file.

use fencesync_core::domain::RelativePath;
use glob::{MatchOptions, Pattern};

use crate::SyncError;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct CompiledPattern {
    pattern: Pattern,
    whole_path: bool,
}

impl CompiledPattern {
    fn compile(raw: &str) -> Result<Self, SyncError> {
        let pattern = Pattern::new(raw)
            .map_err(|e| SyncError::Configuration(format!("invalid pattern '{raw}': {e}")))?;
        Ok(Self {
            pattern,
            whole_path: raw.contains('/'),
        })
    }

    fn matches(&self, path: &RelativePath) -> bool {
        let subject = if self.whole_path {
            path.as_str()
        } else {
            path.file_name()
        };
        self.pattern.matches_with(subject, MATCH_OPTIONS)
    }
}

/// Compiled include and exclude lists of one configuration
#[derive(Debug, Clone, Default)]
pub struct FilePatterns {
    include: Vec<CompiledPattern>,
    exclude: Vec<CompiledPattern>,
}

impl FilePatterns {
    /// Compiles both lists
    ///
    /// # Errors
    /// Returns [`SyncError::Configuration`] naming the first malformed pattern.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, SyncError> {
        let compile = |list: &[String]| {
            list.iter()
                .map(|p| CompiledPattern::compile(p))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Whether a file at `path` is in scope
    #[must_use]
    pub fn is_included(&self, path: &RelativePath) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|p| p.matches(path));
        included && !self.exclude.iter().any(|p| p.matches(path))
    }
}

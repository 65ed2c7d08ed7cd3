//! Filesystem probe: the single choke point for filesystem truth during
//! resolution.
//!
//! No other module stats the filesystem to make a resolution decision; the
//! resolver asks here and only here.

use crate::utils::normalize_path;
use std::path::Path;

/// What a candidate path turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEntry {
    /// A regular file, carrying its normalized forward-slash path.
    File(String),
    /// A directory.
    Dir,
}

/// Resolve a candidate path to file / directory / absent.
///
/// Performs exactly one metadata syscall. Every failure, including
/// "no such entry" and permission errors, is reported as `None`.
#[must_use]
pub fn probe(path: &Path) -> Option<FsEntry> {
    let meta = std::fs::metadata(path).ok()?;
    if meta.is_dir() {
        Some(FsEntry::Dir)
    } else if meta.is_file() {
        Some(FsEntry::File(normalize_path(path)))
    } else {
        None
    }
}

/// Existence check for collaborator contracts (static middleware, manifest
/// walk). Same error model as [`probe`]: never raises.
#[must_use]
pub fn exists(path: &Path) -> bool {
    std::fs::metadata(path).is_ok()
}

//! Directory resolution abstraction for platform-specific paths.
//!
//! The artefact cache defaults to the per-user cache directory reported by
//! `directories-next` (for example `~/.cache/embedded-mongod` on Linux and
//! `~/Library/Caches/embedded-mongod` on macOS). The trait seam lets tests
//! substitute fixed directories without touching the real home directory.

use std::path::PathBuf;

/// Application name used for platform directory lookups.
const APPLICATION: &str = "embedded-mongod";

/// Source of platform-specific base directories.
#[cfg_attr(test, mockall::automock)]
pub trait BaseDirs {
    /// Return the per-user cache directory for this crate, if one exists.
    fn cache_dir(&self) -> Option<PathBuf>;
}

/// Resolves directories from the host platform conventions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBaseDirs;

impl BaseDirs for SystemBaseDirs {
    fn cache_dir(&self) -> Option<PathBuf> {
        directories_next::ProjectDirs::from("", "", APPLICATION)
            .map(|dirs| dirs.cache_dir().to_path_buf())
    }
}

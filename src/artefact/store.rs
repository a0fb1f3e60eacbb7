//! Cache of downloaded archives and extracted file sets.
//!
//! Layout under the store root:
//!
//! ```text
//! archives/<archive name>        published archives
//! extracted/<cache key>/         published file sets (with completion marker)
//! locks/<cache key>.lock         cross-process lock files
//! tmp/                           in-progress downloads and extractions
//! ```
//!
//! Every published path is produced in `tmp/` first and moved into place
//! with a rename, so readers never observe a partial archive or file set.
//! Work for one cache key is serialised twice: by an in-process mutex per
//! key and by an exclusive `fs2` lock on the key's lock file, which also
//! covers other processes sharing the directory. Different keys never wait
//! on each other.

use super::download::{ArchiveDownloader, DownloadError};
use super::extraction::{ArchiveExtractor, EntryPoint, ExtractedFileSet, ExtractionError};
use super::naming::{ArchiveName, CacheKey};
use crate::distribution::Distribution;
use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

const ARCHIVES_DIR: &str = "archives";
const EXTRACTED_DIR: &str = "extracted";
const LOCKS_DIR: &str = "locks";
const TMP_DIR: &str = "tmp";

/// Errors arising from artefact store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The archive could not be downloaded.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// The archive could not be extracted.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// A cache directory or entry could not be written, moved, or removed.
    #[error("cache operation on {path} failed: {source}")]
    Cache {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The cross-process lock for a cache key could not be acquired.
    #[error("failed to lock {path}: {source}")]
    Lock {
        /// Lock file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn cache(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Cache {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A distribution's cached archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artefact {
    distribution: Distribution,
    archive_path: PathBuf,
    cache_key: CacheKey,
}

impl Artefact {
    /// Return the distribution.
    #[must_use]
    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    /// Return where the archive is (or will be) published.
    #[must_use]
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Return the cache key.
    #[must_use]
    pub fn cache_key(&self) -> &CacheKey {
        &self.cache_key
    }

    /// Whether the archive has been published.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.archive_path.is_file()
    }
}

/// Downloads, extracts, and caches server distributions.
pub struct ArtefactStore {
    root: Utf8PathBuf,
    downloader: Arc<dyn ArchiveDownloader>,
    extractor: Arc<dyn ArchiveExtractor>,
    key_locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for ArtefactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtefactStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl ArtefactStore {
    /// Create a store rooted at `root`.
    ///
    /// Directories are created lazily on first use.
    #[must_use]
    pub fn new(
        root: impl Into<Utf8PathBuf>,
        downloader: Arc<dyn ArchiveDownloader>,
        extractor: Arc<dyn ArchiveExtractor>,
    ) -> Self {
        Self {
            root: root.into(),
            downloader,
            extractor,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Return the store root.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Describe the cached archive for `distribution` without touching disk.
    #[must_use]
    pub fn artefact(&self, distribution: &Distribution) -> Artefact {
        let archive = ArchiveName::for_distribution(distribution);
        Artefact {
            distribution: distribution.clone(),
            archive_path: self.dir(ARCHIVES_DIR).join(archive.filename()),
            cache_key: CacheKey::for_distribution(distribution),
        }
    }

    /// Return the extracted file set for `distribution`, downloading and
    /// extracting it on a cache miss.
    ///
    /// Concurrent callers for the same distribution wait for a single
    /// download and extraction; callers for other distributions proceed in
    /// parallel.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the archive cannot be downloaded or
    /// extracted, or the cache cannot be written. Nothing is published on
    /// failure, so a later call retries from scratch.
    pub fn extract_file_set(
        &self,
        distribution: &Distribution,
    ) -> Result<ExtractedFileSet, StoreError> {
        let key = CacheKey::for_distribution(distribution);
        let entry_dir = self.dir(EXTRACTED_DIR).join(key.as_str());
        if let Some(files) = published(&entry_dir) {
            log::trace!("cache hit for {distribution} at {}", entry_dir.display());
            return Ok(files);
        }

        let key_lock = self.key_lock(&key);
        let _in_process = key_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _cross_process = self.lock_file(&key)?;

        // Another caller may have published while this one was waiting.
        if let Some(files) = published(&entry_dir) {
            log::trace!("{distribution} published by a concurrent caller");
            return Ok(files);
        }
        if entry_dir.exists() {
            log::info!("discarding stale cache entry {}", entry_dir.display());
            fs::remove_dir_all(&entry_dir).map_err(StoreError::cache(&entry_dir))?;
        }
        self.materialise(distribution, &key, &entry_dir)
    }

    /// Delete a file set previously returned by this store.
    ///
    /// The cached archive is kept, so a later request re-extracts without
    /// downloading.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Cache`] when the directory cannot be removed.
    pub fn release(&self, files: &ExtractedFileSet) -> Result<(), StoreError> {
        let root = files.root();
        if !root.starts_with(self.dir(EXTRACTED_DIR)) {
            log::warn!("refusing to release {} outside the store", root.display());
            return Ok(());
        }
        match fs::remove_dir_all(root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::cache(root)(e)),
        }
    }

    /// Remove both the cached archive and the extracted file set for
    /// `distribution`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the key lock cannot be taken or a path
    /// cannot be removed.
    pub fn evict(&self, distribution: &Distribution) -> Result<(), StoreError> {
        let artefact = self.artefact(distribution);
        let key_lock = self.key_lock(artefact.cache_key());
        let _in_process = key_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _cross_process = self.lock_file(artefact.cache_key())?;

        let entry_dir = self.dir(EXTRACTED_DIR).join(artefact.cache_key().as_str());
        if entry_dir.exists() {
            fs::remove_dir_all(&entry_dir).map_err(StoreError::cache(&entry_dir))?;
        }
        if artefact.is_cached() {
            fs::remove_file(artefact.archive_path())
                .map_err(StoreError::cache(artefact.archive_path()))?;
        }
        Ok(())
    }

    fn materialise(
        &self,
        distribution: &Distribution,
        key: &CacheKey,
        entry_dir: &Path,
    ) -> Result<ExtractedFileSet, StoreError> {
        let archive_path = self.ensure_archive(distribution)?;

        let tmp = self.ensure_dir(TMP_DIR)?;
        let staging = tempfile::Builder::new()
            .prefix(&format!("{key}."))
            .tempdir_in(&tmp)
            .map_err(StoreError::cache(&tmp))?;
        let entry_point = EntryPoint::server(distribution.platform().operating_system());

        if let Err(e) = self
            .extractor
            .extract(&archive_path, staging.path(), &entry_point)
        {
            log::warn!("extraction of {} failed: {e}", archive_path.display());
            evict_archive(&archive_path);
            return Err(e.into());
        }

        let extracted = self.ensure_dir(EXTRACTED_DIR)?;
        fs::rename(staging.path(), entry_dir).map_err(StoreError::cache(entry_dir))?;
        log::info!("published {distribution} at {}", entry_dir.display());

        ExtractedFileSet::load_completed(entry_dir)?.ok_or_else(|| StoreError::Cache {
            path: extracted.join(key.as_str()),
            source: std::io::Error::other("completion marker missing after publish"),
        })
    }

    /// Return the published archive, downloading it first if needed.
    fn ensure_archive(&self, distribution: &Distribution) -> Result<PathBuf, StoreError> {
        let archive = ArchiveName::for_distribution(distribution);
        let archives = self.ensure_dir(ARCHIVES_DIR)?;
        let published = archives.join(archive.filename());
        if published.is_file() {
            log::debug!("reusing cached archive {}", published.display());
            return Ok(published);
        }

        let tmp = self.ensure_dir(TMP_DIR)?;
        let partial = tempfile::Builder::new()
            .prefix(&format!("{}.", archive.filename()))
            .suffix(".partial")
            .tempfile_in(&tmp)
            .map_err(StoreError::cache(&tmp))?
            .into_temp_path();
        self.downloader.fetch(distribution, &archive, &partial)?;
        partial.persist(&published).map_err(|e| StoreError::Cache {
            path: published.clone(),
            source: e.error,
        })?;
        Ok(published)
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    fn lock_file(&self, key: &CacheKey) -> Result<fs::File, StoreError> {
        let locks = self.ensure_dir(LOCKS_DIR)?;
        let path = locks.join(format!("{key}.lock"));
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| StoreError::Lock {
                path: path.clone(),
                source,
            })?;
        file.lock_exclusive()
            .map_err(|source| StoreError::Lock { path, source })?;
        Ok(file)
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.as_std_path().join(name)
    }

    fn ensure_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        let path = self.dir(name);
        fs::create_dir_all(&path).map_err(StoreError::cache(&path))?;
        Ok(path)
    }
}

/// Return the published file set in `entry_dir` if it is complete and its
/// executable still exists.
fn published(entry_dir: &Path) -> Option<ExtractedFileSet> {
    match ExtractedFileSet::load_completed(entry_dir) {
        Ok(Some(files)) if files.executable().is_file() => Some(files),
        Ok(Some(files)) => {
            log::info!(
                "cached executable {} is missing; re-materialising",
                files.executable().display()
            );
            None
        }
        Ok(None) => None,
        Err(e) => {
            log::warn!("ignoring unreadable cache entry {}: {e}", entry_dir.display());
            None
        }
    }
}

/// Remove an archive that failed to extract so the next attempt downloads
/// a fresh copy.
fn evict_archive(archive_path: &Path) {
    if let Err(e) = fs::remove_file(archive_path) {
        log::warn!("failed to evict {}: {e}", archive_path.display());
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

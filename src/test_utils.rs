//! Shared test utilities for the embedded-mongod crate.
//!
//! Builds server archives on the fly and provides a download client that
//! counts invocations, so the artefact store and supervisor can be exercised
//! without network access.

use crate::artefact::download::{ArchiveDownloader, DownloadError};
use crate::artefact::naming::ArchiveName;
use crate::config::CACHE_DIR_ENV;
use crate::distribution::Distribution;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One file inside a generated archive: `(path inside archive, contents)`.
pub type ArchiveEntry = (String, Vec<u8>);

/// Return the entries of a minimal server archive rooted at `stem`.
///
/// The layout mirrors upstream tarballs: `<stem>/bin/<executable_name>`, a
/// second tool under `bin`, and a licence file at the top level.
#[must_use]
pub fn server_archive_entries(
    stem: &str,
    executable_name: &str,
    executable: &[u8],
) -> Vec<ArchiveEntry> {
    vec![
        (format!("{stem}/bin/{executable_name}"), executable.to_vec()),
        (format!("{stem}/bin/mongo"), b"#!/bin/sh\nexit 0\n".to_vec()),
        (format!("{stem}/LICENSE-Community.txt"), b"licence".to_vec()),
    ]
}

/// Write a gzip-compressed tarball containing `entries`.
///
/// Entries are written with mode `0o644`, so the extractor must mark the
/// server executable itself.
///
/// # Errors
///
/// Returns any I/O error raised while writing the archive.
pub fn build_tgz_archive(archive_path: &Path, entries: &[ArchiveEntry]) -> io::Result<()> {
    let file = std::fs::File::create(archive_path)?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, contents.as_slice())?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}

/// Write a zip archive containing `entries`.
///
/// # Errors
///
/// Returns any I/O or zip error raised while writing the archive.
pub fn build_zip_archive(archive_path: &Path, entries: &[ArchiveEntry]) -> io::Result<()> {
    let file = std::fs::File::create(archive_path)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        writer.start_file(name.as_str(), options).map_err(io::Error::other)?;
        writer.write_all(contents)?;
    }
    writer.finish().map_err(io::Error::other)?;
    Ok(())
}

/// Return a tarball for `distribution` whose server executable is `executable`.
///
/// # Errors
///
/// Returns any I/O error raised while writing the temporary archive.
pub fn tgz_bytes_for(distribution: &Distribution, executable: &[u8]) -> io::Result<Vec<u8>> {
    let name = ArchiveName::for_distribution(distribution);
    let scratch = tempfile::tempdir()?;
    let path = scratch.path().join(name.filename());
    build_tgz_archive(&path, &server_archive_entries(name.stem(), "mongod", executable))?;
    std::fs::read(path)
}

/// Download client that serves a fixed archive and counts invocations.
#[derive(Debug)]
pub struct CountingDownloader {
    archive: Vec<u8>,
    calls: AtomicUsize,
    failures_remaining: AtomicUsize,
    delay: Duration,
}

impl CountingDownloader {
    /// Serve `archive` for every request.
    #[must_use]
    pub fn new(archive: Vec<u8>) -> Self {
        Self {
            archive,
            calls: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Sleep for `delay` inside every fetch, widening race windows.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the first `count` fetches with an HTTP error.
    #[must_use]
    pub fn with_failures(self, count: usize) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Return how many times `fetch` has been called.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ArchiveDownloader for CountingDownloader {
    fn fetch(
        &self,
        _distribution: &Distribution,
        archive: &ArchiveName,
        dest: &Path,
    ) -> Result<(), DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(DownloadError::HttpError {
                url: archive.filename(),
                reason: "simulated network failure".to_owned(),
            });
        }
        std::fs::write(dest, &self.archive)?;
        Ok(())
    }
}

/// Run `f` with the cache directory override pointing at `dir`.
pub fn with_cache_dir_override<R>(dir: &Path, f: impl FnOnce() -> R) -> R {
    temp_env::with_var(CACHE_DIR_ENV, Some(dir.as_os_str()), f)
}

/// Write an executable shell script to `path`.
///
/// # Errors
///
/// Returns any I/O error raised while writing the script or setting its mode.
#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, format!("#!/bin/sh\n{body}\n"))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

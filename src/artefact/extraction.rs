//! Archive extraction for server distributions.
//!
//! Unpacks `.tgz` and `.zip` archives with path traversal protection,
//! locates the server executable, marks it executable, and records the
//! result in a completion marker so repeated extraction into the same
//! directory is a no-op.

use super::naming::ArchiveFormat;
use crate::distribution::OperatingSystem;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

/// File written into an extraction root once unpacking has finished.
pub const COMPLETION_MARKER: &str = ".extraction-complete";

/// Directory that holds the server executable inside an archive.
const BIN_DIR: &str = "bin";

/// Base name of the supervised server executable.
const SERVER_BINARY: &str = "mongod";

/// The runnable entry point an extractor looks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    file_name: String,
}

impl EntryPoint {
    /// Return the server entry point for `operating_system`.
    ///
    /// # Examples
    ///
    /// ```
    /// use embedded_mongod::artefact::extraction::EntryPoint;
    /// use embedded_mongod::distribution::OperatingSystem;
    ///
    /// assert_eq!(EntryPoint::server(OperatingSystem::Windows).file_name(), "mongod.exe");
    /// assert_eq!(EntryPoint::server(OperatingSystem::Linux).file_name(), "mongod");
    /// ```
    #[must_use]
    pub fn server(operating_system: OperatingSystem) -> Self {
        let file_name = match operating_system {
            OperatingSystem::Windows => format!("{SERVER_BINARY}.exe"),
            _ => SERVER_BINARY.to_owned(),
        };
        Self { file_name }
    }

    /// Return the executable file name.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Whether `relative` names this entry point inside a `bin` directory.
    fn matches(&self, relative: &Path) -> bool {
        let in_bin = relative
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|dir| dir == BIN_DIR);
        in_bin && relative.file_name().is_some_and(|name| name == self.file_name.as_str())
    }
}

/// The unpacked contents of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFileSet {
    root: PathBuf,
    executable: PathBuf,
    auxiliary: Vec<PathBuf>,
}

impl ExtractedFileSet {
    /// Return the directory the archive was unpacked into.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the absolute path of the server executable.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Return the absolute paths of every other extracted file.
    #[must_use]
    pub fn auxiliary(&self) -> &[PathBuf] {
        &self.auxiliary
    }

    /// Load the file set recorded in `root`'s completion marker.
    ///
    /// Returns `Ok(None)` when no marker exists.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::Marker`] when the marker cannot be parsed
    /// and [`ExtractionError::Io`] when it cannot be read.
    pub fn load_completed(root: &Path) -> Result<Option<Self>, ExtractionError> {
        let marker_path = root.join(COMPLETION_MARKER);
        if !marker_path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&marker_path)?;
        let marker: CompletionMarker = serde_json::from_str(&content)?;
        Ok(Some(marker.into_file_set(root)))
    }
}

/// Relative layout persisted in the completion marker.
#[derive(Debug, Serialize, Deserialize)]
struct CompletionMarker {
    executable: PathBuf,
    auxiliary: Vec<PathBuf>,
}

impl CompletionMarker {
    fn into_file_set(self, root: &Path) -> ExtractedFileSet {
        ExtractedFileSet {
            root: root.to_path_buf(),
            executable: root.join(self.executable),
            auxiliary: self.auxiliary.into_iter().map(|p| root.join(p)).collect(),
        }
    }
}

/// Trait for extracting server archives, enabling test mocking.
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveExtractor: Send + Sync {
    /// Extract the archive at `archive_path` into `dest_dir` and locate
    /// `entry_point`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::PathTraversal`] if any entry attempts to
    /// escape the destination, [`ExtractionError::EntryPointNotFound`] if the
    /// executable is missing after a full unpack, and
    /// [`ExtractionError::Io`] on I/O failures.
    fn extract(
        &self,
        archive_path: &Path,
        dest_dir: &Path,
        entry_point: &EntryPoint,
    ) -> Result<ExtractedFileSet, ExtractionError>;
}

/// Errors arising from archive extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// I/O error during extraction.
    #[error("extraction I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The zip container could not be read.
    #[error("corrupt zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A path in the archive attempts to traverse outside the destination.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path from the archive entry.
        path: String,
    },

    /// The archive format could not be determined.
    #[error("unsupported archive format: {path}")]
    UnsupportedFormat {
        /// Path of the archive.
        path: PathBuf,
    },

    /// The archive contains no files.
    #[error("archive contains no files")]
    EmptyArchive,

    /// No executable with the expected name was found under a `bin` directory.
    #[error("no {expected} executable found under a bin directory")]
    EntryPointNotFound {
        /// The executable name that was expected.
        expected: String,
    },

    /// The completion marker could not be read or written.
    #[error("invalid completion marker: {0}")]
    Marker(#[from] serde_json::Error),
}

/// Default extractor using `flate2`/`tar` for tarballs and `zip` for zip
/// archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExtractor;

impl ArchiveExtractor for DefaultExtractor {
    fn extract(
        &self,
        archive_path: &Path,
        dest_dir: &Path,
        entry_point: &EntryPoint,
    ) -> Result<ExtractedFileSet, ExtractionError> {
        if let Some(existing) = ExtractedFileSet::load_completed(dest_dir)? {
            log::debug!("{} already extracted", dest_dir.display());
            return Ok(existing);
        }

        fs::create_dir_all(dest_dir)?;
        let files = match detect_format(archive_path)? {
            ArchiveFormat::Tgz => unpack_tgz(archive_path, dest_dir)?,
            ArchiveFormat::Zip => unpack_zip(archive_path, dest_dir)?,
        };
        if files.is_empty() {
            return Err(ExtractionError::EmptyArchive);
        }

        let executable = files
            .iter()
            .filter(|path| entry_point.matches(path))
            .min_by_key(|path| path.components().count())
            .cloned()
            .ok_or_else(|| ExtractionError::EntryPointNotFound {
                expected: entry_point.file_name().to_owned(),
            })?;
        mark_executable(&dest_dir.join(&executable))?;

        let marker = CompletionMarker {
            auxiliary: files.into_iter().filter(|p| *p != executable).collect(),
            executable,
        };
        write_marker(dest_dir, &marker)?;
        log::debug!(
            "extracted {} into {}",
            archive_path.display(),
            dest_dir.display()
        );
        Ok(marker.into_file_set(dest_dir))
    }
}

/// Determine the archive format from its name, falling back to the magic
/// bytes for archives stored under arbitrary names.
fn detect_format(archive_path: &Path) -> Result<ArchiveFormat, ExtractionError> {
    let by_name = archive_path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(ArchiveFormat::from_file_name);
    if let Some(format) = by_name {
        return Ok(format);
    }

    let mut magic = [0_u8; 2];
    fs::File::open(archive_path)?.read_exact(&mut magic)?;
    match magic {
        [0x1f, 0x8b] => Ok(ArchiveFormat::Tgz),
        [b'P', b'K'] => Ok(ArchiveFormat::Zip),
        _ => Err(ExtractionError::UnsupportedFormat {
            path: archive_path.to_path_buf(),
        }),
    }
}

fn unpack_tgz(archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
    let file = fs::File::open(archive_path)?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    let mut extracted = Vec::new();

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let entry_path = entry.path()?.into_owned();
        validate_entry_path(&entry_path)?;

        let dest_path = dest_dir.join(&entry_path);
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&dest_path)?;

        if entry.header().entry_type().is_file() {
            extracted.push(entry_path);
        }
    }
    Ok(extracted)
}

fn unpack_zip(archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, ExtractionError> {
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut extracted = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let entry_path = PathBuf::from(entry.name());
        validate_entry_path(&entry_path)?;

        let dest_path = dest_dir.join(&entry_path);
        if entry.is_dir() {
            fs::create_dir_all(&dest_path)?;
            continue;
        }
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut output = fs::File::create(&dest_path)?;
        std::io::copy(&mut entry, &mut output)?;
        extracted.push(entry_path);
    }
    Ok(extracted)
}

/// Validate that an entry path does not escape the destination directory
/// via `..` components or absolute paths.
fn validate_entry_path(path: &Path) -> Result<(), ExtractionError> {
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)));
    if escapes {
        return Err(ExtractionError::PathTraversal {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn write_marker(dest_dir: &Path, marker: &CompletionMarker) -> Result<(), ExtractionError> {
    let json = serde_json::to_string_pretty(marker)?;
    let partial = dest_dir.join(format!("{COMPLETION_MARKER}.partial"));
    fs::write(&partial, json)?;
    fs::rename(&partial, dest_dir.join(COMPLETION_MARKER))?;
    Ok(())
}

#[cfg(test)]
#[path = "extraction_tests.rs"]
mod tests;

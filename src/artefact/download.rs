//! Archive download clients.
//!
//! Provides a trait-based abstraction for retrieving server archives so the
//! artefact store can be driven by HTTP in production and by stubs or local
//! mirrors in tests.

use super::naming::ArchiveName;
use crate::distribution::{Distribution, OperatingSystem};
use camino::Utf8PathBuf;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

/// Default download base URL.
pub const DEFAULT_DOWNLOAD_BASE: &str = "https://fastdl.mongodb.org";

/// Network timeout for archive downloads.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Trait for retrieving the raw archive of a distribution.
///
/// Implementations write the complete archive to `dest`. The store always
/// passes a temporary path and publishes it only after this call succeeds.
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveDownloader: Send + Sync {
    /// Download the archive named `archive` for `distribution` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be retrieved or written.
    fn fetch(
        &self,
        distribution: &Distribution,
        archive: &ArchiveName,
        dest: &Path,
    ) -> Result<(), DownloadError>;
}

/// Errors arising from archive download operations.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// HTTP request failed.
    #[error("download failed for {url}: {reason}")]
    HttpError {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The requested archive was not found.
    #[error("archive not found: {location}")]
    NotFound {
        /// The URL or mirror path that was requested.
        location: String,
    },

    /// I/O error writing the downloaded file.
    #[error("I/O error writing download: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP-based downloader using `ureq`.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    base_url: String,
}

impl HttpDownloader {
    /// Create a downloader rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Construct the download URL for an archive.
    ///
    /// # Examples
    ///
    /// ```
    /// use embedded_mongod::artefact::download::HttpDownloader;
    /// use embedded_mongod::artefact::naming::ArchiveName;
    /// use embedded_mongod::distribution::{resolve, Architecture, OperatingSystem};
    ///
    /// let version = "4.2.0".parse().expect("valid version");
    /// let distribution = resolve(&version, OperatingSystem::Linux, Architecture::X86_64)
    ///     .expect("supported");
    /// let downloader = HttpDownloader::default();
    /// let url = downloader.archive_url(&distribution, &ArchiveName::for_distribution(&distribution));
    /// assert_eq!(url, "https://fastdl.mongodb.org/linux/mongodb-linux-x86_64-4.2.0.tgz");
    /// ```
    #[must_use]
    pub fn archive_url(&self, distribution: &Distribution, archive: &ArchiveName) -> String {
        let directory = os_directory(distribution.platform().operating_system());
        format!("{}/{directory}/{archive}", self.base_url)
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new(DEFAULT_DOWNLOAD_BASE)
    }
}

impl ArchiveDownloader for HttpDownloader {
    fn fetch(
        &self,
        distribution: &Distribution,
        archive: &ArchiveName,
        dest: &Path,
    ) -> Result<(), DownloadError> {
        let url = self.archive_url(distribution, archive);
        log::info!("downloading {url}");
        download_to_file(&url, dest)
    }
}

/// Downloader that copies archives from a local directory.
///
/// The mirror is expected to contain archives under their plain file names,
/// e.g. `<mirror>/mongodb-linux-x86_64-4.2.0.tgz`.
#[derive(Debug, Clone)]
pub struct MirrorDownloader {
    root: Utf8PathBuf,
}

impl MirrorDownloader {
    /// Create a downloader reading from `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArchiveDownloader for MirrorDownloader {
    fn fetch(
        &self,
        _distribution: &Distribution,
        archive: &ArchiveName,
        dest: &Path,
    ) -> Result<(), DownloadError> {
        let source = self.root.join(archive.filename());
        if !source.is_file() {
            return Err(DownloadError::NotFound {
                location: source.into_string(),
            });
        }
        log::debug!("copying {source} from mirror");
        std::fs::copy(source.as_std_path(), dest)?;
        Ok(())
    }
}

/// Return the download directory used for an operating system.
const fn os_directory(operating_system: OperatingSystem) -> &'static str {
    match operating_system {
        OperatingSystem::Linux => "linux",
        OperatingSystem::Windows => "windows",
        OperatingSystem::OsX => "osx",
        OperatingSystem::Solaris => "sunos5",
        OperatingSystem::FreeBsd => "freebsd",
    }
}

/// Download a URL and write the body to a file.
fn download_to_file(url: &str, dest: &Path) -> Result<(), DownloadError> {
    let response = http_agent()
        .get(url)
        .call()
        .map_err(|e| map_ureq_error(url, &e))?;
    let mut file = std::fs::File::create(dest)?;
    std::io::copy(&mut response.into_body().as_reader(), &mut file).map_err(DownloadError::Io)?;
    file.sync_all()?;
    Ok(())
}

/// Shared `ureq` agent with request timeout configuration.
fn http_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(DOWNLOAD_TIMEOUT))
            .build();
        ureq::Agent::new_with_config(config)
    })
}

/// Map a ureq error to a [`DownloadError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> DownloadError {
    match err {
        ureq::Error::StatusCode(404) => DownloadError::NotFound {
            location: url.to_owned(),
        },
        other => DownloadError::HttpError {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}

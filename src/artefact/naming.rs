//! Archive naming and cache keys for server distributions.
//!
//! Archive names follow the upstream download layout:
//! `mongodb-<os>-<arch>-<version>.<tgz|zip>`. Cache keys combine a readable
//! slug with a truncated SHA-256 of the distribution identity so that keys
//! are deterministic, filesystem-safe, and unique per distribution.

use crate::distribution::{Distribution, OperatingSystem};
use sha2::{Digest, Sha256};
use std::fmt;

/// The fixed prefix for all archive names.
const ARCHIVE_PREFIX: &str = "mongodb";

/// Hex characters of the identity digest kept in a cache key.
const KEY_DIGEST_LEN: usize = 16;

/// Archive container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    /// Gzip-compressed tarball.
    Tgz,
    /// Zip archive.
    Zip,
}

impl ArchiveFormat {
    /// Return the format used for downloads on `operating_system`.
    #[must_use]
    pub const fn for_os(operating_system: OperatingSystem) -> Self {
        match operating_system {
            OperatingSystem::Windows => Self::Zip,
            _ => Self::Tgz,
        }
    }

    /// Return the file extension without a leading dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Tgz => "tgz",
            Self::Zip => "zip",
        }
    }

    /// Infer the format from a file name.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tgz") || lower.ends_with(".tar.gz") {
            Some(Self::Tgz)
        } else if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// The archive file name for a distribution.
///
/// # Examples
///
/// ```
/// use embedded_mongod::artefact::naming::ArchiveName;
/// use embedded_mongod::distribution::{resolve, Architecture, OperatingSystem};
///
/// let version = "4.2.0".parse().expect("valid version");
/// let distribution = resolve(&version, OperatingSystem::Linux, Architecture::X86_64)
///     .expect("supported");
/// assert_eq!(
///     ArchiveName::for_distribution(&distribution).to_string(),
///     "mongodb-linux-x86_64-4.2.0.tgz"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveName {
    stem: String,
    format: ArchiveFormat,
}

impl ArchiveName {
    /// Derive the archive name for `distribution`.
    #[must_use]
    pub fn for_distribution(distribution: &Distribution) -> Self {
        let platform = distribution.platform();
        Self {
            stem: format!(
                "{ARCHIVE_PREFIX}-{}-{}-{}",
                platform.operating_system(),
                platform.architecture(),
                distribution.version()
            ),
            format: ArchiveFormat::for_os(platform.operating_system()),
        }
    }

    /// Return the name without the extension.
    #[must_use]
    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// Return the container format.
    #[must_use]
    pub const fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Return the file name as a string.
    #[must_use]
    pub fn filename(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stem, self.format.extension())
    }
}

/// Deterministic cache key for a distribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `distribution`.
    #[must_use]
    pub fn for_distribution(distribution: &Distribution) -> Self {
        let digest = format!("{:x}", Sha256::digest(distribution.identity().as_bytes()));
        let short = digest.get(..KEY_DIGEST_LEN).unwrap_or(&digest);
        let platform = distribution.platform();
        let slug: String = format!(
            "{}-{}-{}",
            distribution.version(),
            platform.operating_system(),
            platform.architecture()
        )
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '-' })
        .collect();
        Self(format!("{slug}-{short}"))
    }

    /// Return the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

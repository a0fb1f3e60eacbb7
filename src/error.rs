//! Error types for the embedded-mongod runtime.
//!
//! [`RuntimeError`] is the taxonomy callers match on. Module errors carry
//! the detail and convert into it, so `?` works across layers. No variant is
//! fatal to the runtime itself: a failed attempt leaves it reusable.

use crate::artefact::download::DownloadError;
use crate::artefact::extraction::ExtractionError;
use crate::artefact::store::StoreError;
use crate::config::ConfigError;
use crate::distribution::UnsupportedDistribution;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by `prepare` and `start`.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The version, platform, and feature combination was rejected.
    #[error(transparent)]
    UnsupportedDistribution(#[from] UnsupportedDistribution),

    /// The server archive could not be retrieved.
    #[error("download failed: {0}")]
    DownloadFailure(#[source] DownloadError),

    /// The archive is corrupt, unreadable, or has no server executable.
    #[error("extraction failed: {0}")]
    ExtractionFailure(#[source] ExtractionError),

    /// The server did not accept connections in time and was killed.
    #[error("mongod did not accept connections on port {port} within {}ms", timeout.as_millis())]
    StartupTimeout {
        /// Port the server was told to bind.
        port: u16,
        /// The timeout that elapsed.
        timeout: Duration,
        /// Output captured before the process was killed.
        output: Vec<String>,
    },

    /// The server exited before it became ready.
    #[error("mongod exited before becoming ready ({status})")]
    ProcessCrashed {
        /// Exit status as reported by the operating system.
        status: String,
        /// Output captured before the process exited.
        output: Vec<String>,
    },

    /// The requested port, or any ephemeral port, could not be reserved.
    #[error("port {port} unavailable: {reason}")]
    PortUnavailable {
        /// The requested port, or `0` for an ephemeral request.
        port: u16,
        /// Why the reservation failed.
        reason: String,
    },

    /// The configuration or request is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// An unexpected filesystem or process error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Return the process output captured for startup failures.
    #[must_use]
    pub fn output(&self) -> Option<&[String]> {
        match self {
            Self::StartupTimeout { output, .. } | Self::ProcessCrashed { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}

impl From<DownloadError> for RuntimeError {
    fn from(err: DownloadError) -> Self {
        Self::DownloadFailure(err)
    }
}

impl From<ExtractionError> for RuntimeError {
    fn from(err: ExtractionError) -> Self {
        Self::ExtractionFailure(err)
    }
}

impl From<StoreError> for RuntimeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Download(source) => Self::DownloadFailure(source),
            StoreError::Extraction(source) => Self::ExtractionFailure(source),
            StoreError::Cache { path, source } | StoreError::Lock { path, source } => {
                Self::Io(std::io::Error::new(
                    source.kind(),
                    format!("{}: {source}", path.display()),
                ))
            }
        }
    }
}

/// Result type alias using [`RuntimeError`].
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{Architecture, OperatingSystem, Version, resolve};
    use std::path::PathBuf;

    #[test]
    fn unsupported_distribution_is_transparent() {
        let version = Version::parse("4.2.0").expect("valid version");
        let rejected = resolve(&version, OperatingSystem::Solaris, Architecture::X86_64)
            .expect_err("solaris is unsupported");
        let expected = rejected.to_string();

        let err = RuntimeError::from(rejected);
        assert!(matches!(err, RuntimeError::UnsupportedDistribution(_)));
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn store_errors_map_onto_the_taxonomy() {
        let download = RuntimeError::from(StoreError::Download(DownloadError::NotFound {
            location: "https://example.test/a.tgz".to_owned(),
        }));
        assert!(matches!(download, RuntimeError::DownloadFailure(_)));

        let extraction = RuntimeError::from(StoreError::Extraction(ExtractionError::EmptyArchive));
        assert!(matches!(extraction, RuntimeError::ExtractionFailure(_)));

        let cache = RuntimeError::from(StoreError::Cache {
            path: PathBuf::from("/cache/tmp"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        });
        let RuntimeError::Io(io) = cache else {
            panic!("expected Io, got {cache:?}");
        };
        assert_eq!(io.kind(), std::io::ErrorKind::PermissionDenied);
        assert!(io.to_string().contains("/cache/tmp"));
    }

    #[test]
    fn startup_failures_expose_captured_output() {
        let err = RuntimeError::ProcessCrashed {
            status: "exit status: 3".to_owned(),
            output: vec!["boom".to_owned()],
        };
        assert_eq!(err.output(), Some(["boom".to_owned()].as_slice()));
        assert!(err.to_string().contains("exit status: 3"));

        let timeout = RuntimeError::StartupTimeout {
            port: 27017,
            timeout: Duration::from_millis(250),
            output: Vec::new(),
        };
        assert!(timeout.to_string().contains("27017"));
        assert!(timeout.to_string().contains("250ms"));
    }

    #[test]
    fn port_unavailable_names_the_port() {
        let err = RuntimeError::PortUnavailable {
            port: 27017,
            reason: "already reserved".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("27017"));
        assert!(msg.contains("already reserved"));
        assert!(err.output().is_none());
    }
}

//! Runtime configuration.
//!
//! Callers describe what they want with [`RuntimeSettings`], a plain serde
//! value that hosts can embed in their own configuration files. The
//! validating factory [`RuntimeConfig::new`] turns settings into an immutable
//! [`RuntimeConfig`], applying environment overrides and rejecting
//! inconsistent combinations. A runtime holds one config for its lifetime.
//!
//! Environment overrides:
//!
//! - `EMBEDDED_MONGOD_CACHE_DIR` replaces the artefact cache directory.
//! - `EMBEDDED_MONGOD_DOWNLOAD_URL` replaces the download source with an
//!   HTTP base URL.
//!
//! Blank values are ignored.

use crate::artefact::download::DEFAULT_DOWNLOAD_BASE;
use crate::dirs::{BaseDirs, SystemBaseDirs};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the artefact cache directory.
pub const CACHE_DIR_ENV: &str = "EMBEDDED_MONGOD_CACHE_DIR";

/// Subdirectory of the cache directory holding port lock files.
const PORT_LOCK_DIR: &str = "ports";

/// Environment variable overriding the download base URL.
pub const DOWNLOAD_URL_ENV: &str = "EMBEDDED_MONGOD_DOWNLOAD_URL";

/// Server options the supervisor manages itself.
const RESERVED_ARGS: &[&str] = &["--port", "--dbpath", "--bind_ip", "--ipv6"];

/// Errors arising from invalid settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Two settings that cannot be combined were both supplied.
    #[error("{first} and {second} cannot both be set")]
    Conflict {
        /// First conflicting setting.
        first: &'static str,
        /// Second conflicting setting.
        second: &'static str,
    },

    /// A setting has an unusable value.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Name of the setting.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// No cache directory was configured and none could be derived.
    #[error("no cache directory configured; set {CACHE_DIR_ENV} or cache_dir")]
    NoCacheDir,

    /// A path could not be represented as UTF-8.
    #[error("path is not valid UTF-8: {}", path.display())]
    NonUtf8Path {
        /// The offending path.
        path: PathBuf,
    },

    /// The running host is not a platform the server is distributed for.
    #[error("cannot detect a supported platform for this host; request one explicitly")]
    UnknownHost,
}

/// Network settings for supervised servers.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq, Hash)]
#[serde(default, deny_unknown_fields)]
pub struct NetSettings {
    /// Port to bind; `0` picks a free ephemeral port.
    pub port: u16,
    /// Also listen on the IPv6 loopback address.
    pub ipv6: bool,
}

/// Process supervision settings.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessSettings {
    /// How long to wait for the server to accept connections.
    pub startup_timeout_ms: u64,
    /// How long to wait after a graceful termination request before killing.
    pub stop_grace_period_ms: u64,
    /// Number of output lines kept for diagnostics.
    pub max_output_lines: usize,
    /// Additional server options appended to every command line.
    pub extra_args: Vec<String>,
}

impl ProcessSettings {
    const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 30_000;
    const DEFAULT_STOP_GRACE_PERIOD_MS: u64 = 5_000;
    const DEFAULT_MAX_OUTPUT_LINES: usize = 500;
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            startup_timeout_ms: Self::DEFAULT_STARTUP_TIMEOUT_MS,
            stop_grace_period_ms: Self::DEFAULT_STOP_GRACE_PERIOD_MS,
            max_output_lines: Self::DEFAULT_MAX_OUTPUT_LINES,
            extra_args: Vec::new(),
        }
    }
}

/// Unvalidated runtime settings.
///
/// # Examples
///
/// ```
/// use embedded_mongod::config::RuntimeSettings;
///
/// let settings: RuntimeSettings =
///     serde_json::from_str(r#"{ "net": { "port": 27018 } }"#).expect("valid settings");
/// assert_eq!(settings.net.port, 27018);
/// assert_eq!(settings.process.startup_timeout_ms, 30_000);
/// ```
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeSettings {
    /// Artefact cache directory. Defaults to the per-user cache directory.
    pub cache_dir: Option<Utf8PathBuf>,
    /// HTTP base URL archives are downloaded from.
    pub download_base: Option<String>,
    /// Local directory holding archives, used instead of HTTP.
    pub mirror_dir: Option<Utf8PathBuf>,
    /// Network settings.
    pub net: NetSettings,
    /// Process supervision settings.
    pub process: ProcessSettings,
}

/// Where archives come from.
#[derive(Clone, Debug, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadSource {
    /// Download over HTTP from a base URL.
    Http {
        /// Base URL without a trailing slash.
        base_url: String,
    },
    /// Copy from a local directory.
    Mirror {
        /// Directory containing archives by file name.
        root: Utf8PathBuf,
    },
}

/// Hex-encoded SHA-256 digest identifying a configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConfigFingerprint(String);

impl ConfigFingerprint {
    /// Return the digest as lowercase hex.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated, immutable runtime configuration.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    cache_dir: Utf8PathBuf,
    download_source: DownloadSource,
    net: NetSettings,
    startup_timeout: Duration,
    stop_grace_period: Duration,
    max_output_lines: usize,
    extra_args: Vec<String>,
    #[serde(skip)]
    fingerprint: ConfigFingerprint,
}

impl RuntimeConfig {
    /// Validate `settings` against the host environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when settings conflict, hold unusable values,
    /// or no cache directory can be determined.
    pub fn new(settings: RuntimeSettings) -> Result<Self, ConfigError> {
        Self::with_base_dirs(settings, &SystemBaseDirs)
    }

    /// Validate the default settings against the host environment.
    ///
    /// # Errors
    ///
    /// See [`RuntimeConfig::new`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(RuntimeSettings::default())
    }

    /// Validate `settings`, resolving the default cache directory through
    /// `dirs`.
    ///
    /// # Errors
    ///
    /// See [`RuntimeConfig::new`].
    pub fn with_base_dirs(
        settings: RuntimeSettings,
        dirs: &dyn BaseDirs,
    ) -> Result<Self, ConfigError> {
        let RuntimeSettings {
            cache_dir,
            download_base,
            mirror_dir,
            net,
            process,
        } = settings;

        if process.startup_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "startup_timeout_ms",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if process.max_output_lines == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_output_lines",
                reason: "must be greater than zero".to_owned(),
            });
        }
        check_extra_args(&process.extra_args)?;

        let mut config = Self {
            cache_dir: resolve_cache_dir(cache_dir, dirs)?,
            download_source: resolve_download_source(download_base, mirror_dir)?,
            net,
            startup_timeout: Duration::from_millis(process.startup_timeout_ms),
            stop_grace_period: Duration::from_millis(process.stop_grace_period_ms),
            max_output_lines: process.max_output_lines,
            extra_args: process.extra_args,
            fingerprint: ConfigFingerprint(String::new()),
        };
        config.fingerprint = fingerprint_of(&config)?;
        Ok(config)
    }

    /// Return the artefact cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Utf8Path {
        &self.cache_dir
    }

    /// Return the directory holding port lock files.
    ///
    /// Runtimes sharing a cache directory share port locks, so their
    /// reservations never collide.
    #[must_use]
    pub fn port_lock_dir(&self) -> Utf8PathBuf {
        self.cache_dir.join(PORT_LOCK_DIR)
    }

    /// Return where archives are fetched from.
    #[must_use]
    pub fn download_source(&self) -> &DownloadSource {
        &self.download_source
    }

    /// Return the default network settings.
    #[must_use]
    pub const fn net(&self) -> NetSettings {
        self.net
    }

    /// Return the readiness timeout.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    /// Return the grace period between termination request and kill.
    #[must_use]
    pub const fn stop_grace_period(&self) -> Duration {
        self.stop_grace_period
    }

    /// Return the number of output lines retained per process.
    #[must_use]
    pub const fn max_output_lines(&self) -> usize {
        self.max_output_lines
    }

    /// Return the extra server options.
    #[must_use]
    pub fn extra_args(&self) -> &[String] {
        &self.extra_args
    }

    /// Return the digest identifying this configuration.
    ///
    /// Equal configurations have equal fingerprints.
    #[must_use]
    pub fn fingerprint(&self) -> &ConfigFingerprint {
        &self.fingerprint
    }
}

/// Hash the canonical JSON form of `config`.
fn fingerprint_of(config: &RuntimeConfig) -> Result<ConfigFingerprint, ConfigError> {
    let canonical = serde_json::to_vec(config).map_err(|e| ConfigError::InvalidValue {
        field: "settings",
        reason: e.to_string(),
    })?;
    let digest = Sha256::digest(&canonical);
    Ok(ConfigFingerprint(
        digest.iter().map(|byte| format!("{byte:02x}")).collect(),
    ))
}

/// Reject server options the supervisor sets itself.
pub(crate) fn check_extra_args(args: &[String]) -> Result<(), ConfigError> {
    match args.iter().find(|arg| is_reserved(arg)) {
        Some(arg) => Err(ConfigError::InvalidValue {
            field: "extra_args",
            reason: format!("{arg} is managed by the supervisor"),
        }),
        None => Ok(()),
    }
}

fn is_reserved(arg: &str) -> bool {
    let name = arg.split_once('=').map_or(arg, |(name, _)| name);
    RESERVED_ARGS.contains(&name)
}

/// Read an environment override, treating blank values as absent.
fn env_override(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn resolve_cache_dir(
    configured: Option<Utf8PathBuf>,
    dirs: &dyn BaseDirs,
) -> Result<Utf8PathBuf, ConfigError> {
    if let Some(dir) = env_override(CACHE_DIR_ENV) {
        log::debug!("cache directory overridden by {CACHE_DIR_ENV}: {dir}");
        return Ok(Utf8PathBuf::from(dir));
    }
    if let Some(dir) = configured {
        return Ok(dir);
    }
    let dir = dirs.cache_dir().ok_or(ConfigError::NoCacheDir)?;
    Utf8PathBuf::try_from(dir).map_err(|e| ConfigError::NonUtf8Path {
        path: e.into_path_buf(),
    })
}

fn resolve_download_source(
    download_base: Option<String>,
    mirror_dir: Option<Utf8PathBuf>,
) -> Result<DownloadSource, ConfigError> {
    if let Some(base_url) = env_override(DOWNLOAD_URL_ENV) {
        log::debug!("download source overridden by {DOWNLOAD_URL_ENV}: {base_url}");
        return http_source(base_url, DOWNLOAD_URL_ENV);
    }
    match (download_base, mirror_dir) {
        (Some(_), Some(_)) => Err(ConfigError::Conflict {
            first: "download_base",
            second: "mirror_dir",
        }),
        (Some(base_url), None) => http_source(base_url, "download_base"),
        (None, Some(root)) => Ok(DownloadSource::Mirror { root }),
        (None, None) => http_source(DEFAULT_DOWNLOAD_BASE.to_owned(), "download_base"),
    }
}

fn http_source(base_url: String, field: &'static str) -> Result<DownloadSource, ConfigError> {
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!("{base_url} is not an http(s) URL"),
        });
    }
    Ok(DownloadSource::Http {
        base_url: base_url.trim_end_matches('/').to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirs::MockBaseDirs;
    use rstest::{fixture, rstest};

    #[fixture]
    fn base_dirs() -> MockBaseDirs {
        let mut dirs = MockBaseDirs::new();
        dirs.expect_cache_dir()
            .returning(|| Some(PathBuf::from("/home/user/.cache/embedded-mongod")));
        dirs
    }

    fn without_overrides<R>(f: impl FnOnce() -> R) -> R {
        temp_env::with_vars_unset([CACHE_DIR_ENV, DOWNLOAD_URL_ENV], f)
    }

    #[rstest]
    fn defaults_use_platform_cache_and_official_downloads(base_dirs: MockBaseDirs) {
        let config = without_overrides(|| {
            RuntimeConfig::with_base_dirs(RuntimeSettings::default(), &base_dirs)
        })
        .expect("valid config");

        assert_eq!(config.cache_dir().as_str(), "/home/user/.cache/embedded-mongod");
        assert_eq!(
            config.download_source(),
            &DownloadSource::Http {
                base_url: DEFAULT_DOWNLOAD_BASE.to_owned()
            }
        );
        assert_eq!(config.net(), NetSettings::default());
        assert_eq!(config.startup_timeout(), Duration::from_secs(30));
        assert_eq!(config.stop_grace_period(), Duration::from_secs(5));
        assert_eq!(config.max_output_lines(), 500);
    }

    #[rstest]
    fn explicit_cache_dir_beats_platform_default(base_dirs: MockBaseDirs) {
        let settings = RuntimeSettings {
            cache_dir: Some(Utf8PathBuf::from("/srv/cache")),
            ..RuntimeSettings::default()
        };
        let config = without_overrides(|| RuntimeConfig::with_base_dirs(settings, &base_dirs))
            .expect("valid config");
        assert_eq!(config.cache_dir().as_str(), "/srv/cache");
    }

    #[rstest]
    fn environment_beats_explicit_cache_dir(base_dirs: MockBaseDirs) {
        let settings = RuntimeSettings {
            cache_dir: Some(Utf8PathBuf::from("/srv/cache")),
            ..RuntimeSettings::default()
        };
        let config = temp_env::with_var(CACHE_DIR_ENV, Some("/tmp/override"), || {
            RuntimeConfig::with_base_dirs(settings, &base_dirs)
        })
        .expect("valid config");
        assert_eq!(config.cache_dir().as_str(), "/tmp/override");
    }

    #[rstest]
    fn blank_environment_value_is_ignored(base_dirs: MockBaseDirs) {
        let config = temp_env::with_var(CACHE_DIR_ENV, Some("   "), || {
            RuntimeConfig::with_base_dirs(RuntimeSettings::default(), &base_dirs)
        })
        .expect("valid config");
        assert_eq!(config.cache_dir().as_str(), "/home/user/.cache/embedded-mongod");
    }

    #[test]
    fn missing_platform_cache_dir_is_an_error() {
        let mut dirs = MockBaseDirs::new();
        dirs.expect_cache_dir().returning(|| None);
        let err = without_overrides(|| {
            RuntimeConfig::with_base_dirs(RuntimeSettings::default(), &dirs)
        })
        .expect_err("no cache dir");
        assert_eq!(err, ConfigError::NoCacheDir);
    }

    #[rstest]
    fn download_url_environment_override(base_dirs: MockBaseDirs) {
        let settings = RuntimeSettings {
            mirror_dir: Some(Utf8PathBuf::from("/srv/mirror")),
            ..RuntimeSettings::default()
        };
        let config = temp_env::with_var(DOWNLOAD_URL_ENV, Some("http://mirror.test/mongo/"), || {
            RuntimeConfig::with_base_dirs(settings, &base_dirs)
        })
        .expect("valid config");
        assert_eq!(
            config.download_source(),
            &DownloadSource::Http {
                base_url: "http://mirror.test/mongo".to_owned()
            }
        );
    }

    #[rstest]
    fn mirror_dir_selects_mirror_source(base_dirs: MockBaseDirs) {
        let settings = RuntimeSettings {
            mirror_dir: Some(Utf8PathBuf::from("/srv/mirror")),
            ..RuntimeSettings::default()
        };
        let config = without_overrides(|| RuntimeConfig::with_base_dirs(settings, &base_dirs))
            .expect("valid config");
        assert_eq!(
            config.download_source(),
            &DownloadSource::Mirror {
                root: Utf8PathBuf::from("/srv/mirror")
            }
        );
    }

    #[rstest]
    #[case::conflicting_sources(
        RuntimeSettings {
            download_base: Some("https://example.test".to_owned()),
            mirror_dir: Some(Utf8PathBuf::from("/srv/mirror")),
            ..RuntimeSettings::default()
        },
        "download_base and mirror_dir"
    )]
    #[case::non_http_base(
        RuntimeSettings {
            download_base: Some("ftp://example.test".to_owned()),
            ..RuntimeSettings::default()
        },
        "invalid download_base"
    )]
    #[case::zero_timeout(
        RuntimeSettings {
            process: ProcessSettings { startup_timeout_ms: 0, ..ProcessSettings::default() },
            ..RuntimeSettings::default()
        },
        "invalid startup_timeout_ms"
    )]
    #[case::zero_output_lines(
        RuntimeSettings {
            process: ProcessSettings { max_output_lines: 0, ..ProcessSettings::default() },
            ..RuntimeSettings::default()
        },
        "invalid max_output_lines"
    )]
    #[case::reserved_arg(
        RuntimeSettings {
            process: ProcessSettings {
                extra_args: vec!["--port=1234".to_owned()],
                ..ProcessSettings::default()
            },
            ..RuntimeSettings::default()
        },
        "--port=1234 is managed by the supervisor"
    )]
    fn inconsistent_settings_are_rejected(
        base_dirs: MockBaseDirs,
        #[case] settings: RuntimeSettings,
        #[case] expected: &str,
    ) {
        let err = without_overrides(|| RuntimeConfig::with_base_dirs(settings, &base_dirs))
            .expect_err("invalid settings");
        assert!(err.to_string().contains(expected), "unexpected error: {err}");
    }

    #[rstest]
    fn equal_settings_share_a_fingerprint(base_dirs: MockBaseDirs) {
        let (a, b, c) = without_overrides(|| {
            let a = RuntimeConfig::with_base_dirs(RuntimeSettings::default(), &base_dirs);
            let b = RuntimeConfig::with_base_dirs(RuntimeSettings::default(), &base_dirs);
            let c = RuntimeConfig::with_base_dirs(
                RuntimeSettings {
                    net: NetSettings { port: 27018, ipv6: false },
                    ..RuntimeSettings::default()
                },
                &base_dirs,
            );
            (a, b, c)
        });
        let (a, b, c) = (a.expect("a"), b.expect("b"), c.expect("c"));

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().as_str().len(), 64);
    }

    #[rstest]
    fn path_settings_deserialise_from_json(base_dirs: MockBaseDirs) {
        let settings: RuntimeSettings = serde_json::from_str(
            r#"{ "cache_dir": "/srv/cache", "mirror_dir": "/srv/mirror" }"#,
        )
        .expect("valid settings");
        assert_eq!(settings.cache_dir.as_deref(), Some(Utf8Path::new("/srv/cache")));

        let config = without_overrides(|| RuntimeConfig::with_base_dirs(settings, &base_dirs))
            .expect("valid config");
        assert_eq!(
            config.download_source(),
            &DownloadSource::Mirror {
                root: Utf8PathBuf::from("/srv/mirror")
            }
        );
        assert_eq!(config.port_lock_dir().as_str(), "/srv/cache/ports");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_str::<RuntimeSettings>(r#"{ "verbose": true }"#);
        assert!(result.is_err());
    }
}

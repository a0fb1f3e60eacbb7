//! The prepare → start → stop façade.
//!
//! A [`MongodRuntime`] owns one [`RuntimeConfig`], the artefact store built
//! from it, and a port registry. There is no process-wide instance: callers
//! create runtimes explicitly, and hosts that want to share them across call
//! sites use a [`RuntimeRegistry`], an owned cache keyed by configuration
//! fingerprint.
//!
//! Port reservations are also locked under the cache directory, so runtimes
//! sharing a cache directory never start two servers on one port, whether
//! they live in the same host process or not. Runtimes with separate cache
//! directories can share a registry through
//! [`MongodRuntime::with_port_registry`].
//!
//! # Examples
//!
//! ```no_run
//! use embedded_mongod::config::RuntimeConfig;
//! use embedded_mongod::runtime::{MongodRuntime, ServerRequest};
//!
//! # fn main() -> embedded_mongod::error::Result<()> {
//! let runtime = MongodRuntime::new(RuntimeConfig::from_env()?);
//! let request = ServerRequest::new("4.2.0".parse().expect("valid version"));
//! let mut server = runtime.prepare(&request)?.start()?;
//! println!("mongod listening on {:?}", server.port());
//! server.stop();
//! # Ok(())
//! # }
//! ```

use crate::artefact::download::{ArchiveDownloader, HttpDownloader, MirrorDownloader};
use crate::artefact::extraction::DefaultExtractor;
use crate::artefact::store::ArtefactStore;
use crate::config::{
    ConfigError, ConfigFingerprint, DownloadSource, NetSettings, RuntimeConfig, check_extra_args,
};
use crate::distribution::{Distribution, DistributionResolver, Platform, Version};
use crate::error::Result;
use crate::supervisor::{Executable, PortRegistry, ProcessHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Subdirectory of the cache directory holding the artefact store.
const STORE_DIR: &str = "artefacts";

/// One server to prepare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRequest {
    version: Version,
    platform: Option<Platform>,
    net: Option<NetSettings>,
    extra_args: Vec<String>,
}

impl ServerRequest {
    /// Request `version` for the host platform with the runtime's network
    /// settings.
    #[must_use]
    pub const fn new(version: Version) -> Self {
        Self {
            version,
            platform: None,
            net: None,
            extra_args: Vec::new(),
        }
    }

    /// Request the current production version.
    #[must_use]
    pub fn production() -> Self {
        Self::new(Version::production())
    }

    /// Target `platform` instead of the host.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Override the runtime's network settings.
    #[must_use]
    pub fn with_net(mut self, net: NetSettings) -> Self {
        self.net = Some(net);
        self
    }

    /// Override only the port.
    #[must_use]
    pub fn with_port(self, port: u16) -> Self {
        let ipv6 = self.net.is_some_and(|net| net.ipv6);
        self.with_net(NetSettings { port, ipv6 })
    }

    /// Append server options for this request.
    #[must_use]
    pub fn with_extra_args(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(extra);
        self
    }

    /// Return the requested version.
    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Return the requested platform, if any.
    #[must_use]
    pub const fn platform(&self) -> Option<Platform> {
        self.platform
    }
}

/// Composes resolution, caching, and supervision.
#[derive(Debug)]
pub struct MongodRuntime {
    config: Arc<RuntimeConfig>,
    resolver: DistributionResolver,
    store: Arc<ArtefactStore>,
    ports: Arc<PortRegistry>,
}

impl MongodRuntime {
    /// Create a runtime fetching archives from the configured source.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let downloader: Arc<dyn ArchiveDownloader> = match config.download_source() {
            DownloadSource::Http { base_url } => Arc::new(HttpDownloader::new(base_url.as_str())),
            DownloadSource::Mirror { root } => Arc::new(MirrorDownloader::new(root.clone())),
        };
        Self::with_downloader(config, downloader)
    }

    /// Create a runtime using a caller-supplied download client.
    #[must_use]
    pub fn with_downloader(config: RuntimeConfig, downloader: Arc<dyn ArchiveDownloader>) -> Self {
        let store = ArtefactStore::new(
            config.cache_dir().join(STORE_DIR),
            downloader,
            Arc::new(DefaultExtractor),
        );
        Self {
            config: Arc::new(config),
            resolver: DistributionResolver::default(),
            store: Arc::new(store),
            ports: PortRegistry::new(),
        }
    }

    /// Share `ports` with other runtimes so their reservations never collide.
    #[must_use]
    pub fn with_port_registry(mut self, ports: Arc<PortRegistry>) -> Self {
        self.ports = ports;
        self
    }

    /// Return the configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Return the artefact store.
    #[must_use]
    pub fn store(&self) -> &ArtefactStore {
        &self.store
    }

    /// Return the port registry.
    #[must_use]
    pub fn ports(&self) -> &Arc<PortRegistry> {
        &self.ports
    }

    /// Resolve the distribution `request` names.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RuntimeError::UnsupportedDistribution`] when
    /// the rule table rejects the combination and
    /// [`crate::error::RuntimeError::Config`] when no platform was requested
    /// and the host is not a known one.
    pub fn resolve(&self, request: &ServerRequest) -> Result<Distribution> {
        let platform = match request.platform {
            Some(platform) => platform,
            None => Platform::current().ok_or(ConfigError::UnknownHost)?,
        };
        Ok(self.resolver.resolve_platform(&request.version, platform)?)
    }

    /// Prepare a server without downloading or starting anything.
    ///
    /// # Errors
    ///
    /// Returns an error when the request does not resolve, carries reserved
    /// server options, or the cache directory cannot be created.
    pub fn prepare(&self, request: &ServerRequest) -> Result<Executable> {
        check_extra_args(&request.extra_args)?;
        let distribution = self.resolve(request)?;
        std::fs::create_dir_all(self.store.root())?;
        log::debug!("prepared {distribution}");

        let executable = Executable::new(
            distribution,
            Arc::clone(&self.config),
            Arc::clone(&self.store),
            Arc::clone(&self.ports),
        )
        .with_extra_args(request.extra_args.iter().cloned());
        Ok(match request.net {
            Some(net) => executable.with_net(net),
            None => executable,
        })
    }

    /// Prepare and start a server in one call.
    ///
    /// # Errors
    ///
    /// See [`MongodRuntime::prepare`] and [`Executable::start`].
    pub fn start(&self, request: &ServerRequest) -> Result<ProcessHandle> {
        self.prepare(request)?.start()
    }
}

/// Owned cache of runtimes keyed by configuration fingerprint.
///
/// Runtimes created here share one port registry.
#[derive(Debug, Default)]
pub struct RuntimeRegistry {
    runtimes: Mutex<HashMap<ConfigFingerprint, Arc<MongodRuntime>>>,
    ports: Arc<PortRegistry>,
}

impl RuntimeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the runtime for `config`, creating it on first use.
    ///
    /// Equal configurations return the same runtime.
    #[must_use]
    pub fn get_or_create(&self, config: RuntimeConfig) -> Arc<MongodRuntime> {
        self.get_or_create_with(config, MongodRuntime::new)
    }

    /// Like [`RuntimeRegistry::get_or_create`], building missing runtimes
    /// with `build`.
    #[must_use]
    pub fn get_or_create_with<F>(&self, config: RuntimeConfig, build: F) -> Arc<MongodRuntime>
    where
        F: FnOnce(RuntimeConfig) -> MongodRuntime,
    {
        let mut runtimes = self.runtimes.lock().unwrap_or_else(PoisonError::into_inner);
        let fingerprint = config.fingerprint().clone();
        let runtime = runtimes.entry(fingerprint).or_insert_with(|| {
            log::debug!("creating runtime for {}", config.fingerprint());
            Arc::new(build(config).with_port_registry(Arc::clone(&self.ports)))
        });
        Arc::clone(runtime)
    }

    /// Return the number of cached runtimes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runtimes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no runtime has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artefact::download::MockArchiveDownloader;
    use crate::config::{CACHE_DIR_ENV, DOWNLOAD_URL_ENV, RuntimeSettings};
    use crate::distribution::{Architecture, Feature, OperatingSystem};
    use crate::error::RuntimeError;
    use camino::{Utf8Path, Utf8PathBuf};
    use rstest::{fixture, rstest};

    struct Scratch {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
    }

    #[fixture]
    fn scratch() -> Scratch {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("UTF-8 path");
        Scratch { _dir: dir, root }
    }

    fn config(root: &Utf8Path, port: u16) -> RuntimeConfig {
        let settings = RuntimeSettings {
            cache_dir: Some(root.to_path_buf()),
            net: NetSettings { port, ipv6: false },
            ..RuntimeSettings::default()
        };
        temp_env::with_vars_unset([CACHE_DIR_ENV, DOWNLOAD_URL_ENV], || {
            RuntimeConfig::new(settings)
        })
        .expect("valid config")
    }

    fn untouched_downloader() -> Arc<dyn ArchiveDownloader> {
        let mut downloader = MockArchiveDownloader::new();
        downloader.expect_fetch().times(0);
        Arc::new(downloader)
    }

    fn version(raw: &str) -> Version {
        Version::parse(raw).expect("valid version")
    }

    #[rstest]
    fn prepare_resolves_without_downloading(scratch: Scratch) {
        let runtime = MongodRuntime::with_downloader(config(&scratch.root, 0), untouched_downloader());
        let request = ServerRequest::new(version("4.2.0"))
            .with_platform(Platform::new(OperatingSystem::Linux, Architecture::X86_64));

        let executable = runtime.prepare(&request).expect("prepared");

        assert_eq!(executable.distribution().identity(), "4.2.0:linux:x86_64");
        assert!(runtime.store().root().as_std_path().is_dir());
    }

    #[rstest]
    fn unsupported_distribution_never_reaches_the_store(scratch: Scratch) {
        let runtime = MongodRuntime::with_downloader(config(&scratch.root, 0), untouched_downloader());
        let request = ServerRequest::new(version("4.2.0"))
            .with_platform(Platform::new(OperatingSystem::Solaris, Architecture::X86_64));

        let err = runtime.prepare(&request).expect_err("solaris rejected");

        let RuntimeError::UnsupportedDistribution(rejection) = err else {
            panic!("expected UnsupportedDistribution, got {err:?}");
        };
        assert_eq!(rejection.feature, Feature::NoSolarisSupport);
        assert!(!runtime.store().root().as_std_path().exists());
    }

    #[rstest]
    fn request_overrides_network_settings(scratch: Scratch) {
        let runtime =
            MongodRuntime::with_downloader(config(&scratch.root, 27017), untouched_downloader());
        let base = ServerRequest::new(version("4.2.0"))
            .with_platform(Platform::new(OperatingSystem::Linux, Architecture::X86_64));

        let inherited = runtime.prepare(&base).expect("prepared");
        let overridden = runtime.prepare(&base.clone().with_port(0)).expect("prepared");

        assert_eq!(inherited.net().port, 27017);
        assert_eq!(overridden.net().port, 0);
    }

    #[rstest]
    fn reserved_request_arguments_are_rejected(scratch: Scratch) {
        let runtime = MongodRuntime::with_downloader(config(&scratch.root, 0), untouched_downloader());
        let request = ServerRequest::new(version("4.2.0"))
            .with_platform(Platform::new(OperatingSystem::Linux, Architecture::X86_64))
            .with_extra_args(["--dbpath".to_owned(), "/elsewhere".to_owned()]);

        let err = runtime.prepare(&request).expect_err("reserved option");
        assert!(matches!(err, RuntimeError::Config(ConfigError::InvalidValue { .. })));
    }

    #[rstest]
    fn registry_returns_one_runtime_per_configuration(scratch: Scratch) {
        let registry = RuntimeRegistry::new();

        let a = registry.get_or_create(config(&scratch.root, 0));
        let b = registry.get_or_create(config(&scratch.root, 0));
        let c = registry.get_or_create(config(&scratch.root, 27018));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(Arc::ptr_eq(a.ports(), c.ports()));
        assert_eq!(registry.len(), 2);
    }

    #[rstest]
    fn runtimes_sharing_a_cache_dir_never_share_a_port(scratch: Scratch) {
        let a = MongodRuntime::with_downloader(config(&scratch.root, 0), untouched_downloader());
        let b = MongodRuntime::with_downloader(config(&scratch.root, 0), untouched_downloader());
        let locks = a.config().port_lock_dir();
        assert_eq!(locks, b.config().port_lock_dir());

        let held = a
            .ports()
            .reserve_locked(0, locks.as_std_path())
            .expect("ephemeral port");
        let err = b
            .ports()
            .reserve_locked(held.port(), locks.as_std_path())
            .expect_err("port held by the other runtime");

        assert!(matches!(err, RuntimeError::PortUnavailable { port, .. } if port == held.port()));
        assert_eq!(b.ports().reserved_count(), 0);
    }

    #[test]
    fn separate_runtimes_do_not_share_port_registries() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("UTF-8 path");
        let a = MongodRuntime::with_downloader(config(&root, 0), untouched_downloader());
        let b = MongodRuntime::with_downloader(config(&root, 0), untouched_downloader());
        assert!(!Arc::ptr_eq(a.ports(), b.ports()));

        let shared = Arc::clone(a.ports());
        let c = MongodRuntime::with_downloader(config(&root, 0), untouched_downloader())
            .with_port_registry(shared);
        assert!(Arc::ptr_eq(a.ports(), c.ports()));
    }
}

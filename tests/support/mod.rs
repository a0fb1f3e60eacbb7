//! Test support utilities for the embedded-mongod integration tests.
//!
//! Provides scratch cache directories, configurations isolated from the
//! ambient environment, and archives wrapping the `mongod-stub` binary.

use camino::{Utf8Path, Utf8PathBuf};
use embedded_mongod::config::{
    CACHE_DIR_ENV, DOWNLOAD_URL_ENV, NetSettings, ProcessSettings, RuntimeConfig, RuntimeSettings,
};
use embedded_mongod::distribution::{Architecture, Distribution, OperatingSystem, Version, resolve};
use embedded_mongod::test_utils::tgz_bytes_for;
use tempfile::TempDir;

/// A temporary cache directory with a UTF-8 path.
pub struct Sandbox {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Sandbox {
    /// Return the sandbox root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

/// Create an empty sandbox.
pub fn sandbox() -> Sandbox {
    let dir = tempfile::tempdir().expect("temp dir");
    let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("UTF-8 temp dir");
    Sandbox { _dir: dir, root }
}

/// Build a configuration caching under `cache_dir`, unaffected by the
/// override environment variables.
pub fn isolated_config(cache_dir: &Utf8Path, process: ProcessSettings) -> RuntimeConfig {
    let settings = RuntimeSettings {
        cache_dir: Some(cache_dir.to_path_buf()),
        net: NetSettings::default(),
        process,
        ..RuntimeSettings::default()
    };
    temp_env::with_vars_unset([CACHE_DIR_ENV, DOWNLOAD_URL_ENV], || {
        RuntimeConfig::new(settings)
    })
    .expect("valid config")
}

/// Resolve `version` for Linux x86-64.
pub fn linux_x86_64(version: &str) -> Distribution {
    let version = Version::parse(version).expect("valid version");
    resolve(&version, OperatingSystem::Linux, Architecture::X86_64).expect("supported")
}

/// Return a tarball for `distribution` whose server is the `mongod-stub`
/// binary built alongside these tests.
pub fn stub_archive(distribution: &Distribution) -> Vec<u8> {
    let stub = std::fs::read(env!("CARGO_BIN_EXE_mongod-stub")).expect("read mongod-stub");
    tgz_bytes_for(distribution, &stub).expect("build stub archive")
}

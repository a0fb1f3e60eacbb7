//! Server command-line construction.
//!
//! The supervisor owns `--port`, `--dbpath`, `--bind_ip`, and `--ipv6`.
//! Version-dependent options come from the feature matrix; caller options
//! are appended last.

use crate::config::NetSettings;
use crate::distribution::{Distribution, Feature, FeatureMatrix};
use std::ffi::OsString;
use std::path::Path;

const LOOPBACK_V4: &str = "127.0.0.1";
const LOOPBACK_V4_V6: &str = "127.0.0.1,::1";

/// Inputs for one server command line.
#[derive(Debug, Clone, Copy)]
pub struct ServerArgs<'a> {
    /// The distribution being launched.
    pub distribution: &'a Distribution,
    /// Rule table consulted for version-dependent options.
    pub matrix: &'a FeatureMatrix,
    /// Port the server binds.
    pub port: u16,
    /// Scratch data directory.
    pub data_dir: &'a Path,
    /// Network preferences.
    pub net: NetSettings,
    /// Caller options appended verbatim.
    pub extra: &'a [String],
}

impl ServerArgs<'_> {
    /// Render the command line, excluding the executable.
    ///
    /// # Examples
    ///
    /// ```
    /// use embedded_mongod::config::NetSettings;
    /// use embedded_mongod::distribution::{resolve, Architecture, FeatureMatrix, OperatingSystem};
    /// use embedded_mongod::supervisor::args::ServerArgs;
    /// use std::path::Path;
    ///
    /// let version = "4.2.0".parse().expect("valid version");
    /// let distribution = resolve(&version, OperatingSystem::Linux, Architecture::X86_64)
    ///     .expect("supported");
    /// let args = ServerArgs {
    ///     distribution: &distribution,
    ///     matrix: &FeatureMatrix::builtin(),
    ///     port: 27017,
    ///     data_dir: Path::new("/tmp/db"),
    ///     net: NetSettings::default(),
    ///     extra: &[],
    /// }
    /// .render();
    /// assert_eq!(args[0], "--port");
    /// assert_eq!(args[1], "27017");
    /// ```
    #[must_use]
    pub fn render(&self) -> Vec<OsString> {
        let version = self.distribution.version();
        let mut args: Vec<OsString> = vec![
            "--port".into(),
            self.port.to_string().into(),
            "--dbpath".into(),
            self.data_dir.as_os_str().to_owned(),
            "--bind_ip".into(),
        ];
        if self.net.ipv6 {
            args.extend([LOOPBACK_V4_V6.into(), "--ipv6".into()]);
        } else {
            args.push(LOOPBACK_V4.into());
        }
        if !self.matrix.enabled(version, Feature::NoHttpInterfaceArg) {
            args.push("--nohttpinterface".into());
        }
        if self.matrix.enabled(version, Feature::SyncDelay) {
            args.extend(["--syncdelay".into(), "0".into()]);
        }
        args.extend(self.extra.iter().map(OsString::from));
        args
    }
}

//! Canonical distributions and the resolver that produces them.
//!
//! Resolution is a pure function of the requested triple and the rule table:
//! the resolver walks [`PLATFORM_CONSTRAINTS`] in order and rejects the
//! request at the first constraint whose feature is enabled for the version
//! and which applies to the platform.

use super::error::UnsupportedDistribution;
use super::feature::{Feature, FeatureMatrix};
use super::platform::{Architecture, BitSize, OperatingSystem, Platform};
use super::version::Version;
use serde::Serialize;
use std::fmt;

/// A canonical (version, platform) pair.
///
/// Only the resolver constructs distributions, so holding one proves the
/// combination passed every platform constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Distribution {
    version: Version,
    platform: Platform,
}

impl Distribution {
    /// Return the version.
    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Return the platform.
    #[must_use]
    pub const fn platform(&self) -> Platform {
        self.platform
    }

    /// Return the canonical identity string, e.g. `4.2.0:linux:x86_64`.
    #[must_use]
    pub fn identity(&self) -> String {
        format!(
            "{}:{}:{}",
            self.version,
            self.platform.operating_system(),
            self.platform.architecture()
        )
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.version, self.platform)
    }
}

/// A platform restriction expressed through a feature flag.
#[derive(Debug, Clone, Copy)]
pub struct PlatformConstraint {
    /// Feature that must be enabled for the restriction to apply.
    pub feature: Feature,
    /// Description reported when the restriction rejects a request.
    pub reason: &'static str,
    applies: fn(Platform) -> bool,
}

impl PlatformConstraint {
    /// Whether this constraint disqualifies `platform` for `version`.
    #[must_use]
    pub fn rejects(&self, matrix: &FeatureMatrix, version: &Version, platform: Platform) -> bool {
        (self.applies)(platform) && matrix.enabled(version, self.feature)
    }
}

fn is_32bit(platform: Platform) -> bool {
    platform.architecture().bit_size() == BitSize::B32
}

fn is_solaris(platform: Platform) -> bool {
    platform.operating_system() == OperatingSystem::Solaris
}

fn is_32bit_solaris(platform: Platform) -> bool {
    is_solaris(platform) && is_32bit(platform)
}

fn is_32bit_osx(platform: Platform) -> bool {
    platform.operating_system() == OperatingSystem::OsX && is_32bit(platform)
}

fn is_freebsd(platform: Platform) -> bool {
    platform.operating_system() == OperatingSystem::FreeBsd
}

fn is_arm64(platform: Platform) -> bool {
    platform.architecture() == Architecture::Aarch64
}

fn is_windows_arm64(platform: Platform) -> bool {
    platform.operating_system() == OperatingSystem::Windows && is_arm64(platform)
}

/// Platform restrictions in evaluation order.
pub const PLATFORM_CONSTRAINTS: &[PlatformConstraint] = &[
    PlatformConstraint {
        feature: Feature::Only64Bit,
        reason: "only 64-bit builds are published for this version",
        applies: is_32bit,
    },
    PlatformConstraint {
        feature: Feature::NoSolarisSupport,
        reason: "Solaris builds are no longer published",
        applies: is_solaris,
    },
    PlatformConstraint {
        feature: Feature::NoSolaris32Bit,
        reason: "32-bit Solaris builds are not published",
        applies: is_32bit_solaris,
    },
    PlatformConstraint {
        feature: Feature::NoOsX32Bit,
        reason: "32-bit macOS builds are not published",
        applies: is_32bit_osx,
    },
    PlatformConstraint {
        feature: Feature::NoFreeBsdSupport,
        reason: "FreeBSD builds are not published",
        applies: is_freebsd,
    },
    PlatformConstraint {
        feature: Feature::NoWindowsArm64,
        reason: "ARM64 Windows builds are not published",
        applies: is_windows_arm64,
    },
    PlatformConstraint {
        feature: Feature::NoArm64Support,
        reason: "ARM64 builds are not published for this version",
        applies: is_arm64,
    },
];

/// Resolves requested triples against a feature matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistributionResolver {
    matrix: FeatureMatrix,
}

impl DistributionResolver {
    /// Create a resolver over `matrix`.
    #[must_use]
    pub const fn new(matrix: FeatureMatrix) -> Self {
        Self { matrix }
    }

    /// Return the feature matrix consulted by this resolver.
    #[must_use]
    pub const fn matrix(&self) -> &FeatureMatrix {
        &self.matrix
    }

    /// Resolve a (version, operating system, architecture) triple.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedDistribution`] naming the first platform
    /// constraint that rejects the combination.
    pub fn resolve(
        &self,
        version: &Version,
        operating_system: OperatingSystem,
        architecture: Architecture,
    ) -> Result<Distribution, UnsupportedDistribution> {
        self.resolve_platform(version, Platform::new(operating_system, architecture))
    }

    /// Resolve a version against an already-constructed platform.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve`].
    pub fn resolve_platform(
        &self,
        version: &Version,
        platform: Platform,
    ) -> Result<Distribution, UnsupportedDistribution> {
        if let Some(constraint) = PLATFORM_CONSTRAINTS
            .iter()
            .find(|constraint| constraint.rejects(&self.matrix, version, platform))
        {
            return Err(UnsupportedDistribution {
                version: version.to_string(),
                platform,
                feature: constraint.feature,
                reason: constraint.reason,
            });
        }
        Ok(Distribution {
            version: version.clone(),
            platform,
        })
    }
}

/// Resolve a triple against the built-in rule table.
///
/// # Errors
///
/// See [`DistributionResolver::resolve`].
///
/// # Examples
///
/// ```
/// use embedded_mongod::distribution::platform::{Architecture, OperatingSystem};
/// use embedded_mongod::distribution::resolver::resolve;
///
/// let version = "4.2.0".parse().expect("valid version");
/// let distribution = resolve(&version, OperatingSystem::Linux, Architecture::X86_64)
///     .expect("supported");
/// assert_eq!(distribution.identity(), "4.2.0:linux:x86_64");
///
/// let rejected = resolve(&version, OperatingSystem::Solaris, Architecture::X86_64);
/// assert!(rejected.is_err());
/// ```
pub fn resolve(
    version: &Version,
    operating_system: OperatingSystem,
    architecture: Architecture,
) -> Result<Distribution, UnsupportedDistribution> {
    DistributionResolver::default().resolve(version, operating_system, architecture)
}

//! Capability flags and the version-keyed rule table.
//!
//! Rules are plain data: each [`FeatureRule`] names a [`Feature`], a
//! [`VersionRange`], and whether the feature is enabled inside that range.
//! [`FeatureMatrix::enabled`] walks the table in order and the first rule
//! matching both the feature and the version decides the answer. Later rules
//! are never consulted once a match is found, and a feature with no matching
//! rule is disabled.
//!
//! The built-in table, in evaluation order:
//!
//! | # | Feature                | Range          | Enabled |
//! |---|------------------------|----------------|---------|
//! | 1 | `SyncDelay`            | all            | yes     |
//! | 2 | `TextSearch`           | >= 2.4.0       | yes     |
//! | 3 | `StorageEngine`        | >= 3.0.0       | yes     |
//! | 4 | `NoChunkSizeArg`       | >= 3.4.0       | yes     |
//! | 5 | `Only64Bit`            | >= 3.4.0       | yes     |
//! | 6 | `NoHttpInterfaceArg`   | >= 3.6.0       | yes     |
//! | 7 | `NoBindIpToLocalhost`  | >= 3.6.0       | yes     |
//! | 8 | `NoSolarisSupport`     | >= 3.6.0       | yes     |
//! | 9 | `NoSolaris32Bit`       | all            | yes     |
//! | 10| `NoOsX32Bit`           | all            | yes     |
//! | 11| `NoFreeBsdSupport`     | all            | yes     |
//! | 12| `NoArm64Support`       | >= 4.4.0       | no      |
//! | 13| `NoArm64Support`       | all            | yes     |
//! | 14| `NoWindowsArm64`       | all            | yes     |

use super::version::{Version, VersionNumber};
use serde::{Serialize, Serializer};
use std::fmt;

/// A named capability flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// The server accepts `--syncdelay`.
    SyncDelay,
    /// Text indexes are available.
    TextSearch,
    /// The server accepts `--storageEngine`.
    StorageEngine,
    /// The server rejects `--nohttpinterface` (the HTTP interface is gone).
    NoHttpInterfaceArg,
    /// The server rejects `--chunkSize`.
    NoChunkSizeArg,
    /// Only 64-bit builds are published.
    Only64Bit,
    /// No Solaris builds are published.
    NoSolarisSupport,
    /// No 32-bit Solaris builds are published.
    NoSolaris32Bit,
    /// No 32-bit macOS builds are published.
    NoOsX32Bit,
    /// No FreeBSD builds are published.
    NoFreeBsdSupport,
    /// No ARM64 builds are published.
    NoArm64Support,
    /// No ARM64 Windows builds are published.
    NoWindowsArm64,
    /// The server binds to localhost by default.
    NoBindIpToLocalhost,
}

impl Feature {
    /// Return the conventional upper-case key, e.g. `NO_SOLARIS_SUPPORT`.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::SyncDelay => "SYNC_DELAY",
            Self::TextSearch => "TEXT_SEARCH",
            Self::StorageEngine => "STORAGE_ENGINE",
            Self::NoHttpInterfaceArg => "NO_HTTP_INTERFACE_ARG",
            Self::NoChunkSizeArg => "NO_CHUNKSIZE_ARG",
            Self::Only64Bit => "ONLY_64BIT",
            Self::NoSolarisSupport => "NO_SOLARIS_SUPPORT",
            Self::NoSolaris32Bit => "NO_SOLARIS_32BIT",
            Self::NoOsX32Bit => "NO_OSX_32BIT",
            Self::NoFreeBsdSupport => "NO_FREEBSD_SUPPORT",
            Self::NoArm64Support => "NO_ARM64_SUPPORT",
            Self::NoWindowsArm64 => "NO_WINDOWS_ARM64",
            Self::NoBindIpToLocalhost => "NO_BIND_IP_TO_LOCALHOST",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl Serialize for Feature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.key())
    }
}

/// A half-open version range: `from` is inclusive, `until` is exclusive, and
/// a missing bound is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    from: Option<VersionNumber>,
    until: Option<VersionNumber>,
}

impl VersionRange {
    /// Every version.
    pub const ALL: Self = Self {
        from: None,
        until: None,
    };

    /// Versions at or above `from`.
    #[must_use]
    pub const fn at_least(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            from: Some(VersionNumber::new(major, minor, patch)),
            until: None,
        }
    }

    /// Versions strictly below `until`.
    #[must_use]
    pub const fn below(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            from: None,
            until: Some(VersionNumber::new(major, minor, patch)),
        }
    }

    /// Versions in `[from, until)`.
    #[must_use]
    pub const fn between(from: VersionNumber, until: VersionNumber) -> Self {
        Self {
            from: Some(from),
            until: Some(until),
        }
    }

    /// Whether `number` falls inside the range.
    #[must_use]
    pub fn contains(&self, number: VersionNumber) -> bool {
        self.from.is_none_or(|from| number >= from) && self.until.is_none_or(|until| number < until)
    }
}

/// One row of the rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureRule {
    /// The feature this rule decides.
    pub feature: Feature,
    /// Versions the rule applies to.
    pub range: VersionRange,
    /// Whether the feature is enabled for matching versions.
    pub enabled: bool,
}

impl FeatureRule {
    const fn enable(feature: Feature, range: VersionRange) -> Self {
        Self {
            feature,
            range,
            enabled: true,
        }
    }

    const fn disable(feature: Feature, range: VersionRange) -> Self {
        Self {
            feature,
            range,
            enabled: false,
        }
    }
}

/// The built-in rule table. See the module documentation for the layout.
pub const BUILTIN_RULES: &[FeatureRule] = &[
    FeatureRule::enable(Feature::SyncDelay, VersionRange::ALL),
    FeatureRule::enable(Feature::TextSearch, VersionRange::at_least(2, 4, 0)),
    FeatureRule::enable(Feature::StorageEngine, VersionRange::at_least(3, 0, 0)),
    FeatureRule::enable(Feature::NoChunkSizeArg, VersionRange::at_least(3, 4, 0)),
    FeatureRule::enable(Feature::Only64Bit, VersionRange::at_least(3, 4, 0)),
    FeatureRule::enable(Feature::NoHttpInterfaceArg, VersionRange::at_least(3, 6, 0)),
    FeatureRule::enable(Feature::NoBindIpToLocalhost, VersionRange::at_least(3, 6, 0)),
    FeatureRule::enable(Feature::NoSolarisSupport, VersionRange::at_least(3, 6, 0)),
    FeatureRule::enable(Feature::NoSolaris32Bit, VersionRange::ALL),
    FeatureRule::enable(Feature::NoOsX32Bit, VersionRange::ALL),
    FeatureRule::enable(Feature::NoFreeBsdSupport, VersionRange::ALL),
    FeatureRule::disable(Feature::NoArm64Support, VersionRange::at_least(4, 4, 0)),
    FeatureRule::enable(Feature::NoArm64Support, VersionRange::ALL),
    FeatureRule::enable(Feature::NoWindowsArm64, VersionRange::ALL),
];

/// First-match-wins evaluator over an ordered rule table.
///
/// # Examples
///
/// ```
/// use embedded_mongod::distribution::feature::{Feature, FeatureMatrix};
/// use embedded_mongod::distribution::version::Version;
///
/// let matrix = FeatureMatrix::builtin();
/// let version: Version = "4.2.0".parse().expect("valid version");
/// assert!(matrix.enabled(&version, Feature::Only64Bit));
/// assert!(matrix.enabled(&version, Feature::NoArm64Support));
///
/// let newer: Version = "4.4.0".parse().expect("valid version");
/// assert!(!matrix.enabled(&newer, Feature::NoArm64Support));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMatrix {
    rules: &'static [FeatureRule],
}

impl FeatureMatrix {
    /// Use a caller-supplied rule table.
    #[must_use]
    pub const fn new(rules: &'static [FeatureRule]) -> Self {
        Self { rules }
    }

    /// Use [`BUILTIN_RULES`].
    #[must_use]
    pub const fn builtin() -> Self {
        Self::new(BUILTIN_RULES)
    }

    /// Return the rules in evaluation order.
    #[must_use]
    pub const fn rules(&self) -> &'static [FeatureRule] {
        self.rules
    }

    /// Whether `feature` is enabled for `version`.
    #[must_use]
    pub fn enabled(&self, version: &Version, feature: Feature) -> bool {
        self.rules
            .iter()
            .find(|rule| rule.feature == feature && rule.range.contains(version.number()))
            .is_some_and(|rule| rule.enabled)
    }

    /// Return every feature enabled for `version`, in first-rule order and
    /// without duplicates.
    #[must_use]
    pub fn enabled_features(&self, version: &Version) -> Vec<Feature> {
        let mut features: Vec<Feature> = Vec::new();
        for rule in self.rules {
            if !features.contains(&rule.feature) && self.enabled(version, rule.feature) {
                features.push(rule.feature);
            }
        }
        features
    }
}

impl Default for FeatureMatrix {
    fn default() -> Self {
        Self::builtin()
    }
}

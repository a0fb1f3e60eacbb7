//! Server version identifiers.
//!
//! A [`Version`] is a plain identifier such as `4.2.0`. Capability flags are
//! not attached to the value; they are looked up in the rule table held by
//! [`super::feature::FeatureMatrix`]. Equality and hashing use the identifier
//! only, so two versions compare equal exactly when their identifiers do.

use super::error::VersionParseError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Server versions the crate knows how to resolve by default.
///
/// Ordered oldest first. The newest entry backs the `production` and
/// `latest` aliases.
pub const KNOWN_VERSIONS: &[&str] = &[
    "2.6.12", "3.0.15", "3.2.22", "3.4.24", "3.6.23", "4.0.28", "4.2.0", "4.2.25", "4.4.29",
    "5.0.26", "6.0.15", "7.0.12",
];

/// Aliases accepted in place of a concrete identifier.
const PRODUCTION_ALIASES: &[&str] = &["production", "latest"];

/// Numeric `major.minor.patch` triple used for range comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionNumber {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
}

impl VersionNumber {
    /// Create a version number from its components.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A server version identifier.
///
/// # Examples
///
/// ```
/// use embedded_mongod::distribution::version::Version;
///
/// let version: Version = "4.2.0".parse().expect("valid version");
/// assert_eq!(version.as_str(), "4.2.0");
/// assert_eq!(version.number().minor, 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    identifier: String,
    number: VersionNumber,
}

impl Version {
    /// Parse a version identifier, resolving the `production`/`latest`
    /// aliases to the newest known version.
    ///
    /// # Errors
    ///
    /// Returns [`VersionParseError`] when the identifier is empty or is not a
    /// dotted numeric triple (an optional pre-release suffix after `-` is
    /// kept in the identifier but ignored for ordering).
    pub fn parse(identifier: &str) -> Result<Self, VersionParseError> {
        let trimmed = identifier.trim();
        if PRODUCTION_ALIASES.contains(&trimmed.to_ascii_lowercase().as_str()) {
            return Ok(Self::production());
        }
        let number = parse_number(trimmed)?;
        Ok(Self {
            identifier: trimmed.to_owned(),
            number,
        })
    }

    /// Return the newest version in [`KNOWN_VERSIONS`].
    #[must_use]
    pub fn production() -> Self {
        known_versions()
            .last()
            .cloned()
            .unwrap_or_else(|| Self::from_number(VersionNumber::new(7, 0, 12)))
    }

    /// Return the identifier exactly as it appears in download paths.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.identifier
    }

    /// Return the numeric triple.
    #[must_use]
    pub const fn number(&self) -> VersionNumber {
        self.number
    }

    fn from_number(number: VersionNumber) -> Self {
        Self {
            identifier: number.to_string(),
            number,
        }
    }
}

/// Return every entry of [`KNOWN_VERSIONS`] as a parsed [`Version`].
#[must_use]
pub fn known_versions() -> Vec<Version> {
    KNOWN_VERSIONS
        .iter()
        .filter_map(|identifier| parse_number(identifier).ok().map(Version::from_number))
        .collect()
}

fn parse_number(identifier: &str) -> Result<VersionNumber, VersionParseError> {
    if identifier.is_empty() {
        return Err(VersionParseError::Empty);
    }
    let release = identifier.split('-').next().unwrap_or(identifier);
    let mut parts = release.split('.');
    let mut component = |name: &'static str| -> Result<u32, VersionParseError> {
        let raw = parts.next().ok_or_else(|| VersionParseError::Malformed {
            value: identifier.to_owned(),
            reason: format!("missing {name} component"),
        })?;
        raw.parse::<u32>()
            .map_err(|e| VersionParseError::Malformed {
                value: identifier.to_owned(),
                reason: format!("invalid {name} component \"{raw}\": {e}"),
            })
    };
    let major = component("major")?;
    let minor = component("minor")?;
    let patch = component("patch")?;
    if parts.next().is_some() {
        return Err(VersionParseError::Malformed {
            value: identifier.to_owned(),
            reason: "expected exactly three components".to_owned(),
        });
    }
    Ok(VersionNumber::new(major, minor, patch))
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number
            .cmp(&other.number)
            .then_with(|| self.identifier.cmp(&other.identifier))
    }
}

impl std::str::FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.identifier
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier)
    }
}

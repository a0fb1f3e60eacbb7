//! Error types for version parsing and distribution resolution.
//!
//! Each variant names the rejected input and the constraint it violated.

use super::feature::Feature;
use super::platform::Platform;
use thiserror::Error;

/// Errors arising from invalid version identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    /// The identifier was empty.
    #[error("version identifier is empty")]
    Empty,

    /// The identifier is not a `major.minor.patch` triple.
    #[error("invalid version \"{value}\": {reason}")]
    Malformed {
        /// The rejected identifier.
        value: String,
        /// Description of the validation failure.
        reason: String,
    },
}

/// Errors arising from unknown operating system or architecture names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformParseError {
    /// The operating system name is not recognised.
    #[error("unknown operating system \"{value}\"; expected one of: {expected}")]
    UnknownOperatingSystem {
        /// The rejected name.
        value: String,
        /// Comma-separated list of accepted names.
        expected: String,
    },

    /// The architecture name is not recognised.
    #[error("unknown architecture \"{value}\"; expected one of: {expected}")]
    UnknownArchitecture {
        /// The rejected name.
        value: String,
        /// Comma-separated list of accepted names.
        expected: String,
    },
}

/// The requested version cannot run on the requested platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported distribution: version {version} on {platform} ({feature}: {reason})")]
pub struct UnsupportedDistribution {
    /// Version identifier that was requested.
    pub version: String,
    /// Platform that was requested.
    pub platform: Platform,
    /// The rule that disqualified the combination.
    pub feature: Feature,
    /// Human-readable description of the rule.
    pub reason: &'static str,
}

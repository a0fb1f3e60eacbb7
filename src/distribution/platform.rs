//! Operating system and architecture values.
//!
//! A [`Platform`] pairs the two and is immutable. Names accepted by
//! [`std::str::FromStr`] follow the spellings used in download paths and in
//! `std::env::consts`, so `Platform::current()` and user input agree.

use super::error::PlatformParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating systems the server is distributed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingSystem {
    /// Linux distributions.
    Linux,
    /// Microsoft Windows.
    Windows,
    /// Apple macOS.
    OsX,
    /// Oracle Solaris.
    Solaris,
    /// FreeBSD.
    FreeBsd,
}

impl OperatingSystem {
    /// Every operating system, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Linux,
        Self::Windows,
        Self::OsX,
        Self::Solaris,
        Self::FreeBsd,
    ];

    /// Return the lowercase name used in cache keys and download paths.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::OsX => "osx",
            Self::Solaris => "solaris",
            Self::FreeBsd => "freebsd",
        }
    }

    /// Detect the operating system of the running host.
    #[must_use]
    pub fn current() -> Option<Self> {
        std::env::consts::OS.parse().ok()
    }
}

impl std::str::FromStr for OperatingSystem {
    type Err = PlatformParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linux" => Ok(Self::Linux),
            "windows" | "win32" => Ok(Self::Windows),
            "osx" | "macos" | "darwin" => Ok(Self::OsX),
            "solaris" | "sunos5" => Ok(Self::Solaris),
            "freebsd" => Ok(Self::FreeBsd),
            other => Err(PlatformParseError::UnknownOperatingSystem {
                value: other.to_owned(),
                expected: names(Self::ALL.iter().map(|os| os.as_str())),
            }),
        }
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pointer width of an architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitSize {
    /// 32-bit.
    B32,
    /// 64-bit.
    B64,
}

/// CPU architectures the server is distributed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    /// 32-bit x86.
    X86_32,
    /// 64-bit x86.
    X86_64,
    /// 64-bit ARM.
    Aarch64,
}

impl Architecture {
    /// Every architecture, in declaration order.
    pub const ALL: [Self; 3] = [Self::X86_32, Self::X86_64, Self::Aarch64];

    /// Return the name used in cache keys and download paths.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X86_32 => "i686",
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
        }
    }

    /// Return the pointer width.
    #[must_use]
    pub const fn bit_size(self) -> BitSize {
        match self {
            Self::X86_32 => BitSize::B32,
            Self::X86_64 | Self::Aarch64 => BitSize::B64,
        }
    }

    /// Detect the architecture of the running host.
    #[must_use]
    pub fn current() -> Option<Self> {
        std::env::consts::ARCH.parse().ok()
    }
}

impl std::str::FromStr for Architecture {
    type Err = PlatformParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x86" | "i386" | "i686" | "x86_32" => Ok(Self::X86_32),
            "x86_64" | "amd64" => Ok(Self::X86_64),
            "aarch64" | "arm64" => Ok(Self::Aarch64),
            other => Err(PlatformParseError::UnknownArchitecture {
                value: other.to_owned(),
                expected: names(Self::ALL.iter().map(|arch| arch.as_str())),
            }),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operating system and architecture pair.
///
/// # Examples
///
/// ```
/// use embedded_mongod::distribution::platform::{Architecture, OperatingSystem, Platform};
///
/// let platform = Platform::new(OperatingSystem::Linux, Architecture::X86_64);
/// assert_eq!(platform.to_string(), "linux-x86_64");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    operating_system: OperatingSystem,
    architecture: Architecture,
}

impl Platform {
    /// Create a platform from its components.
    #[must_use]
    pub const fn new(operating_system: OperatingSystem, architecture: Architecture) -> Self {
        Self {
            operating_system,
            architecture,
        }
    }

    /// Detect the running host, or `None` when either component is not one
    /// the server is distributed for.
    #[must_use]
    pub fn current() -> Option<Self> {
        Some(Self::new(OperatingSystem::current()?, Architecture::current()?))
    }

    /// Return the operating system.
    #[must_use]
    pub const fn operating_system(&self) -> OperatingSystem {
        self.operating_system
    }

    /// Return the architecture.
    #[must_use]
    pub const fn architecture(&self) -> Architecture {
        self.architecture
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.operating_system, self.architecture)
    }
}

fn names<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values.collect::<Vec<_>>().join(", ")
}

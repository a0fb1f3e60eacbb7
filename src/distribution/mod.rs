//! Versions, platforms, capability flags, and distribution resolution.
//!
//! # Sub-modules
//!
//! - [`error`]: Parse and resolution errors.
//! - [`feature`]: Capability flags and the first-match rule table.
//! - [`platform`]: Operating system and architecture values.
//! - [`resolver`]: Canonical `Distribution` values and the resolver.
//! - [`version`]: Version identifiers and the known-version list.

pub mod error;
pub mod feature;
pub mod platform;
pub mod resolver;
pub mod version;

pub use error::UnsupportedDistribution;
pub use feature::{Feature, FeatureMatrix};
pub use platform::{Architecture, OperatingSystem, Platform};
pub use resolver::{Distribution, DistributionResolver, resolve};
pub use version::Version;

//! Download, cache, and supervise disposable `mongod` instances.
//!
//! The crate resolves a requested server version and platform into a
//! supported distribution, fetches and unpacks its archive exactly once
//! into a shared on-disk cache, and runs the server as a child process that
//! is stopped deterministically.
//!
//! # Modules
//!
//! - [`distribution`]: Versions, platforms, the feature rule table, and the
//!   resolver.
//! - [`artefact`]: Download clients, archive extraction, and the cache.
//! - [`supervisor`]: Port reservation and process lifecycle.
//! - [`runtime`]: The `prepare → start → stop` façade.
//! - [`config`]: Validated runtime configuration.
//! - [`dirs`]: Platform cache directory lookup.
//! - [`error`]: The crate error taxonomy.
//!
//! The crate logs through the `log` facade and installs no logger.

pub mod artefact;
pub mod config;
pub mod dirs;
pub mod distribution;
pub mod error;
pub mod runtime;
pub mod supervisor;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

pub use config::{RuntimeConfig, RuntimeSettings};
pub use distribution::{Distribution, Version};
pub use error::{Result, RuntimeError};
pub use runtime::{MongodRuntime, RuntimeRegistry, ServerRequest};
pub use supervisor::{Executable, ProcessHandle, ProcessState};

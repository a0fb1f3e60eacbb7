//! Supervision of server processes.
//!
//! # Sub-modules
//!
//! - [`args`]: Server command-line construction.
//! - [`output`]: Bounded capture of process output.
//! - [`port`]: Atomic port reservation.
//! - [`process`]: `Executable` and `ProcessHandle`.

use std::fmt;

pub mod args;
pub mod output;
pub mod port;
pub mod process;

pub use port::{PortRegistry, PortReservation};
pub use process::{Executable, ProcessHandle};

/// Lifecycle of a supervised process.
///
/// `Prepared → Starting → Ready → Stopping → Stopped`, with `Failed`
/// reachable from `Starting` and from `Ready` when the server exits on its
/// own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Resources are reserved but nothing has been spawned.
    Prepared,
    /// The process is running and not yet accepting connections.
    Starting,
    /// The process accepts connections.
    Ready,
    /// Termination is in progress.
    Stopping,
    /// The process has exited and every resource is released.
    Stopped,
    /// Startup failed or the server exited unexpectedly; every resource is
    /// released.
    Failed,
}

impl ProcessState {
    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Prepared => "prepared",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

//! Port reservation.
//!
//! A [`PortRegistry`] records every port handed to a supervised process.
//! Reservations are taken under one mutex, so two concurrent requests can
//! never receive the same port, and are released when the
//! [`PortReservation`] guard drops.
//!
//! [`PortRegistry::reserve_locked`] additionally holds an exclusive `fs2`
//! lock on `<lock dir>/<port>.lock` for the life of the reservation.
//! Registries pointed at the same lock directory, in one host process or in
//! several, therefore never hand out the same port either.

use crate::error::RuntimeError;
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{self, File};
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Attempts at finding an unreserved ephemeral port.
const EPHEMERAL_ATTEMPTS: usize = 32;

/// Registry of ports in use by supervised processes.
#[derive(Debug, Default)]
pub struct PortRegistry {
    reserved: Mutex<HashSet<u16>>,
}

impl PortRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reserve `port`, or a free ephemeral port when `port` is `0`.
    ///
    /// A specific port must not already be reserved and must be bindable on
    /// the loopback interface. An ephemeral port is chosen by the operating
    /// system and skipped if this registry already holds it.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::PortUnavailable`] when no port can be reserved.
    pub fn reserve(self: &Arc<Self>, port: u16) -> Result<PortReservation, RuntimeError> {
        self.reserve_with(port, None)
    }

    /// Reserve like [`PortRegistry::reserve`], also locking the port in
    /// `lock_dir`.
    ///
    /// A port whose lock is held through another registry is treated as
    /// taken: a specific port is rejected and an ephemeral one is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::PortUnavailable`] when no port can be reserved
    /// or `lock_dir` cannot be created.
    pub fn reserve_locked(
        self: &Arc<Self>,
        port: u16,
        lock_dir: &Path,
    ) -> Result<PortReservation, RuntimeError> {
        fs::create_dir_all(lock_dir).map_err(|e| RuntimeError::PortUnavailable {
            port,
            reason: format!("cannot create {}: {e}", lock_dir.display()),
        })?;
        self.reserve_with(port, Some(lock_dir))
    }

    fn reserve_with(
        self: &Arc<Self>,
        port: u16,
        lock_dir: Option<&Path>,
    ) -> Result<PortReservation, RuntimeError> {
        let mut reserved = self.lock();
        let (chosen, lock) = if port == 0 {
            ephemeral_port(&reserved, lock_dir)?
        } else {
            if reserved.contains(&port) {
                return Err(RuntimeError::PortUnavailable {
                    port,
                    reason: "already reserved by another server".to_owned(),
                });
            }
            let lock = lock_dir
                .map(|dir| lock_port(dir, port))
                .transpose()
                .map_err(|e| RuntimeError::PortUnavailable {
                    port,
                    reason: format!("locked by another runtime: {e}"),
                })?;
            probe(port).map_err(|e| RuntimeError::PortUnavailable {
                port,
                reason: e.to_string(),
            })?;
            (port, lock)
        };
        reserved.insert(chosen);
        log::trace!("reserved port {chosen}");
        Ok(PortReservation {
            registry: Arc::clone(self),
            port: chosen,
            _lock: lock,
        })
    }

    /// Whether `port` is currently reserved.
    #[must_use]
    pub fn is_reserved(&self, port: u16) -> bool {
        self.lock().contains(&port)
    }

    /// Return the number of live reservations.
    #[must_use]
    pub fn reserved_count(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, port: u16) {
        if self.lock().remove(&port) {
            log::trace!("released port {port}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<u16>> {
        self.reserved.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reserved port, released on drop.
#[derive(Debug)]
pub struct PortReservation {
    registry: Arc<PortRegistry>,
    port: u16,
    _lock: Option<File>,
}

impl PortReservation {
    /// Return the reserved port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        self.registry.release(self.port);
    }
}

fn ephemeral_port(
    reserved: &HashSet<u16>,
    lock_dir: Option<&Path>,
) -> Result<(u16, Option<File>), RuntimeError> {
    let unavailable = |reason: String| RuntimeError::PortUnavailable { port: 0, reason };
    for _ in 0..EPHEMERAL_ATTEMPTS {
        let port = probe(0).map_err(|e| unavailable(e.to_string()))?;
        if reserved.contains(&port) {
            continue;
        }
        let Some(dir) = lock_dir else {
            return Ok((port, None));
        };
        match lock_port(dir, port) {
            Ok(lock) => return Ok((port, Some(lock))),
            Err(e) => log::trace!("port {port} locked elsewhere: {e}"),
        }
    }
    Err(unavailable(format!(
        "no unreserved ephemeral port after {EPHEMERAL_ATTEMPTS} attempts"
    )))
}

/// Open `<dir>/<port>.lock` and take an exclusive lock without blocking.
fn lock_port(dir: &Path, port: u16) -> std::io::Result<File> {
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join(format!("{port}.lock")))?;
    file.try_lock_exclusive()?;
    Ok(file)
}

/// Bind and immediately release `port` on the loopback interface, returning
/// the port actually bound.
fn probe(port: u16) -> std::io::Result<u16> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))?;
    Ok(listener.local_addr()?.port())
}

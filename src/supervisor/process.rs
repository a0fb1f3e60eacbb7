//! Spawning, readiness, and termination of server processes.
//!
//! An [`Executable`] is a prepared, not-yet-started server. Starting it
//! materialises the file set, reserves a port, creates a scratch data
//! directory, spawns the server, and waits for it to accept connections.
//! The resulting [`ProcessHandle`] owns every resource it acquired and
//! releases them in [`ProcessHandle::stop`], which also runs on drop.
//!
//! Output readers are joined for at most a short drain period once the
//! child has exited. A descendant that inherited the pipes can keep them
//! open indefinitely, so readers still blocked after the drain are
//! detached; the capture buffer is shared and stays readable.

use super::ProcessState;
use super::args::ServerArgs;
use super::output::OutputCapture;
use super::port::{PortRegistry, PortReservation};
use crate::artefact::store::ArtefactStore;
use crate::config::{NetSettings, RuntimeConfig};
use crate::distribution::{Distribution, FeatureMatrix};
use crate::error::{Result, RuntimeError};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// Interval between readiness probes.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on waiting for output readers after the child exits.
const READER_DRAIN: Duration = Duration::from_millis(250);

/// Spawn attempts after `ETXTBSY` before giving up.
const SPAWN_RETRIES: u32 = 5;

/// A prepared server that has not been started.
#[derive(Debug, Clone)]
pub struct Executable {
    distribution: Distribution,
    config: Arc<RuntimeConfig>,
    store: Arc<ArtefactStore>,
    ports: Arc<PortRegistry>,
    matrix: FeatureMatrix,
    net: NetSettings,
    extra_args: Vec<String>,
}

impl Executable {
    /// Assemble an executable from its collaborators.
    ///
    /// Nothing is downloaded or spawned until [`Executable::start`].
    #[must_use]
    pub fn new(
        distribution: Distribution,
        config: Arc<RuntimeConfig>,
        store: Arc<ArtefactStore>,
        ports: Arc<PortRegistry>,
    ) -> Self {
        let net = config.net();
        let extra_args = config.extra_args().to_vec();
        Self {
            distribution,
            config,
            store,
            ports,
            matrix: FeatureMatrix::builtin(),
            net,
            extra_args,
        }
    }

    /// Replace the network settings taken from the configuration.
    #[must_use]
    pub fn with_net(mut self, net: NetSettings) -> Self {
        self.net = net;
        self
    }

    /// Append server options after those from the configuration.
    #[must_use]
    pub fn with_extra_args(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(extra);
        self
    }

    /// Return the distribution this executable runs.
    #[must_use]
    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    /// Return the network settings used on start.
    #[must_use]
    pub const fn net(&self) -> NetSettings {
        self.net
    }

    /// Start the server and wait until it accepts connections.
    ///
    /// Every resource acquired along the way is released if any step fails.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::DownloadFailure`] / [`RuntimeError::ExtractionFailure`]
    ///   when the file set cannot be materialised.
    /// - [`RuntimeError::PortUnavailable`] when no port can be reserved.
    /// - [`RuntimeError::StartupTimeout`] when the server is not ready in
    ///   time; the process is killed first.
    /// - [`RuntimeError::ProcessCrashed`] when the server exits before it is
    ///   ready.
    pub fn start(&self) -> Result<ProcessHandle> {
        let files = self.store.extract_file_set(&self.distribution)?;
        let reservation = self
            .ports
            .reserve_locked(self.net.port, self.config.port_lock_dir().as_std_path())?;
        let data_dir = tempfile::Builder::new()
            .prefix("embedded-mongod-data.")
            .tempdir()?;
        let port = reservation.port();

        let args = ServerArgs {
            distribution: &self.distribution,
            matrix: &self.matrix,
            port,
            data_dir: data_dir.path(),
            net: self.net,
            extra: &self.extra_args,
        }
        .render();

        let mut handle = ProcessHandle {
            distribution: self.distribution.clone(),
            executable: files.executable().to_path_buf(),
            child: None,
            reservation: Some(reservation),
            data_dir: Some(data_dir),
            state: ProcessState::Prepared,
            output: OutputCapture::new(self.config.max_output_lines()),
            readers: Vec::new(),
            stop_grace_period: self.config.stop_grace_period(),
        };

        log::info!("starting {} on port {port}", self.distribution);
        let mut command = Command::new(files.executable());
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        handle.child = Some(spawn(&mut command)?);
        handle.state = ProcessState::Starting;
        if let Err(e) = handle.attach_readers() {
            handle.release(ProcessState::Failed);
            return Err(e.into());
        }

        match handle.wait_until_ready(self.config.startup_timeout(), self.net.ipv6) {
            Ok(()) => {
                handle.state = ProcessState::Ready;
                log::info!("{} ready on port {port}", self.distribution);
                Ok(handle)
            }
            Err(err) => {
                handle.release(ProcessState::Failed);
                Err(err)
            }
        }
    }
}

/// A running (or finished) server process.
///
/// Dropping a handle stops the process.
#[derive(Debug)]
pub struct ProcessHandle {
    distribution: Distribution,
    executable: PathBuf,
    child: Option<Child>,
    reservation: Option<PortReservation>,
    data_dir: Option<tempfile::TempDir>,
    state: ProcessState,
    output: OutputCapture,
    readers: Vec<JoinHandle<()>>,
    stop_grace_period: Duration,
}

impl ProcessHandle {
    /// Return the distribution being run.
    #[must_use]
    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    /// Return the path of the running executable.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Return the port the server listens on, or `None` once stopped.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.reservation.as_ref().map(PortReservation::port)
    }

    /// Return the operating system process id while the process is live.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Return the scratch data directory while the process is live.
    #[must_use]
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_ref().map(tempfile::TempDir::path)
    }

    /// Return the lifecycle state.
    ///
    /// A ready server that has exited on its own is reported as
    /// [`ProcessState::Failed`], and its port and data directory are
    /// released.
    pub fn state(&mut self) -> ProcessState {
        self.refresh();
        self.state
    }

    /// Whether the server process is still running.
    pub fn is_running(&mut self) -> bool {
        self.refresh();
        self.child.is_some()
    }

    /// Return the most recent output lines.
    #[must_use]
    pub fn output(&self) -> Vec<String> {
        self.output.lines()
    }

    /// Stop the server and release its port and data directory.
    ///
    /// Requests graceful termination, waits up to the grace period, then
    /// kills the process. Calling `stop` on a stopped handle does nothing.
    /// Termination problems are logged, never returned.
    pub fn stop(&mut self) {
        self.refresh();
        if self.state.is_terminal() {
            return;
        }
        self.state = ProcessState::Stopping;
        log::info!("stopping {}", self.distribution);
        self.release(ProcessState::Stopped);
    }

    /// Move a ready server that exited unexpectedly to `Failed`.
    fn refresh(&mut self) {
        if self.state != ProcessState::Ready {
            return;
        }
        match self.exit_status() {
            Ok(Some(status)) => {
                log::warn!("{} exited unexpectedly ({status})", self.distribution);
                self.release(ProcessState::Failed);
            }
            Ok(None) => {}
            Err(e) => log::warn!("failed to poll {}: {e}", self.distribution),
        }
    }

    fn attach_readers(&mut self) -> std::io::Result<()> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        let (stdout, stderr) = (child.stdout.take(), child.stderr.take());
        if let Some(stdout) = stdout {
            self.readers.push(self.output.follow(stdout, "stdout")?);
        }
        if let Some(stderr) = stderr {
            self.readers.push(self.output.follow(stderr, "stderr")?);
        }
        Ok(())
    }

    fn wait_until_ready(&mut self, timeout: Duration, ipv6: bool) -> Result<()> {
        let port = self.port().unwrap_or_default();
        let addresses = readiness_addresses(port, ipv6);
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(status) = self.exit_status()? {
                self.join_readers();
                return Err(RuntimeError::ProcessCrashed {
                    status: status.to_string(),
                    output: self.output(),
                });
            }
            if addresses
                .iter()
                .any(|address| TcpStream::connect_timeout(address, POLL_INTERVAL).is_ok())
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                log::warn!("{} not ready after {timeout:?}; killing", self.distribution);
                if let Some(child) = self.child.as_mut() {
                    kill_and_reap(child);
                }
                self.join_readers();
                return Err(RuntimeError::StartupTimeout {
                    port,
                    timeout,
                    output: self.output(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn exit_status(&mut self) -> Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => Ok(child.try_wait()?),
            None => Ok(None),
        }
    }

    /// Terminate the child if still running and drop every held resource.
    fn release(&mut self, final_state: ProcessState) {
        if let Some(mut child) = self.child.take() {
            terminate(&mut child, self.stop_grace_period);
        }
        self.join_readers();
        self.reservation = None;
        if let Some(data_dir) = self.data_dir.take() {
            let path = data_dir.path().to_path_buf();
            if let Err(e) = data_dir.close() {
                log::warn!("failed to remove data directory {}: {e}", path.display());
            }
        }
        self.state = final_state;
    }

    fn join_readers(&mut self) {
        let deadline = Instant::now() + READER_DRAIN;
        while self.readers.iter().any(|reader| !reader.is_finished()) && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(10));
        }
        for reader in self.readers.drain(..) {
            if !reader.is_finished() {
                log::debug!("output pipe still held by a descendant; detaching reader");
                continue;
            }
            if reader.join().is_err() {
                log::warn!("output reader thread panicked");
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.child.is_some() {
            log::debug!("{} dropped while running; stopping", self.distribution);
        }
        self.stop();
    }
}

/// Loopback addresses probed for readiness, preferred family first.
fn readiness_addresses(port: u16, ipv6: bool) -> Vec<SocketAddr> {
    let v4 = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    if ipv6 {
        vec![SocketAddr::from((Ipv6Addr::LOCALHOST, port)), v4]
    } else {
        vec![v4]
    }
}

/// Spawn `command`, retrying briefly while a freshly extracted executable
/// is still open for writing in a forked sibling.
fn spawn(command: &mut Command) -> std::io::Result<Child> {
    let mut attempts = 0;
    loop {
        match command.spawn() {
            Err(e) if is_text_busy(&e) && attempts < SPAWN_RETRIES => {
                attempts += 1;
                log::debug!("executable busy; retrying spawn ({attempts}/{SPAWN_RETRIES})");
                thread::sleep(POLL_INTERVAL);
            }
            result => return result,
        }
    }
}

#[cfg(unix)]
fn is_text_busy(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::ETXTBSY)
}

#[cfg(not(unix))]
fn is_text_busy(_err: &std::io::Error) -> bool {
    false
}

/// Ask `child` to exit, escalating to a kill after `grace`.
fn terminate(child: &mut Child, grace: Duration) {
    match child.try_wait() {
        Ok(Some(status)) => {
            log::debug!("mongod already exited ({status})");
            return;
        }
        Ok(None) => {}
        Err(e) => log::warn!("failed to poll mongod: {e}"),
    }

    if let Err(e) = request_shutdown(child) {
        log::warn!("graceful shutdown request failed: {e}");
        kill_and_reap(child);
        return;
    }
    match child.wait_timeout(grace) {
        Ok(Some(status)) => log::debug!("mongod exited ({status})"),
        Ok(None) => {
            log::warn!("mongod still running after {grace:?}; killing");
            kill_and_reap(child);
        }
        Err(e) => {
            log::warn!("failed to wait for mongod: {e}");
            kill_and_reap(child);
        }
    }
}

fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::debug!("kill failed (process may have exited): {e}");
    }
    if let Err(e) = child.wait() {
        log::warn!("failed to reap mongod: {e}");
    }
}

#[cfg(unix)]
fn request_shutdown(child: &Child) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(child.id()).map_err(std::io::Error::other)?;
    // SAFETY: `pid` names a child this process spawned and has not reaped.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn request_shutdown(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;

//! Behaviour-driven tests for the prepare, start, and stop lifecycle.
//!
//! Each scenario runs the `mongod-stub` binary as the server executable,
//! served from an in-memory archive, so the full path from resolution to
//! termination runs without network access. Tests use the rstest-bdd
//! v0.5.0 mutable world pattern.
#![cfg(unix)]

mod support;

use embedded_mongod::artefact::download::ArchiveDownloader;
use embedded_mongod::config::{NetSettings, ProcessSettings};
use embedded_mongod::distribution::{Architecture, OperatingSystem, Platform, Version};
use embedded_mongod::error::RuntimeError;
use embedded_mongod::runtime::{MongodRuntime, ServerRequest};
use embedded_mongod::supervisor::ProcessHandle;
use embedded_mongod::test_utils::CountingDownloader;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::net::{Ipv4Addr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use support::{Sandbox, isolated_config, linux_x86_64, sandbox, stub_archive};

// ---------------------------------------------------------------------------
// World types
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LifecycleWorld {
    handle: Option<ProcessHandle>,
    second: Option<ProcessHandle>,
    runtime: Option<MongodRuntime>,
    downloader: Option<Arc<CountingDownloader>>,
    request: Option<ServerRequest>,
    error: Option<RuntimeError>,
    port: Option<u16>,
    pid: Option<u32>,
    executable: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    sandbox: Option<Sandbox>,
}

impl LifecycleWorld {
    fn runtime(&self) -> &MongodRuntime {
        self.runtime.as_ref().expect("runtime set")
    }

    fn request(&self) -> ServerRequest {
        self.request.clone().expect("request set")
    }

    fn handle(&mut self) -> &mut ProcessHandle {
        self.handle.as_mut().expect("server started")
    }

    fn install(&mut self, version: &str, process: ProcessSettings) {
        let sandbox = sandbox();
        let downloader = Arc::new(CountingDownloader::new(stub_archive(&linux_x86_64(version))));
        let shared: Arc<dyn ArchiveDownloader> = downloader.clone();
        self.runtime = Some(MongodRuntime::with_downloader(
            isolated_config(sandbox.root(), process),
            shared,
        ));
        self.request = Some(
            ServerRequest::new(Version::parse(version).expect("test version"))
                .with_platform(Platform::new(OperatingSystem::Linux, Architecture::X86_64))
                .with_port(0),
        );
        self.downloader = Some(downloader);
        self.sandbox = Some(sandbox);
    }

    fn start(&mut self, request: &ServerRequest) {
        match self.runtime().start(request) {
            Ok(handle) => {
                self.port = handle.port();
                self.pid = handle.pid();
                self.executable = Some(handle.executable().to_path_buf());
                self.data_dir = handle.data_dir().map(ToOwned::to_owned);
                self.handle = Some(handle);
            }
            Err(e) => self.error = Some(e),
        }
    }
}

#[fixture]
fn world() -> LifecycleWorld {
    LifecycleWorld::default()
}

/// Whether the operating system still knows a process with `pid`.
fn process_exists(pid: u32) -> bool {
    let pid = libc::pid_t::try_from(pid).expect("pid fits pid_t");
    // SAFETY: signal 0 only checks that the process exists.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

fn settings(startup_timeout_ms: u64) -> ProcessSettings {
    ProcessSettings {
        startup_timeout_ms,
        stop_grace_period_ms: 2_000,
        ..ProcessSettings::default()
    }
}

// ---------------------------------------------------------------------------
// Step definitions
// ---------------------------------------------------------------------------

#[given("a runtime serving the stub for \"{version}\"")]
fn given_runtime(world: &mut LifecycleWorld, version: String) {
    world.install(&version, settings(30_000));
}

#[given(
    "a runtime serving the stub for \"{version}\" with a startup timeout of {millis:u64} milliseconds"
)]
fn given_runtime_with_timeout(world: &mut LifecycleWorld, version: String, millis: u64) {
    world.install(&version, settings(millis));
}

#[when("the server is started")]
fn when_started(world: &mut LifecycleWorld) {
    let request = world.request();
    world.start(&request);
}

#[when("the server is started with \"{args}\"")]
fn when_started_with(world: &mut LifecycleWorld, args: String) {
    let request = world
        .request()
        .with_extra_args(args.split_whitespace().map(str::to_owned));
    world.start(&request);
}

#[when("the server is started again on the same port")]
fn when_restarted_on_same_port(world: &mut LifecycleWorld) {
    let port = world.port.expect("first start recorded a port");
    let request = world.request().with_port(port);
    world.start(&request);
    assert_eq!(world.port, Some(port));
}

#[when("the server is started preferring IPv6")]
fn when_started_ipv6(world: &mut LifecycleWorld) {
    let request = world.request().with_net(NetSettings {
        port: 0,
        ipv6: true,
    });
    world.start(&request);
}

#[when("the server process is killed externally")]
fn when_killed_externally(world: &mut LifecycleWorld) {
    let pid = world.pid.expect("server pid recorded");
    let pid = libc::pid_t::try_from(pid).expect("pid fits pid_t");
    // SAFETY: `pid` is the live server child started by this scenario.
    let rc = unsafe { libc::kill(pid, libc::SIGKILL) };
    assert_eq!(rc, 0, "kill failed: {}", std::io::Error::last_os_error());
}

#[when("a second server is started")]
fn when_second_started(world: &mut LifecycleWorld) {
    let request = world.request();
    let second = world.runtime().start(&request).expect("second server starts");
    world.second = Some(second);
}

#[when("the server is stopped")]
fn when_stopped(world: &mut LifecycleWorld) {
    world.handle().stop();
}

#[then("the server state is \"{state}\"")]
fn then_state(world: &mut LifecycleWorld, state: String) {
    if let Some(error) = world.error.as_ref() {
        panic!("server failed to start: {error}");
    }
    assert_eq!(world.handle().state().to_string(), state);
}

#[then("the server state becomes \"{state}\"")]
fn then_state_becomes(world: &mut LifecycleWorld, state: String) {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut observed = world.handle().state();
    while observed.to_string() != state && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
        observed = world.handle().state();
    }
    assert_eq!(observed.to_string(), state);
}

#[then("no server process remains")]
fn then_no_process_remains(world: &mut LifecycleWorld) {
    let pid = world.pid.expect("server pid recorded");
    assert!(!process_exists(pid), "process {pid} still exists");
    assert!(!world.handle().is_running());
}

#[then("the server accepts connections")]
fn then_accepts_connections(world: &mut LifecycleWorld) {
    let port = world.handle().port().expect("server running");
    TcpStream::connect((Ipv4Addr::LOCALHOST, port)).expect("connect to server");
}

#[then("the port is released")]
fn then_port_released(world: &mut LifecycleWorld) {
    if let Some(handle) = world.handle.as_ref() {
        assert_eq!(handle.port(), None);
        assert_eq!(handle.pid(), None);
    }
    assert_eq!(world.runtime().ports().reserved_count(), 0);
}

#[then("the data directory is removed")]
fn then_data_dir_removed(world: &mut LifecycleWorld) {
    let data_dir = world.data_dir.as_ref().expect("data directory recorded");
    assert!(!data_dir.exists(), "{} still exists", data_dir.display());
    assert_eq!(world.handle().data_dir(), None);
}

#[then("the executable can be deleted")]
fn then_executable_deletable(world: &mut LifecycleWorld) {
    let executable = world.executable.as_ref().expect("executable recorded");
    std::fs::remove_file(executable).expect("delete stopped executable");
}

#[then("the archive was downloaded {count:usize} times")]
fn then_downloaded(world: &mut LifecycleWorld, count: usize) {
    let downloader = world.downloader.as_ref().expect("downloader set");
    assert_eq!(downloader.calls(), count);
}

#[then("both servers listen on distinct ports")]
fn then_distinct_ports(world: &mut LifecycleWorld) {
    let first = world.handle().port().expect("first server running");
    let second = world
        .second
        .as_ref()
        .and_then(ProcessHandle::port)
        .expect("second server running");
    assert_ne!(first, second);
    for port in [first, second] {
        TcpStream::connect((Ipv4Addr::LOCALHOST, port)).expect("connect to server");
    }
    assert_eq!(world.runtime().ports().reserved_count(), 2);
}

#[then("startup fails with a crash reporting \"{text}\"")]
fn then_crash_reported(world: &mut LifecycleWorld, text: String) {
    let error = world.error.take().expect("startup failed");
    let RuntimeError::ProcessCrashed { status, output } = &error else {
        panic!("expected ProcessCrashed, got {error:?}");
    };
    assert!(status.contains('3'), "unexpected status: {status}");
    assert!(
        output.iter().any(|line| line.contains(&text)),
        "output {output:?} lacks {text:?}"
    );
}

#[then("startup times out")]
fn then_startup_times_out(world: &mut LifecycleWorld) {
    let error = world.error.take().expect("startup failed");
    assert!(
        matches!(error, RuntimeError::StartupTimeout { .. }),
        "got {error:?}"
    );
}

// ---------------------------------------------------------------------------
// Scenario bindings
// ---------------------------------------------------------------------------

#[scenario(
    path = "tests/features/process_lifecycle.feature",
    name = "Start and stop a 4.2.0 server"
)]
fn scenario_start_and_stop(world: LifecycleWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/process_lifecycle.feature",
    name = "Stopping twice is harmless"
)]
fn scenario_stop_twice(world: LifecycleWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/process_lifecycle.feature",
    name = "A released port can be reused"
)]
fn scenario_port_reuse(world: LifecycleWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/process_lifecycle.feature",
    name = "The executable can be deleted after stop"
)]
fn scenario_executable_deletable(world: LifecycleWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/process_lifecycle.feature",
    name = "Two servers run side by side"
)]
fn scenario_two_servers(world: LifecycleWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/process_lifecycle.feature",
    name = "A crashing server reports its output"
)]
fn scenario_crash_reported(world: LifecycleWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/process_lifecycle.feature",
    name = "A server that never listens times out"
)]
fn scenario_startup_timeout(world: LifecycleWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/process_lifecycle.feature",
    name = "A server that dies after becoming ready is reported failed"
)]
fn scenario_dies_after_ready(world: LifecycleWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/process_lifecycle.feature",
    name = "A server preferring IPv6 becomes ready"
)]
fn scenario_ipv6_ready(world: LifecycleWorld) {
    let _ = world;
}

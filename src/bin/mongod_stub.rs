//! Stand-in server executable for exercising process supervision.
//!
//! Accepts the command line the supervisor renders, binds the requested
//! port on the loopback interface (`::1` first under `--ipv6`), and accepts
//! connections until it is signalled. `--stub-mode crash` exits with status 3 before binding and
//! `--stub-mode hang` never binds.

use std::io::{self, Write};
use std::net::{Ipv4Addr, Ipv6Addr, TcpListener};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

#[derive(Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Serve,
    Crash,
    Hang,
}

#[derive(Debug, Default)]
struct StubArgs {
    port: Option<u16>,
    ipv6: bool,
    mode: Mode,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<StubArgs, String> {
    let mut parsed = StubArgs::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--port" => {
                let value = args.next().ok_or("--port needs a value")?;
                let port = value
                    .parse()
                    .map_err(|e| format!("invalid port \"{value}\": {e}"))?;
                parsed.port = Some(port);
            }
            "--ipv6" => parsed.ipv6 = true,
            "--stub-mode" => {
                parsed.mode = match args.next().as_deref() {
                    Some("serve") => Mode::Serve,
                    Some("crash") => Mode::Crash,
                    Some("hang") => Mode::Hang,
                    other => return Err(format!("unknown stub mode {other:?}")),
                };
            }
            _ => {}
        }
    }
    Ok(parsed)
}

fn bind(port: u16, ipv6: bool) -> io::Result<TcpListener> {
    if ipv6 {
        match TcpListener::bind((Ipv6Addr::LOCALHOST, port)) {
            Ok(listener) => return Ok(listener),
            Err(e) => write_stderr_line(&mut io::stderr(), format!("no IPv6 loopback: {e}")),
        }
    }
    TcpListener::bind((Ipv4Addr::LOCALHOST, port))
}

fn serve(port: u16, ipv6: bool) -> io::Result<()> {
    let listener = bind(port, ipv6)?;
    writeln!(io::stdout(), "waiting for connections on port {port}")?;
    for stream in listener.incoming() {
        drop(stream?);
    }
    Ok(())
}

fn write_stderr_line(stderr: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stderr, "mongod-stub: {message}").is_err() {
        // Nothing else to report to.
    }
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            write_stderr_line(&mut io::stderr(), message);
            return ExitCode::from(2);
        }
    };

    match args.mode {
        Mode::Crash => {
            write_stderr_line(&mut io::stderr(), "simulated crash");
            ExitCode::from(3)
        }
        Mode::Hang => loop {
            thread::sleep(Duration::from_secs(60));
        },
        Mode::Serve => {
            let Some(port) = args.port else {
                write_stderr_line(&mut io::stderr(), "--port is required");
                return ExitCode::from(2);
            };
            match serve(port, args.ipv6) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    write_stderr_line(&mut io::stderr(), e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| (*arg).to_owned()).collect()
    }

    #[test]
    fn parses_port_and_ignores_server_options() {
        let parsed = parse_args(args(&[
            "--port",
            "27018",
            "--dbpath",
            "/tmp/data",
            "--bind_ip",
            "127.0.0.1",
        ]))
        .expect("valid arguments");
        assert_eq!(parsed.port, Some(27018));
        assert!(!parsed.ipv6);
        assert_eq!(parsed.mode, Mode::Serve);
    }

    #[test]
    fn parses_ipv6_preference() {
        let parsed = parse_args(args(&["--port", "27018", "--bind_ip", "127.0.0.1,::1", "--ipv6"]))
            .expect("valid arguments");
        assert!(parsed.ipv6);
    }

    #[test]
    fn parses_stub_mode() {
        let parsed = parse_args(args(&["--stub-mode", "crash"])).expect("valid arguments");
        assert_eq!(parsed.mode, Mode::Crash);
    }

    #[test]
    fn rejects_unknown_mode_and_bad_port() {
        assert!(parse_args(args(&["--stub-mode", "explode"])).is_err());
        assert!(parse_args(args(&["--port", "many"])).is_err());
    }
}

use std::io::BufRead;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn, LevelFilter};
use transport::{LifecycleEvent, Session};

/// Connect to an ICOM RS-BA1-compatible transceiver and relay CI-V traffic.
#[derive(Parser)]
#[command(name = "rsba1", about = "ICOM RS-BA1 remote-control protocol client")]
struct Args {
	/// Transceiver hostname or IP address.
	#[arg(short = 'a', long, default_value = "n4ldr.ddns.net")]
	address: String,

	/// RS-BA1 username.
	#[arg(short = 'u', long, default_value = "admin")]
	username: String,

	/// RS-BA1 password.
	#[arg(short = 'p', long, default_value = "adminadmin")]
	password: String,

	/// Raise the log level to debug.
	#[arg(short = 'v', long, conflicts_with = "quiet")]
	verbose: bool,

	/// Lower the log level to errors only.
	#[arg(short = 'q', long)]
	quiet: bool,
}

fn main() -> ExitCode {
	let args = Args::parse();

	runtime::logger::init(if args.verbose {
		LevelFilter::Debug
	} else if args.quiet {
		LevelFilter::Error
	} else {
		LevelFilter::Info
	});

	let shutdown = match runtime::Shutdown::install() {
		Ok(shutdown) => shutdown,
		Err(()) => return ExitCode::FAILURE,
	};

	info!("connecting to {} as {}", args.address, args.username);

	let session = match Session::connect(&args.address, &args.username, &args.password, shutdown.clone()) {
		Ok(session) => session,
		Err(err) => {
			error!("failed to establish session: {err}");
			return ExitCode::FAILURE;
		}
	};

	info!("all streams operational (device: {})", session.device_name());

	let session = Arc::new(session);
	let events = session.take_events();

	// Reading stdin blocks indefinitely with no portable way to interrupt it
	// on shutdown, so this thread is left detached rather than joined; it
	// dies with the process.
	let stdin_session = session.clone();
	std::thread::Builder::new()
		.name("civ-stdin".into())
		.spawn(move || stdin_civ_loop(&stdin_session))
		.expect("spawning the stdin reader thread should not fail");

	let status_thread = std::thread::Builder::new()
		.name("status".into())
		.spawn(move || {
			for event in events {
				match event {
					LifecycleEvent::Established { device_name } => info!("established: {device_name}"),
					LifecycleEvent::Degraded => warn!("session degraded: reauth failed, still trying"),
					LifecycleEvent::Closed { reason: Some(reason) } => {
						error!("session closed: {reason}");
						return;
					}
					LifecycleEvent::Closed { reason: None } => return,
				}
			}
		})
		.expect("spawning the status thread should not fail");

	while !shutdown.requested() {
		std::thread::sleep(Duration::from_millis(200));
	}

	info!("shutdown requested, tearing down session");
	session.close();
	let _ = status_thread.join();

	ExitCode::SUCCESS
}

/// Read whitespace-separated hex bytes from stdin, one CI-V command per line,
/// and hand each off to the serial endpoint. Malformed lines are logged and
/// skipped rather than killing the loop.
fn stdin_civ_loop(session: &Session) {
	let stdin = std::io::stdin();

	for line in stdin.lock().lines() {
		let Ok(line) = line else { break };
		let line = line.trim();

		if line.is_empty() {
			continue;
		}

		match parse_hex_bytes(line) {
			Some(cmd) => {
				if let Err(err) = session.serial().send(&cmd) {
					warn!("failed to send CI-V command: {err}");
				}
			}
			None => warn!("ignoring malformed CI-V line (expected whitespace-separated hex bytes): {line}"),
		}
	}
}

fn parse_hex_bytes(line: &str) -> Option<Vec<u8>> {
	line.split_whitespace().map(|tok| u8::from_str_radix(tok, 16).ok()).collect()
}

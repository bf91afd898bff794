//! The RS-BA1 stream multiplexer core: three coupled UDP state machines that
//! establish a session with an ICOM transceiver, authenticate, and relay
//! opaque CI-V and audio traffic thereafter.
//!
//! [`Session::connect`] is the entry point; [`Session::serial`] and
//! [`Session::audio`] are the ongoing payload interfaces once established.

mod audio;
mod control;
mod endpoint;
mod retransmit;
mod serial;

#[cfg(test)]
mod loopback_tests;

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info, warn};

pub use audio::Audio;
pub use control::{ControlSession, State as ControlState};
pub use endpoint::Endpoint;
pub use serial::Serial;
pub use wire::Frame;

const CONTROL_PORT: u16 = 50001;
const SERIAL_PORT: u16 = 50002;
const AUDIO_PORT: u16 = 50003;

/// `Transport`/`HandshakeTimeout`/`BadCredentials` abort session
/// establishment; `PeerLost` and `ProtocolViolation` surface through the
/// lifecycle event stream once a session is already up.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
	#[error("transport error: {0}")]
	Transport(#[from] std::io::Error),
	#[error("handshake or login did not complete in time")]
	HandshakeTimeout,
	#[error("login rejected: bad credentials")]
	BadCredentials,
	#[error("protocol violation: {0}")]
	ProtocolViolation(String),
	#[error("peer stopped responding to keep-alives")]
	PeerLost,
	#[error("session was cancelled")]
	Cancelled,
}

/// Outputs to collaborators: established/degraded/closed, with an error
/// reason on closed.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
	Established { device_name: String },
	Degraded,
	Closed { reason: Option<String> },
}

/// A live RS-BA1 session: the control state machine plus the serial and
/// audio payload wrappers it provisioned.
pub struct Session {
	control: Arc<ControlSession>,
	serial: Serial,
	audio: Audio,
	device_name: String,
	shutdown: runtime::Shutdown,
	events_tx: Sender<LifecycleEvent>,
	events_rx: Mutex<Option<Receiver<LifecycleEvent>>>,
	watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session").field("device_name", &self.device_name).finish_non_exhaustive()
	}
}

impl Session {
	/// Bring up all three endpoints, run the handshakes concurrently (login
	/// only starts once all three have completed), then drive login,
	/// two-step auth, and serial/audio provisioning on the control endpoint.
	pub fn connect(address: &str, username: &str, password: &str, shutdown: runtime::Shutdown) -> Result<Self, SessionError> {
		Self::connect_ports(address, CONTROL_PORT, SERIAL_PORT, AUDIO_PORT, username, password, shutdown)
	}

	#[allow(clippy::too_many_arguments)]
	fn connect_ports(address: &str, control_port: u16, serial_port: u16, audio_port: u16, username: &str, password: &str, shutdown: runtime::Shutdown) -> Result<Self, SessionError> {
		let control_ep = Endpoint::init("control", address, control_port, shutdown.clone())?;

		let serial_ep = match Endpoint::init("serial", address, serial_port, shutdown.clone()) {
			Ok(ep) => ep,
			Err(err) => {
				control_ep.disconnect();
				return Err(err);
			}
		};

		let audio_ep = match Endpoint::init("audio", address, audio_port, shutdown.clone()) {
			Ok(ep) => ep,
			Err(err) => {
				control_ep.disconnect();
				serial_ep.disconnect();
				return Err(err);
			}
		};

		let (control_hs, serial_hs, audio_hs) = thread::scope(|scope| {
			let c = scope.spawn(|| control_ep.handshake());
			let s = scope.spawn(|| serial_ep.handshake());
			let a = scope.spawn(|| audio_ep.handshake());
			(c.join().expect("control handshake thread panicked"), s.join().expect("serial handshake thread panicked"), a.join().expect("audio handshake thread panicked"))
		});

		if let Err(err) = control_hs.and(serial_hs).and(audio_hs) {
			control_ep.disconnect();
			serial_ep.disconnect();
			audio_ep.disconnect();
			return Err(err);
		}

		info!("all three endpoints handshaked, logging in");

		let control = Arc::new(ControlSession::new(control_ep.clone()));
		let device_name = match control.establish(username, password, serial_port, audio_port) {
			Ok(name) => name,
			Err(err) => {
				control_ep.disconnect();
				serial_ep.disconnect();
				audio_ep.disconnect();
				return Err(err);
			}
		};

		info!("session established with device \"{device_name}\"");

		serial_ep.start_prober(control.probe_gate.clone());
		audio_ep.start_prober(control.probe_gate.clone());

		let serial = Serial::new(serial_ep);
		let audio = Audio::new(audio_ep);

		let (events_tx, events_rx) = mpsc::channel();
		let _ = events_tx.send(LifecycleEvent::Established { device_name: device_name.clone() });

		let watchdog = {
			let control = control.clone();
			let shutdown = shutdown.clone();
			let events_tx = events_tx.clone();

			thread::Builder::new()
				.name("control-watchdog".into())
				.spawn(move || watchdog_loop(control, shutdown, events_tx))
				.expect("spawning the watchdog thread should not fail")
		};

		Ok(Self {
			control,
			serial,
			audio,
			device_name,
			shutdown,
			events_tx,
			events_rx: Mutex::new(Some(events_rx)),
			watchdog: Mutex::new(Some(watchdog)),
		})
	}

	pub fn device_name(&self) -> &str {
		&self.device_name
	}

	pub fn serial(&self) -> &Serial {
		&self.serial
	}

	pub fn audio(&self) -> &Audio {
		&self.audio
	}

	pub fn control_state(&self) -> ControlState {
		self.control.state()
	}

	/// Take the lifecycle event stream. Only meaningful to call once; a
	/// second call returns a receiver that will never produce anything.
	pub fn take_events(&self) -> Receiver<LifecycleEvent> {
		self.events_rx.lock().unwrap().take().unwrap_or_else(|| mpsc::channel().1)
	}

	/// Deauth on control, pkt5 twice on every endpoint, close sockets, stop
	/// background tasks.
	pub fn close(&self) {
		self.control.deauth();
		self.control.endpoint().disconnect();
		self.serial.endpoint().disconnect();
		self.audio.endpoint().disconnect();

		if let Some(handle) = self.watchdog.lock().unwrap().take() {
			let _ = handle.join();
		}

		let _ = self.events_tx.send(LifecycleEvent::Closed { reason: None });
	}

	pub fn shutdown(&self) -> &runtime::Shutdown {
		&self.shutdown
	}
}

/// Periodic reauth plus the three-strikes PeerLost check on the control
/// endpoint's pkt7 prober.
fn watchdog_loop(control: Arc<ControlSession>, shutdown: runtime::Shutdown, events: Sender<LifecycleEvent>) {
	let mut next_reauth = Instant::now() + ControlSession::reauth_interval();

	while !shutdown.requested() {
		if control.endpoint().ping_misses() >= 3 {
			warn!("control endpoint stopped answering pings; closing session");
			let _ = events.send(LifecycleEvent::Closed { reason: Some(SessionError::PeerLost.to_string()) });
			return;
		}

		if Instant::now() >= next_reauth {
			if let Err(err) = control.reauth() {
				error!("reauth failed: {err}");
				let _ = events.send(LifecycleEvent::Degraded);
			}

			next_reauth = Instant::now() + ControlSession::reauth_interval();
		}

		thread::sleep(Duration::from_millis(250));
	}
}

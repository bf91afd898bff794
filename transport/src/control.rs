//! Control session state machine: login, two-step auth, serial and audio
//! provisioning, periodic reauth.
//!
//! Modeled as an explicit tagged state rather than a handful of ad-hoc
//! booleans, so an illegal transition is a programming error rather than a
//! flag left unset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use wire::{frame, passcode, Frame};

use crate::endpoint::Endpoint;
use crate::SessionError;

const REAUTH_INTERVAL: Duration = Duration::from_secs(60);
const REAUTH_TIMEOUT: Duration = Duration::from_secs(3);
const EXPECT_TIMEOUT: Duration = Duration::from_secs(10);
const LOGIN_MAGIC_AUTH1: u8 = 0x02;
const LOGIN_MAGIC_AUTH2: u8 = 0x05;
const LOGIN_MAGIC_DEAUTH: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
	Handshaking,
	LoggingIn,
	Auth1,
	Auth2,
	Provisioning,
	Established,
	Deauth,
	Closed,
}

pub struct ControlSession {
	endpoint: Arc<Endpoint>,
	state: Mutex<State>,
	auth_id: Mutex<Option<[u8; 6]>>,
	a8_reply_id: Mutex<Option<[u8; 16]>>,
	inner_seq: Mutex<u16>,
	auth_ok_flag: AtomicBool,
	pub probe_gate: Arc<AtomicBool>,
}

impl ControlSession {
	pub fn new(endpoint: Arc<Endpoint>) -> Self {
		Self {
			endpoint,
			state: Mutex::new(State::Handshaking),
			auth_id: Mutex::new(None),
			a8_reply_id: Mutex::new(None),
			inner_seq: Mutex::new(0),
			auth_ok_flag: AtomicBool::new(false),
			probe_gate: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn state(&self) -> State {
		*self.state.lock().unwrap()
	}

	fn transition(&self, to: State) {
		let mut state = self.state.lock().unwrap();
		debug!("control: {:?} -> {to:?}", *state);
		*state = to;
	}

	fn next_inner_seq(&self) -> u16 {
		let mut seq = self.inner_seq.lock().unwrap();
		let current = *seq;
		*seq = seq.wrapping_add(1);
		current
	}

	/// Login, auth1/auth2, and serial/audio provisioning. Returns the device
	/// name reported by the radio.
	pub fn establish(&self, username: &str, password: &str, serial_port: u16, audio_port: u16) -> Result<String, SessionError> {
		self.login(username, password)?;
		self.endpoint.start_prober(self.probe_gate.clone());

		self.transition(State::Auth1);
		self.send_auth(LOGIN_MAGIC_AUTH1)?;

		self.transition(State::Auth2);
		self.send_auth(LOGIN_MAGIC_AUTH2)?;

		self.await_auth_complete()?;
		self.probe_gate.store(true, Ordering::Relaxed);

		self.transition(State::Provisioning);
		let device_name = self.provision(serial_port, audio_port, username)?;

		self.transition(State::Established);
		Ok(device_name)
	}

	fn login(&self, username: &str, password: &str) -> Result<(), SessionError> {
		self.transition(State::LoggingIn);

		let auth_start_id: [u8; 2] = rand::random();
		let username_enc = passcode::passcode(username);
		let password_enc = passcode::passcode(password);

		let inner_seq = self.next_inner_seq();

		self.endpoint.send_tracked(|_outer_seq| {
			frame::encode_login(self.endpoint.local_sid(), self.endpoint.remote_sid().unwrap_or(0), inner_seq, auth_start_id, username_enc, password_enc).to_vec()
		})?;

		match self.endpoint.await_login_answer()? {
			Frame::LoginAnswer { bad_credentials: true, .. } => Err(SessionError::BadCredentials),
			Frame::LoginAnswer { auth_id, bad_credentials: false } => {
				*self.auth_id.lock().unwrap() = Some(auth_id);
				Ok(())
			}
			_ => Err(SessionError::ProtocolViolation("expected a login answer".into())),
		}
	}

	fn send_auth(&self, magic: u8) -> Result<(), SessionError> {
		let auth_id = self.auth_id.lock().unwrap().ok_or(SessionError::ProtocolViolation("auth sent before login completed".into()))?;
		let inner_seq = self.next_inner_seq();

		self.endpoint
			.send_tracked(|_outer_seq| frame::encode_auth(self.endpoint.local_sid(), self.endpoint.remote_sid().unwrap_or(0), inner_seq, magic, auth_id).to_vec())?;

		Ok(())
	}

	/// Wait for both the 0x05 auth answer and the a8 reply.
	fn await_auth_complete(&self) -> Result<(), SessionError> {
		let deadline = std::time::Instant::now() + EXPECT_TIMEOUT;

		loop {
			if self.auth_ok() && self.a8_reply_id.lock().unwrap().is_some() {
				return Ok(());
			}

			if std::time::Instant::now() >= deadline {
				return Err(SessionError::HandshakeTimeout);
			}

			match self.endpoint.recv(Duration::from_millis(200)) {
				Some(Frame::Auth { magic: 0x05, .. }) => self.mark_auth_ok(),
				Some(Frame::A8Reply { a8_reply_id }) => *self.a8_reply_id.lock().unwrap() = Some(a8_reply_id),
				Some(other) => debug!("control: ignoring frame while awaiting auth completion: {other:?}"),
				None => {}
			}
		}
	}

	fn auth_ok(&self) -> bool {
		self.auth_ok_flag.load(Ordering::Relaxed)
	}

	fn mark_auth_ok(&self) {
		self.auth_ok_flag.store(true, Ordering::Relaxed);
	}

	fn provision(&self, serial_port: u16, audio_port: u16, username: &str) -> Result<String, SessionError> {
		let auth_id = self.auth_id.lock().unwrap().expect("auth_id is set by the time provisioning starts");
		let a8_reply_id = self.a8_reply_id.lock().unwrap().expect("a8_reply_id is set by the time provisioning starts");
		let username_enc = passcode::passcode(username);
		let inner_seq = self.next_inner_seq();

		self.endpoint.send_tracked(|_outer_seq| {
			frame::encode_serial_audio_request(
				self.endpoint.local_sid(),
				self.endpoint.remote_sid().unwrap_or(0),
				inner_seq,
				auth_id,
				a8_reply_id,
				serial_port,
				audio_port,
				username_enc,
			)
			.to_vec()
		})?;

		let deadline = std::time::Instant::now() + EXPECT_TIMEOUT;

		loop {
			if std::time::Instant::now() >= deadline {
				return Err(SessionError::HandshakeTimeout);
			}

			match self.endpoint.recv(Duration::from_millis(200)) {
				Some(Frame::SerialAudioAnswer { success: true, device_name }) => return Ok(device_name),
				Some(Frame::SerialAudioAnswer { success: false, .. }) => return Err(SessionError::ProtocolViolation("serial/audio provisioning refused".into())),
				Some(other) => debug!("control: ignoring frame while awaiting provisioning answer: {other:?}"),
				None => {}
			}
		}
	}

	/// Periodic reauth. Call roughly every `REAUTH_INTERVAL`; a missing reply
	/// within `REAUTH_TIMEOUT` marks the session degraded without tearing it
	/// down - the caller decides.
	pub fn reauth(&self) -> Result<(), SessionError> {
		self.send_auth(LOGIN_MAGIC_AUTH2)?;

		let deadline = std::time::Instant::now() + REAUTH_TIMEOUT;

		while std::time::Instant::now() < deadline {
			if let Some(Frame::Auth { magic: 0x05, .. }) = self.endpoint.recv(Duration::from_millis(200)) {
				return Ok(());
			}
		}

		warn!("control: reauth reply did not arrive within {}; session degraded", runtime::time::humanize(REAUTH_TIMEOUT));
		Err(SessionError::PeerLost)
	}

	pub fn reauth_interval() -> Duration {
		REAUTH_INTERVAL
	}

	/// Deauth, then hand back to the caller to disconnect every endpoint.
	pub fn deauth(&self) {
		self.transition(State::Deauth);

		if let Some(auth_id) = *self.auth_id.lock().unwrap() {
			let inner_seq = self.next_inner_seq();
			let _ = self
				.endpoint
				.send_tracked(|_outer_seq| frame::encode_auth(self.endpoint.local_sid(), self.endpoint.remote_sid().unwrap_or(0), inner_seq, LOGIN_MAGIC_DEAUTH, auth_id).to_vec());
		}

		self.transition(State::Closed);
	}

	pub fn endpoint(&self) -> &Arc<Endpoint> {
		&self.endpoint
	}
}

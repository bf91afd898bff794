//! Stream endpoint: one UDP socket, its session IDs, the type-0
//! idle/retransmit handler and the type-7 ping handler.
//!
//! Reads own their socket exclusively: a single reader thread
//! classifies every inbound datagram and either answers it in-line (type-0
//! retransmit requests, type-7 pings) or pushes it onto the owner's inbox.
//! Everything mutable that the reader and the owner both touch - send-seq,
//! retransmit buffer, ping bookkeeping - lives behind one mutex.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use rand::Rng;
use wire::{frame, Frame, SeqNum};

use crate::retransmit::RetransmitBuffer;
use crate::SessionError;

const EXPECT_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_RETRIES: u32 = 5;
const HANDSHAKE_RETRY_GAP: Duration = Duration::from_millis(2000);
const PKT3_SPACING: Duration = Duration::from_millis(100);

const PKT7_SEND_INTERVAL: Duration = Duration::from_secs(3);
const PKT7_TIMEOUT: Duration = Duration::from_secs(3);
const PEER_LOST_AFTER_MISSES: u32 = 3;

/// Idle cadence: once nothing has been sent for `PKT0_IDLE_AFTER`, emit a
/// tracked idle frame; left alone, one more follows every
/// `PKT0_IDLE_SEND_INTERVAL` after that (sending one resets the inactivity
/// clock, so the same threshold produces both gaps). Checked on a
/// `PKT0_DEFAULT_SEND_INTERVAL` tick so user traffic never waits longer than
/// that to be noticed.
const PKT0_IDLE_AFTER: Duration = Duration::from_secs(1);
const PKT0_IDLE_SEND_INTERVAL: Duration = Duration::from_secs(1);
const PKT0_DEFAULT_SEND_INTERVAL: Duration = Duration::from_millis(100);

struct PendingPing {
	reply_id: [u8; 4],
	sent_at: Instant,
}

struct Shared {
	send_seq: SeqNum,
	retransmit: RetransmitBuffer,
	ping_seq: SeqNum,
	ping_inner_seq: u16,
	pending_ping: Option<PendingPing>,
	last_send: Instant,
	last_send_was_idle: bool,
}

/// One UDP stream endpoint (control, serial, or audio).
pub struct Endpoint {
	pub name: &'static str,
	socket: UdpSocket,
	local_sid: u32,
	remote_sid: OnceLock<u32>,
	shared: Mutex<Shared>,
	shutdown: runtime::Shutdown,
	inbox_rx: Mutex<Receiver<Frame>>,
	ping_misses: AtomicU32,
	reader: Mutex<Option<JoinHandle<()>>>,
	prober: Mutex<Option<JoinHandle<()>>>,
	idle: Mutex<Option<JoinHandle<()>>>,
	/// Flipped by `disconnect()` so this endpoint's background loops exit
	/// even when the session-wide shutdown flag was never requested (e.g. a
	/// caller tearing one session down without a Ctrl-C).
	closing: AtomicBool,
}

impl Endpoint {
	/// Open the socket, connect it to `addr:port`, and start the reader
	/// thread. The handshake itself is a separate step (`handshake`).
	pub fn init(name: &'static str, addr: &str, port: u16, shutdown: runtime::Shutdown) -> Result<Arc<Self>, SessionError> {
		let socket = UdpSocket::bind(("0.0.0.0", 0))?;
		socket.connect((addr, port))?;
		socket.set_read_timeout(Some(Duration::from_millis(200)))?;

		let local_sid: u32 = rand::thread_rng().gen();

		let (tx, rx) = mpsc::channel();

		let this = Arc::new(Self {
			name,
			socket,
			local_sid,
			remote_sid: OnceLock::new(),
			shared: Mutex::new(Shared {
				send_seq: SeqNum::new(1),
				retransmit: RetransmitBuffer::new(),
				ping_seq: SeqNum::new(2),
				ping_inner_seq: 0x8304,
				pending_ping: None,
				last_send: Instant::now(),
				last_send_was_idle: false,
			}),
			shutdown,
			inbox_rx: Mutex::new(rx),
			ping_misses: AtomicU32::new(0),
			reader: Mutex::new(None),
			prober: Mutex::new(None),
			idle: Mutex::new(None),
			closing: AtomicBool::new(false),
		});

		let reader = {
			let this = this.clone();
			thread::Builder::new()
				.name(format!("{name}-reader"))
				.spawn(move || this.read_loop(tx))
				.expect("spawning the reader thread should not fail")
		};

		*this.reader.lock().unwrap() = Some(reader);

		let idle = {
			let this = this.clone();
			thread::Builder::new()
				.name(format!("{name}-idle"))
				.spawn(move || this.idle_loop())
				.expect("spawning the idle thread should not fail")
		};

		*this.idle.lock().unwrap() = Some(idle);

		Ok(this)
	}

	pub fn local_sid(&self) -> u32 {
		self.local_sid
	}

	pub fn remote_sid(&self) -> Option<u32> {
		self.remote_sid.get().copied()
	}

	fn remote_sid_or_zero(&self) -> u32 {
		self.remote_sid().unwrap_or(0)
	}

	/// Whether this endpoint's background loops should exit: either the
	/// session-wide shutdown flag fired, or `disconnect()` was called
	/// directly on just this endpoint.
	fn should_stop(&self) -> bool {
		self.shutdown.requested() || self.closing.load(Ordering::Relaxed)
	}

	/// pkt3/pkt4/pkt6 handshake. Retries the whole sequence up to
	/// `HANDSHAKE_RETRIES` times, `HANDSHAKE_RETRY_GAP` apart.
	pub fn handshake(&self) -> Result<(), SessionError> {
		for attempt in 1..=HANDSHAKE_RETRIES {
			if self.shutdown.requested() {
				return Err(SessionError::Cancelled);
			}

			debug!("{}: handshake attempt {attempt}/{HANDSHAKE_RETRIES}", self.name);

			if self.try_handshake()? {
				return Ok(());
			}

			if attempt < HANDSHAKE_RETRIES {
				debug!("{}: handshake attempt {attempt} failed, retrying in {}", self.name, runtime::time::humanize(HANDSHAKE_RETRY_GAP));
				thread::sleep(HANDSHAKE_RETRY_GAP);
			}
		}

		Err(SessionError::HandshakeTimeout)
	}

	fn try_handshake(&self) -> Result<bool, SessionError> {
		for _ in 0..3 {
			self.send_raw(&frame::encode_pkt3(self.local_sid, 0))?;
			thread::sleep(PKT3_SPACING);
		}

		let Some(remote_sid) = self.await_frame(EXPECT_TIMEOUT, |f| matches!(f, Frame::Pkt4 { .. })).and_then(|f| match f {
			Frame::Pkt4 { sid_a, .. } => Some(sid_a),
			_ => None,
		}) else {
			return Ok(false);
		};

		let _ = self.remote_sid.set(remote_sid);

		for _ in 0..2 {
			self.send_raw(&frame::encode_pkt6(self.local_sid, remote_sid))?;
		}

		// Any frame of type 6 completes the handshake, regardless of subtype byte.
		Ok(self.await_frame(EXPECT_TIMEOUT, |f| matches!(f, Frame::Pkt6 { .. })).is_some())
	}

	/// Block until a frame matching `pred` arrives or `timeout` elapses.
	/// Frames that don't match are dropped (only relevant pre-handshake,
	/// where nothing else should legitimately arrive).
	fn await_frame(&self, timeout: Duration, pred: impl Fn(&Frame) -> bool) -> Option<Frame> {
		let deadline = Instant::now() + timeout;
		let rx = self.inbox_rx.lock().unwrap();

		loop {
			let remaining = deadline.checked_duration_since(Instant::now())?;

			match rx.recv_timeout(remaining) {
				Ok(frame) if pred(&frame) => return Some(frame),
				Ok(other) => trace!("{}: dropping unexpected frame while waiting: {other:?}", self.name),
				Err(_) => return None,
			}
		}
	}

	/// Wait up to `EXPECT_TIMEOUT` for the 96-byte login answer.
	pub fn await_login_answer(&self) -> Result<Frame, SessionError> {
		self.await_frame(EXPECT_TIMEOUT, |f| matches!(f, Frame::LoginAnswer { .. })).ok_or(SessionError::HandshakeTimeout)
	}

	/// Assign the next type-0 send-seq, stamp it at its fixed offset, store
	/// the encoded bytes in the retransmit buffer, and transmit once.
	pub fn send_tracked(&self, build: impl FnOnce(u16) -> Vec<u8>) -> Result<u16, SessionError> {
		self.send_tracked_inner(build, false)
	}

	fn send_tracked_inner(&self, build: impl FnOnce(u16) -> Vec<u8>, is_idle: bool) -> Result<u16, SessionError> {
		let mut shared = self.shared.lock().unwrap();
		let seq = shared.send_seq.get();
		let mut bytes = build(seq);
		frame::stamp_seq(&mut bytes, seq);

		let send_seq = shared.send_seq;
		shared.retransmit.insert(send_seq, &bytes);
		shared.send_seq = shared.send_seq.next();
		shared.last_send = Instant::now();
		shared.last_send_was_idle = is_idle;
		drop(shared);

		self.send_raw(&bytes)?;
		Ok(seq)
	}

	pub fn send_raw(&self, bytes: &[u8]) -> Result<(), SessionError> {
		self.socket.send(bytes)?;
		Ok(())
	}

	/// Pop the next frame the reader couldn't handle in-line. Returns `None`
	/// on timeout or shutdown.
	pub fn recv(&self, timeout: Duration) -> Option<Frame> {
		self.inbox_rx.lock().unwrap().recv_timeout(timeout).ok()
	}

	/// Start the type-7 prober. It stays idle until `gate` flips to `true`
	/// (control-auth-ok).
	pub fn start_prober(self: &Arc<Self>, gate: Arc<AtomicBool>) {
		let this = self.clone();

		let handle = thread::Builder::new()
			.name(format!("{}-pkt7", this.name))
			.spawn(move || this.prober_loop(gate))
			.expect("spawning the prober thread should not fail");

		*self.prober.lock().unwrap() = Some(handle);
	}

	pub fn ping_misses(&self) -> u32 {
		self.ping_misses.load(Ordering::Relaxed)
	}

	/// Watch the outer send-seq's inactivity clock and emit a tracked idle
	/// frame once it's gone quiet, so the peer's keep-alive window never
	/// lapses. Runs from handshake onward, independent of control-auth.
	fn idle_loop(&self) {
		while !self.should_stop() {
			thread::sleep(PKT0_DEFAULT_SEND_INTERVAL);

			if self.should_stop() || self.remote_sid().is_none() {
				continue;
			}

			let (elapsed, threshold) = {
				let shared = self.shared.lock().unwrap();
				let threshold = if shared.last_send_was_idle { PKT0_IDLE_SEND_INTERVAL } else { PKT0_IDLE_AFTER };
				(shared.last_send.elapsed(), threshold)
			};

			if elapsed < threshold {
				continue;
			}

			let remote = self.remote_sid_or_zero();
			if let Err(err) = self.send_tracked_inner(|_seq| frame::encode_idle(self.local_sid, remote, None).to_vec(), true) {
				warn!("{}: failed to send idle keep-alive: {err}", self.name);
			}
		}
	}

	fn prober_loop(&self, gate: Arc<AtomicBool>) {
		while !self.should_stop() {
			thread::sleep(PKT7_SEND_INTERVAL);

			if self.should_stop() || !gate.load(Ordering::Relaxed) {
				continue;
			}

			if let Err(err) = self.send_ping() {
				warn!("{}: failed to send ping: {err}", self.name);
				continue;
			}

			if self.await_ping_reply() {
				self.ping_misses.store(0, Ordering::Relaxed);
			} else {
				let misses = self.ping_misses.fetch_add(1, Ordering::Relaxed) + 1;
				warn!("{}: pkt7 reply timed out ({misses}/{PEER_LOST_AFTER_MISSES})", self.name);
			}
		}
	}

	fn send_ping(&self) -> Result<(), SessionError> {
		let mut shared = self.shared.lock().unwrap();

		let mut reply_id = [0u8; 4];
		reply_id[0] = rand::thread_rng().gen();
		reply_id[1..3].copy_from_slice(&shared.ping_inner_seq.to_le_bytes());
		reply_id[3] = 0x06;
		shared.ping_inner_seq = shared.ping_inner_seq.wrapping_add(1);

		let seq = shared.ping_seq.get();
		shared.ping_seq = shared.ping_seq.next();
		shared.pending_ping = Some(PendingPing { reply_id, sent_at: Instant::now() });

		drop(shared);

		let frame = frame::encode_ping(self.local_sid, self.remote_sid_or_zero(), seq, false, reply_id);
		self.send_raw(&frame)
	}

	fn await_ping_reply(&self) -> bool {
		let deadline = Instant::now() + PKT7_TIMEOUT;

		loop {
			{
				let shared = self.shared.lock().unwrap();
				if shared.pending_ping.is_none() {
					return true;
				}
			}

			if Instant::now() >= deadline {
				self.shared.lock().unwrap().pending_ping = None;
				return false;
			}

			thread::sleep(Duration::from_millis(50));
		}
	}

	/// If `got_remote_sid`, send pkt5 twice and tear down background threads.
	pub fn disconnect(&self) {
		if let Some(remote_sid) = self.remote_sid() {
			for _ in 0..2 {
				let _ = self.send_raw(&frame::encode_pkt5(self.local_sid, remote_sid));
			}
		}

		self.closing.store(true, Ordering::Relaxed);

		if let Some(handle) = self.reader.lock().unwrap().take() {
			let _ = handle.join();
		}

		if let Some(handle) = self.prober.lock().unwrap().take() {
			let _ = handle.join();
		}

		if let Some(handle) = self.idle.lock().unwrap().take() {
			let _ = handle.join();
		}
	}

	fn read_loop(&self, inbox: Sender<Frame>) {
		let mut buf = [0u8; 1500];

		while !self.should_stop() {
			let n = match self.socket.recv(&mut buf) {
				Ok(n) => n,
				Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => continue,
				Err(_) => break,
			};

			match frame::decode(&buf[..n]) {
				Frame::Unknown => debug!("{}: dropped unrecognized {n}-byte frame", self.name),
				Frame::Ping { is_reply: false, reply_id, seq, .. } => self.handle_ping_request(seq, reply_id),
				Frame::Ping { is_reply: true, reply_id, .. } => self.handle_ping_reply(reply_id),
				Frame::RetransmitReq { seq, .. } => self.handle_retransmit_req(SeqNum::new(seq)),
				Frame::RangeRetransmit { start, count, .. } => {
					for s in start..start.wrapping_add(count) {
						self.handle_retransmit_req(SeqNum::new(s));
					}
				}
				other => {
					if inbox.send(other).is_err() {
						break;
					}
				}
			}
		}
	}

	fn handle_ping_request(&self, seq: u16, reply_id: [u8; 4]) {
		let reply = frame::encode_ping(self.local_sid, self.remote_sid_or_zero(), seq, true, reply_id);
		if let Err(err) = self.send_raw(&reply) {
			warn!("{}: failed to answer pkt7: {err}", self.name);
		}
	}

	fn handle_ping_reply(&self, reply_id: [u8; 4]) {
		let mut shared = self.shared.lock().unwrap();
		if shared.pending_ping.as_ref().is_some_and(|p| p.reply_id == reply_id) {
			shared.pending_ping = None;
		}
	}

	fn handle_retransmit_req(&self, seq: SeqNum) {
		let shared = self.shared.lock().unwrap();

		if let Some(bytes) = shared.retransmit.get(seq) {
			let bytes = bytes.to_vec();
			drop(shared);

			for _ in 0..2 {
				if let Err(err) = self.send_raw(&bytes) {
					warn!("{}: failed to resend seq {}: {err}", self.name, seq.get());
				}
			}
		} else {
			let local_sid = self.local_sid;
			let remote_sid = self.remote_sid_or_zero();
			drop(shared);

			debug!("{}: retransmit-miss for seq {}, sending idle replacement", self.name, seq.get());

			for _ in 0..2 {
				let idle = frame::encode_idle(local_sid, remote_sid, Some(seq.get()));
				if let Err(err) = self.send_raw(&idle) {
					warn!("{}: failed to send idle replacement: {err}", self.name);
				}
			}
		}
	}
}

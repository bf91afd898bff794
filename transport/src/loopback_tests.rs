//! End-to-end tests against a hand-rolled radio stand-in: three UDP sockets
//! that speak just enough of the wire protocol to drive a [`Session`] through
//! handshake, login, auth, and provisioning.

use std::net::{SocketAddr, UdpSocket};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use wire::{frame, radio_sim, Frame};

use crate::{ControlState, Session, SessionError};

const SIM_TIMEOUT: Duration = Duration::from_secs(5);

fn bind_sim() -> UdpSocket {
	let sock = UdpSocket::bind("127.0.0.1:0").expect("binding a loopback socket should not fail");
	sock.set_read_timeout(Some(SIM_TIMEOUT)).unwrap();
	sock
}

fn port_of(sock: &UdpSocket) -> u16 {
	sock.local_addr().unwrap().port()
}

/// Drive the pkt3/pkt4/pkt6 handshake from the radio side. Returns the peer's
/// address and the session ID it announced.
fn sim_handshake(sock: &UdpSocket, sim_sid: u32) -> (SocketAddr, u32) {
	let mut buf = [0u8; 1500];

	let (peer, client_sid) = loop {
		let (n, addr) = sock.recv_from(&mut buf).expect("handshake: waiting for pkt3");
		if let Frame::Pkt3 { sid_a, .. } = frame::decode(&buf[..n]) {
			break (addr, sid_a);
		}
	};

	sock.send_to(&radio_sim::encode_pkt4(sim_sid, client_sid), peer).unwrap();

	loop {
		let (n, addr) = sock.recv_from(&mut buf).expect("handshake: waiting for pkt6");
		if matches!(frame::decode(&buf[..n]), Frame::Pkt6 { .. }) {
			sock.send_to(&frame::encode_pkt6(sim_sid, client_sid), addr).unwrap();
			return (peer, client_sid);
		}
	}
}

/// The client fires its last pkt3/pkt6 retry without waiting for a reply, so
/// a duplicate can still be in flight when the handshake above already
/// matched and moved on. Drain it before handing the socket back for use as
/// a plain request/reply pair in the rest of the test.
fn drain_stragglers(sock: &UdpSocket) {
	sock.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
	let mut buf = [0u8; 1500];
	while sock.recv_from(&mut buf).is_ok() {}
	sock.set_read_timeout(Some(SIM_TIMEOUT)).unwrap();
}

/// Run a socket through handshake only, then hand it back to the caller
/// still bound and ready for further raw exchanges.
fn spawn_handshake_only(sock: UdpSocket, sim_sid: u32) -> JoinHandle<(UdpSocket, SocketAddr, u32)> {
	thread::spawn(move || {
		let (peer, client_sid) = sim_handshake(&sock, sim_sid);
		drain_stragglers(&sock);
		(sock, peer, client_sid)
	})
}

/// Run the control endpoint through handshake, login, two-step auth, and
/// serial/audio provisioning. On bad credentials the login answer is the
/// last thing sent and the thread returns `None`.
fn spawn_control(sock: UdpSocket, sim_sid: u32, bad_credentials: bool, device_name: &'static str) -> JoinHandle<Option<(UdpSocket, SocketAddr, u32)>> {
	thread::spawn(move || {
		let (peer, client_sid) = sim_handshake(&sock, sim_sid);
		let mut buf = [0u8; 1500];

		let auth_id = [1, 2, 3, 4, 5, 6];
		let a8_reply_id = [9u8; 16];

		loop {
			let (n, addr) = sock.recv_from(&mut buf).expect("control sim: waiting for login");
			if matches!(frame::decode(&buf[..n]), Frame::Login { .. }) {
				sock.send_to(&radio_sim::encode_login_answer(auth_id, bad_credentials), addr).unwrap();
				break;
			}
		}

		if bad_credentials {
			return None;
		}

		loop {
			let (n, addr) = sock.recv_from(&mut buf).expect("control sim: waiting for second auth");
			if let Frame::Auth { magic: 0x05, .. } = frame::decode(&buf[..n]) {
				sock.send_to(&radio_sim::encode_auth_answer(sim_sid, client_sid, 0x05), addr).unwrap();
				sock.send_to(&radio_sim::encode_a8_reply(a8_reply_id), addr).unwrap();
				break;
			}
		}

		loop {
			let (n, addr) = sock.recv_from(&mut buf).expect("control sim: waiting for serial/audio request");
			if matches!(frame::decode(&buf[..n]), Frame::SerialAudioRequest { .. }) {
				sock.send_to(&radio_sim::encode_serial_audio_answer(true, device_name), addr).unwrap();
				break;
			}
		}

		Some((sock, peer, client_sid))
	})
}

#[test]
fn establishes_session_and_exchanges_civ() {
	let control_sock = bind_sim();
	let serial_sock = bind_sim();
	let audio_sock = bind_sim();

	let control_port = port_of(&control_sock);
	let serial_port = port_of(&serial_sock);
	let audio_port = port_of(&audio_sock);

	let control_handle = spawn_control(control_sock, 0xaaaa_0001, false, "IC-9700");
	let serial_handle = spawn_handshake_only(serial_sock, 0xaaaa_0002);
	let audio_handle = spawn_handshake_only(audio_sock, 0xaaaa_0003);

	let session =
		Session::connect_ports("127.0.0.1", control_port, serial_port, audio_port, "user", "pass", runtime::Shutdown::never()).expect("session should establish against a well-behaved sim");

	assert_eq!(session.device_name(), "IC-9700");
	assert_eq!(session.control_state(), ControlState::Established);

	control_handle.join().unwrap().expect("control sim should complete provisioning");
	let (serial_sock, _serial_peer, _) = serial_handle.join().unwrap();
	audio_handle.join().unwrap();

	let outbound = b"\xfe\xfe\x01\xe0\x19\x00\xfd";
	session.serial().send(outbound).expect("sending a CI-V command should succeed");

	let mut buf = [0u8; 1500];
	let (n, from) = serial_sock.recv_from(&mut buf).expect("sim should receive the CI-V envelope");
	match frame::decode(&buf[..n]) {
		Frame::Civ { payload, .. } => assert_eq!(payload, outbound),
		other => panic!("expected a CI-V envelope, got {other:?}"),
	}

	let inbound = b"\xfe\xfe\xe0\x01\x00\xfd";
	let reply = frame::encode_civ(0xaaaa_0002, 0, 1, inbound);
	serial_sock.send_to(&reply, from).unwrap();

	let got = session.serial().recv(Duration::from_secs(2)).expect("should receive the radio's CI-V reply");
	assert_eq!(got, inbound);

	session.close();
}

#[test]
fn bad_credentials_are_rejected() {
	let control_sock = bind_sim();
	let serial_sock = bind_sim();
	let audio_sock = bind_sim();

	let control_port = port_of(&control_sock);
	let serial_port = port_of(&serial_sock);
	let audio_port = port_of(&audio_sock);

	let control_handle = spawn_control(control_sock, 0xbbbb_0001, true, "");
	let serial_handle = spawn_handshake_only(serial_sock, 0xbbbb_0002);
	let audio_handle = spawn_handshake_only(audio_sock, 0xbbbb_0003);

	let result = Session::connect_ports("127.0.0.1", control_port, serial_port, audio_port, "user", "wrong", runtime::Shutdown::never());

	assert!(matches!(result, Err(SessionError::BadCredentials)), "expected BadCredentials, got {result:?}");

	assert!(control_handle.join().unwrap().is_none());
	serial_handle.join().unwrap();
	audio_handle.join().unwrap();
}

#[test]
fn retransmit_request_resends_identical_bytes() {
	let control_sock = bind_sim();
	let serial_sock = bind_sim();
	let audio_sock = bind_sim();

	let control_port = port_of(&control_sock);
	let serial_port = port_of(&serial_sock);
	let audio_port = port_of(&audio_sock);

	let control_handle = spawn_control(control_sock, 0xcccc_0001, false, "IC-7300");
	let serial_handle = spawn_handshake_only(serial_sock, 0xcccc_0002);
	let audio_handle = spawn_handshake_only(audio_sock, 0xcccc_0003);

	let session = Session::connect_ports("127.0.0.1", control_port, serial_port, audio_port, "user", "pass", runtime::Shutdown::never()).expect("session should establish");

	control_handle.join().unwrap();
	let (serial_sock, _peer, _) = serial_handle.join().unwrap();
	audio_handle.join().unwrap();

	session.serial().send(b"first-command").unwrap();

	let mut buf = [0u8; 1500];
	let (n, from) = serial_sock.recv_from(&mut buf).expect("sim should receive the tracked CI-V envelope");
	let original = buf[..n].to_vec();

	serial_sock.send_to(&frame::encode_retransmit_req(0, 0, 1), from).unwrap();

	let (n, _) = serial_sock.recv_from(&mut buf).expect("first retransmit copy");
	assert_eq!(&buf[..n], &original[..]);

	let (n, _) = serial_sock.recv_from(&mut buf).expect("second retransmit copy");
	assert_eq!(&buf[..n], &original[..]);

	session.close();
}

//! Frame codec for the fixed control-frame shapes and the variable-length
//! CI-V envelope.
//!
//! All multi-byte length fields are little-endian; the session-ID fields at
//! offsets 8 and 12 are big-endian; the auth inner-seq at offset 23 is
//! little-endian. Unknown frames decode to [`Frame::Unknown`] and are passed
//! through untouched by the caller.

use byteorder::{BigEndian as BE, ByteOrder, LittleEndian as LE};
use log::warn;

const BAD_CREDENTIALS_MARKER: [u8; 4] = [0xff, 0xff, 0xff, 0xfe];

/// A decoded frame. Field names are direction-agnostic: `sid_a`/`sid_b` are
/// whatever occupies offsets 8 and 12, and the caller (which knows whether it
/// is reading its own echoed frame or a peer's) assigns them to local/remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
	Pkt3 { sid_a: u32, sid_b: u32 },
	Pkt4 { sid_a: u32, sid_b: u32 },
	Pkt5 { sid_a: u32, sid_b: u32 },
	Pkt6 { sid_a: u32, sid_b: u32 },
	Idle { sid_a: u32, sid_b: u32, seq: u16 },
	RetransmitReq { sid_a: u32, sid_b: u32, seq: u16 },
	RangeRetransmit { sid_a: u32, sid_b: u32, start: u16, count: u16 },
	Ping { sid_a: u32, sid_b: u32, seq: u16, is_reply: bool, reply_id: [u8; 4] },
	Login { sid_a: u32, sid_b: u32, inner_seq: u16, username: [u8; 16], password: [u8; 16], device_name: [u8; 16] },
	LoginAnswer { auth_id: [u8; 6], bad_credentials: bool },
	Auth { sid_a: u32, sid_b: u32, magic: u8, inner_seq: u16, auth_id: [u8; 6] },
	A8Reply { a8_reply_id: [u8; 16] },
	SerialAudioRequest { sid_a: u32, sid_b: u32, inner_seq: u16, auth_id: [u8; 6], a8_reply_id: [u8; 16], serial_port: u16, audio_port: u16 },
	SerialAudioAnswer { success: bool, device_name: String },
	Civ { sid_a: u32, sid_b: u32, seq: u16, payload: Vec<u8> },
	Unknown,
}

fn sids(buf: &[u8]) -> (u32, u32) {
	(BE::read_u32(&buf[8..12]), BE::read_u32(&buf[12..16]))
}

/// Classify and parse an inbound datagram. Never panics on malformed input;
/// returns [`Frame::Unknown`] for anything that doesn't match a known shape.
pub fn decode(buf: &[u8]) -> Frame {
	if buf.len() < 6 {
		return Frame::Unknown;
	}

	let len = LE::read_u32(&buf[0..4]) as usize;
	let kind = LE::read_u16(&buf[4..6]);

	match (buf.len(), kind) {
		(16, 3) if len == 16 => {
			let (sid_a, sid_b) = sids(buf);
			Frame::Pkt3 { sid_a, sid_b }
		}
		(16, 4) if len == 16 => {
			let (sid_a, sid_b) = sids(buf);
			Frame::Pkt4 { sid_a, sid_b }
		}
		(16, 5) if len == 16 => {
			let (sid_a, sid_b) = sids(buf);
			Frame::Pkt5 { sid_a, sid_b }
		}
		(16, 6) => {
			// Tolerate any subtype byte at offset 6-7: firmware revisions have
			// been observed to vary it.
			let (sid_a, sid_b) = sids(buf);
			Frame::Pkt6 { sid_a, sid_b }
		}
		(16, 0) if len == 16 => {
			let (sid_a, sid_b) = sids(buf);
			Frame::Idle { sid_a, sid_b, seq: LE::read_u16(&buf[6..8]) }
		}
		(16, 1) if len == 16 => {
			let (sid_a, sid_b) = sids(buf);
			Frame::RetransmitReq { sid_a, sid_b, seq: LE::read_u16(&buf[6..8]) }
		}
		(24, 1) if len == 24 => {
			let (sid_a, sid_b) = sids(buf);
			Frame::RangeRetransmit { sid_a, sid_b, start: LE::read_u16(&buf[6..8]), count: LE::read_u16(&buf[16..18]) }
		}
		(21, 7) if len == 21 => {
			let (sid_a, sid_b) = sids(buf);
			let mut reply_id = [0u8; 4];
			reply_id.copy_from_slice(&buf[17..21]);
			Frame::Ping { sid_a, sid_b, seq: LE::read_u16(&buf[6..8]), is_reply: buf[16] != 0, reply_id }
		}
		(128, _) if len == 128 && &buf[16..20] == [0x00, 0x00, 0x00, 0x70] => {
			let (sid_a, sid_b) = sids(buf);
			let mut username = [0u8; 16];
			let mut password = [0u8; 16];
			let mut device_name = [0u8; 16];
			username.copy_from_slice(&buf[64..80]);
			password.copy_from_slice(&buf[80..96]);
			device_name.copy_from_slice(&buf[96..112]);
			Frame::Login { sid_a, sid_b, inner_seq: LE::read_u16(&buf[23..25]), username, password, device_name }
		}
		(96, _) if len == 96 && buf[6..8] == [0x01, 0x00] => {
			let mut auth_id = [0u8; 6];
			auth_id.copy_from_slice(&buf[26..32]);
			Frame::LoginAnswer { auth_id, bad_credentials: buf[48..52] == BAD_CREDENTIALS_MARKER }
		}
		(64, _) if len == 64 => {
			// The radio's own auth-answer frames don't necessarily carry the
			// 0x30 magic our own encoder stamps on outgoing auth frames - a
			// 64-byte frame is unambiguous on its own.
			let (sid_a, sid_b) = sids(buf);
			let mut auth_id = [0u8; 6];
			auth_id.copy_from_slice(&buf[25..31]);
			Frame::Auth { sid_a, sid_b, magic: buf[21], inner_seq: LE::read_u16(&buf[23..25]), auth_id }
		}
		(80, _) if len == 80 => {
			let mut a8_reply_id = [0u8; 16];
			a8_reply_id.copy_from_slice(&buf[32..48]);
			Frame::A8Reply { a8_reply_id }
		}
		(144, _) if len == 144 && &buf[16..20] == [0x00, 0x00, 0x00, 0x80] && buf[21] == 0x03 => {
			let (sid_a, sid_b) = sids(buf);
			let mut auth_id = [0u8; 6];
			let mut a8_reply_id = [0u8; 16];
			auth_id.copy_from_slice(&buf[25..31]);
			a8_reply_id.copy_from_slice(&buf[31..47]);
			Frame::SerialAudioRequest {
				sid_a,
				sid_b,
				inner_seq: LE::read_u16(&buf[23..25]),
				auth_id,
				a8_reply_id,
				serial_port: BE::read_u16(&buf[80..82]),
				audio_port: BE::read_u16(&buf[82..84]),
			}
		}
		(144, _) if len == 144 => {
			let name_bytes = &buf[64..144];
			let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
			let device_name = String::from_utf8_lossy(&name_bytes[..end]).into_owned();
			Frame::SerialAudioAnswer { success: buf[96] == 1, device_name }
		}
		(n, _) if n >= 21 && len == n && buf[16] == 0xc1 => {
			let (sid_a, sid_b) = sids(buf);
			let data_len = buf[17] as usize;

			if 21 + data_len != n {
				warn!("CI-V envelope declares {data_len} payload bytes but frame is {n} bytes");
				return Frame::Unknown;
			}

			Frame::Civ { sid_a, sid_b, seq: LE::read_u16(&buf[19..21]), payload: buf[21..].to_vec() }
		}
		_ => Frame::Unknown,
	}
}

fn base16(kind: u16, sid_a: u32, sid_b: u32) -> [u8; 16] {
	let mut buf = [0u8; 16];
	LE::write_u32(&mut buf[0..4], 16);
	LE::write_u16(&mut buf[4..6], kind);
	BE::write_u32(&mut buf[8..12], sid_a);
	BE::write_u32(&mut buf[12..16], sid_b);
	buf
}

pub fn encode_pkt3(local_sid: u32, remote_sid: u32) -> [u8; 16] {
	base16(3, local_sid, remote_sid)
}

pub fn encode_pkt5(local_sid: u32, remote_sid: u32) -> [u8; 16] {
	base16(5, local_sid, remote_sid)
}

pub fn encode_pkt6(local_sid: u32, remote_sid: u32) -> [u8; 16] {
	let mut buf = base16(6, local_sid, remote_sid);
	buf[6] = 0x01;
	buf
}

/// Encode an idle frame. When `seq` is `None` the caller is expected to stamp
/// the send-seq in afterward (used for tracked sends); when `Some`, it is the
/// "replacement" sequence carried in a retransmit-miss response.
pub fn encode_idle(local_sid: u32, remote_sid: u32, seq: Option<u16>) -> [u8; 16] {
	let mut buf = base16(0, local_sid, remote_sid);
	if let Some(seq) = seq {
		LE::write_u16(&mut buf[6..8], seq);
	}
	buf
}

pub fn encode_retransmit_req(local_sid: u32, remote_sid: u32, seq: u16) -> [u8; 16] {
	let mut buf = base16(1, local_sid, remote_sid);
	LE::write_u16(&mut buf[6..8], seq);
	buf
}

/// Stamp the type-0 outer send-seq into a tracked frame at its fixed offset.
/// Called once per send by the endpoint's tracked-send path, after the
/// frame's own encoder has filled in everything else.
pub fn stamp_seq(buf: &mut [u8], seq: u16) {
	LE::write_u16(&mut buf[6..8], seq);
}

pub fn encode_ping(local_sid: u32, remote_sid: u32, seq: u16, is_reply: bool, reply_id: [u8; 4]) -> [u8; 21] {
	let mut buf = [0u8; 21];
	LE::write_u32(&mut buf[0..4], 21);
	LE::write_u16(&mut buf[4..6], 7);
	LE::write_u16(&mut buf[6..8], seq);
	BE::write_u32(&mut buf[8..12], local_sid);
	BE::write_u32(&mut buf[12..16], remote_sid);
	buf[16] = is_reply as u8;
	buf[17..21].copy_from_slice(&reply_id);
	buf
}

pub fn encode_login(local_sid: u32, remote_sid: u32, inner_seq: u16, auth_start_id: [u8; 2], username: [u8; 16], password: [u8; 16]) -> [u8; 128] {
	let mut buf = [0u8; 128];
	LE::write_u32(&mut buf[0..4], 128);
	BE::write_u32(&mut buf[8..12], local_sid);
	BE::write_u32(&mut buf[12..16], remote_sid);
	buf[16..20].copy_from_slice(&[0x00, 0x00, 0x00, 0x70]);
	buf[20] = 0x01;
	LE::write_u16(&mut buf[23..25], inner_seq);
	buf[25..27].copy_from_slice(&auth_start_id);
	buf[64..80].copy_from_slice(&username);
	buf[80..96].copy_from_slice(&password);
	buf[96..104].copy_from_slice(b"icom-pc\0");
	buf
}

pub fn encode_auth(local_sid: u32, remote_sid: u32, inner_seq: u16, magic: u8, auth_id: [u8; 6]) -> [u8; 64] {
	let mut buf = [0u8; 64];
	LE::write_u32(&mut buf[0..4], 64);
	BE::write_u32(&mut buf[8..12], local_sid);
	BE::write_u32(&mut buf[12..16], remote_sid);
	buf[16..20].copy_from_slice(&[0x00, 0x00, 0x00, 0x30]);
	buf[20] = 0x01;
	buf[21] = magic;
	LE::write_u16(&mut buf[23..25], inner_seq);
	buf[25..31].copy_from_slice(&auth_id);
	buf
}

#[allow(clippy::too_many_arguments)]
pub fn encode_serial_audio_request(
	local_sid: u32,
	remote_sid: u32,
	inner_seq: u16,
	auth_id: [u8; 6],
	a8_reply_id: [u8; 16],
	serial_port: u16,
	audio_port: u16,
	username: [u8; 16],
) -> [u8; 144] {
	let mut buf = [0u8; 144];
	LE::write_u32(&mut buf[0..4], 144);
	BE::write_u32(&mut buf[8..12], local_sid);
	BE::write_u32(&mut buf[12..16], remote_sid);
	buf[16..20].copy_from_slice(&[0x00, 0x00, 0x00, 0x80]);
	buf[20] = 0x01;
	buf[21] = 0x03;
	LE::write_u16(&mut buf[23..25], inner_seq);
	buf[25..31].copy_from_slice(&auth_id);
	buf[31..47].copy_from_slice(&a8_reply_id);
	BE::write_u16(&mut buf[80..82], serial_port);
	BE::write_u16(&mut buf[82..84], audio_port);
	buf[96..112].copy_from_slice(&username);
	buf[112..116].copy_from_slice(&[0x01, 0x01, 0x04, 0x04]);
	buf
}

pub fn encode_civ(local_sid: u32, remote_sid: u32, seq: u16, payload: &[u8]) -> Vec<u8> {
	let mut buf = vec![0u8; 21 + payload.len()];
	let len = buf.len() as u32;
	LE::write_u32(&mut buf[0..4], len);
	BE::write_u32(&mut buf[8..12], local_sid);
	BE::write_u32(&mut buf[12..16], remote_sid);
	buf[16] = 0xc1;
	buf[17] = payload.len() as u8;
	LE::write_u16(&mut buf[19..21], seq);
	buf[21..].copy_from_slice(payload);
	buf
}

/// Encoders for frames only ever sent by the radio side of the protocol.
/// The core never needs to produce these itself, but a loopback simulator -
/// in this crate's own tests, or in a downstream crate's - does.
pub mod radio_sim {
	use super::*;

	pub fn encode_pkt4(local_sid: u32, remote_sid: u32) -> [u8; 16] {
		base16(4, local_sid, remote_sid)
	}

	pub fn encode_login_answer(auth_id: [u8; 6], bad_credentials: bool) -> [u8; 96] {
		let mut buf = [0u8; 96];
		LE::write_u32(&mut buf[0..4], 96);
		buf[6..8].copy_from_slice(&[0x01, 0x00]);
		buf[26..32].copy_from_slice(&auth_id);
		if bad_credentials {
			buf[48..52].copy_from_slice(&BAD_CREDENTIALS_MARKER);
		}
		buf
	}

	pub fn encode_auth_answer(local_sid: u32, remote_sid: u32, magic: u8) -> [u8; 64] {
		let mut buf = [0u8; 64];
		LE::write_u32(&mut buf[0..4], 64);
		BE::write_u32(&mut buf[8..12], local_sid);
		BE::write_u32(&mut buf[12..16], remote_sid);
		buf[21] = magic;
		buf
	}

	pub fn encode_a8_reply(a8_reply_id: [u8; 16]) -> [u8; 80] {
		let mut buf = [0u8; 80];
		LE::write_u32(&mut buf[0..4], 80);
		buf[32..48].copy_from_slice(&a8_reply_id);
		buf
	}

	pub fn encode_serial_audio_answer(success: bool, device_name: &str) -> [u8; 144] {
		let mut buf = [0u8; 144];
		LE::write_u32(&mut buf[0..4], 144);
		buf[96] = success as u8;
		let name = device_name.as_bytes();
		let n = name.len().min(144 - 64 - 1);
		buf[64..64 + n].copy_from_slice(&name[..n]);
		buf
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pkt3_round_trips() {
		let buf = encode_pkt3(0x1122_3344, 0);
		assert_eq!(decode(&buf), Frame::Pkt3 { sid_a: 0x1122_3344, sid_b: 0 });
	}

	#[test]
	fn pkt4_carries_remote_sid_big_endian() {
		let buf = radio_sim::encode_pkt4(0xaabb_ccdd, 0x1122_3344);
		match decode(&buf) {
			Frame::Pkt4 { sid_a, .. } => assert_eq!(sid_a, 0xaabb_ccdd),
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn length_field_is_little_endian_sid_fields_are_big_endian() {
		let buf = encode_pkt3(1, 2);
		assert_eq!(&buf[0..4], &[16, 0, 0, 0]);
		assert_eq!(&buf[8..12], &[0, 0, 0, 1]);
		assert_eq!(&buf[12..16], &[0, 0, 0, 2]);
	}

	#[test]
	fn swapped_endianness_breaks_decode() {
		let mut buf = encode_pkt3(1, 2);
		buf.swap(0, 3);
		assert_eq!(decode(&buf), Frame::Unknown);
	}

	#[test]
	fn idle_and_retransmit_req_round_trip() {
		let idle = encode_idle(1, 2, Some(7));
		assert_eq!(decode(&idle), Frame::Idle { sid_a: 1, sid_b: 2, seq: 7 });

		let req = encode_retransmit_req(1, 2, 42);
		assert_eq!(decode(&req), Frame::RetransmitReq { sid_a: 1, sid_b: 2, seq: 42 });
	}

	#[test]
	fn ping_round_trips_request_and_reply() {
		let req = encode_ping(1, 2, 9, false, [1, 2, 3, 4]);
		assert_eq!(decode(&req), Frame::Ping { sid_a: 1, sid_b: 2, seq: 9, is_reply: false, reply_id: [1, 2, 3, 4] });

		let rep = encode_ping(1, 2, 9, true, [1, 2, 3, 4]);
		assert_eq!(decode(&rep), Frame::Ping { sid_a: 1, sid_b: 2, seq: 9, is_reply: true, reply_id: [1, 2, 3, 4] });
	}

	#[test]
	fn login_round_trips_credentials() {
		let username = crate::passcode::passcode("admin");
		let password = crate::passcode::passcode("adminadmin");
		let buf = encode_login(1, 2, 3, [9, 9], username, password);

		match decode(&buf) {
			Frame::Login { inner_seq, username: u, password: p, device_name, .. } => {
				assert_eq!(inner_seq, 3);
				assert_eq!(u, username);
				assert_eq!(p, password);
				assert_eq!(&device_name[..8], b"icom-pc\0");
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn login_answer_detects_bad_credentials_marker() {
		let bad = radio_sim::encode_login_answer([0; 6], true);
		assert_eq!(decode(&bad), Frame::LoginAnswer { auth_id: [0; 6], bad_credentials: true });

		let ok = radio_sim::encode_login_answer([1, 2, 3, 4, 5, 6], false);
		assert_eq!(decode(&ok), Frame::LoginAnswer { auth_id: [1, 2, 3, 4, 5, 6], bad_credentials: false });
	}

	#[test]
	fn auth_round_trips_magic_byte() {
		let buf = encode_auth(1, 2, 5, 0x05, [1, 2, 3, 4, 5, 6]);
		assert_eq!(decode(&buf), Frame::Auth { sid_a: 1, sid_b: 2, magic: 0x05, inner_seq: 5, auth_id: [1, 2, 3, 4, 5, 6] });
	}

	#[test]
	fn serial_audio_request_round_trips() {
		let username = crate::passcode::passcode("admin");
		let buf = encode_serial_audio_request(1, 2, 4, [1; 6], [2; 16], 50002, 50003, username);

		match decode(&buf) {
			Frame::SerialAudioRequest { serial_port, audio_port, auth_id, a8_reply_id, .. } => {
				assert_eq!(serial_port, 50002);
				assert_eq!(audio_port, 50003);
				assert_eq!(auth_id, [1; 6]);
				assert_eq!(a8_reply_id, [2; 16]);
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn serial_audio_answer_extracts_c_string_device_name() {
		let buf = radio_sim::encode_serial_audio_answer(true, "IC-9700");
		assert_eq!(decode(&buf), Frame::SerialAudioAnswer { success: true, device_name: "IC-9700".to_owned() });
	}

	#[test]
	fn civ_envelope_round_trips_opaque_payload() {
		let payload = [0xfe, 0xfe, 0xa2, 0xe0, 0x25, 0xfd];
		let buf = encode_civ(1, 2, 3, &payload);
		assert_eq!(decode(&buf), Frame::Civ { sid_a: 1, sid_b: 2, seq: 3, payload: payload.to_vec() });
	}

	#[test]
	fn unknown_frames_do_not_panic() {
		assert_eq!(decode(&[]), Frame::Unknown);
		assert_eq!(decode(&[1, 2, 3]), Frame::Unknown);
		assert_eq!(decode(&[0xff; 16]), Frame::Unknown);
	}
}

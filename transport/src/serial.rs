//! Serial wrapper: frames outbound CI-V bytes into civ-envelopes and hands
//! inbound ones back stripped of their header. No CI-V semantics live here -
//! addressing, BCD, `0xFB`/`0xFD` framing are the caller's job.

use std::sync::Arc;
use std::time::Duration;

use wire::{frame, Frame};

use crate::endpoint::Endpoint;
use crate::SessionError;

/// A CI-V command is at most 232 bytes so the envelope stays at or under 253.
const MAX_CIV_PAYLOAD: usize = 232;

pub struct Serial {
	endpoint: Arc<Endpoint>,
}

impl Serial {
	pub fn new(endpoint: Arc<Endpoint>) -> Self {
		Self { endpoint }
	}

	pub(crate) fn endpoint(&self) -> &Arc<Endpoint> {
		&self.endpoint
	}

	/// Wrap `cmd` in a civ-envelope and send it, tracked under the serial
	/// endpoint's own send-seq.
	pub fn send(&self, cmd: &[u8]) -> Result<(), SessionError> {
		if cmd.is_empty() || cmd.len() > MAX_CIV_PAYLOAD {
			return Err(SessionError::ProtocolViolation(format!("CI-V command must be 1..={MAX_CIV_PAYLOAD} bytes, got {}", cmd.len())));
		}

		let local = self.endpoint.local_sid();
		let remote = self.endpoint.remote_sid().unwrap_or(0);

		self.endpoint.send_tracked(|seq| frame::encode_civ(local, remote, seq, cmd))?;
		Ok(())
	}

	/// Block until an inbound CI-V envelope arrives, returning its payload
	/// exactly as received.
	pub fn recv(&self, timeout: Duration) -> Option<Vec<u8>> {
		match self.endpoint.recv(timeout)? {
			Frame::Civ { payload, .. } => Some(payload),
			other => {
				log::debug!("serial: dropping non-CI-V frame on serial endpoint: {other:?}");
				None
			}
		}
	}
}

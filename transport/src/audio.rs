//! Audio wrapper: identical framing to the serial wrapper, carries codec
//! samples instead of CI-V bytes. No codec processing happens here.

use std::sync::Arc;
use std::time::Duration;

use wire::{frame, Frame};

use crate::endpoint::Endpoint;
use crate::SessionError;

pub struct Audio {
	endpoint: Arc<Endpoint>,
}

impl Audio {
	pub fn new(endpoint: Arc<Endpoint>) -> Self {
		Self { endpoint }
	}

	pub(crate) fn endpoint(&self) -> &Arc<Endpoint> {
		&self.endpoint
	}

	pub fn send(&self, samples: &[u8]) -> Result<(), SessionError> {
		let local = self.endpoint.local_sid();
		let remote = self.endpoint.remote_sid().unwrap_or(0);

		self.endpoint.send_tracked(|seq| frame::encode_civ(local, remote, seq, samples))?;
		Ok(())
	}

	pub fn recv(&self, timeout: Duration) -> Option<Vec<u8>> {
		match self.endpoint.recv(timeout)? {
			Frame::Civ { payload, .. } => Some(payload),
			other => {
				log::debug!("audio: dropping non-audio frame on audio endpoint: {other:?}");
				None
			}
		}
	}
}

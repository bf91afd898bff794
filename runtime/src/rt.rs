use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use utils::error::Result;

/// A shared flag that flips once on SIGINT/SIGTERM and stays flipped.
///
/// Every blocking loop in `transport` polls this between socket reads so a
/// Ctrl-C during a send/recv cycle still leads to an orderly teardown rather
/// than the process dying mid-handshake.
#[derive(Clone)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
	/// Install the Ctrl+C/SIGTERM handler and return a handle to watch it.
	pub fn install() -> Result<Self> {
		let flag = Arc::new(AtomicBool::new(false));
		let set = flag.clone();

		ctrlc::set_handler(move || set.store(true, Ordering::Relaxed)).map_err(|err| log::error!("failed to install Ctrl+C handler: {err}"))?;

		Ok(Self(flag))
	}

	pub fn requested(&self) -> bool {
		self.0.load(Ordering::Relaxed)
	}

	/// A handle that never reports a shutdown request. Useful for tests and
	/// for callers that manage their own teardown without Ctrl-C.
	pub fn never() -> Self {
		Self(Arc::new(AtomicBool::new(false)))
	}
}

//! The type-0 retransmit buffer: a bounded mapping from send-seq to the exact
//! bytes last transmitted under that seq.

use std::collections::VecDeque;

use wire::SeqNum;

/// Wide enough that a burst of retransmit requests right at the boundary
/// still hits.
const WINDOW: usize = 64;

pub struct RetransmitBuffer {
	entries: VecDeque<(SeqNum, Box<[u8]>)>,
}

impl RetransmitBuffer {
	pub fn new() -> Self {
		Self { entries: VecDeque::with_capacity(WINDOW) }
	}

	pub fn insert(&mut self, seq: SeqNum, bytes: &[u8]) {
		if self.entries.len() == WINDOW {
			self.entries.pop_front();
		}

		self.entries.push_back((seq, bytes.into()));
	}

	pub fn get(&self, seq: SeqNum) -> Option<&[u8]> {
		self.entries.iter().find(|(s, _)| *s == seq).map(|(_, b)| &**b)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn recalls_recent_entries() {
		let mut buf = RetransmitBuffer::new();
		buf.insert(SeqNum::new(1), b"one");
		buf.insert(SeqNum::new(2), b"two");

		assert_eq!(buf.get(SeqNum::new(1)), Some(&b"one"[..]));
		assert_eq!(buf.get(SeqNum::new(2)), Some(&b"two"[..]));
		assert_eq!(buf.get(SeqNum::new(3)), None);
	}

	#[test]
	fn evicts_oldest_once_window_exceeded() {
		let mut buf = RetransmitBuffer::new();

		for i in 0..(WINDOW as u16 + 1) {
			buf.insert(SeqNum::new(i), &i.to_le_bytes());
		}

		assert_eq!(buf.get(SeqNum::new(0)), None);
		assert!(buf.get(SeqNum::new(WINDOW as u16)).is_some());
	}
}

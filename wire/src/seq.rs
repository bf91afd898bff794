//! 16-bit wrapping sequence numbers.
//!
//! Three independent counters exist: the type-0 send-seq, the type-7
//! send-seq, and the control session's "inner" auth send-seq. All of them
//! share this representation.

use core::fmt;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SeqNum(u16);

impl SeqNum {
	pub const fn new(value: u16) -> Self {
		Self(value)
	}

	pub const fn get(self) -> u16 {
		self.0
	}

	#[must_use]
	pub fn next(self) -> Self {
		Self(self.0.wrapping_add(1))
	}

	/// Signed circular distance `self - other`. Positive means `self` is
	/// ahead of `other` by fewer than half the counter's range.
	fn distance(self, other: Self) -> i32 {
		(self.0.wrapping_sub(other.0) as i16) as i32
	}

	/// Whether `self` is strictly newer than `other` in the circular space.
	pub fn is_newer_than(self, other: Self) -> bool {
		self.distance(other) > 0
	}
}

impl From<u16> for SeqNum {
	fn from(value: u16) -> Self {
		Self(value)
	}
}

impl fmt::Debug for SeqNum {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "SeqNum({})", self.0)
	}
}

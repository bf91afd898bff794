//! Binary framing for the RS-BA1 protocol: the W6EL passcode codec, wrapping
//! sequence numbers, and the fixed control-frame / CI-V envelope shapes.
//! No I/O lives here.

pub mod frame;
pub mod passcode;
pub mod seq;

pub use frame::radio_sim;
pub use frame::Frame;
pub use passcode::passcode;
pub use seq::SeqNum;

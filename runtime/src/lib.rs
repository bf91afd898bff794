//! Ambient stack shared by `transport` and `cli`: a colored `log` backend and
//! a Ctrl-C/SIGTERM-driven shutdown flag. No protocol logic lives here.

pub mod logger;
mod rt;
pub mod time;

pub use rt::Shutdown;

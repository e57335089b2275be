//! Room session
//!
//! Wires clock sync, the room state machine, the playback engine and the
//! sync loop to a message channel. This is the surface a UI/room layer uses.

mod handlers;
mod session;
mod types;

pub use session::*;
pub use types::*;

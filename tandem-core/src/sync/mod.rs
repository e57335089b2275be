//! Room Sync State
//!
//! Wire messages exchanged with the room server and the playback state
//! machine they drive.

mod protocol;
mod state;

pub use protocol::*;
pub use state::*;

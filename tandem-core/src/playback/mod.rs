//! Playback Engine
//!
//! Drives an audio output so that playback lines up with an absolute
//! position on the room timeline.

mod engine;
mod output;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::*;
pub use output::*;

//! Audio output abstraction
//!
//! The decoding/rendering layer lives outside this crate. It is driven
//! through [`AudioOutput`], modelled on a node-based audio graph: a loaded
//! buffer is started at a time on the device clock and stopped by
//! disconnecting the node.

use thiserror::Error;

use crate::sync::Track;

/// Errors reported by an audio output backend
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to fetch resource: {0}")]
    Fetch(String),

    #[error("Failed to decode resource: {0}")]
    Decode(String),

    #[error("Audio device error: {0}")]
    Device(String),
}

/// Asynchronous notifications from the audio layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    /// Output ran out of data and stopped advancing
    Stalled,
    /// Output is advancing again after a stall
    Resumed,
}

/// A single-resource audio output
pub trait AudioOutput: Send {
    /// Fetch and decode a track. Returns the duration in seconds if known.
    fn load(&mut self, track: &Track) -> Result<Option<f64>, OutputError>;

    /// Release the decoded resource and any graph nodes
    fn unload(&mut self);

    /// Current time on the output's own high-resolution clock, in seconds
    fn clock_seconds(&self) -> f64;

    /// Start playback at output time `when`, beginning `offset` seconds into the track
    fn start_at(&mut self, when: f64, offset: f64);

    /// Stop playback and disconnect the playing node
    fn stop(&mut self);

    fn set_rate(&mut self, rate: f64);

    /// Linear gain, 0.0-1.0
    fn set_gain(&mut self, gain: f32);
}

//! Tandem - Core Library
//!
//! Keeps every listener in a room playing the same track at the same
//! position. The room server owns the timeline; this crate estimates the
//! server clock, follows the server's playback state and steers a local
//! audio output onto it.

use std::sync::Once;

pub mod clock;
pub mod clock_sync;
pub mod config;
pub mod playback;
pub mod room;
pub mod scheduler;
pub mod sync;

// Re-exports for convenience
pub use clock::{LocalClock, ManualClock, SharedClock, SystemClock};
pub use clock_sync::{ClockSample, ClockSync, SharedClockSync};
pub use config::{ConfigError, SyncConfig};
pub use playback::{AudioOutput, OutputError, OutputEvent, PlaybackEngine};
pub use room::{CommandOutcome, CoreError, RoomChannel, Session, SessionCallback, SessionSnapshot};
pub use scheduler::{PlaybackScheduler, SyncAction};
pub use sync::{InboundMessage, OutboundMessage, PlaybackUpdate, RoomPlaybackState, Track};

static TRACING_INIT: Once = Once::new();

/// Install the stderr log subscriber. Honors `RUST_LOG`, defaulting to
/// debug output for this crate. Does nothing if a subscriber is already set.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tandem_core=debug"));

        let _ = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

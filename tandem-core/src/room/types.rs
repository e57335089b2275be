//! Session-facing types

use crate::config::ConfigError;
use crate::scheduler::SyncAction;
use crate::sync::{CommandRejected, PermissionContext, PlaybackAnchor, RoomPhase, Track};

/// Errors returned by the session surface
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Session is disconnected")]
    Disconnected,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Result of a local playback command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// An `UpdatePlaybackState` was sent to the server
    Emitted,
    /// Accepted locally, nothing to send (e.g. starting a drag-seek)
    Applied,
    /// Dropped before reaching the network
    Rejected(CommandRejected),
}

/// Sync status for debug display
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    /// What the last tick did
    pub action: SyncAction,
    /// Expected minus actual position (positive = behind the room)
    pub drift_secs: Option<f64>,
    /// Current playback rate
    pub rate: f64,
    /// Estimated server minus local clock
    pub clock_offset_ms: f64,
    /// Average round trip to the server
    pub rtt_ms: Option<f64>,
    /// Whether the clock offset is older than the stale threshold
    pub clock_stale: bool,
}

/// Point-in-time view of the session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: RoomPhase,
    /// Last server-confirmed anchor
    pub confirmed: Option<PlaybackAnchor>,
    /// Confirmed anchor with unconfirmed local intent overlaid
    pub displayed: Option<PlaybackAnchor>,
    pub permissions: PermissionContext,
    pub track: Option<Track>,
    pub position_secs: f64,
    pub rate: f64,
    pub seeking: bool,
    /// The timeline has run past the end of the current track
    pub track_finished: bool,
    pub clock_offset_ms: f64,
    pub last_synced_at_ms: Option<f64>,
    pub connected: bool,
}

/// Callback interface for session events
pub trait SessionCallback: Send + Sync {
    fn on_state_changed(&self, snapshot: SessionSnapshot);
    fn on_track_changed(&self, track: Option<Track>);
    fn on_load_failed(&self, track: Track, message: String);
    /// Called on every corrective sync tick
    fn on_sync_status(&self, status: SyncStatus);
    fn on_disconnected(&self);
}

//! Room Playback State
//!
//! The last playback state the server told us about, plus any local intent
//! that hasn't been confirmed yet. Inbound notifications always win.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::protocol::{PlaybackUpdate, Track};

const DEFAULT_VOLUME: u8 = 100;

/// Playback state as declared by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackAnchor {
    pub track_index: usize,
    pub is_playing: bool,
    /// Server time (seconds) at which track position 0 plays
    pub start_timestamp: Option<f64>,
    pub paused_at_seconds: Option<f64>,
    pub volume: u8,
}

impl Default for PlaybackAnchor {
    fn default() -> Self {
        Self {
            track_index: 0,
            is_playing: false,
            start_timestamp: None,
            paused_at_seconds: None,
            volume: DEFAULT_VOLUME,
        }
    }
}

impl PlaybackAnchor {
    /// Apply declared fields, leaving the rest alone
    pub fn apply(&mut self, update: &PlaybackUpdate) {
        if let Some(index) = update.track_index {
            self.track_index = index;
        }
        if let Some(playing) = update.is_playing {
            self.is_playing = playing;
        }
        if let Some(ts) = update.start_timestamp {
            self.start_timestamp = Some(ts);
        }
        if let Some(paused_at) = update.paused_at_seconds {
            self.paused_at_seconds = Some(paused_at);
        }
        if let Some(volume) = update.volume {
            self.volume = volume.min(100);
        }
    }

    /// Copy of this anchor with `update` applied
    pub fn overlaid(&self, update: &PlaybackUpdate) -> Self {
        let mut anchor = self.clone();
        anchor.apply(update);
        anchor
    }

    /// Position the timeline implies at server time `server_now_secs`
    pub fn position_at(&self, server_now_secs: f64) -> f64 {
        if self.is_playing {
            if let Some(start) = self.start_timestamp {
                return (server_now_secs - start).max(0.0);
            }
        }
        self.paused_at_seconds.unwrap_or(0.0).max(0.0)
    }
}

/// Who we are in the room. Provided by the room layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionContext {
    pub is_admin: bool,
    pub is_collaborative_mode_enabled: bool,
}

/// Coarse playback phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomPhase {
    /// No state yet, or the current track isn't loaded
    Idle,
    /// Track loaded, never started
    Loaded,
    Playing,
    Paused,
}

/// Why a local command was not emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandRejected {
    #[error("Only room admins can control playback")]
    NotAdmin,

    #[error("A seek is in progress")]
    SeekInProgress,

    #[error("No room state received yet")]
    NoRoomState,

    #[error("No track at index {0}")]
    NoSuchTrack(usize),
}

/// What the track should become after a notification
#[derive(Debug, Clone, PartialEq)]
pub enum TrackChange {
    Unchanged,
    Load(Track),
    /// The anchor points at an index the queue doesn't have
    Unload,
}

/// What the engine should do after a notification
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackChange {
    Unchanged,
    /// Start so that position 0 lines up with this server time
    Start { start_timestamp: f64 },
    Stop,
}

/// Side effects of applying a notification, in the order they must run
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub track: TrackChange,
    pub playback: PlaybackChange,
    pub volume: Option<u8>,
}

/// Room playback state machine
#[derive(Debug, Default)]
pub struct RoomPlaybackState {
    /// Last state received from the server
    confirmed: Option<PlaybackAnchor>,
    /// Local intent not yet confirmed by the server
    pending: Option<PlaybackUpdate>,
    permissions: PermissionContext,
    queue: Vec<Track>,
    track_loaded: bool,
    seeking: bool,
}

impl RoomPlaybackState {
    pub fn new(permissions: PermissionContext) -> Self {
        Self {
            permissions,
            ..Default::default()
        }
    }

    // === Inbound notifications ===

    /// Replace state wholesale from a full snapshot
    pub fn apply_snapshot(&mut self, update: &PlaybackUpdate, queue: Option<Vec<Track>>) -> Transition {
        let previous_track = self.current_track().cloned();
        if let Some(queue) = queue {
            self.queue = queue;
        }

        let anchor = PlaybackAnchor::default().overlaid(update);
        info!(
            "Room snapshot: track={}, playing={}, start={:?}",
            anchor.track_index, anchor.is_playing, anchor.start_timestamp
        );
        self.confirmed = Some(anchor.clone());
        self.pending = None;

        // Everything is re-declared on a snapshot, volume included
        let timeline = PlaybackUpdate {
            is_playing: Some(anchor.is_playing),
            volume: Some(anchor.volume),
            ..update.clone()
        };
        self.transition(previous_track, &timeline)
    }

    /// Apply a partial update
    pub fn apply_delta(&mut self, update: &PlaybackUpdate) -> Transition {
        let previous_track = self.current_track().cloned();

        let anchor = self.confirmed.get_or_insert_with(|| {
            warn!("State delta before any snapshot, applying to defaults");
            PlaybackAnchor::default()
        });
        anchor.apply(update);
        debug!("Room delta applied: {:?}", update);
        self.pending = None;

        self.transition(previous_track, update)
    }

    pub fn set_admin(&mut self, is_admin: bool) {
        if self.permissions.is_admin != is_admin {
            info!("Role changed: admin={}", is_admin);
        }
        self.permissions.is_admin = is_admin;
        if !is_admin {
            self.seeking = false;
            self.pending = None;
        }
    }

    pub fn set_collaborative_mode(&mut self, enabled: bool) {
        self.permissions.is_collaborative_mode_enabled = enabled;
    }

    /// Replace the room queue. Returns the track change if the current index now resolves differently.
    pub fn set_queue(&mut self, queue: Vec<Track>) -> TrackChange {
        let previous = self.current_track().cloned();
        self.queue = queue;
        self.track_change(previous)
    }

    /// Record whether the engine holds the current track
    pub fn set_track_loaded(&mut self, loaded: bool) {
        self.track_loaded = loaded;
    }

    // === Local commands (admin only) ===

    /// Resume from the paused position, `lead_secs` from now
    pub fn play(&mut self, server_now_secs: f64, lead_secs: f64) -> Result<PlaybackUpdate, CommandRejected> {
        let anchor = self.command_anchor()?;
        let position = anchor.paused_at_seconds.unwrap_or(0.0);
        let update = PlaybackUpdate {
            is_playing: Some(true),
            start_timestamp: Some(server_now_secs + lead_secs - position),
            ..Default::default()
        };
        Ok(self.record_intent(update))
    }

    /// Pause at the current timeline position
    pub fn pause(&mut self, server_now_secs: f64, duration: Option<f64>) -> Result<PlaybackUpdate, CommandRejected> {
        let anchor = self.command_anchor()?;
        let mut position = anchor.position_at(server_now_secs);
        if let Some(duration) = duration {
            position = position.min(duration);
        }
        let update = PlaybackUpdate {
            is_playing: Some(false),
            paused_at_seconds: Some(position),
            ..Default::default()
        };
        Ok(self.record_intent(update))
    }

    /// Move the timeline to `position`, keeping the play/pause state
    pub fn seek(&mut self, position: f64, server_now_secs: f64, lead_secs: f64) -> Result<PlaybackUpdate, CommandRejected> {
        let anchor = self.command_anchor()?;
        let position = position.max(0.0);
        let update = if anchor.is_playing {
            PlaybackUpdate {
                is_playing: Some(true),
                start_timestamp: Some(server_now_secs + lead_secs - position),
                ..Default::default()
            }
        } else {
            PlaybackUpdate {
                paused_at_seconds: Some(position),
                ..Default::default()
            }
        };
        Ok(self.record_intent(update))
    }

    /// Switch to a queue entry and play it from the top
    pub fn select_track(&mut self, index: usize, server_now_secs: f64, lead_secs: f64) -> Result<PlaybackUpdate, CommandRejected> {
        self.command_anchor()?;
        if index >= self.queue.len() {
            return Err(CommandRejected::NoSuchTrack(index));
        }
        let update = PlaybackUpdate {
            track_index: Some(index),
            is_playing: Some(true),
            start_timestamp: Some(server_now_secs + lead_secs),
            paused_at_seconds: Some(0.0),
            ..Default::default()
        };
        Ok(self.record_intent(update))
    }

    /// Advance to the next queue entry, or stop at the top of the last one
    pub fn next(&mut self, server_now_secs: f64, lead_secs: f64) -> Result<PlaybackUpdate, CommandRejected> {
        let current = self.command_anchor()?.track_index;
        if current + 1 < self.queue.len() {
            return self.select_track(current + 1, server_now_secs, lead_secs);
        }
        info!("End of queue reached, pausing");
        let update = PlaybackUpdate {
            is_playing: Some(false),
            paused_at_seconds: Some(0.0),
            ..Default::default()
        };
        Ok(self.record_intent(update))
    }

    pub fn set_volume(&mut self, volume: u8) -> Result<PlaybackUpdate, CommandRejected> {
        self.command_anchor()?;
        let update = PlaybackUpdate {
            volume: Some(volume.min(100)),
            ..Default::default()
        };
        Ok(self.record_intent(update))
    }

    /// Start a drag-seek. Suppresses correction and other commands until `end_seek`.
    pub fn begin_seek(&mut self) -> Result<(), CommandRejected> {
        if !self.permissions.is_admin {
            return Err(CommandRejected::NotAdmin);
        }
        self.seeking = true;
        Ok(())
    }

    /// Finish a drag-seek by seeking to `position`
    pub fn end_seek(&mut self, position: f64, server_now_secs: f64, lead_secs: f64) -> Result<PlaybackUpdate, CommandRejected> {
        if !self.permissions.is_admin {
            return Err(CommandRejected::NotAdmin);
        }
        self.seeking = false;
        self.seek(position, server_now_secs, lead_secs)
    }

    // === Queries ===

    /// Last server-confirmed state
    pub fn confirmed(&self) -> Option<&PlaybackAnchor> {
        self.confirmed.as_ref()
    }

    /// Confirmed state with local unconfirmed intent overlaid (for display)
    pub fn displayed(&self) -> Option<PlaybackAnchor> {
        let confirmed = self.confirmed.as_ref()?;
        Some(match &self.pending {
            Some(pending) => confirmed.overlaid(pending),
            None => confirmed.clone(),
        })
    }

    pub fn pending(&self) -> Option<&PlaybackUpdate> {
        self.pending.as_ref()
    }

    pub fn permissions(&self) -> PermissionContext {
        self.permissions
    }

    pub fn is_admin(&self) -> bool {
        self.permissions.is_admin
    }

    pub fn is_seeking(&self) -> bool {
        self.seeking
    }

    pub fn queue(&self) -> &[Track] {
        &self.queue
    }

    /// Track the confirmed anchor points at, if the queue has it
    pub fn current_track(&self) -> Option<&Track> {
        let index = self.confirmed.as_ref()?.track_index;
        self.queue.get(index)
    }

    pub fn phase(&self) -> RoomPhase {
        match &self.confirmed {
            Some(anchor) if self.track_loaded => {
                if anchor.is_playing {
                    RoomPhase::Playing
                } else if anchor.paused_at_seconds.is_some() {
                    RoomPhase::Paused
                } else {
                    RoomPhase::Loaded
                }
            }
            _ => RoomPhase::Idle,
        }
    }

    // === Internals ===

    /// Gate shared by all local commands
    fn command_anchor(&self) -> Result<&PlaybackAnchor, CommandRejected> {
        if !self.permissions.is_admin {
            return Err(CommandRejected::NotAdmin);
        }
        if self.seeking {
            return Err(CommandRejected::SeekInProgress);
        }
        self.confirmed.as_ref().ok_or(CommandRejected::NoRoomState)
    }

    fn record_intent(&mut self, update: PlaybackUpdate) -> PlaybackUpdate {
        match &mut self.pending {
            Some(pending) => pending.merge(&update),
            None => self.pending = Some(update.clone()),
        }
        update
    }

    fn track_change(&self, previous: Option<Track>) -> TrackChange {
        match (previous, self.current_track()) {
            (Some(prev), Some(current)) if prev == *current => TrackChange::Unchanged,
            (_, Some(current)) => TrackChange::Load(current.clone()),
            (Some(_), None) => TrackChange::Unload,
            (None, None) => TrackChange::Unchanged,
        }
    }

    fn transition(&self, previous_track: Option<Track>, update: &PlaybackUpdate) -> Transition {
        let track = self.track_change(previous_track);
        let track_swapped = !matches!(track, TrackChange::Unchanged);

        let playback = match &self.confirmed {
            Some(anchor) if track_swapped || update.touches_timeline() => {
                if !anchor.is_playing {
                    PlaybackChange::Stop
                } else if let Some(start_timestamp) = anchor.start_timestamp {
                    PlaybackChange::Start { start_timestamp }
                } else {
                    warn!("Anchor says playing but has no start timestamp");
                    PlaybackChange::Unchanged
                }
            }
            _ => PlaybackChange::Unchanged,
        };

        Transition {
            track,
            playback,
            volume: update.volume.map(|v| v.min(100)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> Vec<Track> {
        (0..3)
            .map(|i| Track {
                source_url: format!("https://cdn.example/{}.mp3", i),
                duration_seconds: Some(200.0),
                is_upload: i == 2,
            })
            .collect()
    }

    fn admin() -> PermissionContext {
        PermissionContext {
            is_admin: true,
            is_collaborative_mode_enabled: false,
        }
    }

    fn playing_room(permissions: PermissionContext) -> RoomPlaybackState {
        let mut state = RoomPlaybackState::new(permissions);
        state.apply_snapshot(
            &PlaybackUpdate {
                track_index: Some(1),
                is_playing: Some(true),
                start_timestamp: Some(1_000.0),
                volume: Some(80),
                ..Default::default()
            },
            Some(queue()),
        );
        state.set_track_loaded(true);
        state
    }

    #[test]
    fn test_snapshot_loads_track_then_starts() {
        let mut state = RoomPlaybackState::new(PermissionContext::default());
        let transition = state.apply_snapshot(
            &PlaybackUpdate {
                track_index: Some(0),
                is_playing: Some(true),
                start_timestamp: Some(500.0),
                ..Default::default()
            },
            Some(queue()),
        );

        assert_eq!(transition.track, TrackChange::Load(queue()[0].clone()));
        assert_eq!(
            transition.playback,
            PlaybackChange::Start { start_timestamp: 500.0 }
        );
        assert_eq!(state.phase(), RoomPhase::Idle);
        state.set_track_loaded(true);
        assert_eq!(state.phase(), RoomPhase::Playing);
    }

    #[test]
    fn test_volume_only_delta_leaves_timeline_alone() {
        let mut state = playing_room(PermissionContext::default());
        let transition = state.apply_delta(&PlaybackUpdate {
            volume: Some(40),
            ..Default::default()
        });

        let anchor = state.confirmed().unwrap();
        assert_eq!(anchor.track_index, 1);
        assert!(anchor.is_playing);
        assert_eq!(anchor.start_timestamp, Some(1_000.0));
        assert_eq!(anchor.volume, 40);
        assert_eq!(transition.track, TrackChange::Unchanged);
        assert_eq!(transition.playback, PlaybackChange::Unchanged);
        assert_eq!(transition.volume, Some(40));
    }

    #[test]
    fn test_snapshot_redeclares_volume() {
        let mut state = playing_room(PermissionContext::default());
        state.apply_delta(&PlaybackUpdate {
            volume: Some(40),
            ..Default::default()
        });

        // No volume field: back to the default, and the engine must follow
        let transition = state.apply_snapshot(
            &PlaybackUpdate {
                track_index: Some(1),
                is_playing: Some(true),
                start_timestamp: Some(1_000.0),
                ..Default::default()
            },
            None,
        );
        assert_eq!(state.confirmed().unwrap().volume, 100);
        assert_eq!(transition.volume, Some(100));
        assert_eq!(transition.track, TrackChange::Unchanged);
    }

    #[test]
    fn test_pause_delta_stops_and_keeps_start() {
        let mut state = playing_room(PermissionContext::default());
        let transition = state.apply_delta(&PlaybackUpdate {
            is_playing: Some(false),
            paused_at_seconds: Some(42.0),
            ..Default::default()
        });

        assert_eq!(transition.playback, PlaybackChange::Stop);
        assert_eq!(state.phase(), RoomPhase::Paused);
        assert_eq!(state.confirmed().unwrap().start_timestamp, Some(1_000.0));
    }

    #[test]
    fn test_track_index_change_swaps_before_start() {
        let mut state = playing_room(PermissionContext::default());
        let transition = state.apply_delta(&PlaybackUpdate {
            track_index: Some(2),
            start_timestamp: Some(2_000.0),
            ..Default::default()
        });

        assert_eq!(transition.track, TrackChange::Load(queue()[2].clone()));
        assert_eq!(
            transition.playback,
            PlaybackChange::Start { start_timestamp: 2_000.0 }
        );
    }

    #[test]
    fn test_index_outside_queue_unloads() {
        let mut state = playing_room(PermissionContext::default());
        let transition = state.apply_delta(&PlaybackUpdate {
            track_index: Some(9),
            ..Default::default()
        });
        assert_eq!(transition.track, TrackChange::Unload);
    }

    #[test]
    fn test_non_admin_commands_rejected_without_mutation() {
        let mut state = playing_room(PermissionContext::default());
        let before = state.confirmed().cloned();

        assert_eq!(state.play(1_010.0, 0.75), Err(CommandRejected::NotAdmin));
        assert_eq!(state.pause(1_010.0, None), Err(CommandRejected::NotAdmin));
        assert_eq!(state.seek(5.0, 1_010.0, 0.75), Err(CommandRejected::NotAdmin));
        assert_eq!(state.select_track(0, 1_010.0, 0.75), Err(CommandRejected::NotAdmin));
        assert_eq!(state.set_volume(10), Err(CommandRejected::NotAdmin));
        assert_eq!(state.begin_seek(), Err(CommandRejected::NotAdmin));

        assert_eq!(state.confirmed().cloned(), before);
        assert!(state.pending().is_none());
        assert_eq!(state.displayed(), before);
    }

    #[test]
    fn test_pause_computes_position_from_timeline() {
        let mut state = playing_room(admin());
        let update = state.pause(1_042.5, Some(200.0)).unwrap();

        assert_eq!(update.is_playing, Some(false));
        assert_eq!(update.paused_at_seconds, Some(42.5));
        // Optimistic only: confirmed still says playing
        assert!(state.confirmed().unwrap().is_playing);
        assert!(!state.displayed().unwrap().is_playing);
    }

    #[test]
    fn test_play_forward_dates_anchor_from_paused_position() {
        let mut state = playing_room(admin());
        state.apply_delta(&PlaybackUpdate {
            is_playing: Some(false),
            paused_at_seconds: Some(30.0),
            ..Default::default()
        });

        let update = state.play(5_000.0, 0.75).unwrap();
        assert_eq!(update.is_playing, Some(true));
        // Position 30 plays at now + lead
        assert_eq!(update.start_timestamp, Some(5_000.0 + 0.75 - 30.0));
    }

    #[test]
    fn test_seek_while_paused_only_moves_pause_point() {
        let mut state = playing_room(admin());
        state.apply_delta(&PlaybackUpdate {
            is_playing: Some(false),
            paused_at_seconds: Some(30.0),
            ..Default::default()
        });

        let update = state.seek(90.0, 5_000.0, 0.75).unwrap();
        assert_eq!(
            update,
            PlaybackUpdate {
                paused_at_seconds: Some(90.0),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_inbound_notification_overrides_pending_intent() {
        let mut state = playing_room(admin());
        state.set_volume(10).unwrap();
        assert_eq!(state.displayed().unwrap().volume, 10);

        state.apply_delta(&PlaybackUpdate {
            volume: Some(55),
            ..Default::default()
        });
        assert!(state.pending().is_none());
        assert_eq!(state.displayed().unwrap().volume, 55);
    }

    #[test]
    fn test_select_track_validates_queue() {
        let mut state = playing_room(admin());
        assert_eq!(
            state.select_track(7, 0.0, 0.75),
            Err(CommandRejected::NoSuchTrack(7))
        );

        let update = state.select_track(2, 100.0, 0.5).unwrap();
        assert_eq!(update.track_index, Some(2));
        assert_eq!(update.start_timestamp, Some(100.5));
    }

    #[test]
    fn test_next_at_end_of_queue_pauses() {
        let mut state = playing_room(admin());
        let update = state.next(100.0, 0.5).unwrap();
        assert_eq!(update.track_index, Some(2));

        state.apply_delta(&update);
        let update = state.next(300.0, 0.5).unwrap();
        assert_eq!(update.track_index, None);
        assert_eq!(update.is_playing, Some(false));
        assert_eq!(update.paused_at_seconds, Some(0.0));
    }

    #[test]
    fn test_seeking_suppresses_commands_until_end() {
        let mut state = playing_room(admin());
        state.begin_seek().unwrap();
        assert!(state.is_seeking());
        assert_eq!(state.play(0.0, 0.75), Err(CommandRejected::SeekInProgress));

        let update = state.end_seek(60.0, 2_000.0, 1.0).unwrap();
        assert!(!state.is_seeking());
        assert_eq!(update.start_timestamp, Some(2_000.0 + 1.0 - 60.0));
    }

    #[test]
    fn test_losing_admin_clears_seek_and_intent() {
        let mut state = playing_room(admin());
        state.set_volume(20).unwrap();
        state.begin_seek().unwrap();

        state.set_admin(false);
        assert!(!state.is_seeking());
        assert!(state.pending().is_none());
    }

    #[test]
    fn test_commands_need_room_state() {
        let mut state = RoomPlaybackState::new(admin());
        assert_eq!(state.play(0.0, 0.75), Err(CommandRejected::NoRoomState));
    }

    #[test]
    fn test_position_at() {
        let anchor = PlaybackAnchor {
            is_playing: true,
            start_timestamp: Some(100.0),
            ..Default::default()
        };
        assert_eq!(anchor.position_at(130.0), 30.0);
        assert_eq!(anchor.position_at(90.0), 0.0);

        let paused = PlaybackAnchor {
            is_playing: false,
            paused_at_seconds: Some(12.0),
            ..anchor
        };
        assert_eq!(paused.position_at(130.0), 12.0);
    }
}

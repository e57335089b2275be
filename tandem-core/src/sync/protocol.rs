//! Sync Protocol Messages

use serde::{Deserialize, Serialize};

/// A playable track in the room queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Where the audio resource is fetched from
    pub source_url: String,
    /// Duration in seconds, if the server already knows it
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    /// Whether this track was uploaded by a room member
    #[serde(default)]
    pub is_upload: bool,
}

/// Partial playback state. Only declared (`Some`) fields take effect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    /// Server time (seconds) at which track position 0 plays
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<f64>,
    /// Position the track was paused at (seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at_seconds: Option<f64>,
    /// Room volume, 0-100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
}

impl PlaybackUpdate {
    /// True if no field is declared
    pub fn is_empty(&self) -> bool {
        self.track_index.is_none()
            && self.is_playing.is_none()
            && self.start_timestamp.is_none()
            && self.paused_at_seconds.is_none()
            && self.volume.is_none()
    }

    /// Overlay `other` on top of this update (later fields win)
    pub fn merge(&mut self, other: &PlaybackUpdate) {
        if other.track_index.is_some() {
            self.track_index = other.track_index;
        }
        if other.is_playing.is_some() {
            self.is_playing = other.is_playing;
        }
        if other.start_timestamp.is_some() {
            self.start_timestamp = other.start_timestamp;
        }
        if other.paused_at_seconds.is_some() {
            self.paused_at_seconds = other.paused_at_seconds;
        }
        if other.volume.is_some() {
            self.volume = other.volume;
        }
    }

    /// Whether this update touches the timeline (as opposed to volume only)
    pub fn touches_timeline(&self) -> bool {
        self.track_index.is_some()
            || self.is_playing.is_some()
            || self.start_timestamp.is_some()
            || self.paused_at_seconds.is_some()
    }
}

/// Messages received from the room server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InboundMessage {
    /// Reply to a `RequestServerTime` probe
    ServerTime { sent_at_ms: f64, server_time_ms: f64 },

    /// Full room playback state (sent on join and reconnect)
    FullStateSnapshot {
        state: PlaybackUpdate,
        #[serde(default)]
        queue: Option<Vec<Track>>,
    },

    /// Incremental playback change
    StateDelta(PlaybackUpdate),

    /// Our role in the room changed
    RoleChanged { is_admin: bool },

    /// Collaborative mode was toggled for the room
    CollaborativeModeChanged { enabled: bool },
}

/// Messages sent to the room server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutboundMessage {
    /// Clock probe; the server echoes `sent_at_ms` with its own time
    RequestServerTime { sent_at_ms: f64 },

    /// Ask the server to broadcast a new playback state (admin only)
    UpdatePlaybackState(PlaybackUpdate),
}

impl OutboundMessage {
    /// Check if this message requires admin privileges
    pub fn requires_admin(&self) -> bool {
        matches!(self, OutboundMessage::UpdatePlaybackState(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_update_omits_undeclared_fields() {
        let update = PlaybackUpdate {
            volume: Some(40),
            ..Default::default()
        };
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"volume":40}"#);
    }

    #[test]
    fn test_inbound_delta_parses_sparse_payload() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"StateDelta":{"is_playing":false,"paused_at_seconds":12.5}}"#)
                .unwrap();
        assert_eq!(
            msg,
            InboundMessage::StateDelta(PlaybackUpdate {
                is_playing: Some(false),
                paused_at_seconds: Some(12.5),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_snapshot_without_queue() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"FullStateSnapshot":{"state":{"track_index":2}}}"#).unwrap();
        match msg {
            InboundMessage::FullStateSnapshot { state, queue } => {
                assert_eq!(state.track_index, Some(2));
                assert!(queue.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_merge_later_fields_win() {
        let mut base = PlaybackUpdate {
            is_playing: Some(true),
            start_timestamp: Some(10.0),
            ..Default::default()
        };
        base.merge(&PlaybackUpdate {
            is_playing: Some(false),
            paused_at_seconds: Some(3.0),
            ..Default::default()
        });

        assert_eq!(base.is_playing, Some(false));
        assert_eq!(base.start_timestamp, Some(10.0));
        assert_eq!(base.paused_at_seconds, Some(3.0));
        assert!(base.touches_timeline());
        assert!(!PlaybackUpdate::default().touches_timeline());
        assert!(PlaybackUpdate::default().is_empty());
    }

    #[test]
    fn test_only_state_updates_require_admin() {
        assert!(OutboundMessage::UpdatePlaybackState(PlaybackUpdate::default()).requires_admin());
        assert!(!OutboundMessage::RequestServerTime { sent_at_ms: 1.0 }.requires_admin());
    }
}

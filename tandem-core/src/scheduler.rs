//! Playback sync loop
//!
//! Each tick compares where the engine is with where the server timeline
//! says it should be, and corrects the difference. Small drift is absorbed
//! by nudging the playback rate; large drift is snapped away with a seek.

use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::playback::{PlaybackEngine, StartOutcome};
use crate::sync::PlaybackAnchor;

/// Why a tick did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoAnchor,
    NotPlaying,
    Seeking,
    NotLoaded,
    Stalled,
}

/// Outcome of a single tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncAction {
    Skipped(SkipReason),
    /// A scheduled start hasn't been reached yet
    AwaitingStart,
    /// The engine was idle and the segment hasn't begun; a future start was scheduled
    Scheduled(StartOutcome),
    /// The engine was idle mid-segment and was started at `position`
    JumpStarted { position: f64 },
    /// The timeline is past the end of the track. `advance` is set once per
    /// anchor, and only for admins.
    TrackFinished { advance: bool },
    HardResync { drift: f64, position: f64 },
    RateAdjusted { drift: f64, rate: f64 },
    InSync { drift: f64 },
}

/// Inputs read fresh on every tick
#[derive(Debug, Clone, Copy)]
pub struct TickInput<'a> {
    pub anchor: Option<&'a PlaybackAnchor>,
    /// Server-corrected now (ms)
    pub server_now_ms: f64,
    pub is_admin: bool,
    pub seeking: bool,
}

/// Identifies one play segment so track-end handling fires once per segment
#[derive(Debug, Clone, Copy, PartialEq)]
struct SegmentKey {
    track_index: usize,
    start_timestamp: f64,
}

/// Drift correction control loop
#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    hard_resync_secs: f64,
    nudge_secs: f64,
    catch_up_rate: f64,
    slow_down_rate: f64,
    /// Segment we already requested an advance for
    advanced_for: Option<SegmentKey>,
    last_drift: Option<f64>,
}

impl PlaybackScheduler {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            hard_resync_secs: config.hard_resync_secs,
            nudge_secs: config.nudge_secs,
            catch_up_rate: config.catch_up_rate,
            slow_down_rate: config.slow_down_rate,
            advanced_for: None,
            last_drift: None,
        }
    }

    /// Run one correction step against the engine
    pub fn tick(&mut self, input: TickInput<'_>, engine: &mut PlaybackEngine) -> SyncAction {
        let anchor = match input.anchor {
            Some(anchor) => anchor,
            None => return SyncAction::Skipped(SkipReason::NoAnchor),
        };
        if !anchor.is_playing {
            return SyncAction::Skipped(SkipReason::NotPlaying);
        }
        let start_timestamp = match anchor.start_timestamp {
            Some(ts) => ts,
            None => return SyncAction::Skipped(SkipReason::NoAnchor),
        };
        if input.seeking {
            return SyncAction::Skipped(SkipReason::Seeking);
        }
        if !engine.is_loaded() {
            return SyncAction::Skipped(SkipReason::NotLoaded);
        }
        if engine.is_stalled() {
            return SyncAction::Skipped(SkipReason::Stalled);
        }

        let expected = input.server_now_ms / 1000.0 - start_timestamp;
        let duration = engine.duration().filter(|d| *d > 0.0);

        if let Some(duration) = duration {
            if expected >= duration {
                return self.track_finished(anchor, start_timestamp, input.is_admin);
            }
        }

        if engine.is_stopped() {
            if expected > 0.0 {
                engine.seek(expected);
                info!("Sync: engine idle mid-segment, jump-starting at {:.3}s", expected);
                return SyncAction::JumpStarted { position: expected };
            }
            let outcome = engine.play_at(start_timestamp, input.server_now_ms);
            debug!("Sync: engine idle before segment start, {:?}", outcome);
            return SyncAction::Scheduled(outcome);
        }

        if engine.is_start_pending() {
            return SyncAction::AwaitingStart;
        }

        let actual = engine.position();
        let drift = expected - actual;
        self.last_drift = Some(drift);

        if drift.abs() > self.hard_resync_secs {
            info!(
                "Sync: drift {:+.3}s exceeds {:.1}s, hard resync (expected: {:.3}s, actual: {:.3}s)",
                drift, self.hard_resync_secs, expected, actual
            );
            engine.seek(expected);
            engine.set_rate(1.0);
            return SyncAction::HardResync {
                drift,
                position: expected,
            };
        }

        let target_rate = if drift > self.nudge_secs {
            self.catch_up_rate
        } else if drift < -self.nudge_secs {
            self.slow_down_rate
        } else {
            1.0
        };

        if engine.set_rate(target_rate) {
            debug!(
                "Sync: drift {:+.3}s (expected: {:.3}s, actual: {:.3}s), rate -> {:.2}x",
                drift, expected, actual, target_rate
            );
        }

        if (target_rate - 1.0).abs() < f64::EPSILON {
            SyncAction::InSync { drift }
        } else {
            SyncAction::RateAdjusted {
                drift,
                rate: target_rate,
            }
        }
    }

    /// Drift measured on the most recent corrective tick
    pub fn last_drift(&self) -> Option<f64> {
        self.last_drift
    }

    /// Forget per-segment bookkeeping (teardown)
    pub fn reset(&mut self) {
        self.advanced_for = None;
        self.last_drift = None;
    }

    fn track_finished(&mut self, anchor: &PlaybackAnchor, start_timestamp: f64, is_admin: bool) -> SyncAction {
        if !is_admin {
            return SyncAction::TrackFinished { advance: false };
        }
        let key = SegmentKey {
            track_index: anchor.track_index,
            start_timestamp,
        };
        if self.advanced_for == Some(key) {
            return SyncAction::TrackFinished { advance: false };
        }
        self.advanced_for = Some(key);
        info!("Sync: track {} finished, requesting advance", anchor.track_index);
        SyncAction::TrackFinished { advance: true }
    }
}

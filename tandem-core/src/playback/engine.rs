//! Anchored playback on a single audio output

use thiserror::Error;
use tracing::{debug, info, warn};

use super::output::{AudioOutput, OutputError, OutputEvent};
use crate::sync::Track;

/// Playback engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to load {url}: {source}")]
    Load {
        url: String,
        #[source]
        source: OutputError,
    },
}

/// What `play_at` ended up doing
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StartOutcome {
    /// Playback from the top was scheduled `delay` seconds ahead on the output clock
    Scheduled { delay: f64 },
    /// The anchor was already past; playback started immediately mid-track
    JumpStarted { position: f64 },
    /// The anchor lies beyond the end of the track; nothing was started
    PastEnd,
    /// No resource loaded
    NotLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum EngineState {
    Unloaded,
    /// Loaded but not playing; `position` is where we stopped
    Stopped { position: f64 },
    /// The output plays `anchor_position` at output time `anchor_clock`.
    /// A future `anchor_clock` means the start is still pending.
    Running { anchor_clock: f64, anchor_position: f64 },
}

/// Owns one audio output and tracks where in the track it is
pub struct PlaybackEngine {
    output: Box<dyn AudioOutput>,
    state: EngineState,
    track: Option<Track>,
    duration: Option<f64>,
    rate: f64,
    gain: f32,
    /// Position frozen at the moment the output stalled
    stalled_at: Option<f64>,
    /// How far in the past an anchor may lie and still get a scheduled start
    late_tolerance: f64,
}

impl PlaybackEngine {
    pub fn new(output: Box<dyn AudioOutput>, late_tolerance: f64) -> Self {
        Self {
            output,
            state: EngineState::Unloaded,
            track: None,
            duration: None,
            rate: 1.0,
            gain: 1.0,
            stalled_at: None,
            late_tolerance,
        }
    }

    /// Load a track, replacing whatever was loaded before.
    ///
    /// On failure the engine is left unloaded.
    pub fn load(&mut self, track: &Track) -> Result<(), EngineError> {
        self.unload();

        match self.output.load(track) {
            Ok(reported) => {
                self.duration = reported.or(track.duration_seconds).filter(|d| *d > 0.0);
                self.track = Some(track.clone());
                self.state = EngineState::Stopped { position: 0.0 };
                info!(
                    "Loaded {} (duration: {})",
                    track.source_url,
                    self.duration
                        .map(|d| format!("{:.1}s", d))
                        .unwrap_or_else(|| "unknown".to_string())
                );
                Ok(())
            }
            Err(source) => {
                warn!("Failed to load {}: {}", track.source_url, source);
                Err(EngineError::Load {
                    url: track.source_url.clone(),
                    source,
                })
            }
        }
    }

    /// Stop and release the loaded resource. No-op if nothing is loaded.
    pub fn unload(&mut self) {
        if matches!(self.state, EngineState::Unloaded) {
            return;
        }
        self.stop();
        self.output.unload();
        self.state = EngineState::Unloaded;
        self.track = None;
        self.duration = None;
        debug!("Engine unloaded");
    }

    /// Start playback so that track position 0 lines up with `anchor_server_secs`.
    ///
    /// `now_ms` is the server-corrected current time.
    pub fn play_at(&mut self, anchor_server_secs: f64, now_ms: f64) -> StartOutcome {
        if !self.is_loaded() {
            debug!("play_at ignored: nothing loaded");
            return StartOutcome::NotLoaded;
        }

        let local_delay = anchor_server_secs - now_ms / 1000.0;

        if local_delay < -self.late_tolerance {
            let elapsed = -local_delay;
            if self.duration.is_some_and(|d| elapsed >= d) {
                debug!("play_at: anchor {:.2}s past start is beyond track end", elapsed);
                self.stop();
                return StartOutcome::PastEnd;
            }
            self.start_from(elapsed, 0.0);
            debug!("play_at: anchor already passed, jump-starting at {:.3}s", elapsed);
            StartOutcome::JumpStarted { position: elapsed }
        } else {
            let delay = local_delay.max(0.0);
            self.start_from(0.0, delay);
            debug!("play_at: scheduled start in {:.3}s", delay);
            StartOutcome::Scheduled { delay }
        }
    }

    /// Restart playback at `position` immediately. Also used for hard resyncs.
    pub fn seek(&mut self, position: f64) {
        if !self.is_loaded() {
            return;
        }
        let position = self.clamp_position(position.max(0.0));
        self.start_from(position, 0.0);
    }

    /// Stop playback and disconnect the output node. No-op if not running.
    pub fn stop(&mut self) {
        if let EngineState::Running { .. } = self.state {
            let position = self.position();
            self.output.stop();
            self.state = EngineState::Stopped { position };
            debug!("Engine stopped at {:.3}s", position);
        }
        self.stalled_at = None;
        self.set_rate(1.0);
    }

    /// Set the playback rate. Returns true if the output was actually written.
    pub fn set_rate(&mut self, rate: f64) -> bool {
        if (self.rate - rate).abs() < f64::EPSILON {
            return false;
        }
        // Rebase so the position before the change stays continuous
        if let EngineState::Running { anchor_clock, .. } = self.state {
            let clock = self.output.clock_seconds();
            if clock >= anchor_clock && self.stalled_at.is_none() {
                self.state = EngineState::Running {
                    anchor_clock: clock,
                    anchor_position: self.position(),
                };
            }
        }
        self.rate = rate;
        self.output.set_rate(rate);
        debug!("Playback rate set to {:.2}x", rate);
        true
    }

    /// Set volume (0-100). Returns true if the output was actually written.
    pub fn set_volume(&mut self, volume: u8) -> bool {
        let gain = f32::from(volume.min(100)) / 100.0;
        if (self.gain - gain).abs() < f32::EPSILON {
            return false;
        }
        self.gain = gain;
        self.output.set_gain(gain);
        true
    }

    pub fn handle_output_event(&mut self, event: OutputEvent) {
        match event {
            OutputEvent::Stalled => {
                if self.is_running() && self.stalled_at.is_none() {
                    let position = self.position();
                    self.stalled_at = Some(position);
                    info!("Output stalled at {:.3}s", position);
                }
            }
            OutputEvent::Resumed => {
                if let Some(position) = self.stalled_at.take() {
                    if self.is_running() {
                        self.state = EngineState::Running {
                            anchor_clock: self.output.clock_seconds(),
                            anchor_position: position,
                        };
                    }
                    info!("Output resumed at {:.3}s", position);
                }
            }
        }
    }

    /// Current playback position in seconds
    pub fn position(&self) -> f64 {
        if let Some(position) = self.stalled_at {
            return position;
        }
        match self.state {
            EngineState::Unloaded => 0.0,
            EngineState::Stopped { position } => position,
            EngineState::Running {
                anchor_clock,
                anchor_position,
            } => {
                let elapsed = (self.output.clock_seconds() - anchor_clock).max(0.0);
                self.clamp_position(anchor_position + elapsed * self.rate)
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        !matches!(self.state, EngineState::Unloaded)
    }

    /// Loaded but not running
    pub fn is_stopped(&self) -> bool {
        matches!(self.state, EngineState::Stopped { .. })
    }

    /// Started or scheduled to start
    pub fn is_running(&self) -> bool {
        matches!(self.state, EngineState::Running { .. })
    }

    /// Scheduled but the output clock hasn't reached the start time yet
    pub fn is_start_pending(&self) -> bool {
        match self.state {
            EngineState::Running { anchor_clock, .. } => self.output.clock_seconds() < anchor_clock,
            _ => false,
        }
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled_at.is_some()
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    /// Stop whatever is playing and start `position` at `delay` seconds from now
    fn start_from(&mut self, position: f64, delay: f64) {
        if self.is_running() {
            self.output.stop();
        }
        self.stalled_at = None;
        let when = self.output.clock_seconds() + delay;
        self.output.start_at(when, position);
        self.state = EngineState::Running {
            anchor_clock: when,
            anchor_position: position,
        };
        // A fresh node plays at 1.0; drop any nudge from the old one
        self.set_rate(1.0);
    }

    fn clamp_position(&self, position: f64) -> f64 {
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }
}

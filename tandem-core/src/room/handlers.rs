//! Inbound message and timer handlers

use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::scheduler::{SyncAction, TickInput};
use crate::sync::{InboundMessage, OutboundMessage, PlaybackChange, Track, TrackChange, Transition};

use super::session::{SessionCore, SessionShared};
use super::types::SyncStatus;

/// Callback work collected under the lock and fired after it is released
pub(super) enum Notice {
    StateChanged,
    TrackChanged(Option<Track>),
    LoadFailed(Track, String),
    SyncStatus(SyncStatus),
}

/// Handle a message from the room server
pub(super) fn handle_inbound(shared: &SessionShared, message: InboundMessage) {
    let mut notices = Vec::new();

    match message {
        InboundMessage::ServerTime {
            sent_at_ms,
            server_time_ms,
        } => {
            if !shared.core.lock().connected {
                return;
            }
            let mut clock_sync = shared.clock_sync.write();
            if clock_sync.handle_reply(sent_at_ms, server_time_ms).is_none() {
                debug!("Dropped time reply for probe sent at {:.0}", sent_at_ms);
            }
            return;
        }

        InboundMessage::FullStateSnapshot { state, queue } => {
            let now_ms = shared.clock_sync.read().now_ms();
            let mut core = shared.core.lock();
            if !core.connected {
                return;
            }
            let transition = core.room.apply_snapshot(&state, queue);
            apply_transition(&mut core, &shared.config, transition, now_ms, &mut notices);
        }

        InboundMessage::StateDelta(update) => {
            let now_ms = shared.clock_sync.read().now_ms();
            let mut core = shared.core.lock();
            if !core.connected {
                return;
            }
            let transition = core.room.apply_delta(&update);
            apply_transition(&mut core, &shared.config, transition, now_ms, &mut notices);
        }

        InboundMessage::RoleChanged { is_admin } => {
            shared.core.lock().room.set_admin(is_admin);
        }

        InboundMessage::CollaborativeModeChanged { enabled } => {
            info!("Collaborative mode: {}", enabled);
            shared.core.lock().room.set_collaborative_mode(enabled);
        }
    }

    notices.push(Notice::StateChanged);
    dispatch(shared, notices);
}

/// Replace the room queue, loading the current track if it resolves differently now
pub(super) fn apply_queue(shared: &SessionShared, queue: Vec<Track>) {
    let now_ms = shared.clock_sync.read().now_ms();
    let mut notices = Vec::new();
    {
        let mut core = shared.core.lock();
        if !core.connected {
            return;
        }
        let track = core.room.set_queue(queue);
        if track == TrackChange::Unchanged {
            return;
        }
        let playback = match core.room.confirmed() {
            Some(anchor) if anchor.is_playing => anchor
                .start_timestamp
                .map(|start_timestamp| PlaybackChange::Start { start_timestamp })
                .unwrap_or(PlaybackChange::Unchanged),
            _ => PlaybackChange::Unchanged,
        };
        let transition = Transition {
            track,
            playback,
            volume: None,
        };
        apply_transition(&mut core, &shared.config, transition, now_ms, &mut notices);
    }
    notices.push(Notice::StateChanged);
    dispatch(shared, notices);
}

/// Run the side effects of a state machine transition against the engine.
///
/// Track swaps happen before any play/pause change.
pub(super) fn apply_transition(
    core: &mut SessionCore,
    config: &SyncConfig,
    transition: Transition,
    now_ms: f64,
    notices: &mut Vec<Notice>,
) {
    let mut swapped = false;
    match transition.track {
        TrackChange::Unchanged => {}
        TrackChange::Load(track) => {
            swapped = true;
            core.track_finished = false;
            match core.engine.load(&track) {
                Ok(()) => {
                    core.room.set_track_loaded(true);
                    notices.push(Notice::TrackChanged(Some(track)));
                }
                Err(e) => {
                    core.room.set_track_loaded(false);
                    notices.push(Notice::LoadFailed(track, e.to_string()));
                }
            }
        }
        TrackChange::Unload => {
            swapped = true;
            core.track_finished = false;
            core.engine.unload();
            core.room.set_track_loaded(false);
            notices.push(Notice::TrackChanged(None));
        }
    }

    match transition.playback {
        PlaybackChange::Unchanged => {}
        PlaybackChange::Stop => {
            core.engine.stop();
        }
        PlaybackChange::Start { start_timestamp } => {
            core.track_finished = false;
            let expected = now_ms / 1000.0 - start_timestamp;
            let aligned = !swapped
                && core.engine.is_running()
                && (expected - core.engine.position()).abs() <= config.nudge_secs;
            if aligned {
                debug!("Already aligned with anchor {:.3}, not restarting", start_timestamp);
            } else {
                let outcome = core.engine.play_at(start_timestamp, now_ms);
                debug!("Anchor {:.3} applied: {:?}", start_timestamp, outcome);
            }
        }
    }

    if let Some(volume) = transition.volume {
        core.engine.set_volume(volume);
    }
}

/// One pass of the sync loop
pub(super) fn run_sync_tick(shared: &SessionShared) {
    let (now_ms, offset_ms, rtt_ms, clock_stale) = {
        let clock_sync = shared.clock_sync.read();
        (
            clock_sync.now_ms(),
            clock_sync.offset_ms(),
            clock_sync.average_rtt_ms(),
            clock_sync.is_stale(),
        )
    };

    let mut notices = Vec::new();
    let advance = {
        let mut guard = shared.core.lock();
        if !guard.connected {
            return;
        }
        let core = &mut *guard;

        let input = TickInput {
            anchor: core.room.confirmed(),
            server_now_ms: now_ms,
            is_admin: core.room.is_admin(),
            seeking: core.room.is_seeking(),
        };
        let action = core.scheduler.tick(input, &mut core.engine);

        if matches!(action, SyncAction::Skipped(_)) {
            None
        } else {
            if let SyncAction::TrackFinished { .. } = action {
                if !core.track_finished {
                    core.track_finished = true;
                    notices.push(Notice::StateChanged);
                }
            }

            notices.push(Notice::SyncStatus(SyncStatus {
                action,
                drift_secs: core.scheduler.last_drift(),
                rate: core.engine.rate(),
                clock_offset_ms: offset_ms,
                rtt_ms,
                clock_stale,
            }));

            match action {
                SyncAction::TrackFinished { advance: true } => {
                    match core.room.next(now_ms / 1000.0, shared.config.command_lead_secs) {
                        Ok(update) => Some(update),
                        Err(reason) => {
                            debug!("Track advance not issued: {}", reason);
                            None
                        }
                    }
                }
                _ => None,
            }
        }
    };

    if let Some(update) = advance {
        info!("Track finished, advancing: {:?}", update);
        if shared.send(OutboundMessage::UpdatePlaybackState(update)).is_err() {
            warn!("Outbound channel closed, track advance dropped");
        }
    }

    dispatch(shared, notices);
}

/// Send a clock probe
pub(super) fn send_probe(shared: &SessionShared) {
    let sent_at_ms = shared.clock_sync.write().create_probe();
    if shared
        .send(OutboundMessage::RequestServerTime { sent_at_ms })
        .is_err()
    {
        debug!("Outbound channel closed, clock probe dropped");
    }
}

/// Fire collected callbacks
pub(super) fn dispatch(shared: &SessionShared, notices: Vec<Notice>) {
    if notices.is_empty() {
        return;
    }
    let Some(cb) = shared.callback() else {
        return;
    };

    for notice in notices {
        match notice {
            Notice::StateChanged => cb.on_state_changed(shared.snapshot()),
            Notice::TrackChanged(track) => cb.on_track_changed(track),
            Notice::LoadFailed(track, message) => cb.on_load_failed(track, message),
            Notice::SyncStatus(status) => cb.on_sync_status(status),
        }
    }
}

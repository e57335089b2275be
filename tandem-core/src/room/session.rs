//! Session implementation

use std::sync::Arc;

use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::clock_sync::{self, SharedClockSync};
use crate::config::SyncConfig;
use crate::playback::{AudioOutput, OutputEvent, PlaybackEngine};
use crate::scheduler::PlaybackScheduler;
use crate::sync::{
    CommandRejected, InboundMessage, OutboundMessage, PermissionContext, PlaybackUpdate,
    RoomPlaybackState, Track,
};

use super::handlers::{self, Notice};
use super::types::*;

/// The two halves of the room server channel
pub struct RoomChannel<S> {
    /// Messages to the server
    pub outbound: mpsc::UnboundedSender<OutboundMessage>,
    /// Messages from the server, in send order
    pub inbound: S,
}

/// State mutated by the event handler, the sync loop and commands
pub(super) struct SessionCore {
    pub room: RoomPlaybackState,
    pub engine: PlaybackEngine,
    pub scheduler: PlaybackScheduler,
    pub track_finished: bool,
    pub connected: bool,
}

/// Everything the background loops share with the session
pub(super) struct SessionShared {
    pub config: SyncConfig,
    pub clock_sync: SharedClockSync,
    pub core: Mutex<SessionCore>,
    pub outbound: mpsc::UnboundedSender<OutboundMessage>,
    pub callback: RwLock<Option<Arc<dyn SessionCallback>>>,
    loops: Mutex<LoopHandles>,
}

impl SessionShared {
    pub fn callback(&self) -> Option<Arc<dyn SessionCallback>> {
        self.callback.read().clone()
    }

    pub fn send(&self, message: OutboundMessage) -> Result<(), CoreError> {
        self.outbound
            .send(message)
            .map_err(|_| CoreError::Disconnected)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (clock_offset_ms, last_synced_at_ms) = {
            let clock_sync = self.clock_sync.read();
            (clock_sync.offset_ms(), clock_sync.last_synced_at_ms())
        };
        let core = self.core.lock();
        SessionSnapshot {
            phase: core.room.phase(),
            confirmed: core.room.confirmed().cloned(),
            displayed: core.room.displayed(),
            permissions: core.room.permissions(),
            track: core.engine.track().cloned(),
            position_secs: core.engine.position(),
            rate: core.engine.rate(),
            seeking: core.room.is_seeking(),
            track_finished: core.track_finished,
            clock_offset_ms,
            last_synced_at_ms,
            connected: core.connected,
        }
    }

    /// Stop all loops, stop the engine and release the audio resource.
    /// Fires `on_disconnected` only the first time.
    pub fn shutdown(&self) {
        {
            let mut loops = self.loops.lock();
            for cancel in [loops.events.take(), loops.probe.take(), loops.sync.take()]
                .into_iter()
                .flatten()
            {
                let _ = cancel.send(());
            }
        }

        let was_connected = {
            let mut core = self.core.lock();
            let was_connected = core.connected;
            core.connected = false;
            core.engine.unload();
            core.scheduler.reset();
            core.room.set_track_loaded(false);
            core.track_finished = false;
            was_connected
        };

        self.clock_sync.write().clear();

        if was_connected {
            info!("Session disconnected");
            if let Some(cb) = self.callback() {
                cb.on_disconnected();
            }
        }
    }
}

/// Cancel handles for the background loops
#[derive(Default)]
struct LoopHandles {
    events: Option<oneshot::Sender<()>>,
    probe: Option<oneshot::Sender<()>>,
    sync: Option<oneshot::Sender<()>>,
}

/// A listening session in one room
///
/// Owns the clock probe loop, the sync loop and the inbound event loop.
/// All three stop on [`Session::disconnect`] or when the session is dropped.
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// Start a session on the current tokio runtime
    pub fn start<S>(
        config: SyncConfig,
        output: Box<dyn AudioOutput>,
        clock: SharedClock,
        permissions: PermissionContext,
        channel: RoomChannel<S>,
    ) -> Result<Self, CoreError>
    where
        S: Stream<Item = InboundMessage> + Send + 'static,
    {
        crate::init_tracing();
        config.validate()?;

        info!("Starting room session (admin={})", permissions.is_admin);

        let core = SessionCore {
            room: RoomPlaybackState::new(permissions),
            engine: PlaybackEngine::new(output, config.late_tolerance_secs),
            scheduler: PlaybackScheduler::new(&config),
            track_finished: false,
            connected: true,
        };

        let shared = Arc::new(SessionShared {
            clock_sync: clock_sync::new_shared_clock_sync(&config, clock),
            config,
            core: Mutex::new(core),
            outbound: channel.outbound,
            callback: RwLock::new(None),
            loops: Mutex::new(LoopHandles::default()),
        });

        let session = Self { shared };
        session.start_event_loop(channel.inbound);
        session.start_probe_loop();
        session.start_sync_loop();
        Ok(session)
    }

    /// Set the event callback
    pub fn set_callback(&self, callback: Box<dyn SessionCallback>) {
        *self.shared.callback.write() = Some(Arc::from(callback));
    }

    /// Replace the room queue (track list the anchor's index refers to)
    pub fn set_queue(&self, queue: Vec<Track>) -> Result<(), CoreError> {
        self.ensure_connected()?;
        handlers::apply_queue(&self.shared, queue);
        Ok(())
    }

    /// Resume playback for the room (admin only)
    pub fn play(&self) -> Result<CommandOutcome, CoreError> {
        let lead = self.shared.config.command_lead_secs;
        self.run_command("play", |core, now_secs| core.room.play(now_secs, lead))
    }

    /// Pause playback for the room (admin only)
    pub fn pause(&self) -> Result<CommandOutcome, CoreError> {
        self.run_command("pause", |core, now_secs| {
            let duration = core.engine.duration();
            core.room.pause(now_secs, duration)
        })
    }

    /// Seek the room to `position` seconds (admin only)
    pub fn seek(&self, position: f64) -> Result<CommandOutcome, CoreError> {
        let lead = self.shared.config.command_lead_secs;
        self.run_command("seek", |core, now_secs| core.room.seek(position, now_secs, lead))
    }

    /// Play the queue entry at `index` from the top (admin only)
    pub fn select_track(&self, index: usize) -> Result<CommandOutcome, CoreError> {
        let lead = self.shared.config.command_lead_secs;
        self.run_command("select_track", |core, now_secs| {
            core.room.select_track(index, now_secs, lead)
        })
    }

    /// Skip to the next queue entry (admin only)
    pub fn next(&self) -> Result<CommandOutcome, CoreError> {
        let lead = self.shared.config.command_lead_secs;
        self.run_command("next", |core, now_secs| core.room.next(now_secs, lead))
    }

    /// Set the room volume, 0-100 (admin only)
    pub fn set_volume(&self, volume: u8) -> Result<CommandOutcome, CoreError> {
        self.run_command("set_volume", |core, _| core.room.set_volume(volume))
    }

    /// Start a drag-seek; sync correction pauses until `end_seek`
    pub fn begin_seek(&self) -> Result<CommandOutcome, CoreError> {
        let result = {
            let mut core = self.shared.core.lock();
            if !core.connected {
                return Err(CoreError::Disconnected);
            }
            core.room.begin_seek()
        };
        Ok(match result {
            Ok(()) => {
                debug!("Drag-seek started");
                CommandOutcome::Applied
            }
            Err(reason) => CommandOutcome::Rejected(reason),
        })
    }

    /// Finish a drag-seek at `position` seconds
    pub fn end_seek(&self, position: f64) -> Result<CommandOutcome, CoreError> {
        let lead = self.shared.config.command_lead_secs;
        self.run_command("end_seek", |core, now_secs| {
            core.room.end_seek(position, now_secs, lead)
        })
    }

    /// Forward a stall/resume notification from the audio layer
    pub fn handle_output_event(&self, event: OutputEvent) {
        let mut core = self.shared.core.lock();
        if core.connected {
            core.engine.handle_output_event(event);
        }
    }

    /// Current state for display
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.core.lock().connected
    }

    /// Tear the session down: stop all loops, stop the engine and release the
    /// audio resource. Safe to call more than once.
    ///
    /// Also happens on its own when the inbound channel closes.
    pub fn disconnect(&self) {
        self.shared.shutdown();
    }
}

impl Session {
    fn ensure_connected(&self) -> Result<(), CoreError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(CoreError::Disconnected)
        }
    }

    /// Run a permission-gated command and emit its update if accepted
    fn run_command<F>(&self, name: &str, command: F) -> Result<CommandOutcome, CoreError>
    where
        F: FnOnce(&mut SessionCore, f64) -> Result<PlaybackUpdate, CommandRejected>,
    {
        let now_secs = self.shared.clock_sync.read().now_seconds();
        let result = {
            let mut core = self.shared.core.lock();
            if !core.connected {
                return Err(CoreError::Disconnected);
            }
            command(&mut core, now_secs)
        };

        match result {
            Ok(update) => {
                info!("Command {}: emitting {:?}", name, update);
                self.shared
                    .send(OutboundMessage::UpdatePlaybackState(update))?;
                handlers::dispatch(&self.shared, vec![Notice::StateChanged]);
                Ok(CommandOutcome::Emitted)
            }
            Err(reason) => {
                debug!("Command {} rejected: {}", name, reason);
                Ok(CommandOutcome::Rejected(reason))
            }
        }
    }

    /// Drain inbound messages until cancelled or the channel closes
    fn start_event_loop<S>(&self, inbound: S)
    where
        S: Stream<Item = InboundMessage> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.shared.loops.lock().events = Some(cancel_tx);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut inbound = Box::pin(inbound);
            debug!("Event loop started");

            loop {
                tokio::select! {
                    _ = &mut cancel_rx => {
                        debug!("Event loop cancelled");
                        break;
                    }
                    message = inbound.next() => match message {
                        Some(message) => handlers::handle_inbound(&shared, message),
                        None => {
                            warn!("Room channel closed, disconnecting");
                            shared.shutdown();
                            break;
                        }
                    },
                }
            }

            debug!("Event loop ended");
        });
    }

    /// Probe the server clock on a fixed interval
    fn start_probe_loop(&self) {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.shared.loops.lock().probe = Some(cancel_tx);

        let shared = Arc::clone(&self.shared);
        let period = shared.config.probe_interval();
        tokio::spawn(async move {
            debug!("Clock probe loop started ({}ms)", period.as_millis());
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    _ = interval.tick() => handlers::send_probe(&shared),
                }
            }

            debug!("Clock probe loop ended");
        });
    }

    /// Correct playback drift on a fixed interval
    fn start_sync_loop(&self) {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.shared.loops.lock().sync = Some(cancel_tx);

        let shared = Arc::clone(&self.shared);
        let period = shared.config.tick_interval();
        tokio::spawn(async move {
            debug!("Sync loop started ({}ms)", period.as_millis());
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    _ = interval.tick() => handlers::run_sync_tick(&shared),
                }
            }

            debug!("Sync loop ended");
        });
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

//! Clock synchronization against the room server
//!
//! Estimates `offset = server_clock - local_clock` from round-trip probes.
//! Only one probe is meaningful at a time: a reply is accepted only if it
//! echoes the most recent probe's send time. Anything else is dropped.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::clock::SharedClock;
use crate::config::{SyncConfig, MAX_RTT_WINDOW};

/// A single completed probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    /// Local time when the probe was sent (ms)
    pub send_local_ms: f64,
    /// Server time reported in the reply (ms)
    pub server_ms: f64,
    /// Local time when the reply arrived (ms)
    pub recv_local_ms: f64,
}

impl ClockSample {
    pub fn rtt_ms(&self) -> f64 {
        self.recv_local_ms - self.send_local_ms
    }

    /// Offset implied by this sample, assuming symmetric latency
    pub fn offset_ms(&self) -> f64 {
        let one_way = self.rtt_ms() / 2.0;
        self.server_ms + one_way - self.recv_local_ms
    }
}

/// Smoothed estimate of the server clock
pub struct ClockSync {
    clock: SharedClock,
    /// EMA weight kept from the previous offset
    retain: f64,
    rtt_window: usize,
    stale_after_ms: f64,
    offset_ms: f64,
    /// Local time of the last accepted sample
    last_synced_at_ms: Option<f64>,
    /// Send time of the probe currently in flight
    pending_probe_ms: Option<f64>,
    /// Recent RTT samples in milliseconds
    rtt_samples: Vec<f64>,
    sample_count: u64,
}

impl ClockSync {
    pub fn new(config: &SyncConfig, clock: SharedClock) -> Self {
        let rtt_window = config.rtt_window.clamp(1, MAX_RTT_WINDOW);
        Self {
            clock,
            retain: config.offset_retain,
            rtt_window,
            stale_after_ms: config.stale_after_ms as f64,
            offset_ms: 0.0,
            last_synced_at_ms: None,
            pending_probe_ms: None,
            rtt_samples: Vec::with_capacity(rtt_window),
            sample_count: 0,
        }
    }

    /// Start a probe. Returns the local send time to put in the request.
    ///
    /// Any earlier probe still in flight is forgotten.
    pub fn create_probe(&mut self) -> f64 {
        let sent_at_ms = self.clock.now_ms();
        if self.pending_probe_ms.is_some() {
            trace!("Clock probe superseded before reply arrived");
        }
        self.pending_probe_ms = Some(sent_at_ms);
        sent_at_ms
    }

    /// Handle a probe reply. Returns the sample if it matched the pending probe.
    pub fn handle_reply(&mut self, sent_at_ms: f64, server_time_ms: f64) -> Option<ClockSample> {
        let pending = self.pending_probe_ms?;
        if (pending - sent_at_ms).abs() > 1e-6 {
            debug!(
                "Ignoring unmatched time reply (sent_at={:.3}, pending={:.3})",
                sent_at_ms, pending
            );
            return None;
        }
        self.pending_probe_ms = None;

        let sample = ClockSample {
            send_local_ms: pending,
            server_ms: server_time_ms,
            recv_local_ms: self.clock.now_ms(),
        };

        // Local clock stepped backwards between send and receive
        if sample.rtt_ms() < 0.0 {
            debug!("Ignoring time reply with negative RTT {:.1}ms", sample.rtt_ms());
            return None;
        }

        self.apply_sample(&sample);
        Some(sample)
    }

    /// Fold a sample into the smoothed offset
    pub fn apply_sample(&mut self, sample: &ClockSample) {
        let measured = sample.offset_ms();

        self.offset_ms = if self.sample_count == 0 {
            measured
        } else {
            self.retain * self.offset_ms + (1.0 - self.retain) * measured
        };
        self.sample_count = self.sample_count.saturating_add(1);
        self.last_synced_at_ms = Some(sample.recv_local_ms);

        if self.rtt_samples.len() >= self.rtt_window {
            self.rtt_samples.remove(0);
        }
        self.rtt_samples.push(sample.rtt_ms());

        debug!(
            "Clock sync: rtt={:.1}ms, measured={:+.1}ms, offset={:+.1}ms (samples={})",
            sample.rtt_ms(),
            measured,
            self.offset_ms,
            self.sample_count
        );
    }

    /// Current smoothed offset (server minus local), 0 before the first sample
    pub fn offset_ms(&self) -> f64 {
        self.offset_ms
    }

    /// Server-corrected now in milliseconds
    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms() + self.offset_ms
    }

    /// Server-corrected now in seconds
    pub fn now_seconds(&self) -> f64 {
        self.now_ms() / 1000.0
    }

    pub fn last_synced_at_ms(&self) -> Option<f64> {
        self.last_synced_at_ms
    }

    /// Milliseconds since the last accepted sample
    pub fn staleness_ms(&self) -> Option<f64> {
        self.last_synced_at_ms
            .map(|at| (self.clock.now_ms() - at).max(0.0))
    }

    /// True if we never synced or the last sync is older than the threshold
    pub fn is_stale(&self) -> bool {
        self.staleness_ms()
            .map(|age| age > self.stale_after_ms)
            .unwrap_or(true)
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Average RTT over the recent window, if any samples exist
    pub fn average_rtt_ms(&self) -> Option<f64> {
        if self.rtt_samples.is_empty() {
            return None;
        }
        let sum: f64 = self.rtt_samples.iter().sum();
        Some(sum / self.rtt_samples.len() as f64)
    }

    /// Forget everything (on disconnect)
    pub fn clear(&mut self) {
        self.offset_ms = 0.0;
        self.last_synced_at_ms = None;
        self.pending_probe_ms = None;
        self.rtt_samples.clear();
        self.sample_count = 0;
    }
}

/// Thread-safe wrapper for ClockSync
pub type SharedClockSync = Arc<RwLock<ClockSync>>;

/// Create a new shared clock sync
pub fn new_shared_clock_sync(config: &SyncConfig, clock: SharedClock) -> SharedClockSync {
    Arc::new(RwLock::new(ClockSync::new(config, clock)))
}

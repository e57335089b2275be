//! Local clock sources
//!
//! Everything that needs "now" goes through [`LocalClock`] so the sync logic
//! can be driven by a manual clock in tests.

use std::sync::Arc;

use parking_lot::Mutex;

/// A source of local wall-clock time in milliseconds
pub trait LocalClock: Send + Sync {
    /// Milliseconds on the local clock (epoch is implementation-defined)
    fn now_ms(&self) -> f64;
}

/// Wall clock backed by `SystemTime` (milliseconds since UNIX epoch)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl LocalClock for SystemClock {
    fn now_ms(&self) -> f64 {
        current_time_ms()
    }
}

/// Manually advanced clock for simulations and tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            now_ms: Arc::new(Mutex::new(start_ms)),
        }
    }

    /// Move the clock forward (or backward, for negative values)
    pub fn advance_ms(&self, delta_ms: f64) {
        *self.now_ms.lock() += delta_ms;
    }

    pub fn set_ms(&self, now_ms: f64) {
        *self.now_ms.lock() = now_ms;
    }
}

impl LocalClock for ManualClock {
    fn now_ms(&self) -> f64 {
        *self.now_ms.lock()
    }
}

/// Shared handle to a clock source
pub type SharedClock = Arc<dyn LocalClock>;

/// Get current time in milliseconds since UNIX epoch
pub fn current_time_ms() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}

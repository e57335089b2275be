//! Recording audio output for tests

use std::sync::Arc;

use parking_lot::Mutex;

use super::{AudioOutput, OutputError};
use crate::sync::Track;

/// Everything the fake output was asked to do
#[derive(Debug, Default)]
pub(crate) struct OutputLog {
    pub clock: f64,
    pub loads: Vec<String>,
    pub unloads: usize,
    pub starts: Vec<(f64, f64)>,
    pub stops: usize,
    pub rate_writes: Vec<f64>,
    pub gain_writes: Vec<f32>,
    /// Duration reported by the next successful load
    pub load_duration: Option<f64>,
    pub fail_loads: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeOutput {
    pub log: Arc<Mutex<OutputLog>>,
}

impl FakeOutput {
    pub fn with_duration(duration: f64) -> Self {
        let output = Self::default();
        output.log.lock().load_duration = Some(duration);
        output
    }

    pub fn advance(&self, seconds: f64) {
        self.log.lock().clock += seconds;
    }
}

impl AudioOutput for FakeOutput {
    fn load(&mut self, track: &Track) -> Result<Option<f64>, OutputError> {
        let mut log = self.log.lock();
        if log.fail_loads {
            return Err(OutputError::Decode(format!("corrupt: {}", track.source_url)));
        }
        log.loads.push(track.source_url.clone());
        Ok(log.load_duration)
    }

    fn unload(&mut self) {
        self.log.lock().unloads += 1;
    }

    fn clock_seconds(&self) -> f64 {
        self.log.lock().clock
    }

    fn start_at(&mut self, when: f64, offset: f64) {
        self.log.lock().starts.push((when, offset));
    }

    fn stop(&mut self) {
        self.log.lock().stops += 1;
    }

    fn set_rate(&mut self, rate: f64) {
        self.log.lock().rate_writes.push(rate);
    }

    fn set_gain(&mut self, gain: f32) {
        self.log.lock().gain_writes.push(gain);
    }
}

//! Sync Configuration
//!
//! Tunables for clock probing and drift correction. Hosts may override any
//! subset from JSON; missing fields keep their defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default interval between clock probes
const DEFAULT_PROBE_INTERVAL_MS: u64 = 2_000;

/// Weight kept from the previous offset on each new sample
const DEFAULT_OFFSET_RETAIN: f64 = 0.8;

/// Default sync loop cadence
const DEFAULT_TICK_INTERVAL_MS: u64 = 200;

/// How far in the past an anchor may be and still get a scheduled start (s)
const DEFAULT_LATE_TOLERANCE_SECS: f64 = 0.05;

/// Drift beyond which we seek instead of nudging the rate (s)
const DEFAULT_HARD_RESYNC_SECS: f64 = 2.0;

/// Drift beyond which the rate is nudged (s)
const DEFAULT_NUDGE_SECS: f64 = 0.15;

const DEFAULT_CATCH_UP_RATE: f64 = 1.05;
const DEFAULT_SLOW_DOWN_RATE: f64 = 0.95;

/// How far ahead of "now" admin commands date their anchor (s)
const DEFAULT_COMMAND_LEAD_SECS: f64 = 0.75;

/// Number of RTT samples kept for diagnostics
const DEFAULT_RTT_WINDOW: usize = 5;

/// Upper bound on the RTT window
pub const MAX_RTT_WINDOW: usize = 1_024;

/// Offset older than this is reported as stale
const DEFAULT_STALE_AFTER_MS: u64 = 15_000;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Clock sync and scheduler tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between `RequestServerTime` probes
    pub probe_interval_ms: u64,
    /// EMA weight kept from the previous offset (0.0-1.0)
    pub offset_retain: f64,
    /// Sync loop tick interval
    pub tick_interval_ms: u64,
    /// Anchors later than this in the past start immediately mid-track
    pub late_tolerance_secs: f64,
    /// `|drift|` strictly above this triggers a hard resync
    pub hard_resync_secs: f64,
    /// `|drift|` strictly above this triggers a rate nudge
    pub nudge_secs: f64,
    /// Rate used when the engine is behind
    pub catch_up_rate: f64,
    /// Rate used when the engine is ahead
    pub slow_down_rate: f64,
    /// Lead applied to anchors emitted by local commands
    pub command_lead_secs: f64,
    /// RTT samples kept for averaging
    pub rtt_window: usize,
    /// Age after which the clock offset counts as stale
    pub stale_after_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
            offset_retain: DEFAULT_OFFSET_RETAIN,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            late_tolerance_secs: DEFAULT_LATE_TOLERANCE_SECS,
            hard_resync_secs: DEFAULT_HARD_RESYNC_SECS,
            nudge_secs: DEFAULT_NUDGE_SECS,
            catch_up_rate: DEFAULT_CATCH_UP_RATE,
            slow_down_rate: DEFAULT_SLOW_DOWN_RATE,
            command_lead_secs: DEFAULT_COMMAND_LEAD_SECS,
            rtt_window: DEFAULT_RTT_WINDOW,
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
        }
    }
}

impl SyncConfig {
    /// Parse a (possibly partial) JSON config, filling gaps with defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the sync loop cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_interval_ms == 0 {
            return Err(invalid("probe_interval_ms", "must be non-zero"));
        }
        if self.tick_interval_ms == 0 {
            return Err(invalid("tick_interval_ms", "must be non-zero"));
        }
        if !(0.0..1.0).contains(&self.offset_retain) {
            return Err(invalid("offset_retain", "must be in [0.0, 1.0)"));
        }
        if self.nudge_secs < 0.0 || self.hard_resync_secs <= self.nudge_secs {
            return Err(invalid(
                "hard_resync_secs",
                format!(
                    "must exceed nudge_secs ({} <= {})",
                    self.hard_resync_secs, self.nudge_secs
                ),
            ));
        }
        if self.catch_up_rate <= 1.0 {
            return Err(invalid("catch_up_rate", "must be above 1.0"));
        }
        if self.slow_down_rate >= 1.0 || self.slow_down_rate <= 0.0 {
            return Err(invalid("slow_down_rate", "must be in (0.0, 1.0)"));
        }
        if self.command_lead_secs < 0.0 {
            return Err(invalid("command_lead_secs", "must not be negative"));
        }
        if self.rtt_window == 0 || self.rtt_window > MAX_RTT_WINDOW {
            return Err(invalid(
                "rtt_window",
                format!("must be in 1..={}", MAX_RTT_WINDOW),
            ));
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.offset_retain, 0.8);
        assert_eq!(config.hard_resync_secs, 2.0);
        assert_eq!(config.nudge_secs, 0.15);
        assert_eq!(config.tick_interval(), Duration::from_millis(200));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SyncConfig::from_json_str(r#"{ "probe_interval_ms": 5000 }"#).unwrap();
        assert_eq!(config.probe_interval(), Duration::from_secs(5));
        assert_eq!(config.catch_up_rate, 1.05);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = SyncConfig::from_json_str(r#"{ "hard_resync_secs": 0.1 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "hard_resync_secs", .. }));
    }

    #[test]
    fn test_rejects_oversized_rtt_window() {
        let err = SyncConfig::from_json_str(r#"{ "rtt_window": 18446744073709551615 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "rtt_window", .. }));

        let config = SyncConfig::from_json_str(r#"{ "rtt_window": 1024 }"#).unwrap();
        assert_eq!(config.rtt_window, MAX_RTT_WINDOW);
    }

    #[test]
    fn test_rejects_bad_json() {
        assert!(matches!(
            SyncConfig::from_json_str("{ nope"),
            Err(ConfigError::Parse(_))
        ));
    }
}

//! Engine configuration.
//!
//! All durations are stored as whole milliseconds so configs stay readable
//! when loaded from JSON (with the `serde` feature).

use crate::error::{Error, Result};
use crate::gesture::GestureThresholds;
use crate::payload::PayloadFormat;
use crate::poller::PollPhase;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Poll rates of the adaptive poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PollIntervals {
    /// Interval while no gesture has cleared the thresholds.
    pub idle_ms: u64,
    /// Interval while a gesture is being sampled aggressively.
    pub active_ms: u64,
    /// Interval after a drag ended.
    pub cooldown_ms: u64,
    /// How long the poller stays in cooldown before returning to idle.
    pub cooldown_duration_ms: u64,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            idle_ms: 100,
            active_ms: 10,
            cooldown_ms: 50,
            cooldown_duration_ms: 500,
        }
    }
}

impl PollIntervals {
    /// Poll interval for `phase`.
    pub fn interval(&self, phase: PollPhase) -> Duration {
        let ms = match phase {
            PollPhase::Idle => self.idle_ms,
            PollPhase::Active => self.active_ms,
            PollPhase::Cooldown => self.cooldown_ms,
        };
        Duration::from_millis(ms)
    }

    /// Cooldown duration.
    pub fn cooldown_duration(&self) -> Duration {
        Duration::from_millis(self.cooldown_duration_ms)
    }

    /// Check `0 < active < cooldown < idle`.
    pub fn validate(&self) -> Result<()> {
        if self.active_ms == 0 {
            return Err(Error::InvalidConfig(
                "active poll interval must be positive".into(),
            ));
        }
        if !(self.active_ms < self.cooldown_ms && self.cooldown_ms < self.idle_ms) {
            return Err(Error::InvalidConfig(format!(
                "poll intervals must satisfy active < cooldown < idle (got {}ms, {}ms, {}ms)",
                self.active_ms, self.cooldown_ms, self.idle_ms
            )));
        }
        Ok(())
    }
}

/// Batching/dispatch cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BatchConfig {
    /// Minimum spacing between position deliveries. At least
    /// [`BatchConfig::MIN_INTERVAL_MS`], which keeps delivery under 60 per second.
    pub interval_ms: u64,
    /// Pending samples that wake the dispatcher early.
    pub wake_threshold: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: Self::MIN_INTERVAL_MS,
            wake_threshold: 10,
        }
    }
}

impl BatchConfig {
    /// Smallest spacing that never exceeds 60 deliveries in any second.
    pub const MIN_INTERVAL_MS: u64 = 17;

    /// Delivery interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Where raw input events come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CaptureMode {
    /// Install the OS input hook.
    #[default]
    System,
    /// No OS hook; the host feeds events with [`Monitor::feed`].
    ///
    /// [`Monitor::feed`]: crate::Monitor::feed
    Manual,
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MonitorConfig {
    /// Click-rejection thresholds.
    pub thresholds: GestureThresholds,
    /// Adaptive poll rates.
    pub poll: PollIntervals,
    /// Delivery cadence.
    pub batch: BatchConfig,
    /// Delay before dragged items are cleared after a drag ends.
    pub clear_delay_ms: u64,
    /// Moves between trajectory snapshots sent to the analyzer.
    pub analysis_every: u32,
    /// Snapshots the analyzer may have queued before new ones are dropped.
    pub analysis_queue_depth: usize,
    /// Payload formats tried in order.
    pub strategies: Vec<PayloadFormat>,
    /// Event source.
    pub capture: CaptureMode,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: GestureThresholds::default(),
            poll: PollIntervals::default(),
            batch: BatchConfig::default(),
            clear_delay_ms: 500,
            analysis_every: 10,
            analysis_queue_depth: 8,
            strategies: PayloadFormat::default_strategies(),
            capture: CaptureMode::default(),
        }
    }
}

impl MonitorConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the click-rejection thresholds.
    pub fn with_thresholds(mut self, thresholds: GestureThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Set the poll intervals.
    pub fn with_poll_intervals(mut self, poll: PollIntervals) -> Self {
        self.poll = poll;
        self
    }

    /// Set the delivery cadence.
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Set the deferred clear delay.
    pub fn with_clear_delay(mut self, delay: Duration) -> Self {
        self.clear_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set how many moves pass between analyzer snapshots.
    pub fn with_analysis_every(mut self, moves: u32) -> Self {
        self.analysis_every = moves;
        self
    }

    /// Set the extraction strategies.
    pub fn with_strategies(mut self, strategies: Vec<PayloadFormat>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Set the capture mode.
    pub fn with_capture(mut self, capture: CaptureMode) -> Self {
        self.capture = capture;
        self
    }

    /// Deferred clear delay.
    pub fn clear_delay(&self) -> Duration {
        Duration::from_millis(self.clear_delay_ms)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.poll.validate()?;

        if self.batch.interval_ms < BatchConfig::MIN_INTERVAL_MS {
            return Err(Error::InvalidConfig(format!(
                "batch interval must be at least {}ms",
                BatchConfig::MIN_INTERVAL_MS
            )));
        }
        if self.batch.wake_threshold == 0 {
            return Err(Error::InvalidConfig(
                "batch wake threshold must be at least 1".into(),
            ));
        }
        if self.analysis_every == 0 {
            return Err(Error::InvalidConfig(
                "analysis_every must be at least 1".into(),
            ));
        }
        if self.strategies.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one extraction strategy is required".into(),
            ));
        }

        let t = &self.thresholds;
        let distances_ok = [t.min_distance, t.min_displacement]
            .iter()
            .all(|d| d.is_finite() && *d >= 0.0);
        if !distances_ok {
            return Err(Error::InvalidConfig(
                "threshold distances must be finite and non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON config. Missing fields take their defaults.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MonitorConfig = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("failed to serialize config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_interval_ordering() {
        let poll = PollIntervals::default();
        assert!(poll.interval(PollPhase::Active) < poll.interval(PollPhase::Cooldown));
        assert!(poll.interval(PollPhase::Cooldown) < poll.interval(PollPhase::Idle));
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_interval_ordering_violations_are_rejected() {
        let bad = [
            PollIntervals {
                active_ms: 60,
                ..Default::default()
            },
            PollIntervals {
                cooldown_ms: 150,
                ..Default::default()
            },
            PollIntervals {
                active_ms: 50,
                cooldown_ms: 50,
                ..Default::default()
            },
            PollIntervals {
                active_ms: 0,
                ..Default::default()
            },
        ];
        for poll in bad {
            let err = MonitorConfig::default()
                .with_poll_intervals(poll)
                .validate()
                .unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "{poll:?}");
        }
    }

    #[test]
    fn test_builder_setters() {
        let config = MonitorConfig::new()
            .with_thresholds(GestureThresholds::responsive())
            .with_clear_delay(Duration::from_millis(750))
            .with_capture(CaptureMode::Manual)
            .with_analysis_every(4);
        assert_eq!(config.thresholds.min_moves, 1);
        assert_eq!(config.clear_delay(), Duration::from_millis(750));
        assert_eq!(config.capture, CaptureMode::Manual);
        assert_eq!(config.analysis_every, 4);
    }

    #[test]
    fn test_other_invalid_values() {
        assert!(MonitorConfig::new().with_strategies(Vec::new()).validate().is_err());
        assert!(MonitorConfig::new().with_analysis_every(0).validate().is_err());
        let fast = BatchConfig {
            interval_ms: 16,
            ..Default::default()
        };
        assert!(MonitorConfig::new().with_batch(fast).validate().is_err());
        let mut thresholds = GestureThresholds::conservative();
        thresholds.min_distance = f64::NAN;
        assert!(MonitorConfig::new().with_thresholds(thresholds).validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_from_json_fills_defaults() {
        let config = MonitorConfig::from_json(
            r#"{ "capture": "Manual", "poll": { "active_ms": 5 }, "strategies": ["FileUrls", { "Vendor": "com.example.items" }] }"#,
        )
        .unwrap();
        assert_eq!(config.capture, CaptureMode::Manual);
        assert_eq!(config.poll.active_ms, 5);
        assert_eq!(config.poll.idle_ms, 100);
        assert_eq!(config.strategies.len(), 2);

        let err = MonitorConfig::from_json(r#"{ "poll": { "idle_ms": 20 } }"#).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}

//! Launch detection from accelerometer samples.
//!
//! The detector is a small debounce state machine: it counts consecutive
//! samples whose forward-acceleration proxy meets the threshold and latches
//! once the count reaches the configured requirement. Any sub-threshold
//! sample drops the count back to zero.

use crate::types::{InertialSample, TimestampMs};
use serde::{Deserialize, Serialize};

/// Samples arriving within this window after arming are ignored by the
/// magnitude strategy (picking up or mounting the phone).
pub const MAGNITUDE_SETTLE_MS: i64 = 300;

/// Accelerometer cadence requested from the inertial provider
pub const DEFAULT_INERTIAL_INTERVAL_MS: u64 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    X,
    Y,
    Z,
}

/// How the forward-acceleration proxy is derived from a sample
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DetectionStrategy {
    /// |value| of one device axis
    Axis { axis: Axis },
    /// | ‖(x, y, z)‖ − 1 G |, orientation independent
    #[default]
    Magnitude,
}

/// Debounce parameters, fixed for the lifetime of a run and stored with it
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaunchDetectionConfig {
    pub threshold_g: f64,
    pub consecutive_samples_required: u32,
    #[serde(default)]
    pub strategy: DetectionStrategy,
}

impl Default for LaunchDetectionConfig {
    fn default() -> Self {
        Self {
            threshold_g: 0.05,
            consecutive_samples_required: 3,
            strategy: DetectionStrategy::Magnitude,
        }
    }
}

/// Emitted exactly once per arming
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaunchEvent {
    /// Wall-clock time of the sample that completed the debounce
    pub timestamp: TimestampMs,
    pub proxy_g: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum DebounceState {
    Disarmed,
    Settling { until: TimestampMs },
    Counting { consecutive: u32 },
    Fired { at: TimestampMs },
}

#[derive(Clone, Debug)]
pub struct LaunchDetector {
    config: LaunchDetectionConfig,
    state: DebounceState,
}

impl LaunchDetector {
    pub fn new(config: LaunchDetectionConfig) -> Self {
        Self {
            config,
            state: DebounceState::Disarmed,
        }
    }

    pub fn config(&self) -> &LaunchDetectionConfig {
        &self.config
    }

    /// Start listening. Clears any count or latch left from a previous arming.
    pub fn arm(&mut self, now: TimestampMs) {
        self.state = match self.config.strategy {
            DetectionStrategy::Magnitude => DebounceState::Settling {
                until: now + MAGNITUDE_SETTLE_MS,
            },
            DetectionStrategy::Axis { .. } => DebounceState::Counting { consecutive: 0 },
        };
    }

    pub fn disarm(&mut self) {
        self.state = DebounceState::Disarmed;
    }

    /// Drop the latch after a launch was refused so detection keeps going
    pub fn resume_listening(&mut self) {
        if let DebounceState::Fired { .. } = self.state {
            self.state = DebounceState::Counting { consecutive: 0 };
        }
    }

    pub fn is_listening(&self) -> bool {
        matches!(
            self.state,
            DebounceState::Settling { .. } | DebounceState::Counting { .. }
        )
    }

    pub fn has_fired(&self) -> bool {
        matches!(self.state, DebounceState::Fired { .. })
    }

    pub fn fired_at(&self) -> Option<TimestampMs> {
        match self.state {
            DebounceState::Fired { at } => Some(at),
            _ => None,
        }
    }

    pub fn consecutive(&self) -> u32 {
        match self.state {
            DebounceState::Counting { consecutive } => consecutive,
            _ => 0,
        }
    }

    /// Forward-acceleration proxy in G for the configured strategy
    pub fn proxy_g(&self, sample: &InertialSample) -> f64 {
        match self.config.strategy {
            DetectionStrategy::Axis { axis } => match axis {
                Axis::X => sample.x.abs(),
                Axis::Y => sample.y.abs(),
                Axis::Z => sample.z.abs(),
            },
            DetectionStrategy::Magnitude => (sample.magnitude() - 1.0).abs(),
        }
    }

    /// Feed one sample, in arrival order. Returns the launch at most once.
    pub fn process(&mut self, sample: &InertialSample) -> Option<LaunchEvent> {
        let consecutive = match self.state {
            DebounceState::Disarmed | DebounceState::Fired { .. } => return None,
            DebounceState::Settling { until } => {
                if sample.timestamp < until {
                    return None;
                }
                0
            }
            DebounceState::Counting { consecutive } => consecutive,
        };

        let proxy = self.proxy_g(sample);
        if proxy >= self.config.threshold_g {
            let consecutive = consecutive + 1;
            if consecutive >= self.config.consecutive_samples_required.max(1) {
                self.state = DebounceState::Fired {
                    at: sample.timestamp,
                };
                log::debug!(
                    "launch detected at {} ({:.3} G after {} samples)",
                    sample.timestamp,
                    proxy,
                    consecutive
                );
                return Some(LaunchEvent {
                    timestamp: sample.timestamp,
                    proxy_g: proxy,
                });
            }
            self.state = DebounceState::Counting { consecutive };
        } else {
            self.state = DebounceState::Counting { consecutive: 0 };
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis_config(required: u32) -> LaunchDetectionConfig {
        LaunchDetectionConfig {
            threshold_g: 0.3,
            consecutive_samples_required: required,
            strategy: DetectionStrategy::Axis { axis: Axis::Y },
        }
    }

    fn y(value: f64, t: TimestampMs) -> InertialSample {
        InertialSample::new(0.0, value, 1.0, t)
    }

    #[test]
    fn test_fires_after_consecutive_samples() {
        let mut detector = LaunchDetector::new(axis_config(3));
        detector.arm(0);

        assert!(detector.process(&y(0.4, 10)).is_none());
        assert!(detector.process(&y(0.5, 20)).is_none());
        let event = detector.process(&y(0.3, 30)).expect("third sample fires");
        assert_eq!(event.timestamp, 30);
        assert!(detector.has_fired());
    }

    #[test]
    fn test_sub_threshold_resets_counter() {
        let mut detector = LaunchDetector::new(axis_config(3));
        detector.arm(0);

        detector.process(&y(0.4, 10));
        detector.process(&y(0.4, 20));
        assert_eq!(detector.consecutive(), 2);
        assert!(detector.process(&y(0.1, 30)).is_none());
        assert_eq!(detector.consecutive(), 0);

        assert!(detector.process(&y(0.4, 40)).is_none());
        assert!(detector.process(&y(0.4, 50)).is_none());
        assert_eq!(detector.process(&y(0.4, 60)).map(|e| e.timestamp), Some(60));
    }

    #[test]
    fn test_fires_exactly_once() {
        let mut detector = LaunchDetector::new(axis_config(2));
        detector.arm(0);

        let fired: Vec<_> = (0..50)
            .filter_map(|i| detector.process(&y(1.0, i * 10)))
            .collect();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].timestamp, 10);
    }

    #[test]
    fn test_negative_axis_uses_absolute_value() {
        let mut detector = LaunchDetector::new(axis_config(1));
        detector.arm(0);
        assert!(detector.process(&y(-0.5, 10)).is_some());
    }

    #[test]
    fn test_disarmed_ignores_samples() {
        let mut detector = LaunchDetector::new(axis_config(1));
        assert!(detector.process(&y(2.0, 10)).is_none());

        detector.arm(0);
        detector.disarm();
        assert!(detector.process(&y(2.0, 20)).is_none());
        assert!(!detector.is_listening());
    }

    #[test]
    fn test_rearm_clears_stale_count() {
        let mut detector = LaunchDetector::new(axis_config(3));
        detector.arm(0);
        detector.process(&y(0.5, 10));
        detector.process(&y(0.5, 20));
        detector.disarm();

        detector.arm(100);
        assert_eq!(detector.consecutive(), 0);
        assert!(detector.process(&y(0.5, 110)).is_none());
    }

    #[test]
    fn test_magnitude_settle_period() {
        let config = LaunchDetectionConfig {
            threshold_g: 0.2,
            consecutive_samples_required: 2,
            strategy: DetectionStrategy::Magnitude,
        };
        let mut detector = LaunchDetector::new(config);
        detector.arm(1_000);

        // Jolt while mounting the phone
        for t in (1_000..1_300).step_by(10) {
            assert!(detector.process(&InertialSample::new(0.0, 0.9, 1.2, t)).is_none());
        }
        assert_eq!(detector.consecutive(), 0);

        // 1.3 G total → 0.3 G proxy
        assert!(detector.process(&InertialSample::new(0.0, 0.0, 1.3, 1_300)).is_none());
        let event = detector.process(&InertialSample::new(0.0, 0.0, 1.3, 1_310));
        assert_eq!(event.map(|e| e.timestamp), Some(1_310));
    }

    #[test]
    fn test_magnitude_at_rest_is_quiet() {
        let mut detector = LaunchDetector::new(LaunchDetectionConfig::default());
        detector.arm(0);
        for t in (300..2_000).step_by(10) {
            assert!(detector.process(&InertialSample::new(0.0, 0.0, 1.0, t)).is_none());
        }
    }

    #[test]
    fn test_resume_listening_after_refusal() {
        let mut detector = LaunchDetector::new(axis_config(1));
        detector.arm(0);
        assert!(detector.process(&y(1.0, 10)).is_some());
        assert!(detector.process(&y(1.0, 20)).is_none());

        detector.resume_listening();
        assert_eq!(detector.process(&y(1.0, 30)).map(|e| e.timestamp), Some(30));
    }

    #[test]
    fn test_config_serde_defaults_strategy() {
        let json = r#"{"threshold_g":0.25,"consecutive_samples_required":4}"#;
        let config: LaunchDetectionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.strategy, DetectionStrategy::Magnitude);

        let axis = r#"{
            "threshold_g": 0.25,
            "consecutive_samples_required": 4,
            "strategy": {"kind": "axis", "axis": "z"}
        }"#;
        let config: LaunchDetectionConfig = serde_json::from_str(axis).unwrap();
        assert_eq!(config.strategy, DetectionStrategy::Axis { axis: Axis::Z });
    }
}

//! Wall-clock cross-check of the primary run timer.
//!
//! Follows the primary purely through its `RunEvent` stream and keeps its
//! own milestone map and distance. Milestone times are "now − launch" at the
//! moment a fix is processed, rather than GPS sample time, so comparing the
//! two maps shows how far GPS time drifts from the accelerometer trigger.

use crate::clock::SharedClock;
use crate::config::EngineConfig;
use crate::distance::DistanceAccumulator;
use crate::milestones::{self, MilestoneKey, Milestones, Observation, TimeBasis};
use crate::run_timer::RunEvent;
use crate::types::{GpsPoint, LocationSample, TimestampMs, UnitSystem};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryStatus {
    Idle,
    Armed,
    Running,
    Completed,
}

/// Difference between the two timers for one milestone
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MilestoneDrift {
    pub key: MilestoneKey,
    pub primary_ms: f64,
    pub secondary_ms: f64,
    /// secondary − primary
    pub drift_ms: f64,
}

pub struct SecondaryTimer {
    status: SecondaryStatus,
    origin: Option<TimestampMs>,
    milestones: Milestones,
    distance: DistanceAccumulator,
    max_speed: f64,
    elapsed_ms: i64,
    config: EngineConfig,
    units: UnitSystem,
    accept_limit_m: f64,
    last_location: Option<LocationSample>,
    clock: SharedClock,
}

impl SecondaryTimer {
    pub fn new(config: EngineConfig, clock: SharedClock) -> Self {
        Self {
            status: SecondaryStatus::Idle,
            origin: None,
            milestones: Milestones::new(),
            distance: DistanceAccumulator::new(),
            max_speed: 0.0,
            elapsed_ms: 0,
            units: config.unit_system,
            accept_limit_m: config.run_accept_limit_m(),
            config,
            last_location: None,
            clock,
        }
    }

    pub fn status(&self) -> SecondaryStatus {
        self.status
    }

    pub fn origin(&self) -> Option<TimestampMs> {
        self.origin
    }

    pub fn milestones(&self) -> &Milestones {
        &self.milestones
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed_ms
    }

    pub fn distance_m(&self) -> f64 {
        self.distance.total_m()
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    pub fn update_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    /// Follow a primary transition
    pub fn on_run_event(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Armed { .. } => {
                self.clear();
                self.units = self.config.unit_system;
                self.accept_limit_m = self.config.run_accept_limit_m();
                self.status = SecondaryStatus::Armed;
            }
            RunEvent::Launched { origin } => {
                if self.status != SecondaryStatus::Armed {
                    return;
                }
                self.status = SecondaryStatus::Running;
                self.origin = Some(*origin);
                if let Some(sample) = self.last_location {
                    self.distance.push(GpsPoint::from(&sample));
                }
                self.refresh_elapsed();
            }
            RunEvent::Completed { .. } => {
                if self.status == SecondaryStatus::Running {
                    self.refresh_elapsed();
                    self.status = SecondaryStatus::Completed;
                }
            }
            RunEvent::Disarmed { .. } | RunEvent::Reset { .. } => {
                self.clear();
                self.status = SecondaryStatus::Idle;
            }
            RunEvent::Ready
            | RunEvent::Unready
            | RunEvent::LaunchRejected { .. }
            | RunEvent::Milestone { .. } => {}
        }
    }

    pub fn on_location(&mut self, sample: LocationSample) {
        self.last_location = Some(sample);
        if self.status != SecondaryStatus::Running {
            return;
        }
        if !sample.accuracy_within(self.accept_limit_m) {
            return;
        }
        if let Some(prev) = self.distance.last_point() {
            if sample.timestamp < prev.timestamp {
                log::debug!("secondary fix out of order at {}", sample.timestamp);
                return;
            }
        }
        let Some(origin) = self.origin else {
            return;
        };

        let point = GpsPoint::from(&sample);
        self.distance.push(point);
        self.max_speed = self.max_speed.max(point.speed);

        let now = self.clock.now_ms();
        let observation = Observation {
            speed: point.speed,
            timestamp: point.timestamp,
            distance_m: self.distance.total_m(),
        };
        for (key, milestone) in milestones::evaluate(
            milestones::thresholds(self.units),
            &self.milestones,
            origin,
            &observation,
            TimeBasis::WallClock { now },
        ) {
            self.milestones.record(key, milestone);
        }
    }

    pub fn tick(&mut self) -> bool {
        if self.status != SecondaryStatus::Running {
            return false;
        }
        self.refresh_elapsed();
        true
    }

    /// Per-milestone comparison for keys both timers recorded
    pub fn drift_against(&self, primary: &Milestones) -> Vec<MilestoneDrift> {
        primary
            .iter()
            .filter_map(|(key, p)| {
                self.milestones.get(key).map(|s| MilestoneDrift {
                    key,
                    primary_ms: p.elapsed_ms,
                    secondary_ms: s.elapsed_ms,
                    drift_ms: s.elapsed_ms - p.elapsed_ms,
                })
            })
            .collect()
    }

    fn clear(&mut self) {
        self.origin = None;
        self.milestones.clear();
        self.distance.reset();
        self.max_speed = 0.0;
        self.elapsed_ms = 0;
    }

    fn refresh_elapsed(&mut self) {
        if let Some(origin) = self.origin {
            self.elapsed_ms = (self.clock.now_ms() - origin).max(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::run_timer::DisarmReason;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn fix(lat: f64, speed: f64, t: TimestampMs) -> LocationSample {
        LocationSample::new(lat, 8.5, Some(speed), Some(4.0), t)
    }

    fn secondary() -> (SecondaryTimer, ManualClock) {
        let clock = ManualClock::new(0);
        (
            SecondaryTimer::new(EngineConfig::default(), Arc::new(clock.clone())),
            clock,
        )
    }

    #[test]
    fn test_lockstep_with_primary_events() {
        let (mut timer, clock) = secondary();
        timer.on_location(fix(47.0, 0.0, 0));

        timer.on_run_event(&RunEvent::Armed { at: 0 });
        assert_eq!(timer.status(), SecondaryStatus::Armed);

        clock.set(500);
        timer.on_run_event(&RunEvent::Launched { origin: 480 });
        assert_eq!(timer.status(), SecondaryStatus::Running);
        assert_eq!(timer.origin(), Some(480));
        assert_eq!(timer.elapsed_ms(), 20);

        clock.set(3_480);
        assert!(timer.tick());
        assert_eq!(timer.elapsed_ms(), 3_000);

        clock.set(4_480);
        timer.on_run_event(&RunEvent::Completed { elapsed_ms: 4_000 });
        assert_eq!(timer.status(), SecondaryStatus::Completed);
        assert_eq!(timer.elapsed_ms(), 4_000);
        assert!(!timer.tick());
    }

    #[test]
    fn test_launch_ignored_unless_armed() {
        let (mut timer, _) = secondary();
        timer.on_run_event(&RunEvent::Launched { origin: 100 });
        assert_eq!(timer.status(), SecondaryStatus::Idle);
        assert_eq!(timer.origin(), None);
    }

    #[test]
    fn test_wall_clock_milestones() {
        let (mut timer, clock) = secondary();
        timer.on_location(fix(47.0, 0.0, 0));
        timer.on_run_event(&RunEvent::Armed { at: 0 });
        timer.on_run_event(&RunEvent::Launched { origin: 0 });

        // GPS says 1000 ms but the fix is processed 1150 ms after launch
        clock.set(1_150);
        timer.on_location(fix(47.0002, 30.0, 1_000));
        let milestone = timer.milestones().get(MilestoneKey::LowSpeed).unwrap();
        assert_eq!(milestone.elapsed_ms, 1_150.0);
        assert!(timer.distance_m() > 20.0);
    }

    #[test]
    fn test_out_of_order_fix_ignored() {
        let (mut timer, clock) = secondary();
        timer.on_location(fix(47.0, 0.0, 0));
        timer.on_run_event(&RunEvent::Armed { at: 0 });
        timer.on_run_event(&RunEvent::Launched { origin: 0 });

        clock.set(1_000);
        timer.on_location(fix(47.0002, 20.0, 1_000));
        let before = timer.distance_m();

        // Late delivery from 100 m back, then the next fix in sequence
        clock.set(1_050);
        timer.on_location(fix(47.0011, 25.0, 900));
        assert_eq!(timer.distance_m(), before);

        clock.set(1_100);
        timer.on_location(fix(47.0004, 22.0, 1_100));
        assert_relative_eq!(timer.distance_m(), 0.0004 * 111_194.93, max_relative = 1e-3);
    }

    #[test]
    fn test_inaccurate_fix_ignored_while_running() {
        let (mut timer, clock) = secondary();
        timer.on_location(fix(47.0, 0.0, 0));
        timer.on_run_event(&RunEvent::Armed { at: 0 });
        timer.on_run_event(&RunEvent::Launched { origin: 0 });

        // Default run bar is 10 m, accepted up to twice that
        clock.set(1_000);
        timer.on_location(LocationSample::new(47.0005, 8.5, Some(30.0), Some(25.0), 1_000));
        assert_eq!(timer.distance_m(), 0.0);
        assert_eq!(timer.max_speed(), 0.0);
        assert!(timer.milestones().is_empty());

        clock.set(1_100);
        timer.on_location(LocationSample::new(47.0005, 8.5, Some(30.0), Some(20.0), 1_100));
        assert!(timer.distance_m() > 50.0);
        assert!(timer.milestones().contains(MilestoneKey::LowSpeed));
    }

    #[test]
    fn test_drift_report() {
        let (mut timer, clock) = secondary();
        timer.on_location(fix(47.0, 0.0, 0));
        timer.on_run_event(&RunEvent::Armed { at: 0 });
        timer.on_run_event(&RunEvent::Launched { origin: 0 });
        clock.set(1_150);
        timer.on_location(fix(47.0002, 30.0, 1_000));

        let mut primary = Milestones::new();
        primary.record(
            MilestoneKey::LowSpeed,
            crate::milestones::Milestone {
                speed_at_crossing: 30.0,
                elapsed_ms: 894.0,
                distance_at_crossing: 22.0,
            },
        );
        primary.record(
            MilestoneKey::QuarterDistance,
            crate::milestones::Milestone {
                speed_at_crossing: 40.0,
                elapsed_ms: 12_000.0,
                distance_at_crossing: 403.0,
            },
        );

        let drift = timer.drift_against(&primary);
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].key, MilestoneKey::LowSpeed);
        assert_eq!(drift[0].drift_ms, 256.0);
    }

    #[test]
    fn test_disarm_and_rearm_clear_state() {
        let (mut timer, clock) = secondary();
        timer.on_location(fix(47.0, 0.0, 0));
        timer.on_run_event(&RunEvent::Armed { at: 0 });
        timer.on_run_event(&RunEvent::Launched { origin: 0 });
        clock.set(1_000);
        timer.on_location(fix(47.0002, 30.0, 1_000));
        assert!(!timer.milestones().is_empty());

        timer.on_run_event(&RunEvent::Completed { elapsed_ms: 1_000 });
        timer.on_run_event(&RunEvent::Armed { at: 2_000 });
        assert!(timer.milestones().is_empty());
        assert_eq!(timer.distance_m(), 0.0);

        timer.on_run_event(&RunEvent::Disarmed {
            reason: DisarmReason::Cancelled,
        });
        assert_eq!(timer.status(), SecondaryStatus::Idle);
    }
}

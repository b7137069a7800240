//! Acceleration run lifecycle: idle → ready → armed → running → completed.
//!
//! The timer consumes location fixes and accelerometer samples synchronously.
//! Every transition returns the events it produced so observers (secondary
//! timer, haptics, persistence) can follow without holding references into
//! the run state.

use crate::clock::SharedClock;
use crate::config::EngineConfig;
use crate::distance::DistanceAccumulator;
use crate::error::{EngineError, EngineResult};
use crate::launch_detector::{LaunchDetectionConfig, LaunchDetector, LaunchEvent};
use crate::milestones::{
    self, Milestone, MilestoneKey, Milestones, Observation, SpeedFix, TimeBasis,
};
use crate::smoothing::SpeedSmoother;
use crate::types::{GpsPoint, InertialSample, LocationSample, TimestampMs, UnitSystem};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Elapsed-time display refresh period (100 Hz)
pub const ELAPSED_TICK_MS: u64 = 10;

/// Most recent route points kept for a run
pub const RUN_HISTORY_CAPACITY: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Ready,
    Armed,
    Running,
    Completed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisarmReason {
    Cancelled,
    AccuracyLost,
    TrackingLost,
}

/// Observable run transitions
#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
    Ready,
    Unready,
    Armed { at: TimestampMs },
    Disarmed { reason: DisarmReason },
    LaunchRejected { speed: f64 },
    Launched { origin: TimestampMs },
    Milestone { key: MilestoneKey, milestone: Milestone },
    Completed { elapsed_ms: i64 },
    Reset { status: RunStatus },
}

/// Settings captured when the run is armed. Later config changes do not
/// affect a run in progress.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunSnapshot {
    pub units: UnitSystem,
    pub detection: LaunchDetectionConfig,
    pub accept_limit_m: f64,
    pub rolling_start_limit: f64,
}

impl RunSnapshot {
    fn from_config(config: &EngineConfig) -> Self {
        Self {
            units: config.unit_system,
            detection: config.launch_detection,
            accept_limit_m: config.run_accept_limit_m(),
            rolling_start_limit: config.rolling_start_limit(),
        }
    }
}

/// Everything a single run accumulates. Reset wholesale on arm.
#[derive(Clone, Debug)]
pub struct RunState {
    pub status: RunStatus,
    pub origin: Option<TimestampMs>,
    pub milestones: Milestones,
    pub max_speed: f64,
    pub elapsed_ms: i64,
    pub start_point: Option<GpsPoint>,
    distance: DistanceAccumulator,
    history: VecDeque<GpsPoint>,
    previous_fix: Option<SpeedFix>,
}

impl RunState {
    fn new(status: RunStatus) -> Self {
        Self {
            status,
            origin: None,
            milestones: Milestones::new(),
            max_speed: 0.0,
            elapsed_ms: 0,
            start_point: None,
            distance: DistanceAccumulator::new(),
            history: VecDeque::new(),
            previous_fix: None,
        }
    }

    pub fn distance_m(&self) -> f64 {
        self.distance.total_m()
    }

    fn push_history(&mut self, point: GpsPoint) {
        if self.history.len() == RUN_HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(point);
    }
}

pub struct RunTimer {
    config: EngineConfig,
    snapshot: RunSnapshot,
    state: RunState,
    detector: LaunchDetector,
    smoother: SpeedSmoother,
    clock: SharedClock,
    tracking: bool,
    last_location: Option<LocationSample>,
    ticking: bool,
}

impl RunTimer {
    pub fn new(config: EngineConfig, clock: SharedClock) -> Self {
        let snapshot = RunSnapshot::from_config(&config);
        Self {
            detector: LaunchDetector::new(config.launch_detection),
            config,
            snapshot,
            state: RunState::new(RunStatus::Idle),
            smoother: SpeedSmoother::default(),
            clock,
            tracking: false,
            last_location: None,
            ticking: false,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.state.status
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn snapshot(&self) -> &RunSnapshot {
        &self.snapshot
    }

    pub fn origin(&self) -> Option<TimestampMs> {
        self.state.origin
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.state.elapsed_ms
    }

    /// Smoothed live speed (m/s), updated by every fix regardless of accuracy
    pub fn current_speed(&self) -> f64 {
        self.smoother.current()
    }

    pub fn max_speed(&self) -> f64 {
        self.state.max_speed
    }

    pub fn distance_m(&self) -> f64 {
        self.state.distance_m()
    }

    pub fn milestones(&self) -> &Milestones {
        &self.state.milestones
    }

    /// Route points accepted during the run, oldest first
    pub fn history(&self) -> impl Iterator<Item = &GpsPoint> {
        self.state.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.state.history.len()
    }

    pub fn last_location(&self) -> Option<&LocationSample> {
        self.last_location.as_ref()
    }

    pub fn detector(&self) -> &LaunchDetector {
        &self.detector
    }

    /// True while the inertial provider should be subscribed
    pub fn wants_inertial(&self) -> bool {
        self.state.status == RunStatus::Armed
    }

    /// True while the 100 Hz elapsed-time tick should run
    pub fn is_ticking(&self) -> bool {
        self.ticking
    }

    /// Location is updating and the latest fix meets the readiness bar
    pub fn accuracy_acceptable(&self) -> bool {
        self.tracking
            && self
                .last_location
                .map(|s| s.accuracy_within(self.config.accuracy_threshold_m))
                .unwrap_or(false)
    }

    pub fn update_config(&mut self, config: EngineConfig) -> Vec<RunEvent> {
        self.config = config;
        let mut events = Vec::new();
        self.refresh_readiness(&mut events);
        events
    }

    /// Location provider stopped or lost permission
    pub fn on_tracking_lost(&mut self) -> Vec<RunEvent> {
        self.tracking = false;
        let mut events = Vec::new();
        match self.state.status {
            RunStatus::Ready => {
                self.state.status = RunStatus::Idle;
                events.push(RunEvent::Unready);
            }
            RunStatus::Armed => self.disarm(DisarmReason::TrackingLost, &mut events),
            _ => {}
        }
        events
    }

    pub fn on_location(&mut self, sample: LocationSample) -> Vec<RunEvent> {
        self.tracking = true;
        self.smoother.push(sample.speed_or_zero());
        self.last_location = Some(sample);

        let mut events = Vec::new();
        match self.state.status {
            RunStatus::Idle | RunStatus::Ready | RunStatus::Armed => {
                self.refresh_readiness(&mut events)
            }
            RunStatus::Running => self.accept_running_fix(&sample, &mut events),
            RunStatus::Completed => {}
        }
        events
    }

    pub fn on_inertial(&mut self, sample: &InertialSample) -> Vec<RunEvent> {
        let mut events = Vec::new();
        if self.state.status != RunStatus::Armed {
            return events;
        }
        if let Some(launch) = self.detector.process(sample) {
            self.handle_launch(launch, &mut events);
        }
        events
    }

    /// Periodic elapsed-time refresh. Ignored unless the run is live.
    pub fn tick(&mut self) -> bool {
        if !self.ticking || self.state.status != RunStatus::Running {
            return false;
        }
        self.refresh_elapsed();
        true
    }

    pub fn arm(&mut self) -> EngineResult<Vec<RunEvent>> {
        if self.state.status != RunStatus::Ready {
            return Err(EngineError::transition("run", self.state.status, "arm"));
        }

        let now = self.clock.now_ms();
        self.snapshot = RunSnapshot::from_config(&self.config);
        self.state = RunState::new(RunStatus::Armed);
        self.ticking = false;
        self.detector = LaunchDetector::new(self.snapshot.detection);
        self.detector.arm(now);

        log::info!(
            "run armed (threshold {:.2} G x{})",
            self.snapshot.detection.threshold_g,
            self.snapshot.detection.consecutive_samples_required
        );
        Ok(vec![RunEvent::Armed { at: now }])
    }

    pub fn cancel(&mut self) -> EngineResult<Vec<RunEvent>> {
        if self.state.status != RunStatus::Armed {
            return Err(EngineError::transition("run", self.state.status, "cancel"));
        }
        let mut events = Vec::new();
        self.disarm(DisarmReason::Cancelled, &mut events);
        Ok(events)
    }

    pub fn stop(&mut self) -> EngineResult<Vec<RunEvent>> {
        if self.state.status != RunStatus::Running {
            return Err(EngineError::transition("run", self.state.status, "stop"));
        }
        self.refresh_elapsed();
        self.ticking = false;
        self.state.status = RunStatus::Completed;

        log::info!(
            "run completed: {} ms, {:.1} m, {} milestones",
            self.state.elapsed_ms,
            self.state.distance_m(),
            self.state.milestones.len()
        );
        Ok(vec![RunEvent::Completed {
            elapsed_ms: self.state.elapsed_ms,
        }])
    }

    /// Leave `completed`, landing in `ready` or `idle` depending on current accuracy
    pub fn reset(&mut self) -> EngineResult<Vec<RunEvent>> {
        if self.state.status != RunStatus::Completed {
            return Err(EngineError::transition("run", self.state.status, "reset"));
        }
        let status = if self.accuracy_acceptable() {
            RunStatus::Ready
        } else {
            RunStatus::Idle
        };
        self.state = RunState::new(status);
        self.detector.disarm();
        self.ticking = false;
        Ok(vec![RunEvent::Reset { status }])
    }

    fn refresh_readiness(&mut self, events: &mut Vec<RunEvent>) {
        let acceptable = self.accuracy_acceptable();
        match (self.state.status, acceptable) {
            (RunStatus::Idle, true) => {
                self.state.status = RunStatus::Ready;
                events.push(RunEvent::Ready);
            }
            (RunStatus::Ready, false) => {
                self.state.status = RunStatus::Idle;
                events.push(RunEvent::Unready);
            }
            (RunStatus::Armed, false) => self.disarm(DisarmReason::AccuracyLost, events),
            _ => {}
        }
    }

    fn disarm(&mut self, reason: DisarmReason, events: &mut Vec<RunEvent>) {
        self.detector.disarm();
        self.ticking = false;
        self.state = RunState::new(RunStatus::Idle);
        log::info!("run disarmed: {:?}", reason);
        events.push(RunEvent::Disarmed { reason });
    }

    fn handle_launch(&mut self, launch: LaunchEvent, events: &mut Vec<RunEvent>) {
        let speed = self
            .last_location
            .map(|s| s.speed_or_zero())
            .unwrap_or(0.0);
        if speed > self.snapshot.rolling_start_limit {
            log::info!(
                "launch ignored: rolling start at {:.2} m/s (limit {:.2})",
                speed,
                self.snapshot.rolling_start_limit
            );
            self.detector.resume_listening();
            events.push(RunEvent::LaunchRejected { speed });
            return;
        }

        self.detector.disarm();
        self.state.status = RunStatus::Running;
        self.state.origin = Some(launch.timestamp);

        if let Some(sample) = self.last_location {
            let start = GpsPoint::from(&sample);
            self.state.start_point = Some(start);
            self.state.push_history(start);
            self.state.distance.push(start);
            self.state.previous_fix = Some(SpeedFix {
                speed: start.speed,
                timestamp: start.timestamp,
            });
        }

        self.ticking = true;
        self.refresh_elapsed();
        log::info!("launch at {} ({:.3} G)", launch.timestamp, launch.proxy_g);
        events.push(RunEvent::Launched {
            origin: launch.timestamp,
        });
    }

    fn accept_running_fix(&mut self, sample: &LocationSample, events: &mut Vec<RunEvent>) {
        if !sample.accuracy_within(self.snapshot.accept_limit_m) {
            log::debug!(
                "run fix filtered: accuracy {:?} over {:.1} m",
                sample.horizontal_accuracy,
                self.snapshot.accept_limit_m
            );
            return;
        }
        if let Some(prev) = self.state.previous_fix {
            if sample.timestamp < prev.timestamp {
                log::debug!("run fix out of order at {}", sample.timestamp);
                return;
            }
        }
        let Some(origin) = self.state.origin else {
            return;
        };

        let point = GpsPoint::from(sample);
        self.state.push_history(point);
        self.state.distance.push(point);
        self.state.max_speed = self.state.max_speed.max(point.speed);

        let observation = Observation {
            speed: point.speed,
            timestamp: point.timestamp,
            distance_m: self.state.distance.total_m(),
        };
        let crossed = milestones::evaluate(
            milestones::thresholds(self.snapshot.units),
            &self.state.milestones,
            origin,
            &observation,
            TimeBasis::Gps {
                previous: self.state.previous_fix,
            },
        );
        for (key, milestone) in crossed {
            if self.state.milestones.record(key, milestone) {
                log::info!(
                    "{} in {:.0} ms",
                    key.label(self.snapshot.units),
                    milestone.elapsed_ms
                );
                events.push(RunEvent::Milestone { key, milestone });
            }
        }

        self.state.previous_fix = Some(SpeedFix {
            speed: point.speed,
            timestamp: point.timestamp,
        });
    }

    fn refresh_elapsed(&mut self) {
        if let Some(origin) = self.state.origin {
            self.state.elapsed_ms = (self.clock.now_ms() - origin).max(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::launch_detector::{Axis, DetectionStrategy};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn config() -> EngineConfig {
        EngineConfig {
            launch_detection: LaunchDetectionConfig {
                threshold_g: 0.3,
                consecutive_samples_required: 3,
                strategy: DetectionStrategy::Axis { axis: Axis::Y },
            },
            ..EngineConfig::default()
        }
    }

    fn timer(start_ms: TimestampMs) -> (RunTimer, ManualClock) {
        let clock = ManualClock::new(start_ms);
        (RunTimer::new(config(), Arc::new(clock.clone())), clock)
    }

    fn fix(lat: f64, speed: f64, accuracy: f64, t: TimestampMs) -> LocationSample {
        LocationSample::new(lat, -122.0, Some(speed), Some(accuracy), t)
    }

    fn push_launch(timer: &mut RunTimer, start: TimestampMs) -> Vec<RunEvent> {
        let mut events = Vec::new();
        for i in 0..3 {
            events.extend(timer.on_inertial(&InertialSample::new(0.0, 0.5, 1.0, start + i * 10)));
        }
        events
    }

    fn armed_timer() -> (RunTimer, ManualClock) {
        let (mut timer, clock) = timer(10_000);
        timer.on_location(fix(37.0, 0.0, 5.0, 10_000));
        timer.arm().unwrap();
        (timer, clock)
    }

    #[test]
    fn test_ready_follows_accuracy() {
        let (mut timer, _) = timer(0);
        assert_eq!(timer.status(), RunStatus::Idle);

        assert!(timer.on_location(fix(37.0, 0.0, 30.0, 0)).is_empty());
        assert_eq!(timer.status(), RunStatus::Idle);

        assert_eq!(timer.on_location(fix(37.0, 0.0, 6.0, 1_000)), vec![RunEvent::Ready]);
        assert_eq!(timer.on_location(fix(37.0, 0.0, 12.0, 2_000)), vec![RunEvent::Unready]);
        assert_eq!(timer.status(), RunStatus::Idle);
    }

    #[test]
    fn test_arm_requires_ready() {
        let (mut timer, _) = timer(0);
        let err = timer.arm().unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(timer.status(), RunStatus::Idle);
    }

    #[test]
    fn test_launch_starts_running() {
        let (mut timer, clock) = armed_timer();
        assert!(timer.wants_inertial());

        let events = push_launch(&mut timer, 10_500);
        assert_eq!(events, vec![RunEvent::Launched { origin: 10_520 }]);
        assert_eq!(timer.status(), RunStatus::Running);
        assert!(!timer.wants_inertial());
        assert!(timer.is_ticking());
        assert_eq!(timer.history_len(), 1);

        clock.set(11_020);
        assert!(timer.tick());
        assert_eq!(timer.elapsed_ms(), 500);
    }

    #[test]
    fn test_rolling_start_keeps_armed() {
        let (mut timer, _) = timer(0);
        timer.on_location(fix(37.0, 0.0, 5.0, 0));
        timer.arm().unwrap();
        // Creeping forward at 3 m/s, still accurate
        timer.on_location(fix(37.0, 3.0, 5.0, 100));

        let events = push_launch(&mut timer, 200);
        assert_eq!(events, vec![RunEvent::LaunchRejected { speed: 3.0 }]);
        assert_eq!(timer.status(), RunStatus::Armed);

        // Keeps listening once the car is stopped
        timer.on_location(fix(37.0, 0.0, 5.0, 300));
        let events = push_launch(&mut timer, 400);
        assert_eq!(events, vec![RunEvent::Launched { origin: 420 }]);
    }

    #[test]
    fn test_accuracy_loss_disarms() {
        let (mut timer, _) = armed_timer();
        let events = timer.on_location(fix(37.0, 0.0, 50.0, 10_100));
        assert_eq!(
            events,
            vec![RunEvent::Disarmed {
                reason: DisarmReason::AccuracyLost
            }]
        );
        assert_eq!(timer.status(), RunStatus::Idle);
        assert!(!timer.detector().is_listening());
    }

    #[test]
    fn test_tracking_loss_disarms() {
        let (mut timer, _) = armed_timer();
        let events = timer.on_tracking_lost();
        assert_eq!(
            events,
            vec![RunEvent::Disarmed {
                reason: DisarmReason::TrackingLost
            }]
        );
        assert!(!timer.accuracy_acceptable());
    }

    #[test]
    fn test_cancel_clears_detector() {
        let (mut timer, _) = armed_timer();
        timer.on_inertial(&InertialSample::new(0.0, 0.5, 1.0, 10_010));
        timer.on_inertial(&InertialSample::new(0.0, 0.5, 1.0, 10_020));
        timer.cancel().unwrap();
        assert_eq!(timer.status(), RunStatus::Idle);

        // Late sample after cancel must not launch anything
        assert!(timer
            .on_inertial(&InertialSample::new(0.0, 0.5, 1.0, 10_030))
            .is_empty());

        // Re-arming starts from a clean counter
        timer.on_location(fix(37.0, 0.0, 5.0, 10_040));
        timer.arm().unwrap();
        assert!(timer
            .on_inertial(&InertialSample::new(0.0, 0.5, 1.0, 10_050))
            .is_empty());
        assert_eq!(timer.detector().consecutive(), 1);
    }

    #[test]
    fn test_interpolated_milestone_example() {
        let (mut timer, clock) = timer(0);
        timer.on_location(fix(37.0, 0.0, 5.0, 0));
        timer.arm().unwrap();
        // Launch completes at t=0 after settle-free axis detection
        for t in [-20, -10, 0] {
            timer.on_inertial(&InertialSample::new(0.0, 0.5, 1.0, t));
        }
        assert_eq!(timer.origin(), Some(0));

        clock.set(1_000);
        let events = timer.on_location(fix(37.0001, 30.0, 5.0, 1_000));
        let milestone = events
            .iter()
            .find_map(|e| match e {
                RunEvent::Milestone {
                    key: MilestoneKey::LowSpeed,
                    milestone,
                } => Some(*milestone),
                _ => None,
            })
            .expect("0-60 recorded");
        assert!(milestone.elapsed_ms > 893.0 && milestone.elapsed_ms < 895.0);
        assert_relative_eq!(milestone.speed_at_crossing, 30.0);
    }

    #[test]
    fn test_inaccurate_running_fix_only_updates_display() {
        let (mut timer, _) = armed_timer();
        push_launch(&mut timer, 10_100);

        // 25 m is over the 2x (20 m) running limit
        let events = timer.on_location(fix(37.01, 40.0, 25.0, 11_000));
        assert!(events.is_empty());
        assert_eq!(timer.distance_m(), 0.0);
        assert_eq!(timer.max_speed(), 0.0);
        assert!(timer.milestones().is_empty());
        assert!(timer.current_speed() > 0.0);

        // 15 m is within the running limit even though it is over the readiness bar
        timer.on_location(fix(37.0001, 5.0, 15.0, 11_100));
        assert!(timer.distance_m() > 10.0);
        assert_eq!(timer.max_speed(), 5.0);
    }

    #[test]
    fn test_milestones_never_overwritten() {
        let (mut timer, _) = armed_timer();
        push_launch(&mut timer, 10_100);

        timer.on_location(fix(37.0001, 27.0, 5.0, 13_000));
        let first = *timer.milestones().get(MilestoneKey::LowSpeed).unwrap();

        timer.on_location(fix(37.0002, 10.0, 5.0, 14_000));
        timer.on_location(fix(37.0003, 30.0, 5.0, 15_000));
        assert_eq!(timer.milestones().get(MilestoneKey::LowSpeed), Some(&first));
    }

    #[test]
    fn test_stop_and_reset() {
        let (mut timer, clock) = armed_timer();
        push_launch(&mut timer, 10_100);

        clock.set(14_120);
        let events = timer.stop().unwrap();
        assert_eq!(events, vec![RunEvent::Completed { elapsed_ms: 4_000 }]);
        assert!(!timer.is_ticking());

        clock.set(20_000);
        assert!(!timer.tick());
        assert_eq!(timer.elapsed_ms(), 4_000);

        assert!(timer.stop().is_err());
        assert_eq!(
            timer.reset().unwrap(),
            vec![RunEvent::Reset {
                status: RunStatus::Ready
            }]
        );
        assert_eq!(timer.elapsed_ms(), 0);
    }

    #[test]
    fn test_reset_to_idle_without_accuracy() {
        let (mut timer, _) = armed_timer();
        push_launch(&mut timer, 10_100);
        timer.on_location(fix(37.0, 0.0, 80.0, 10_500));
        timer.stop().unwrap();
        assert_eq!(
            timer.reset().unwrap(),
            vec![RunEvent::Reset {
                status: RunStatus::Idle
            }]
        );
    }

    #[test]
    fn test_config_change_applies_at_next_arm() {
        let (mut timer, _) = armed_timer();
        let metric = EngineConfig {
            unit_system: UnitSystem::Metric,
            ..config()
        };
        timer.update_config(metric);
        assert_eq!(timer.snapshot().units, UnitSystem::Imperial);

        timer.cancel().unwrap();
        timer.on_location(fix(37.0, 0.0, 5.0, 10_100));
        timer.arm().unwrap();
        assert_eq!(timer.snapshot().units, UnitSystem::Metric);
    }

    #[test]
    fn test_history_ring_is_bounded() {
        let (mut timer, _) = armed_timer();
        push_launch(&mut timer, 10_100);
        for i in 0..(RUN_HISTORY_CAPACITY as i64 + 50) {
            timer.on_location(fix(37.0, 1.0, 5.0, 10_200 + i));
        }
        assert_eq!(timer.history_len(), RUN_HISTORY_CAPACITY);
    }
}

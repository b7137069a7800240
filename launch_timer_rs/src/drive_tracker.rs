//! Open-ended drive recording with pause/resume.
//!
//! Elapsed time is banked on pause and a fresh segment starts on resume, so
//! live elapsed is always `banked + (now − segment_start)` while tracking.

use crate::background::BackgroundBatch;
use crate::clock::SharedClock;
use crate::config::EngineConfig;
use crate::distance::DistanceAccumulator;
use crate::error::{EngineError, EngineResult};
use crate::smoothing::SpeedSmoother;
use crate::types::{GpsPoint, LocationSample, TimestampMs};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveStatus {
    Idle,
    Ready,
    Tracking,
    Paused,
    Completed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DriveEvent {
    Ready,
    Unready,
    Started {
        at: TimestampMs,
        resumed: bool,
        /// Last known position, handed to the background accumulator
        anchor: Option<GpsPoint>,
    },
    Paused { banked_ms: i64 },
    Stopped { elapsed_ms: i64 },
    Reset { status: DriveStatus },
    Merged { points: usize, distance_m: f64 },
}

#[derive(Clone, Debug)]
pub struct DriveState {
    pub status: DriveStatus,
    pub banked_ms: i64,
    pub segment_start: Option<TimestampMs>,
    pub elapsed_ms: i64,
    pub started_at: Option<TimestampMs>,
    pub max_speed: f64,
    distance: DistanceAccumulator,
    speed_samples: Vec<f64>,
    /// Full route, kept unbounded for the completed drive record
    history: Vec<GpsPoint>,
}

impl DriveState {
    fn new(status: DriveStatus) -> Self {
        Self {
            status,
            banked_ms: 0,
            segment_start: None,
            elapsed_ms: 0,
            started_at: None,
            max_speed: 0.0,
            distance: DistanceAccumulator::new(),
            speed_samples: Vec::new(),
            history: Vec::new(),
        }
    }
}

pub struct DriveTracker {
    config: EngineConfig,
    accept_limit_m: f64,
    state: DriveState,
    smoother: SpeedSmoother,
    clock: SharedClock,
    tracking: bool,
    last_location: Option<LocationSample>,
    ticking: bool,
}

impl DriveTracker {
    pub fn new(config: EngineConfig, clock: SharedClock) -> Self {
        Self {
            accept_limit_m: config.drive_accept_limit_m(),
            config,
            state: DriveState::new(DriveStatus::Idle),
            smoother: SpeedSmoother::default(),
            clock,
            tracking: false,
            last_location: None,
            ticking: false,
        }
    }

    pub fn status(&self) -> DriveStatus {
        self.state.status
    }

    pub fn state(&self) -> &DriveState {
        &self.state
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.state.elapsed_ms
    }

    pub fn banked_ms(&self) -> i64 {
        self.state.banked_ms
    }

    pub fn distance_m(&self) -> f64 {
        self.state.distance.total_m()
    }

    pub fn max_speed(&self) -> f64 {
        self.state.max_speed
    }

    pub fn current_speed(&self) -> f64 {
        self.smoother.current()
    }

    /// Arithmetic mean of accepted sample speeds (m/s)
    pub fn average_speed(&self) -> f64 {
        if self.state.speed_samples.is_empty() {
            return 0.0;
        }
        self.state.speed_samples.iter().sum::<f64>() / self.state.speed_samples.len() as f64
    }

    pub fn speed_sample_count(&self) -> usize {
        self.state.speed_samples.len()
    }

    pub fn history(&self) -> &[GpsPoint] {
        &self.state.history
    }

    /// Last accepted point, the predecessor for the next distance segment
    pub fn anchor(&self) -> Option<GpsPoint> {
        self.state.distance.last_point().copied()
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking
    }

    pub fn accept_limit_m(&self) -> f64 {
        self.accept_limit_m
    }

    pub fn accuracy_acceptable(&self) -> bool {
        self.tracking
            && self
                .last_location
                .map(|s| s.accuracy_within(self.config.drive_accuracy_threshold_m))
                .unwrap_or(false)
    }

    pub fn update_config(&mut self, config: EngineConfig) -> Vec<DriveEvent> {
        self.config = config;
        let mut events = Vec::new();
        self.refresh_readiness(&mut events);
        events
    }

    pub fn on_tracking_lost(&mut self) -> Vec<DriveEvent> {
        self.tracking = false;
        let mut events = Vec::new();
        self.refresh_readiness(&mut events);
        events
    }

    pub fn on_location(&mut self, sample: LocationSample) -> Vec<DriveEvent> {
        self.tracking = true;
        self.smoother.push(sample.speed_or_zero());
        self.last_location = Some(sample);

        let mut events = Vec::new();
        match self.state.status {
            DriveStatus::Idle | DriveStatus::Ready => self.refresh_readiness(&mut events),
            DriveStatus::Tracking => self.accept_fix(&sample),
            DriveStatus::Paused | DriveStatus::Completed => {}
        }
        events
    }

    /// Start from `ready`, or resume from `paused`
    pub fn start(&mut self) -> EngineResult<Vec<DriveEvent>> {
        let now = self.clock.now_ms();
        let resumed = match self.state.status {
            DriveStatus::Ready => {
                self.accept_limit_m = self.config.drive_accept_limit_m();
                self.state = DriveState::new(DriveStatus::Tracking);
                self.state.started_at = Some(now);
                if let Some(start) = self.usable_last_point() {
                    self.state.history.push(start);
                    self.state.distance.push(start);
                }
                false
            }
            DriveStatus::Paused => {
                // Movement while paused does not count toward distance
                if let Some(point) = self.usable_last_point() {
                    self.state.distance.seed(point);
                }
                self.state.status = DriveStatus::Tracking;
                true
            }
            other => return Err(EngineError::transition("drive", other, "start")),
        };

        self.state.segment_start = Some(now);
        self.ticking = true;
        self.refresh_elapsed(now);

        log::info!(
            "drive {} at {} (banked {} ms)",
            if resumed { "resumed" } else { "started" },
            now,
            self.state.banked_ms
        );
        Ok(vec![DriveEvent::Started {
            at: now,
            resumed,
            anchor: self.anchor(),
        }])
    }

    pub fn pause(&mut self) -> EngineResult<Vec<DriveEvent>> {
        if self.state.status != DriveStatus::Tracking {
            return Err(EngineError::transition("drive", self.state.status, "pause"));
        }
        let now = self.clock.now_ms();
        self.bank_segment(now);
        self.state.status = DriveStatus::Paused;
        self.ticking = false;
        log::info!("drive paused, banked {} ms", self.state.banked_ms);
        Ok(vec![DriveEvent::Paused {
            banked_ms: self.state.banked_ms,
        }])
    }

    pub fn stop(&mut self) -> EngineResult<Vec<DriveEvent>> {
        match self.state.status {
            DriveStatus::Tracking => {
                let now = self.clock.now_ms();
                self.bank_segment(now);
            }
            DriveStatus::Paused => {}
            other => return Err(EngineError::transition("drive", other, "stop")),
        }
        self.state.status = DriveStatus::Completed;
        self.ticking = false;
        log::info!(
            "drive completed: {} ms, {:.1} m, avg {:.1} m/s",
            self.state.elapsed_ms,
            self.distance_m(),
            self.average_speed()
        );
        Ok(vec![DriveEvent::Stopped {
            elapsed_ms: self.state.elapsed_ms,
        }])
    }

    pub fn reset(&mut self) -> EngineResult<Vec<DriveEvent>> {
        if self.state.status != DriveStatus::Completed {
            return Err(EngineError::transition("drive", self.state.status, "reset"));
        }
        let status = if self.accuracy_acceptable() {
            DriveStatus::Ready
        } else {
            DriveStatus::Idle
        };
        self.state = DriveState::new(status);
        self.ticking = false;
        Ok(vec![DriveEvent::Reset { status }])
    }

    pub fn tick(&mut self) -> bool {
        if !self.ticking || self.state.status != DriveStatus::Tracking {
            return false;
        }
        let now = self.clock.now_ms();
        self.refresh_elapsed(now);
        true
    }

    /// Back from suspension: recompute elapsed from the wall clock right away
    pub fn on_foreground(&mut self) -> i64 {
        if self.state.status == DriveStatus::Tracking {
            let now = self.clock.now_ms();
            self.refresh_elapsed(now);
        }
        self.state.elapsed_ms
    }

    /// Fold in samples accepted while the app was suspended
    pub fn merge_background(&mut self, batch: BackgroundBatch) -> Option<DriveEvent> {
        if !matches!(
            self.state.status,
            DriveStatus::Tracking | DriveStatus::Paused
        ) {
            if !batch.is_empty() {
                log::warn!(
                    "dropping {} background points, drive is {:?}",
                    batch.points.len(),
                    self.state.status
                );
            }
            return None;
        }
        if batch.is_empty() {
            return None;
        }

        let points = batch.points.len();
        let distance_m = batch.distance_m;
        self.state.distance.absorb(batch.distance_m, batch.last_point);
        self.state.max_speed = self.state.max_speed.max(batch.max_speed);
        self.state.speed_samples.extend(batch.speed_samples);
        self.state.history.extend(batch.points);

        log::info!(
            "merged {} background points ({:.1} m, {} rejected)",
            points,
            distance_m,
            batch.rejected
        );
        Some(DriveEvent::Merged { points, distance_m })
    }

    fn refresh_readiness(&mut self, events: &mut Vec<DriveEvent>) {
        let acceptable = self.accuracy_acceptable();
        match (self.state.status, acceptable) {
            (DriveStatus::Idle, true) => {
                self.state.status = DriveStatus::Ready;
                events.push(DriveEvent::Ready);
            }
            (DriveStatus::Ready, false) => {
                self.state.status = DriveStatus::Idle;
                events.push(DriveEvent::Unready);
            }
            _ => {}
        }
    }

    fn accept_fix(&mut self, sample: &LocationSample) {
        if !sample.accuracy_within(self.accept_limit_m) {
            log::debug!(
                "drive fix filtered: accuracy {:?} over {:.1} m",
                sample.horizontal_accuracy,
                self.accept_limit_m
            );
            return;
        }
        if let Some(prev) = self.state.distance.last_point() {
            if sample.timestamp < prev.timestamp {
                return;
            }
        }
        let point = GpsPoint::from(sample);
        self.state.distance.push(point);
        self.state.max_speed = self.state.max_speed.max(point.speed);
        self.state.speed_samples.push(point.speed);
        self.state.history.push(point);
    }

    fn usable_last_point(&self) -> Option<GpsPoint> {
        self.last_location
            .filter(|s| s.accuracy_within(self.accept_limit_m))
            .map(|s| GpsPoint::from(&s))
    }

    fn bank_segment(&mut self, now: TimestampMs) {
        if let Some(start) = self.state.segment_start.take() {
            self.state.banked_ms += (now - start).max(0);
        }
        self.state.elapsed_ms = self.state.banked_ms;
    }

    fn refresh_elapsed(&mut self, now: TimestampMs) {
        let live = self
            .state
            .segment_start
            .map(|start| (now - start).max(0))
            .unwrap_or(0);
        self.state.elapsed_ms = self.state.banked_ms + live;
    }
}

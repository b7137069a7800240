//! Single entry point for the host application.
//!
//! The engine owns the run timer, its wall-clock cross-check, the drive
//! tracker and a handle to the background accumulator. All sample delivery
//! and user actions go through here on one thread; side effects (haptics,
//! persistence, upload) happen in response to the events the state machines
//! return.

use crate::background::BackgroundAccumulator;
use crate::clock::SharedClock;
use crate::config::EngineConfig;
use crate::drive_tracker::{DriveEvent, DriveStatus, DriveTracker};
use crate::error::{EngineError, EngineResult};
use crate::live_status::LiveStatus;
use crate::providers::{HapticFeedback, HapticKind};
use crate::run_timer::{RunEvent, RunTimer};
use crate::secondary_timer::SecondaryTimer;
use crate::storage::{CompletedDrive, CompletedRun, RunStore};
use crate::sync::{SyncQueue, SyncRecord};
use crate::types::{InertialSample, LocationSample};

#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    Run(RunEvent),
    Drive(DriveEvent),
}

pub struct Engine {
    config: EngineConfig,
    clock: SharedClock,
    run: RunTimer,
    secondary: SecondaryTimer,
    drive: DriveTracker,
    background: BackgroundAccumulator,
    foreground: bool,
    store: Option<Box<dyn RunStore>>,
    sync: Option<SyncQueue>,
    haptics: Option<Box<dyn HapticFeedback>>,
    last_run: Option<CompletedRun>,
    last_drive: Option<CompletedDrive>,
}

impl Engine {
    pub fn new(config: EngineConfig, clock: SharedClock) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            run: RunTimer::new(config.clone(), clock.clone()),
            secondary: SecondaryTimer::new(config.clone(), clock.clone()),
            drive: DriveTracker::new(config.clone(), clock.clone()),
            background: BackgroundAccumulator::new(),
            foreground: true,
            store: None,
            sync: None,
            haptics: None,
            last_run: None,
            last_drive: None,
            config,
            clock,
        })
    }

    pub fn with_store(mut self, store: Box<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_sync(mut self, sync: SyncQueue) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn with_haptics(mut self, haptics: Box<dyn HapticFeedback>) -> Self {
        self.haptics = Some(haptics);
        self
    }

    /// Share an accumulator that a background context feeds directly
    pub fn with_background(mut self, background: BackgroundAccumulator) -> Self {
        self.background = background;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(&self) -> &RunTimer {
        &self.run
    }

    pub fn secondary(&self) -> &SecondaryTimer {
        &self.secondary
    }

    pub fn drive(&self) -> &DriveTracker {
        &self.drive
    }

    pub fn background(&self) -> &BackgroundAccumulator {
        &self.background
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    pub fn last_run(&self) -> Option<&CompletedRun> {
        self.last_run.as_ref()
    }

    pub fn last_drive(&self) -> Option<&CompletedDrive> {
        self.last_drive.as_ref()
    }

    /// True while the accelerometer should be subscribed
    pub fn wants_inertial(&self) -> bool {
        self.run.wants_inertial()
    }

    /// New settings from the host. Units and detection apply from the next arm.
    pub fn update_config(&mut self, config: EngineConfig) -> EngineResult<Vec<EngineEvent>> {
        config.validate()?;
        self.config = config.clone();
        self.secondary.update_config(config.clone());

        let mut events = Vec::new();
        let run_events = self.run.update_config(config.clone());
        self.dispatch_run(run_events, &mut events);
        events.extend(self.drive.update_config(config).into_iter().map(EngineEvent::Drive));
        Ok(events)
    }

    pub fn on_location(&mut self, sample: LocationSample) -> Vec<EngineEvent> {
        if !self.foreground && self.drive.status() == DriveStatus::Tracking {
            // Suspended: the tracker only sees these through the next drain
            if let Err(e) = self.background.record(&sample) {
                log::error!("background record failed: {}", e);
            }
            return Vec::new();
        }

        let mut events = Vec::new();
        let run_events = self.run.on_location(sample);
        self.dispatch_run(run_events, &mut events);
        self.secondary.on_location(sample);
        events.extend(self.drive.on_location(sample).into_iter().map(EngineEvent::Drive));
        events
    }

    pub fn on_inertial(&mut self, sample: &InertialSample) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        let run_events = self.run.on_inertial(sample);
        self.dispatch_run(run_events, &mut events);
        events
    }

    /// Location updates stopped (permission revoked, provider off)
    pub fn on_tracking_lost(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        let run_events = self.run.on_tracking_lost();
        self.dispatch_run(run_events, &mut events);
        events.extend(self.drive.on_tracking_lost().into_iter().map(EngineEvent::Drive));
        events
    }

    /// 100 Hz refresh of every live elapsed time. Returns whether anything is ticking.
    pub fn tick(&mut self) -> bool {
        let run = self.run.tick();
        let secondary = self.secondary.tick();
        let drive = self.drive.tick();
        run || secondary || drive
    }

    pub fn arm_run(&mut self) -> EngineResult<Vec<EngineEvent>> {
        let run_events = self.run.arm()?;
        Ok(self.dispatch_run_owned(run_events))
    }

    pub fn cancel_run(&mut self) -> EngineResult<Vec<EngineEvent>> {
        let run_events = self.run.cancel()?;
        Ok(self.dispatch_run_owned(run_events))
    }

    pub fn stop_run(&mut self) -> EngineResult<Vec<EngineEvent>> {
        let run_events = self.run.stop()?;
        Ok(self.dispatch_run_owned(run_events))
    }

    pub fn reset_run(&mut self) -> EngineResult<Vec<EngineEvent>> {
        let run_events = self.run.reset()?;
        Ok(self.dispatch_run_owned(run_events))
    }

    /// Start a drive, or resume a paused one
    pub fn start_drive(&mut self) -> EngineResult<Vec<EngineEvent>> {
        let drive_events = self.drive.start()?;
        for event in &drive_events {
            if let DriveEvent::Started { anchor, .. } = event {
                self.background.begin(*anchor, self.drive.accept_limit_m())?;
            }
        }
        Ok(drive_events.into_iter().map(EngineEvent::Drive).collect())
    }

    pub fn pause_drive(&mut self) -> EngineResult<Vec<EngineEvent>> {
        if self.drive.status() != DriveStatus::Tracking {
            return Err(EngineError::transition("drive", self.drive.status(), "pause"));
        }
        let mut events: Vec<EngineEvent> = self.absorb_background().into_iter().collect();
        events.extend(self.drive.pause()?.into_iter().map(EngineEvent::Drive));
        self.background.end()?;
        Ok(events)
    }

    pub fn stop_drive(&mut self) -> EngineResult<Vec<EngineEvent>> {
        if !matches!(
            self.drive.status(),
            DriveStatus::Tracking | DriveStatus::Paused
        ) {
            return Err(EngineError::transition("drive", self.drive.status(), "stop"));
        }
        let mut events: Vec<EngineEvent> = self.absorb_background().into_iter().collect();
        events.extend(self.drive.stop()?.into_iter().map(EngineEvent::Drive));
        self.background.end()?;
        self.finish_drive();
        Ok(events)
    }

    pub fn reset_drive(&mut self) -> EngineResult<Vec<EngineEvent>> {
        let drive_events = self.drive.reset()?;
        Ok(drive_events.into_iter().map(EngineEvent::Drive).collect())
    }

    /// App suspended. Background deliveries continue from the drive's last point.
    pub fn enter_background(&mut self) -> EngineResult<()> {
        self.foreground = false;
        if self.drive.status() == DriveStatus::Tracking {
            self.background.set_anchor(self.drive.anchor())?;
        }
        log::debug!("entered background");
        Ok(())
    }

    /// App resumed: merge what was collected and recompute elapsed immediately
    pub fn enter_foreground(&mut self) -> Vec<EngineEvent> {
        self.foreground = true;
        let events: Vec<EngineEvent> = self.absorb_background().into_iter().collect();
        self.drive.on_foreground();
        self.run.tick();
        self.secondary.tick();
        log::debug!("entered foreground, drive elapsed {} ms", self.drive.elapsed_ms());
        events
    }

    /// Persist the last completed records when auto-save is off
    pub fn save_last_run(&mut self) -> EngineResult<()> {
        let run = self
            .last_run
            .clone()
            .ok_or_else(|| EngineError::Storage("no completed run".to_string()))?;
        self.persist(SyncRecord::Run(run))
    }

    pub fn save_last_drive(&mut self) -> EngineResult<()> {
        let drive = self
            .last_drive
            .clone()
            .ok_or_else(|| EngineError::Storage("no completed drive".to_string()))?;
        self.persist(SyncRecord::Drive(drive))
    }

    /// App-level sync pass: requeue failed uploads
    pub fn sync_pass(&self) -> usize {
        self.sync.as_ref().map(|s| s.retry_pending()).unwrap_or(0)
    }

    pub fn sync_queue(&self) -> Option<&SyncQueue> {
        self.sync.as_ref()
    }

    pub fn snapshot(&self) -> LiveStatus {
        let last = self.run.last_location();
        let units = self.config.unit_system;
        let current_speed = if self.drive.status() == DriveStatus::Tracking {
            self.drive.current_speed()
        } else {
            self.run.current_speed()
        };

        LiveStatus {
            timestamp: self.clock.now_ms(),
            unit_system: units,
            foreground: self.foreground,
            gps_lat: last.map(|s| s.latitude),
            gps_lon: last.map(|s| s.longitude),
            gps_accuracy: last.and_then(|s| s.horizontal_accuracy),
            current_speed,
            current_speed_display: units.speed_from_mps(current_speed),
            run_status: self.run.status(),
            run_accuracy_ok: self.run.accuracy_acceptable(),
            run_elapsed_ms: self.run.elapsed_ms(),
            run_distance_m: self.run.distance_m(),
            run_max_speed: self.run.max_speed(),
            milestones: self.run.milestones().clone(),
            secondary_status: self.secondary.status(),
            secondary_elapsed_ms: self.secondary.elapsed_ms(),
            secondary_milestones: self.secondary.milestones().clone(),
            drive_status: self.drive.status(),
            drive_accuracy_ok: self.drive.accuracy_acceptable(),
            drive_elapsed_ms: self.drive.elapsed_ms(),
            drive_distance_m: self.drive.distance_m(),
            drive_average_speed: self.drive.average_speed(),
            drive_max_speed: self.drive.max_speed(),
            drive_points: self.drive.history().len(),
            pending_uploads: self.sync.as_ref().map(|s| s.pending().len()).unwrap_or(0),
        }
    }

    fn dispatch_run_owned(&mut self, run_events: Vec<RunEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        self.dispatch_run(run_events, &mut events);
        events
    }

    fn dispatch_run(&mut self, run_events: Vec<RunEvent>, out: &mut Vec<EngineEvent>) {
        for event in run_events {
            self.secondary.on_run_event(&event);
            match &event {
                RunEvent::Launched { .. } => self.pulse(HapticKind::Launch),
                RunEvent::Milestone { .. } => self.pulse(HapticKind::Milestone),
                RunEvent::Completed { .. } => {
                    self.pulse(HapticKind::Completed);
                    self.finish_run();
                }
                _ => {}
            }
            out.push(EngineEvent::Run(event));
        }
    }

    fn pulse(&mut self, kind: HapticKind) {
        if !self.config.haptic_feedback_enabled {
            return;
        }
        if let Some(haptics) = self.haptics.as_mut() {
            haptics.pulse(kind);
        }
    }

    fn finish_run(&mut self) {
        let now = self.clock.now_ms();
        let Some(record) = CompletedRun::from_timers(&self.run, &self.secondary, now) else {
            return;
        };
        for drift in &record.drift {
            log::info!(
                "{}: gps {:.0} ms, wall clock {:.0} ms, drift {:+.0} ms",
                drift.key.label(record.unit_system),
                drift.primary_ms,
                drift.secondary_ms,
                drift.drift_ms
            );
        }
        self.last_run = Some(record.clone());
        if self.config.auto_save_enabled {
            if let Err(e) = self.persist(SyncRecord::Run(record)) {
                log::warn!("auto-save of run failed: {}", e);
            }
        }
    }

    fn finish_drive(&mut self) {
        let now = self.clock.now_ms();
        let Some(record) = CompletedDrive::from_tracker(&self.drive, now) else {
            return;
        };
        self.last_drive = Some(record.clone());
        if self.config.auto_save_enabled {
            if let Err(e) = self.persist(SyncRecord::Drive(record)) {
                log::warn!("auto-save of drive failed: {}", e);
            }
        }
    }

    /// Local save first; upload is queued even if the local write failed
    fn persist(&mut self, record: SyncRecord) -> EngineResult<()> {
        let saved = match (self.store.as_mut(), &record) {
            (Some(store), SyncRecord::Run(run)) => store.save_completed_run(run),
            (Some(store), SyncRecord::Drive(drive)) => store.save_completed_drive(drive),
            (None, _) => Ok(()),
        };
        if let Some(sync) = &self.sync {
            sync.enqueue(record);
        }
        saved
    }

    fn absorb_background(&mut self) -> Option<EngineEvent> {
        match self.background.drain() {
            Ok(batch) => self.drive.merge_background(batch).map(EngineEvent::Drive),
            Err(e) => {
                log::error!("background drain failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::drive_tracker::DriveStatus;
    use crate::milestones::MilestoneKey;
    use crate::run_timer::RunStatus;
    use crate::secondary_timer::SecondaryStatus;
    use crate::sim::{LaunchProfile, SensorSample};
    use crate::storage::MemoryStore;
    use crate::types::TimestampMs;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::sync::{Arc, Mutex};

    const METERS_PER_DEG: f64 = 111_194.93;

    struct RecordingHaptics(Arc<Mutex<Vec<HapticKind>>>);

    impl HapticFeedback for RecordingHaptics {
        fn pulse(&mut self, kind: HapticKind) {
            self.0.lock().unwrap().push(kind);
        }
    }

    fn new_engine(config: EngineConfig) -> (Engine, ManualClock, MemoryStore) {
        let clock = ManualClock::new(0);
        let store = MemoryStore::new();
        let engine = Engine::new(config, Arc::new(clock.clone()))
            .unwrap()
            .with_store(Box::new(store.clone()));
        (engine, clock, store)
    }

    fn fix(distance_m: f64, speed: f64, t: TimestampMs) -> LocationSample {
        LocationSample::new(47.0 + distance_m / METERS_PER_DEG, 8.0, Some(speed), Some(4.0), t)
    }

    fn push(engine: &mut Engine, clock: &ManualClock, sample: LocationSample) -> Vec<EngineEvent> {
        clock.set(sample.timestamp);
        engine.on_location(sample)
    }

    /// Arm at t=0, launch at 320 ms via three strong samples
    fn launch(engine: &mut Engine, clock: &ManualClock) {
        push(engine, clock, fix(0.0, 0.0, 0));
        engine.arm_run().unwrap();
        for t in (10..300).step_by(10) {
            clock.set(t);
            engine.on_inertial(&InertialSample::new(0.0, 0.0, 1.0, t));
        }
        for t in [300, 310, 320] {
            clock.set(t);
            engine.on_inertial(&InertialSample::new(0.0, 0.5, 1.0, t));
        }
        assert_eq!(engine.run().status(), RunStatus::Running);
    }

    #[test]
    fn test_full_run_with_cross_check() {
        let (mut engine, clock, store) = new_engine(EngineConfig::default());
        let pulses = Arc::new(Mutex::new(Vec::new()));
        engine = engine.with_haptics(Box::new(RecordingHaptics(Arc::clone(&pulses))));

        launch(&mut engine, &clock);
        assert_eq!(engine.run().origin(), Some(320));
        assert_eq!(engine.secondary().status(), SecondaryStatus::Running);
        assert!(!engine.wants_inertial());

        // 5 m/s² from the launch
        for t in (400..=6_000).step_by(100) {
            let secs = (t - 320) as f64 / 1000.0;
            push(&mut engine, &clock, fix(2.5 * secs * secs, 5.0 * secs, t));
            assert!(engine.tick());
        }

        let primary = engine
            .run()
            .milestones()
            .get(MilestoneKey::LowSpeed)
            .copied()
            .unwrap();
        assert_relative_eq!(primary.elapsed_ms, 26.8224 / 5.0 * 1000.0, max_relative = 1e-6);
        let secondary = engine
            .secondary()
            .milestones()
            .get(MilestoneKey::LowSpeed)
            .copied()
            .unwrap();
        assert_eq!(secondary.elapsed_ms, 5_380.0);

        let events = engine.stop_run().unwrap();
        assert!(events.contains(&EngineEvent::Run(RunEvent::Completed { elapsed_ms: 5_680 })));
        assert_eq!(engine.secondary().status(), SecondaryStatus::Completed);

        let saved = store.runs();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, "run_320");
        assert_eq!(saved[0].drift.len(), 1);
        assert_relative_eq!(
            saved[0].drift[0].drift_ms,
            5_380.0 - primary.elapsed_ms,
            epsilon = 1e-6
        );
        assert_eq!(engine.last_run(), Some(&saved[0]));

        assert_eq!(
            *pulses.lock().unwrap(),
            vec![HapticKind::Launch, HapticKind::Milestone, HapticKind::Completed]
        );
    }

    #[test]
    fn test_haptics_and_auto_save_respect_config() {
        let config = EngineConfig {
            haptic_feedback_enabled: false,
            auto_save_enabled: false,
            ..EngineConfig::default()
        };
        let (engine, clock, store) = new_engine(config);
        let pulses = Arc::new(Mutex::new(Vec::new()));
        let mut engine = engine.with_haptics(Box::new(RecordingHaptics(Arc::clone(&pulses))));

        launch(&mut engine, &clock);
        clock.set(2_000);
        engine.stop_run().unwrap();

        assert!(pulses.lock().unwrap().is_empty());
        assert!(store.runs().is_empty());
        assert!(engine.last_run().is_some());

        engine.save_last_run().unwrap();
        assert_eq!(store.runs().len(), 1);
    }

    #[test]
    fn test_cancel_resets_secondary() {
        let (mut engine, clock, _) = new_engine(EngineConfig::default());
        push(&mut engine, &clock, fix(0.0, 0.0, 0));
        engine.arm_run().unwrap();
        assert_eq!(engine.secondary().status(), SecondaryStatus::Armed);
        assert!(engine.wants_inertial());

        engine.cancel_run().unwrap();
        assert_eq!(engine.run().status(), RunStatus::Idle);
        assert_eq!(engine.secondary().status(), SecondaryStatus::Idle);
        assert!(engine.arm_run().is_err());

        // Next fix makes it ready again
        push(&mut engine, &clock, fix(0.0, 0.0, 1_000));
        assert_eq!(engine.run().status(), RunStatus::Ready);
    }

    #[test]
    fn test_stale_tick_after_stop_is_ignored() {
        let (mut engine, clock, _) = new_engine(EngineConfig::default());
        launch(&mut engine, &clock);
        clock.set(1_320);
        engine.stop_run().unwrap();
        let elapsed = engine.run().elapsed_ms();

        clock.set(9_999);
        assert!(!engine.tick());
        assert_eq!(engine.run().elapsed_ms(), elapsed);
    }

    #[test]
    fn test_background_round_trip_counts_once() {
        let (mut engine, clock, store) = new_engine(EngineConfig::default());
        push(&mut engine, &clock, fix(0.0, 0.0, 0));
        engine.start_drive().unwrap();
        push(&mut engine, &clock, fix(100.0, 10.0, 10_000));

        engine.enter_background().unwrap();
        // Background context feeds the shared handle directly
        let handle = engine.background().clone();
        for (i, t) in [20_000, 30_000, 40_000].into_iter().enumerate() {
            clock.set(t);
            handle.record(&fix(100.0 + 100.0 * (i + 1) as f64, 10.0, t)).unwrap();
        }

        clock.set(45_000);
        let events = engine.enter_foreground();
        assert!(matches!(
            events.as_slice(),
            [EngineEvent::Drive(DriveEvent::Merged { points: 3, .. })]
        ));
        assert_eq!(engine.drive().elapsed_ms(), 45_000);
        assert_relative_eq!(engine.drive().distance_m(), 400.0, max_relative = 1e-3);

        // Foreground continues from the last background point
        push(&mut engine, &clock, fix(500.0, 10.0, 50_000));
        assert_relative_eq!(engine.drive().distance_m(), 500.0, max_relative = 1e-3);

        clock.set(60_000);
        engine.stop_drive().unwrap();
        assert_eq!(engine.drive().status(), DriveStatus::Completed);
        assert!(!engine.background().is_active().unwrap());

        let drives = store.drives();
        assert_eq!(drives.len(), 1);
        assert_eq!(drives[0].elapsed_ms, 60_000);
        assert_eq!(drives[0].route.len(), 6);
    }

    #[test]
    fn test_backgrounded_delivery_through_engine() {
        let (mut engine, clock, _) = new_engine(EngineConfig::default());
        push(&mut engine, &clock, fix(0.0, 0.0, 0));
        engine.start_drive().unwrap();
        engine.enter_background().unwrap();

        assert!(push(&mut engine, &clock, fix(50.0, 5.0, 10_000)).is_empty());
        assert_eq!(engine.drive().distance_m(), 0.0);

        engine.enter_foreground();
        assert_relative_eq!(engine.drive().distance_m(), 50.0, max_relative = 1e-3);
    }

    #[test]
    fn test_pause_merges_then_closes_buffer() {
        let (mut engine, clock, _) = new_engine(EngineConfig::default());
        push(&mut engine, &clock, fix(0.0, 0.0, 0));
        engine.start_drive().unwrap();
        engine.enter_background().unwrap();
        clock.set(5_000);
        engine.background().record(&fix(40.0, 8.0, 5_000)).unwrap();
        engine.enter_foreground();

        engine.pause_drive().unwrap();
        assert!(!engine.background().is_active().unwrap());
        assert!(engine.pause_drive().is_err());

        clock.set(8_000);
        engine.start_drive().unwrap();
        assert!(engine.background().is_active().unwrap());
    }

    #[test]
    fn test_update_config_applies_to_next_run() {
        let (mut engine, clock, _) = new_engine(EngineConfig::default());
        push(&mut engine, &clock, fix(0.0, 0.0, 0));
        engine.arm_run().unwrap();

        let metric = EngineConfig {
            unit_system: crate::types::UnitSystem::Metric,
            ..EngineConfig::default()
        };
        engine.update_config(metric).unwrap();
        assert_eq!(engine.run().snapshot().units, crate::types::UnitSystem::Imperial);
        assert_eq!(engine.snapshot().unit_system, crate::types::UnitSystem::Metric);

        let invalid = EngineConfig {
            accuracy_threshold_m: -1.0,
            ..EngineConfig::default()
        };
        assert!(matches!(engine.update_config(invalid), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_snapshot_serializes() {
        let (mut engine, clock, _) = new_engine(EngineConfig::default());
        push(&mut engine, &clock, fix(0.0, 0.0, 0));
        let status = engine.snapshot();
        assert_eq!(status.run_status, RunStatus::Ready);
        assert_eq!(status.drive_status, DriveStatus::Ready);
        assert!(status.to_json().unwrap().contains("\"run_status\": \"ready\""));
    }

    #[test]
    fn test_generated_launch_profile() {
        let profile = LaunchProfile::default();
        let (mut engine, clock, store) = new_engine(EngineConfig::default());
        clock.set(profile.start_ms);

        for sample in profile.samples() {
            clock.set(sample.timestamp());
            match sample {
                SensorSample::Location(fix) => {
                    engine.on_location(fix);
                    if engine.run().status() == RunStatus::Ready {
                        engine.arm_run().unwrap();
                    }
                }
                SensorSample::Inertial(accel) if engine.wants_inertial() => {
                    engine.on_inertial(&accel);
                }
                SensorSample::Inertial(_) => {}
            }
        }
        engine.stop_run().unwrap();

        // Third qualifying accelerometer sample after the launch instant
        let origin = profile.launch_at() + 20;
        let run = engine.last_run().unwrap();
        assert_eq!(run.origin_ms, origin);
        assert_eq!(run.elapsed_ms, profile.end_at() - origin);
        assert_abs_diff_eq!(run.distance_m, profile.distance_at(profile.end_at()), epsilon = 0.1);

        let ms = |key| run.milestones.get(key).unwrap().elapsed_ms;
        assert_abs_diff_eq!(ms(MilestoneKey::LowSpeed), 4470.4 - 20.0, epsilon = 0.5);
        assert_abs_diff_eq!(ms(MilestoneKey::HighSpeed), 7450.67 - 20.0, epsilon = 0.5);
        // Distance milestones land on the first fix past the mark
        assert_abs_diff_eq!(ms(MilestoneKey::QuarterDistance), 11_780.0, epsilon = 1e-6);
        assert_abs_diff_eq!(ms(MilestoneKey::HalfDistance), 18_480.0, epsilon = 1e-6);

        assert_eq!(run.secondary_milestones.len(), 4);
        assert_eq!(store.runs().len(), 1);
    }
}

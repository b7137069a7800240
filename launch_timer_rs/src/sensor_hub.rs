//! Provider sessions feeding the engine.
//!
//! Provider callbacks may run on platform threads, so they only push into
//! one crossbeam channel shared by both sensors. `pump` drains it on the
//! engine's thread in arrival order across the two streams. The
//! accelerometer is subscribed only while a run is armed; each subscription
//! tags its samples with a generation so anything queued by an earlier
//! subscription is dropped instead of delivered.

use crate::engine::{Engine, EngineEvent};
use crate::error::{EngineError, EngineResult};
use crate::launch_detector::DEFAULT_INERTIAL_INTERVAL_MS;
use crate::providers::{InertialProvider, LocationProvider, Subscription};
use crate::types::{InertialSample, LocationSample};
use crossbeam::channel::{self, Receiver, Sender};

#[derive(Clone, Copy, Debug)]
enum HubSample {
    Location(LocationSample),
    Inertial {
        generation: u64,
        sample: InertialSample,
    },
}

pub struct SensorHub<L: LocationProvider, I: InertialProvider> {
    engine: Engine,
    location: L,
    inertial: I,
    tx: Sender<HubSample>,
    rx: Receiver<HubSample>,
    location_sub: Option<Box<dyn Subscription>>,
    inertial_sub: Option<Box<dyn Subscription>>,
    /// Bumped on every accelerometer attach
    inertial_generation: u64,
}

impl<L: LocationProvider, I: InertialProvider> SensorHub<L, I> {
    pub fn new(engine: Engine, location: L, inertial: I) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            engine,
            location,
            inertial,
            tx,
            rx,
            location_sub: None,
            inertial_sub: None,
            inertial_generation: 0,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Direct access for drive actions and lifecycle calls. Call
    /// `sync_subscriptions` afterwards if the run status may have changed.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn is_locating(&self) -> bool {
        self.location_sub.is_some()
    }

    pub fn is_inertial_attached(&self) -> bool {
        self.inertial_sub.is_some()
    }

    /// Check (and if needed request) permission, then begin continuous updates
    pub fn start_location(&mut self) -> EngineResult<()> {
        if self.location_sub.is_some() {
            return Ok(());
        }
        if !self.location.check_permission() && !self.location.request_permission() {
            log::warn!("location permission denied, staying idle");
            return Err(EngineError::PermissionDenied);
        }

        let tx = self.tx.clone();
        let subscription = self.location.start(Box::new(move |sample| {
            let _ = tx.send(HubSample::Location(sample));
        }))?;
        self.location_sub = Some(subscription);
        log::info!("location updates started");
        Ok(())
    }

    /// Stop updates. Everything still queued is discarded.
    pub fn stop_location(&mut self) -> Vec<EngineEvent> {
        if let Some(mut subscription) = self.location_sub.take() {
            subscription.cancel();
        }
        self.location.stop();
        let dropped = self.rx.try_iter().count();
        if dropped > 0 {
            log::debug!("discarded {} queued samples", dropped);
        }
        let events = self.engine.on_tracking_lost();
        self.detach_inertial_if_unwanted();
        events
    }

    /// Deliver everything queued so far to the engine
    pub fn pump(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        while let Ok(sample) = self.rx.try_recv() {
            match sample {
                HubSample::Location(fix) => events.extend(self.engine.on_location(fix)),
                HubSample::Inertial { generation, sample } => {
                    if self.inertial_sub.is_none() || generation != self.inertial_generation {
                        continue;
                    }
                    events.extend(self.engine.on_inertial(&sample));
                }
            }
            self.detach_inertial_if_unwanted();
        }
        events
    }

    pub fn tick(&mut self) -> bool {
        self.engine.tick()
    }

    /// Arm the run and attach the accelerometer. Nothing changes if it is missing.
    pub fn arm_run(&mut self) -> EngineResult<Vec<EngineEvent>> {
        if !self.inertial.is_available() {
            log::warn!("accelerometer unavailable, cannot arm");
            return Err(EngineError::SensorUnavailable("accelerometer".to_string()));
        }
        let mut events = self.engine.arm_run()?;
        if let Err(e) = self.sync_subscriptions() {
            events.extend(self.engine.cancel_run()?);
            return Err(e);
        }
        Ok(events)
    }

    pub fn cancel_run(&mut self) -> EngineResult<Vec<EngineEvent>> {
        let events = self.engine.cancel_run()?;
        self.detach_inertial_if_unwanted();
        Ok(events)
    }

    pub fn stop_run(&mut self) -> EngineResult<Vec<EngineEvent>> {
        let events = self.engine.stop_run()?;
        self.detach_inertial_if_unwanted();
        Ok(events)
    }

    pub fn reset_run(&mut self) -> EngineResult<Vec<EngineEvent>> {
        let events = self.engine.reset_run()?;
        self.detach_inertial_if_unwanted();
        Ok(events)
    }

    /// Attach or detach the accelerometer to match the run status
    pub fn sync_subscriptions(&mut self) -> EngineResult<()> {
        if !self.engine.wants_inertial() {
            self.detach_inertial_if_unwanted();
            return Ok(());
        }
        if self.inertial_sub.is_some() {
            return Ok(());
        }
        if !self.inertial.is_available() {
            return Err(EngineError::SensorUnavailable("accelerometer".to_string()));
        }

        self.inertial.set_rate(DEFAULT_INERTIAL_INTERVAL_MS);
        self.inertial_generation += 1;
        let generation = self.inertial_generation;
        let tx = self.tx.clone();
        let subscription = self.inertial.subscribe(Box::new(move |sample| {
            let _ = tx.send(HubSample::Inertial { generation, sample });
        }))?;
        self.inertial_sub = Some(subscription);
        log::debug!("accelerometer attached");
        Ok(())
    }

    fn detach_inertial_if_unwanted(&mut self) {
        if self.engine.wants_inertial() {
            return;
        }
        if let Some(mut subscription) = self.inertial_sub.take() {
            subscription.cancel();
            log::debug!("accelerometer detached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::run_timer::{DisarmReason, RunEvent, RunStatus};
    use crate::sim::{SimInertialProvider, SimLocationProvider};
    use std::sync::Arc;

    fn hub(
        granted: bool,
        accelerometer: bool,
    ) -> (SensorHub<SimLocationProvider, SimInertialProvider>, ManualClock) {
        let clock = ManualClock::new(0);
        let engine = Engine::new(EngineConfig::default(), Arc::new(clock.clone())).unwrap();
        (
            SensorHub::new(
                engine,
                SimLocationProvider::new(granted, false),
                SimInertialProvider::new(accelerometer),
            ),
            clock,
        )
    }

    fn still(t: i64) -> LocationSample {
        LocationSample::new(47.0, 8.0, Some(0.0), Some(4.0), t)
    }

    #[test]
    fn test_permission_denied_stays_idle() {
        let (mut hub, _) = hub(false, true);
        assert_eq!(hub.start_location(), Err(EngineError::PermissionDenied));
        assert!(!hub.is_locating());
        assert_eq!(hub.engine().run().status(), RunStatus::Idle);
    }

    #[test]
    fn test_missing_accelerometer_blocks_arming() {
        let (mut hub, _) = hub(true, false);
        hub.start_location().unwrap();
        hub.location.emitter().emit(still(0));
        hub.pump();
        assert_eq!(hub.engine().run().status(), RunStatus::Ready);

        assert!(matches!(hub.arm_run(), Err(EngineError::SensorUnavailable(_))));
        assert_eq!(hub.engine().run().status(), RunStatus::Ready);
    }

    #[test]
    fn test_inertial_only_while_armed() {
        let (mut hub, clock) = hub(true, true);
        let gps = hub.location.emitter();
        let accel = hub.inertial.emitter();
        hub.start_location().unwrap();

        gps.emit(still(0));
        hub.pump();
        assert!(!accel.is_attached());

        hub.arm_run().unwrap();
        assert!(accel.is_attached());
        assert_eq!(hub.inertial.interval_ms(), DEFAULT_INERTIAL_INTERVAL_MS);

        // Settle period, then a strong push. Extra samples queue behind the launch.
        for t in (10..300).step_by(10) {
            accel.emit(InertialSample::new(0.0, 0.0, 1.0, t));
        }
        for t in [300, 310, 320, 330, 340] {
            accel.emit(InertialSample::new(0.0, 0.6, 1.0, t));
        }
        clock.set(340);
        let events = hub.pump();

        let launches = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::Run(RunEvent::Launched { .. })))
            .count();
        assert_eq!(launches, 1);
        assert_eq!(hub.engine().run().origin(), Some(320));
        assert!(!hub.is_inertial_attached());
        assert!(!accel.is_attached());
        assert!(!accel.emit(InertialSample::new(0.0, 0.6, 1.0, 350)));
    }

    #[test]
    fn test_arrival_order_across_sensors() {
        let (mut hub, clock) = hub(true, true);
        let gps = hub.location.emitter();
        let accel = hub.inertial.emitter();
        hub.start_location().unwrap();
        gps.emit(still(0));
        hub.pump();
        hub.arm_run().unwrap();

        for t in (10..300).step_by(10) {
            accel.emit(InertialSample::new(0.0, 0.0, 1.0, t));
        }
        for t in [300, 310, 320] {
            accel.emit(InertialSample::new(0.0, 0.6, 1.0, t));
        }
        // Car already moving by the time this fix lands
        gps.emit(LocationSample::new(47.0, 8.0, Some(1.5), Some(4.0), 325));
        clock.set(325);
        let events = hub.pump();

        assert!(events.contains(&EngineEvent::Run(RunEvent::Launched { origin: 320 })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, EngineEvent::Run(RunEvent::LaunchRejected { .. }))));
        assert_eq!(hub.engine().run().status(), RunStatus::Running);
    }

    #[test]
    fn test_samples_from_earlier_subscription_dropped() {
        let (mut hub, _) = hub(true, true);
        let gps = hub.location.emitter();
        let accel = hub.inertial.emitter();
        hub.start_location().unwrap();
        gps.emit(still(0));
        hub.pump();

        hub.arm_run().unwrap();
        for t in [400, 410, 420] {
            accel.emit(InertialSample::new(0.0, 0.6, 1.0, t));
        }
        // Cancelled and re-armed before the queue was pumped
        hub.cancel_run().unwrap();
        hub.engine_mut().on_location(still(430));
        hub.arm_run().unwrap();
        let events = hub.pump();

        assert!(events.is_empty());
        assert_eq!(hub.engine().run().status(), RunStatus::Armed);
        assert!(hub.is_inertial_attached());
    }

    #[test]
    fn test_cancel_detaches_accelerometer() {
        let (mut hub, _) = hub(true, true);
        let accel = hub.inertial.emitter();
        hub.start_location().unwrap();
        hub.location.emitter().emit(still(0));
        hub.pump();

        hub.arm_run().unwrap();
        accel.emit(InertialSample::new(0.0, 0.0, 1.0, 10));
        hub.cancel_run().unwrap();
        assert!(!accel.is_attached());
        assert!(hub.pump().is_empty());
    }

    #[test]
    fn test_stop_location_disarms() {
        let (mut hub, _) = hub(true, true);
        hub.start_location().unwrap();
        hub.location.emitter().emit(still(0));
        hub.pump();
        hub.arm_run().unwrap();

        let events = hub.stop_location();
        assert!(events.contains(&EngineEvent::Run(RunEvent::Disarmed {
            reason: DisarmReason::TrackingLost
        })));
        assert!(!hub.is_inertial_attached());
        assert!(!hub.location.emitter().emit(still(100)));
    }
}

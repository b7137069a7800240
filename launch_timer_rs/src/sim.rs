//! Scripted sensor input for the live simulator, replay and tests.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::providers::{InertialProvider, LocationProvider, SampleCallback, Subscription};
use crate::types::{InertialSample, LocationSample, TimestampMs, STANDARD_GRAVITY};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Meters per degree of latitude on the mean-radius sphere
pub const METERS_PER_DEGREE: f64 = 111_195.08;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorSample {
    Location(LocationSample),
    Inertial(InertialSample),
}

impl SensorSample {
    pub fn timestamp(&self) -> TimestampMs {
        match self {
            SensorSample::Location(s) => s.timestamp,
            SensorSample::Inertial(s) => s.timestamp,
        }
    }
}

/// Recorded sensor stream, optionally with the settings it was captured under
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    #[serde(default)]
    pub config: Option<EngineConfig>,
    pub samples: Vec<SensorSample>,
}

impl SessionLog {
    pub fn from_reader(reader: impl Read) -> EngineResult<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Load `.json` or gzip-compressed `.json.gz`
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let file = BufReader::new(File::open(path)?);
        let mut log = if is_gzip(path) {
            Self::from_reader(GzDecoder::new(file))?
        } else {
            Self::from_reader(file)?
        };
        log.samples.sort_by_key(|s| s.timestamp());
        Ok(log)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        let file = BufWriter::new(File::create(path)?);
        if is_gzip(path) {
            let mut encoder = GzEncoder::new(file, Compression::default());
            serde_json::to_writer(&mut encoder, self)?;
            encoder.finish()?.flush()?;
        } else {
            let mut file = file;
            serde_json::to_writer(&mut file, self)?;
            file.flush()?;
        }
        Ok(())
    }

    pub fn duration_ms(&self) -> i64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.timestamp() - first.timestamp(),
            _ => 0,
        }
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("gz")
}

/// Standing start, constant acceleration up to a top speed, then cruise.
/// The vehicle heads due north from the start position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchProfile {
    pub start_ms: TimestampMs,
    pub latitude: f64,
    pub longitude: f64,
    /// Time parked before the launch
    pub stationary_ms: i64,
    pub accel_mps2: f64,
    pub top_speed_mps: f64,
    /// Time simulated after the launch
    pub duration_ms: i64,
    pub gps_interval_ms: i64,
    pub imu_interval_ms: i64,
    pub accuracy_m: f64,
}

impl Default for LaunchProfile {
    fn default() -> Self {
        Self {
            start_ms: 1_700_000_000_000,
            latitude: 47.3769,
            longitude: 8.5417,
            stationary_ms: 2_000,
            accel_mps2: 6.0,
            top_speed_mps: 60.0,
            duration_ms: 30_000,
            gps_interval_ms: 100,
            imu_interval_ms: 10,
            accuracy_m: 4.0,
        }
    }
}

impl LaunchProfile {
    pub fn launch_at(&self) -> TimestampMs {
        self.start_ms + self.stationary_ms
    }

    pub fn end_at(&self) -> TimestampMs {
        self.launch_at() + self.duration_ms
    }

    fn seconds_moving(&self, t: TimestampMs) -> f64 {
        ((t - self.launch_at()).max(0)) as f64 / 1000.0
    }

    fn accel_time_s(&self) -> f64 {
        if self.accel_mps2 <= 0.0 {
            return 0.0;
        }
        self.top_speed_mps / self.accel_mps2
    }

    pub fn speed_at(&self, t: TimestampMs) -> f64 {
        (self.accel_mps2 * self.seconds_moving(t)).min(self.top_speed_mps)
    }

    pub fn distance_at(&self, t: TimestampMs) -> f64 {
        let s = self.seconds_moving(t);
        let ramp = self.accel_time_s();
        if s <= ramp {
            0.5 * self.accel_mps2 * s * s
        } else {
            0.5 * self.accel_mps2 * ramp * ramp + self.top_speed_mps * (s - ramp)
        }
    }

    /// Forward acceleration in G at `t`
    pub fn forward_g_at(&self, t: TimestampMs) -> f64 {
        let s = self.seconds_moving(t);
        if t >= self.launch_at() && s < self.accel_time_s() {
            self.accel_mps2 / STANDARD_GRAVITY
        } else {
            0.0
        }
    }

    pub fn location_at(&self, t: TimestampMs) -> LocationSample {
        LocationSample::new(
            self.latitude + self.distance_at(t) / METERS_PER_DEGREE,
            self.longitude,
            Some(self.speed_at(t)),
            Some(self.accuracy_m),
            t,
        )
    }

    /// Phone lying flat, screen up, top of the phone pointing forward
    pub fn inertial_at(&self, t: TimestampMs) -> InertialSample {
        InertialSample::new(0.0, self.forward_g_at(t), 1.0, t)
    }

    /// Both streams merged in timestamp order, fixes first on ties
    pub fn samples(&self) -> Vec<SensorSample> {
        let mut samples = Vec::new();
        let mut t = self.start_ms;
        while t <= self.end_at() {
            samples.push(SensorSample::Location(self.location_at(t)));
            t += self.gps_interval_ms.max(1);
        }
        let mut t = self.start_ms;
        while t <= self.end_at() {
            samples.push(SensorSample::Inertial(self.inertial_at(t)));
            t += self.imu_interval_ms.max(1);
        }
        samples.sort_by_key(|s| {
            let rank = match s {
                SensorSample::Location(_) => 0,
                SensorSample::Inertial(_) => 1,
            };
            (s.timestamp(), rank)
        });
        samples
    }

    pub fn session_log(&self) -> SessionLog {
        SessionLog {
            config: None,
            samples: self.samples(),
        }
    }
}

/// Fixes along a straight northbound line at constant speed
pub fn cruise(
    start_ms: TimestampMs,
    latitude: f64,
    longitude: f64,
    speed_mps: f64,
    interval_ms: i64,
    count: usize,
) -> Vec<LocationSample> {
    (0..count)
        .map(|i| {
            let t = start_ms + i as i64 * interval_ms;
            let distance = speed_mps * (i as i64 * interval_ms) as f64 / 1000.0;
            LocationSample::new(
                latitude + distance / METERS_PER_DEGREE,
                longitude,
                Some(speed_mps),
                Some(5.0),
                t,
            )
        })
        .collect()
}

type Slot<T> = Arc<Mutex<Option<SampleCallback<T>>>>;

/// Handle the simulated platform uses to deliver samples to whoever subscribed
pub struct SimEmitter<T> {
    slot: Slot<T>,
}

impl<T> Clone for SimEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> SimEmitter<T> {
    /// Deliver one sample. Returns false when nobody is subscribed.
    pub fn emit(&self, sample: T) -> bool {
        match self.slot.lock() {
            Ok(mut slot) => match slot.as_mut() {
                Some(callback) => {
                    callback(sample);
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}

struct SlotSubscription<T> {
    slot: Slot<T>,
}

impl<T: 'static> Subscription for SlotSubscription<T> {
    fn cancel(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.take();
        }
    }
}

impl<T> Drop for SlotSubscription<T> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.take();
        }
    }
}

fn attach<T: 'static>(
    slot: &Slot<T>,
    callback: SampleCallback<T>,
) -> EngineResult<Box<dyn Subscription>> {
    let mut guard = slot
        .lock()
        .map_err(|_| EngineError::Internal("simulated provider lock poisoned".to_string()))?;
    *guard = Some(callback);
    Ok(Box::new(SlotSubscription {
        slot: Arc::clone(slot),
    }))
}

pub struct SimLocationProvider {
    granted: bool,
    grant_on_request: bool,
    slot: Slot<LocationSample>,
}

impl SimLocationProvider {
    pub fn new(granted: bool, grant_on_request: bool) -> Self {
        Self {
            granted,
            grant_on_request,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn emitter(&self) -> SimEmitter<LocationSample> {
        SimEmitter {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl LocationProvider for SimLocationProvider {
    fn check_permission(&self) -> bool {
        self.granted
    }

    fn request_permission(&mut self) -> bool {
        self.granted = self.grant_on_request;
        self.granted
    }

    fn start(
        &mut self,
        on_sample: SampleCallback<LocationSample>,
    ) -> EngineResult<Box<dyn Subscription>> {
        if !self.granted {
            return Err(EngineError::PermissionDenied);
        }
        attach(&self.slot, on_sample)
    }

    fn stop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.take();
        }
    }
}

pub struct SimInertialProvider {
    available: bool,
    interval_ms: u64,
    slot: Slot<InertialSample>,
}

impl SimInertialProvider {
    pub fn new(available: bool) -> Self {
        Self {
            available,
            interval_ms: 0,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn emitter(&self) -> SimEmitter<InertialSample> {
        SimEmitter {
            slot: Arc::clone(&self.slot),
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }
}

impl InertialProvider for SimInertialProvider {
    fn is_available(&self) -> bool {
        self.available
    }

    fn set_rate(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms;
    }

    fn subscribe(
        &mut self,
        on_sample: SampleCallback<InertialSample>,
    ) -> EngineResult<Box<dyn Subscription>> {
        if !self.available {
            return Err(EngineError::SensorUnavailable("accelerometer".to_string()));
        }
        attach(&self.slot, on_sample)
    }
}

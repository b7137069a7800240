use serde::{Deserialize, Serialize};

/// Wall-clock milliseconds (epoch based, same clock for every timer).
pub type TimestampMs = i64;

/// Standard gravity, used to express G-force readings in m/s².
pub const STANDARD_GRAVITY: f64 = 9.80665;

pub const METERS_PER_MILE: f64 = 1609.344;
pub const MPS_PER_MPH: f64 = 0.44704;
pub const MPS_PER_KMH: f64 = 1.0 / 3.6;

/// One fix from the location provider
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Ground speed in m/s, `None` when the provider did not report one
    pub speed: Option<f64>,
    /// Horizontal accuracy radius in meters, `None` when unknown
    pub horizontal_accuracy: Option<f64>,
    pub timestamp: TimestampMs,
}

impl LocationSample {
    pub fn new(
        latitude: f64,
        longitude: f64,
        speed: Option<f64>,
        horizontal_accuracy: Option<f64>,
        timestamp: TimestampMs,
    ) -> Self {
        Self {
            latitude,
            longitude,
            speed,
            horizontal_accuracy,
            timestamp,
        }
    }

    /// Reported speed, negatives and unknown clamped to zero
    pub fn speed_or_zero(&self) -> f64 {
        self.speed.filter(|s| s.is_finite()).unwrap_or(0.0).max(0.0)
    }

    /// True when the fix reports an accuracy no worse than `limit_m`.
    /// Unknown accuracy never qualifies.
    pub fn accuracy_within(&self, limit_m: f64) -> bool {
        matches!(self.horizontal_accuracy, Some(acc) if acc.is_finite() && acc <= limit_m)
    }
}

/// One accelerometer reading, components in G
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InertialSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp: TimestampMs,
}

impl InertialSample {
    pub fn new(x: f64, y: f64, z: f64, timestamp: TimestampMs) -> Self {
        Self { x, y, z, timestamp }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Accepted route point, kept in run/drive history for rendering
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub accuracy: Option<f64>,
    pub timestamp: TimestampMs,
}

impl From<&LocationSample> for GpsPoint {
    fn from(sample: &LocationSample) -> Self {
        GpsPoint {
            latitude: sample.latitude,
            longitude: sample.longitude,
            speed: sample.speed_or_zero(),
            accuracy: sample.horizontal_accuracy,
            timestamp: sample.timestamp,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitSystem {
    #[default]
    Imperial,
    Metric,
}

impl UnitSystem {
    /// Convert m/s into the display unit (mph or km/h)
    pub fn speed_from_mps(self, mps: f64) -> f64 {
        match self {
            UnitSystem::Imperial => mps / MPS_PER_MPH,
            UnitSystem::Metric => mps * 3.6,
        }
    }

    pub fn speed_label(self) -> &'static str {
        match self {
            UnitSystem::Imperial => "mph",
            UnitSystem::Metric => "km/h",
        }
    }
}

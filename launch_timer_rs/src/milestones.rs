//! Speed and distance milestone evaluation.
//!
//! Evaluation is a pure function over the samples handed in; the caller
//! owns the milestone map and records whatever comes back.

use crate::types::{TimestampMs, UnitSystem, METERS_PER_MILE, MPS_PER_KMH, MPS_PER_MPH};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneKey {
    LowSpeed,
    HighSpeed,
    QuarterDistance,
    HalfDistance,
}

impl MilestoneKey {
    pub fn label(self, units: UnitSystem) -> &'static str {
        match (self, units) {
            (MilestoneKey::LowSpeed, UnitSystem::Imperial) => "0-60 mph",
            (MilestoneKey::HighSpeed, UnitSystem::Imperial) => "0-100 mph",
            (MilestoneKey::QuarterDistance, UnitSystem::Imperial) => "1/4 mile",
            (MilestoneKey::HalfDistance, UnitSystem::Imperial) => "1/2 mile",
            (MilestoneKey::LowSpeed, UnitSystem::Metric) => "0-100 km/h",
            (MilestoneKey::HighSpeed, UnitSystem::Metric) => "0-200 km/h",
            (MilestoneKey::QuarterDistance, UnitSystem::Metric) => "400 m",
            (MilestoneKey::HalfDistance, UnitSystem::Metric) => "800 m",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThresholdKind {
    /// Value in m/s
    Speed,
    /// Value in meters
    Distance,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Threshold {
    pub key: MilestoneKey,
    pub kind: ThresholdKind,
    pub value: f64,
}

pub const IMPERIAL_THRESHOLDS: [Threshold; 4] = [
    Threshold {
        key: MilestoneKey::LowSpeed,
        kind: ThresholdKind::Speed,
        value: 60.0 * MPS_PER_MPH,
    },
    Threshold {
        key: MilestoneKey::HighSpeed,
        kind: ThresholdKind::Speed,
        value: 100.0 * MPS_PER_MPH,
    },
    Threshold {
        key: MilestoneKey::QuarterDistance,
        kind: ThresholdKind::Distance,
        value: METERS_PER_MILE / 4.0,
    },
    Threshold {
        key: MilestoneKey::HalfDistance,
        kind: ThresholdKind::Distance,
        value: METERS_PER_MILE / 2.0,
    },
];

pub const METRIC_THRESHOLDS: [Threshold; 4] = [
    Threshold {
        key: MilestoneKey::LowSpeed,
        kind: ThresholdKind::Speed,
        value: 100.0 * MPS_PER_KMH,
    },
    Threshold {
        key: MilestoneKey::HighSpeed,
        kind: ThresholdKind::Speed,
        value: 200.0 * MPS_PER_KMH,
    },
    Threshold {
        key: MilestoneKey::QuarterDistance,
        kind: ThresholdKind::Distance,
        value: 400.0,
    },
    Threshold {
        key: MilestoneKey::HalfDistance,
        kind: ThresholdKind::Distance,
        value: 800.0,
    },
];

pub fn thresholds(units: UnitSystem) -> &'static [Threshold] {
    match units {
        UnitSystem::Imperial => &IMPERIAL_THRESHOLDS,
        UnitSystem::Metric => &METRIC_THRESHOLDS,
    }
}

/// A recorded threshold crossing
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    /// m/s
    pub speed_at_crossing: f64,
    /// Milliseconds from the run origin
    pub elapsed_ms: f64,
    /// Meters from the start point
    pub distance_at_crossing: f64,
}

/// Write-once milestone map. Entries are only removed by a full reset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Milestones(BTreeMap<MilestoneKey, Milestone>);

impl Milestones {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: MilestoneKey) -> Option<&Milestone> {
        self.0.get(&key)
    }

    pub fn contains(&self, key: MilestoneKey) -> bool {
        self.0.contains_key(&key)
    }

    /// Store a crossing unless the key is already set. Returns whether it was stored.
    pub fn record(&mut self, key: MilestoneKey, milestone: Milestone) -> bool {
        if self.0.contains_key(&key) {
            return false;
        }
        self.0.insert(key, milestone);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (MilestoneKey, &Milestone)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.0.clear();
    }
}

/// Speed and time of an accepted fix
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeedFix {
    pub speed: f64,
    pub timestamp: TimestampMs,
}

/// What the evaluator sees for the current accepted sample
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    pub speed: f64,
    pub timestamp: TimestampMs,
    pub distance_m: f64,
}

/// Which clock elapsed times are measured on
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimeBasis {
    /// GPS sample timestamps, speed crossings interpolated against the previous fix
    Gps { previous: Option<SpeedFix> },
    /// Wall-clock time at which the sample is processed
    WallClock { now: TimestampMs },
}

/// Instant at which speed crossed `threshold`, by linear interpolation between
/// the previous and current fix. Falls back to the current timestamp when there
/// is no previous fix or speed did not increase.
pub fn interpolate_crossing(previous: Option<SpeedFix>, current: SpeedFix, threshold: f64) -> f64 {
    let current_ts = current.timestamp as f64;
    let Some(prev) = previous else {
        return current_ts;
    };
    if current.speed <= prev.speed || current.timestamp < prev.timestamp {
        return current_ts;
    }

    let prev_ts = prev.timestamp as f64;
    let fraction = (threshold - prev.speed) / (current.speed - prev.speed);
    let crossing = prev_ts + fraction * (current_ts - prev_ts);
    crossing.clamp(prev_ts, current_ts)
}

/// Crossings newly reached by `observation` that are not yet in `recorded`
pub fn evaluate(
    thresholds: &[Threshold],
    recorded: &Milestones,
    origin: TimestampMs,
    observation: &Observation,
    basis: TimeBasis,
) -> Vec<(MilestoneKey, Milestone)> {
    let mut crossed = Vec::new();

    for threshold in thresholds {
        if recorded.contains(threshold.key) {
            continue;
        }

        let instant = match threshold.kind {
            ThresholdKind::Speed => {
                if observation.speed < threshold.value {
                    continue;
                }
                match basis {
                    TimeBasis::Gps { previous } => interpolate_crossing(
                        previous,
                        SpeedFix {
                            speed: observation.speed,
                            timestamp: observation.timestamp,
                        },
                        threshold.value,
                    ),
                    TimeBasis::WallClock { now } => now as f64,
                }
            }
            ThresholdKind::Distance => {
                if observation.distance_m < threshold.value {
                    continue;
                }
                match basis {
                    TimeBasis::Gps { .. } => observation.timestamp as f64,
                    TimeBasis::WallClock { now } => now as f64,
                }
            }
        };

        crossed.push((
            threshold.key,
            Milestone {
                speed_at_crossing: observation.speed,
                elapsed_ms: (instant - origin as f64).max(0.0),
                distance_at_crossing: observation.distance_m,
            },
        ));
    }

    crossed
}

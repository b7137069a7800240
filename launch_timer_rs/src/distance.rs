use crate::types::GpsPoint;
use geo::{HaversineDistance, Point};

/// Great-circle distance in meters between two WGS84 coordinates
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let a = Point::new(lon1, lat1);
    let b = Point::new(lon2, lat2);
    a.haversine_distance(&b)
}

pub fn distance_between(a: &GpsPoint, b: &GpsPoint) -> f64 {
    haversine_m(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Running path length over accepted points.
///
/// Each pushed point contributes the great-circle segment from the
/// previously accepted point, so the total is monotonic.
#[derive(Clone, Debug, Default)]
pub struct DistanceAccumulator {
    last: Option<GpsPoint>,
    total_m: f64,
}

impl DistanceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the predecessor without adding distance
    pub fn seed(&mut self, point: GpsPoint) {
        self.last = Some(point);
    }

    /// Add the segment from the predecessor to `point`; returns the segment length
    pub fn push(&mut self, point: GpsPoint) -> f64 {
        let segment = self
            .last
            .as_ref()
            .map(|prev| distance_between(prev, &point))
            .unwrap_or(0.0);
        self.total_m += segment;
        self.last = Some(point);
        segment
    }

    /// Fold in distance measured elsewhere, moving the predecessor to `last`
    pub fn absorb(&mut self, distance_m: f64, last: Option<GpsPoint>) {
        self.total_m += distance_m.max(0.0);
        if last.is_some() {
            self.last = last;
        }
    }

    pub fn total_m(&self) -> f64 {
        self.total_m
    }

    pub fn last_point(&self) -> Option<&GpsPoint> {
        self.last.as_ref()
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.total_m = 0.0;
    }
}

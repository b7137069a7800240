use crate::drive_tracker::DriveStatus;
use crate::milestones::Milestones;
use crate::run_timer::RunStatus;
use crate::secondary_timer::SecondaryStatus;
use crate::types::{TimestampMs, UnitSystem};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Everything a UI needs to render one frame
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: TimestampMs,
    pub unit_system: UnitSystem,
    pub foreground: bool,
    // Location
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
    pub gps_accuracy: Option<f64>,
    pub current_speed: f64,
    pub current_speed_display: f64,
    // Run
    pub run_status: RunStatus,
    pub run_accuracy_ok: bool,
    pub run_elapsed_ms: i64,
    pub run_distance_m: f64,
    pub run_max_speed: f64,
    pub milestones: Milestones,
    // Cross-check
    pub secondary_status: SecondaryStatus,
    pub secondary_elapsed_ms: i64,
    pub secondary_milestones: Milestones,
    // Drive
    pub drive_status: DriveStatus,
    pub drive_accuracy_ok: bool,
    pub drive_elapsed_ms: i64,
    pub drive_distance_m: f64,
    pub drive_average_speed: f64,
    pub drive_max_speed: f64,
    pub drive_points: usize,
    // Sync
    pub pending_uploads: usize,
}

impl LiveStatus {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

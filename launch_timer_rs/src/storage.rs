//! Completed run and drive records, their export formats and where they are kept.

use crate::drive_tracker::DriveTracker;
use crate::error::{EngineError, EngineResult};
use crate::launch_detector::LaunchDetectionConfig;
use crate::milestones::Milestones;
use crate::run_timer::RunTimer;
use crate::secondary_timer::{MilestoneDrift, SecondaryTimer};
use crate::types::{GpsPoint, TimestampMs, UnitSystem};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// RFC 3339 rendering of an epoch-millisecond timestamp
pub fn rfc3339(timestamp: TimestampMs) -> String {
    Utc.timestamp_millis_opt(timestamp)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRun {
    pub id: String,
    pub completed_at: String,
    pub unit_system: UnitSystem,
    pub launch_detection: LaunchDetectionConfig,
    pub origin_ms: TimestampMs,
    pub elapsed_ms: i64,
    pub max_speed: f64,
    pub distance_m: f64,
    pub milestones: Milestones,
    pub secondary_milestones: Milestones,
    pub drift: Vec<MilestoneDrift>,
    pub route: Vec<GpsPoint>,
}

impl CompletedRun {
    /// Snapshot a completed run. `None` if the run never launched.
    pub fn from_timers(
        run: &RunTimer,
        secondary: &SecondaryTimer,
        completed_at: TimestampMs,
    ) -> Option<Self> {
        let origin = run.origin()?;
        let snapshot = run.snapshot();
        Some(Self {
            id: format!("run_{}", origin),
            completed_at: rfc3339(completed_at),
            unit_system: snapshot.units,
            launch_detection: snapshot.detection,
            origin_ms: origin,
            elapsed_ms: run.elapsed_ms(),
            max_speed: run.max_speed(),
            distance_m: run.distance_m(),
            milestones: run.milestones().clone(),
            secondary_milestones: secondary.milestones().clone(),
            drift: secondary.drift_against(run.milestones()),
            route: run.history().copied().collect(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_gpx_xml(&self) -> String {
        GpxTrack::new(
            format!("Run {}", self.id),
            format!("Launched {}", rfc3339(self.origin_ms)),
            &self.route,
        )
        .to_gpx_xml()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedDrive {
    pub id: String,
    pub started_at: String,
    pub completed_at: String,
    pub elapsed_ms: i64,
    pub distance_m: f64,
    pub average_speed: f64,
    pub max_speed: f64,
    pub route: Vec<GpsPoint>,
}

impl CompletedDrive {
    /// `None` if the drive never started
    pub fn from_tracker(drive: &DriveTracker, completed_at: TimestampMs) -> Option<Self> {
        let started = drive.state().started_at?;
        Some(Self {
            id: format!("drive_{}", started),
            started_at: rfc3339(started),
            completed_at: rfc3339(completed_at),
            elapsed_ms: drive.elapsed_ms(),
            distance_m: drive.distance_m(),
            average_speed: drive.average_speed(),
            max_speed: drive.max_speed(),
            route: drive.history().to_vec(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_gpx_xml(&self) -> String {
        GpxTrack::new(
            format!("Drive {}", self.id),
            format!("Recorded from {}", self.started_at),
            &self.route,
        )
        .to_gpx_xml()
    }
}

/// GPX track format for mapping applications
#[derive(Debug, Serialize)]
pub struct GpxTrack {
    pub name: String,
    pub description: String,
    pub track_points: Vec<GpxPoint>,
}

#[derive(Debug, Serialize)]
pub struct GpxPoint {
    pub lat: f64,
    pub lon: f64,
    pub time: String,
    pub speed: f64,
}

impl GpxTrack {
    pub fn new(name: String, description: String, route: &[GpsPoint]) -> Self {
        let track_points = route
            .iter()
            .map(|p| GpxPoint {
                lat: p.latitude,
                lon: p.longitude,
                time: rfc3339(p.timestamp),
                speed: p.speed,
            })
            .collect();
        Self {
            name,
            description,
            track_points,
        }
    }

    /// Generate GPX 1.1 document
    pub fn to_gpx_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(
            "<gpx version=\"1.1\" creator=\"LaunchTimer\" \
             xmlns=\"http://www.topografix.com/GPX/1/1\">\n",
        );
        xml.push_str("  <metadata>\n");
        xml.push_str(&format!("    <name>{}</name>\n", escape_xml(&self.name)));
        xml.push_str(&format!("    <desc>{}</desc>\n", escape_xml(&self.description)));
        xml.push_str("  </metadata>\n");
        xml.push_str("  <trk>\n");
        xml.push_str(&format!("    <name>{}</name>\n", escape_xml(&self.name)));
        xml.push_str("    <trkseg>\n");

        for point in &self.track_points {
            xml.push_str(&format!(
                "      <trkpt lat=\"{:.7}\" lon=\"{:.7}\">\n",
                point.lat, point.lon
            ));
            xml.push_str(&format!("        <time>{}</time>\n", point.time));
            xml.push_str(&format!(
                "        <extensions><speed>{:.2}</speed></extensions>\n",
                point.speed
            ));
            xml.push_str("      </trkpt>\n");
        }

        xml.push_str("    </trkseg>\n");
        xml.push_str("  </trk>\n");
        xml.push_str("</gpx>\n");
        xml
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Destination for completed records
pub trait RunStore: Send {
    fn save_completed_run(&mut self, run: &CompletedRun) -> EngineResult<()>;
    fn save_completed_drive(&mut self, drive: &CompletedDrive) -> EngineResult<()>;
}

/// One pretty-printed JSON file per record under a directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> EngineResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            EngineError::Storage(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    pub fn load_run(&self, id: &str) -> EngineResult<CompletedRun> {
        let json = fs::read_to_string(self.path_for(id))?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn load_drive(&self, id: &str) -> EngineResult<CompletedDrive> {
        let json = fs::read_to_string(self.path_for(id))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Record ids present in the directory, sorted
    pub fn list_ids(&self) -> EngineResult<Vec<String>> {
        let mut ids: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    return None;
                }
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn write(&self, id: &str, json: String) -> EngineResult<()> {
        let path = self.path_for(id);
        fs::write(&path, json)?;
        log::info!("saved {}", path.display());
        Ok(())
    }
}

impl RunStore for JsonFileStore {
    fn save_completed_run(&mut self, run: &CompletedRun) -> EngineResult<()> {
        self.write(&run.id, run.to_json()?)
    }

    fn save_completed_drive(&mut self, drive: &CompletedDrive) -> EngineResult<()> {
        self.write(&drive.id, drive.to_json()?)
    }
}

#[derive(Debug, Default)]
struct MemoryRecords {
    runs: Vec<CompletedRun>,
    drives: Vec<CompletedDrive>,
}

/// In-process store. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<MemoryRecords>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> Vec<CompletedRun> {
        self.records
            .lock()
            .map(|r| r.runs.clone())
            .unwrap_or_default()
    }

    pub fn drives(&self) -> Vec<CompletedDrive> {
        self.records
            .lock()
            .map(|r| r.drives.clone())
            .unwrap_or_default()
    }

    fn with_records(&self, f: impl FnOnce(&mut MemoryRecords)) -> EngineResult<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| EngineError::Storage("memory store lock poisoned".to_string()))?;
        f(&mut records);
        Ok(())
    }
}

impl RunStore for MemoryStore {
    fn save_completed_run(&mut self, run: &CompletedRun) -> EngineResult<()> {
        self.with_records(|r| r.runs.push(run.clone()))
    }

    fn save_completed_drive(&mut self, drive: &CompletedDrive) -> EngineResult<()> {
        self.with_records(|r| r.drives.push(drive.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::milestones::{Milestone, MilestoneKey};

    fn sample_run() -> CompletedRun {
        let mut milestones = Milestones::new();
        milestones.record(
            MilestoneKey::LowSpeed,
            Milestone {
                speed_at_crossing: 26.9,
                elapsed_ms: 4_210.5,
                distance_at_crossing: 61.0,
            },
        );
        CompletedRun {
            id: "run_1700000000000".to_string(),
            completed_at: rfc3339(1_700_000_012_000),
            unit_system: UnitSystem::Imperial,
            launch_detection: LaunchDetectionConfig::default(),
            origin_ms: 1_700_000_000_000,
            elapsed_ms: 12_000,
            max_speed: 45.0,
            distance_m: 410.0,
            milestones,
            secondary_milestones: Milestones::new(),
            drift: Vec::new(),
            route: vec![
                GpsPoint {
                    latitude: 47.0,
                    longitude: 8.0,
                    speed: 0.0,
                    accuracy: Some(4.0),
                    timestamp: 1_700_000_000_000,
                },
                GpsPoint {
                    latitude: 47.001,
                    longitude: 8.0,
                    speed: 20.0,
                    accuracy: Some(4.0),
                    timestamp: 1_700_000_005_000,
                },
            ],
        }
    }

    #[test]
    fn test_rfc3339() {
        assert_eq!(rfc3339(0), "1970-01-01T00:00:00+00:00");
        assert!(rfc3339(1_700_000_000_123).starts_with("2023-11-14T22:13:20.123"));
    }

    #[test]
    fn test_run_json_round_trip() {
        let run = sample_run();
        let json = run.to_json().unwrap();
        assert!(json.contains("\"low_speed\""));
        let parsed: CompletedRun = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, run);
    }

    #[test]
    fn test_gpx_export() {
        let xml = sample_run().to_gpx_xml();
        assert!(xml.starts_with("<?xml"));
        assert_eq!(xml.matches("<trkpt").count(), 2);
        assert!(xml.contains("lat=\"47.0010000\""));
        assert!(xml.contains("<time>2023-11-14T22:13:25+00:00</time>"));
    }

    #[test]
    fn test_xml_escaping() {
        let track = GpxTrack::new("a<b & c".to_string(), String::new(), &[]);
        assert!(track.to_gpx_xml().contains("<name>a&lt;b &amp; c</name>"));
    }

    #[test]
    fn test_json_file_store() {
        let dir = std::env::temp_dir().join(format!("launch_timer_store_{}", std::process::id()));
        let mut store = JsonFileStore::new(&dir).unwrap();
        let run = sample_run();
        store.save_completed_run(&run).unwrap();

        assert_eq!(store.list_ids().unwrap(), vec![run.id.clone()]);
        assert_eq!(store.load_run(&run.id).unwrap(), run);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_memory_store_shared() {
        let store = MemoryStore::new();
        let mut writer: Box<dyn RunStore> = Box::new(store.clone());
        writer.save_completed_run(&sample_run()).unwrap();
        assert_eq!(store.runs().len(), 1);
        assert!(store.drives().is_empty());
    }
}

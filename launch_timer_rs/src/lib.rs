//! Run & drive timing engine.
//!
//! Accelerometer-triggered acceleration runs timed against GPS milestones,
//! a wall-clock cross-check of the same run, and open-ended drive recording
//! that keeps counting while the host app is suspended.

pub mod background;
pub mod clock;
pub mod config;
pub mod distance;
pub mod drive_tracker;
pub mod engine;
pub mod error;
pub mod launch_detector;
pub mod live_status;
pub mod milestones;
pub mod providers;
pub mod run_timer;
pub mod secondary_timer;
pub mod sensor_hub;
pub mod sim;
pub mod smoothing;
pub mod storage;
pub mod sync;
pub mod types;

pub use background::{BackgroundAccumulator, BackgroundBatch};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::EngineConfig;
pub use drive_tracker::{DriveEvent, DriveStatus, DriveTracker};
pub use engine::{Engine, EngineEvent};
pub use error::{EngineError, EngineResult};
pub use launch_detector::{LaunchDetectionConfig, LaunchDetector};
pub use live_status::LiveStatus;
pub use milestones::{Milestone, MilestoneKey, Milestones};
pub use run_timer::{RunEvent, RunStatus, RunTimer};
pub use secondary_timer::{MilestoneDrift, SecondaryStatus, SecondaryTimer};
pub use sensor_hub::SensorHub;
pub use storage::{CompletedDrive, CompletedRun, JsonFileStore, MemoryStore, RunStore};
pub use sync::{CloudSync, HttpCloudSync, SyncQueue, SyncRecord};
pub use types::{GpsPoint, InertialSample, LocationSample, TimestampMs, UnitSystem};

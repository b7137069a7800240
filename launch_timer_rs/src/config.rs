use crate::error::{EngineError, EngineResult};
use crate::launch_detector::LaunchDetectionConfig;
use crate::types::{UnitSystem, MPS_PER_KMH, MPS_PER_MPH};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Running samples may be this many times worse than the readiness bar
pub const DEFAULT_ACCURACY_MULTIPLIER: f64 = 2.0;

/// Highest GPS speed (m/s) at which a detected launch still counts as a standing start
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RollingStartCeiling {
    pub imperial_mps: f64,
    pub metric_mps: f64,
}

impl RollingStartCeiling {
    pub fn for_units(&self, units: UnitSystem) -> f64 {
        match units {
            UnitSystem::Imperial => self.imperial_mps,
            UnitSystem::Metric => self.metric_mps,
        }
    }
}

impl Default for RollingStartCeiling {
    fn default() -> Self {
        Self {
            // 2 mph
            imperial_mps: 2.0 * MPS_PER_MPH,
            // 3 km/h
            metric_mps: 3.0 * MPS_PER_KMH,
        }
    }
}

/// Read-only settings snapshot supplied by the host application
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub unit_system: UnitSystem,
    /// Readiness bar for runs, meters
    pub accuracy_threshold_m: f64,
    /// Readiness bar for drives, meters
    pub drive_accuracy_threshold_m: f64,
    pub launch_detection: LaunchDetectionConfig,
    pub haptic_feedback_enabled: bool,
    pub auto_save_enabled: bool,
    pub rolling_start_ceiling: RollingStartCeiling,
    pub accuracy_multiplier: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unit_system: UnitSystem::Imperial,
            accuracy_threshold_m: 10.0,
            drive_accuracy_threshold_m: 20.0,
            launch_detection: LaunchDetectionConfig::default(),
            haptic_feedback_enabled: true,
            auto_save_enabled: true,
            rolling_start_ceiling: RollingStartCeiling::default(),
            accuracy_multiplier: DEFAULT_ACCURACY_MULTIPLIER,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(EngineError::Config(format!("{} must be positive, got {}", name, value)))
            }
        };

        positive("accuracy_threshold_m", self.accuracy_threshold_m)?;
        positive("drive_accuracy_threshold_m", self.drive_accuracy_threshold_m)?;
        positive("launch_detection.threshold_g", self.launch_detection.threshold_g)?;
        positive("rolling_start_ceiling.imperial_mps", self.rolling_start_ceiling.imperial_mps)?;
        positive("rolling_start_ceiling.metric_mps", self.rolling_start_ceiling.metric_mps)?;
        if !(self.accuracy_multiplier.is_finite() && self.accuracy_multiplier >= 1.0) {
            return Err(EngineError::Config(format!(
                "accuracy_multiplier must be >= 1, got {}",
                self.accuracy_multiplier
            )));
        }
        if self.launch_detection.consecutive_samples_required == 0 {
            return Err(EngineError::Config(
                "launch_detection.consecutive_samples_required must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Accuracy limit for samples that feed distance and milestones during a run
    pub fn run_accept_limit_m(&self) -> f64 {
        self.accuracy_threshold_m * self.accuracy_multiplier
    }

    pub fn drive_accept_limit_m(&self) -> f64 {
        self.drive_accuracy_threshold_m * self.accuracy_multiplier
    }

    pub fn rolling_start_limit(&self) -> f64 {
        self.rolling_start_ceiling.for_units(self.unit_system)
    }
}

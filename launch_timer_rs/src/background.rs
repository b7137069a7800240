//! Location accumulation while the app is suspended.
//!
//! The platform keeps delivering fixes to a background context that cannot
//! touch the drive tracker. Those fixes land in a shared buffer behind a
//! handle; the foreground drains it exactly once on return and merges the
//! batch. `drain` is the only way data leaves the buffer.

use crate::distance::distance_between;
use crate::error::{EngineError, EngineResult};
use crate::types::{GpsPoint, LocationSample};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Implied speeds above this (m/s) are GPS teleports
pub const MAX_PLAUSIBLE_SPEED_MPS: f64 = 250.0;

/// Reported speed is zeroed when accuracy is worse than this (meters)
pub const SPEED_ACCURACY_CUTOFF_M: f64 = 25.0;

/// Samples accepted while backgrounded, handed over in one piece
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BackgroundBatch {
    pub points: Vec<GpsPoint>,
    pub speed_samples: Vec<f64>,
    pub distance_m: f64,
    pub max_speed: f64,
    pub last_point: Option<GpsPoint>,
    pub rejected: u32,
}

impl BackgroundBatch {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.distance_m == 0.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RejectReason {
    /// No drive is being tracked
    Inactive,
    PoorAccuracy { accuracy: Option<f64> },
    OutOfOrder,
    ImplausibleJump { implied_speed: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SampleVerdict {
    Accepted { segment_m: f64 },
    Rejected(RejectReason),
}

#[derive(Debug, Default)]
struct BackgroundBuffer {
    active: bool,
    accuracy_limit_m: f64,
    anchor: Option<GpsPoint>,
    batch: BackgroundBatch,
}

/// Shared handle to the background buffer. Clones refer to the same buffer.
#[derive(Clone, Debug, Default)]
pub struct BackgroundAccumulator {
    inner: Arc<Mutex<BackgroundBuffer>>,
}

impl BackgroundAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, BackgroundBuffer>> {
        self.inner.lock().map_err(|_| {
            EngineError::Internal("Failed to acquire background buffer lock".to_string())
        })
    }

    /// Drive started or resumed: open a fresh buffer anchored at the last known position
    pub fn begin(&self, anchor: Option<GpsPoint>, accuracy_limit_m: f64) -> EngineResult<()> {
        let mut buffer = self.lock()?;
        *buffer = BackgroundBuffer {
            active: true,
            accuracy_limit_m,
            anchor,
            batch: BackgroundBatch::default(),
        };
        Ok(())
    }

    /// Move the predecessor for the next segment (e.g. on entering background)
    pub fn set_anchor(&self, anchor: Option<GpsPoint>) -> EngineResult<()> {
        let mut buffer = self.lock()?;
        if buffer.active && anchor.is_some() {
            buffer.anchor = anchor;
        }
        Ok(())
    }

    /// Drive stopped: discard everything
    pub fn end(&self) -> EngineResult<()> {
        let mut buffer = self.lock()?;
        *buffer = BackgroundBuffer::default();
        Ok(())
    }

    pub fn is_active(&self) -> EngineResult<bool> {
        Ok(self.lock()?.active)
    }

    /// Validate and accumulate one background fix
    pub fn record(&self, sample: &LocationSample) -> EngineResult<SampleVerdict> {
        let mut buffer = self.lock()?;
        if !buffer.active {
            return Ok(SampleVerdict::Rejected(RejectReason::Inactive));
        }

        let verdict = validate(&buffer, sample);
        match verdict {
            SampleVerdict::Accepted { segment_m } => {
                let mut point = GpsPoint::from(sample);
                if !sample.accuracy_within(SPEED_ACCURACY_CUTOFF_M) {
                    point.speed = 0.0;
                }
                let batch = &mut buffer.batch;
                batch.distance_m += segment_m;
                batch.max_speed = batch.max_speed.max(point.speed);
                batch.speed_samples.push(point.speed);
                batch.points.push(point);
                batch.last_point = Some(point);
                buffer.anchor = Some(point);
            }
            SampleVerdict::Rejected(reason) => {
                buffer.batch.rejected += 1;
                if let RejectReason::ImplausibleJump { implied_speed } = reason {
                    log::warn!(
                        "background fix at {} discarded: implied {:.0} m/s",
                        sample.timestamp,
                        implied_speed
                    );
                } else {
                    log::debug!("background fix at {} rejected: {:?}", sample.timestamp, reason);
                }
            }
        }
        Ok(verdict)
    }

    /// Take everything accumulated so far and clear it. The anchor stays so
    /// accumulation can continue if the app is suspended again.
    pub fn drain(&self) -> EngineResult<BackgroundBatch> {
        let mut buffer = self.lock()?;
        Ok(std::mem::take(&mut buffer.batch))
    }
}

fn validate(buffer: &BackgroundBuffer, sample: &LocationSample) -> SampleVerdict {
    if !sample.accuracy_within(buffer.accuracy_limit_m) {
        return SampleVerdict::Rejected(RejectReason::PoorAccuracy {
            accuracy: sample.horizontal_accuracy,
        });
    }

    let Some(prev) = buffer.anchor else {
        return SampleVerdict::Accepted { segment_m: 0.0 };
    };

    let point = GpsPoint::from(sample);
    let distance = distance_between(&prev, &point);
    let elapsed_s = (sample.timestamp - prev.timestamp) as f64 / 1000.0;
    if elapsed_s <= 0.0 {
        return SampleVerdict::Rejected(RejectReason::OutOfOrder);
    }

    let implied_speed = distance / elapsed_s;
    if implied_speed > MAX_PLAUSIBLE_SPEED_MPS {
        return SampleVerdict::Rejected(RejectReason::ImplausibleJump { implied_speed });
    }
    SampleVerdict::Accepted {
        segment_m: distance,
    }
}

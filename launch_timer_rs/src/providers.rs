//! Platform sensor and feedback seams.
//!
//! The host platform implements these traits; the engine never talks to a
//! sensor API directly. Callbacks may fire on any thread, so they are
//! `Send` and only ever push into a channel (see `sensor_hub`).

use crate::error::EngineResult;
use crate::types::{InertialSample, LocationSample};
use serde::{Deserialize, Serialize};

/// Callback a provider invokes for every sample it produces
pub type SampleCallback<T> = Box<dyn FnMut(T) + Send>;

/// Live registration with a provider. Cancelling (or dropping) detaches the
/// callback; no samples are delivered afterwards.
pub trait Subscription: Send {
    fn cancel(&mut self);
}

pub trait LocationProvider {
    fn check_permission(&self) -> bool;

    /// Ask the user for permission. Returns whether it was granted.
    fn request_permission(&mut self) -> bool;

    /// Begin continuous delivery at the finest available accuracy
    fn start(
        &mut self,
        on_sample: SampleCallback<LocationSample>,
    ) -> EngineResult<Box<dyn Subscription>>;

    fn stop(&mut self);
}

pub trait InertialProvider {
    fn is_available(&self) -> bool;

    /// Requested update interval. Providers may deliver slower.
    fn set_rate(&mut self, interval_ms: u64);

    fn subscribe(
        &mut self,
        on_sample: SampleCallback<InertialSample>,
    ) -> EngineResult<Box<dyn Subscription>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HapticKind {
    Launch,
    Milestone,
    Completed,
}

pub trait HapticFeedback: Send {
    fn pulse(&mut self, kind: HapticKind);
}

/// Haptics sink that only logs, for hosts without a vibrator
#[derive(Debug, Default)]
pub struct LogHaptics;

impl HapticFeedback for LogHaptics {
    fn pulse(&mut self, kind: HapticKind) {
        log::debug!("haptic pulse: {:?}", kind);
    }
}

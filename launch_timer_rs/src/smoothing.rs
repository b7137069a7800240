use std::collections::{HashMap, VecDeque};

pub const DEFAULT_SPEED_WINDOW: usize = 5;

/// Hann-window smoothing of GPS speed for the live readout.
/// Display only; distance and milestones always use raw accepted fixes.
pub struct SpeedSmoother {
    window: VecDeque<f64>,
    window_size: usize,
    weights_cache: HashMap<usize, Vec<f64>>,
    current: f64,
}

impl SpeedSmoother {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        SpeedSmoother {
            window: VecDeque::with_capacity(window_size),
            window_size,
            weights_cache: HashMap::new(),
            current: 0.0,
        }
    }

    /// Push a raw speed (m/s) and return the smoothed value
    pub fn push(&mut self, speed: f64) -> f64 {
        let speed = if speed.is_finite() { speed.max(0.0) } else { 0.0 };
        self.window.push_back(speed);
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }

        let length = self.window.len();
        if length == 1 {
            self.current = speed;
            return speed;
        }

        let weights = self
            .weights_cache
            .entry(length)
            .or_insert_with(|| hann_weights(length));

        self.current = self
            .window
            .iter()
            .zip(weights.iter())
            .map(|(value, weight)| value * weight)
            .sum();
        self.current
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.current = 0.0;
    }
}

impl Default for SpeedSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED_WINDOW)
    }
}

/// Normalized Hann weights. The endpoints of a plain Hann window are zero,
/// so the window is widened by one sample on each side to keep the newest fix.
fn hann_weights(length: usize) -> Vec<f64> {
    if length <= 2 {
        return vec![1.0 / length as f64; length];
    }

    let span = (length + 1) as f64;
    let mut weights: Vec<f64> = (1..=length)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / span).cos())
        .collect();

    let sum: f64 = weights.iter().sum();
    let total = if sum > 0.0 { sum } else { 1.0 };
    weights.iter_mut().for_each(|w| *w /= total);
    weights
}

//! Exponentially weighted moving average of per-unit durations.

/// Samples needed before exponential decay kicks in. Until then the
/// average is a plain arithmetic mean, which avoids wild early readings.
const WARMUP_SAMPLES: u64 = 10;

/// Default decay age, in samples.
const DEFAULT_AGE: f64 = 30.0;

/// A decaying average. Fed seconds-per-unit samples by instrumentation,
/// read by speed decorators at render time. Non-finite samples are
/// discarded without error.
#[derive(Debug, Clone)]
pub(crate) struct MovingAverage {
    alpha: f64,
    value: f64,
    count: u64,
}

impl MovingAverage {
    pub(crate) fn new() -> Self {
        Self::with_age(DEFAULT_AGE)
    }

    /// `age` is the effective number of samples the average looks back at.
    /// Non-positive ages fall back to the default.
    pub(crate) fn with_age(age: f64) -> Self {
        let age = if age > 0.0 { age } else { DEFAULT_AGE };
        MovingAverage {
            alpha: 2.0 / (age + 1.0),
            value: 0.0,
            count: 0,
        }
    }

    pub(crate) fn add(&mut self, sample: f64) {
        if !sample.is_finite() {
            return;
        }
        self.count = self.count.saturating_add(1);
        if self.count <= WARMUP_SAMPLES {
            self.value += (sample - self.value) / self.count as f64;
        } else {
            self.value += self.alpha * (sample - self.value);
        }
    }

    pub(crate) fn value(&self) -> f64 {
        self.value
    }
}

//! Single-pass mean/variance accumulation
//!
//! Welford's online recurrence, numerically stable under unbounded
//! streams. Unlike a windowed estimator there is no sample buffer: the
//! whole history collapses into `(mean, m2, count)`.

/// Standard deviations below this are treated as degenerate; z-scores
/// against them are defined as 0 to avoid division blow-up.
const MIN_STD_DEV: f64 = 0.001;

/// Running mean and variance for one (sensor, attribute) stream.
#[derive(Debug, Clone, Default)]
pub struct OnlineStats {
    mean: f64,
    /// Sum of squared deviations from the running mean.
    m2: f64,
    count: u64,
}

impl OnlineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Z-score of `value` against the distribution seen so far, then fold
    /// the value in. The pre-update ordering matters: the sample being
    /// judged must not contribute to its own baseline.
    pub fn observe(&mut self, value: f64) -> f64 {
        let z = self.z_score(value);
        self.update(value);
        z
    }

    /// Z-score against the current (pre-update) distribution.
    ///
    /// Returns 0.0 while fewer than two samples have been seen or when
    /// the standard deviation is degenerate.
    pub fn z_score(&self, value: f64) -> f64 {
        let std_dev = self.std_dev();
        if self.count < 2 || std_dev < MIN_STD_DEV {
            return 0.0;
        }
        (value - self.mean) / std_dev
    }

    fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance (Bessel-corrected). 0.0 with fewer than two samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

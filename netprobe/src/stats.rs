//! Sample statistics for measurement runs. Mean/median/stddev/CI plus a
//! crude normality check and Tukey-fence outlier handling.

/// An unordered collection of measurement samples.
#[derive(Debug, Clone, Default)]
pub struct SampleSet {
    samples: Vec<f64>,
}

impl SampleSet {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_samples(samples: Vec<f64>) -> Self {
        SampleSet { samples }
    }

    #[inline]
    pub fn add(&mut self, value: f64) {
        self.samples.push(value);
    }

    #[inline]
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn median(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sorted = self.sorted();
        let n = sorted.len();
        if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        }
    }

    /// Sample standard deviation, Bessel-corrected.
    pub fn stddev(&self) -> f64 {
        if self.samples.len() <= 1 {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq: f64 = self.samples.iter().map(|s| (s - mean) * (s - mean)).sum();
        (sum_sq / (self.samples.len() - 1) as f64).sqrt()
    }

    pub fn variance(&self) -> f64 {
        let sd = self.stddev();
        sd * sd
    }

    /// Half-width of the 95% confidence interval, 1.96 * sigma / sqrt(n).
    pub fn confidence_interval(&self) -> f64 {
        if self.samples.len() <= 1 {
            return 0.0;
        }
        1.96 * self.stddev() / (self.samples.len() as f64).sqrt()
    }

    pub fn min(&self) -> f64 {
        self.samples.iter().cloned().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.samples
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Crude skewness/kurtosis normality check; needs at least 20 samples.
    pub fn is_normal(&self) -> bool {
        if self.samples.len() < 20 {
            return false;
        }
        let mean = self.mean();
        let sd = self.stddev();
        if sd == 0.0 {
            return false;
        }
        let n = self.samples.len() as f64;
        let mut skew = 0.0;
        let mut kurt = 0.0;
        for s in &self.samples {
            let z = (s - mean) / sd;
            skew += z * z * z;
            kurt += z * z * z * z;
        }
        skew /= n;
        kurt /= n;
        skew.abs() < 1.0 && (kurt - 3.0).abs() < 2.0
    }

    fn sorted(&self) -> Vec<f64> {
        let mut s = self.samples.clone();
        s.sort_by(|a, b| a.partial_cmp(b).unwrap());
        s
    }

    // Quartiles of the sorted sample. Index-based for n >= 8; linear
    // interpolation below that, where sorted[n/4] lands on degenerate
    // positions.
    fn quartiles(&self) -> Option<(f64, f64)> {
        let n = self.samples.len();
        if n < 4 {
            return None;
        }
        let sorted = self.sorted();
        if n >= 8 {
            Some((sorted[n / 4], sorted[3 * n / 4]))
        } else {
            Some((
                interpolate(&sorted, (n - 1) as f64 * 0.25),
                interpolate(&sorted, (n - 1) as f64 * 0.75),
            ))
        }
    }

    /// Samples outside the Tukey fences [q1 - k*iqr, q3 + k*iqr].
    pub fn detect_outliers(&self, k: f64) -> Vec<f64> {
        let (q1, q3) = match self.quartiles() {
            Some(q) => q,
            None => return Vec::new(),
        };
        let iqr = q3 - q1;
        let lower = q1 - k * iqr;
        let upper = q3 + k * iqr;
        self.samples
            .iter()
            .cloned()
            .filter(|&s| s < lower || s > upper)
            .collect()
    }

    /// Drop samples outside the Tukey fences. Returns true iff the sample
    /// set changed. Idempotent once a pass removes nothing.
    pub fn remove_outliers(&mut self, k: f64) -> bool {
        let (q1, q3) = match self.quartiles() {
            Some(q) => q,
            None => return false,
        };
        let iqr = q3 - q1;
        let lower = q1 - k * iqr;
        let upper = q3 + k * iqr;
        let cleaned: Vec<f64> = self
            .samples
            .iter()
            .cloned()
            .filter(|&s| s >= lower && s <= upper)
            .collect();
        if cleaned.len() < self.samples.len() {
            self.samples = cleaned;
            true
        } else {
            false
        }
    }
}

fn interpolate(sorted: &[f64], pos: f64) -> f64 {
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] + frac * (sorted[hi] - sorted[lo])
    }
}

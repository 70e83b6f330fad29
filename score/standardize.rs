use ndarray::{Array1, ArrayView1};

/// Running mean and sum of squared deviations over the non-missing entries of a vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Moments {
    pub count: usize,
    pub mean: f64,
    pub m2: f64,
}

impl Moments {
    /// Single-pass Welford accumulation. Missing values (`NaN`) are skipped.
    pub fn accumulate(values: ArrayView1<f64>) -> Self {
        let mut moments = Self::default();
        for &x in values.iter().filter(|x| !x.is_nan()) {
            moments.count += 1;
            let delta = x - moments.mean;
            moments.mean += delta / moments.count as f64;
            moments.m2 += delta * (x - moments.mean);
        }
        moments
    }

    /// Sample standard deviation with the `count - 1` denominator.
    ///
    /// With fewer than two observations the result is `NaN` (or `-0.0` for an empty
    /// vector); callers see that as non-finite standardized values.
    pub fn sample_sd(&self) -> f64 {
        (self.m2 / (self.count as f64 - 1.0)).sqrt()
    }

    pub fn is_degenerate(&self) -> bool {
        self.count < 2
    }
}

/// Z-scores one gene's expression vector. Missing entries pass through unchanged.
pub fn standardize(values: ArrayView1<f64>) -> Array1<f64> {
    standardize_with_moments(values).0
}

/// Like [`standardize`], also returning the moments used for centring and scaling.
pub fn standardize_with_moments(values: ArrayView1<f64>) -> (Array1<f64>, Moments) {
    let moments = Moments::accumulate(values);
    let sigma = moments.sample_sd();
    let scaled = values.mapv(|x| if x.is_nan() { x } else { (x - moments.mean) / sigma });
    (scaled, moments)
}

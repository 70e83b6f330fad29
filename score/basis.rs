use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Shape of the spline basis shared by every gene in one scoring run.
///
/// `degrees_of_freedom` is both the number of basis functions kept per gene and the
/// number of probability bins. The intercept basis is always discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplineSpec {
    pub degrees_of_freedom: usize,
    pub degree: usize,
}

impl Default for SplineSpec {
    fn default() -> Self {
        Self {
            degrees_of_freedom: 10,
            degree: 2,
        }
    }
}

impl SplineSpec {
    pub fn validate(&self) -> Result<(), BasisError> {
        if self.degrees_of_freedom < 2 || self.degree >= self.degrees_of_freedom {
            return Err(BasisError::InvalidSpec {
                degrees_of_freedom: self.degrees_of_freedom,
                degree: self.degree,
            });
        }
        Ok(())
    }

    pub fn num_bins(&self) -> usize {
        self.degrees_of_freedom
    }

    pub fn interior_knot_count(&self) -> usize {
        self.degrees_of_freedom - self.degree
    }

    pub fn num_knots(&self) -> usize {
        self.interior_knot_count() + 2 * (self.degree + 1)
    }
}

/// Errors raised while building a spline basis.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BasisError {
    #[error(
        "Invalid spline shape: degrees of freedom ({degrees_of_freedom}) must be at least 2 and greater than the degree ({degree})."
    )]
    InvalidSpec {
        degrees_of_freedom: usize,
        degree: usize,
    },

    #[error("Cannot build a spline basis from an empty sample.")]
    EmptySample,
}

/// Returns the `k/bins` quantiles of `sample` for `0 < k < bins`.
///
/// The sample is sorted with missing values last and each quantile is linearly
/// interpolated between the order statistics around `h = (n - 1) * k / bins + 1`.
/// Entry 0 is never computed and stays `0.0`; knot construction overwrites that slot
/// with the lower boundary, so the value never reaches a basis function.
pub fn quantiles(sample: ArrayView1<f64>, bins: usize) -> Array1<f64> {
    let mut result = Array1::zeros(bins);
    if sample.is_empty() {
        return result;
    }

    let mut sorted = sample.to_vec();
    sorted.sort_by(missing_last);

    let n = sorted.len();
    for k in 1..bins {
        let p = k as f64 / bins as f64;
        let h = (n as f64 - 1.0) * p + 1.0;
        let floor_h = h.floor();
        let lower = floor_h as usize - 1;
        let upper = (floor_h as usize).min(n - 1);
        result[k] = sorted[lower] + (h - floor_h) * (sorted[upper] - sorted[lower]);
    }
    result
}

/// Builds the clamped knot vector for one gene.
///
/// Interior knots are quantiles of `sample`; the first and last `degree + 1` knots
/// repeat `min_x` and `max_x`.
pub fn build_knots(
    sample: ArrayView1<f64>,
    spec: &SplineSpec,
    min_x: f64,
    max_x: f64,
) -> Array1<f64> {
    let interior = spec.interior_knot_count();
    let degree = spec.degree;
    let quantile_values = quantiles(sample, interior + 1);

    let mut knots = Array1::zeros(spec.num_knots());
    for i in 0..=interior {
        knots[i + degree] = quantile_values[i];
    }

    let last = knots.len() - 1;
    for i in 0..=degree {
        knots[i] = min_x;
        knots[last - i] = max_x;
    }
    knots
}

/// Evaluates the B-spline basis of one standardized expression vector.
///
/// Returns a `degrees_of_freedom × sample.len()` matrix: row `r` holds basis function
/// `r + 1` (the intercept basis 0 is dropped). Missing values poison every row they
/// touch. When the upper boundary knot is duplicated inside the knot vector, points at
/// the maximum evaluate to `NaN` in the trailing rows; otherwise the last row is pinned
/// to `1.0` at the maximum so the right boundary is covered.
pub fn bspline_basis(sample: ArrayView1<f64>, spec: &SplineSpec) -> Result<Array2<f64>, BasisError> {
    spec.validate()?;
    if sample.is_empty() {
        return Err(BasisError::EmptySample);
    }

    let (min_x, max_x) = sample_range(sample);
    let knots = build_knots(sample, spec, min_x, max_x);
    let mut basis = internal::evaluate_basis_table(sample, spec, knots.view());

    if !internal::has_duplicated_upper_bound(knots.view(), spec, spec.degree, max_x) {
        let last_row = spec.degrees_of_freedom - 1;
        for (i, &x) in sample.iter().enumerate() {
            if x == max_x {
                basis[[last_row, i]] = 1.0;
            }
        }
    }

    Ok(basis)
}

/// Minimum and maximum of a sample. A single missing value makes both `NaN`.
pub fn sample_range(sample: ArrayView1<f64>) -> (f64, f64) {
    sample
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
            if x.is_nan() || lo.is_nan() {
                (f64::NAN, f64::NAN)
            } else {
                (lo.min(x), hi.max(x))
            }
        })
}

fn missing_last(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b)
        .unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
}

/// Internal module for implementation details not exposed in the public API.
mod internal {
    use super::*;

    /// True when the upper boundary value also occupies knot `dof + degree - 2`.
    ///
    /// Uses exact equality; the boundary handling depends on bit-identical ties.
    pub(super) fn has_duplicated_upper_bound(
        knots: ArrayView1<f64>,
        spec: &SplineSpec,
        degree: usize,
        max_x: f64,
    ) -> bool {
        max_x == knots[spec.degrees_of_freedom + degree - 2]
    }

    /// Cox-de Boor evaluation, bottom-up over degree.
    ///
    /// Level `d` holds the degree-`d` basis functions `j = 1..=dof + (top - d)`, one row
    /// per `j`; each row of level `d` depends only on rows `j` and `j + 1` of level
    /// `d - 1`. Values equal those of the naive recursion evaluated node by node.
    pub(super) fn evaluate_basis_table(
        sample: ArrayView1<f64>,
        spec: &SplineSpec,
        knots: ArrayView1<f64>,
    ) -> Array2<f64> {
        let top = spec.degree;
        let dof = spec.degrees_of_freedom;
        let n = sample.len();
        let upper_knot = knots[knots.len() - 1];

        // Degree 0: indicator of the half-open interval [t_j, t_{j+1}).
        let mut level = Array2::zeros((dof + top, n));
        let duplicated = has_duplicated_upper_bound(knots, spec, 0, upper_knot);
        for row in 0..dof + top {
            let j = row + 1;
            for (i, &x) in sample.iter().enumerate() {
                level[[row, i]] = if is_masked(x, j, 0, dof, upper_knot, duplicated) {
                    f64::NAN
                } else if x >= knots[j] && x < knots[j + 1] {
                    1.0
                } else {
                    0.0
                };
            }
        }

        for d in 1..=top {
            let rows = dof + top - d;
            let duplicated = has_duplicated_upper_bound(knots, spec, d, upper_knot);
            let mut next = Array2::zeros((rows, n));
            for row in 0..rows {
                let j = row + 1;
                let denominator1 = knots[j + d] - knots[j];
                let denominator2 = knots[j + d + 1] - knots[j + 1];
                for (i, &x) in sample.iter().enumerate() {
                    if is_masked(x, j, d, dof, upper_knot, duplicated) {
                        next[[row, i]] = f64::NAN;
                        continue;
                    }
                    let alpha1 = if denominator1 == 0.0 {
                        0.0
                    } else {
                        (x - knots[j]) / denominator1
                    };
                    let alpha2 = if denominator2 == 0.0 {
                        0.0
                    } else {
                        (knots[j + d + 1] - x) / denominator2
                    };
                    next[[row, i]] = alpha1 * level[[row, i]] + alpha2 * level[[row + 1, i]];
                }
            }
            level = next;
        }

        level
    }

    /// A point at the upper boundary is undefined for the trailing basis functions of
    /// a level whose upper boundary knot is duplicated.
    fn is_masked(x: f64, j: usize, d: usize, dof: usize, upper_knot: f64, duplicated: bool) -> bool {
        x == upper_knot && j + d > dof && duplicated
    }
}

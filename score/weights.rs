//! The built-in bin-pair weighting table.
//!
//! Weights fall off linearly with the distance between the two bins, so co-occurrence
//! in matching expression ranges counts fully and co-occurrence at opposite ends of the
//! range counts least. The table is read-only; callers with a different weighting load
//! their own matrix of the same dimensions.
//!
//! This table is not the one behind published SIREN results, so scores computed with it
//! are not comparable to those. Pass the published table with `--weights` to reproduce
//! them.

use crate::types::WeightMatrix;
use ndarray::Array2;

/// Number of bins the built-in table is laid out for.
pub const DEFAULT_BINS: usize = 10;

#[rustfmt::skip]
pub const DEFAULT_WEIGHT_MATRIX: [[f64; DEFAULT_BINS]; DEFAULT_BINS] = [
    [1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4, 0.3, 0.2, 0.1],
    [0.9, 1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4, 0.3, 0.2],
    [0.8, 0.9, 1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4, 0.3],
    [0.7, 0.8, 0.9, 1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4],
    [0.6, 0.7, 0.8, 0.9, 1.0, 0.9, 0.8, 0.7, 0.6, 0.5],
    [0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 0.9, 0.8, 0.7, 0.6],
    [0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 0.9, 0.8, 0.7],
    [0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 0.9, 0.8],
    [0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 0.9],
    [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0],
];

impl Default for WeightMatrix {
    fn default() -> Self {
        WeightMatrix(Array2::from_shape_fn((DEFAULT_BINS, DEFAULT_BINS), |(x, y)| {
            DEFAULT_WEIGHT_MATRIX[x][y]
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_symmetric_and_non_negative() {
        let weights = WeightMatrix::default();
        assert_eq!(weights.shape(), &[DEFAULT_BINS, DEFAULT_BINS]);
        for x in 0..DEFAULT_BINS {
            for y in 0..DEFAULT_BINS {
                assert_eq!(weights[[x, y]], weights[[y, x]]);
                assert!(weights[[x, y]] >= 0.0);
            }
            assert_eq!(weights[[x, x]], 1.0);
        }
    }
}

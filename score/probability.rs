//! Bin probabilities estimated from averaged basis values.
//!
//! Sums run sequentially over conditions in input order and are divided once by the
//! condition count, so repeated runs and the parallel engine agree to the last bit.

use crate::types::{BasisTensor, MarginalProbabilities};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Mean over conditions of one basis row.
fn row_mean(row: ArrayView1<f64>) -> f64 {
    let total = row.iter().fold(0.0, |acc, &v| acc + v);
    total / row.len() as f64
}

/// `Pa[gene][bin]`: the mean basis value of each bin. A `NaN` basis value makes the
/// corresponding entry `NaN`.
pub fn marginal_probabilities(basis: &BasisTensor) -> MarginalProbabilities {
    let mut result = Array2::zeros((basis.num_genes(), basis.num_bins()));
    for (gene, gene_basis) in basis.axis_iter(Axis(0)).enumerate() {
        for (bin, row) in gene_basis.axis_iter(Axis(0)).enumerate() {
            result[[gene, bin]] = row_mean(row);
        }
    }
    MarginalProbabilities(result)
}

/// Marginal probabilities of a single gene's bins × conditions basis matrix.
pub fn gene_marginal(basis: ArrayView2<f64>) -> Array1<f64> {
    basis.axis_iter(Axis(0)).map(row_mean).collect()
}

/// `Pab[x][y]`: the mean over conditions of `basis_a[x] * basis_b[y]`.
pub fn joint_probability(basis_a: ArrayView2<f64>, basis_b: ArrayView2<f64>) -> Array2<f64> {
    let bins_a = basis_a.nrows();
    let bins_b = basis_b.nrows();
    let conditions = basis_a.ncols() as f64;

    let mut result = Array2::zeros((bins_a, bins_b));
    for (x, row_a) in basis_a.axis_iter(Axis(0)).enumerate() {
        for (y, row_b) in basis_b.axis_iter(Axis(0)).enumerate() {
            let total = row_a
                .iter()
                .zip(row_b.iter())
                .fold(0.0, |acc, (&a, &b)| acc + a * b);
            result[[x, y]] = total / conditions;
        }
    }
    result
}

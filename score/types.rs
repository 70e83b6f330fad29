// ========================================================================================
//
//                       Core data types shared by the SIREN engine
//
// ========================================================================================
//
// Only types that cross module boundaries live here. Every wrapper is a thin,
// `#[repr(transparent)]` newtype around an `ndarray` container so the numeric code can
// work on plain arrays while the public API keeps the meaning of each matrix explicit.

use crate::engine::SirenError;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use std::ops::Deref;

// ========================================================================================
//                                   Expression input
// ========================================================================================

/// A genes × conditions matrix of expression values. `NaN` marks a missing value.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct ExpressionMatrix(pub Array2<f64>);

impl ExpressionMatrix {
    pub fn new(values: Array2<f64>) -> Self {
        Self(values)
    }

    /// Builds the matrix from per-gene rows, rejecting ragged input.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, SirenError> {
        let num_conditions = rows.first().map_or(0, Vec::len);
        for (gene, row) in rows.iter().enumerate() {
            if row.len() != num_conditions {
                return Err(SirenError::InvalidDimensions {
                    what: format!("expression row {gene}"),
                    expected: num_conditions,
                    found: row.len(),
                });
            }
        }

        let num_genes = rows.len();
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let matrix = Array2::from_shape_vec((num_genes, num_conditions), flat).map_err(|_| {
            SirenError::InvalidDimensions {
                what: "expression matrix".to_string(),
                expected: num_genes * num_conditions,
                found: 0,
            }
        })?;
        Ok(Self(matrix))
    }

    pub fn num_genes(&self) -> usize {
        self.0.nrows()
    }

    pub fn num_conditions(&self) -> usize {
        self.0.ncols()
    }

    pub fn gene(&self, index: usize) -> ArrayView1<'_, f64> {
        self.0.row(index)
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.0
    }
}

impl Deref for ExpressionMatrix {
    type Target = Array2<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Array2<f64>> for ExpressionMatrix {
    fn from(values: Array2<f64>) -> Self {
        Self(values)
    }
}

// ========================================================================================
//                                    Network input
// ========================================================================================

/// Ordered, zero-based `(gene_a, gene_b)` pairs. Scores are returned in this order.
#[repr(transparent)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EdgeList(pub Vec<(usize, usize)>);

impl EdgeList {
    pub fn new(edges: Vec<(usize, usize)>) -> Self {
        Self(edges)
    }

    pub fn into_inner(self) -> Vec<(usize, usize)> {
        self.0
    }
}

impl Deref for EdgeList {
    type Target = [(usize, usize)];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<(usize, usize)>> for EdgeList {
    fn from(edges: Vec<(usize, usize)>) -> Self {
        Self(edges)
    }
}

impl FromIterator<(usize, usize)> for EdgeList {
    fn from_iter<I: IntoIterator<Item = (usize, usize)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A bins × bins table weighting each pair of bins in the score.
///
/// `Default` yields the built-in table from [`crate::weights`].
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct WeightMatrix(pub Array2<f64>);

impl WeightMatrix {
    pub fn new(values: Array2<f64>) -> Self {
        Self(values)
    }

    pub fn as_view(&self) -> ArrayView2<'_, f64> {
        self.0.view()
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.0
    }
}

impl Deref for WeightMatrix {
    type Target = Array2<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Array2<f64>> for WeightMatrix {
    fn from(values: Array2<f64>) -> Self {
        Self(values)
    }
}

// ========================================================================================
//                                 Intermediate results
// ========================================================================================

/// Basis values for every gene, laid out as one contiguous `[gene, bin, condition]` buffer.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct BasisTensor(pub Array3<f64>);

impl BasisTensor {
    pub fn num_genes(&self) -> usize {
        self.0.len_of(Axis(0))
    }

    pub fn num_bins(&self) -> usize {
        self.0.len_of(Axis(1))
    }

    pub fn num_conditions(&self) -> usize {
        self.0.len_of(Axis(2))
    }

    /// The bins × conditions basis matrix of one gene.
    pub fn gene(&self, index: usize) -> ArrayView2<'_, f64> {
        self.0.index_axis(Axis(0), index)
    }
}

impl Deref for BasisTensor {
    type Target = Array3<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Per-gene marginal bin probabilities (`Pa`), shape genes × bins.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct MarginalProbabilities(pub Array2<f64>);

impl MarginalProbabilities {
    pub fn gene(&self, index: usize) -> ArrayView1<'_, f64> {
        self.0.row(index)
    }
}

impl Deref for MarginalProbabilities {
    type Target = Array2<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// One score per edge, in edge-list order.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreVector(pub Array1<f64>);

impl ScoreVector {
    pub fn into_inner(self) -> Array1<f64> {
        self.0
    }

    pub fn as_view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }
}

impl Deref for ScoreVector {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<ScoreVector> for Vec<f64> {
    fn from(scores: ScoreVector) -> Self {
        scores.0.to_vec()
    }
}

// ========================================================================================
//
//                              The SIREN scoring engine
//
// ========================================================================================
//
// Public boundary of the numeric core. Inputs are validated once, up front; after that
// every stage is a total function that lets degenerate numbers (zero variance, empty
// knot intervals, zero probabilities, missing values) flow through as NaN or infinity.
// Genes are expanded independently and edges are scored independently, so both stages
// fan out over rayon and are gathered back in input order.

use crate::basis::{BasisError, SplineSpec, bspline_basis};
use crate::probability::{joint_probability, marginal_probabilities};
use crate::standardize::standardize_with_moments;
use crate::types::{
    BasisTensor, EdgeList, ExpressionMatrix, MarginalProbabilities, ScoreVector, WeightMatrix,
};
use itertools::iproduct;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use std::fmt;
use thiserror::Error;

/// Edges scored between two progress reports.
const PROGRESS_CHUNK_EDGES: usize = 4096;

/// Errors raised at the engine boundary, before any computation begins.
#[derive(Error, Debug)]
pub enum SirenError {
    #[error("Invalid dimensions for {what}: expected {expected}, found {found}.")]
    InvalidDimensions {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error(
        "Edge {edge} refers to gene index {index}, but the expression matrix only has {gene_count} genes."
    )]
    IndexOutOfRange {
        edge: usize,
        index: usize,
        gene_count: usize,
    },

    #[error("The expression matrix has genes but no conditions.")]
    NoConditions,

    #[error("Spline basis construction failed: {0}")]
    Basis(#[from] BasisError),
}

// ========================================================================================
//                                  Progress reporting
// ========================================================================================

/// Stages reported while scoring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScoreStage {
    Basis,
    Scoring,
}

impl ScoreStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Basis => "per-gene spline basis",
            Self::Scoring => "edge scoring",
        }
    }
}

impl fmt::Display for ScoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for incremental progress. Calls always arrive from the calling thread.
pub trait ScoreProgressObserver {
    fn on_stage_start(&mut self, stage: ScoreStage, total: usize) {
        let _ = (stage, total);
    }
    fn on_stage_advance(&mut self, stage: ScoreStage, processed: usize) {
        let _ = (stage, processed);
    }
    fn on_stage_finish(&mut self, stage: ScoreStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopScoreProgress;

impl ScoreProgressObserver for NoopScoreProgress {}

// ========================================================================================
//                                      The engine
// ========================================================================================

/// Scores edges for one spline shape. Holds no state between calls.
#[derive(Debug, Clone, Copy)]
pub struct ScoreEngine {
    spec: SplineSpec,
    parallel: bool,
}

impl Default for ScoreEngine {
    fn default() -> Self {
        Self {
            spec: SplineSpec::default(),
            parallel: true,
        }
    }
}

impl ScoreEngine {
    pub fn new(spec: SplineSpec) -> Result<Self, SirenError> {
        spec.validate()?;
        Ok(Self {
            spec,
            parallel: true,
        })
    }

    /// Runs both stages on the calling thread when `parallel` is false.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn spec(&self) -> &SplineSpec {
        &self.spec
    }

    /// Scores every edge. Without `weights` the built-in table is used, which requires
    /// the default ten bins.
    pub fn compute_scores(
        &self,
        expression: &ExpressionMatrix,
        edges: &EdgeList,
        weights: Option<&WeightMatrix>,
    ) -> Result<ScoreVector, SirenError> {
        self.compute_scores_with_progress(expression, edges, weights, &mut NoopScoreProgress)
    }

    pub fn compute_scores_with_progress(
        &self,
        expression: &ExpressionMatrix,
        edges: &EdgeList,
        weights: Option<&WeightMatrix>,
        observer: &mut dyn ScoreProgressObserver,
    ) -> Result<ScoreVector, SirenError> {
        let default_weights;
        let weights = match weights {
            Some(weights) => weights,
            None => {
                default_weights = WeightMatrix::default();
                &default_weights
            }
        };
        self.validate(expression, edges, weights)?;

        log::info!(
            "Scoring {} edges across {} genes and {} conditions ({} bins, degree {})",
            edges.len(),
            expression.num_genes(),
            expression.num_conditions(),
            self.spec.num_bins(),
            self.spec.degree
        );

        let basis = self.basis_tensor(expression, observer)?;
        let marginals = marginal_probabilities(&basis);
        Ok(self.score_edges(&basis, &marginals, edges, weights, observer))
    }

    /// Fail-fast checks for everything the numeric stages cannot recover from.
    pub fn validate(
        &self,
        expression: &ExpressionMatrix,
        edges: &EdgeList,
        weights: &WeightMatrix,
    ) -> Result<(), SirenError> {
        let gene_count = expression.num_genes();
        if gene_count > 0 && expression.num_conditions() == 0 {
            return Err(SirenError::NoConditions);
        }

        let bins = self.spec.num_bins();
        if weights.nrows() != bins {
            return Err(SirenError::InvalidDimensions {
                what: "weight matrix rows".to_string(),
                expected: bins,
                found: weights.nrows(),
            });
        }
        if weights.ncols() != bins {
            return Err(SirenError::InvalidDimensions {
                what: "weight matrix columns".to_string(),
                expected: bins,
                found: weights.ncols(),
            });
        }

        for (edge, &(gene_a, gene_b)) in edges.iter().enumerate() {
            for index in [gene_a, gene_b] {
                if index >= gene_count {
                    return Err(SirenError::IndexOutOfRange {
                        edge,
                        index,
                        gene_count,
                    });
                }
            }
        }
        Ok(())
    }

    /// Standardizes each gene and expands it into its bins × conditions basis matrix.
    pub fn basis_tensor(
        &self,
        expression: &ExpressionMatrix,
        observer: &mut dyn ScoreProgressObserver,
    ) -> Result<BasisTensor, SirenError> {
        let genes = expression.num_genes();
        let conditions = expression.num_conditions();
        let spec = self.spec;

        let expand = |gene: usize| -> Result<Array2<f64>, BasisError> {
            let (scaled, moments) = standardize_with_moments(expression.gene(gene));
            if moments.is_degenerate() {
                log::warn!(
                    "Gene {gene} has {} non-missing values; its basis is undefined and its edges score from NaN bins.",
                    moments.count
                );
            }
            bspline_basis(scaled.view(), &spec)
        };

        observer.on_stage_start(ScoreStage::Basis, genes);
        let per_gene: Vec<Array2<f64>> = if self.parallel {
            (0..genes)
                .into_par_iter()
                .map(expand)
                .collect::<Result<_, _>>()?
        } else {
            (0..genes).map(expand).collect::<Result<_, _>>()?
        };

        let mut tensor = Array3::zeros((genes, spec.num_bins(), conditions));
        for (gene, basis) in per_gene.iter().enumerate() {
            tensor.index_axis_mut(Axis(0), gene).assign(basis);
        }
        observer.on_stage_advance(ScoreStage::Basis, genes);
        observer.on_stage_finish(ScoreStage::Basis);

        log::debug!("Built basis tensor with shape {:?}", tensor.shape());
        Ok(BasisTensor(tensor))
    }

    /// Scores each edge from precomputed basis values and marginals.
    pub fn score_edges(
        &self,
        basis: &BasisTensor,
        marginals: &MarginalProbabilities,
        edges: &EdgeList,
        weights: &WeightMatrix,
        observer: &mut dyn ScoreProgressObserver,
    ) -> ScoreVector {
        let weights = weights.as_view();
        let score_one = |&(gene_a, gene_b): &(usize, usize)| -> f64 {
            let joint = joint_probability(basis.gene(gene_a), basis.gene(gene_b));
            edge_score(
                joint.view(),
                marginals.gene(gene_a),
                marginals.gene(gene_b),
                weights,
            )
        };

        observer.on_stage_start(ScoreStage::Scoring, edges.len());
        let mut scores: Vec<f64> = Vec::with_capacity(edges.len());
        for chunk in edges.chunks(PROGRESS_CHUNK_EDGES) {
            if self.parallel {
                scores.par_extend(chunk.par_iter().map(&score_one));
            } else {
                scores.extend(chunk.iter().map(&score_one));
            }
            observer.on_stage_advance(ScoreStage::Scoring, scores.len());
        }
        observer.on_stage_finish(ScoreStage::Scoring);

        let non_finite = scores.iter().filter(|s| !s.is_finite()).count();
        if non_finite > 0 {
            log::warn!("{non_finite} of {} edge scores are not finite", scores.len());
        }

        ScoreVector(Array1::from_vec(scores))
    }
}

/// The SIREN score of one edge.
///
/// Sums `Pab * W * ln(Pab / Pa / Pb)` over every bin pair whose log ratio is strictly
/// positive. Pairs whose ratio is `NaN` (missing or empty bins) contribute nothing.
pub fn edge_score(
    joint: ArrayView2<f64>,
    marginal_a: ArrayView1<f64>,
    marginal_b: ArrayView1<f64>,
    weights: ArrayView2<f64>,
) -> f64 {
    let mut score = 0.0;
    for (x, y) in iproduct!(0..marginal_a.len(), 0..marginal_b.len()) {
        let pab = joint[[x, y]];
        let term = (pab / marginal_a[x] / marginal_b[y]).ln();
        if term > 0.0 {
            score += pab * weights[[x, y]] * term;
        }
    }
    score
}

/// Scores `edges` with the default spline shape (10 bins, quadratic basis).
pub fn compute_scores(
    expression: &ExpressionMatrix,
    edges: &EdgeList,
    weights: Option<&WeightMatrix>,
) -> Result<ScoreVector, SirenError> {
    ScoreEngine::default().compute_scores(expression, edges, weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, array};

    /// Deterministic, gently non-linear expression data for `genes` genes.
    fn synthetic_expression(genes: usize, conditions: usize) -> ExpressionMatrix {
        let matrix = Array::from_shape_fn((genes, conditions), |(g, c)| {
            let t = c as f64 / conditions as f64;
            let phase = g as f64 * 0.7;
            (6.0 * t + phase).sin() + 0.3 * ((13 * c + 7 * g) % 11) as f64 / 11.0 + g as f64
        });
        ExpressionMatrix::new(matrix)
    }

    fn all_pairs(genes: usize) -> EdgeList {
        iproduct!(0..genes, 0..genes).filter(|(a, b)| a != b).collect()
    }

    #[derive(Default)]
    struct Recorder {
        starts: Vec<(ScoreStage, usize)>,
        last_advance: Option<(ScoreStage, usize)>,
        finished: Vec<ScoreStage>,
    }

    impl ScoreProgressObserver for Recorder {
        fn on_stage_start(&mut self, stage: ScoreStage, total: usize) {
            self.starts.push((stage, total));
        }
        fn on_stage_advance(&mut self, stage: ScoreStage, processed: usize) {
            self.last_advance = Some((stage, processed));
        }
        fn on_stage_finish(&mut self, stage: ScoreStage) {
            self.finished.push(stage);
        }
    }

    #[test]
    fn scores_are_non_negative_and_one_per_edge() {
        let expression = synthetic_expression(5, 40);
        let edges = all_pairs(5);
        let scores = compute_scores(&expression, &edges, None).unwrap();
        assert_eq!(scores.len(), edges.len());
        assert!(scores.iter().all(|&s| s >= 0.0), "scores: {}", scores.as_view());
    }

    #[test]
    fn sequential_and_parallel_runs_agree_exactly() {
        let expression = synthetic_expression(6, 35);
        let edges = all_pairs(6);
        let engine = ScoreEngine::default();
        let parallel = engine.compute_scores(&expression, &edges, None).unwrap();
        let sequential = engine
            .with_parallel(false)
            .compute_scores(&expression, &edges, None)
            .unwrap();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let expression = synthetic_expression(4, 30);
        let edges = all_pairs(4);
        let first = compute_scores(&expression, &edges, None).unwrap();
        let second = compute_scores(&expression, &edges, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn gene_paired_with_itself_scores_above_zero() {
        let expression = synthetic_expression(2, 50);
        let edges = EdgeList::new(vec![(0, 0), (1, 1)]);
        let scores = compute_scores(&expression, &edges, None).unwrap();
        assert!(scores.iter().all(|&s| s > 0.0));
    }

    #[test]
    fn independent_bins_contribute_nothing() {
        let basis_a = array![[0.2, 0.6, 1.0, 0.0], [0.8, 0.4, 0.0, 1.0]];
        let basis_b = array![[0.5, 0.5, 0.5, 0.5], [0.5, 0.5, 0.5, 0.5]];
        let joint = joint_probability(basis_a.view(), basis_b.view());
        let pa = crate::probability::gene_marginal(basis_a.view());
        let pb = crate::probability::gene_marginal(basis_b.view());
        let weights = Array2::ones((2, 2));
        let score = edge_score(joint.view(), pa.view(), pb.view(), weights.view());
        assert_abs_diff_eq!(score, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn edge_score_matches_hand_computation() {
        // Perfectly co-occurring indicators: Pab = diag(0.5, 0.5), Pa = Pb = (0.5, 0.5).
        let basis = array![[1.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 1.0]];
        let joint = joint_probability(basis.view(), basis.view());
        let marginal = crate::probability::gene_marginal(basis.view());
        let weights = array![[1.0, 0.0], [0.0, 0.5]];
        let score = edge_score(joint.view(), marginal.view(), marginal.view(), weights.view());
        let expected = 0.5 * 1.0 * 2f64.ln() + 0.5 * 0.5 * 2f64.ln();
        assert_abs_diff_eq!(score, expected, epsilon = 1e-15);
    }

    #[test]
    fn zero_weights_give_zero_scores() {
        let expression = synthetic_expression(3, 25);
        let edges = all_pairs(3);
        let weights = WeightMatrix::new(Array2::zeros((10, 10)));
        let scores = compute_scores(&expression, &edges, Some(&weights)).unwrap();
        assert!(scores.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn out_of_range_edge_is_rejected_before_scoring() {
        let expression = synthetic_expression(3, 20);
        let edges = EdgeList::new(vec![(0, 1), (2, 3)]);
        match compute_scores(&expression, &edges, None).unwrap_err() {
            SirenError::IndexOutOfRange {
                edge,
                index,
                gene_count,
            } => {
                assert_eq!((edge, index, gene_count), (1, 3, 3));
            }
            other => panic!("Expected IndexOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn weight_matrix_must_match_bin_count() {
        let expression = synthetic_expression(3, 20);
        let edges = EdgeList::new(vec![(0, 1)]);
        let weights = WeightMatrix::new(Array2::ones((10, 9)));
        match compute_scores(&expression, &edges, Some(&weights)).unwrap_err() {
            SirenError::InvalidDimensions {
                expected, found, ..
            } => assert_eq!((expected, found), (10, 9)),
            other => panic!("Expected InvalidDimensions, got {other:?}"),
        }

        let engine = ScoreEngine::new(SplineSpec {
            degrees_of_freedom: 8,
            degree: 2,
        })
        .unwrap();
        assert!(matches!(
            engine.compute_scores(&expression, &edges, None),
            Err(SirenError::InvalidDimensions { expected: 8, .. })
        ));
    }

    #[test]
    fn conditions_are_required() {
        let expression = ExpressionMatrix::new(Array2::zeros((2, 0)));
        let edges = EdgeList::new(vec![(0, 1)]);
        assert!(matches!(
            compute_scores(&expression, &edges, None),
            Err(SirenError::NoConditions)
        ));
    }

    #[test]
    fn empty_network_yields_empty_scores() {
        let expression = synthetic_expression(2, 10);
        let scores = compute_scores(&expression, &EdgeList::default(), None).unwrap();
        assert!(scores.is_empty());
    }

    #[test]
    fn invalid_spline_shape_is_rejected() {
        let err = ScoreEngine::new(SplineSpec {
            degrees_of_freedom: 2,
            degree: 2,
        })
        .unwrap_err();
        assert!(matches!(err, SirenError::Basis(BasisError::InvalidSpec { .. })));
    }

    #[test]
    fn missing_value_leaves_scores_finite_and_non_negative() {
        let mut matrix = synthetic_expression(3, 30).into_inner();
        matrix[[1, 4]] = f64::NAN;
        let expression = ExpressionMatrix::new(matrix);
        let edges = all_pairs(3);

        let engine = ScoreEngine::default();
        let basis = engine.basis_tensor(&expression, &mut NoopScoreProgress).unwrap();
        let marginals = marginal_probabilities(&basis);
        assert!(marginals.gene(1).iter().any(|p| p.is_nan()));
        assert!(marginals.gene(0).iter().all(|p| p.is_finite()));

        let scores = engine.compute_scores(&expression, &edges, None).unwrap();
        assert!(scores.iter().all(|&s| s >= 0.0));
    }

    #[test]
    fn progress_reports_every_stage() {
        let expression = synthetic_expression(4, 20);
        let edges = all_pairs(4);
        let mut recorder = Recorder::default();
        ScoreEngine::default()
            .compute_scores_with_progress(&expression, &edges, None, &mut recorder)
            .unwrap();

        assert_eq!(
            recorder.starts,
            vec![(ScoreStage::Basis, 4), (ScoreStage::Scoring, edges.len())]
        );
        assert_eq!(
            recorder.last_advance,
            Some((ScoreStage::Scoring, edges.len()))
        );
        assert_eq!(recorder.finished, vec![ScoreStage::Basis, ScoreStage::Scoring]);
    }
}

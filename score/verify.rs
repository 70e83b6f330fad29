//! Comparison of computed scores against a reference result.

use crate::engine::SirenError;

/// One edge whose computed score differs from the reference by more than the tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreMismatch {
    /// Zero-based position of the edge in the network.
    pub edge: usize,
    pub computed: f64,
    pub expected: f64,
    pub difference: f64,
}

/// Returns every edge where `|computed - expected|` exceeds `tolerance`.
///
/// A non-finite difference always counts as a mismatch. Both slices must have one entry
/// per edge.
pub fn compare_scores(
    computed: &[f64],
    expected: &[f64],
    tolerance: f64,
) -> Result<Vec<ScoreMismatch>, SirenError> {
    if computed.len() != expected.len() {
        return Err(SirenError::InvalidDimensions {
            what: "reference scores".to_string(),
            expected: computed.len(),
            found: expected.len(),
        });
    }

    let mismatches = computed
        .iter()
        .zip(expected)
        .enumerate()
        .filter_map(|(edge, (&computed, &expected))| {
            let difference = (computed - expected).abs();
            (!(difference <= tolerance)).then_some(ScoreMismatch {
                edge,
                computed,
                expected,
                difference,
            })
        })
        .collect();
    Ok(mismatches)
}

//! Thresholded eigen-spectra of symmetric PSD matrices.
//!
//! The KCI null distribution only needs the dominant part of each spectrum. An
//! [`EigenSummary`] keeps the eigenvalues `λ` with `λ ≥ threshold · λ_max` and `λ > 0`,
//! sorted descending, capped at `max_count`. Negative and near-zero eigenvalues come from
//! rounding on a PSD matrix and are discarded.
//!
//! The unconditional test only needs values, so [`eigenvalues`] never forms
//! eigenvectors; [`eigenpairs`] does.

use nalgebra::SymmetricEigen;
use ndarray::{Array2, ArrayView2};

use crate::bridge::to_dmatrix;

/// Retained eigenvalues (descending) and, optionally, their eigenvectors.
///
/// Invariant: every value is `> 0` and `≥ threshold · max`; column `i` of `vectors`
/// belongs to `values[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenSummary {
    values: Vec<f64>,
    vectors: Option<Array2<f64>>,
}

impl EigenSummary {
    pub fn empty() -> Self {
        Self {
            values: Vec::new(),
            vectors: None,
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// n×k matrix of eigenvectors, present only for [`eigenpairs`] summaries.
    pub fn vectors(&self) -> Option<&Array2<f64>> {
        self.vectors.as_ref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `V · diag(√λ)`: eigenvectors scaled so that `(V√Λ)(V√Λ)ᵀ` reproduces the retained
    /// part of the matrix.
    pub fn scaled_vectors(&self) -> Option<Array2<f64>> {
        let v = self.vectors.as_ref()?;
        let mut scaled = v.clone();
        for (mut col, &lambda) in scaled.columns_mut().into_iter().zip(&self.values) {
            col *= lambda.sqrt();
        }
        Some(scaled)
    }
}

/// Eigenvalues of symmetric `m` above `threshold · max`, at most `max_count` of them.
///
/// # Example
///
/// ```rust
/// use kci::eigen::eigenvalues;
/// use ndarray::array;
///
/// let m = array![[4.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1e-9]];
/// let summary = eigenvalues(m.view(), 1e-3, usize::MAX);
/// assert_eq!(summary.values().len(), 2);
/// assert!((summary.values()[0] - 4.0).abs() < 1e-12);
/// ```
pub fn eigenvalues(m: ArrayView2<'_, f64>, threshold: f64, max_count: usize) -> EigenSummary {
    if m.nrows() == 0 {
        return EigenSummary::empty();
    }
    let raw = to_dmatrix(m).symmetric_eigenvalues();
    let keep = retained(raw.as_slice(), threshold, max_count);
    EigenSummary {
        values: keep.iter().map(|&i| raw[i]).collect(),
        vectors: None,
    }
}

/// Eigenpairs of symmetric `m` above `threshold · max`, at most `max_count` of them.
pub fn eigenpairs(m: ArrayView2<'_, f64>, threshold: f64, max_count: usize) -> EigenSummary {
    let n = m.nrows();
    if n == 0 {
        return EigenSummary::empty();
    }
    let eig = SymmetricEigen::new(to_dmatrix(m));
    let keep = retained(eig.eigenvalues.as_slice(), threshold, max_count);

    let vectors = Array2::from_shape_fn((n, keep.len()), |(r, c)| eig.eigenvectors[(r, keep[c])]);
    EigenSummary {
        values: keep.iter().map(|&i| eig.eigenvalues[i]).collect(),
        vectors: Some(vectors),
    }
}

/// Indices of the retained eigenvalues, largest first.
fn retained(values: &[f64], threshold: f64, max_count: usize) -> Vec<usize> {
    let max = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if !(max > 0.0) {
        return Vec::new();
    }
    let cutoff = threshold * max;

    let mut idx: Vec<usize> = (0..values.len())
        .filter(|&i| values[i].is_finite() && values[i] > 0.0 && values[i] >= cutoff)
        .collect();
    idx.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    idx.truncate(max_count);
    idx
}

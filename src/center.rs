//! Double centering of Gram matrices.
//!
//! Centering a Gram matrix removes the sample mean in feature space:
//! `Kc = HKH` with `H = I − 11ᵀ/n`. Multiplying by `H` costs O(n³); the same matrix is
//! `Kc[i,j] = K[i,j] − r̄ᵢ − c̄ⱼ + ḡ` with row, column and grand means, which is O(n²)
//! and needs no cached `H`.

use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Double-centers `k`: subtract row and column means, add back the grand mean.
///
/// Row and column sums of the result are zero up to rounding.
///
/// # Example
///
/// ```rust
/// use kci::center::center_gram;
/// use ndarray::array;
///
/// let k = array![[2.0, 1.0], [1.0, 4.0]];
/// let kc = center_gram(k.view());
/// assert!(kc.sum_axis(ndarray::Axis(0)).iter().all(|s| s.abs() < 1e-12));
/// ```
pub fn center_gram(k: ArrayView2<'_, f64>) -> Array2<f64> {
    let n = k.nrows();
    if n == 0 {
        return Array2::zeros((0, 0));
    }
    let inv_n = 1.0 / n as f64;
    let row_means: Array1<f64> = k.sum_axis(Axis(1)) * inv_n;
    let col_means: Array1<f64> = k.sum_axis(Axis(0)) * inv_n;
    let grand = row_means.sum() * inv_n;

    Array2::from_shape_fn((n, k.ncols()), |(i, j)| {
        k[[i, j]] - row_means[i] - col_means[j] + grand
    })
}

/// Returns `(m + mᵀ) / 2`, removing floating-point asymmetry left by products.
pub fn symmetrize(m: ArrayView2<'_, f64>) -> Array2<f64> {
    (&m + &m.t()) * 0.5
}

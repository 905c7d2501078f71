//! Ridge residualization on the conditioning set.
//!
//! For a centered conditioning kernel `Kz`, `Rz = ε(Kz + εI)⁻¹ = I − Kz(Kz + εI)⁻¹` is the
//! residual-maker of kernel ridge regression on Z with penalty ε. As ε → 0 it tends to the
//! projection onto the null space of `Kz`; a positive ε keeps it invertible. Any kernel is
//! conditioned on Z as `Rz·K·Rz`.

use nalgebra::Cholesky;
use ndarray::{Array2, ArrayView2};

use crate::bridge::{to_array, to_dmatrix};
use crate::center::symmetrize;
use crate::{Error, Result};

/// Computes `ε(Kz + εI)⁻¹`.
///
/// Inverts through a Cholesky factorization; if `Kz + εI` is not numerically positive
/// definite, falls back to an LU inverse. Fails with [`Error::SingularMatrix`] when that
/// also fails or produces non-finite entries.
///
/// # Example
///
/// ```rust
/// use kci::ridge::ridge_residualizer;
/// use ndarray::Array2;
///
/// // A zero conditioning kernel explains nothing: Rz = I.
/// let rz = ridge_residualizer(Array2::<f64>::zeros((3, 3)).view(), 1e-3).unwrap();
/// assert!((rz[[1, 1]] - 1.0).abs() < 1e-12);
/// assert!(rz[[0, 1]].abs() < 1e-12);
/// ```
pub fn ridge_residualizer(kz: ArrayView2<'_, f64>, epsilon: f64) -> Result<Array2<f64>> {
    let n = kz.nrows();
    if kz.ncols() != n {
        return Err(Error::DimensionMismatch(n, kz.ncols()));
    }

    let mut a = to_dmatrix(kz);
    for i in 0..n {
        a[(i, i)] += epsilon;
    }

    let inverse = match Cholesky::new(a.clone()) {
        Some(chol) => chol.inverse(),
        None => {
            log::warn!("Cholesky of Kz + εI failed (n={n}, ε={epsilon}); falling back to LU inverse");
            a.try_inverse()
                .ok_or(Error::SingularMatrix { n, epsilon })?
        }
    };
    if inverse.iter().any(|v| !v.is_finite()) {
        return Err(Error::SingularMatrix { n, epsilon });
    }

    Ok(to_array(&(inverse * epsilon)))
}

/// Conditions `k` on Z: `symmetrize(Rz·K·Rz)`.
pub fn residualize(rz: ArrayView2<'_, f64>, k: ArrayView2<'_, f64>) -> Array2<f64> {
    let m = rz.dot(&k).dot(&rz);
    symmetrize(m.view())
}

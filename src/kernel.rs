//! Kernels and Gram matrices.
//!
//! A Gram matrix is built over the selected rows and **all selected columns jointly**:
//! the Gaussian kernel uses the Euclidean distance in the combined space, and the dot
//! product kernels use the combined dot product. There is no per-column averaging.

use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::Rng;

use crate::bandwidth::{sanitize, BandwidthRule};
use crate::config::KernelKind;

// =============================================================================
// Kernel Functions
// =============================================================================

/// Radial Basis Function (Gaussian) kernel: k(x, y) = exp(-||x-y||² / (2h²))
///
/// # Example
///
/// ```rust
/// use kci::kernel::rbf;
///
/// let k = rbf(&[0.0, 0.0], &[1.0, 0.0], 1.0);
/// // exp(-1/2) ≈ 0.606
/// assert!((k - 0.606).abs() < 0.01);
/// ```
pub fn rbf(x: &[f64], y: &[f64], bandwidth: f64) -> f64 {
    gaussian_from_sq_dist(sq_dist(x.iter(), y.iter()), bandwidth)
}

/// Linear kernel: k(x, y) = ⟨x, y⟩
pub fn linear(x: &[f64], y: &[f64]) -> f64 {
    dot(x.iter(), y.iter())
}

/// Polynomial kernel: k(x, y) = (γ⟨x,y⟩ + c)^d
///
/// ```rust
/// use kci::kernel::polynomial;
///
/// // (1*3 + 2*4 + 1)² = 144
/// let k = polynomial(&[1.0, 2.0], &[3.0, 4.0], 2, 1.0, 1.0);
/// assert!((k - 144.0).abs() < 1e-10);
/// ```
pub fn polynomial(x: &[f64], y: &[f64], degree: u32, gamma: f64, coef0: f64) -> f64 {
    poly_from_dot(dot(x.iter(), y.iter()), degree, gamma, coef0)
}

fn sq_dist<'a>(x: impl Iterator<Item = &'a f64>, y: impl Iterator<Item = &'a f64>) -> f64 {
    x.zip(y).map(|(a, b)| (a - b).powi(2)).sum()
}

fn dot<'a>(x: impl Iterator<Item = &'a f64>, y: impl Iterator<Item = &'a f64>) -> f64 {
    x.zip(y).map(|(a, b)| a * b).sum()
}

fn gaussian_from_sq_dist(d2: f64, bandwidth: f64) -> f64 {
    (-d2 / (2.0 * bandwidth * bandwidth)).exp()
}

fn poly_from_dot(dot: f64, degree: u32, gamma: f64, coef0: f64) -> f64 {
    let base = gamma * dot + coef0;
    match degree {
        1 => base,
        2 => base * base,
        d => base.powi(d as i32),
    }
}

// =============================================================================
// Resolved kernels
// =============================================================================

/// A fully specified kernel, bandwidth included.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kernel {
    Gaussian { bandwidth: f64 },
    Linear,
    Polynomial { degree: u32, gamma: f64, coef0: f64 },
}

impl Kernel {
    /// Fixes the data-dependent parts of `kind` for the given columns.
    ///
    /// Gaussian bandwidths are `rule(data) × scaling`, after a degenerate rule result has
    /// been replaced by 1.0.
    pub fn resolve<R: Rng + ?Sized>(
        kind: &KernelKind,
        data: ArrayView2<'_, f64>,
        rule: &BandwidthRule,
        scaling: f64,
        rng: &mut R,
    ) -> Kernel {
        match *kind {
            KernelKind::Gaussian => Kernel::Gaussian {
                bandwidth: sanitize(rule.select(data, rng)) * scaling,
            },
            KernelKind::Linear => Kernel::Linear,
            KernelKind::Polynomial {
                degree,
                gamma,
                coef0,
            } => Kernel::Polynomial {
                degree,
                gamma,
                coef0,
            },
        }
    }

    fn eval_rows(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        match *self {
            Kernel::Gaussian { bandwidth } => {
                gaussian_from_sq_dist(sq_dist(a.iter(), b.iter()), sanitize(bandwidth))
            }
            Kernel::Linear => dot(a.iter(), b.iter()),
            Kernel::Polynomial {
                degree,
                gamma,
                coef0,
            } => poly_from_dot(dot(a.iter(), b.iter()), degree, gamma, coef0),
        }
    }
}

// =============================================================================
// Kernel Matrices
// =============================================================================

/// Gram matrix K[i,j] = k(uᵢ, uⱼ) over the rows of `data`.
///
/// With zero columns the result is the all-ones matrix, the Gram matrix of the constant
/// kernel; this is what an empty conditioning set contributes.
///
/// # Example
///
/// ```rust
/// use kci::kernel::{gram_matrix, Kernel};
/// use ndarray::array;
///
/// let data = array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
/// let k = gram_matrix(data.view(), &Kernel::Gaussian { bandwidth: 1.0 });
/// assert_eq!(k.shape(), &[3, 3]);
/// assert!((k[[0, 0]] - 1.0).abs() < 1e-10);
/// ```
pub fn gram_matrix(data: ArrayView2<'_, f64>, kernel: &Kernel) -> Array2<f64> {
    let n = data.nrows();
    if data.ncols() == 0 {
        return Array2::ones((n, n));
    }

    let mut k = Array2::zeros((n, n));
    for i in 0..n {
        let ri = data.row(i);
        for j in i..n {
            let kij = kernel.eval_rows(ri, data.row(j));
            k[[i, j]] = kij;
            k[[j, i]] = kij;
        }
    }
    k
}

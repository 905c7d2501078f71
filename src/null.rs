//! Null distributions and p-values for the KCI statistic.
//!
//! Under independence, `n·T` with `T = (1/n)·tr(Kx·Ky)` converges to a weighted sum of
//! independent χ²₁ variables. The weights are:
//!
//! - **unconditional** (Theorem 4 of Zhang et al.): products `λx_m · λy_k` of the
//!   eigenvalues of the two centered kernels;
//! - **conditional** (Proposition 5): eigenvalues of the Gram matrix of the features
//!   `(√λx_i vx_i) ⊙ (√λy_j vy_j)` built from the residualized kernels.
//!
//! Three estimators turn the mixture into a p-value:
//!
//! | Estimator | Cost | Notes |
//! |-----------|------|-------|
//! | Bootstrap | O(B · #weights) after eigen-decomposition | Monte Carlo of the mixture |
//! | Gamma | O(n²) | two-moment match, no eigen-decomposition in the unconditional case |
//! | Permutation | O(B · n²) | permutes Y's rows of the kernel; `(hits + 1)/(B + 1)` |
//!
//! A degenerate spectrum (no positive eigenvalue, hence a zero statistic) gives p = 1.

use ndarray::{Array2, ArrayView2};
use rand::Rng;
use rand_distr::StandardNormal;
use statrs::distribution::{ContinuousCDF, Gamma};

use crate::cancel::CancelToken;
use crate::eigen::{self, EigenSummary};
use crate::{Error, Result};

/// Above this many rows, [`NullMethod::Auto`] switches from bootstrap to Gamma.
pub const AUTO_SAMPLE_LIMIT: usize = 1000;

/// Sampling iterations between cancellation checks.
const BATCH: usize = 64;

/// Floor on the Gamma variance, relative to mean², when the spectrum is degenerate.
const MIN_REL_VARIANCE: f64 = 1e-12;

/// How a p-value is obtained from the null mixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NullMethod {
    /// Bootstrap up to [`AUTO_SAMPLE_LIMIT`] rows, Gamma above.
    #[default]
    Auto,
    Bootstrap,
    Gamma,
    Permutation,
}

/// A [`NullMethod`] with `Auto` resolved against the sample size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Estimator {
    Bootstrap,
    Gamma,
    Permutation,
}

impl NullMethod {
    pub fn estimator(self, n: usize) -> Estimator {
        match self {
            NullMethod::Auto if n <= AUTO_SAMPLE_LIMIT => Estimator::Bootstrap,
            NullMethod::Auto | NullMethod::Gamma => Estimator::Gamma,
            NullMethod::Bootstrap => Estimator::Bootstrap,
            NullMethod::Permutation => Estimator::Permutation,
        }
    }
}

/// Everything the estimators need besides the matrices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NullSettings {
    pub estimator: Estimator,
    /// Bootstrap draws or permutations.
    pub draws: usize,
    /// Relative eigenvalue cutoff.
    pub threshold: f64,
    /// Cap on retained eigenvalues per kernel.
    pub max_eigen: usize,
}

// =============================================================================
// Matrix summaries
// =============================================================================

/// `Σᵢⱼ aᵢⱼ bᵢⱼ`, which is `tr(a·b)` when `b` is symmetric. O(n²).
pub fn trace_product(a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn trace(a: ArrayView2<'_, f64>) -> f64 {
    a.diag().sum()
}

/// `tr(a²)` for symmetric `a`.
fn trace_of_square(a: ArrayView2<'_, f64>) -> f64 {
    a.iter().map(|v| v * v).sum()
}

// =============================================================================
// Mixture weights
// =============================================================================

/// Unconditional weights `λx_m · λy_k / n²`, dropping products below `threshold · max`.
pub fn product_weights(
    ev_x: &EigenSummary,
    ev_y: &EigenSummary,
    n: usize,
    threshold: f64,
) -> Vec<f64> {
    let scale = 1.0 / (n as f64 * n as f64);
    let mut weights: Vec<f64> = ev_x
        .values()
        .iter()
        .flat_map(|&a| ev_y.values().iter().map(move |&b| a * b * scale))
        .collect();
    let max = weights.iter().copied().fold(0.0, f64::max);
    weights.retain(|&w| w > 0.0 && w >= threshold * max);
    weights
}

/// Gram matrix of the interaction features `uᵢⱼ = (√λx_i vx_i) ⊙ (√λy_j vy_j)`.
///
/// With more features than samples this is the n×n matrix `uuᵀ`, computed without
/// forming `u` through `(uuᵀ)[a,b] = (FxFxᵀ)[a,b] · (FyFyᵀ)[a,b]`. Otherwise it is the
/// smaller `uᵀu`. Both share their non-zero eigenvalues. Returns `None` when either
/// summary has no eigenpairs.
pub fn interaction_gram(ev_x: &EigenSummary, ev_y: &EigenSummary) -> Option<Array2<f64>> {
    let fx = ev_x.scaled_vectors()?;
    let fy = ev_y.scaled_vectors()?;
    let (n, kx, ky) = (fx.nrows(), fx.ncols(), fy.ncols());
    if kx == 0 || ky == 0 {
        return None;
    }

    if kx * ky > n {
        let gx = fx.dot(&fx.t());
        let gy = fy.dot(&fy.t());
        return Some(gx * gy);
    }

    let mut u = Array2::zeros((n, kx * ky));
    for i in 0..kx {
        for j in 0..ky {
            u.column_mut(i * ky + j).assign(&(&fx.column(i) * &fy.column(j)));
        }
    }
    Some(u.t().dot(&u))
}

// =============================================================================
// Estimators
// =============================================================================

/// Monte Carlo tail probability `P(Σ wₖ·χ²₁ > statistic)` from `draws` samples.
///
/// χ²₁ variates are squared standard normals. Empty `weights` mean a degenerate null
/// and give 1.
pub fn weighted_chi_square_p_value<R: Rng + ?Sized>(
    weights: &[f64],
    statistic: f64,
    draws: usize,
    rng: &mut R,
    cancel: &CancelToken,
) -> Result<f64> {
    if weights.is_empty() {
        return Ok(1.0);
    }
    if draws == 0 {
        return Err(Error::InvalidConfiguration("bootstrap needs at least one draw".into()));
    }

    let mut exceed = 0usize;
    let mut done = 0usize;
    while done < draws {
        cancel.check()?;
        let batch = BATCH.min(draws - done);
        for _ in 0..batch {
            let tau: f64 = weights
                .iter()
                .map(|w| {
                    let z: f64 = rng.sample(StandardNormal);
                    w * z * z
                })
                .sum();
            if tau > statistic {
                exceed += 1;
            }
        }
        done += batch;
    }
    Ok(exceed as f64 / draws as f64)
}

/// Survival function at `statistic` of the Gamma with the given mean and variance.
///
/// # Example
///
/// ```rust
/// use kci::null::gamma_p_value;
///
/// // mean θ, variance θ²: exponential, P(X > θ) = e⁻¹
/// let p = gamma_p_value(2.0, 4.0, 2.0).unwrap();
/// assert!((p - (-1.0_f64).exp()).abs() < 1e-9);
/// ```
pub fn gamma_p_value(mean: f64, variance: f64, statistic: f64) -> Result<f64> {
    if !(mean.is_finite() && variance.is_finite() && statistic.is_finite()) {
        return Err(Error::UndefinedStatistic(format!(
            "gamma moments mean={mean}, variance={variance}, statistic={statistic}"
        )));
    }
    if statistic <= 0.0 || mean <= 0.0 {
        return Ok(1.0);
    }
    let variance = if variance > 0.0 {
        variance
    } else {
        MIN_REL_VARIANCE * mean * mean
    };

    let shape = mean * mean / variance;
    let scale = variance / mean;
    let gamma = Gamma::new(shape, 1.0 / scale).map_err(|e| {
        Error::UndefinedStatistic(format!("gamma(shape={shape}, scale={scale}): {e}"))
    })?;
    let p = gamma.sf(statistic);
    if !p.is_finite() {
        return Err(Error::UndefinedStatistic(format!("gamma survival at {statistic} is {p}")));
    }
    Ok(p.clamp(0.0, 1.0))
}

/// Permutation p-value: permute the rows and columns of `b` jointly and recompute
/// `(1/n)·Σ a[i,j]·b[π(i),π(j)]`. Returns `(#{≥ statistic} + 1) / (permutations + 1)`.
pub fn permutation_p_value<R: Rng + ?Sized>(
    a: ArrayView2<'_, f64>,
    b: ArrayView2<'_, f64>,
    statistic: f64,
    permutations: usize,
    rng: &mut R,
    cancel: &CancelToken,
) -> Result<f64> {
    let n = a.nrows();
    if n <= 1 || permutations == 0 {
        return Ok(1.0);
    }

    let mut idx: Vec<usize> = (0..n).collect();
    let mut at_least = 0usize;
    for draw in 0..permutations {
        if draw % BATCH == 0 {
            cancel.check()?;
        }
        for i in (1..n).rev() {
            let j = rng.random_range(0..=i);
            idx.swap(i, j);
        }

        let mut s = 0.0;
        for (i, a_row) in a.rows().into_iter().enumerate() {
            let b_row = b.row(idx[i]);
            for (j, &aij) in a_row.iter().enumerate() {
                s += aij * b_row[idx[j]];
            }
        }
        if s / n as f64 >= statistic {
            at_least += 1;
        }
    }
    Ok((at_least as f64 + 1.0) / (permutations as f64 + 1.0))
}

// =============================================================================
// Unconditional and conditional p-values
// =============================================================================

/// p-value for `statistic = (1/n)·tr(Kx·Ky)` of two centered kernels (Theorem 4).
///
/// The Gamma route matches `E = tr(Kx)·tr(Ky)/n²` and `Var = 2·tr(Kx²)·tr(Ky²)/n⁴`, the
/// moments of the mixture scaled to `T`.
pub fn unconditional_p_value<R: Rng + ?Sized>(
    kx: ArrayView2<'_, f64>,
    ky: ArrayView2<'_, f64>,
    statistic: f64,
    settings: &NullSettings,
    rng: &mut R,
    cancel: &CancelToken,
) -> Result<f64> {
    let n = kx.nrows();
    let nf = n as f64;
    match settings.estimator {
        Estimator::Bootstrap => {
            let ev_x = eigen::eigenvalues(kx, settings.threshold, settings.max_eigen);
            cancel.check()?;
            let ev_y = eigen::eigenvalues(ky, settings.threshold, settings.max_eigen);
            cancel.check()?;
            let weights = product_weights(&ev_x, &ev_y, n, settings.threshold);
            log::trace!(
                "unconditional bootstrap: {} x {} eigenvalues, {} weights",
                ev_x.len(),
                ev_y.len(),
                weights.len()
            );
            weighted_chi_square_p_value(&weights, statistic, settings.draws, rng, cancel)
        }
        Estimator::Gamma => {
            let mean = trace(kx) * trace(ky) / (nf * nf);
            let variance = 2.0 * trace_of_square(kx) * trace_of_square(ky) / nf.powi(4);
            gamma_p_value(mean, variance, statistic)
        }
        Estimator::Permutation => {
            permutation_p_value(kx, ky, statistic, settings.draws, rng, cancel)
        }
    }
}

/// p-value for `statistic = (1/n)·tr(RKx·RKy)` of two residualized kernels
/// (Proposition 5). The mixture is compared against `n·statistic`.
pub fn conditional_p_value<R: Rng + ?Sized>(
    rkx: ArrayView2<'_, f64>,
    rky: ArrayView2<'_, f64>,
    statistic: f64,
    settings: &NullSettings,
    rng: &mut R,
    cancel: &CancelToken,
) -> Result<f64> {
    if settings.estimator == Estimator::Permutation {
        return permutation_p_value(rkx, rky, statistic, settings.draws, rng, cancel);
    }

    let scaled = statistic * rkx.nrows() as f64;
    let ev_x = eigen::eigenpairs(rkx, settings.threshold, settings.max_eigen);
    cancel.check()?;
    let ev_y = eigen::eigenpairs(rky, settings.threshold, settings.max_eigen);
    cancel.check()?;

    let Some(gram) = interaction_gram(&ev_x, &ev_y) else {
        return Ok(1.0);
    };
    log::trace!(
        "conditional null: {} x {} eigenpairs, interaction gram {}x{}",
        ev_x.len(),
        ev_y.len(),
        gram.nrows(),
        gram.ncols()
    );

    match settings.estimator {
        Estimator::Gamma => {
            let mean = trace(gram.view());
            let variance = 2.0 * trace_of_square(gram.view());
            gamma_p_value(mean, variance, scaled)
        }
        _ => {
            let weights = eigen::eigenvalues(gram.view(), settings.threshold, usize::MAX);
            cancel.check()?;
            weighted_chi_square_p_value(weights.values(), scaled, settings.draws, rng, cancel)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::center::center_gram;
    use crate::kernel::{gram_matrix, Kernel};
    use ndarray::{array, Array2};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn settings(estimator: Estimator) -> NullSettings {
        NullSettings {
            estimator,
            draws: 500,
            threshold: 1e-3,
            max_eigen: usize::MAX,
        }
    }

    fn centered_linear(values: &[f64]) -> Array2<f64> {
        let data = Array2::from_shape_fn((values.len(), 1), |(i, _)| values[i]);
        center_gram(gram_matrix(data.view(), &Kernel::Linear).view())
    }

    #[test]
    fn test_auto_switches_on_sample_size() {
        assert_eq!(NullMethod::Auto.estimator(AUTO_SAMPLE_LIMIT), Estimator::Bootstrap);
        assert_eq!(NullMethod::Auto.estimator(AUTO_SAMPLE_LIMIT + 1), Estimator::Gamma);
        assert_eq!(NullMethod::Permutation.estimator(10), Estimator::Permutation);
    }

    #[test]
    fn test_trace_product_matches_matmul() {
        let a = array![[1.0, 2.0], [2.0, 5.0]];
        let b = array![[0.5, -1.0], [-1.0, 3.0]];
        let expected = a.dot(&b).diag().sum();
        assert!((trace_product(a.view(), b.view()) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_product_weights_scaled_and_filtered() {
        let ev_x = eigen::eigenvalues(Array2::from_diag(&array![2.0, 1.0]).view(), 0.0, 10);
        let ev_y = eigen::eigenvalues(Array2::from_diag(&array![3.0, 1e-6]).view(), 0.0, 10);
        let w = product_weights(&ev_x, &ev_y, 2, 1e-3);
        // 6/4 and 3/4 survive; the 1e-6 products fall under the cutoff
        assert_eq!(w.len(), 2);
        assert!((w[0] - 1.5).abs() < 1e-12);
        assert!((w[1] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_single_weight_bootstrap_matches_chi_square_tail() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let p = weighted_chi_square_p_value(&[1.0], 3.841_458_820_694_124, 20_000, &mut rng, &CancelToken::new())
            .unwrap();
        assert!((p - 0.05).abs() < 0.01, "p = {p}");
    }

    #[test]
    fn test_bootstrap_deterministic_under_seed() {
        let w = [0.4, 0.3, 0.1];
        let run = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            weighted_chi_square_p_value(&w, 0.9, 1000, &mut rng, &CancelToken::new()).unwrap()
        };
        assert_eq!(run(3), run(3));
    }

    #[test]
    fn test_empty_weights_give_one() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let p = weighted_chi_square_p_value(&[], 1.0, 100, &mut rng, &CancelToken::new()).unwrap();
        assert_eq!(p, 1.0);
    }

    #[test]
    fn test_bootstrap_stops_when_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let res = weighted_chi_square_p_value(&[1.0], 1.0, 100, &mut rng, &token);
        assert!(matches!(res, Err(Error::Cancelled)));
    }

    #[test]
    fn test_gamma_guards() {
        assert_eq!(gamma_p_value(1.0, 1.0, 0.0).unwrap(), 1.0);
        assert_eq!(gamma_p_value(0.0, 0.0, 0.5).unwrap(), 1.0);
        assert!(matches!(
            gamma_p_value(f64::NAN, 1.0, 1.0),
            Err(Error::UndefinedStatistic(_))
        ));
    }

    #[test]
    fn test_permutation_detects_identical_kernels() {
        let x: Vec<f64> = (0..30).map(|i| (i as f64 * 0.7).sin()).collect();
        let k = centered_linear(&x);
        let stat = trace_product(k.view(), k.view()) / 30.0;
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let p = permutation_p_value(k.view(), k.view(), stat, 199, &mut rng, &CancelToken::new()).unwrap();
        assert!((p - 1.0 / 200.0).abs() < 1e-12, "p = {p}");
    }

    #[test]
    fn test_unconditional_gamma_uses_trace_moments() {
        let kx = centered_linear(&[1.0, -0.5, 2.0, 0.3, -1.1]);
        let ky = centered_linear(&[0.2, 0.9, -0.4, 1.5, -0.8]);
        let stat = trace_product(kx.view(), ky.view()) / 5.0;
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let p = unconditional_p_value(kx.view(), ky.view(), stat, &settings(Estimator::Gamma), &mut rng, &CancelToken::new())
            .unwrap();
        let mean = trace(kx.view()) * trace(ky.view()) / 25.0;
        let var = 2.0 * trace_of_square(kx.view()) * trace_of_square(ky.view()) / 625.0;
        assert_eq!(p, gamma_p_value(mean, var, stat).unwrap());
    }

    #[test]
    fn test_interaction_gram_hadamard_branch_matches_features() {
        let m = array![[2.0, 0.5, 0.1], [0.5, 1.5, 0.2], [0.1, 0.2, 1.0]];
        let ev_x = eigen::eigenpairs(m.view(), 0.0, usize::MAX);
        let ev_y = eigen::eigenpairs(m.view(), 0.0, 2);
        // 3 * 2 features > 3 samples
        let g = interaction_gram(&ev_x, &ev_y).unwrap();
        assert_eq!(g.dim(), (3, 3));

        let fx = ev_x.scaled_vectors().unwrap();
        let fy = ev_y.scaled_vectors().unwrap();
        let u = Array2::from_shape_fn((3, 6), |(r, c)| fx[[r, c / 2]] * fy[[r, c % 2]]);
        let explicit = u.dot(&u.t());
        for (a, b) in g.iter().zip(explicit.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_interaction_gram_feature_branch() {
        let m = array![[2.0, 0.5, 0.1], [0.5, 1.5, 0.2], [0.1, 0.2, 1.0]];
        let ev_x = eigen::eigenpairs(m.view(), 0.0, 1);
        let ev_y = eigen::eigenpairs(m.view(), 0.0, 2);
        let g = interaction_gram(&ev_x, &ev_y).unwrap();
        assert_eq!(g.dim(), (2, 2));
        // tr(uᵀu) = ‖u‖²
        let fx = ev_x.scaled_vectors().unwrap();
        let fy = ev_y.scaled_vectors().unwrap();
        let norm2: f64 = (0..3)
            .flat_map(|r| (0..2).map(move |c| (r, c)))
            .map(|(r, c)| (fx[[r, 0]] * fy[[r, c]]).powi(2))
            .sum();
        assert!((g.diag().sum() - norm2).abs() < 1e-10);
    }

    #[test]
    fn test_conditional_degenerate_spectrum_gives_one() {
        let zero = Array2::<f64>::zeros((5, 5));
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for estimator in [Estimator::Bootstrap, Estimator::Gamma] {
            let p = conditional_p_value(zero.view(), zero.view(), 0.0, &settings(estimator), &mut rng, &CancelToken::new())
                .unwrap();
            assert_eq!(p, 1.0);
        }
    }
}

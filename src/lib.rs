//! # kci
//!
//! Kernel-based conditional independence testing for constraint-based causal discovery.
//!
//! ## Why "KCI"?
//!
//! The **Kernel Conditional Independence** test (Zhang, Peters, Janzing & Schölkopf, 2011)
//! answers the question a structure learner asks thousands of times per search:
//! "are X and Y independent given the set Z?" It makes no parametric assumption about the
//! joint distribution. Dependence is measured in a Reproducing Kernel Hilbert Space, and
//! the null distribution of the statistic is a weighted sum of chi-square(1) variables
//! whose weights come from the spectra of the centered kernel matrices.
//!
//! ## Intuition
//!
//! Map every sample into feature space with a kernel (Gaussian by default). If X and Y
//! are independent, the cross-covariance operator between their feature maps is zero, and
//! its empirical estimate `(1/n)·tr(Kx·Ky)` is small. Conditioning on Z is done by
//! regressing Z out of both feature maps with kernel ridge regression: the residual kernels
//! `Rz·K·Rz`, with `Rz = ε(Kz + εI)⁻¹`, keep only the part of each feature map that Z
//! cannot explain.
//!
//! ## Key Functions
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`KciTest`] | The orchestrator: `check_independence(x, y, z)` |
//! | [`kernel::gram_matrix`] | Gram matrix over jointly selected columns |
//! | [`bandwidth::BandwidthRule`] | MAD (Bowman–Azzalini) or median-pairwise bandwidth |
//! | [`center::center_gram`] | O(n²) double centering |
//! | [`ridge::ridge_residualizer`] | `ε(Kz + εI)⁻¹` with Cholesky → LU fallback |
//! | [`eigen::EigenSummary`] | Thresholded, descending eigen-spectrum |
//! | [`null`] | Bootstrap, Gamma and permutation p-values |
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use kci::{Dataset, IndependenceTest, KciConfig, KciTest};
//! use ndarray::Array2;
//!
//! // y is a deterministic function of x
//! let values = Array2::from_shape_fn((60, 2), |(i, j)| {
//!     let x = (i as f64 * 0.37).sin() * 3.0;
//!     if j == 0 { x } else { x * x }
//! });
//! let data = Dataset::new(vec!["x".into(), "y".into()], values).unwrap();
//! let test = KciTest::new(Arc::new(data), KciConfig::default()).unwrap();
//!
//! let result = test.check_independence("x", "y", &[]).unwrap();
//! assert!(!result.independent());
//! ```
//!
//! ## What Can Go Wrong
//!
//! 1. **Bandwidth too small**: the Gaussian Gram matrix is nearly the identity and the
//!    conditional residuals vanish, so the test loses power.
//! 2. **Bandwidth too large**: everything looks alike and the test cannot discriminate.
//! 3. **Singular conditioning kernel**: `Kz + εI` is not invertible for ε too small.
//!    This is reported as [`Error::SingularMatrix`], never papered over.
//! 4. **Large n**: every call holds several n×n matrices. Use [`KciTest::set_rows`] to
//!    subsample, and prefer the Gamma approximation above a thousand rows.
//! 5. **Asymmetry of the conditional statistic**: the conditional path augments one side
//!    with Z. The pair is ordered by column before computing, so `(x, y, z)` and
//!    `(y, x, z)` agree exactly.
//!
//! ## References
//!
//! - Zhang, Peters, Janzing & Schölkopf (2011). "Kernel-based Conditional Independence
//!   Test and Application in Causal Discovery" (UAI)
//! - Gretton et al. (2007). "A Kernel Statistical Test of Independence" (NIPS)
//! - Bowman & Azzalini (1997). "Applied Smoothing Techniques for Data Analysis"

use thiserror::Error;

pub mod bandwidth;
pub mod cache;
pub mod cancel;
pub mod center;
pub mod config;
pub mod data;
pub mod eigen;
pub mod independence;
pub mod kernel;
pub mod null;
pub mod result;
pub mod ridge;

mod bridge;

pub use cancel::CancelToken;
pub use config::{EigenCount, KciConfig, KernelKind};
pub use data::Dataset;
pub use independence::{marginal_p_value, p_value_from_centered_kernels, KciTest};
pub use null::NullMethod;
pub use result::{IndependenceFact, IndependenceResult, IndependenceTest};

/// Errors raised by kernel independence tests.
#[derive(Debug, Error)]
pub enum Error {
    #[error("dimension mismatch: {0} vs {1}")]
    DimensionMismatch(usize, usize),

    /// `Kz + εI` could not be inverted by Cholesky or LU.
    #[error("singular conditioning matrix: {n}x{n} kernel plus ridge {epsilon} is not invertible")]
    SingularMatrix { n: usize, epsilon: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The statistic or p-value came out NaN or infinite.
    #[error("undefined statistic: {0}")]
    UndefinedStatistic(String),

    #[error("cancelled")]
    Cancelled,

    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, Error>;

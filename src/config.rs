//! Test configuration.
//!
//! A [`KciConfig`] is plain data with builder-style setters. Nothing is checked while it
//! is being built; [`KciConfig::validate`] runs when a [`crate::KciTest`] is constructed
//! or reconfigured.

use crate::bandwidth::BandwidthRule;
use crate::null::NullMethod;
use crate::{Error, Result};

/// Above this many rows, [`EigenCount::Auto`] keeps only half the spectrum.
pub const AUTO_EIGEN_LIMIT: usize = 1000;

/// Kernel family applied to X, Y and Z.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum KernelKind {
    /// `exp(-‖u − v‖² / 2h²)` with a data-driven bandwidth.
    #[default]
    Gaussian,
    Linear,
    /// `(γ⟨u, v⟩ + c)^d`.
    Polynomial { degree: u32, gamma: f64, coef0: f64 },
}

impl KernelKind {
    /// Quadratic polynomial kernel `(⟨u, v⟩ + 1)²`.
    pub fn quadratic() -> Self {
        KernelKind::Polynomial {
            degree: 2,
            gamma: 1.0,
            coef0: 1.0,
        }
    }
}

/// How many eigenvalues of each kernel the null approximation keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EigenCount {
    /// All `n` up to [`AUTO_EIGEN_LIMIT`] rows, `⌊n/2⌋` above.
    #[default]
    Auto,
    Fixed(usize),
}

impl EigenCount {
    pub fn resolve(self, n: usize) -> usize {
        match self {
            EigenCount::Auto if n <= AUTO_EIGEN_LIMIT => n,
            EigenCount::Auto => n / 2,
            EigenCount::Fixed(k) => k.min(n),
        }
    }
}

/// Parameters of a kernel conditional independence test.
///
/// ```rust
/// use kci::{KciConfig, NullMethod};
///
/// let config = KciConfig::default()
///     .with_null_method(NullMethod::Gamma)
///     .with_alpha(0.01);
/// assert!(config.validate().is_ok());
/// assert!(KciConfig::default().with_alpha(1.5).validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KciConfig {
    pub kernel: KernelKind,
    pub bandwidth_rule: BandwidthRule,
    /// Multiplier applied to every data-driven bandwidth.
    pub scaling_factor: f64,
    /// Ridge penalty ε in `ε(Kz + εI)⁻¹`.
    pub epsilon: f64,
    /// Relative cutoff for eigenvalues and mixture weights.
    pub threshold: f64,
    pub eigen_count: EigenCount,
    /// Bootstrap draws, or permutations for [`NullMethod::Permutation`].
    pub num_draws: usize,
    pub null_method: NullMethod,
    /// Significance level: `independent` iff `p > alpha`.
    pub alpha: f64,
    /// `None` draws a fresh seed per call and disables the result cache.
    pub seed: Option<u64>,
    /// Entries per cache; zero disables caching.
    pub cache_capacity: usize,
}

impl Default for KciConfig {
    fn default() -> Self {
        Self {
            kernel: KernelKind::Gaussian,
            bandwidth_rule: BandwidthRule::Mad,
            scaling_factor: 1.0,
            epsilon: 1e-3,
            threshold: 1e-3,
            eigen_count: EigenCount::Auto,
            num_draws: 1000,
            null_method: NullMethod::Auto,
            alpha: 0.05,
            seed: Some(0),
            cache_capacity: 64,
        }
    }
}

impl KciConfig {
    pub fn with_kernel(mut self, kernel: KernelKind) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_bandwidth_rule(mut self, rule: BandwidthRule) -> Self {
        self.bandwidth_rule = rule;
        self
    }

    pub fn with_scaling_factor(mut self, scaling: f64) -> Self {
        self.scaling_factor = scaling;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_eigen_count(mut self, count: EigenCount) -> Self {
        self.eigen_count = count;
        self
    }

    pub fn with_num_draws(mut self, draws: usize) -> Self {
        self.num_draws = draws;
        self
    }

    pub fn with_null_method(mut self, method: NullMethod) -> Self {
        self.null_method = method;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Rejects parameter values the test cannot run with.
    pub fn validate(&self) -> Result<()> {
        check_alpha(self.alpha)?;
        if !(self.scaling_factor.is_finite() && self.scaling_factor > 0.0) {
            return Err(invalid(format!(
                "scaling factor must be positive and finite, got {}",
                self.scaling_factor
            )));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(invalid(format!(
                "ridge epsilon must be positive and finite, got {}",
                self.epsilon
            )));
        }
        if !(0.0..1.0).contains(&self.threshold) {
            return Err(invalid(format!(
                "eigenvalue threshold must lie in [0, 1), got {}",
                self.threshold
            )));
        }
        if self.num_draws == 0 {
            return Err(invalid("number of draws must be at least 1".to_string()));
        }
        if let EigenCount::Fixed(0) = self.eigen_count {
            return Err(invalid("fixed eigenvalue count must be at least 1".to_string()));
        }
        if let KernelKind::Polynomial {
            degree,
            gamma,
            coef0,
        } = self.kernel
        {
            if degree == 0 {
                return Err(invalid("polynomial degree must be at least 1".to_string()));
            }
            if !(gamma.is_finite() && coef0.is_finite()) {
                return Err(invalid(format!(
                    "polynomial coefficients must be finite, got gamma={gamma}, coef0={coef0}"
                )));
            }
        }
        Ok(())
    }
}

/// `alpha` must lie strictly between 0 and 1.
pub(crate) fn check_alpha(alpha: f64) -> Result<()> {
    if alpha > 0.0 && alpha < 1.0 {
        Ok(())
    } else {
        Err(invalid(format!("alpha must lie in (0, 1), got {alpha}")))
    }
}

fn invalid(msg: String) -> Error {
    Error::InvalidConfiguration(msg)
}

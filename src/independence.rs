//! The KCI test orchestrator.
//!
//! One call of [`KciTest::check_independence`]:
//!
//! 1. resolve names to columns, order the pair by column index;
//! 2. return a cached outcome if the configuration is seeded;
//! 3. build and center the Gram matrices over the selected rows;
//! 4. with an empty Z, compute `T = (1/n)·tr(Kx·Ky)` and the unconditional null;
//!    otherwise residualize `K[X,Z]` and `Ky` with `Rz = ε(Kz + εI)⁻¹` and use the
//!    conditional null;
//! 5. decide `independent = p > α`.
//!
//! Randomness is derived per call from the configured seed, with a separate ChaCha stream
//! for each kernel and one for null sampling, so a cached `Rz` never shifts the draws of
//! a later call.

use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::bandwidth::BandwidthRule;
use crate::cache::BoundedCache;
use crate::cancel::CancelToken;
use crate::center::center_gram;
use crate::config::{check_alpha, EigenCount, KciConfig, KernelKind};
use crate::data::Dataset;
use crate::kernel::{gram_matrix, Kernel};
use crate::null::{self, NullMethod, NullSettings};
use crate::result::{IndependenceFact, IndependenceResult, IndependenceTest};
use crate::ridge::{residualize, ridge_residualizer};
use crate::{Error, Result};

const NULL_STREAM: u64 = 0;
const X_STREAM: u64 = 1;
const Y_STREAM: u64 = 2;
const Z_STREAM: u64 = 3;

/// Canonical `(lower column, higher column, sorted Z columns)`.
type FactKey = (usize, usize, Vec<usize>);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Outcome {
    p_value: f64,
    statistic: f64,
}

impl Outcome {
    const TRIVIAL: Outcome = Outcome {
        p_value: 1.0,
        statistic: 0.0,
    };
}

/// Kernel conditional independence test over a shared [`Dataset`].
///
/// `KciTest` is `Send + Sync`; calls take `&self` and only contend on the two internal
/// caches. Configuration changes take `&mut self` and clear both caches.
///
/// ```rust
/// use std::sync::Arc;
/// use kci::{Dataset, IndependenceTest, KciConfig, KciTest};
///
/// let x: Vec<f64> = (0..50).map(|i| (i as f64 * 0.61).sin()).collect();
/// let y: Vec<f64> = (0..50).map(|i| (i as f64 * 1.37).cos()).collect();
/// let z: Vec<f64> = x.iter().zip(&y).map(|(a, b)| a + b).collect();
/// let data = Dataset::from_columns(vec![("x".into(), x), ("y".into(), y), ("z".into(), z)]).unwrap();
///
/// let test = KciTest::new(Arc::new(data), KciConfig::default()).unwrap();
/// let forward = test.check_independence("x", "y", &["z"]).unwrap();
/// let backward = test.check_independence("y", "x", &["z"]).unwrap();
/// assert_eq!(forward.p_value(), backward.p_value());
/// ```
#[derive(Debug)]
pub struct KciTest {
    data: Arc<Dataset>,
    config: KciConfig,
    rows: Option<Vec<usize>>,
    results: BoundedCache<FactKey, Outcome>,
    residualizers: BoundedCache<Vec<usize>, Arc<Array2<f64>>>,
}

impl KciTest {
    pub fn new(data: Arc<Dataset>, config: KciConfig) -> Result<Self> {
        config.validate()?;
        let capacity = config.cache_capacity;
        Ok(Self {
            data,
            config,
            rows: None,
            results: BoundedCache::new(capacity),
            residualizers: BoundedCache::new(capacity),
        })
    }

    pub fn config(&self) -> &KciConfig {
        &self.config
    }

    pub fn data(&self) -> &Arc<Dataset> {
        &self.data
    }

    /// The selected rows, `None` meaning all of them.
    pub fn rows(&self) -> Option<&[usize]> {
        self.rows.as_deref()
    }

    /// Restricts every later call to the given rows (in that order).
    pub fn set_rows(&mut self, rows: Option<Vec<usize>>) -> Result<()> {
        if let Some(rows) = &rows {
            let n = self.data.n_rows();
            if let Some(bad) = rows.iter().find(|&&r| r >= n) {
                return Err(Error::InvalidConfiguration(format!(
                    "row index {bad} out of range for {n} rows"
                )));
            }
        }
        self.rows = rows;
        self.clear_caches();
        Ok(())
    }

    pub fn set_config(&mut self, config: KciConfig) -> Result<()> {
        self.reconfigure(|c| *c = config)
    }

    pub fn set_kernel(&mut self, kernel: KernelKind) -> Result<()> {
        self.reconfigure(|c| c.kernel = kernel)
    }

    pub fn set_bandwidth_rule(&mut self, rule: BandwidthRule) -> Result<()> {
        self.reconfigure(|c| c.bandwidth_rule = rule)
    }

    pub fn set_scaling_factor(&mut self, scaling: f64) -> Result<()> {
        self.reconfigure(|c| c.scaling_factor = scaling)
    }

    pub fn set_epsilon(&mut self, epsilon: f64) -> Result<()> {
        self.reconfigure(|c| c.epsilon = epsilon)
    }

    pub fn set_threshold(&mut self, threshold: f64) -> Result<()> {
        self.reconfigure(|c| c.threshold = threshold)
    }

    pub fn set_eigen_count(&mut self, count: EigenCount) -> Result<()> {
        self.reconfigure(|c| c.eigen_count = count)
    }

    pub fn set_num_draws(&mut self, draws: usize) -> Result<()> {
        self.reconfigure(|c| c.num_draws = draws)
    }

    pub fn set_null_method(&mut self, method: NullMethod) -> Result<()> {
        self.reconfigure(|c| c.null_method = method)
    }

    pub fn set_seed(&mut self, seed: Option<u64>) -> Result<()> {
        self.reconfigure(|c| c.seed = seed)
    }

    pub fn set_cache_capacity(&mut self, capacity: usize) -> Result<()> {
        self.reconfigure(|c| c.cache_capacity = capacity)
    }

    /// Applies `update` to a copy of the configuration and installs it if valid.
    fn reconfigure(&mut self, update: impl FnOnce(&mut KciConfig)) -> Result<()> {
        let mut next = self.config.clone();
        update(&mut next);
        next.validate()?;
        if next.cache_capacity != self.config.cache_capacity {
            self.results = BoundedCache::new(next.cache_capacity);
            self.residualizers = BoundedCache::new(next.cache_capacity);
        }
        self.config = next;
        self.clear_caches();
        Ok(())
    }

    pub fn clear_caches(&self) {
        self.results.clear();
        self.residualizers.clear();
    }

    /// [`IndependenceTest::check_independence`] with cooperative cancellation.
    pub fn check_independence_with(
        &self,
        x: &str,
        y: &str,
        z: &[&str],
        cancel: &CancelToken,
    ) -> Result<IndependenceResult> {
        let fact = IndependenceFact::new(x, y, z);
        let xi = self.data.column_index(x)?;
        let yi = self.data.column_index(y)?;
        let mut zi = fact
            .z
            .iter()
            .map(|name| self.data.column_index(name))
            .collect::<Result<Vec<_>>>()?;
        zi.sort_unstable();

        let (a, b) = if xi <= yi { (xi, yi) } else { (yi, xi) };
        let key = (a, b, zi);
        let seeded = self.config.seed.is_some();

        let outcome = match self.results.get(&key).filter(|_| seeded) {
            Some(cached) => {
                log::trace!("{fact}: cached");
                cached
            }
            None => {
                let outcome = self.compute(&fact, a, b, &key.2, cancel)?;
                if seeded {
                    self.results.insert(key, outcome);
                }
                outcome
            }
        };

        let result =
            IndependenceResult::new(fact, outcome.p_value, outcome.statistic, self.config.alpha);
        log::debug!("{} p = {:.6}", result.fact(), result.p_value());
        Ok(result)
    }

    fn compute(
        &self,
        fact: &IndependenceFact,
        x: usize,
        y: usize,
        z: &[usize],
        cancel: &CancelToken,
    ) -> Result<Outcome> {
        let rows = self.rows.as_deref();
        let n = rows.map_or(self.data.n_rows(), <[usize]>::len);
        if n < 2 {
            return Ok(Outcome::TRIVIAL);
        }
        cancel.check()?;

        let seed = match self.config.seed {
            Some(seed) => seed,
            None => rand::rng().random(),
        };
        let settings = null_settings(&self.config, n);
        log::trace!("{fact}: n = {n}, {settings:?}");
        let mut null_rng = stream(seed, NULL_STREAM);

        if z.is_empty() {
            let kx = centered_kernel(self.data.select(rows, &[x]).view(), &self.config, seed, X_STREAM);
            let ky = centered_kernel(self.data.select(rows, &[y]).view(), &self.config, seed, Y_STREAM);
            cancel.check()?;
            let statistic = null::trace_product(kx.view(), ky.view()) / n as f64;
            let p = null::unconditional_p_value(
                kx.view(),
                ky.view(),
                statistic,
                &settings,
                &mut null_rng,
                cancel,
            )?;
            return checked(statistic, p);
        }

        let rz = self.residualizer(z, rows, seed, cancel)?;
        let mut xz = Vec::with_capacity(z.len() + 1);
        xz.push(x);
        xz.extend_from_slice(z);
        let kx = centered_kernel(self.data.select(rows, &xz).view(), &self.config, seed, X_STREAM);
        let ky = centered_kernel(self.data.select(rows, &[y]).view(), &self.config, seed, Y_STREAM);
        cancel.check()?;

        let rkx = residualize(rz.view(), kx.view());
        let rky = residualize(rz.view(), ky.view());
        cancel.check()?;
        let statistic = null::trace_product(rkx.view(), rky.view()) / n as f64;
        let p = null::conditional_p_value(
            rkx.view(),
            rky.view(),
            statistic,
            &settings,
            &mut null_rng,
            cancel,
        )?;
        checked(statistic, p)
    }

    fn residualizer(
        &self,
        z: &[usize],
        rows: Option<&[usize]>,
        seed: u64,
        cancel: &CancelToken,
    ) -> Result<Arc<Array2<f64>>> {
        let key = z.to_vec();
        if let Some(rz) = self.residualizers.get(&key) {
            return Ok(rz);
        }
        let kz = centered_kernel(self.data.select(rows, z).view(), &self.config, seed, Z_STREAM);
        cancel.check()?;
        let rz = Arc::new(ridge_residualizer(kz.view(), self.config.epsilon)?);
        self.residualizers.insert(key, Arc::clone(&rz));
        Ok(rz)
    }
}

impl IndependenceTest for KciTest {
    fn check_independence(&self, x: &str, y: &str, z: &[&str]) -> Result<IndependenceResult> {
        self.check_independence_with(x, y, z, &CancelToken::new())
    }

    fn alpha(&self) -> f64 {
        self.config.alpha
    }

    fn set_alpha(&mut self, alpha: f64) -> Result<()> {
        check_alpha(alpha)?;
        // cached outcomes hold p-values, not decisions
        self.config.alpha = alpha;
        Ok(())
    }

    fn variables(&self) -> Vec<String> {
        self.data.names().to_vec()
    }
}

/// Unconditional KCI p-value for two raw samples.
///
/// Mismatched lengths or fewer than three samples give 1.
///
/// ```rust
/// use kci::{marginal_p_value, KciConfig};
///
/// let x: Vec<f64> = (0..80).map(|i| (i as f64 * 0.4).sin()).collect();
/// let y: Vec<f64> = x.iter().map(|v| v * v).collect();
/// assert!(marginal_p_value(&x, &y, &KciConfig::default()).unwrap() < 0.05);
/// ```
pub fn marginal_p_value(x: &[f64], y: &[f64], config: &KciConfig) -> Result<f64> {
    config.validate()?;
    if x.len() != y.len() || x.len() < 3 {
        return Ok(1.0);
    }
    let data = Dataset::from_columns(vec![("x".into(), x.to_vec()), ("y".into(), y.to_vec())])?;
    let test = KciTest::new(Arc::new(data), config.clone().with_cache_capacity(0))?;
    Ok(test.check_independence("x", "y", &[])?.p_value())
}

/// p-value of `(1/n)·tr(Kx·Ky)` for two caller-supplied centered kernels, using the
/// eigenvector-based null of the conditional test.
pub fn p_value_from_centered_kernels(
    kx: ArrayView2<'_, f64>,
    ky: ArrayView2<'_, f64>,
    config: &KciConfig,
) -> Result<f64> {
    config.validate()?;
    let n = kx.nrows();
    for (rows, cols) in [kx.dim(), ky.dim()] {
        if rows != n || cols != n {
            return Err(Error::DimensionMismatch(n, rows.max(cols)));
        }
    }
    if n < 2 {
        return Ok(1.0);
    }

    let seed = match config.seed {
        Some(seed) => seed,
        None => rand::rng().random(),
    };
    let statistic = null::trace_product(kx, ky) / n as f64;
    let p = null::conditional_p_value(
        kx,
        ky,
        statistic,
        &null_settings(config, n),
        &mut stream(seed, NULL_STREAM),
        &CancelToken::new(),
    )?;
    Ok(checked(statistic, p)?.p_value)
}

fn null_settings(config: &KciConfig, n: usize) -> NullSettings {
    NullSettings {
        estimator: config.null_method.estimator(n),
        draws: config.num_draws,
        threshold: config.threshold,
        max_eigen: config.eigen_count.resolve(n),
    }
}

fn stream(seed: u64, id: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(id);
    rng
}

fn centered_kernel(data: ArrayView2<'_, f64>, config: &KciConfig, seed: u64, id: u64) -> Array2<f64> {
    let mut rng = stream(seed, id);
    let kernel = Kernel::resolve(
        &config.kernel,
        data,
        &config.bandwidth_rule,
        config.scaling_factor,
        &mut rng,
    );
    center_gram(gram_matrix(data, &kernel).view())
}

fn checked(statistic: f64, p_value: f64) -> Result<Outcome> {
    if !statistic.is_finite() {
        return Err(Error::UndefinedStatistic(format!("statistic is {statistic}")));
    }
    if !p_value.is_finite() {
        return Err(Error::UndefinedStatistic(format!("p-value is {p_value}")));
    }
    Ok(Outcome {
        p_value: p_value.clamp(0.0, 1.0),
        statistic,
    })
}

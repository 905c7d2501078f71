//! Kernel bandwidth selection.
//!
//! Two heuristics are available, and a configuration holds exactly one of them for its
//! whole lifetime (switching rules moves every p-value):
//!
//! - [`BandwidthRule::Mad`] (default): the Bowman–Azzalini normal-reference rule with a
//!   robust scale, `h = 1.4826 · MAD · (4 / 3n)^(1/5)`, per column. For several columns
//!   the widest per-column bandwidth is scaled by `√d`, since distances are taken in the
//!   joint Euclidean metric.
//! - [`BandwidthRule::MedianPairwise`]: `σ = √(median ‖uᵢ − uⱼ‖² / 2)` over a uniform
//!   subsample of at most `max_points` rows.
//!
//! Both return `1.0` when the data give no usable scale (one row, a constant column).

use ndarray::{ArrayView1, ArrayView2};
use rand::Rng;

/// Consistency constant turning a MAD into a normal standard deviation.
const MAD_TO_SIGMA: f64 = 1.4826;

/// Default cap on the rows used by the median-pairwise heuristic.
pub const DEFAULT_MAX_POINTS: usize = 256;

/// Which data-driven bandwidth to use for Gaussian kernels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BandwidthRule {
    #[default]
    Mad,
    MedianPairwise { max_points: usize },
}

impl BandwidthRule {
    pub fn median_pairwise() -> Self {
        BandwidthRule::MedianPairwise {
            max_points: DEFAULT_MAX_POINTS,
        }
    }

    /// Bandwidth for the columns of `data` (rows are samples) taken jointly.
    ///
    /// `rng` is only drawn from by the subsampling rule.
    pub fn select<R: Rng + ?Sized>(&self, data: ArrayView2<'_, f64>, rng: &mut R) -> f64 {
        let d = data.ncols();
        if d == 0 || data.nrows() < 2 {
            return 1.0;
        }
        match *self {
            BandwidthRule::Mad => {
                let widest = data
                    .columns()
                    .into_iter()
                    .map(mad_bandwidth)
                    .fold(0.0_f64, f64::max);
                sanitize(widest * (d as f64).sqrt())
            }
            BandwidthRule::MedianPairwise { max_points } => {
                median_pairwise_bandwidth(data, max_points, rng)
            }
        }
    }
}

/// Bowman–Azzalini bandwidth for a single variable using the MAD as scale.
///
/// # Example
///
/// ```rust
/// use kci::bandwidth::mad_bandwidth;
/// use ndarray::Array1;
///
/// let x = Array1::linspace(-2.0, 2.0, 101);
/// let h = mad_bandwidth(x.view());
/// assert!(h > 0.0 && h < 1.0);
/// ```
pub fn mad_bandwidth(column: ArrayView1<'_, f64>) -> f64 {
    let n = column.len();
    if n < 2 {
        return 1.0;
    }
    let mut values: Vec<f64> = column.to_vec();
    let center = median(&mut values);
    let mut deviations: Vec<f64> = column.iter().map(|v| (v - center).abs()).collect();
    let mad = median(&mut deviations);
    sanitize(MAD_TO_SIGMA * mad * (4.0 / (3.0 * n as f64)).powf(0.2))
}

/// Median-distance heuristic: `σ = √(median squared distance / 2)`.
///
/// Pairs are drawn from at most `max_points` rows picked by a partial Fisher–Yates
/// shuffle, keeping the cost at O(max_points²) for any n.
pub fn median_pairwise_bandwidth<R: Rng + ?Sized>(
    data: ArrayView2<'_, f64>,
    max_points: usize,
    rng: &mut R,
) -> f64 {
    let n = data.nrows();
    let m = n.min(max_points.max(2));
    if m < 2 {
        return 1.0;
    }

    let mut idx: Vec<usize> = (0..n).collect();
    for i in 0..m {
        let j = rng.random_range(i..n);
        idx.swap(i, j);
    }
    idx.truncate(m);

    let mut sq_dists = Vec::with_capacity(m * (m - 1) / 2);
    for a in 0..m {
        let ra = data.row(idx[a]);
        for &b in &idx[a + 1..] {
            let rb = data.row(b);
            let d2: f64 = ra.iter().zip(rb.iter()).map(|(x, y)| (x - y).powi(2)).sum();
            sq_dists.push(d2);
        }
    }
    // Upper median, as in the classic median heuristic.
    sq_dists.sort_by(f64::total_cmp);
    let med2 = sq_dists[sq_dists.len() / 2];

    sanitize((med2 / 2.0).sqrt())
}

/// Replaces zero, negative or non-finite bandwidths with 1.0.
pub fn sanitize(h: f64) -> f64 {
    if h > 0.0 && h.is_finite() {
        h
    } else {
        1.0
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1, Array2, Axis};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_mad_bandwidth_matches_formula() {
        // median 3, absolute deviations {2,1,0,1,2} -> MAD 1
        let x = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let expected = 1.4826 * (4.0 / 15.0_f64).powf(0.2);
        assert!((mad_bandwidth(x.view()) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_constant_column_falls_back_to_one() {
        let x = Array1::from_elem(50, 2.5);
        assert_eq!(mad_bandwidth(x.view()), 1.0);
    }

    #[test]
    fn test_multi_column_takes_widest_times_sqrt_d() {
        let narrow = Array1::linspace(-1.0, 1.0, 40);
        let wide = Array1::linspace(-4.0, 4.0, 40);
        let data = ndarray::stack(Axis(1), &[narrow.view(), wide.view()]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let h = BandwidthRule::Mad.select(data.view(), &mut rng);
        let expected = mad_bandwidth(wide.view()) * 2.0_f64.sqrt();
        assert!((h - expected).abs() < 1e-12);
    }

    #[test]
    fn test_no_columns_gives_unit_bandwidth() {
        let data = Array2::<f64>::zeros((10, 0));
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(BandwidthRule::Mad.select(data.view(), &mut rng), 1.0);
    }

    #[test]
    fn test_median_pairwise_positive_and_deterministic() {
        let data = Array2::from_shape_fn((300, 2), |(i, j)| ((i * (j + 3)) as f64 * 0.1).sin());
        let rule = BandwidthRule::median_pairwise();
        let h1 = rule.select(data.view(), &mut ChaCha8Rng::seed_from_u64(5));
        let h2 = rule.select(data.view(), &mut ChaCha8Rng::seed_from_u64(5));
        assert!(h1 > 0.0, "bandwidth should be positive");
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_median_pairwise_small_sample_uses_all_pairs() {
        // squared distances {1, 4, 1}: upper median 1 -> sigma = sqrt(1/2)
        let data = array![[0.0], [1.0], [2.0]];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let h = median_pairwise_bandwidth(data.view(), 256, &mut rng);
        assert!((h - 0.5_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize(0.0), 1.0);
        assert_eq!(sanitize(f64::NAN), 1.0);
        assert_eq!(sanitize(-3.0), 1.0);
        assert_eq!(sanitize(0.25), 0.25);
    }
}

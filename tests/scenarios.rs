//! End-to-end behavior on simulated data.

use std::sync::Arc;

use kci::{Dataset, IndependenceTest, KciConfig, KciTest, KernelKind, NullMethod};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Normal, StandardNormal};

fn normals(rng: &mut ChaCha8Rng, n: usize) -> Vec<f64> {
    (0..n).map(|_| rng.sample(StandardNormal)).collect()
}

fn dataset(columns: Vec<(&str, Vec<f64>)>) -> Arc<Dataset> {
    let columns = columns.into_iter().map(|(name, v)| (name.to_string(), v)).collect();
    Arc::new(Dataset::from_columns(columns).unwrap())
}

/// Three mutually independent standard normal columns.
fn independent_xyz(n: usize, seed: u64) -> Arc<Dataset> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let x = normals(&mut rng, n);
    let y = normals(&mut rng, n);
    let z = normals(&mut rng, n);
    dataset(vec![("x", x), ("y", y), ("z", z)])
}

/// x → z → y with noise scale 0.5 on each edge.
fn chain(n: usize, seed: u64) -> Arc<Dataset> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let x = normals(&mut rng, n);
    let z: Vec<f64> = x.iter().zip(normals(&mut rng, n)).map(|(a, e)| a + 0.5 * e).collect();
    let y: Vec<f64> = z.iter().zip(normals(&mut rng, n)).map(|(a, e)| a + 0.5 * e).collect();
    dataset(vec![("x", x), ("y", y), ("z", z)])
}

#[test]
fn test_near_copy_is_strongly_dependent() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let noise = Normal::new(0.0, 0.1).unwrap();
    let x = normals(&mut rng, 300);
    let y: Vec<f64> = x.iter().map(|v| v + noise.sample(&mut rng)).collect();
    let test = KciTest::new(dataset(vec![("x", x), ("y", y)]), KciConfig::default()).unwrap();

    let r = test.check_independence("x", "y", &[]).unwrap();
    assert!(r.p_value() < 0.01, "p = {}", r.p_value());
    assert!(!r.independent());
    assert!(r.score() > 0.0);
}

#[test]
fn test_detects_nonlinear_dependence() {
    let mut rejected = 0;
    for trial in 0..10 {
        let mut rng = ChaCha8Rng::seed_from_u64(100 + trial);
        let x = normals(&mut rng, 200);
        let y: Vec<f64> = x
            .iter()
            .zip(normals(&mut rng, 200))
            .map(|(v, e)| v * v + 0.1 * e)
            .collect();
        let test = KciTest::new(dataset(vec![("x", x), ("y", y)]), KciConfig::default()).unwrap();
        if !test.check_independence("x", "y", &[]).unwrap().independent() {
            rejected += 1;
        }
    }
    assert!(rejected >= 9, "rejected {rejected}/10");
}

#[test]
fn test_chain_is_separated_by_middle_variable() {
    let test = KciTest::new(chain(200, 7), KciConfig::default()).unwrap();

    let marginal = test.check_independence("x", "y", &[]).unwrap();
    assert!(!marginal.independent(), "p = {}", marginal.p_value());

    let conditional = test.check_independence("x", "y", &["z"]).unwrap();
    assert!(conditional.independent(), "p = {}", conditional.p_value());
}

#[test]
fn test_gamma_agrees_with_bootstrap_on_dependence() {
    let data = chain(150, 8);
    let mut test = KciTest::new(Arc::clone(&data), KciConfig::default()).unwrap();
    let boot = test.check_independence("x", "z", &[]).unwrap();
    test.set_null_method(NullMethod::Gamma).unwrap();
    let gamma = test.check_independence("x", "z", &[]).unwrap();
    assert!(!boot.independent());
    assert!(!gamma.independent());
    assert_eq!(boot.statistic(), gamma.statistic());
}

#[test]
fn test_permutation_method_rejects_dependence() {
    let config = KciConfig::default()
        .with_null_method(NullMethod::Permutation)
        .with_num_draws(199);
    let test = KciTest::new(chain(100, 9), config).unwrap();
    let r = test.check_independence("x", "z", &[]).unwrap();
    assert!((r.p_value() - 1.0 / 200.0).abs() < 1e-12, "p = {}", r.p_value());
}

#[test]
fn test_independent_data_mostly_accepted() {
    let mut accepted_marginal = 0;
    let mut accepted_conditional = 0;
    for trial in 0..20 {
        let config = KciConfig::default().with_num_draws(500);
        let test = KciTest::new(independent_xyz(100, 1000 + trial), config).unwrap();
        if test.check_independence("x", "y", &[]).unwrap().independent() {
            accepted_marginal += 1;
        }
        if test.check_independence("x", "y", &["z"]).unwrap().independent() {
            accepted_conditional += 1;
        }
    }
    assert!(accepted_marginal >= 15, "accepted {accepted_marginal}/20");
    assert!(accepted_conditional >= 14, "accepted {accepted_conditional}/20");
}

#[test]
fn test_linear_kernel_detects_linear_dependence() {
    let config = KciConfig::default().with_kernel(KernelKind::Linear);
    let test = KciTest::new(chain(150, 11), config).unwrap();
    let r = test.check_independence("x", "z", &[]).unwrap();
    assert!(!r.independent(), "p = {}", r.p_value());
    let c = test.check_independence("x", "y", &["z"]).unwrap();
    assert!((0.0..=1.0).contains(&c.p_value()));
}

#[test]
fn test_quadratic_kernel_detects_square() {
    let mut rng = ChaCha8Rng::seed_from_u64(12);
    let x = normals(&mut rng, 150);
    let y: Vec<f64> = x
        .iter()
        .zip(normals(&mut rng, 150))
        .map(|(v, e)| v * v + 0.1 * e)
        .collect();
    let config = KciConfig::default().with_kernel(KernelKind::quadratic());
    let test = KciTest::new(dataset(vec![("x", x), ("y", y)]), config).unwrap();
    let r = test.check_independence("x", "y", &[]).unwrap();
    assert!(!r.independent(), "p = {}", r.p_value());
}

#[test]
fn test_shared_across_threads() {
    let test = Arc::new(KciTest::new(chain(80, 10), KciConfig::default()).unwrap());
    let expected = test.check_independence("x", "y", &["z"]).unwrap().p_value();
    test.clear_caches();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let test = Arc::clone(&test);
            std::thread::spawn(move || test.check_independence("y", "x", &["z"]).unwrap().p_value())
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), expected);
    }
}

#[test]
#[ignore = "slow: 100 tests at n = 300"]
fn test_type_one_error_at_n300() {
    let mut accepted = 0;
    for trial in 0..100 {
        let test = KciTest::new(independent_xyz(300, 5000 + trial), KciConfig::default()).unwrap();
        if test.check_independence("x", "y", &["z"]).unwrap().p_value() > 0.05 {
            accepted += 1;
        }
    }
    assert!(accepted >= 90, "accepted {accepted}/100");
}

#[test]
#[ignore = "slow: null calibration over 200 datasets"]
fn test_null_p_values_are_uniform() {
    let mut p: Vec<f64> = (0..200)
        .map(|trial| {
            let test = KciTest::new(independent_xyz(100, 9000 + trial), KciConfig::default()).unwrap();
            test.check_independence("x", "y", &[]).unwrap().p_value()
        })
        .collect();
    p.sort_by(f64::total_cmp);

    // Kolmogorov–Smirnov distance to Uniform(0, 1)
    let m = p.len() as f64;
    let ks = p
        .iter()
        .enumerate()
        .map(|(i, &v)| (v - i as f64 / m).abs().max(((i + 1) as f64 / m - v).abs()))
        .fold(0.0, f64::max);
    assert!(ks < 0.15, "KS distance {ks}");
}

//! Causal chain: X → Z → Y
//!
//! X and Y are dependent, but Z carries all of the dependence, so X ⫫ Y | Z.
//! A constraint-based search uses exactly this pattern to remove the X–Y edge.
//!
//! Run: cargo run --example chain

use std::sync::Arc;

use kci::{Dataset, IndependenceTest, KciConfig, KciTest};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

fn main() -> kci::Result<()> {
    println!("=== KCI on a causal chain X -> Z -> Y ===\n");

    let n = 200;
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut noise = || -> f64 { rng.sample(StandardNormal) };

    let x: Vec<f64> = (0..n).map(|_| noise()).collect();
    let z: Vec<f64> = x.iter().map(|v| v.tanh() * 2.0 + 0.5 * noise()).collect();
    let y: Vec<f64> = z.iter().map(|v| v * v * 0.5 + 0.5 * noise()).collect();

    let data = Dataset::from_columns(vec![
        ("X".to_string(), x),
        ("Y".to_string(), y),
        ("Z".to_string(), z),
    ])?;
    let test = KciTest::new(Arc::new(data), KciConfig::default())?;

    for (a, b, cond) in [
        ("X", "Z", &[][..]),
        ("Z", "Y", &[][..]),
        ("X", "Y", &[][..]),
        ("X", "Y", &["Z"][..]),
    ] {
        let r = test.check_independence(a, b, cond)?;
        println!(
            "{:<14} p = {:.4}  statistic = {:.5}  -> {}",
            r.fact().to_string(),
            r.p_value(),
            r.statistic(),
            if r.independent() { "independent" } else { "dependent" }
        );
    }

    println!("\nExpected: the first three dependent, the last independent.");
    Ok(())
}

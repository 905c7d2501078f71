//! Independence facts, test outcomes, and the trait search algorithms call.

use std::fmt;

use crate::Result;

/// The statement `x ⫫ y | z`.
///
/// `z` is stored sorted and without duplicates, so two facts over the same conditioning
/// set compare equal regardless of the order it was given in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndependenceFact {
    pub x: String,
    pub y: String,
    pub z: Vec<String>,
}

impl IndependenceFact {
    pub fn new(x: &str, y: &str, z: &[&str]) -> Self {
        let mut z: Vec<String> = z.iter().map(|s| s.to_string()).collect();
        z.sort();
        z.dedup();
        Self {
            x: x.to_string(),
            y: y.to_string(),
            z,
        }
    }

    pub fn is_conditional(&self) -> bool {
        !self.z.is_empty()
    }
}

impl fmt::Display for IndependenceFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} _||_ {}", self.x, self.y)?;
        if !self.z.is_empty() {
            write!(f, " | {}", self.z.join(", "))?;
        }
        Ok(())
    }
}

/// Outcome of one test call.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndependenceResult {
    fact: IndependenceFact,
    independent: bool,
    p_value: f64,
    score: f64,
    statistic: f64,
}

impl IndependenceResult {
    /// Decides `independent = p > alpha` and scores the fact as `alpha − p`.
    pub fn new(fact: IndependenceFact, p_value: f64, statistic: f64, alpha: f64) -> Self {
        Self {
            fact,
            independent: p_value > alpha,
            p_value,
            score: alpha - p_value,
            statistic,
        }
    }

    pub fn fact(&self) -> &IndependenceFact {
        &self.fact
    }

    pub fn independent(&self) -> bool {
        self.independent
    }

    pub fn p_value(&self) -> f64 {
        self.p_value
    }

    /// `alpha − p`: negative for independence, larger means stronger dependence.
    pub fn score(&self) -> f64 {
        self.score
    }

    /// `(1/n)·tr(Kx·Ky)` on the (residualized) centered kernels.
    pub fn statistic(&self) -> f64 {
        self.statistic
    }
}

/// A conditional independence test over a fixed set of named variables.
pub trait IndependenceTest {
    fn check_independence(&self, x: &str, y: &str, z: &[&str]) -> Result<IndependenceResult>;

    fn alpha(&self) -> f64;

    /// Fails with [`crate::Error::InvalidConfiguration`] unless `0 < alpha < 1`.
    fn set_alpha(&mut self, alpha: f64) -> Result<()>;

    fn variables(&self) -> Vec<String>;
}

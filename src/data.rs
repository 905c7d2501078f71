//! Named, standardized sample matrices.

use std::collections::HashMap;

use ndarray::{Array2, Axis};

use crate::{Error, Result};

/// An n×p matrix of samples (rows) over named variables (columns).
///
/// Every column is standardized to zero mean and unit sample variance on construction;
/// constant columns are only centered. The dataset is immutable afterwards and is meant to
/// be shared behind an `Arc`.
///
/// ```rust
/// use kci::Dataset;
/// use ndarray::array;
///
/// let data = Dataset::new(vec!["a".into(), "b".into()], array![[1.0, 5.0], [3.0, 5.0]]).unwrap();
/// assert_eq!(data.column_index("b").unwrap(), 1);
/// assert_eq!(data.values()[[0, 0]], -data.values()[[1, 0]]);
/// assert_eq!(data.values()[[0, 1]], 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct Dataset {
    names: Vec<String>,
    index: HashMap<String, usize>,
    values: Array2<f64>,
}

impl Dataset {
    pub fn new(names: Vec<String>, mut values: Array2<f64>) -> Result<Self> {
        if names.len() != values.ncols() {
            return Err(Error::InvalidData(format!(
                "{} names for {} columns",
                names.len(),
                values.ncols()
            )));
        }
        if let Some(((r, c), v)) = values.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::InvalidData(format!(
                "non-finite value {v} at row {r}, column {}",
                names[c]
            )));
        }

        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(Error::InvalidData(format!("duplicate variable name {name}")));
            }
        }

        standardize(&mut values);
        Ok(Self {
            names,
            index,
            values,
        })
    }

    /// Builds a dataset from `(name, samples)` pairs of equal length.
    pub fn from_columns(columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let n = columns.first().map_or(0, |(_, v)| v.len());
        if let Some((name, v)) = columns.iter().find(|(_, v)| v.len() != n) {
            return Err(Error::InvalidData(format!(
                "column {name} has {} rows, expected {n}",
                v.len()
            )));
        }
        let values = Array2::from_shape_fn((n, columns.len()), |(i, j)| columns[j].1[i]);
        let names = columns.into_iter().map(|(name, _)| name).collect();
        Self::new(names, values)
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.values.ncols()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownVariable(name.to_string()))
    }

    /// Standardized values.
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Copies the given rows (all rows if `None`) of the given columns, in that order.
    pub fn select(&self, rows: Option<&[usize]>, cols: &[usize]) -> Array2<f64> {
        let by_col = self.values.select(Axis(1), cols);
        match rows {
            Some(rows) => by_col.select(Axis(0), rows),
            None => by_col,
        }
    }
}

fn standardize(values: &mut Array2<f64>) {
    let n = values.nrows();
    if n == 0 {
        return;
    }
    for mut col in values.columns_mut() {
        let mean = col.sum() / n as f64;
        col -= mean;
        if n < 2 {
            continue;
        }
        let var = col.iter().map(|v| v * v).sum::<f64>() / (n - 1) as f64;
        let sd = var.sqrt();
        if sd > 0.0 && sd.is_finite() {
            col /= sd;
        }
    }
}

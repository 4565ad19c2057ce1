//! Tabular records crossing the pipeline boundary
//!
//! A [`FeatureMatrix`] is an ordered sequence of rows over a fixed set of named
//! columns. Cells are numeric, categorical or missing; the
//! [`FeaturePreprocessor`](crate::preprocessing::FeaturePreprocessor) turns it into
//! a dense `Array2<f64>`.

pub mod loader;

pub use loader::{load_dataset, load_features, write_predictions};

use crate::error::{FarecastError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single cell of a [`FeatureMatrix`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureValue {
    Numeric(f64),
    Categorical(String),
    Missing,
}

impl FeatureValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FeatureValue::Categorical(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Missing, or a numeric NaN
    pub fn is_missing(&self) -> bool {
        match self {
            FeatureValue::Missing => true,
            FeatureValue::Numeric(v) => v.is_nan(),
            FeatureValue::Categorical(_) => false,
        }
    }

    /// Exact key used for duplicate detection
    fn row_key(&self) -> CellKey<'_> {
        match self {
            FeatureValue::Numeric(v) => CellKey::Numeric(v.to_bits()),
            FeatureValue::Categorical(s) => CellKey::Categorical(s.as_str()),
            FeatureValue::Missing => CellKey::Missing,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum CellKey<'a> {
    Numeric(u64),
    Categorical(&'a str),
    Missing,
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        if v.is_nan() {
            FeatureValue::Missing
        } else {
            FeatureValue::Numeric(v)
        }
    }
}

impl From<&str> for FeatureValue {
    fn from(s: &str) -> Self {
        FeatureValue::Categorical(s.to_string())
    }
}

impl From<Option<f64>> for FeatureValue {
    fn from(v: Option<f64>) -> Self {
        v.map(FeatureValue::from).unwrap_or(FeatureValue::Missing)
    }
}

/// Row-oriented table with named columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    rows: Vec<Vec<FeatureValue>>,
}

impl FeatureMatrix {
    /// Create an empty matrix over the given columns
    pub fn new(columns: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(FarecastError::DataError(format!(
                    "duplicate column name '{}'", name
                )));
            }
        }
        Ok(Self { columns, rows: Vec::new() })
    }

    /// Build a fully numeric matrix from a dense array
    pub fn from_array(columns: Vec<String>, x: &Array2<f64>) -> Result<Self> {
        if columns.len() != x.ncols() {
            return Err(FarecastError::ShapeError {
                expected: format!("{} columns", columns.len()),
                actual: format!("{} columns", x.ncols()),
            });
        }
        let mut matrix = Self::new(columns)?;
        for row in x.rows() {
            matrix.rows.push(row.iter().map(|&v| FeatureValue::from(v)).collect());
        }
        Ok(matrix)
    }

    /// Append a row; its width must match the column count
    pub fn push_row(&mut self, row: Vec<FeatureValue>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(FarecastError::ShapeError {
                expected: format!("{} values", self.columns.len()),
                actual: format!("{} values", row.len()),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, idx: usize) -> Option<&[FeatureValue]> {
        self.rows.get(idx).map(|r| r.as_slice())
    }

    pub fn rows(&self) -> impl Iterator<Item = &[FeatureValue]> {
        self.rows.iter().map(|r| r.as_slice())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column, top to bottom
    pub fn column_values(&self, name: &str) -> Result<Vec<&FeatureValue>> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| FarecastError::DataError(format!("column '{}' not found", name)))?;
        Ok(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// New matrix containing the given rows, in the given order
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self> {
        let mut rows = Vec::with_capacity(indices.len());
        for &i in indices {
            let row = self.rows.get(i).ok_or_else(|| {
                FarecastError::DataError(format!("row {} out of range ({} rows)", i, self.rows.len()))
            })?;
            rows.push(row.clone());
        }
        Ok(Self { columns: self.columns.clone(), rows })
    }

    /// New matrix without the named columns
    pub fn drop_columns(&self, names: &[&str]) -> Self {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !names.contains(&self.columns[i].as_str()))
            .collect();
        Self {
            columns: keep.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| keep.iter().map(|&i| r[i].clone()).collect())
                .collect(),
        }
    }
}

/// Feature matrix paired with its regression target
#[derive(Debug, Clone)]
pub struct Dataset {
    pub features: FeatureMatrix,
    pub target: Array1<f64>,
}

impl Dataset {
    pub fn new(features: FeatureMatrix, target: Array1<f64>) -> Result<Self> {
        if features.n_rows() != target.len() {
            return Err(FarecastError::ShapeError {
                expected: format!("{} target values", features.n_rows()),
                actual: format!("{} target values", target.len()),
            });
        }
        Ok(Self { features, target })
    }

    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    /// Remove rows whose features and target repeat an earlier row.
    ///
    /// Returns the deduplicated dataset and the number of rows dropped.
    pub fn drop_duplicates(&self) -> Result<(Self, usize)> {
        let mut seen = HashSet::new();
        let mut keep = Vec::with_capacity(self.len());
        for (i, row) in self.features.rows().enumerate() {
            let cells: Vec<CellKey<'_>> = row.iter().map(FeatureValue::row_key).collect();
            if seen.insert((cells, self.target[i].to_bits())) {
                keep.push(i);
            }
        }
        let dropped = self.len() - keep.len();
        let features = self.features.select_rows(&keep)?;
        let target = Array1::from_iter(keep.iter().map(|&i| self.target[i]));
        Ok((Self { features, target }, dropped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample_matrix() -> FeatureMatrix {
        let mut m = FeatureMatrix::new(vec!["stops".into(), "airline".into()]).unwrap();
        m.push_row(vec![1.0.into(), "IndiGo".into()]).unwrap();
        m.push_row(vec![FeatureValue::Missing, "Vistara".into()]).unwrap();
        m.push_row(vec![0.0.into(), "IndiGo".into()]).unwrap();
        m
    }

    #[test]
    fn test_push_row_checks_width() {
        let mut m = sample_matrix();
        let result = m.push_row(vec![1.0.into()]);
        assert!(matches!(result, Err(FarecastError::ShapeError { .. })));
        assert_eq!(m.n_rows(), 3);
    }

    #[test]
    fn test_duplicate_column_names_rejected() {
        let result = FeatureMatrix::new(vec!["a".into(), "a".into()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_select_and_drop() {
        let m = sample_matrix();
        let sub = m.select_rows(&[2, 0]).unwrap();
        assert_eq!(sub.n_rows(), 2);
        assert_eq!(sub.row(0).unwrap()[0], FeatureValue::Numeric(0.0));

        let dropped = m.drop_columns(&["airline"]);
        assert_eq!(dropped.columns(), &["stops".to_string()]);
        assert!(m.select_rows(&[5]).is_err());
    }

    #[test]
    fn test_from_array_marks_nan_missing() {
        let x = array![[1.0, f64::NAN], [2.0, 3.0]];
        let m = FeatureMatrix::from_array(vec!["a".into(), "b".into()], &x).unwrap();
        assert!(m.row(0).unwrap()[1].is_missing());
        assert_eq!(m.row(1).unwrap()[1].as_f64(), Some(3.0));
    }

    #[test]
    fn test_drop_duplicates() {
        let mut m = FeatureMatrix::new(vec!["a".into()]).unwrap();
        m.push_row(vec![1.0.into()]).unwrap();
        m.push_row(vec![1.0.into()]).unwrap();
        m.push_row(vec![1.0.into()]).unwrap();
        let ds = Dataset::new(m, array![10.0, 10.0, 11.0]).unwrap();
        let (dedup, dropped) = ds.drop_duplicates().unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(dedup.len(), 2);
        assert_eq!(dedup.target[1], 11.0);
    }

    #[test]
    fn test_drop_duplicates_keeps_rows_with_separator_text() {
        let mut m = FeatureMatrix::new(vec!["route".into(), "airline".into()]).unwrap();
        m.push_row(vec!["x|c:y".into(), "z".into()]).unwrap();
        m.push_row(vec!["x".into(), "y|c:z".into()]).unwrap();
        m.push_row(vec!["x".into(), FeatureValue::Missing]).unwrap();
        m.push_row(vec!["x".into(), "".into()]).unwrap();
        let ds = Dataset::new(m, array![1.0, 1.0, 1.0, 1.0]).unwrap();
        let (dedup, dropped) = ds.drop_duplicates().unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(dedup.len(), 4);
    }
}

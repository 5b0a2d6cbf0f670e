//! Feature contract: the named, ordered columns a model is trained on.

use ndarray::{Array2, Axis};

use crate::error::TrainingError;

/// Numeric feature matrix with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    /// Wraps `values`; the column count must match `columns`.
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self, TrainingError> {
        if values.ncols() != columns.len() {
            return Err(TrainingError::SchemaMismatch(format!(
                "{} column names for {} columns",
                columns.len(),
                values.ncols()
            )));
        }
        Ok(Self { columns, values })
    }

    /// Column names in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Raw values, one row per sample.
    #[must_use]
    pub const fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Number of samples.
    #[must_use]
    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    /// Copy of the given rows, in the given order.
    #[must_use]
    pub fn select_rows(&self, rows: &[usize]) -> Array2<f64> {
        self.values.select(Axis(0), rows)
    }
}

/// What the pipeline expects of its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureContract {
    /// Ordered feature names.
    pub features: Vec<String>,
    /// Label column name.
    pub target: String,
}

impl FeatureContract {
    /// Checks columns (names and order) and label alignment.
    pub fn check(&self, matrix: &FeatureMatrix, labels: &[String]) -> Result<(), TrainingError> {
        if self.features.is_empty() {
            return Err(TrainingError::SchemaMismatch("no features configured".into()));
        }
        if matrix.columns() != self.features.as_slice() {
            return Err(TrainingError::SchemaMismatch(format!(
                "expected columns [{}], got [{}]",
                self.features.join(", "),
                matrix.columns().join(", ")
            )));
        }
        if labels.len() != matrix.nrows() {
            return Err(TrainingError::SchemaMismatch(format!(
                "{} labels for {} rows",
                labels.len(),
                matrix.nrows()
            )));
        }
        Ok(())
    }
}

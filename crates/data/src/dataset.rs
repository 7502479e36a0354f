//! Immutable labeled tabular datasets.

use dpfl_core::{FedError, Matrix, Result, Vector};

/// Column layout of the encoded insurance data.
///
/// `sex`, `smoker` and `region` are integer codes produced upstream.
pub const INSURANCE_COLUMNS: [&str; 6] = ["age", "sex", "bmi", "children", "smoker", "region"];

/// Continuous insurance columns that are standardized per client.
pub const INSURANCE_CONTINUOUS: [usize; 2] = [0, 2];

/// A numeric feature matrix with one scalar label per row.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    features: Matrix,
    labels: Vector,
    column_names: Vec<String>,
}

impl Dataset {
    /// Create a dataset, validating shapes and finiteness.
    ///
    /// `column_names` may be empty, in which case names `x0, x1, ...` are
    /// generated.
    pub fn new(features: Matrix, labels: Vector, column_names: Vec<String>) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(FedError::shape(
                "dataset labels",
                features.nrows(),
                labels.len(),
            ));
        }
        if labels.is_empty() {
            return Err(FedError::degenerate("dataset has no rows"));
        }
        if features.ncols() == 0 {
            return Err(FedError::degenerate("dataset has no feature columns"));
        }
        if !features.iter().chain(labels.iter()).all(|v| v.is_finite()) {
            return Err(FedError::degenerate("dataset contains non-finite values"));
        }

        let column_names = if column_names.is_empty() {
            (0..features.ncols()).map(|j| format!("x{j}")).collect()
        } else {
            if column_names.len() != features.ncols() {
                return Err(FedError::shape(
                    "dataset column names",
                    features.ncols(),
                    column_names.len(),
                ));
            }
            column_names
        };

        Ok(Self {
            features,
            labels,
            column_names,
        })
    }

    /// Create a dataset with the insurance column layout.
    pub fn insurance(features: Matrix, labels: Vector) -> Result<Self> {
        let names = INSURANCE_COLUMNS.iter().map(|s| s.to_string()).collect();
        Self::new(features, labels, names)
    }

    /// Raw feature matrix (no intercept column).
    pub fn features(&self) -> &Matrix {
        &self.features
    }

    /// Label vector.
    pub fn labels(&self) -> &Vector {
        &self.labels
    }

    /// Column names, one per feature.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false; empty datasets are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of raw feature columns.
    pub fn num_features(&self) -> usize {
        self.features.ncols()
    }

    /// Index of a named column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|c| c == name)
    }
}

//! Core data types for harmonization.
//!
//! This module provides [`FeatureMatrix`] (per-sample feature vectors with
//! stable names and ordering) and [`CovariateSet`] (per-sample biological
//! covariates whose variance must be preserved by harmonization).

use nalgebra::DMatrix;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{HarmonizeError, Result};

/// An ordered set of samples, each a fixed-length vector of named features.
///
/// Rows are samples, columns are features. Every sample carries the same
/// features in the same order and no missing values are permitted; inputs
/// with NaN or infinite entries are rejected at construction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureMatrix {
    /// Feature names, one per column.
    feature_names: Vec<String>,

    /// Sample-major data, `n_samples x n_features`.
    data: DMatrix<f64>,
}

impl FeatureMatrix {
    /// Create a feature matrix from named columns and sample-major data.
    ///
    /// # Errors
    ///
    /// Returns an error if the matrix is empty, the column count does not
    /// match the number of feature names, or any entry is non-finite.
    pub fn new(feature_names: Vec<String>, data: DMatrix<f64>) -> Result<Self> {
        if feature_names.is_empty() {
            return Err(HarmonizeError::invalid_input("no features provided"));
        }
        if data.nrows() == 0 {
            return Err(HarmonizeError::invalid_input("no samples provided"));
        }
        if data.ncols() != feature_names.len() {
            return Err(HarmonizeError::invalid_input(format!(
                "{} feature names but {} data columns",
                feature_names.len(),
                data.ncols()
            )));
        }
        for (i, v) in data.iter().enumerate() {
            if !v.is_finite() {
                let (row, col) = (i % data.nrows(), i / data.nrows());
                return Err(HarmonizeError::numerical_instability(format!(
                    "non-finite value at sample {row}, feature '{}'",
                    feature_names[col]
                )));
            }
        }
        Ok(Self {
            feature_names,
            data,
        })
    }

    /// Build from per-sample rows.
    ///
    /// # Errors
    ///
    /// Returns an error if rows are empty, ragged, or contain non-finite
    /// values.
    pub fn from_rows(feature_names: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        if rows.is_empty() {
            return Err(HarmonizeError::invalid_input("no samples provided"));
        }
        let width = feature_names.len();
        for (i, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(HarmonizeError::invalid_input(format!(
                    "sample {i} has {} values, expected {width}",
                    row.len()
                )));
            }
        }
        let data = DMatrix::from_fn(rows.len(), width, |r, c| rows[r][c]);
        Self::new(feature_names, data)
    }

    /// Number of samples (rows).
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    /// Number of features (columns).
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }

    /// Feature names in column order.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Column index of a named feature.
    #[must_use]
    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|n| n == name)
    }

    /// The underlying `n_samples x n_features` matrix.
    #[must_use]
    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// One feature column as a vector of per-sample values.
    #[must_use]
    pub fn column(&self, feature: usize) -> Vec<f64> {
        self.data.column(feature).iter().copied().collect()
    }

    /// Replace the data while keeping names and shape.
    ///
    /// Used by the ComBat transform, which must produce output shape- and
    /// order-compatible with its input.
    pub(crate) fn with_data(&self, data: DMatrix<f64>) -> Result<Self> {
        if data.shape() != self.data.shape() {
            return Err(HarmonizeError::invalid_input(format!(
                "shape changed from {:?} to {:?}",
                self.data.shape(),
                data.shape()
            )));
        }
        Self::new(self.feature_names.clone(), data)
    }
}

/// A single per-sample covariate.
///
/// Continuous covariates enter the design matrix verbatim; categorical ones
/// are dummy-encoded (drop-first) by the design builder.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Covariate {
    /// Numeric covariate, e.g. age.
    Continuous(Vec<f64>),
    /// Categorical covariate, e.g. task condition.
    Categorical(Vec<String>),
}

impl Covariate {
    /// Number of samples covered.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Continuous(v) => v.len(),
            Self::Categorical(v) => v.len(),
        }
    }

    /// Whether the covariate covers no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Named per-sample covariates, aligned with the samples of a run.
///
/// Covariates carry biological signal; the ComBat mean model includes them so
/// that their associated variance is protected from site-effect removal.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CovariateSet {
    names: Vec<String>,
    covariates: Vec<Covariate>,
}

impl CovariateSet {
    /// An empty covariate set (harmonization without protected covariates).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a named covariate, preserving insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already present, the covariate length
    /// disagrees with previously added ones, or a continuous covariate
    /// contains non-finite values.
    pub fn push(&mut self, name: impl Into<String>, covariate: Covariate) -> Result<()> {
        let name = name.into();
        if self.names.contains(&name) {
            return Err(HarmonizeError::invalid_input(format!(
                "duplicate covariate '{name}'"
            )));
        }
        if let Some(expected) = self.covariates.first().map(Covariate::len) {
            if covariate.len() != expected {
                return Err(HarmonizeError::length_mismatch(expected, covariate.len()));
            }
        }
        if let Covariate::Continuous(values) = &covariate {
            if values.iter().any(|v| !v.is_finite()) {
                return Err(HarmonizeError::numerical_instability(format!(
                    "non-finite value in covariate '{name}'"
                )));
            }
        }
        self.names.push(name);
        self.covariates.push(covariate);
        Ok(())
    }

    /// Number of covariates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the set holds no covariates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Number of samples each covariate covers, if any covariates exist.
    #[must_use]
    pub fn n_samples(&self) -> Option<usize> {
        self.covariates.first().map(Covariate::len)
    }

    /// Covariate names in insertion order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Iterate over `(name, covariate)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Covariate)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.covariates.iter())
    }

    /// Look up a covariate by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Covariate> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.covariates[i])
    }
}

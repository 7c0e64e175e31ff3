//! Configuration for harmonization runs.
//!
//! This module provides the [`HarmonizeConfig`] struct which centralizes all
//! tunable parameters (convergence tolerances, iteration caps, fold counts)
//! along with presets for common usage profiles.
//!
//! Every fit/evaluate call takes the configuration by reference; there are no
//! process-wide mutable defaults, so concurrent runs with different tolerances
//! cannot interfere.
//!
//! # Example
//!
//! ```
//! use eeg_harmonize::HarmonizeConfig;
//!
//! // Use default configuration
//! let config = HarmonizeConfig::default();
//!
//! // Use a preset
//! let strict = HarmonizeConfig::strict();
//! let exploratory = HarmonizeConfig::exploratory();
//! ```

use crate::error::{HarmonizeError, Result};

/// Configuration for harmonization and KPI evaluation.
///
/// # Core Parameters
///
/// - `eb_tol` / `eb_max_iter`: convergence of the empirical-Bayes shrinkage
///   fixed point (maximum relative parameter change between iterations).
/// - `mean_tol` / `mean_max_iter`: convergence of the geometric-mean fixed
///   point on the SPD manifold (Frobenius norm of the tangent update).
/// - `leakage_folds`: stratified cross-validation folds for site-leakage AUC.
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonizeConfig {
    // Empirical-Bayes fit
    /// Convergence tolerance for the EB shrinkage iteration.
    pub eb_tol: f64,

    /// Iteration cap for the EB shrinkage iteration.
    pub eb_max_iter: usize,

    /// Whether to apply empirical-Bayes shrinkage at all. When disabled the
    /// naive per-site method-of-moments estimates are used directly.
    pub empirical_bayes: bool,

    // SPD manifold
    /// Convergence tolerance for the geometric-mean fixed point.
    pub mean_tol: f64,

    /// Iteration cap for the geometric-mean fixed point.
    pub mean_max_iter: usize,

    /// Eigenvalue floor below which a matrix is rejected as non-SPD.
    pub spd_eig_tol: f64,

    /// Maximum relative asymmetry tolerated before symmetrization is refused.
    pub symmetry_tol: f64,

    // Site-leakage AUC
    /// Number of stratified cross-validation folds.
    pub leakage_folds: usize,

    /// Seed for the stratified fold shuffle, so leakage runs are reproducible.
    pub leakage_seed: u64,

    /// Gradient-descent epochs for the one-vs-rest logistic classifier.
    pub leakage_epochs: usize,

    /// Gradient-descent learning rate.
    pub leakage_learning_rate: f64,

    /// L2 regularization strength for the classifier.
    pub leakage_l2: f64,

    // ERP gates
    /// Fraction of samples allowed outside an ERP gate tolerance before the
    /// gate is reported as failed.
    pub erp_max_exceed_fraction: f64,

    // Numerical thresholds
    /// General numerical epsilon.
    pub numerical_eps: f64,
}

impl Default for HarmonizeConfig {
    fn default() -> Self {
        Self {
            // Empirical-Bayes fit
            eb_tol: 1e-4,
            eb_max_iter: 100,
            empirical_bayes: true,

            // SPD manifold
            mean_tol: 1e-6,
            mean_max_iter: 50,
            spd_eig_tol: 1e-10,
            symmetry_tol: 1e-8,

            // Site-leakage AUC
            leakage_folds: 5,
            leakage_seed: 42,
            leakage_epochs: 200,
            leakage_learning_rate: 0.5,
            leakage_l2: 1e-3,

            // ERP gates
            erp_max_exceed_fraction: 0.10,

            // Numerical thresholds
            numerical_eps: 1e-12,
        }
    }
}

impl HarmonizeConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.eb_tol <= 0.0 {
            return Err(HarmonizeError::invalid_config("eb_tol must be positive"));
        }
        if self.eb_max_iter == 0 {
            return Err(HarmonizeError::invalid_config(
                "eb_max_iter must be at least 1",
            ));
        }
        if self.mean_tol <= 0.0 {
            return Err(HarmonizeError::invalid_config("mean_tol must be positive"));
        }
        if self.mean_max_iter == 0 {
            return Err(HarmonizeError::invalid_config(
                "mean_max_iter must be at least 1",
            ));
        }
        if self.spd_eig_tol < 0.0 {
            return Err(HarmonizeError::invalid_config(
                "spd_eig_tol must be non-negative",
            ));
        }
        if self.leakage_folds < 2 {
            return Err(HarmonizeError::invalid_config(
                "leakage_folds must be at least 2",
            ));
        }
        if self.leakage_learning_rate <= 0.0 {
            return Err(HarmonizeError::invalid_config(
                "leakage_learning_rate must be positive",
            ));
        }
        if self.leakage_l2 < 0.0 {
            return Err(HarmonizeError::invalid_config(
                "leakage_l2 must be non-negative",
            ));
        }
        if !(0.0..=1.0).contains(&self.erp_max_exceed_fraction) {
            return Err(HarmonizeError::invalid_config(
                "erp_max_exceed_fraction must be in [0, 1]",
            ));
        }
        Ok(())
    }

    /// Preset with tighter convergence for publication-grade runs.
    ///
    /// Tolerances are an order of magnitude tighter and the iteration caps
    /// doubled; runtime grows accordingly.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            eb_tol: 1e-5,
            eb_max_iter: 200,
            mean_tol: 1e-8,
            mean_max_iter: 100,
            leakage_folds: 10,
            ..Self::default()
        }
    }

    /// Preset for quick exploratory passes over a new dataset.
    #[must_use]
    pub fn exploratory() -> Self {
        Self {
            eb_tol: 1e-3,
            eb_max_iter: 50,
            mean_tol: 1e-4,
            mean_max_iter: 25,
            leakage_folds: 3,
            leakage_epochs: 100,
            ..Self::default()
        }
    }

    /// Set the EB convergence tolerance.
    #[must_use]
    pub const fn with_eb_tol(mut self, tol: f64) -> Self {
        self.eb_tol = tol;
        self
    }

    /// Set the EB iteration cap.
    #[must_use]
    pub const fn with_eb_max_iter(mut self, cap: usize) -> Self {
        self.eb_max_iter = cap;
        self
    }

    /// Enable or disable empirical-Bayes shrinkage.
    #[must_use]
    pub const fn with_empirical_bayes(mut self, enabled: bool) -> Self {
        self.empirical_bayes = enabled;
        self
    }

    /// Set the geometric-mean convergence tolerance.
    #[must_use]
    pub const fn with_mean_tol(mut self, tol: f64) -> Self {
        self.mean_tol = tol;
        self
    }

    /// Set the geometric-mean iteration cap.
    #[must_use]
    pub const fn with_mean_max_iter(mut self, cap: usize) -> Self {
        self.mean_max_iter = cap;
        self
    }

    /// Set the stratified fold count for leakage AUC.
    #[must_use]
    pub const fn with_leakage_folds(mut self, folds: usize) -> Self {
        self.leakage_folds = folds;
        self
    }

    /// Set the fold-shuffle seed.
    #[must_use]
    pub const fn with_leakage_seed(mut self, seed: u64) -> Self {
        self.leakage_seed = seed;
        self
    }

    /// Set the allowed out-of-tolerance fraction for ERP gates.
    #[must_use]
    pub const fn with_erp_max_exceed_fraction(mut self, fraction: f64) -> Self {
        self.erp_max_exceed_fraction = fraction;
        self
    }
}

//! Error types for harmonization operations.
//!
//! The taxonomy follows three tiers: input-validity errors (fatal to the
//! run, never retried), numerical-instability errors (fatal to the affected
//! feature or sample, isolated from the rest of the population), and
//! metric-undefined errors (reported as a missing KPI value).

use thiserror::Error;

/// Main error type for harmonization operations.
#[derive(Error, Debug)]
pub enum HarmonizeError {
    /// Input validation errors.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A site level has too few samples for variance estimation.
    #[error("Site '{site}' has {actual} sample(s); at least {min} required")]
    InsufficientSiteSamples {
        site: String,
        min: usize,
        actual: usize,
    },

    /// Only one site level is present; harmonization is a no-op.
    #[error("Only one site level ('{site}') present; harmonization is a no-op")]
    SingleSite { site: String },

    /// Per-sample arrays have mismatched lengths.
    #[error("Length mismatch: {expected} samples expected, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// The empirical-Bayes fixed-point iteration did not converge.
    #[error("Empirical-Bayes fit for site '{site}' did not converge within {max_iter} iterations (last change {last_change:.3e})")]
    NonConvergence {
        site: String,
        max_iter: usize,
        last_change: f64,
    },

    /// The geometric-mean fixed-point iteration did not converge.
    #[error("Geometric mean did not converge within {max_iter} iterations (last update norm {last_update:.3e})")]
    ManifoldMeanNonConvergence { max_iter: usize, last_update: f64 },

    /// A tangent-space back-projection left the SPD manifold.
    #[error("Manifold projection failed: {reason}")]
    ManifoldProjection { reason: String },

    /// A KPI is undefined for the given data (e.g. zero total variance).
    #[error("Metric '{metric}' is undefined: {reason}")]
    UndefinedMetric { metric: String, reason: String },

    /// A matrix expected to be symmetric is not.
    #[error("Matrix is not symmetric: max asymmetry {max_asymmetry:.3e}")]
    NotSymmetric { max_asymmetry: f64 },

    /// A matrix expected to be positive-definite is not.
    #[error("Matrix is not positive-definite: smallest eigenvalue {min_eigenvalue:.3e}")]
    NotPositiveDefinite { min_eigenvalue: f64 },

    /// Numerical computation produced NaN or Inf.
    #[error("Numerical instability: {context}")]
    NumericalInstability { context: String },

    /// Configuration validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for harmonization operations.
pub type Result<T> = std::result::Result<T, HarmonizeError>;

impl HarmonizeError {
    /// Create an invalid input error.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an insufficient site samples error.
    #[must_use]
    pub fn insufficient_site_samples(site: impl Into<String>, min: usize, actual: usize) -> Self {
        Self::InsufficientSiteSamples {
            site: site.into(),
            min,
            actual,
        }
    }

    /// Create a single-site error.
    #[must_use]
    pub fn single_site(site: impl Into<String>) -> Self {
        Self::SingleSite { site: site.into() }
    }

    /// Create a length mismatch error.
    #[must_use]
    pub const fn length_mismatch(expected: usize, actual: usize) -> Self {
        Self::LengthMismatch { expected, actual }
    }

    /// Create a non-convergence error for the empirical-Bayes fit.
    #[must_use]
    pub fn non_convergence(site: impl Into<String>, max_iter: usize, last_change: f64) -> Self {
        Self::NonConvergence {
            site: site.into(),
            max_iter,
            last_change,
        }
    }

    /// Create a manifold projection error.
    #[must_use]
    pub fn manifold_projection(reason: impl Into<String>) -> Self {
        Self::ManifoldProjection {
            reason: reason.into(),
        }
    }

    /// Create an undefined metric error.
    #[must_use]
    pub fn undefined_metric(metric: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UndefinedMetric {
            metric: metric.into(),
            reason: reason.into(),
        }
    }

    /// Create a numerical instability error.
    #[must_use]
    pub fn numerical_instability(context: impl Into<String>) -> Self {
        Self::NumericalInstability {
            context: context.into(),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

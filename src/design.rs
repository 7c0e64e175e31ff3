//! Site/covariate design construction.
//!
//! Turns per-sample site labels and covariates into the fixed-effects design
//! used by the ComBat mean model: one indicator column per site level (full
//! one-hot, no intercept) followed by one column per covariate, categorical
//! covariates dummy-encoded with the first level dropped.

use nalgebra::DMatrix;
use tracing::debug;

use crate::data::{Covariate, CovariateSet};
use crate::error::{HarmonizeError, Result};

/// Minimum number of samples per site level; below this the per-site variance
/// estimate is undefined.
pub const MIN_SITE_SAMPLES: usize = 2;

/// Fixed-effects design for a harmonization run.
///
/// Site levels are canonicalized in first-appearance order and the design
/// matrix column layout is `[site columns.., covariate columns..]`.
#[derive(Debug, Clone)]
pub struct SiteDesign {
    site_levels: Vec<String>,
    site_index: Vec<usize>,
    site_counts: Vec<usize>,
    column_names: Vec<String>,
    matrix: DMatrix<f64>,
}

impl SiteDesign {
    /// Build the design from per-sample site labels and covariates.
    ///
    /// # Errors
    ///
    /// - [`HarmonizeError::SingleSite`] if only one distinct site label is
    ///   present (harmonization would be a no-op; the caller decides how to
    ///   report that).
    /// - [`HarmonizeError::InsufficientSiteSamples`] if any site level has
    ///   fewer than [`MIN_SITE_SAMPLES`] samples.
    /// - [`HarmonizeError::LengthMismatch`] if covariates cover a different
    ///   number of samples than the site labels.
    pub fn build(sites: &[String], covariates: &CovariateSet) -> Result<Self> {
        if sites.is_empty() {
            return Err(HarmonizeError::invalid_input("no site labels provided"));
        }
        if let Some(n_cov) = covariates.n_samples() {
            if n_cov != sites.len() {
                return Err(HarmonizeError::length_mismatch(sites.len(), n_cov));
            }
        }

        // Canonical site levels, first-appearance order
        let mut site_levels: Vec<String> = Vec::new();
        let mut site_index = Vec::with_capacity(sites.len());
        for site in sites {
            let idx = match site_levels.iter().position(|s| s == site) {
                Some(idx) => idx,
                None => {
                    site_levels.push(site.clone());
                    site_levels.len() - 1
                }
            };
            site_index.push(idx);
        }

        if site_levels.len() < 2 {
            return Err(HarmonizeError::single_site(site_levels[0].clone()));
        }

        let mut site_counts = vec![0usize; site_levels.len()];
        for &idx in &site_index {
            site_counts[idx] += 1;
        }
        for (level, &count) in site_levels.iter().zip(site_counts.iter()) {
            if count < MIN_SITE_SAMPLES {
                return Err(HarmonizeError::insufficient_site_samples(
                    level.clone(),
                    MIN_SITE_SAMPLES,
                    count,
                ));
            }
        }

        let n = sites.len();
        let n_sites = site_levels.len();

        // Covariate columns: continuous verbatim, categorical drop-first
        let mut cov_columns: Vec<(String, Vec<f64>)> = Vec::new();
        for (name, covariate) in covariates.iter() {
            match covariate {
                Covariate::Continuous(values) => {
                    cov_columns.push((name.to_string(), values.clone()));
                }
                Covariate::Categorical(values) => {
                    let mut levels: Vec<&String> = Vec::new();
                    for v in values {
                        if !levels.contains(&v) {
                            levels.push(v);
                        }
                    }
                    // First level is the reference and gets no column
                    for level in levels.iter().skip(1) {
                        let column = values
                            .iter()
                            .map(|v| if v == *level { 1.0 } else { 0.0 })
                            .collect();
                        cov_columns.push((format!("{name}={level}"), column));
                    }
                }
            }
        }

        let n_cols = n_sites + cov_columns.len();
        let mut matrix = DMatrix::zeros(n, n_cols);
        for (sample, &idx) in site_index.iter().enumerate() {
            matrix[(sample, idx)] = 1.0;
        }
        for (offset, (_, column)) in cov_columns.iter().enumerate() {
            for (sample, &v) in column.iter().enumerate() {
                matrix[(sample, n_sites + offset)] = v;
            }
        }

        let mut column_names = site_levels.clone();
        column_names.extend(cov_columns.into_iter().map(|(name, _)| name));

        debug!(
            n_samples = n,
            n_sites,
            n_covariate_columns = n_cols - n_sites,
            "built site/covariate design"
        );

        Ok(Self {
            site_levels,
            site_index,
            site_counts,
            column_names,
            matrix,
        })
    }

    /// Canonical ordered site levels.
    #[must_use]
    pub fn site_levels(&self) -> &[String] {
        &self.site_levels
    }

    /// Per-sample index into [`Self::site_levels`].
    #[must_use]
    pub fn site_index(&self) -> &[usize] {
        &self.site_index
    }

    /// Sample count per site level.
    #[must_use]
    pub fn site_counts(&self) -> &[usize] {
        &self.site_counts
    }

    /// Number of distinct site levels.
    #[must_use]
    pub fn n_sites(&self) -> usize {
        self.site_levels.len()
    }

    /// Number of samples.
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.site_index.len()
    }

    /// Design column names: site levels, then covariate columns.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// The full `n_samples x (n_sites + n_covariates)` design matrix.
    #[must_use]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Sample indices belonging to one site level.
    #[must_use]
    pub fn samples_of_site(&self, site: usize) -> Vec<usize> {
        self.site_index
            .iter()
            .enumerate()
            .filter(|(_, &idx)| idx == site)
            .map(|(sample, _)| sample)
            .collect()
    }
}

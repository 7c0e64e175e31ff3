//! Empirical-Bayes location/scale harmonization for feature vectors.
//!
//! This module implements the ComBat fit/transform pair on a
//! [`FeatureMatrix`] with a [`SiteDesign`].
//!
//! # Pipeline Overview
//!
//! 1. OLS fit of the mean model (site indicators + covariates)
//! 2. Pooled grand mean and pooled variance; zero-variance passthrough
//! 3. Standardize to zero mean / unit variance across all samples
//! 4. Per-site method-of-moments location/scale estimates
//! 5. Empirical-Bayes shrinkage toward the cross-feature priors
//!    (Normal prior on location, Inverse-Gamma prior on scale), solved by
//!    fixed-point iteration with an explicit convergence check
//! 6. Transform: remove site effects, restore pooled scale and mean model
//!
//! The covariate part of the mean model is always restored by the transform,
//! so covariate-associated variance is protected from removal; only the site
//! indicator effects are harmonized away.

use nalgebra::{Cholesky, DMatrix, DVector};
use tracing::{debug, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::HarmonizeConfig;
use crate::data::FeatureMatrix;
use crate::design::SiteDesign;
use crate::error::{HarmonizeError, Result};

/// Fitted ComBat parameters for one feature matrix.
///
/// Immutable after [`fit`]; consumed by [`transform`]. A model is specific to
/// the feature set it was fitted on and is never shared across the vector and
/// Riemannian pipelines.
#[derive(Debug, Clone)]
pub struct ComBatModel {
    site_levels: Vec<String>,
    feature_names: Vec<String>,
    beta_hat: DMatrix<f64>,
    grand_mean: DVector<f64>,
    var_pooled: DVector<f64>,
    gamma_star: DMatrix<f64>,
    delta_star: DMatrix<f64>,
    passthrough: Vec<usize>,
    site_iterations: Vec<usize>,
    empirical_bayes: bool,
}

/// Serializable digest of a fitted model, for run reporting.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitSummary {
    /// Site levels the model was fitted on.
    pub site_levels: Vec<String>,
    /// Number of features harmonized.
    pub n_features: usize,
    /// Features passed through unmodified (zero pooled variance).
    pub passthrough_features: Vec<String>,
    /// Empirical-Bayes iterations until convergence, per site.
    pub site_iterations: Vec<usize>,
    /// Whether empirical-Bayes shrinkage was applied.
    pub empirical_bayes: bool,
}

impl ComBatModel {
    /// Site levels the model was fitted on, in design order.
    #[must_use]
    pub fn site_levels(&self) -> &[String] {
        &self.site_levels
    }

    /// Feature names the model was fitted on, in column order.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Indices of features passed through unmodified (zero pooled variance).
    #[must_use]
    pub fn passthrough(&self) -> &[usize] {
        &self.passthrough
    }

    /// Names of the passthrough features.
    #[must_use]
    pub fn passthrough_features(&self) -> Vec<String> {
        self.passthrough
            .iter()
            .map(|&g| self.feature_names[g].clone())
            .collect()
    }

    /// EB-shrunk additive site shifts, `n_sites x n_features`.
    #[must_use]
    pub fn gamma_star(&self) -> &DMatrix<f64> {
        &self.gamma_star
    }

    /// EB-shrunk multiplicative site shifts, `n_sites x n_features`.
    #[must_use]
    pub fn delta_star(&self) -> &DMatrix<f64> {
        &self.delta_star
    }

    /// Empirical-Bayes iterations until convergence, per site.
    #[must_use]
    pub fn site_iterations(&self) -> &[usize] {
        &self.site_iterations
    }

    /// Digest for run reporting.
    #[must_use]
    pub fn summary(&self) -> FitSummary {
        FitSummary {
            site_levels: self.site_levels.clone(),
            n_features: self.feature_names.len(),
            passthrough_features: self.passthrough_features(),
            site_iterations: self.site_iterations.clone(),
            empirical_bayes: self.empirical_bayes,
        }
    }
}

/// Fit a ComBat model to a feature matrix.
///
/// # Errors
///
/// - [`HarmonizeError::LengthMismatch`] if the design covers a different
///   number of samples than the features.
/// - [`HarmonizeError::InvalidInput`] if the design matrix is
///   rank-deficient (collinear covariates).
/// - [`HarmonizeError::NonConvergence`] if the EB fixed point for any site
///   does not converge within `config.eb_max_iter` iterations.
pub fn fit(
    features: &FeatureMatrix,
    design: &SiteDesign,
    config: &HarmonizeConfig,
) -> Result<ComBatModel> {
    config.validate()?;
    if features.n_samples() != design.n_samples() {
        return Err(HarmonizeError::length_mismatch(
            design.n_samples(),
            features.n_samples(),
        ));
    }

    let x = features.data();
    let d = design.matrix();
    let n = x.nrows();
    let p = x.ncols();
    let n_sites = design.n_sites();

    // =========================================================================
    // 1. OLS FIT OF THE MEAN MODEL
    // =========================================================================
    let normal = d.transpose() * d;
    let chol = Cholesky::new(normal).ok_or_else(|| {
        HarmonizeError::invalid_input("design matrix is rank-deficient; check covariates")
    })?;
    let beta_hat = chol.solve(&(d.transpose() * x));

    // =========================================================================
    // 2. POOLED GRAND MEAN AND POOLED VARIANCE
    // =========================================================================
    let mut grand_mean = DVector::zeros(p);
    for site in 0..n_sites {
        let weight = design.site_counts()[site] as f64 / n as f64;
        for g in 0..p {
            grand_mean[g] += weight * beta_hat[(site, g)];
        }
    }

    let resid = x - d * &beta_hat;
    let mut var_pooled = DVector::zeros(p);
    for g in 0..p {
        var_pooled[g] = resid.column(g).iter().map(|v| v * v).sum::<f64>() / n as f64;
    }

    let passthrough: Vec<usize> = (0..p)
        .filter(|&g| var_pooled[g] <= config.numerical_eps)
        .collect();
    if !passthrough.is_empty() {
        warn!(
            features = ?passthrough
                .iter()
                .map(|&g| features.feature_names()[g].as_str())
                .collect::<Vec<_>>(),
            "features with zero pooled variance passed through unmodified"
        );
    }
    let active: Vec<usize> = (0..p).filter(|g| !passthrough.contains(g)).collect();

    // =========================================================================
    // 3. STANDARDIZE
    // =========================================================================
    let stand_mean = standardization_mean(design, &beta_hat, &grand_mean);
    let mut s_data = DMatrix::zeros(n, p);
    for &g in &active {
        let sd = var_pooled[g].sqrt();
        for s in 0..n {
            s_data[(s, g)] = (x[(s, g)] - stand_mean[(s, g)]) / sd;
        }
    }

    // =========================================================================
    // 4. PER-SITE METHOD-OF-MOMENTS ESTIMATES
    // =========================================================================
    let mut gamma_hat = DMatrix::zeros(n_sites, p);
    let mut delta_hat = DMatrix::zeros(n_sites, p);
    for site in 0..n_sites {
        let members = design.samples_of_site(site);
        let count = members.len() as f64;
        for &g in &active {
            let mean = members.iter().map(|&s| s_data[(s, g)]).sum::<f64>() / count;
            let ss = members
                .iter()
                .map(|&s| (s_data[(s, g)] - mean).powi(2))
                .sum::<f64>();
            gamma_hat[(site, g)] = mean;
            delta_hat[(site, g)] = ss / (count - 1.0);
        }
    }

    // =========================================================================
    // 5. EMPIRICAL-BAYES SHRINKAGE
    // =========================================================================
    // All naive estimates above are complete before any prior is pooled; the
    // cross-feature moments are the synchronization barrier of the fit.
    let mut gamma_star = gamma_hat.clone();
    let mut delta_star = delta_hat.clone();
    let mut site_iterations = vec![0usize; n_sites];

    if config.empirical_bayes {
        for site in 0..n_sites {
            let n_site = design.site_counts()[site] as f64;
            let solved = solve_site_shrinkage(
                site,
                design.site_levels()[site].as_str(),
                n_site,
                &gamma_hat,
                &delta_hat,
                &s_data,
                &design.samples_of_site(site),
                &active,
                config,
            )?;
            if let Some((gamma, delta, iterations)) = solved {
                for (k, &g) in active.iter().enumerate() {
                    gamma_star[(site, g)] = gamma[k];
                    delta_star[(site, g)] = delta[k];
                }
                site_iterations[site] = iterations;
            }
        }
    }

    debug!(
        n_samples = n,
        n_features = p,
        n_sites,
        passthrough = passthrough.len(),
        "fitted ComBat model"
    );

    Ok(ComBatModel {
        site_levels: design.site_levels().to_vec(),
        feature_names: features.feature_names().to_vec(),
        beta_hat,
        grand_mean,
        var_pooled,
        gamma_star,
        delta_star,
        passthrough,
        site_iterations,
        empirical_bayes: config.empirical_bayes,
    })
}

/// Remove the fitted site effects from a feature matrix.
///
/// Pure function of its inputs: re-standardizes with the model statistics,
/// removes the per-site location/scale shifts, then restores the pooled scale
/// and the full mean model (grand mean + covariates). Output has the same
/// shape and feature order as the input; passthrough features are copied
/// verbatim.
///
/// # Errors
///
/// Returns an error if the features or design do not match the model, or if
/// the adjusted data is non-finite (e.g. a zero scale estimate with
/// empirical Bayes disabled).
pub fn transform(
    features: &FeatureMatrix,
    model: &ComBatModel,
    design: &SiteDesign,
) -> Result<FeatureMatrix> {
    if features.feature_names() != model.feature_names.as_slice() {
        return Err(HarmonizeError::invalid_input(
            "feature names do not match the fitted model",
        ));
    }
    if design.site_levels() != model.site_levels.as_slice() {
        return Err(HarmonizeError::invalid_input(
            "site levels do not match the fitted model",
        ));
    }
    if features.n_samples() != design.n_samples() {
        return Err(HarmonizeError::length_mismatch(
            design.n_samples(),
            features.n_samples(),
        ));
    }

    let x = features.data();
    let n = x.nrows();
    let p = x.ncols();

    let stand_mean = standardization_mean(design, &model.beta_hat, &model.grand_mean);

    let mut out = x.clone();
    for g in 0..p {
        if model.passthrough.contains(&g) {
            continue;
        }
        let sd = model.var_pooled[g].sqrt();
        for s in 0..n {
            let site = design.site_index()[s];
            let standardized = (x[(s, g)] - stand_mean[(s, g)]) / sd;
            let adjusted = (standardized - model.gamma_star[(site, g)])
                / model.delta_star[(site, g)].sqrt();
            out[(s, g)] = adjusted * sd + stand_mean[(s, g)];
        }
    }

    features.with_data(out)
}

/// The per-sample standardization mean: grand mean plus the covariate part of
/// the mean model, with the site indicator columns zeroed out.
fn standardization_mean(
    design: &SiteDesign,
    beta_hat: &DMatrix<f64>,
    grand_mean: &DVector<f64>,
) -> DMatrix<f64> {
    let d = design.matrix();
    let n = d.nrows();
    let n_sites = design.n_sites();
    let p = grand_mean.len();

    let mut covariate_design = d.clone();
    for s in 0..n {
        for site in 0..n_sites {
            covariate_design[(s, site)] = 0.0;
        }
    }
    let covariate_part = covariate_design * beta_hat;

    let mut stand_mean = DMatrix::zeros(n, p);
    for s in 0..n {
        for g in 0..p {
            stand_mean[(s, g)] = grand_mean[g] + covariate_part[(s, g)];
        }
    }
    stand_mean
}

/// Solve the EB fixed point for one site.
///
/// Returns `None` when the cross-feature prior is degenerate (fewer than two
/// active features, or no spread in the scale estimates); the naive estimates
/// stay in effect for that site.
#[allow(clippy::too_many_arguments)]
fn solve_site_shrinkage(
    site: usize,
    site_level: &str,
    n_site: f64,
    gamma_hat: &DMatrix<f64>,
    delta_hat: &DMatrix<f64>,
    s_data: &DMatrix<f64>,
    members: &[usize],
    active: &[usize],
    config: &HarmonizeConfig,
) -> Result<Option<(Vec<f64>, Vec<f64>, usize)>> {
    let p = active.len();
    if p < 2 {
        warn!(
            site = site_level,
            "fewer than two active features; empirical-Bayes prior undefined, using naive estimates"
        );
        return Ok(None);
    }

    let g_hat: Vec<f64> = active.iter().map(|&g| gamma_hat[(site, g)]).collect();
    let d_hat: Vec<f64> = active.iter().map(|&g| delta_hat[(site, g)]).collect();

    // Normal prior on location: cross-feature moments of gamma_hat
    let gamma_bar = g_hat.iter().sum::<f64>() / p as f64;
    let t2 = g_hat.iter().map(|v| (v - gamma_bar).powi(2)).sum::<f64>() / (p as f64 - 1.0);

    // Inverse-Gamma prior on scale: method-of-moments from delta_hat
    let d_mean = d_hat.iter().sum::<f64>() / p as f64;
    let d_var = d_hat.iter().map(|v| (v - d_mean).powi(2)).sum::<f64>() / (p as f64 - 1.0);
    if d_var <= config.numerical_eps {
        warn!(
            site = site_level,
            "no spread in per-feature scale estimates; empirical-Bayes prior undefined, using naive estimates"
        );
        return Ok(None);
    }
    let a_prior = (2.0 * d_var + d_mean * d_mean) / d_var;
    let b_prior = (d_mean * d_var + d_mean.powi(3)) / d_var;

    // Fixed-point iteration on (gamma*, delta*)
    let mut g_old = g_hat.clone();
    let mut d_old = d_hat.clone();
    let mut g_new = vec![0.0; p];
    let mut d_new = vec![0.0; p];
    let mut last_change = f64::INFINITY;

    for iteration in 1..=config.eb_max_iter {
        for k in 0..p {
            g_new[k] = (n_site * t2 * g_hat[k] + d_old[k] * gamma_bar) / (n_site * t2 + d_old[k]);
        }
        for (k, &g) in active.iter().enumerate() {
            let sum2: f64 = members
                .iter()
                .map(|&s| (s_data[(s, g)] - g_new[k]).powi(2))
                .sum();
            d_new[k] = (0.5 * sum2 + b_prior) / (n_site / 2.0 + a_prior - 1.0);
        }

        last_change = 0.0f64;
        for k in 0..p {
            let g_change = (g_new[k] - g_old[k]).abs() / g_old[k].abs().max(config.numerical_eps);
            let d_change = (d_new[k] - d_old[k]).abs() / d_old[k].abs().max(config.numerical_eps);
            last_change = last_change.max(g_change).max(d_change);
        }
        g_old.copy_from_slice(&g_new);
        d_old.copy_from_slice(&d_new);

        if last_change < config.eb_tol {
            debug!(site = site_level, iteration, "EB shrinkage converged");
            return Ok(Some((g_new, d_new, iteration)));
        }
    }

    Err(HarmonizeError::non_convergence(
        site_level,
        config.eb_max_iter,
        last_change,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Covariate, CovariateSet};
    use approx::assert_relative_eq;

    /// Two-site data with a known additive shift on the second site.
    fn shifted_dataset(shift: f64) -> (FeatureMatrix, SiteDesign) {
        let base = [0.8, 1.2, 1.0, 0.9, 1.1, 1.05, 0.95, 1.15];
        let mut rows = Vec::new();
        let mut sites = Vec::new();
        for (i, &v) in base.iter().enumerate() {
            let site_shift = if i >= 4 { shift } else { 0.0 };
            rows.push(vec![v + site_shift, 2.0 * v - site_shift * 0.5]);
            sites.push(if i >= 4 { "B".to_string() } else { "A".to_string() });
        }
        let features = FeatureMatrix::from_rows(
            vec!["alpha".to_string(), "beta".to_string()],
            &rows,
        )
        .unwrap();
        let design = SiteDesign::build(&sites, &CovariateSet::empty()).unwrap();
        (features, design)
    }

    fn site_means(features: &FeatureMatrix, design: &SiteDesign, g: usize) -> Vec<f64> {
        (0..design.n_sites())
            .map(|site| {
                let members = design.samples_of_site(site);
                members
                    .iter()
                    .map(|&s| features.data()[(s, g)])
                    .sum::<f64>()
                    / members.len() as f64
            })
            .collect()
    }

    #[test]
    fn test_fit_transform_removes_site_shift() {
        let (features, design) = shifted_dataset(3.0);
        let config = HarmonizeConfig::default();

        let pre_means = site_means(&features, &design, 0);
        assert!((pre_means[0] - pre_means[1]).abs() > 2.0);

        let model = fit(&features, &design, &config).unwrap();
        let harmonized = transform(&features, &model, &design).unwrap();

        let post_means = site_means(&harmonized, &design, 0);
        assert!(
            (post_means[0] - post_means[1]).abs() < (pre_means[0] - pre_means[1]).abs() / 10.0
        );
    }

    #[test]
    fn test_transform_preserves_shape_and_order() {
        let (features, design) = shifted_dataset(1.0);
        let config = HarmonizeConfig::default();
        let model = fit(&features, &design, &config).unwrap();
        let harmonized = transform(&features, &model, &design).unwrap();

        assert_eq!(harmonized.n_samples(), features.n_samples());
        assert_eq!(harmonized.feature_names(), features.feature_names());
    }

    #[test]
    fn test_transform_is_pure() {
        let (features, design) = shifted_dataset(2.0);
        let config = HarmonizeConfig::default();
        let model = fit(&features, &design, &config).unwrap();

        let first = transform(&features, &model, &design).unwrap();
        let second = transform(&features, &model, &design).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_variance_feature_passthrough() {
        let rows = vec![
            vec![1.0, 5.0],
            vec![2.0, 5.0],
            vec![3.0, 5.0],
            vec![4.0, 5.0],
        ];
        let features = FeatureMatrix::from_rows(
            vec!["alpha".to_string(), "flat".to_string()],
            &rows,
        )
        .unwrap();
        let sites = vec!["A".into(), "A".into(), "B".into(), "B".into()];
        let design = SiteDesign::build(&sites, &CovariateSet::empty()).unwrap();
        let config = HarmonizeConfig::default();

        let model = fit(&features, &design, &config).unwrap();
        assert_eq!(model.passthrough_features(), vec!["flat".to_string()]);

        let harmonized = transform(&features, &model, &design).unwrap();
        for s in 0..4 {
            assert_relative_eq!(harmonized.data()[(s, 1)], 5.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_covariate_column_protected() {
        // Feature tracks age (plus residual noise); sites are orthogonal to age.
        let ages = [20.0, 40.0, 25.0, 35.0, 22.0, 38.0, 27.0, 33.0];
        let noise = [0.03, -0.02, 0.01, -0.04, 0.02, 0.04, -0.01, -0.03];
        let rows: Vec<Vec<f64>> = ages
            .iter()
            .zip(noise.iter())
            .map(|(&a, &e)| vec![a * 0.1 + e, 1.0 + e * 2.0])
            .collect();
        let sites: Vec<String> = (0..8)
            .map(|i| if i < 4 { "A".into() } else { "B".into() })
            .collect();
        let mut covariates = CovariateSet::empty();
        covariates
            .push("age", Covariate::Continuous(ages.to_vec()))
            .unwrap();

        let features = FeatureMatrix::from_rows(
            vec!["alpha".to_string(), "beta".to_string()],
            &rows,
        )
        .unwrap();
        let design = SiteDesign::build(&sites, &covariates).unwrap();
        let config = HarmonizeConfig::default();

        let model = fit(&features, &design, &config).unwrap();
        let harmonized = transform(&features, &model, &design).unwrap();

        // The age-driven spread must survive harmonization
        let correlation = |values: &[f64]| {
            let n = values.len() as f64;
            let mx = ages.iter().sum::<f64>() / n;
            let my = values.iter().sum::<f64>() / n;
            let cov: f64 = ages
                .iter()
                .zip(values)
                .map(|(&a, &v)| (a - mx) * (v - my))
                .sum();
            let vx: f64 = ages.iter().map(|&a| (a - mx).powi(2)).sum();
            let vy: f64 = values.iter().map(|&v| (v - my).powi(2)).sum();
            cov / (vx * vy).sqrt()
        };
        let post = harmonized.column(0);
        assert!(correlation(&post) > 0.99, "correlation lost: {}", correlation(&post));
    }

    #[test]
    fn test_non_convergence_reported() {
        let (features, design) = shifted_dataset(2.0);
        let config = HarmonizeConfig {
            eb_tol: 1e-16,
            eb_max_iter: 1,
            ..HarmonizeConfig::default()
        };
        let result = fit(&features, &design, &config);
        assert!(matches!(
            result,
            Err(HarmonizeError::NonConvergence { max_iter: 1, .. })
        ));
    }

    #[test]
    fn test_without_empirical_bayes() {
        let (features, design) = shifted_dataset(3.0);
        let config = HarmonizeConfig::default().with_empirical_bayes(false);

        let model = fit(&features, &design, &config).unwrap();
        assert_eq!(model.site_iterations(), &[0, 0]);

        let harmonized = transform(&features, &model, &design).unwrap();
        let post_means = site_means(&harmonized, &design, 0);
        assert!((post_means[0] - post_means[1]).abs() < 1e-6);
    }

    #[test]
    fn test_sample_count_mismatch() {
        let (features, _) = shifted_dataset(1.0);
        let sites = vec!["A".into(), "A".into(), "B".into(), "B".into()];
        let design = SiteDesign::build(&sites, &CovariateSet::empty()).unwrap();
        let config = HarmonizeConfig::default();
        assert!(matches!(
            fit(&features, &design, &config),
            Err(HarmonizeError::LengthMismatch { .. })
        ));
    }
}

//! Quality-control KPIs for harmonization runs.
//!
//! Three families of metrics, each computed on the paired pre- and
//! post-harmonization populations:
//!
//! - **Site-variance ratio**: between-site over total variance, averaged
//!   across features. Drops toward 0 as site bias is removed.
//! - **Site-leakage AUC**: held-out performance of a cross-validated
//!   classifier predicting site from the features. Near chance means the
//!   bias is gone; near 1.0 means it persists.
//! - **ERP-integrity gates**: paired pre/post deltas on tracked components,
//!   guarding against over-correction that distorts genuine signal.
//!
//! Degenerate inputs surface as [`HarmonizeError::UndefinedMetric`]; the
//! report records such metrics as missing instead of failing the run.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::HarmonizeConfig;
use crate::data::{Covariate, CovariateSet, FeatureMatrix};
use crate::design::SiteDesign;
use crate::error::{HarmonizeError, Result};

/// An ERP component tracked for integrity across harmonization.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ErpGate {
    /// Feature column holding the component (amplitude or latency).
    pub feature: String,
    /// Allowed per-sample absolute pre/post difference.
    pub tolerance: f64,
}

/// Outcome of one ERP gate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ErpGateResult {
    /// Gated feature.
    pub feature: String,
    /// Tolerance the gate was evaluated with.
    pub tolerance: f64,
    /// Fraction of samples whose |pre − post| exceeded the tolerance.
    pub exceed_fraction: f64,
    /// Largest per-sample absolute difference observed.
    pub max_abs_delta: f64,
    /// Allowed exceed fraction minus observed; negative means failed.
    pub margin: f64,
    /// Whether the gate passed.
    pub passed: bool,
}

/// Slope change of a feature against a protected covariate, pre vs post.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PreservationDelta {
    /// Feature whose covariate relationship is tracked.
    pub feature: String,
    /// Covariate regressed against.
    pub covariate: String,
    /// Post-harmonization slope minus pre-harmonization slope.
    pub delta: f64,
}

/// Immutable KPI bundle for one harmonization run.
///
/// Metrics undefined for the given data (e.g. zero total variance) are
/// recorded as `None` rather than failing the run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KpiReport {
    /// Site-variance ratio before harmonization.
    pub site_variance_ratio_pre: Option<f64>,
    /// Site-variance ratio after harmonization.
    pub site_variance_ratio_post: Option<f64>,
    /// Mean held-out site-leakage AUC before harmonization.
    pub leakage_auc_pre: Option<f64>,
    /// Mean held-out site-leakage AUC after harmonization.
    pub leakage_auc_post: Option<f64>,
    /// ERP-integrity gate outcomes.
    pub erp_gates: Vec<ErpGateResult>,
    /// Covariate-slope preservation deltas for gated features.
    pub preservation: Vec<PreservationDelta>,
}

impl KpiReport {
    /// Whether every ERP gate passed.
    #[must_use]
    pub fn all_gates_passed(&self) -> bool {
        self.erp_gates.iter().all(|g| g.passed)
    }
}

/// Evaluate the full KPI suite on paired pre/post populations.
///
/// Pre and post must cover the same samples in the same order; undefined
/// metrics are logged and reported as missing.
///
/// # Errors
///
/// Returns an error if the pre/post matrices are not shape- and
/// order-compatible, or if a gate references an unknown feature.
pub fn evaluate(
    pre: &FeatureMatrix,
    post: &FeatureMatrix,
    design: &SiteDesign,
    gates: &[ErpGate],
    covariates: &CovariateSet,
    config: &HarmonizeConfig,
) -> Result<KpiReport> {
    if pre.feature_names() != post.feature_names() || pre.n_samples() != post.n_samples() {
        return Err(HarmonizeError::invalid_input(
            "pre and post populations are not paired",
        ));
    }
    if pre.n_samples() != design.n_samples() {
        return Err(HarmonizeError::length_mismatch(
            design.n_samples(),
            pre.n_samples(),
        ));
    }

    let site_variance_ratio_pre = missing_if_undefined(site_variance_ratio(pre, design, config))?;
    let site_variance_ratio_post =
        missing_if_undefined(site_variance_ratio(post, design, config))?;
    let leakage_auc_pre = missing_if_undefined(site_leakage_auc(pre, design, config))?;
    let leakage_auc_post = missing_if_undefined(site_leakage_auc(post, design, config))?;

    let erp_gates = evaluate_erp_gates(pre, post, gates, config)?;

    let mut preservation = Vec::new();
    for gate in gates {
        for (name, covariate) in covariates.iter() {
            if let Covariate::Continuous(values) = covariate {
                match preservation_delta(pre, post, &gate.feature, values) {
                    Ok(delta) => preservation.push(PreservationDelta {
                        feature: gate.feature.clone(),
                        covariate: name.to_string(),
                        delta,
                    }),
                    Err(HarmonizeError::UndefinedMetric { .. }) => {
                        warn!(covariate = name, "preservation delta undefined");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    Ok(KpiReport {
        site_variance_ratio_pre,
        site_variance_ratio_post,
        leakage_auc_pre,
        leakage_auc_post,
        erp_gates,
        preservation,
    })
}

/// Downgrade an undefined metric to a missing value; anything else is a
/// genuine failure and propagates.
fn missing_if_undefined(result: Result<f64>) -> Result<Option<f64>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e @ HarmonizeError::UndefinedMetric { .. }) => {
            warn!(%e, "KPI undefined, reported as missing");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Ratio of between-site variance to total variance, averaged across
/// features.
///
/// Features with zero total variance carry no site signal either way and are
/// skipped; the ratio of a feature with zero between-site variance is 0.
///
/// # Errors
///
/// Returns [`HarmonizeError::UndefinedMetric`] when every feature has zero
/// total variance.
pub fn site_variance_ratio(
    features: &FeatureMatrix,
    design: &SiteDesign,
    config: &HarmonizeConfig,
) -> Result<f64> {
    let x = features.data();
    let n = x.nrows() as f64;

    let mut ratios = Vec::new();
    for g in 0..x.ncols() {
        let column = x.column(g);
        let grand = column.iter().sum::<f64>() / n;
        let var_total = column.iter().map(|v| (v - grand).powi(2)).sum::<f64>() / n;
        if var_total <= config.numerical_eps {
            continue;
        }

        let mut var_between = 0.0;
        for site in 0..design.n_sites() {
            let members = design.samples_of_site(site);
            let proportion = members.len() as f64 / n;
            let site_mean =
                members.iter().map(|&s| x[(s, g)]).sum::<f64>() / members.len() as f64;
            var_between += proportion * (site_mean - grand).powi(2);
        }
        ratios.push(var_between / var_total);
    }

    if ratios.is_empty() {
        return Err(HarmonizeError::undefined_metric(
            "site_variance_ratio",
            "every feature has zero total variance",
        ));
    }
    Ok(ratios.iter().sum::<f64>() / ratios.len() as f64)
}

/// Mean held-out AUC of a site-from-features classifier.
///
/// Stratified k-fold cross-validation with a seeded shuffle; one-vs-rest
/// L2-regularized logistic regression per site level, z-scored on the
/// training folds; AUC via the rank-sum statistic with midrank ties,
/// averaged across classes and folds.
///
/// # Errors
///
/// Returns [`HarmonizeError::UndefinedMetric`] when fewer than two site
/// levels are present or no fold admits a valid AUC.
pub fn site_leakage_auc(
    features: &FeatureMatrix,
    design: &SiteDesign,
    config: &HarmonizeConfig,
) -> Result<f64> {
    let n_sites = design.n_sites();
    if n_sites < 2 {
        return Err(HarmonizeError::undefined_metric(
            "site_leakage_auc",
            "fewer than two site levels",
        ));
    }

    let min_count = design.site_counts().iter().copied().min().unwrap_or(0);
    let folds = config.leakage_folds.min(min_count);
    if folds < 2 {
        return Err(HarmonizeError::undefined_metric(
            "site_leakage_auc",
            "too few samples per site for cross-validation",
        ));
    }
    if folds < config.leakage_folds {
        warn!(
            requested = config.leakage_folds,
            used = folds,
            "fold count clamped to the smallest site"
        );
    }

    let assignments = stratified_folds(design, folds, config.leakage_seed);
    let x = features.data();

    let mut aucs = Vec::new();
    for fold in 0..folds {
        let test: Vec<usize> = (0..x.nrows()).filter(|&s| assignments[s] == fold).collect();
        let train: Vec<usize> = (0..x.nrows()).filter(|&s| assignments[s] != fold).collect();
        if test.is_empty() || train.is_empty() {
            continue;
        }

        let (train_z, mean, std) = zscore_fit(x, &train);
        for class in 0..n_sites {
            let labels: Vec<f64> = train
                .iter()
                .map(|&s| f64::from(u8::from(design.site_index()[s] == class)))
                .collect();
            if labels.iter().all(|&y| y == 0.0) || labels.iter().all(|&y| y == 1.0) {
                continue;
            }
            let weights = logistic_fit(&train_z, &labels, config);

            let mut scores = Vec::with_capacity(test.len());
            let mut truth = Vec::with_capacity(test.len());
            for &s in &test {
                let mut z = weights[0];
                for g in 0..x.ncols() {
                    z += weights[g + 1] * (x[(s, g)] - mean[g]) / std[g];
                }
                scores.push(z);
                truth.push(design.site_index()[s] == class);
            }
            if let Some(auc) = rank_auc(&scores, &truth) {
                aucs.push(auc);
            }
        }
    }

    if aucs.is_empty() {
        return Err(HarmonizeError::undefined_metric(
            "site_leakage_auc",
            "no fold admitted a valid AUC",
        ));
    }
    let mean_auc = aucs.iter().sum::<f64>() / aucs.len() as f64;
    debug!(folds, evaluations = aucs.len(), mean_auc, "site-leakage AUC");
    Ok(mean_auc)
}

/// Evaluate the ERP-integrity gates on paired pre/post matrices.
///
/// # Errors
///
/// Returns an error if a gate references a feature absent from the matrices.
pub fn evaluate_erp_gates(
    pre: &FeatureMatrix,
    post: &FeatureMatrix,
    gates: &[ErpGate],
    config: &HarmonizeConfig,
) -> Result<Vec<ErpGateResult>> {
    let mut results = Vec::with_capacity(gates.len());
    for gate in gates {
        let g = pre.feature_index(&gate.feature).ok_or_else(|| {
            HarmonizeError::invalid_input(format!("gate feature '{}' not found", gate.feature))
        })?;

        let n = pre.n_samples();
        let mut exceeding = 0usize;
        let mut max_abs_delta = 0.0f64;
        for s in 0..n {
            let delta = (pre.data()[(s, g)] - post.data()[(s, g)]).abs();
            max_abs_delta = max_abs_delta.max(delta);
            if delta > gate.tolerance {
                exceeding += 1;
            }
        }
        let exceed_fraction = exceeding as f64 / n as f64;
        let margin = config.erp_max_exceed_fraction - exceed_fraction;
        results.push(ErpGateResult {
            feature: gate.feature.clone(),
            tolerance: gate.tolerance,
            exceed_fraction,
            max_abs_delta,
            margin,
            passed: margin >= 0.0,
        });
    }
    Ok(results)
}

/// Change in the OLS slope of a feature against a covariate, pre vs post.
///
/// # Errors
///
/// Returns [`HarmonizeError::UndefinedMetric`] when the covariate has zero
/// variance, and an input error when lengths disagree or the feature is
/// unknown.
pub fn preservation_delta(
    pre: &FeatureMatrix,
    post: &FeatureMatrix,
    feature: &str,
    covariate: &[f64],
) -> Result<f64> {
    let g = pre
        .feature_index(feature)
        .ok_or_else(|| HarmonizeError::invalid_input(format!("feature '{feature}' not found")))?;
    if covariate.len() != pre.n_samples() {
        return Err(HarmonizeError::length_mismatch(
            pre.n_samples(),
            covariate.len(),
        ));
    }

    let slope = |values: &[f64]| -> Result<f64> {
        let n = values.len() as f64;
        let mx = covariate.iter().sum::<f64>() / n;
        let my = values.iter().sum::<f64>() / n;
        let sxx: f64 = covariate.iter().map(|&v| (v - mx).powi(2)).sum();
        if sxx == 0.0 {
            return Err(HarmonizeError::undefined_metric(
                "preservation_delta",
                "covariate has zero variance",
            ));
        }
        let sxy: f64 = covariate
            .iter()
            .zip(values)
            .map(|(&c, &v)| (c - mx) * (v - my))
            .sum();
        Ok(sxy / sxx)
    };

    Ok(slope(&post.column(g))? - slope(&pre.column(g))?)
}

/// Assign each sample to a fold, stratified by site.
fn stratified_folds(design: &SiteDesign, folds: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut assignments = vec![0usize; design.n_samples()];
    for site in 0..design.n_sites() {
        let mut members = design.samples_of_site(site);
        members.shuffle(&mut rng);
        for (i, &s) in members.iter().enumerate() {
            assignments[s] = i % folds;
        }
    }
    assignments
}

/// Z-score the training rows; constant columns get unit scale.
fn zscore_fit(x: &DMatrix<f64>, train: &[usize]) -> (DMatrix<f64>, Vec<f64>, Vec<f64>) {
    let n = train.len() as f64;
    let p = x.ncols();
    let mut mean = vec![0.0; p];
    let mut std = vec![0.0; p];
    for g in 0..p {
        mean[g] = train.iter().map(|&s| x[(s, g)]).sum::<f64>() / n;
        let var = train.iter().map(|&s| (x[(s, g)] - mean[g]).powi(2)).sum::<f64>() / n;
        std[g] = if var > 0.0 { var.sqrt() } else { 1.0 };
    }
    let mut z = DMatrix::zeros(train.len(), p);
    for (row, &s) in train.iter().enumerate() {
        for g in 0..p {
            z[(row, g)] = (x[(s, g)] - mean[g]) / std[g];
        }
    }
    (z, mean, std)
}

/// Numerically stable sigmoid.
fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Full-batch gradient descent for L2-regularized logistic regression.
///
/// Returns `[intercept, w_0, .., w_{p-1}]`; the intercept is not regularized.
fn logistic_fit(z: &DMatrix<f64>, labels: &[f64], config: &HarmonizeConfig) -> Vec<f64> {
    let n = z.nrows();
    let p = z.ncols();
    let mut weights = vec![0.0; p + 1];
    let mut gradient = vec![0.0; p + 1];

    for _ in 0..config.leakage_epochs {
        gradient.iter_mut().for_each(|g| *g = 0.0);
        for s in 0..n {
            let mut score = weights[0];
            for g in 0..p {
                score += weights[g + 1] * z[(s, g)];
            }
            let err = sigmoid(score) - labels[s];
            gradient[0] += err;
            for g in 0..p {
                gradient[g + 1] += err * z[(s, g)];
            }
        }
        let scale = config.leakage_learning_rate / n as f64;
        weights[0] -= scale * gradient[0];
        for g in 0..p {
            weights[g + 1] -=
                scale * (gradient[g + 1] + config.leakage_l2 * n as f64 * weights[g + 1]);
        }
    }
    weights
}

/// ROC AUC via the rank-sum statistic with midrank tie handling.
///
/// Returns `None` when either class is absent.
fn rank_auc(scores: &[f64], truth: &[bool]) -> Option<f64> {
    let n_pos = truth.iter().filter(|&&t| t).count();
    let n_neg = truth.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(std::cmp::Ordering::Equal));

    // Midranks over tied score runs
    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let midrank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = midrank;
        }
        i = j + 1;
    }

    let rank_sum: f64 = truth
        .iter()
        .zip(ranks.iter())
        .filter(|(&t, _)| t)
        .map(|(_, &r)| r)
        .sum();
    let u = rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Some(u / (n_pos * n_neg) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config() -> HarmonizeConfig {
        HarmonizeConfig::default()
    }

    fn two_site_design(n_per_site: usize) -> SiteDesign {
        let mut sites = Vec::new();
        for _ in 0..n_per_site {
            sites.push("A".to_string());
        }
        for _ in 0..n_per_site {
            sites.push("B".to_string());
        }
        SiteDesign::build(&sites, &CovariateSet::empty()).unwrap()
    }

    fn matrix_of(column: &[f64]) -> FeatureMatrix {
        let rows: Vec<Vec<f64>> = column.iter().map(|&v| vec![v]).collect();
        FeatureMatrix::from_rows(vec!["alpha".to_string()], &rows).unwrap()
    }

    #[test]
    fn test_variance_ratio_detects_shift() {
        let design = two_site_design(4);
        let shifted = matrix_of(&[0.9, 1.1, 1.0, 1.0, 5.9, 6.1, 6.0, 6.0]);
        let mixed = matrix_of(&[0.9, 1.1, 1.0, 1.0, 0.95, 1.05, 1.02, 0.98]);

        let high = site_variance_ratio(&shifted, &design, &config()).unwrap();
        let low = site_variance_ratio(&mixed, &design, &config()).unwrap();
        assert!(high > 0.9);
        assert!(low < 0.3);
        assert!(high > low);
    }

    #[test]
    fn test_variance_ratio_zero_between() {
        let design = two_site_design(2);
        // Same per-site means, variance only within sites
        let features = matrix_of(&[1.0, 3.0, 1.0, 3.0]);
        let ratio = site_variance_ratio(&features, &design, &config()).unwrap();
        assert_relative_eq!(ratio, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_variance_ratio_undefined_when_constant() {
        let design = two_site_design(2);
        let features = matrix_of(&[2.0, 2.0, 2.0, 2.0]);
        let result = site_variance_ratio(&features, &design, &config());
        assert!(matches!(
            result,
            Err(HarmonizeError::UndefinedMetric { .. })
        ));
    }

    #[test]
    fn test_leakage_auc_separable_sites() {
        let design = two_site_design(10);
        let mut values = Vec::new();
        for i in 0..10 {
            values.push(0.5 + 0.05 * i as f64);
        }
        for i in 0..10 {
            values.push(5.5 + 0.05 * i as f64);
        }
        let features = matrix_of(&values);
        let auc = site_leakage_auc(&features, &design, &config()).unwrap();
        assert!(auc > 0.9, "expected near-perfect leakage, got {auc}");
    }

    #[test]
    fn test_leakage_auc_identical_sites() {
        let design = two_site_design(20);
        let mut values = Vec::new();
        for i in 0..20 {
            values.push((i as f64 * 0.37).sin());
        }
        for i in 0..20 {
            values.push((i as f64 * 0.37).sin());
        }
        let features = matrix_of(&values);
        let auc = site_leakage_auc(&features, &design, &config()).unwrap();
        assert!(
            (auc - 0.5).abs() < 0.25,
            "expected chance-level leakage, got {auc}"
        );
    }

    #[test]
    fn test_leakage_auc_deterministic() {
        let design = two_site_design(8);
        let features = matrix_of(&[
            0.2, 0.4, 0.1, 0.3, 0.25, 0.35, 0.15, 0.45, 1.2, 1.4, 1.1, 1.3, 1.25, 1.35, 1.15, 1.45,
        ]);
        let a = site_leakage_auc(&features, &design, &config()).unwrap();
        let b = site_leakage_auc(&features, &design, &config()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rank_auc_with_ties() {
        // All scores equal: AUC must be exactly 0.5 via midranks
        let auc = rank_auc(&[1.0, 1.0, 1.0, 1.0], &[true, false, true, false]).unwrap();
        assert_relative_eq!(auc, 0.5, epsilon = 1e-12);

        // Perfect separation
        let auc = rank_auc(&[0.1, 0.2, 0.8, 0.9], &[false, false, true, true]).unwrap();
        assert_relative_eq!(auc, 1.0, epsilon = 1e-12);

        // Single class is undefined
        assert!(rank_auc(&[0.1, 0.2], &[true, true]).is_none());
    }

    #[test]
    fn test_stratified_folds_cover_all_sites() {
        let design = two_site_design(10);
        let assignments = stratified_folds(&design, 5, 42);
        for fold in 0..5 {
            let fold_sites: Vec<usize> = (0..20)
                .filter(|&s| assignments[s] == fold)
                .map(|s| design.site_index()[s])
                .collect();
            assert!(fold_sites.contains(&0));
            assert!(fold_sites.contains(&1));
        }
    }

    #[test]
    fn test_erp_gate_pass_and_fail() {
        let pre = matrix_of(&[1.0, 1.0, 1.0, 1.0]);
        let ok_post = matrix_of(&[1.01, 0.99, 1.02, 0.98]);
        let bad_post = matrix_of(&[1.5, 0.5, 1.6, 0.4]);
        let gates = vec![ErpGate {
            feature: "alpha".to_string(),
            tolerance: 0.1,
        }];

        let passed = evaluate_erp_gates(&pre, &ok_post, &gates, &config()).unwrap();
        assert!(passed[0].passed);
        assert!(passed[0].margin >= 0.0);

        let failed = evaluate_erp_gates(&pre, &bad_post, &gates, &config()).unwrap();
        assert!(!failed[0].passed);
        assert_relative_eq!(failed[0].exceed_fraction, 1.0, epsilon = 1e-12);
        assert!(failed[0].margin < 0.0);
    }

    #[test]
    fn test_erp_gate_unknown_feature() {
        let pre = matrix_of(&[1.0, 2.0]);
        let gates = vec![ErpGate {
            feature: "missing".to_string(),
            tolerance: 0.1,
        }];
        assert!(evaluate_erp_gates(&pre, &pre, &gates, &config()).is_err());
    }

    #[test]
    fn test_preservation_delta_unchanged() {
        let covariate = [20.0, 30.0, 40.0, 50.0];
        let pre = matrix_of(&[2.0, 3.0, 4.0, 5.0]);
        let delta = preservation_delta(&pre, &pre, "alpha", &covariate).unwrap();
        assert_relative_eq!(delta, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_preservation_delta_detects_flattening() {
        let covariate = [20.0, 30.0, 40.0, 50.0];
        let pre = matrix_of(&[2.0, 3.0, 4.0, 5.0]);
        let flattened = matrix_of(&[3.5, 3.5, 3.5, 3.5]);
        let delta = preservation_delta(&pre, &flattened, "alpha", &covariate).unwrap();
        assert_relative_eq!(delta, -0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_evaluate_report_shapes() {
        let design = two_site_design(5);
        let pre = matrix_of(&[1.0, 1.2, 0.8, 1.1, 0.9, 3.0, 3.2, 2.8, 3.1, 2.9]);
        let post = matrix_of(&[1.9, 2.1, 1.8, 2.05, 1.95, 2.0, 2.2, 1.85, 2.1, 1.9]);
        let gates = vec![ErpGate {
            feature: "alpha".to_string(),
            tolerance: 5.0,
        }];

        let report = evaluate(
            &pre,
            &post,
            &design,
            &gates,
            &CovariateSet::empty(),
            &config(),
        )
        .unwrap();

        assert!(report.site_variance_ratio_pre.unwrap() > report.site_variance_ratio_post.unwrap());
        assert!(report.leakage_auc_pre.is_some());
        assert!(report.all_gates_passed());
        assert!(report.preservation.is_empty());
    }
}

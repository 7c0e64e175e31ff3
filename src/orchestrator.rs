//! Run orchestration: design building, engine dispatch, KPI packaging.
//!
//! The orchestrator owns every model, frame, and report for a single run;
//! nothing is cached or shared across runs, so each dataset gets an
//! independent fit. Dispatch between the vector and Riemannian paths is a
//! tagged payload, not type inspection.

use tracing::info;

use crate::combat::{self, FitSummary};
use crate::config::HarmonizeConfig;
use crate::data::{CovariateSet, FeatureMatrix};
use crate::design::SiteDesign;
use crate::error::{HarmonizeError, Result};
use crate::kpi::{self, ErpGate, ErpGateResult, KpiReport};
use crate::manifold::SpdMatrix;
use crate::riemann::{self, SampleFailure};

/// Input payload for one harmonization run.
#[derive(Debug, Clone)]
pub enum HarmonizePayload {
    /// Flat feature vectors (e.g. spectral band powers).
    Vector(FeatureMatrix),
    /// Covariance-type SPD matrices (e.g. CSD estimates).
    Riemannian(Vec<SpdMatrix>),
}

/// Harmonized output, sample-aligned with the input payload.
#[derive(Debug)]
pub enum HarmonizedPayload {
    /// Harmonized feature vectors, same shape and feature order as input.
    Vector(FeatureMatrix),
    /// Harmonized SPD matrices; `None` where back-projection failed, with
    /// the failure recorded alongside.
    Riemannian {
        matrices: Vec<Option<SpdMatrix>>,
        failures: Vec<SampleFailure>,
    },
}

/// Complete result of one harmonization run.
#[derive(Debug)]
pub struct RunOutcome {
    /// The harmonized payload.
    pub harmonized: HarmonizedPayload,
    /// Pre/post KPI report.
    pub kpi: KpiReport,
    /// Digest of the fitted model; `None` for a no-op run.
    pub fit: Option<FitSummary>,
    /// Whether the run was a single-site no-op (input passed through).
    pub no_op: bool,
}

/// Run harmonization end to end: build the design, fit and apply the
/// matching engine, evaluate KPIs on the paired pre/post populations.
///
/// A dataset with a single site level is surfaced as an explicit no-op
/// outcome (the payload passes through unchanged and `no_op` is set)
/// rather than an aborted run or a silent skip.
///
/// # Errors
///
/// Input-validity errors (insufficient site samples, mismatched lengths)
/// and engine-level failures (non-convergence, degenerate designs) are
/// fatal to the run. Per-sample manifold failures are collected in the
/// outcome instead.
pub fn harmonize(
    payload: HarmonizePayload,
    sites: &[String],
    covariates: &CovariateSet,
    gates: &[ErpGate],
    config: &HarmonizeConfig,
) -> Result<RunOutcome> {
    config.validate()?;

    let design = match SiteDesign::build(sites, covariates) {
        Ok(design) => design,
        Err(HarmonizeError::SingleSite { site }) => {
            info!(site = %site, "single site level; reporting no-op run");
            return no_op_outcome(payload, gates, config);
        }
        Err(e) => return Err(e),
    };

    match payload {
        HarmonizePayload::Vector(features) => {
            if features.n_samples() != design.n_samples() {
                return Err(HarmonizeError::length_mismatch(
                    design.n_samples(),
                    features.n_samples(),
                ));
            }
            info!(
                n_samples = features.n_samples(),
                n_features = features.n_features(),
                n_sites = design.n_sites(),
                "harmonizing feature vectors"
            );
            let model = combat::fit(&features, &design, config)?;
            let harmonized = combat::transform(&features, &model, &design)?;
            let kpi = kpi::evaluate(&features, &harmonized, &design, gates, covariates, config)?;
            Ok(RunOutcome {
                harmonized: HarmonizedPayload::Vector(harmonized),
                kpi,
                fit: Some(model.summary()),
                no_op: false,
            })
        }
        HarmonizePayload::Riemannian(matrices) => {
            info!(
                n_samples = matrices.len(),
                n_sites = design.n_sites(),
                "harmonizing SPD matrices"
            );
            let result = riemann::harmonize_spd(&matrices, &design, config)?;
            let kpi = kpi::evaluate(
                &result.tangent_pre,
                &result.tangent_post,
                &design,
                gates,
                covariates,
                config,
            )?;
            Ok(RunOutcome {
                harmonized: HarmonizedPayload::Riemannian {
                    matrices: result.matrices,
                    failures: result.failures,
                },
                kpi,
                fit: Some(result.model.summary()),
                no_op: false,
            })
        }
    }
}

/// Package a single-site run: payload passes through unchanged, gates are
/// trivially satisfied (pre equals post), and the site-dependent metrics are
/// reported as missing.
fn no_op_outcome(
    payload: HarmonizePayload,
    gates: &[ErpGate],
    config: &HarmonizeConfig,
) -> Result<RunOutcome> {
    let erp_gates: Vec<ErpGateResult> = match &payload {
        HarmonizePayload::Vector(features) => {
            kpi::evaluate_erp_gates(features, features, gates, config)?
        }
        HarmonizePayload::Riemannian(_) => Vec::new(),
    };

    let kpi = KpiReport {
        site_variance_ratio_pre: None,
        site_variance_ratio_post: None,
        leakage_auc_pre: None,
        leakage_auc_post: None,
        erp_gates,
        preservation: Vec::new(),
    };

    let harmonized = match payload {
        HarmonizePayload::Vector(features) => HarmonizedPayload::Vector(features),
        HarmonizePayload::Riemannian(matrices) => HarmonizedPayload::Riemannian {
            matrices: matrices.into_iter().map(Some).collect(),
            failures: Vec::new(),
        },
    };

    Ok(RunOutcome {
        harmonized,
        kpi,
        fit: None,
        no_op: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn config() -> HarmonizeConfig {
        HarmonizeConfig::default()
    }

    fn shifted_features() -> (FeatureMatrix, Vec<String>) {
        let mut rows = Vec::new();
        let mut sites = Vec::new();
        for i in 0..6 {
            rows.push(vec![1.0 + 0.05 * i as f64, 2.0 - 0.04 * i as f64]);
            sites.push("A".to_string());
        }
        for i in 0..6 {
            rows.push(vec![4.0 + 0.05 * i as f64, 5.0 - 0.04 * i as f64]);
            sites.push("B".to_string());
        }
        let features = FeatureMatrix::from_rows(
            vec!["alpha".to_string(), "beta".to_string()],
            &rows,
        )
        .unwrap();
        (features, sites)
    }

    #[test]
    fn test_vector_run() {
        let (features, sites) = shifted_features();
        let outcome = harmonize(
            HarmonizePayload::Vector(features),
            &sites,
            &CovariateSet::empty(),
            &[],
            &config(),
        )
        .unwrap();

        assert!(!outcome.no_op);
        assert!(outcome.fit.is_some());
        let pre = outcome.kpi.site_variance_ratio_pre.unwrap();
        let post = outcome.kpi.site_variance_ratio_post.unwrap();
        assert!(post < pre);
        assert!(matches!(outcome.harmonized, HarmonizedPayload::Vector(_)));
    }

    #[test]
    fn test_single_site_is_no_op() {
        let (features, _) = shifted_features();
        let sites = vec!["A".to_string(); features.n_samples()];
        let input = features.clone();

        let outcome = harmonize(
            HarmonizePayload::Vector(features),
            &sites,
            &CovariateSet::empty(),
            &[],
            &config(),
        )
        .unwrap();

        assert!(outcome.no_op);
        assert!(outcome.fit.is_none());
        assert!(outcome.kpi.site_variance_ratio_pre.is_none());
        match outcome.harmonized {
            HarmonizedPayload::Vector(out) => assert_eq!(out, input),
            HarmonizedPayload::Riemannian { .. } => panic!("payload kind changed"),
        }
    }

    #[test]
    fn test_riemannian_run() {
        let cfg = config();
        let mut matrices = Vec::new();
        let mut sites = Vec::new();
        for i in 0..4 {
            let v = 1.0 + 0.02 * i as f64;
            matrices.push(
                SpdMatrix::new(DMatrix::from_row_slice(2, 2, &[v, 0.1, 0.1, v]), &cfg).unwrap(),
            );
            sites.push("A".to_string());
            matrices.push(
                SpdMatrix::new(
                    DMatrix::from_row_slice(2, 2, &[3.0 * v, 0.3, 0.3, 3.0 * v]),
                    &cfg,
                )
                .unwrap(),
            );
            sites.push("B".to_string());
        }

        let outcome = harmonize(
            HarmonizePayload::Riemannian(matrices),
            &sites,
            &CovariateSet::empty(),
            &[],
            &cfg,
        )
        .unwrap();

        assert!(!outcome.no_op);
        let pre = outcome.kpi.site_variance_ratio_pre.unwrap();
        let post = outcome.kpi.site_variance_ratio_post.unwrap();
        assert!(post < pre);
        match outcome.harmonized {
            HarmonizedPayload::Riemannian { matrices, failures } => {
                assert_eq!(matrices.len(), 8);
                assert!(failures.is_empty());
                assert!(matrices.iter().all(Option::is_some));
            }
            HarmonizedPayload::Vector(_) => panic!("payload kind changed"),
        }
    }

    #[test]
    fn test_insufficient_site_samples_is_fatal() {
        let (features, mut sites) = shifted_features();
        sites[11] = "C".to_string();
        let result = harmonize(
            HarmonizePayload::Vector(features),
            &sites,
            &CovariateSet::empty(),
            &[],
            &config(),
        );
        assert!(matches!(
            result,
            Err(HarmonizeError::InsufficientSiteSamples { .. })
        ));
    }

    #[test]
    fn test_gates_flow_into_report() {
        let (features, sites) = shifted_features();
        let gates = vec![ErpGate {
            feature: "alpha".to_string(),
            tolerance: 100.0,
        }];
        let outcome = harmonize(
            HarmonizePayload::Vector(features),
            &sites,
            &CovariateSet::empty(),
            &gates,
            &config(),
        )
        .unwrap();
        assert_eq!(outcome.kpi.erp_gates.len(), 1);
        assert!(outcome.kpi.all_gates_passed());
    }
}

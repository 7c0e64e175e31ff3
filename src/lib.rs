//! EEG Site-Effect Harmonization Library
//!
//! Empirical-Bayes batch-effect correction for multi-site EEG-derived
//! features, with quality-control KPIs that detect both residual bias and
//! over-correction.
//!
//! # Features
//!
//! - **Vector ComBat**: location/scale harmonization of flat feature vectors
//!   (spectral band powers), with empirical-Bayes shrinkage toward pooled
//!   cross-feature priors
//! - **Riemannian ComBat**: the same engine applied to covariance/CSD
//!   matrices through tangent-space projection at their geometric mean,
//!   staying on the SPD manifold
//! - **Covariate protection**: biological covariates enter the mean model
//!   and their associated variance survives correction
//! - **KPI suite**: site-variance ratio, cross-validated site-leakage AUC,
//!   and ERP-integrity gates, all paired pre/post
//!
//! # Quick Start
//!
//! ```
//! use eeg_harmonize::{
//!     harmonize, CovariateSet, FeatureMatrix, HarmonizeConfig, HarmonizePayload,
//! };
//!
//! let features = FeatureMatrix::from_rows(
//!     vec!["alpha".to_string(), "beta".to_string()],
//!     &[
//!         vec![1.0, 2.1],
//!         vec![1.2, 1.9],
//!         vec![0.9, 2.0],
//!         vec![4.1, 5.0],
//!         vec![3.9, 5.2],
//!         vec![4.0, 4.9],
//!     ],
//! )?;
//! let sites: Vec<String> = ["A", "A", "A", "B", "B", "B"]
//!     .iter()
//!     .map(|s| (*s).to_string())
//!     .collect();
//!
//! let config = HarmonizeConfig::default();
//! let outcome = harmonize(
//!     HarmonizePayload::Vector(features),
//!     &sites,
//!     &CovariateSet::empty(),
//!     &[],
//!     &config,
//! )?;
//!
//! assert!(!outcome.no_op);
//! # Ok::<(), eeg_harmonize::HarmonizeError>(())
//! ```
//!
//! # Pipelines
//!
//! | Payload | Path |
//! |---------|------|
//! | `HarmonizePayload::Vector` | design → ComBat fit/transform → KPIs |
//! | `HarmonizePayload::Riemannian` | design → geometric mean → tangent space → ComBat → exp-map → KPIs |

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

pub mod combat;
pub mod config;
pub mod data;
pub mod design;
pub mod error;
pub mod kpi;
pub mod manifold;
pub mod orchestrator;
pub mod riemann;

// Re-exports for convenient access
pub use combat::{fit, transform, ComBatModel, FitSummary};
pub use config::HarmonizeConfig;
pub use data::{Covariate, CovariateSet, FeatureMatrix};
pub use design::{SiteDesign, MIN_SITE_SAMPLES};
pub use error::{HarmonizeError, Result};
pub use kpi::{
    evaluate, preservation_delta, site_leakage_auc, site_variance_ratio, ErpGate, ErpGateResult,
    KpiReport, PreservationDelta,
};
pub use manifold::{geometric_mean, SpdMatrix, TangentSpaceFrame};
pub use orchestrator::{harmonize, HarmonizePayload, HarmonizedPayload, RunOutcome};
pub use riemann::{harmonize_spd, RiemannianHarmonized, SampleFailure};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

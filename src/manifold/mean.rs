//! Geometric (Fréchet) mean of SPD matrices.
//!
//! Fixed-point iteration under the affine-invariant Riemannian metric:
//! alternate log-map averaging at the current estimate with an exp-map
//! recentring step until the Frobenius norm of the tangent update falls
//! below tolerance.

use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::debug;

use crate::config::HarmonizeConfig;
use crate::error::{HarmonizeError, Result};
use crate::manifold::spd::{expm, invsqrtm, logm, sqrtm, symmetrize, SpdMatrix};

/// Compute the geometric mean of a population of SPD matrices.
///
/// The iteration is inherently sequential; only the per-sample log-map terms
/// within one iteration run in parallel.
///
/// # Errors
///
/// - [`HarmonizeError::InvalidInput`] for an empty population or mixed
///   dimensions.
/// - [`HarmonizeError::ManifoldMeanNonConvergence`] if the update norm does
///   not fall below `config.mean_tol` within `config.mean_max_iter`
///   iterations.
pub fn geometric_mean(matrices: &[SpdMatrix], config: &HarmonizeConfig) -> Result<SpdMatrix> {
    let first = matrices
        .first()
        .ok_or_else(|| HarmonizeError::invalid_input("empty SPD population"))?;
    let dim = first.dim();
    for (i, m) in matrices.iter().enumerate() {
        if m.dim() != dim {
            return Err(HarmonizeError::invalid_input(format!(
                "SPD matrix {i} has dimension {}, expected {dim}",
                m.dim()
            )));
        }
    }
    if matrices.len() == 1 {
        return Ok(first.clone());
    }

    // Arithmetic mean as the starting point
    let mut current = DMatrix::<f64>::zeros(dim, dim);
    for m in matrices {
        current += m.matrix();
    }
    current /= matrices.len() as f64;

    let mut last_update = f64::INFINITY;
    for iteration in 0..config.mean_max_iter {
        let half = sqrtm(&current);
        let inv_half = invsqrtm(&current, config.spd_eig_tol)?;

        let terms: Vec<DMatrix<f64>> = matrices
            .par_iter()
            .map(|m| {
                let whitened = symmetrize(&(&inv_half * m.matrix() * &inv_half));
                logm(&whitened, config.spd_eig_tol)
            })
            .collect::<Result<_>>()?;

        let mut tangent_mean = DMatrix::<f64>::zeros(dim, dim);
        for term in &terms {
            tangent_mean += term;
        }
        tangent_mean /= matrices.len() as f64;

        last_update = tangent_mean.norm();
        current = symmetrize(&(&half * expm(&tangent_mean) * &half));

        debug!(iteration, update_norm = last_update, "geometric mean step");
        if last_update < config.mean_tol {
            return SpdMatrix::new(current, config);
        }
    }

    Err(HarmonizeError::ManifoldMeanNonConvergence {
        max_iter: config.mean_max_iter,
        last_update,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config() -> HarmonizeConfig {
        HarmonizeConfig::default()
    }

    fn diag_spd(values: &[f64]) -> SpdMatrix {
        let m = DMatrix::from_diagonal(&nalgebra::DVector::from_row_slice(values));
        SpdMatrix::new(m, &config()).unwrap()
    }

    #[test]
    fn test_mean_of_identical_matrices() {
        let m = diag_spd(&[2.0, 3.0]);
        let matrices = vec![m.clone(), m.clone(), m.clone()];
        let mean = geometric_mean(&matrices, &config()).unwrap();
        assert_relative_eq!(mean.matrix(), m.matrix(), epsilon = 1e-8);
    }

    #[test]
    fn test_mean_of_commuting_matrices_is_geometric() {
        // For commuting (here diagonal) matrices the Fréchet mean is the
        // entrywise geometric mean of the eigenvalues.
        let a = diag_spd(&[1.0, 4.0]);
        let b = diag_spd(&[4.0, 1.0]);
        let mean = geometric_mean(&[a, b], &config()).unwrap();
        assert_relative_eq!(mean.matrix()[(0, 0)], 2.0, epsilon = 1e-6);
        assert_relative_eq!(mean.matrix()[(1, 1)], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_single_matrix_mean() {
        let m = diag_spd(&[5.0, 0.5]);
        let mean = geometric_mean(std::slice::from_ref(&m), &config()).unwrap();
        assert_relative_eq!(mean.matrix(), m.matrix(), epsilon = 1e-12);
    }

    #[test]
    fn test_empty_population_rejected() {
        assert!(geometric_mean(&[], &config()).is_err());
    }

    #[test]
    fn test_mixed_dimension_rejected() {
        let a = diag_spd(&[1.0, 2.0]);
        let b = diag_spd(&[1.0, 2.0, 3.0]);
        assert!(geometric_mean(&[a, b], &config()).is_err());
    }

    #[test]
    fn test_non_convergence_reported() {
        let a = diag_spd(&[1.0, 100.0]);
        let b = diag_spd(&[100.0, 1.0]);
        let tight = HarmonizeConfig {
            mean_max_iter: 1,
            mean_tol: 1e-15,
            ..config()
        };
        let result = geometric_mean(&[a, b], &tight);
        assert!(matches!(
            result,
            Err(HarmonizeError::ManifoldMeanNonConvergence { max_iter: 1, .. })
        ));
    }
}

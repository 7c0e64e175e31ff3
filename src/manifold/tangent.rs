//! Tangent-space projection for SPD matrices.
//!
//! A [`TangentSpaceFrame`] fixes the reference point (normally the geometric
//! mean of the population) and caches its Cholesky factor, so that the
//! forward log-map and the inverse exp-map are guaranteed to whiten through
//! the same point. Vectorization uses the upper triangle with off-diagonal
//! entries scaled by √2, which makes the Euclidean inner product of the
//! vectors equal the Frobenius inner product of the matrices.

use nalgebra::{Cholesky, DMatrix, Dyn};

use crate::config::HarmonizeConfig;
use crate::error::{HarmonizeError, Result};
use crate::manifold::spd::{expm, logm, symmetrize, SpdMatrix};

/// Off-diagonal scaling that preserves the Frobenius inner product.
const SQRT_2: f64 = std::f64::consts::SQRT_2;

/// Reference point and whitening basis for tangent-space projection.
///
/// Created once per harmonization run; both the forward and inverse maps of
/// that run must go through the same frame.
#[derive(Debug, Clone)]
pub struct TangentSpaceFrame {
    reference: SpdMatrix,
    chol: DMatrix<f64>,
    chol_inv: DMatrix<f64>,
}

impl TangentSpaceFrame {
    /// Build a frame at the given reference point.
    ///
    /// # Errors
    ///
    /// Returns [`HarmonizeError::NumericalInstability`] if the Cholesky
    /// factorization fails (the reference has already been validated SPD, so
    /// this indicates severe conditioning problems).
    pub fn new(reference: SpdMatrix) -> Result<Self> {
        let chol: Cholesky<f64, Dyn> = Cholesky::new(reference.matrix().clone()).ok_or_else(
            || HarmonizeError::numerical_instability("Cholesky factorization of reference failed"),
        )?;
        let chol = chol.l();
        let dim = chol.nrows();
        let chol_inv = chol
            .clone()
            .solve_lower_triangular(&DMatrix::identity(dim, dim))
            .ok_or_else(|| {
                HarmonizeError::numerical_instability("reference Cholesky factor is singular")
            })?;
        Ok(Self {
            reference,
            chol,
            chol_inv,
        })
    }

    /// The reference point the frame was built at.
    #[must_use]
    pub fn reference(&self) -> &SpdMatrix {
        &self.reference
    }

    /// Matrix dimension of the frame.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.reference.dim()
    }

    /// Number of tangent-space coordinates produced by [`vectorize`].
    #[must_use]
    pub fn tangent_dim(&self) -> usize {
        let d = self.dim();
        d * (d + 1) / 2
    }

    /// Project an SPD matrix onto the tangent space at the reference.
    ///
    /// Computes `logm(L⁻¹ C L⁻ᵀ)` with the frame's Cholesky factor `L`. The
    /// result is explicitly symmetrized to absorb floating-point asymmetry.
    ///
    /// # Errors
    ///
    /// Returns an error for a dimension mismatch, or if the whitened matrix
    /// is numerically singular.
    pub fn log_map(&self, point: &SpdMatrix, config: &HarmonizeConfig) -> Result<DMatrix<f64>> {
        if point.dim() != self.dim() {
            return Err(HarmonizeError::invalid_input(format!(
                "point dimension {} does not match frame dimension {}",
                point.dim(),
                self.dim()
            )));
        }
        let whitened = symmetrize(&(&self.chol_inv * point.matrix() * self.chol_inv.transpose()));
        logm(&whitened, config.spd_eig_tol)
    }

    /// Map a symmetric tangent matrix back onto the manifold.
    ///
    /// Inverse of [`Self::log_map`]. The result is re-verified SPD: a
    /// back-projection that leaves the manifold is a correctness failure of
    /// the upstream correction, not something to patch over.
    ///
    /// # Errors
    ///
    /// Returns [`HarmonizeError::ManifoldProjection`] if the result is not
    /// symmetric positive-definite within tolerance.
    pub fn exp_map(&self, tangent: &DMatrix<f64>, config: &HarmonizeConfig) -> Result<SpdMatrix> {
        if tangent.nrows() != self.dim() || tangent.ncols() != self.dim() {
            return Err(HarmonizeError::invalid_input(format!(
                "tangent dimension {}x{} does not match frame dimension {}",
                tangent.nrows(),
                tangent.ncols(),
                self.dim()
            )));
        }
        let inner = expm(&symmetrize(tangent));
        let point = symmetrize(&(&self.chol * inner * self.chol.transpose()));
        SpdMatrix::new(point, config)
            .map_err(|e| HarmonizeError::manifold_projection(e.to_string()))
    }
}

/// Flatten a symmetric matrix into tangent-space coordinates.
///
/// Upper triangle in row-major order; off-diagonal entries scaled by √2 so
/// that `vectorize(a) · vectorize(b) == <a, b>_F`.
#[must_use]
pub fn vectorize(symmetric: &DMatrix<f64>) -> Vec<f64> {
    let d = symmetric.nrows();
    let mut out = Vec::with_capacity(d * (d + 1) / 2);
    for i in 0..d {
        for j in i..d {
            if i == j {
                out.push(symmetric[(i, i)]);
            } else {
                out.push(SQRT_2 * symmetric[(i, j)]);
            }
        }
    }
    out
}

/// Rebuild a symmetric matrix from tangent-space coordinates.
///
/// Exact inverse of [`vectorize`].
///
/// # Errors
///
/// Returns an error if the coordinate count does not match `dim`.
pub fn unvectorize(coords: &[f64], dim: usize) -> Result<DMatrix<f64>> {
    let expected = dim * (dim + 1) / 2;
    if coords.len() != expected {
        return Err(HarmonizeError::length_mismatch(expected, coords.len()));
    }
    let mut out = DMatrix::zeros(dim, dim);
    let mut k = 0;
    for i in 0..dim {
        for j in i..dim {
            if i == j {
                out[(i, i)] = coords[k];
            } else {
                let v = coords[k] / SQRT_2;
                out[(i, j)] = v;
                out[(j, i)] = v;
            }
            k += 1;
        }
    }
    Ok(out)
}

/// Names for the tangent-space coordinates of a `dim x dim` frame.
///
/// Used as the feature names of the tangent [`crate::FeatureMatrix`], so the
/// vector engine's diagnostics stay readable.
#[must_use]
pub fn coordinate_names(dim: usize) -> Vec<String> {
    let mut names = Vec::with_capacity(dim * (dim + 1) / 2);
    for i in 0..dim {
        for j in i..dim {
            names.push(format!("tangent_{i}_{j}"));
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config() -> HarmonizeConfig {
        HarmonizeConfig::default()
    }

    fn spd(entries: &[f64], dim: usize) -> SpdMatrix {
        SpdMatrix::new(DMatrix::from_row_slice(dim, dim, entries), &config()).unwrap()
    }

    #[test]
    fn test_log_exp_round_trip() {
        let reference = spd(&[2.0, 0.3, 0.3, 1.5], 2);
        let point = spd(&[1.2, -0.4, -0.4, 2.5], 2);
        let frame = TangentSpaceFrame::new(reference).unwrap();

        let tangent = frame.log_map(&point, &config()).unwrap();
        let back = frame.exp_map(&tangent, &config()).unwrap();

        assert!((back.matrix() - point.matrix()).norm() < 1e-8);
    }

    #[test]
    fn test_log_map_of_reference_is_zero() {
        let reference = spd(&[2.0, 0.3, 0.3, 1.5], 2);
        let frame = TangentSpaceFrame::new(reference.clone()).unwrap();
        let tangent = frame.log_map(&reference, &config()).unwrap();
        assert!(tangent.norm() < 1e-10);
    }

    #[test]
    fn test_vectorize_unvectorize_inverse() {
        let y = DMatrix::from_row_slice(3, 3, &[1.0, 0.5, -0.2, 0.5, 2.0, 0.7, -0.2, 0.7, 3.0]);
        let coords = vectorize(&y);
        assert_eq!(coords.len(), 6);
        let back = unvectorize(&coords, 3).unwrap();
        assert_relative_eq!(back, y, epsilon = 1e-14);
    }

    #[test]
    fn test_vectorize_preserves_frobenius_inner_product() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 2.0]);
        let b = DMatrix::from_row_slice(2, 2, &[0.3, -0.1, -0.1, 0.8]);
        let dot: f64 = vectorize(&a)
            .iter()
            .zip(vectorize(&b).iter())
            .map(|(x, y)| x * y)
            .sum();
        let frobenius = (&a * &b).trace();
        assert_relative_eq!(dot, frobenius, epsilon = 1e-12);
    }

    #[test]
    fn test_unvectorize_rejects_bad_length() {
        let result = unvectorize(&[1.0, 2.0], 3);
        assert!(matches!(
            result,
            Err(HarmonizeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_coordinate_names() {
        let names = coordinate_names(2);
        assert_eq!(names, vec!["tangent_0_0", "tangent_0_1", "tangent_1_1"]);
    }

    #[test]
    fn test_exp_map_dimension_mismatch() {
        let reference = spd(&[2.0, 0.3, 0.3, 1.5], 2);
        let frame = TangentSpaceFrame::new(reference).unwrap();
        let tangent = DMatrix::zeros(3, 3);
        assert!(frame.exp_map(&tangent, &config()).is_err());
    }
}

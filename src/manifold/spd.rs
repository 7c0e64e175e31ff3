//! Symmetric positive-definite matrices and their spectral functions.
//!
//! This module provides the [`SpdMatrix`] newtype (validated at construction,
//! so holding one is proof of SPD-ness) and the symmetric matrix functions
//! used by the tangent-space maps: matrix logarithm, exponential, square root
//! and inverse square root, all via `nalgebra`'s symmetric eigendecomposition.

use nalgebra::{DMatrix, SymmetricEigen};

use crate::config::HarmonizeConfig;
use crate::error::{HarmonizeError, Result};

/// A validated symmetric positive-definite matrix.
///
/// Invariant: square, exactly symmetric, all eigenvalues strictly positive.
/// Constructed through [`SpdMatrix::new`], which symmetrizes small
/// floating-point asymmetry and rejects anything worse.
#[derive(Debug, Clone, PartialEq)]
pub struct SpdMatrix {
    matrix: DMatrix<f64>,
}

impl SpdMatrix {
    /// Validate and wrap a matrix.
    ///
    /// Asymmetry up to `config.symmetry_tol` (relative to the largest entry)
    /// is averaged away; eigenvalues must all exceed `config.spd_eig_tol`.
    ///
    /// # Errors
    ///
    /// Returns [`HarmonizeError::NotSymmetric`] or
    /// [`HarmonizeError::NotPositiveDefinite`] accordingly, and
    /// [`HarmonizeError::InvalidInput`] for non-square or empty input.
    pub fn new(matrix: DMatrix<f64>, config: &HarmonizeConfig) -> Result<Self> {
        if matrix.nrows() == 0 || matrix.nrows() != matrix.ncols() {
            return Err(HarmonizeError::invalid_input(format!(
                "expected a non-empty square matrix, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(HarmonizeError::numerical_instability(
                "non-finite entry in SPD candidate",
            ));
        }

        let scale = matrix.amax().max(1.0);
        let max_asymmetry = max_asymmetry(&matrix);
        if max_asymmetry > config.symmetry_tol * scale {
            return Err(HarmonizeError::NotSymmetric { max_asymmetry });
        }

        let matrix = symmetrize(&matrix);
        let min_eigenvalue = SymmetricEigen::new(matrix.clone())
            .eigenvalues
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        if min_eigenvalue <= config.spd_eig_tol {
            return Err(HarmonizeError::NotPositiveDefinite { min_eigenvalue });
        }

        Ok(Self { matrix })
    }

    /// Matrix dimension (number of channels).
    #[must_use]
    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    /// Borrow the underlying matrix.
    #[must_use]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Consume into the underlying matrix.
    #[must_use]
    pub fn into_inner(self) -> DMatrix<f64> {
        self.matrix
    }
}

/// Largest absolute difference between a matrix and its transpose.
fn max_asymmetry(m: &DMatrix<f64>) -> f64 {
    let mut max = 0.0f64;
    for i in 0..m.nrows() {
        for j in (i + 1)..m.ncols() {
            max = max.max((m[(i, j)] - m[(j, i)]).abs());
        }
    }
    max
}

/// Average a matrix with its transpose.
#[must_use]
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// Apply a function to the eigenvalues of a symmetric matrix.
///
/// Reconstructs `Q f(Λ) Qᵀ`; the input is assumed already symmetric.
fn spectral_map(m: &DMatrix<f64>, f: impl Fn(f64) -> f64) -> DMatrix<f64> {
    let eigen = SymmetricEigen::new(m.clone());
    let mapped = DMatrix::from_diagonal(&eigen.eigenvalues.map(f));
    let q = &eigen.eigenvectors;
    symmetrize(&(q * mapped * q.transpose()))
}

/// Principal matrix logarithm of a symmetric positive-definite matrix.
///
/// # Errors
///
/// Returns [`HarmonizeError::NotPositiveDefinite`] if any eigenvalue is at or
/// below `eig_tol`, since the logarithm is undefined there.
pub fn logm(m: &DMatrix<f64>, eig_tol: f64) -> Result<DMatrix<f64>> {
    let eigen = SymmetricEigen::new(m.clone());
    let min_eigenvalue = eigen.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
    if min_eigenvalue <= eig_tol {
        return Err(HarmonizeError::NotPositiveDefinite { min_eigenvalue });
    }
    let mapped = DMatrix::from_diagonal(&eigen.eigenvalues.map(f64::ln));
    let q = &eigen.eigenvectors;
    Ok(symmetrize(&(q * mapped * q.transpose())))
}

/// Matrix exponential of a symmetric matrix.
#[must_use]
pub fn expm(m: &DMatrix<f64>) -> DMatrix<f64> {
    spectral_map(m, f64::exp)
}

/// Matrix square root of a symmetric positive-semidefinite matrix.
///
/// Eigenvalues pushed slightly negative by floating point are clamped to
/// zero before the root.
#[must_use]
pub fn sqrtm(m: &DMatrix<f64>) -> DMatrix<f64> {
    spectral_map(m, |v| v.max(0.0).sqrt())
}

/// Inverse matrix square root of a symmetric positive-definite matrix.
///
/// # Errors
///
/// Returns [`HarmonizeError::NotPositiveDefinite`] if any eigenvalue is at or
/// below `eig_tol`.
pub fn invsqrtm(m: &DMatrix<f64>, eig_tol: f64) -> Result<DMatrix<f64>> {
    let eigen = SymmetricEigen::new(m.clone());
    let min_eigenvalue = eigen.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
    if min_eigenvalue <= eig_tol {
        return Err(HarmonizeError::NotPositiveDefinite { min_eigenvalue });
    }
    let mapped = DMatrix::from_diagonal(&eigen.eigenvalues.map(|v| 1.0 / v.sqrt()));
    let q = &eigen.eigenvectors;
    Ok(symmetrize(&(q * mapped * q.transpose())))
}

//! Symmetric eigendecomposition with descending-eigenvalue ordering.
//!
//! Eigenvector signs come straight from the solver and are not canonicalised:
//! `v` and `-v` are equally valid, so downstream comparisons must allow a sign
//! flip per component.

use std::cmp::Ordering;

use log::debug;
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::{PcaError, Result};

/// Eigenvalues sorted descending, paired with eigenvector columns in the same order.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenSet {
    values: Array1<f64>,
    vectors: Array2<f64>,
}

impl EigenSet {
    /// Pairs solver output and sorts it descending by eigenvalue.
    ///
    /// The sort is stable, so equal eigenvalues keep the solver's order.
    pub fn from_unsorted(values: Array1<f64>, vectors: Array2<f64>) -> Result<Self> {
        if vectors.ncols() != values.len() {
            return Err(PcaError::shape_mismatch(
                "eigenvector columns",
                values.len(),
                vectors.ncols(),
            ));
        }
        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&a, &b| values[b].partial_cmp(&values[a]).unwrap_or(Ordering::Equal));

        let sorted_values = order.iter().map(|&i| values[i]).collect::<Array1<f64>>();
        let sorted_vectors = vectors.select(Axis(1), &order);
        Ok(Self {
            values: sorted_values,
            vectors: sorted_vectors,
        })
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    /// Eigenvectors as columns, column `j` belongs to `values()[j]`.
    pub fn vectors(&self) -> &Array2<f64> {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_parts(self) -> (Array1<f64>, Array2<f64>) {
        (self.values, self.vectors)
    }
}

/// A backend able to diagonalise a real symmetric matrix.
///
/// Implementations read the upper triangle and may return the pairs in any
/// order; [`eigen_decompose_with`] does the sorting.
pub trait SymmetricEigenSolver: Send + Sync {
    fn decompose(&self, matrix: ArrayView2<f64>) -> Result<(Array1<f64>, Array2<f64>)>;
}

/// Pure-Rust backend built on `nalgebra::SymmetricEigen`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NalgebraEigen;

impl SymmetricEigenSolver for NalgebraEigen {
    fn decompose(&self, matrix: ArrayView2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
        let n = matrix.nrows();
        // nalgebra reads the lower triangle, so mirror the upper one into it.
        let mirrored = nalgebra::DMatrix::from_fn(n, n, |i, j| {
            if i <= j {
                matrix[[i, j]]
            } else {
                matrix[[j, i]]
            }
        });
        let eig = nalgebra::SymmetricEigen::try_new(mirrored, f64::EPSILON, 0)
            .ok_or_else(|| PcaError::Eigen("symmetric eigensolver did not converge".to_string()))?;

        let values = Array1::from_iter(eig.eigenvalues.iter().copied());
        let vectors = Array2::from_shape_fn((n, n), |(i, j)| eig.eigenvectors[(i, j)]);
        Ok((values, vectors))
    }
}

/// LAPACK backend (`dsyevd` through ndarray-linalg), upper-triangle convention.
#[cfg(feature = "lapack")]
#[derive(Debug, Default, Clone, Copy)]
pub struct LapackEigen;

#[cfg(feature = "lapack")]
impl SymmetricEigenSolver for LapackEigen {
    fn decompose(&self, matrix: ArrayView2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
        use ndarray_linalg::{Eigh, UPLO};
        matrix
            .eigh(UPLO::Upper)
            .map_err(|e| PcaError::Eigen(e.to_string()))
    }
}

#[cfg(feature = "lapack")]
fn default_solver() -> LapackEigen {
    LapackEigen
}

#[cfg(not(feature = "lapack"))]
fn default_solver() -> NalgebraEigen {
    NalgebraEigen
}

/// Decomposes `matrix` with an explicit backend and returns the descending [`EigenSet`].
pub fn eigen_decompose_with<S: SymmetricEigenSolver + ?Sized>(
    solver: &S,
    matrix: ArrayView2<f64>,
) -> Result<EigenSet> {
    if matrix.nrows() == 0 {
        return Err(PcaError::EmptyDataset);
    }
    if matrix.nrows() != matrix.ncols() {
        return Err(PcaError::shape_mismatch(
            "symmetric matrix columns",
            matrix.nrows(),
            matrix.ncols(),
        ));
    }
    let (values, vectors) = solver.decompose(matrix)?;
    let set = EigenSet::from_unsorted(values, vectors)?;
    debug!(
        "Eigendecomposition of {}x{} matrix, leading eigenvalue {:.6e}",
        matrix.nrows(),
        matrix.ncols(),
        set.values()[0]
    );
    Ok(set)
}

/// Decomposes `matrix` with the backend selected by cargo features.
pub fn eigen_decompose(matrix: ArrayView2<f64>) -> Result<EigenSet> {
    eigen_decompose_with(&default_solver(), matrix)
}

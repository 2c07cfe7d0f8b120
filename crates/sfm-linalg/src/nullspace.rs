//! Null-space basis extraction for homogeneous linear systems `A x = 0`.
//!
//! Minimal solvers repeatedly need the right null space (or the
//! least-squares null vector) of a thin design matrix. Working on the
//! normal matrix `A^T A` keeps the decomposition square and yields the full
//! set of right singular directions regardless of the shape of `A`.

use nalgebra::{DMatrix, DVector};

/// Compute an orthonormal basis of the (approximate) right null space of `a`.
///
/// Returns the `dimension` eigenvectors of `A^T A` with the smallest
/// eigenvalues, as columns ordered from smallest eigenvalue upwards.
/// Returns `None` when the requested dimension exceeds the column count.
pub fn nullspace_basis(a: &DMatrix<f64>, dimension: usize) -> Option<DMatrix<f64>> {
    let cols = a.ncols();
    if dimension == 0 || dimension > cols {
        return None;
    }

    let normal = a.transpose() * a;
    let eigen = normal.symmetric_eigen();

    // symmetric_eigen does not guarantee an eigenvalue ordering.
    let mut order: Vec<usize> = (0..cols).collect();
    order.sort_by(|&i, &j| eigen.eigenvalues[i].abs().total_cmp(&eigen.eigenvalues[j].abs()));

    let mut basis = DMatrix::<f64>::zeros(cols, dimension);
    for (k, &idx) in order.iter().take(dimension).enumerate() {
        basis.set_column(k, &eigen.eigenvectors.column(idx));
    }
    Some(basis)
}

/// The single least-squares null vector of `a` (smallest right singular
/// direction), unit length.
pub fn nullspace_vector(a: &DMatrix<f64>) -> Option<DVector<f64>> {
    let basis = nullspace_basis(a, 1)?;
    Some(DVector::from_column_slice(basis.column(0).as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_nullspace_vector_of_rank_deficient_system() {
        // Rows all orthogonal to (1, -2, 1).
        let a = DMatrix::from_row_slice(
            4,
            3,
            &[
                1.0, 1.0, 1.0, //
                2.0, 1.5, 1.0, //
                0.0, 0.5, 1.0, //
                3.0, 2.0, 1.0,
            ],
        );
        let x = nullspace_vector(&a).unwrap();
        let residual = &a * &x;
        assert_relative_eq!(residual.norm(), 0.0, epsilon = 1e-10);
        assert_relative_eq!(x.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_nullspace_basis_dimension() {
        // A single row in R^4 has a 3-dimensional null space.
        let a = DMatrix::from_row_slice(1, 4, &[1.0, 2.0, 3.0, 4.0]);
        let basis = nullspace_basis(&a, 3).unwrap();
        assert_eq!(basis.ncols(), 3);
        for k in 0..3 {
            let col = basis.column(k);
            let residual = &a * col;
            assert_relative_eq!(residual.norm(), 0.0, epsilon = 1e-12);
        }
        // Columns are orthonormal.
        let gram = basis.transpose() * &basis;
        assert_relative_eq!(gram, DMatrix::identity(3, 3), epsilon = 1e-12);
    }

    #[test]
    fn test_nullspace_requested_dimension_too_large() {
        let a = DMatrix::from_row_slice(1, 2, &[1.0, 0.0]);
        assert!(nullspace_basis(&a, 3).is_none());
    }
}

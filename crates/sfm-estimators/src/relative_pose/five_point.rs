//! Minimal five-point essential matrix solver.
//!
//! Parameterizes the essential matrix over the 4-dimensional null space of
//! the epipolar design matrix, `E = x*B1 + y*B2 + z*B3 + B4`, and expands
//! the rank and trace constraints into ten cubic polynomials in `(x, y, z)`.
//! Grouping the cubics by their monomials in `(x, y)` gives a 10x10 matrix
//! `C(z)` of univariate polynomials whose determinant (degree 10 in `z`)
//! vanishes exactly at the solutions. The determinant is recovered by
//! interpolation, its real roots give `z`, and the null vector of `C(z)`
//! yields `x` and `y` by back-substitution.

use nalgebra::{DMatrix, Matrix3, Vector2};
use sfm_linalg::nullspace::{nullspace_basis, nullspace_vector};
use sfm_linalg::roots::find_real_roots;

use super::{epipolar_design_matrix, squared_sampson_errors, EssentialMatrix};
use crate::estimator::Estimator;

/// Essential matrix from five 2D-2D correspondences, up to 10 candidates.
pub struct FivePointEstimator;

impl Estimator for FivePointEstimator {
    type PointA = Vector2<f64>;
    type PointB = Vector2<f64>;
    type Model = EssentialMatrix;

    const MIN_SAMPLES: usize = 5;

    fn estimate(points1: &[Vector2<f64>], points2: &[Vector2<f64>]) -> Vec<EssentialMatrix> {
        if points1.len() != points2.len() || points1.len() < Self::MIN_SAMPLES {
            return Vec::new();
        }

        let design = epipolar_design_matrix(points1, points2);
        let Some(null4) = nullspace_basis(&design, 4) else {
            return Vec::new();
        };

        // Basis matrices for E = x*B1 + y*B2 + z*B3 + B4 (row-major).
        let basis: [Matrix3<f64>; 4] = [
            Matrix3::from_row_slice(null4.column(0).as_slice()),
            Matrix3::from_row_slice(null4.column(1).as_slice()),
            Matrix3::from_row_slice(null4.column(2).as_slice()),
            Matrix3::from_row_slice(null4.column(3).as_slice()),
        ];

        let constraints = essential_constraints(&basis);
        let coeff_table = hidden_variable_table(&constraints);

        let Some(eliminant) = interpolate_determinant(&coeff_table) else {
            return Vec::new();
        };

        let mut models = Vec::new();
        for z in find_real_roots(&eliminant) {
            let c_z = evaluate_constraint_matrix(&coeff_table, z);
            let Some(v) = nullspace_vector(&c_z) else {
                continue;
            };
            // v holds [x^3, x^2 y, x y^2, y^3, x^2, x y, y^2, x, y, 1] up
            // to scale; a valid solution has a non-zero constant entry.
            if v[9].abs() < 1e-10 {
                continue;
            }
            let x = v[7] / v[9];
            let y = v[8] / v[9];

            let e = basis[0] * x + basis[1] * y + basis[2] * z + basis[3];
            let norm = e.norm();
            if norm > f64::EPSILON {
                models.push(e / norm);
            }
        }
        models
    }

    fn residuals(
        points1: &[Vector2<f64>],
        points2: &[Vector2<f64>],
        e: &EssentialMatrix,
    ) -> Vec<f64> {
        squared_sampson_errors(points1, points2, e)
    }
}

/// Exponent triples `(x, y, z)` of all monomials of total degree <= 3,
/// graded by degree. All polynomial arithmetic below indexes into this
/// table.
const MONOMIALS: [[u8; 3]; 20] = [
    [0, 0, 0],
    [1, 0, 0],
    [0, 1, 0],
    [0, 0, 1],
    [2, 0, 0],
    [1, 1, 0],
    [1, 0, 1],
    [0, 2, 0],
    [0, 1, 1],
    [0, 0, 2],
    [3, 0, 0],
    [2, 1, 0],
    [2, 0, 1],
    [1, 2, 0],
    [1, 1, 1],
    [1, 0, 2],
    [0, 3, 0],
    [0, 2, 1],
    [0, 1, 2],
    [0, 0, 3],
];

/// Monomials in `(x, y)` indexing the columns of the hidden-variable
/// constraint matrix, matching the back-substitution order above.
const XY_MONOMIALS: [[u8; 2]; 10] = [
    [3, 0],
    [2, 1],
    [1, 2],
    [0, 3],
    [2, 0],
    [1, 1],
    [0, 2],
    [1, 0],
    [0, 1],
    [0, 0],
];

fn monomial_index(x: u8, y: u8, z: u8) -> Option<usize> {
    MONOMIALS
        .iter()
        .position(|m| m[0] == x && m[1] == y && m[2] == z)
}

/// A polynomial in `(x, y, z)` of total degree at most 3.
#[derive(Clone, Copy)]
struct Poly {
    coeffs: [f64; 20],
}

impl Poly {
    const ZERO: Self = Self { coeffs: [0.0; 20] };

    /// `cx*x + cy*y + cz*z + c0`.
    fn linear(cx: f64, cy: f64, cz: f64, c0: f64) -> Self {
        let mut p = Self::ZERO;
        p.coeffs[0] = c0;
        p.coeffs[1] = cx;
        p.coeffs[2] = cy;
        p.coeffs[3] = cz;
        p
    }

    fn add(&self, other: &Self) -> Self {
        let mut out = *self;
        for (a, b) in out.coeffs.iter_mut().zip(other.coeffs.iter()) {
            *a += b;
        }
        out
    }

    fn sub(&self, other: &Self) -> Self {
        let mut out = *self;
        for (a, b) in out.coeffs.iter_mut().zip(other.coeffs.iter()) {
            *a -= b;
        }
        out
    }

    fn scaled(&self, factor: f64) -> Self {
        let mut out = *self;
        for a in out.coeffs.iter_mut() {
            *a *= factor;
        }
        out
    }

    /// Product of two polynomials. The caller guarantees the result stays
    /// within total degree 3.
    fn mul(&self, other: &Self) -> Self {
        let mut out = Self::ZERO;
        for (i, &a) in self.coeffs.iter().enumerate() {
            if a == 0.0 {
                continue;
            }
            for (j, &b) in other.coeffs.iter().enumerate() {
                if b == 0.0 {
                    continue;
                }
                let ex = MONOMIALS[i][0] + MONOMIALS[j][0];
                let ey = MONOMIALS[i][1] + MONOMIALS[j][1];
                let ez = MONOMIALS[i][2] + MONOMIALS[j][2];
                debug_assert!(ex + ey + ez <= 3, "product exceeds cubic degree");
                if let Some(k) = monomial_index(ex, ey, ez) {
                    out.coeffs[k] += a * b;
                }
            }
        }
        out
    }

    fn max_abs_coeff(&self) -> f64 {
        self.coeffs.iter().fold(0.0, |acc, c| acc.max(c.abs()))
    }
}

/// The ten cubic constraints on `E = x*B1 + y*B2 + z*B3 + B4`:
/// `det(E) = 0` and the nine entries of `2*E*E^T*E - trace(E*E^T)*E = 0`.
/// Each constraint is scaled to unit maximum coefficient.
fn essential_constraints(basis: &[Matrix3<f64>; 4]) -> [Poly; 10] {
    // Entries of E as linear polynomials in (x, y, z).
    let mut e = [[Poly::ZERO; 3]; 3];
    for (i, row) in e.iter_mut().enumerate() {
        for (j, entry) in row.iter_mut().enumerate() {
            *entry = Poly::linear(
                basis[0][(i, j)],
                basis[1][(i, j)],
                basis[2][(i, j)],
                basis[3][(i, j)],
            );
        }
    }

    let det = e[0][0]
        .mul(&e[1][1].mul(&e[2][2]).sub(&e[1][2].mul(&e[2][1])))
        .sub(&e[0][1].mul(&e[1][0].mul(&e[2][2]).sub(&e[1][2].mul(&e[2][0]))))
        .add(&e[0][2].mul(&e[1][0].mul(&e[2][1]).sub(&e[1][1].mul(&e[2][0]))));

    // Gram matrix E*E^T, degree 2.
    let mut gram = [[Poly::ZERO; 3]; 3];
    for (i, row) in gram.iter_mut().enumerate() {
        for (j, entry) in row.iter_mut().enumerate() {
            for k in 0..3 {
                *entry = entry.add(&e[i][k].mul(&e[j][k]));
            }
        }
    }
    let trace = gram[0][0].add(&gram[1][1]).add(&gram[2][2]);

    let mut constraints = [Poly::ZERO; 10];
    constraints[0] = det;
    for i in 0..3 {
        for j in 0..3 {
            let mut t = Poly::ZERO;
            for k in 0..3 {
                t = t.add(&gram[i][k].mul(&e[k][j]));
            }
            constraints[1 + 3 * i + j] = t.scaled(2.0).sub(&trace.mul(&e[i][j]));
        }
    }

    // Unit maximum coefficient per row for conditioning.
    for c in constraints.iter_mut() {
        let scale = c.max_abs_coeff();
        if scale > 0.0 {
            *c = c.scaled(1.0 / scale);
        }
    }
    constraints
}

/// Coefficients in `z` of every entry of the 10x10 hidden-variable matrix:
/// `table[row][col][k]` multiplies `z^k` in the coefficient of the `col`-th
/// `(x, y)` monomial of the `row`-th constraint. Columns of higher `(x, y)`
/// degree leave less room for powers of `z`, which bounds the determinant
/// degree at 10.
fn hidden_variable_table(constraints: &[Poly; 10]) -> [[[f64; 4]; 10]; 10] {
    let mut table = [[[0.0f64; 4]; 10]; 10];
    for (row, constraint) in constraints.iter().enumerate() {
        for (col, xy) in XY_MONOMIALS.iter().enumerate() {
            let max_z = 3 - xy[0] - xy[1];
            for k in 0..=max_z {
                if let Some(idx) = monomial_index(xy[0], xy[1], k) {
                    table[row][col][k as usize] = constraint.coeffs[idx];
                }
            }
        }
    }
    table
}

fn evaluate_constraint_matrix(table: &[[[f64; 4]; 10]; 10], z: f64) -> DMatrix<f64> {
    let z2 = z * z;
    let z3 = z2 * z;
    DMatrix::from_fn(10, 10, |row, col| {
        let c = &table[row][col];
        c[0] + c[1] * z + c[2] * z2 + c[3] * z3
    })
}

/// Ascending coefficients of `det C(z)`, a polynomial of degree at most 10,
/// recovered by evaluating the determinant at 11 Chebyshev nodes and solving
/// the Vandermonde system.
fn interpolate_determinant(table: &[[[f64; 4]; 10]; 10]) -> Option<Vec<f64>> {
    const NUM_NODES: usize = 11;

    let mut nodes = [0.0f64; NUM_NODES];
    for (t, node) in nodes.iter_mut().enumerate() {
        let angle = std::f64::consts::PI * (2.0 * t as f64 + 1.0) / (2.0 * NUM_NODES as f64);
        *node = 2.0 * angle.cos();
    }

    let vandermonde = DMatrix::from_fn(NUM_NODES, NUM_NODES, |r, c| nodes[r].powi(c as i32));
    let values = nalgebra::DVector::from_iterator(
        NUM_NODES,
        nodes
            .iter()
            .map(|&z| evaluate_constraint_matrix(table, z).determinant()),
    );

    let coeffs = vandermonde.lu().solve(&values)?;
    if coeffs.iter().all(|c| c.abs() < 1e-14) {
        return None;
    }
    Some(coeffs.as_slice().to_vec())
}

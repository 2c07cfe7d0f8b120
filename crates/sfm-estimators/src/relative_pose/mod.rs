//! Relative pose (essential matrix) estimation from 2D-2D correspondences.
//!
//! Both solvers operate on normalized image coordinates and return essential
//! matrices satisfying `x2^T E x1 = 0` for inlying correspondences.

mod eight_point;
mod five_point;

pub use eight_point::EightPointEstimator;
pub use five_point::FivePointEstimator;

use nalgebra::{DMatrix, Matrix3, Vector2};

/// A 3x3 essential matrix relating two views.
pub type EssentialMatrix = Matrix3<f64>;

/// One row per correspondence of the linear epipolar constraint
/// `x2^T E x1 = 0` over the row-major vectorization of `E`.
pub(crate) fn epipolar_design_matrix(
    points1: &[Vector2<f64>],
    points2: &[Vector2<f64>],
) -> DMatrix<f64> {
    let n = points1.len();
    let mut design = DMatrix::<f64>::zeros(n, 9);
    for (i, (x1, x2)) in points1.iter().zip(points2.iter()).enumerate() {
        design[(i, 0)] = x2.x * x1.x;
        design[(i, 1)] = x2.x * x1.y;
        design[(i, 2)] = x2.x;
        design[(i, 3)] = x2.y * x1.x;
        design[(i, 4)] = x2.y * x1.y;
        design[(i, 5)] = x2.y;
        design[(i, 6)] = x1.x;
        design[(i, 7)] = x1.y;
        design[(i, 8)] = 1.0;
    }
    design
}

/// Squared Sampson distance of each correspondence under `e`.
///
/// First-order approximation of the geometric reprojection error: the
/// squared algebraic residual divided by the squared gradient norm of the
/// epipolar constraint. A vanishing gradient means the error cannot be
/// evaluated and yields `f64::MAX`.
pub(crate) fn squared_sampson_errors(
    points1: &[Vector2<f64>],
    points2: &[Vector2<f64>],
    e: &EssentialMatrix,
) -> Vec<f64> {
    let e_t = e.transpose();
    points1
        .iter()
        .zip(points2.iter())
        .map(|(x1, x2)| {
            let x1h = x1.push(1.0);
            let x2h = x2.push(1.0);
            let ex1 = e * x1h;
            let etx2 = e_t * x2h;
            let algebraic = x2h.dot(&ex1);
            let gradient_sq = ex1.x * ex1.x + ex1.y * ex1.y + etx2.x * etx2.x + etx2.y * etx2.y;
            if gradient_sq > f64::EPSILON {
                algebraic * algebraic / gradient_sq
            } else {
                f64::MAX
            }
        })
        .collect()
}

/// Isotropic (Hartley) normalization: translate the centroid to the origin
/// and scale the mean distance from it to `sqrt(2)`.
///
/// Returns the transformed points and the similarity `T` with
/// `x' = T * (x, 1)`.
pub(crate) fn normalize_points(points: &[Vector2<f64>]) -> (Vec<Vector2<f64>>, Matrix3<f64>) {
    let n = points.len() as f64;
    let centroid = points.iter().sum::<Vector2<f64>>() / n;
    let mean_dist = points.iter().map(|p| (p - centroid).norm()).sum::<f64>() / n;

    let scale = if mean_dist > f64::EPSILON {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let transform = Matrix3::new(
        scale,
        0.0,
        -scale * centroid.x,
        0.0,
        scale,
        -scale * centroid.y,
        0.0,
        0.0,
        1.0,
    );
    let transformed = points.iter().map(|p| (p - centroid) * scale).collect();
    (transformed, transform)
}

//! Linear eight-point essential matrix solver.

use nalgebra::{Matrix3, Vector2, Vector3};
use sfm_linalg::nullspace::nullspace_vector;

use super::{epipolar_design_matrix, normalize_points, squared_sampson_errors, EssentialMatrix};
use crate::estimator::Estimator;

/// Essential matrix from eight or more 2D-2D correspondences.
///
/// Solves the epipolar constraint as a homogeneous linear system over
/// isotropically normalized points, then projects the least-squares solution
/// onto the essential-matrix manifold by forcing its two non-zero singular
/// values to their mean and the smallest one to zero. Also serves as the
/// local-optimization refitter for the five-point solver since it accepts
/// over-determined inputs.
pub struct EightPointEstimator;

impl Estimator for EightPointEstimator {
    type PointA = Vector2<f64>;
    type PointB = Vector2<f64>;
    type Model = EssentialMatrix;

    const MIN_SAMPLES: usize = 8;

    fn estimate(points1: &[Vector2<f64>], points2: &[Vector2<f64>]) -> Vec<EssentialMatrix> {
        if points1.len() != points2.len() || points1.len() < Self::MIN_SAMPLES {
            return Vec::new();
        }

        let (norm1, t1) = normalize_points(points1);
        let (norm2, t2) = normalize_points(points2);

        let design = epipolar_design_matrix(&norm1, &norm2);
        let Some(e_vec) = nullspace_vector(&design) else {
            return Vec::new();
        };
        let e_norm = Matrix3::from_row_slice(e_vec.as_slice());

        // Undo the normalization, then enforce the essential-matrix
        // singular-value structure on the denormalized estimate.
        let e_raw = t2.transpose() * e_norm * t1;
        match project_to_essential(&e_raw) {
            Some(e) => vec![e],
            None => Vec::new(),
        }
    }

    fn residuals(
        points1: &[Vector2<f64>],
        points2: &[Vector2<f64>],
        e: &EssentialMatrix,
    ) -> Vec<f64> {
        squared_sampson_errors(points1, points2, e)
    }
}

/// Replace the singular values of `m` with `(sigma, sigma, 0)` where
/// `sigma` is the mean of the two largest.
fn project_to_essential(m: &Matrix3<f64>) -> Option<EssentialMatrix> {
    let svd = m.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return None,
    };

    let mut order = [0usize, 1, 2];
    order.sort_by(|&i, &j| svd.singular_values[j].total_cmp(&svd.singular_values[i]));

    let sigma = 0.5 * (svd.singular_values[order[0]] + svd.singular_values[order[1]]);
    let mut diagonal = Vector3::zeros();
    diagonal[order[0]] = sigma;
    diagonal[order[1]] = sigma;

    Some(u * Matrix3::from_diagonal(&diagonal) * v_t)
}

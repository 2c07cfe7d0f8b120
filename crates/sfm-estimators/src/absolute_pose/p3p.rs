//! Minimal three-point absolute pose solver (Grunert's formulation).

use nalgebra::{Vector2, Vector3};
use sfm_linalg::rigid::umeyama_alignment;
use sfm_linalg::roots::find_real_roots;

use super::{compose_projection, squared_reprojection_errors, ProjectionMatrix};
use crate::estimator::Estimator;

/// Absolute pose from three 2D-3D correspondences.
///
/// The three law-of-cosines constraints between the world-space triangle and
/// the inter-ray angles reduce to a quartic in one depth ratio. Every real
/// positive root is back-substituted into the camera-frame point depths and
/// checked for consistency with the world-space distances; of the surviving
/// candidates the pose with the smallest reprojection error on the sample is
/// returned. Degenerate samples (coincident or collinear points) yield no
/// candidate.
pub struct P3PEstimator;

// Relative tolerance on the back-substituted squared distances.
const DISTANCE_CONSISTENCY_TOL: f64 = 1e-4;

impl Estimator for P3PEstimator {
    type PointA = Vector2<f64>;
    type PointB = Vector3<f64>;
    type Model = ProjectionMatrix;

    const MIN_SAMPLES: usize = 3;

    fn estimate(points2d: &[Vector2<f64>], points3d: &[Vector3<f64>]) -> Vec<ProjectionMatrix> {
        if points2d.len() != 3 || points3d.len() != 3 {
            return Vec::new();
        }

        // Unit bearing vectors through the normalized observations.
        let f1 = points2d[0].push(1.0).normalize();
        let f2 = points2d[1].push(1.0).normalize();
        let f3 = points2d[2].push(1.0).normalize();

        // World-space squared side lengths. Side `a` is opposite point 1,
        // `b` opposite point 2, `c` opposite point 3.
        let a_sq = (points3d[1] - points3d[2]).norm_squared();
        let b_sq = (points3d[0] - points3d[2]).norm_squared();
        let c_sq = (points3d[0] - points3d[1]).norm_squared();
        if a_sq < f64::EPSILON || b_sq < f64::EPSILON || c_sq < f64::EPSILON {
            return Vec::new();
        }

        let cos_alpha = f2.dot(&f3);
        let cos_beta = f1.dot(&f3);
        let cos_gamma = f1.dot(&f2);

        // With depths s2 = u*s1 and s3 = v*s1, eliminating s1 and u from the
        // three constraints leaves a quartic in v. The elimination expresses
        // u = n(v) / d(v) and substitutes into the third constraint:
        //   n(v)^2 - 2*cos_gamma*n(v)*d(v) + q(v)*d(v)^2 = 0.
        let big_a = a_sq / b_sq;
        let big_c = c_sq / b_sq;
        let ac = big_a - big_c;

        // Coefficients in ascending powers of v.
        let n = [1.0 + ac, -2.0 * ac * cos_beta, ac - 1.0];
        let d = [2.0 * cos_gamma, -2.0 * cos_alpha];
        let q = [1.0 - big_c, 2.0 * big_c * cos_beta, -big_c];

        let nn = conv(&n, &n);
        let nd = conv(&n, &d);
        let qdd = conv(&q, &conv(&d, &d));

        let mut quartic = [0.0f64; 5];
        for (i, coeff) in quartic.iter_mut().enumerate() {
            *coeff = nn[i] + qdd[i];
            if i < nd.len() {
                *coeff -= 2.0 * cos_gamma * nd[i];
            }
        }

        let mut best: Option<(f64, ProjectionMatrix)> = None;
        for v in find_real_roots(&quartic) {
            if v <= 0.0 {
                continue;
            }
            let denom = d[0] + d[1] * v;
            if denom.abs() < 1e-12 {
                continue;
            }
            let u = (n[0] + n[1] * v + n[2] * v * v) / denom;
            if u <= 0.0 {
                continue;
            }

            let s1_sq_denom = 1.0 + u * u - 2.0 * u * cos_gamma;
            if s1_sq_denom < f64::EPSILON {
                continue;
            }
            let s1 = (c_sq / s1_sq_denom).sqrt();
            let s2 = u * s1;
            let s3 = v * s1;

            // Back-substituted distances must reproduce the world triangle.
            let a_chk = s2 * s2 + s3 * s3 - 2.0 * s2 * s3 * cos_alpha;
            let b_chk = s1 * s1 + s3 * s3 - 2.0 * s1 * s3 * cos_beta;
            if (a_chk - a_sq).abs() > DISTANCE_CONSISTENCY_TOL * a_sq
                || (b_chk - b_sq).abs() > DISTANCE_CONSISTENCY_TOL * b_sq
            {
                continue;
            }

            let camera_points = [f1 * s1, f2 * s2, f3 * s3];
            let Ok((rotation, translation)) = umeyama_alignment(points3d, &camera_points) else {
                continue;
            };
            let proj = compose_projection(&rotation, &translation);

            let error: f64 = squared_reprojection_errors(points2d, points3d, &proj)
                .into_iter()
                .sum();
            if best.as_ref().map_or(true, |(e, _)| error < *e) {
                best = Some((error, proj));
            }
        }

        best.map(|(_, proj)| vec![proj]).unwrap_or_default()
    }

    fn residuals(
        points2d: &[Vector2<f64>],
        points3d: &[Vector3<f64>],
        proj: &ProjectionMatrix,
    ) -> Vec<f64> {
        squared_reprojection_errors(points2d, points3d, proj)
    }
}

fn conv(p: &[f64], q: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; p.len() + q.len() - 1];
    for (i, &pi) in p.iter().enumerate() {
        for (j, &qj) in q.iter().enumerate() {
            out[i + j] += pi * qj;
        }
    }
    out
}

//! Efficient Perspective-n-Point (EPnP) solver.
//!
//! Expresses all world points as barycentric combinations of four virtual
//! control points, recovers the camera-frame control points from the null
//! space of a 2n x 12 linear system, and disambiguates the null-space
//! combination via three beta approximations refined by Gauss-Newton.

use nalgebra::{DMatrix, DVector, Matrix3, Vector2, Vector3, Vector4};
use sfm_linalg::nullspace::nullspace_basis;
use sfm_linalg::rigid::umeyama_alignment;

use super::{compose_projection, squared_reprojection_errors, ProjectionMatrix};
use crate::estimator::Estimator;

/// Absolute pose from four or more 2D-3D correspondences.
///
/// Accepts over-determined inputs, so the consensus engine can also use it
/// as a local-optimization refitter over the current inlier set. Returns the
/// single candidate with the lowest total reprojection error among the three
/// beta approximations, or nothing when every approximation fails.
pub struct EPnPEstimator;

const CP_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

impl Estimator for EPnPEstimator {
    type PointA = Vector2<f64>;
    type PointB = Vector3<f64>;
    type Model = ProjectionMatrix;

    const MIN_SAMPLES: usize = 4;

    fn estimate(points2d: &[Vector2<f64>], points3d: &[Vector3<f64>]) -> Vec<ProjectionMatrix> {
        if points2d.len() != points3d.len() || points2d.len() < Self::MIN_SAMPLES {
            return Vec::new();
        }

        let cw = select_control_points(points3d);
        let Some(alphas) = compute_barycentric(points3d, &cw) else {
            return Vec::new();
        };

        let m = build_design_matrix(&alphas, points2d);
        let Some(null4) = nullspace_basis(&m, 4) else {
            return Vec::new();
        };

        let l = build_l6x10(&null4);
        let rho = control_point_distances(&cw);

        let candidates = [
            estimate_betas_approx1(&l, &rho),
            estimate_betas_approx2(&l, &rho),
            estimate_betas_approx3(&l, &rho),
        ];

        let mut best: Option<(f64, ProjectionMatrix)> = None;
        for betas in candidates.into_iter().flatten() {
            let refined = gauss_newton(betas, &null4, &rho);
            let Some(proj) = pose_from_betas(&refined, &null4, &cw) else {
                continue;
            };
            let error: f64 = squared_reprojection_errors(points2d, points3d, &proj)
                .into_iter()
                .sum();
            if error.is_finite() && best.as_ref().map_or(true, |(e, _)| error < *e) {
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

/// Centroid plus the three principal axes of the point distribution, each
/// scaled by the square root of its covariance eigenvalue.
fn select_control_points(points3d: &[Vector3<f64>]) -> [Vector3<f64>; 4] {
    let n = points3d.len() as f64;
    let centroid = points3d.iter().sum::<Vector3<f64>>() / n;

    let mut covariance = Matrix3::<f64>::zeros();
    for p in points3d {
        let d = p - centroid;
        covariance += d * d.transpose();
    }
    covariance /= n;

    let eigen = covariance.symmetric_eigen();
    let mut order: Vec<usize> = (0..3).collect();
    order.sort_by(|&i, &j| eigen.eigenvalues[j].total_cmp(&eigen.eigenvalues[i]));

    let mut cw = [centroid; 4];
    for (k, &idx) in order.iter().enumerate() {
        let sigma = eigen.eigenvalues[idx].max(0.0).sqrt();
        let axis = eigen.eigenvectors.column(idx).into_owned();
        cw[k + 1] = centroid + axis * sigma;
    }
    cw
}

/// Barycentric coordinates of each world point with respect to the control
/// points. Falls back to the pseudo-inverse for near-planar configurations.
fn compute_barycentric(
    points3d: &[Vector3<f64>],
    cw: &[Vector3<f64>; 4],
) -> Option<Vec<[f64; 4]>> {
    let basis = Matrix3::from_columns(&[cw[1] - cw[0], cw[2] - cw[0], cw[3] - cw[0]]);
    let basis_inv = basis
        .try_inverse()
        .or_else(|| basis.pseudo_inverse(1e-12).ok())?;

    Some(
        points3d
            .iter()
            .map(|p| {
                let lambda = basis_inv * (p - cw[0]);
                [
                    1.0 - lambda.x - lambda.y - lambda.z,
                    lambda.x,
                    lambda.y,
                    lambda.z,
                ]
            })
            .collect(),
    )
}

/// The 2n x 12 system tying each observation to its control-point
/// combination, in normalized image coordinates (unit focal length,
/// principal point at the origin).
fn build_design_matrix(alphas: &[[f64; 4]], points2d: &[Vector2<f64>]) -> DMatrix<f64> {
    let n = alphas.len();
    let mut m = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (a, x)) in alphas.iter().zip(points2d.iter()).enumerate() {
        for (j, &alpha) in a.iter().enumerate() {
            m[(2 * i, 3 * j)] = alpha;
            m[(2 * i, 3 * j + 2)] = -alpha * x.x;
            m[(2 * i + 1, 3 * j + 1)] = alpha;
            m[(2 * i + 1, 3 * j + 2)] = -alpha * x.y;
        }
    }
    m
}

/// The 6 x 10 distance-constraint matrix over the pairwise differences of
/// the four null-space basis vectors. Columns follow the monomial order
/// `[b11, b12, b22, b13, b23, b33, b14, b24, b34, b44]`.
fn build_l6x10(null4: &DMatrix<f64>) -> [[f64; 10]; 6] {
    let mut l = [[0.0f64; 10]; 6];
    for (row, &(a, b)) in CP_PAIRS.iter().enumerate() {
        let mut d = [Vector3::<f64>::zeros(); 4];
        for (k, dk) in d.iter_mut().enumerate() {
            *dk = Vector3::new(
                null4[(3 * a, k)] - null4[(3 * b, k)],
                null4[(3 * a + 1, k)] - null4[(3 * b + 1, k)],
                null4[(3 * a + 2, k)] - null4[(3 * b + 2, k)],
            );
        }
        l[row] = [
            d[0].dot(&d[0]),
            2.0 * d[0].dot(&d[1]),
            d[1].dot(&d[1]),
            2.0 * d[0].dot(&d[2]),
            2.0 * d[1].dot(&d[2]),
            d[2].dot(&d[2]),
            2.0 * d[0].dot(&d[3]),
            2.0 * d[1].dot(&d[3]),
            2.0 * d[2].dot(&d[3]),
            d[3].dot(&d[3]),
        ];
    }
    l
}

fn control_point_distances(cw: &[Vector3<f64>; 4]) -> [f64; 6] {
    CP_PAIRS.map(|(i, j)| (cw[i] - cw[j]).norm_squared())
}

/// Least-squares solve of a column subset of L against the control-point
/// distances.
fn solve_l_subset(l: &[[f64; 10]; 6], rho: &[f64; 6], cols: &[usize]) -> Option<DVector<f64>> {
    let data: Vec<f64> = cols
        .iter()
        .flat_map(|&c| (0..6).map(move |r| l[r][c]))
        .collect();
    let l_sub = DMatrix::from_column_slice(6, cols.len(), &data);
    let rho_vec = DVector::from_column_slice(rho);
    l_sub.svd(true, true).solve(&rho_vec, 1e-12).ok()
}

// Approximation over [b11, b12, b13, b14]: assumes beta1 dominates.
fn estimate_betas_approx1(l: &[[f64; 10]; 6], rho: &[f64; 6]) -> Option<[f64; 4]> {
    let x = solve_l_subset(l, rho, &[0, 1, 3, 6])?;
    let mut betas = [0.0f64; 4];
    if x[0] < 0.0 {
        betas[0] = (-x[0]).sqrt();
        betas[1] = -x[1] / betas[0];
        betas[2] = -x[2] / betas[0];
        betas[3] = -x[3] / betas[0];
    } else {
        betas[0] = x[0].sqrt();
        betas[1] = x[1] / betas[0];
        betas[2] = x[2] / betas[0];
        betas[3] = x[3] / betas[0];
    }
    betas.iter().all(|b| b.is_finite()).then_some(betas)
}

// Approximation over [b11, b12, b22]: the quadratic-consistent two-term case.
fn estimate_betas_approx2(l: &[[f64; 10]; 6], rho: &[f64; 6]) -> Option<[f64; 4]> {
    let x = solve_l_subset(l, rho, &[0, 1, 2])?;
    let mut betas = [0.0f64; 4];
    if x[0] < 0.0 {
        betas[0] = (-x[0]).sqrt();
        betas[1] = if x[2] < 0.0 { (-x[2]).sqrt() } else { 0.0 };
    } else {
        betas[0] = x[0].sqrt();
        betas[1] = if x[2] > 0.0 { x[2].sqrt() } else { 0.0 };
    }
    if x[1] < 0.0 {
        betas[0] = -betas[0];
    }
    betas.iter().all(|b| b.is_finite()).then_some(betas)
}

// Relaxed approximation over [b11, b12, b22, b13, b23].
fn estimate_betas_approx3(l: &[[f64; 10]; 6], rho: &[f64; 6]) -> Option<[f64; 4]> {
    let x = solve_l_subset(l, rho, &[0, 1, 2, 3, 4])?;
    let mut betas = [0.0f64; 4];
    if x[0] < 0.0 {
        betas[0] = (-x[0]).sqrt();
        betas[1] = if x[2] < 0.0 { (-x[2]).sqrt() } else { 0.0 };
    } else {
        betas[0] = x[0].sqrt();
        betas[1] = if x[2] > 0.0 { x[2].sqrt() } else { 0.0 };
    }
    if x[1] < 0.0 {
        betas[0] = -betas[0];
    }
    betas[2] = x[3] / betas[0];
    betas.iter().all(|b| b.is_finite()).then_some(betas)
}

/// Damped Gauss-Newton refinement of the betas against the exact pairwise
/// distance constraints among control points.
fn gauss_newton(betas: [f64; 4], null4: &DMatrix<f64>, rho: &[f64; 6]) -> [f64; 4] {
    let mut beta = Vector4::from_column_slice(&betas);

    for _ in 0..6 {
        let mut f = DVector::<f64>::zeros(6);
        let mut jac = DMatrix::<f64>::zeros(6, 4);

        for (row, &(i, j)) in CP_PAIRS.iter().enumerate() {
            let block_i = null4.view((3 * i, 0), (3, 4));
            let block_j = null4.view((3 * j, 0), (3, 4));
            let diff = &block_i * &beta - &block_j * &beta;

            f[row] = diff.dot(&diff) - rho[row];
            for k in 0..4 {
                let col_diff = block_i.column(k) - block_j.column(k);
                jac[(row, k)] = 2.0 * col_diff.dot(&diff);
            }
        }

        let jt = jac.transpose();
        let normal = &jt * &jac + DMatrix::<f64>::identity(4, 4) * 1e-9;
        let gradient = &jt * f;

        let Some(delta) = normal.lu().solve(&gradient) else {
            break;
        };
        let step = delta.norm();
        beta -= Vector4::from_column_slice(delta.as_slice());
        if step < 1e-8 {
            break;
        }
    }

    [beta[0], beta[1], beta[2], beta[3]]
}

/// Camera-frame control points from the betas, depth-sign disambiguation,
/// then Procrustes alignment of the control-point tetrahedra.
fn pose_from_betas(
    betas: &[f64; 4],
    null4: &DMatrix<f64>,
    cw: &[Vector3<f64>; 4],
) -> Option<ProjectionMatrix> {
    let beta = Vector4::from_column_slice(betas);
    let cc_flat = null4 * beta;

    let mut cc = [Vector3::<f64>::zeros(); 4];
    for (i, c) in cc.iter_mut().enumerate() {
        *c = Vector3::new(cc_flat[3 * i], cc_flat[3 * i + 1], cc_flat[3 * i + 2]);
    }

    // The null space fixes the camera-frame solution only up to a global
    // sign. cc[0] is the camera-frame image of the world centroid, which
    // must lie in front of the camera.
    if cc[0].z < 0.0 {
        for c in &mut cc {
            *c = -*c;
        }
    }

    let (rotation, translation) = umeyama_alignment(cw, &cc).ok()?;
    Some(compose_projection(&rotation, &translation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn project(proj: &ProjectionMatrix, pw: &Vector3<f64>) -> Vector2<f64> {
        let pc = proj * pw.push(1.0);
        Vector2::new(pc.x / pc.z, pc.y / pc.z)
    }

    fn synthetic_scene(n: usize) -> (ProjectionMatrix, Vec<Vector3<f64>>, Vec<Vector2<f64>>) {
        let r = Rotation3::from_euler_angles(-0.15, 0.25, 0.05).into_inner();
        let proj = compose_projection(&r, &Vector3::new(0.1, 0.3, 5.0));

        let points3d: Vec<_> = (0..n)
            .map(|i| {
                let t = i as f64;
                Vector3::new(
                    (1.3 * t).sin() + 0.2 * t,
                    (0.7 * t).cos() - 0.1 * t,
                    0.5 * (2.1 * t).sin() + 0.3,
                )
            })
            .collect();
        let points2d: Vec<_> = points3d.iter().map(|p| project(&proj, p)).collect();
        (proj, points3d, points2d)
    }

    #[test]
    fn test_barycentric_reconstructs_points() {
        let (_, points3d, _) = synthetic_scene(8);
        let cw = select_control_points(&points3d);
        let alphas = compute_barycentric(&points3d, &cw).unwrap();

        for (p, a) in points3d.iter().zip(alphas.iter()) {
            let recon = cw[0] * a[0] + cw[1] * a[1] + cw[2] * a[2] + cw[3] * a[3];
            assert_relative_eq!(recon, *p, epsilon = 1e-9);
            assert_relative_eq!(a.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_epnp_recovers_pose_from_exact_data() {
        let (truth, points3d, points2d) = synthetic_scene(10);

        let models = EPnPEstimator::estimate(&points2d, &points3d);
        assert_eq!(models.len(), 1);

        let residuals = EPnPEstimator::residuals(&points2d, &points3d, &models[0]);
        for r in residuals {
            assert!(r < 1e-6, "residual too large: {r}");
        }

        assert_relative_eq!(models[0], truth, epsilon = 1e-4);
    }

    #[test]
    fn test_epnp_minimal_sample_of_four() {
        let (_, points3d, points2d) = synthetic_scene(4);
        let models = EPnPEstimator::estimate(&points2d, &points3d);
        assert_eq!(models.len(), 1);
        let residuals = EPnPEstimator::residuals(&points2d, &points3d, &models[0]);
        for r in residuals {
            assert!(r < 1e-6, "residual too large: {r}");
        }
    }

    #[test]
    fn test_epnp_rejects_undersized_input() {
        let (_, points3d, points2d) = synthetic_scene(3);
        assert!(EPnPEstimator::estimate(&points2d, &points3d).is_empty());
    }

    #[test]
    fn test_epnp_planar_points_do_not_crash() {
        let r = Rotation3::from_euler_angles(0.1, -0.3, 0.2).into_inner();
        let proj = compose_projection(&r, &Vector3::new(0.0, 0.0, 4.0));
        let points3d: Vec<_> = (0..8)
            .map(|i| {
                let t = i as f64;
                Vector3::new((1.7 * t).sin(), (0.9 * t).cos(), 0.0)
            })
            .collect();
        let points2d: Vec<_> = points3d.iter().map(|p| project(&proj, p)).collect();

        // Planar scenes may produce a poor pose but must return finite
        // models or nothing.
        for model in EPnPEstimator::estimate(&points2d, &points3d) {
            assert!(model.iter().all(|v| v.is_finite()));
        }
    }
}

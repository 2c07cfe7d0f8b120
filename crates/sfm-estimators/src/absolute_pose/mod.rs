//! Absolute camera pose estimation from 2D-3D correspondences.
//!
//! Both solvers take observations in normalized image coordinates (the
//! calibration matrix already removed) and world points in an arbitrary
//! metric frame, and produce a world-to-camera projection `[R | t]`.

mod epnp;
mod p3p;

pub use epnp::EPnPEstimator;
pub use p3p::P3PEstimator;

use nalgebra::{Matrix3, Matrix3x4, Vector2, Vector3};

/// A world-to-camera projection matrix `[R | t]`.
pub type ProjectionMatrix = Matrix3x4<f64>;

pub(crate) fn compose_projection(
    rotation: &Matrix3<f64>,
    translation: &Vector3<f64>,
) -> ProjectionMatrix {
    let mut proj = ProjectionMatrix::zeros();
    proj.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    proj.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    proj
}

/// Squared reprojection error of each correspondence under `proj`, in
/// normalized image units. Points at or behind the camera plane cannot be
/// projected and get `f64::MAX`.
pub(crate) fn squared_reprojection_errors(
    points2d: &[Vector2<f64>],
    points3d: &[Vector3<f64>],
    proj: &ProjectionMatrix,
) -> Vec<f64> {
    points2d
        .iter()
        .zip(points3d.iter())
        .map(|(x, pw)| {
            let pc = proj * pw.push(1.0);
            if pc.z > f64::EPSILON {
                let inv_z = 1.0 / pc.z;
                let dx = pc.x * inv_z - x.x;
                let dy = pc.y * inv_z - x.y;
                dx * dx + dy * dy
            } else {
                f64::MAX
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_compose_projection_layout() {
        let r = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let t = Vector3::new(0.5, -0.25, 2.0);
        let proj = compose_projection(&r, &t);
        assert_eq!(proj.fixed_view::<3, 3>(0, 0), r);
        assert_eq!(proj.column(3), t.column(0));
    }

    #[test]
    fn test_reprojection_error_zero_for_exact_projection() {
        let proj = compose_projection(&Matrix3::identity(), &Vector3::new(0.0, 0.0, 1.0));
        let pw = Vector3::new(0.2, -0.1, 1.0);
        let x = Vector2::new(0.1, -0.05);
        let errors = squared_reprojection_errors(&[x], &[pw], &proj);
        assert_relative_eq!(errors[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reprojection_error_behind_camera_is_max() {
        let proj = compose_projection(&Matrix3::identity(), &Vector3::zeros());
        let pw = Vector3::new(0.0, 0.0, -1.0);
        let errors = squared_reprojection_errors(&[Vector2::zeros()], &[pw], &proj);
        assert_eq!(errors[0], f64::MAX);
    }
}

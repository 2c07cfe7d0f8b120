//! Rigid alignment utilities (Kabsch / Umeyama) and orthogonal projection.

use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

/// Error type for rigid alignment operations.
#[derive(Debug, Error)]
pub enum RigidAlignError {
    /// Source and destination sets must have the same, non-zero length.
    #[error("source ({src}) and destination ({dst}) point sets must have the same non-zero length")]
    MismatchedInputLengths {
        /// Number of source points.
        src: usize,
        /// Number of destination points.
        dst: usize,
    },
    /// The SVD of the cross-covariance did not converge.
    #[error("SVD of the cross-covariance matrix failed")]
    SvdFailed,
}

/// Rigid transform aligning two corresponding 3D point sets without scale.
///
/// Finds the rotation `R` and translation `t` minimizing
/// `sum_i || dst_i - (R * src_i + t) ||^2` via the SVD of the
/// cross-covariance matrix, with a reflection correction so that
/// `det(R) = +1` (orthogonal Procrustes / Umeyama with `s = 1`).
pub fn umeyama_alignment(
    src: &[Vector3<f64>],
    dst: &[Vector3<f64>],
) -> Result<(Matrix3<f64>, Vector3<f64>), RigidAlignError> {
    if src.len() != dst.len() || src.is_empty() {
        return Err(RigidAlignError::MismatchedInputLengths {
            src: src.len(),
            dst: dst.len(),
        });
    }
    let n = src.len() as f64;

    let mu_src = src.iter().sum::<Vector3<f64>>() / n;
    let mu_dst = dst.iter().sum::<Vector3<f64>>() / n;

    // Cross-covariance H = sum (dst_i - mu_dst)(src_i - mu_src)^T.
    let mut h = Matrix3::<f64>::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        h += (d - mu_dst) * (s - mu_src).transpose();
    }
    h /= n;

    let svd = h.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(RigidAlignError::SvdFailed),
    };

    // Reflection correction to keep a proper rotation.
    let d = if (u * v_t).determinant() < 0.0 {
        -1.0
    } else {
        1.0
    };
    let s = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d));
    let rotation = u * s * v_t;
    let translation = mu_dst - rotation * mu_src;

    Ok((rotation, translation))
}

/// Project a 3x3 matrix onto the orthogonal group.
///
/// Returns `U * V^T` from the SVD of `m`. Note that the result is the
/// closest orthogonal matrix but not necessarily a proper rotation; callers
/// that need `det = +1` must handle the reflection themselves.
pub fn closest_orthogonal_matrix(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => Some(u * v_t),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rotation_zyx(yaw: f64, pitch: f64, roll: f64) -> Matrix3<f64> {
        nalgebra::Rotation3::from_euler_angles(roll, pitch, yaw).into_inner()
    }

    #[test]
    fn test_umeyama_recovers_rigid_transform() {
        let r = rotation_zyx(0.4, -0.2, 0.7);
        let t = Vector3::new(0.3, -1.2, 2.5);

        let src = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.3, 0.7, -0.2),
        ];
        let dst: Vec<_> = src.iter().map(|p| r * p + t).collect();

        let (r_est, t_est) = umeyama_alignment(&src, &dst).unwrap();

        assert_relative_eq!(r_est, r, epsilon = 1e-10);
        assert_relative_eq!(t_est, t, epsilon = 1e-10);
        assert_relative_eq!(r_est.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_umeyama_reflection_correction() {
        // A near-planar set that tends to produce a reflection without the
        // determinant fix.
        let src = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ];
        let r = rotation_zyx(1.1, 0.0, 0.0);
        let dst: Vec<_> = src.iter().map(|p| r * p).collect();

        let (r_est, _) = umeyama_alignment(&src, &dst).unwrap();
        assert_relative_eq!(r_est.determinant(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_umeyama_rejects_mismatched_lengths() {
        let a = vec![Vector3::zeros()];
        let b: Vec<Vector3<f64>> = Vec::new();
        assert!(umeyama_alignment(&a, &b).is_err());
    }

    #[test]
    fn test_closest_orthogonal_matrix() {
        let r = rotation_zyx(0.2, 0.9, -0.4);
        // Perturb away from orthogonality.
        let mut m = r;
        m[(0, 0)] += 0.05;
        m[(2, 1)] -= 0.03;

        let q = closest_orthogonal_matrix(&m).unwrap();
        let should_be_identity = q.transpose() * q;
        assert_relative_eq!(should_be_identity, Matrix3::identity(), epsilon = 1e-12);
    }
}

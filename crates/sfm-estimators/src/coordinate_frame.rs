//! Manhattan-world coordinate frame estimation from vanishing points.
//!
//! Each registered image contributes up to two world-space axis candidates,
//! obtained by robustly fitting a vanishing point to its horizontal and
//! vertical line segments. The per-image candidates are then fused by a
//! consensus vote into a single orthonormal rightward/downward/forward
//! frame.

use nalgebra::{Matrix3, UnitQuaternion, Vector2, Vector3};
use thiserror::Error;

use crate::estimator::Estimator;
use crate::ransac::{Ransac, RansacOptions};
use sfm_linalg::rigid::closest_orthogonal_matrix;

/// A 2D line segment in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    /// Start point.
    pub start: Vector2<f64>,
    /// End point.
    pub end: Vector2<f64>,
}

impl LineSegment {
    /// The homogeneous line through the two endpoints.
    pub fn homogeneous_line(&self) -> Vector3<f64> {
        self.start.push(1.0).cross(&self.end.push(1.0))
    }

    /// Classify the segment as horizontal or vertical within an angular
    /// tolerance on the normalized direction components.
    pub fn classify_orientation(&self, tolerance: f64) -> LineSegmentOrientation {
        let direction = self.end - self.start;
        let norm = direction.norm();
        if norm < f64::EPSILON {
            return LineSegmentOrientation::Undefined;
        }
        let direction = direction / norm;
        if direction.x.abs() > 1.0 - tolerance {
            LineSegmentOrientation::Horizontal
        } else if direction.y.abs() > 1.0 - tolerance {
            LineSegmentOrientation::Vertical
        } else {
            LineSegmentOrientation::Undefined
        }
    }
}

/// Dominant image-space orientation of a line segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSegmentOrientation {
    /// Mostly aligned with the image x axis.
    Horizontal,
    /// Mostly aligned with the image y axis.
    Vertical,
    /// Neither orientation within tolerance.
    Undefined,
}

/// Vanishing point from pairs of line segments.
///
/// The model is the homogeneous intersection of the two sampled lines. The
/// residual of a segment is the squared perpendicular distance from its end
/// point to the line joining the segment midpoint and the vanishing point,
/// so a segment pointing exactly at the vanishing point has zero residual.
pub struct VanishingPointEstimator;

impl Estimator for VanishingPointEstimator {
    type PointA = LineSegment;
    type PointB = Vector3<f64>;
    type Model = Vector3<f64>;

    const MIN_SAMPLES: usize = 2;

    fn estimate(_segments: &[LineSegment], lines: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        if lines.len() != 2 {
            return Vec::new();
        }
        vec![lines[0].cross(&lines[1])]
    }

    fn residuals(
        segments: &[LineSegment],
        _lines: &[Vector3<f64>],
        vanishing_point: &Vector3<f64>,
    ) -> Vec<f64> {
        // A vanishing point at infinity cannot be scored.
        if vanishing_point.z.abs() < f64::EPSILON {
            return vec![f64::MAX; segments.len()];
        }

        segments
            .iter()
            .map(|segment| {
                let midpoint = (0.5 * (segment.start + segment.end)).push(1.0);
                let connecting_line = midpoint.cross(vanishing_point);
                let norm = connecting_line.xy().norm();
                if norm < f64::EPSILON {
                    return f64::MAX;
                }
                let signed_distance = connecting_line.dot(&segment.end.push(1.0)) / norm;
                signed_distance * signed_distance
            })
            .collect()
    }
}

/// Options for [`estimate_coordinate_frame`].
#[derive(Debug, Clone)]
pub struct CoordinateFrameOptions {
    /// Maximum distance in pixels between a line segment's end point and
    /// the line through its midpoint and the vanishing point.
    pub max_line_vp_distance: f64,
    /// Maximum angular distance (`1 - dot`) for axis candidates to vote for
    /// each other in the consensus step.
    pub max_axis_distance: f64,
    /// Consensus options for the per-image vanishing point fits. The error
    /// threshold is derived from `max_line_vp_distance`.
    pub ransac: RansacOptions,
}

impl Default for CoordinateFrameOptions {
    fn default() -> Self {
        Self {
            max_line_vp_distance: 3.0,
            max_axis_distance: 0.05,
            ransac: RansacOptions::default(),
        }
    }
}

/// Errors produced by the coordinate-frame estimator.
#[derive(Debug, Error)]
pub enum CoordinateFrameError {
    /// A camera calibration matrix could not be inverted.
    #[error("calibration matrix of image {image} is not invertible")]
    SingularCalibration {
        /// Index of the offending image.
        image: usize,
    },
    /// The final orthonormalization failed to converge.
    #[error("SVD of the assembled frame failed")]
    OrthonormalizationFailed,
}

/// Per-image inputs to the coordinate-frame estimator.
#[derive(Debug, Clone)]
pub struct RegisteredImage {
    /// World-to-camera rotation.
    pub rotation: UnitQuaternion<f64>,
    /// Camera calibration matrix.
    pub calibration: Matrix3<f64>,
    /// Detected line segments in pixel coordinates with their orientation
    /// labels.
    pub line_segments: Vec<(LineSegment, LineSegmentOrientation)>,
}

/// Estimate the Manhattan-world frame of a reconstruction.
///
/// Returns a 3x3 matrix whose columns are the rightward, downward and
/// forward world axes. When both the rightward and downward axes found
/// support, the frame is projected onto the orthogonal group; when only one
/// did, the unsupported columns are zero; when neither did, the matrix is
/// zero.
pub fn estimate_coordinate_frame(
    images: &[RegisteredImage],
    options: &CoordinateFrameOptions,
) -> Result<Matrix3<f64>, CoordinateFrameError> {
    // The vanishing point residual is a squared pixel distance.
    let mut ransac_options = options.ransac.clone();
    ransac_options.max_error = options.max_line_vp_distance * options.max_line_vp_distance;
    let ransac = Ransac::<VanishingPointEstimator>::new(ransac_options);

    let mut first_rightward: Option<Vector3<f64>> = None;
    let mut rightward_axes: Vec<Vector3<f64>> = Vec::new();
    let mut downward_axes: Vec<Vector3<f64>> = Vec::new();

    for (image_idx, image) in images.iter().enumerate() {
        let inv_calibration = image
            .calibration
            .try_inverse()
            .ok_or(CoordinateFrameError::SingularCalibration { image: image_idx })?;
        let camera_to_world = image.rotation.inverse();

        for orientation in [
            LineSegmentOrientation::Horizontal,
            LineSegmentOrientation::Vertical,
        ] {
            let segments: Vec<LineSegment> = image
                .line_segments
                .iter()
                .filter(|(_, o)| *o == orientation)
                .map(|(s, _)| *s)
                .collect();
            if segments.len() < VanishingPointEstimator::MIN_SAMPLES {
                continue;
            }
            let lines: Vec<Vector3<f64>> =
                segments.iter().map(|s| s.homogeneous_line()).collect();

            let report = ransac.estimate(&segments, &lines);
            let Some(vanishing_point) = report.model.filter(|_| report.success) else {
                continue;
            };

            log::debug!(
                "image {}: {:?} vanishing point with {} / {} supporting segments",
                image_idx,
                orientation,
                report.support.num_inliers,
                segments.len()
            );

            // Direction of the vanishing point in the camera frame, then
            // rotated into the world frame.
            let camera_direction = (inv_calibration * vanishing_point).normalize();
            let mut axis = (camera_to_world * camera_direction).normalize();

            match orientation {
                LineSegmentOrientation::Horizontal => {
                    // The first rightward axis fixes the sign convention
                    // for the whole run.
                    match first_rightward {
                        None => first_rightward = Some(axis),
                        Some(reference) => {
                            if axis.dot(&reference) < 0.0 {
                                axis = -axis;
                            }
                        }
                    }
                    rightward_axes.push(axis);
                }
                LineSegmentOrientation::Vertical => {
                    // Downward means positive image y in the camera frame,
                    // independent of processing order.
                    if camera_direction.y < 0.0 {
                        axis = -axis;
                    }
                    downward_axes.push(axis);
                }
                LineSegmentOrientation::Undefined => {}
            }
        }
    }

    let mut frame = Matrix3::<f64>::zeros();
    if !rightward_axes.is_empty() {
        frame.set_column(
            0,
            &find_best_consensus_axis(&rightward_axes, options.max_axis_distance),
        );
    }
    if !downward_axes.is_empty() {
        frame.set_column(
            1,
            &find_best_consensus_axis(&downward_axes, options.max_axis_distance),
        );
    }
    let rightward = frame.column(0).into_owned();
    let downward = frame.column(1).into_owned();
    frame.set_column(2, &rightward.cross(&downward));

    // Orthonormalize only when both independent axes have support.
    if rightward.norm() > 0.0 && downward.norm() > 0.0 {
        frame = closest_orthogonal_matrix(&frame)
            .ok_or(CoordinateFrameError::OrthonormalizationFailed)?;
    }
    Ok(frame)
}

/// The axis with the largest set of neighbors within `max_distance`
/// (`1 - dot`), averaged over that neighbor set. Ties are broken by the
/// smaller summed distance to the neighbors. Returns zero for an empty
/// input.
pub fn find_best_consensus_axis(axes: &[Vector3<f64>], max_distance: f64) -> Vector3<f64> {
    let mut best_neighbors: Vec<usize> = Vec::new();
    let mut best_distance_sum = f64::MAX;

    for (i, reference) in axes.iter().enumerate() {
        let mut neighbors = Vec::new();
        let mut distance_sum = 0.0;
        for (j, axis) in axes.iter().enumerate() {
            let distance = 1.0 - reference.dot(axis);
            if distance <= max_distance {
                neighbors.push(j);
                if i != j {
                    distance_sum += distance;
                }
            }
        }
        if neighbors.len() > best_neighbors.len()
            || (neighbors.len() == best_neighbors.len() && distance_sum < best_distance_sum)
        {
            best_neighbors = neighbors;
            best_distance_sum = distance_sum;
        }
    }

    if best_neighbors.is_empty() {
        return Vector3::zeros();
    }
    let sum: Vector3<f64> = best_neighbors.iter().map(|&j| axes[j]).sum();
    sum.normalize()
}

//! The solver contract shared by all minimal solvers and the consensus
//! engine.

/// A model estimator over paired observation sequences.
///
/// Estimators are pure: they hold no state and operate only on the slices
/// passed in, so the same estimator type can score candidates concurrently
/// over independent correspondence sets.
///
/// `points_a[i]` corresponds to `points_b[i]` for all inputs.
pub trait Estimator {
    /// The first element of a correspondence (e.g. a normalized 2D image
    /// point, or a line segment).
    type PointA;
    /// The second element of a correspondence (e.g. a 3D world point, a 2D
    /// point in the second image, or a homogeneous line).
    type PointB;
    /// The estimated model (pose matrix, essential matrix, vanishing point).
    type Model: Clone;

    /// The minimum number of correspondences needed to estimate a model.
    const MIN_SAMPLES: usize;

    /// Estimate candidate models from a sample of correspondences.
    ///
    /// Geometric minimal problems are multi-valued: a single call returns
    /// between zero and a small, solver-specific number of candidates
    /// (at most 1 for P3P and EPnP, 10 for the five-point problem).
    /// A degenerate sample yields an empty vector, never NaN models.
    fn estimate(points_a: &[Self::PointA], points_b: &[Self::PointB]) -> Vec<Self::Model>;

    /// Compute one non-negative residual per correspondence for `model`.
    ///
    /// Units are solver-specific but always increase monotonically with
    /// misfit and compare against a single scalar threshold. `f64::MAX`
    /// marks correspondences the model cannot score (e.g. a point behind
    /// the camera).
    fn residuals(
        points_a: &[Self::PointA],
        points_b: &[Self::PointB],
        model: &Self::Model,
    ) -> Vec<f64>;
}
